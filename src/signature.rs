//! Re-encodes a WebAuthn assertion into the signature bytes the wallet's
//! on-chain verifier decodes:
//!
//! `version (1) ‖ validUntil (6) ‖ abi.encode((bytes authenticatorData,
//! string clientDataJSON, uint256 challengeLocation, uint256 responseTypeLocation,
//! bytes32 r, bytes32 s))`
//!
//! The verifier searches clientDataJSON as raw text, so the offsets are byte
//! offsets into the exact string the authenticator signed.

use crate::challenge::{self, parse_signature_response, to_base64url, CHALLENGE_LEN};
use crate::error::ChallengeEncodingError;
use crate::types::{Assertion, DecodedAssertion};
use ethers::abi::{encode, Token};
use ethers::types::{Bytes, U256};
use p256::ecdsa::Signature as P256Signature;

const CHALLENGE_KEY: &str = "\"challenge\":\"";
const RESPONSE_TYPE: &str = "\"type\":\"webauthn.get\"";

/// Parsed pieces of the verifier payload, before ABI encoding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WebAuthnSignature {
    pub authenticator_data: Vec<u8>,
    pub client_data_json: String,
    pub challenge_location: usize,
    pub response_type_location: usize,
    pub r: [u8; 32],
    pub s: [u8; 32],
}

impl WebAuthnSignature {
    pub fn from_decoded(d: &DecodedAssertion) -> Result<Self, ChallengeEncodingError> {
        let (challenge_location, response_type_location) = locate(&d.client_data_json)?;
        let (r, s) = der_to_rs(&d.signature)?;
        Ok(Self {
            authenticator_data: d.authenticator_data.clone(),
            client_data_json: d.client_data_json.clone(),
            challenge_location,
            response_type_location,
            r,
            s,
        })
    }

    pub fn abi_encode(&self) -> Vec<u8> {
        encode(&[Token::Tuple(vec![
            Token::Bytes(self.authenticator_data.clone()),
            Token::String(self.client_data_json.clone()),
            Token::Uint(U256::from(self.challenge_location)),
            Token::Uint(U256::from(self.response_type_location)),
            Token::FixedBytes(self.r.to_vec()),
            Token::FixedBytes(self.s.to_vec()),
        ])])
    }

    /// Final on-chain signature: packed `version ‖ validUntil` then the ABI tuple.
    pub fn to_bytes(&self, version: u8, valid_until: u64) -> Result<Bytes, ChallengeEncodingError> {
        let body = self.abi_encode();
        let mut out = Vec::with_capacity(7 + body.len());
        out.push(version);
        out.extend_from_slice(&challenge::valid_until_bytes(valid_until)?);
        out.extend_from_slice(&body);
        Ok(Bytes::from(out))
    }
}

/// Assertion in, signature bytes out. Pure: same input, same bytes.
pub fn format_signature(
    assertion: &Assertion,
    version: u8,
    valid_until: u64,
) -> Result<Bytes, ChallengeEncodingError> {
    let decoded = parse_signature_response(assertion)?;
    WebAuthnSignature::from_decoded(&decoded)?.to_bytes(version, valid_until)
}

/// Byte offsets of `"challenge":"` and `"type":"webauthn.get"`.
pub fn locate(client_data_json: &str) -> Result<(usize, usize), ChallengeEncodingError> {
    let challenge = client_data_json
        .find(CHALLENGE_KEY)
        .ok_or(ChallengeEncodingError::ChallengeNotFound)?;
    let response_type = client_data_json
        .find(RESPONSE_TYPE)
        .ok_or(ChallengeEncodingError::ResponseTypeNotFound)?;
    Ok((challenge, response_type))
}

/// DER `SEQUENCE { INTEGER r, INTEGER s }` to fixed 32-byte big-endian words.
///
/// DER adds a `0x00` sign byte when the high bit is set and drops leading
/// zeros otherwise; both are normalized away here.
pub fn der_to_rs(der: &[u8]) -> Result<([u8; 32], [u8; 32]), ChallengeEncodingError> {
    let sig = P256Signature::from_der(der)
        .map_err(|e| ChallengeEncodingError::InvalidDer(e.to_string()))?;
    let bytes = sig.to_bytes();
    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    r.copy_from_slice(&bytes[..32]);
    s.copy_from_slice(&bytes[32..]);
    Ok((r, s))
}

/// Placeholder with the shape (and roughly the verification cost) of a real
/// signature, for gas estimation before the user has signed anything.
pub fn dummy_signature(version: u8, valid_until: u64) -> Bytes {
    let mut authenticator_data = vec![0u8; 37];
    authenticator_data[32] = 0x05;
    let client_data_json = format!(
        r#"{{"type":"webauthn.get","challenge":"{}","origin":"https://localhost","crossOrigin":false}}"#,
        to_base64url(&[0u8; CHALLENGE_LEN])
    );
    let sig = WebAuthnSignature {
        authenticator_data,
        challenge_location: 23,
        response_type_location: 1,
        client_data_json,
        r: [0x7f; 32],
        s: [0x3f; 32],
    };

    let body = sig.abi_encode();
    let mut out = Vec::with_capacity(7 + body.len());
    out.push(version);
    // Out-of-range expiry only comes from config; the dummy clamps instead of failing.
    out.extend_from_slice(&challenge::valid_until_bytes(valid_until).unwrap_or([0xff; 6]));
    out.extend_from_slice(&body);
    Bytes::from(out)
}
