//! WebAuthn challenge bytes: `version (1) ‖ validUntil (6, BE) ‖ userOpHash (32)`.

use crate::error::ChallengeEncodingError;
use crate::types::{Assertion, DecodedAssertion};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use ethers::types::H256;

pub const CHALLENGE_LEN: usize = 1 + 6 + 32;
pub const DEFAULT_VERSION: u8 = 1;
/// `validUntil = 0` means the signature never expires.
pub const NO_EXPIRY: u64 = 0;

const MAX_VALID_UNTIL: u64 = (1 << 48) - 1;

pub fn build_challenge(
    user_op_hash: H256,
    version: u8,
    valid_until: u64,
) -> Result<[u8; CHALLENGE_LEN], ChallengeEncodingError> {
    let mut out = [0u8; CHALLENGE_LEN];
    out[0] = version;
    out[1..7].copy_from_slice(&valid_until_bytes(valid_until)?);
    out[7..].copy_from_slice(user_op_hash.as_bytes());
    Ok(out)
}

/// Splits challenge bytes back into `(version, validUntil, userOpHash)`.
pub fn parse_challenge(bytes: &[u8]) -> Result<(u8, u64, H256), ChallengeEncodingError> {
    if bytes.len() != CHALLENGE_LEN {
        return Err(ChallengeEncodingError::InvalidChallengeLength(bytes.len()));
    }
    let mut until = [0u8; 8];
    until[2..].copy_from_slice(&bytes[1..7]);
    Ok((
        bytes[0],
        u64::from_be_bytes(until),
        H256::from_slice(&bytes[7..]),
    ))
}

pub(crate) fn valid_until_bytes(valid_until: u64) -> Result<[u8; 6], ChallengeEncodingError> {
    if valid_until > MAX_VALID_UNTIL {
        return Err(ChallengeEncodingError::ValidUntilOutOfRange(valid_until));
    }
    let be = valid_until.to_be_bytes();
    let mut out = [0u8; 6];
    out.copy_from_slice(&be[2..]);
    Ok(out)
}

pub fn to_base64url(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn from_base64url(
    s: &str,
    field: &'static str,
) -> Result<Vec<u8>, ChallengeEncodingError> {
    // Some authenticators pad anyway.
    URL_SAFE_NO_PAD
        .decode(s.trim_end_matches('='))
        .map_err(|_| ChallengeEncodingError::InvalidBase64 { field })
}

pub fn parse_signature_response(
    assertion: &Assertion,
) -> Result<DecodedAssertion, ChallengeEncodingError> {
    let authenticator_data = from_base64url(&assertion.authenticator_data, "authenticatorData")?;
    let client_data = from_base64url(&assertion.client_data_json, "clientDataJSON")?;
    let signature = from_base64url(&assertion.signature, "signature")?;
    let client_data_json =
        String::from_utf8(client_data).map_err(|_| ChallengeEncodingError::InvalidUtf8)?;

    Ok(DecodedAssertion {
        authenticator_data,
        client_data_json,
        signature,
        credential_id: assertion.credential_id.clone(),
    })
}
