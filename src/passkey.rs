//! Passkey capability: create a credential, sign a challenge.
//!
//! Two backends, picked when the orchestrator is composed:
//! [`LocalPasskey`] keeps a P-256 key in memory and produces real WebAuthn
//! responses; [`RemotePasskey`] forwards to a device-side authenticator over
//! HTTPS.

use crate::challenge::to_base64url;
use crate::error::PasskeyError;
use crate::types::{Assertion, PasskeyCredential, PasskeyPublicKey};
use async_trait::async_trait;
use ethers::types::H256;
use p256::ecdsa::{signature::Signer, Signature, SigningKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Authenticator flags: user present | user verified.
const FLAGS_UP_UV: u8 = 0x05;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserVerification {
    #[default]
    Required,
    Preferred,
    Discouraged,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOptions {
    pub rp_id: String,
    pub rp_name: String,
    pub user_name: String,
    /// base64url
    pub challenge: String,
    pub user_verification: UserVerification,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetOptions {
    pub rp_id: String,
    /// base64url of the 39-byte user-op challenge.
    pub challenge: String,
    /// base64url credential ids; empty lets the authenticator choose.
    #[serde(default)]
    pub allow_credentials: Vec<String>,
    pub user_verification: UserVerification,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

#[async_trait]
pub trait PasskeyBackend: Send + Sync {
    async fn create(&self, options: CreateOptions) -> Result<PasskeyCredential, PasskeyError>;

    /// `Err(PasskeyError::Cancelled)` when the user dismisses the prompt.
    async fn get(&self, options: GetOptions) -> Result<Assertion, PasskeyError>;
}

/// Software authenticator over an in-memory P-256 key.
pub struct LocalPasskey {
    key: SigningKey,
    credential_id: String,
    sign_count: AtomicU32,
}

impl LocalPasskey {
    pub fn generate() -> Result<Self, PasskeyError> {
        let mut rng = OsRng;
        // A random 32-byte string is a valid scalar with overwhelming probability.
        for _ in 0..16 {
            let mut bytes = [0u8; 32];
            rng.fill_bytes(&mut bytes);
            if let Ok(key) = SigningKey::from_slice(&bytes) {
                return Ok(Self::from_signing_key(key));
            }
        }
        Err(PasskeyError::Backend(
            "failed to generate a P-256 key".to_string(),
        ))
    }

    /// Hex private key, with or without `0x`.
    pub fn from_hex(secret: &str) -> Result<Self, PasskeyError> {
        let bytes = hex::decode(secret.trim().trim_start_matches("0x"))
            .map_err(|e| PasskeyError::Backend(format!("invalid passkey key hex: {e}")))?;
        let key = SigningKey::from_slice(&bytes)
            .map_err(|e| PasskeyError::Backend(format!("invalid P-256 key: {e}")))?;
        Ok(Self::from_signing_key(key))
    }

    pub fn from_signing_key(key: SigningKey) -> Self {
        let public_key = public_key_of(&key);
        // Stable id derived from the key so a reloaded key keeps its credential.
        let mut digest = Sha256::new();
        digest.update(public_key.x.as_bytes());
        digest.update(public_key.y.as_bytes());
        let credential_id = to_base64url(&digest.finalize()[..16]);

        Self {
            key,
            credential_id,
            sign_count: AtomicU32::new(0),
        }
    }

    /// 0x-prefixed private key. Handle as a secret.
    pub fn secret_hex(&self) -> String {
        format!("0x{}", hex::encode(self.key.to_bytes()))
    }

    pub fn credential(&self) -> PasskeyCredential {
        PasskeyCredential {
            public_key: public_key_of(&self.key),
            credential_id: self.credential_id.clone(),
        }
    }

    fn authenticator_data(&self, rp_id: &str) -> Vec<u8> {
        let counter = self.sign_count.fetch_add(1, Ordering::SeqCst) + 1;
        let mut data = Vec::with_capacity(37);
        data.extend_from_slice(&Sha256::digest(rp_id.as_bytes()));
        data.push(FLAGS_UP_UV);
        data.extend_from_slice(&counter.to_be_bytes());
        data
    }
}

fn public_key_of(key: &SigningKey) -> PasskeyPublicKey {
    let point = key.verifying_key().to_encoded_point(false);
    let bytes = point.as_bytes();
    PasskeyPublicKey {
        x: H256::from_slice(&bytes[1..33]),
        y: H256::from_slice(&bytes[33..65]),
    }
}

/// `clientDataJSON` in the key order browsers emit.
pub fn client_data_json(challenge: &str, origin: &str) -> String {
    format!(
        r#"{{"type":"webauthn.get","challenge":"{challenge}","origin":"{origin}","crossOrigin":false}}"#
    )
}

#[async_trait]
impl PasskeyBackend for LocalPasskey {
    async fn create(&self, options: CreateOptions) -> Result<PasskeyCredential, PasskeyError> {
        tracing::debug!(rp_id = %options.rp_id, user = %options.user_name, "local passkey create");
        Ok(self.credential())
    }

    async fn get(&self, options: GetOptions) -> Result<Assertion, PasskeyError> {
        if !options.allow_credentials.is_empty()
            && !options.allow_credentials.contains(&self.credential_id)
        {
            return Err(PasskeyError::UnknownCredential(
                options.allow_credentials.join(","),
            ));
        }

        let authenticator_data = self.authenticator_data(&options.rp_id);
        let client_data = client_data_json(&options.challenge, &format!("https://{}", options.rp_id));

        // WebAuthn signs authenticatorData ‖ sha256(clientDataJSON); the signer hashes again.
        let mut message = authenticator_data.clone();
        message.extend_from_slice(&Sha256::digest(client_data.as_bytes()));
        let signature: Signature = self.key.sign(&message);

        Ok(Assertion {
            authenticator_data: to_base64url(&authenticator_data),
            client_data_json: to_base64url(client_data.as_bytes()),
            signature: to_base64url(signature.to_der().as_bytes()),
            credential_id: self.credential_id.clone(),
        })
    }
}

/// HTTPS bridge to an authenticator on the user's device.
///
/// `POST {url}/create` and `POST {url}/get` take the options as JSON and answer
/// with a credential / assertion, or `{ "error": { "name", "message" } }`.
pub struct RemotePasskey {
    url: String,
    http: reqwest::Client,
}

impl RemotePasskey {
    pub fn new(url: String) -> Self {
        Self {
            url: url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn with_client(url: String, http: reqwest::Client) -> Self {
        Self {
            url: url.trim_end_matches('/').to_string(),
            http,
        }
    }

    async fn post<T: Serialize + Sync>(
        &self,
        path: &str,
        body: &T,
        timeout_ms: Option<u64>,
    ) -> Result<Value, PasskeyError> {
        let url = format!("{}/{}", self.url, path);
        let mut req = self.http.post(&url).json(body);
        if let Some(ms) = timeout_ms {
            req = req.timeout(Duration::from_millis(ms));
        }

        let resp = req
            .send()
            .await
            .map_err(|e| PasskeyError::Backend(format!("POST {url} failed: {e}")))?;
        let status = resp.status();
        let body: Value = resp
            .json()
            .await
            .map_err(|e| PasskeyError::Backend(format!("invalid JSON from {url}: {e}")))?;

        bridge_reply(status.as_u16(), body)
    }
}

/// Maps a bridge reply to its payload, or to the matching [`PasskeyError`].
fn bridge_reply(status: u16, body: Value) -> Result<Value, PasskeyError> {
    if let Some(err) = body.get("error") {
        let name = err.get("name").and_then(Value::as_str).unwrap_or_default();
        let message = err
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or(name)
            .to_string();
        return Err(match name {
            "NotAllowedError" | "AbortError" => PasskeyError::Cancelled,
            _ => PasskeyError::Backend(format!("{name}: {message}")),
        });
    }
    if !(200..300).contains(&status) {
        return Err(PasskeyError::Backend(format!("HTTP {status}: {body}")));
    }
    Ok(body)
}

#[async_trait]
impl PasskeyBackend for RemotePasskey {
    async fn create(&self, options: CreateOptions) -> Result<PasskeyCredential, PasskeyError> {
        let body = self.post("create", &options, options.timeout_ms).await?;
        serde_json::from_value(body)
            .map_err(|e| PasskeyError::Backend(format!("malformed credential: {e}")))
    }

    async fn get(&self, options: GetOptions) -> Result<Assertion, PasskeyError> {
        let body = self.post("get", &options, options.timeout_ms).await?;
        serde_json::from_value(body)
            .map_err(|e| PasskeyError::Backend(format!("malformed assertion: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenge::{build_challenge, from_base64url, parse_challenge};
    use crate::signature::{format_signature, locate};
    use p256::ecdsa::{signature::Verifier, VerifyingKey};
    use serde_json::json;

    fn passkey() -> LocalPasskey {
        LocalPasskey::from_signing_key(SigningKey::from_slice(&[0x11; 32]).unwrap())
    }

    fn get_options(challenge: String) -> GetOptions {
        GetOptions {
            rp_id: "wallet.example".into(),
            challenge,
            allow_credentials: vec![],
            user_verification: UserVerification::Required,
            timeout_ms: None,
        }
    }

    #[tokio::test]
    async fn local_assertion_verifies_against_public_key() {
        let pk = passkey();
        let challenge = build_challenge(H256::repeat_byte(0xab), 1, 0).unwrap();
        let assertion = pk.get(get_options(to_base64url(&challenge))).await.unwrap();

        let auth = from_base64url(&assertion.authenticator_data, "a").unwrap();
        let cdj = from_base64url(&assertion.client_data_json, "c").unwrap();
        let der = from_base64url(&assertion.signature, "s").unwrap();
        assert_eq!(auth.len(), 37);
        assert_eq!(auth[32], FLAGS_UP_UV);

        let mut message = auth.clone();
        message.extend_from_slice(&Sha256::digest(&cdj));
        let sig = Signature::from_der(&der).unwrap();
        let key = pk.credential().public_key;
        let mut sec1 = vec![0x04];
        sec1.extend_from_slice(key.x.as_bytes());
        sec1.extend_from_slice(key.y.as_bytes());
        let vk = VerifyingKey::from_sec1_bytes(&sec1).unwrap();
        vk.verify(&message, &sig).unwrap();
    }

    #[tokio::test]
    async fn local_client_data_carries_the_challenge() {
        let pk = passkey();
        let hash = H256::repeat_byte(0x5c);
        let challenge = to_base64url(&build_challenge(hash, 1, 0).unwrap());
        let assertion = pk.get(get_options(challenge.clone())).await.unwrap();

        let cdj = String::from_utf8(from_base64url(&assertion.client_data_json, "c").unwrap()).unwrap();
        let v: Value = serde_json::from_str(&cdj).unwrap();
        assert_eq!(v["challenge"], challenge);
        let raw = from_base64url(v["challenge"].as_str().unwrap(), "challenge").unwrap();
        assert_eq!(parse_challenge(&raw).unwrap(), (1, 0, hash));

        assert_eq!(locate(&cdj).unwrap(), (23, 1));
        assert!(format_signature(&assertion, 1, 0).is_ok());
    }

    #[tokio::test]
    async fn sign_count_increases() {
        let pk = passkey();
        let a = pk.get(get_options("AA".into())).await.unwrap();
        let b = pk.get(get_options("AA".into())).await.unwrap();
        let ca = from_base64url(&a.authenticator_data, "a").unwrap();
        let cb = from_base64url(&b.authenticator_data, "a").unwrap();
        assert!(cb[33..37] > ca[33..37]);
    }

    #[tokio::test]
    async fn unknown_credential_is_refused() {
        let pk = passkey();
        let mut opts = get_options("AA".into());
        opts.allow_credentials = vec!["someone-else".into()];
        assert!(matches!(
            pk.get(opts).await,
            Err(PasskeyError::UnknownCredential(_))
        ));
    }

    #[test]
    fn key_round_trips_through_hex() {
        let pk = passkey();
        let reloaded = LocalPasskey::from_hex(&pk.secret_hex()).unwrap();
        assert_eq!(reloaded.credential(), pk.credential());
    }

    #[test]
    fn bridge_not_allowed_maps_to_cancelled() {
        let body = json!({ "error": { "name": "NotAllowedError", "message": "user dismissed" } });
        assert!(matches!(bridge_reply(400, body), Err(PasskeyError::Cancelled)));
    }

    #[test]
    fn bridge_other_errors_are_backend_failures() {
        let body = json!({ "error": { "name": "InvalidStateError", "message": "nope" } });
        assert!(matches!(bridge_reply(200, body), Err(PasskeyError::Backend(_))));
        assert!(matches!(
            bridge_reply(502, json!("bad gateway")),
            Err(PasskeyError::Backend(_))
        ));
    }

    #[test]
    fn bridge_assertion_parses() {
        let body = json!({
            "authenticatorData": "AA",
            "clientDataJSON": "e30",
            "signature": "MA",
            "credentialId": "cred",
        });
        let value = bridge_reply(200, body).unwrap();
        let assertion: Assertion = serde_json::from_value(value).unwrap();
        assert_eq!(assertion.credential_id, "cred");
    }
}
