use crate::error::RpcError;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

/// JSON-RPC 2.0 request/response. Implementations must not retry: a failed
/// call is reported as-is so callers can fall back or surface it.
///
/// Anything satisfying this contract (direct HTTPS, a privacy relay) can back
/// the bundler and paymaster clients.
#[async_trait]
pub trait JsonRpcTransport: Send + Sync {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError>;
}

#[derive(Debug)]
pub struct HttpTransport {
    url: String,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl HttpTransport {
    pub fn new(url: String) -> Self {
        Self::with_client(url, reqwest::Client::new())
    }

    /// Use a preconfigured client (proxy, timeouts, custom TLS).
    pub fn with_client(url: String, http: reqwest::Client) -> Self {
        Self {
            url,
            http,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl JsonRpcTransport for HttpTransport {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        tracing::debug!(url = %self.url, method, id, "json-rpc request");

        let resp = self
            .http
            .post(&self.url)
            .json(&req)
            .send()
            .await
            .map_err(|e| RpcError::Transport {
                url: self.url.clone(),
                message: e.to_string(),
            })?;

        let status = resp.status();
        let body: Value = resp
            .json()
            .await
            .map_err(|e| RpcError::InvalidResponse(format!("failed to decode JSON: {e}")))?;

        if !status.is_success() {
            return Err(RpcError::Http {
                status: status.as_u16(),
                body,
            });
        }

        into_result(body)
    }
}

/// Splits a JSON-RPC envelope into its `result` or a typed error.
pub fn into_result(body: Value) -> Result<Value, RpcError> {
    if let Some(err) = body.get("error") {
        return Err(RpcError::Rpc {
            code: err.get("code").and_then(Value::as_i64).unwrap_or(0),
            message: err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
            raw: err.clone(),
        });
    }

    body.get("result")
        .cloned()
        .ok_or_else(|| RpcError::InvalidResponse("missing result field".to_string()))
}

#[cfg(test)]
mod tests {
    use super::into_result;
    use crate::error::RpcError;
    use serde_json::json;

    #[test]
    fn result_is_unwrapped() {
        let v = into_result(json!({ "jsonrpc": "2.0", "id": 1, "result": "0x1" })).unwrap();
        assert_eq!(v, json!("0x1"));
    }

    #[test]
    fn error_keeps_raw_payload() {
        let raw = json!({ "code": -32602, "message": "AA25 invalid account nonce", "data": { "nonce": "0x1" } });
        let err = into_result(json!({ "jsonrpc": "2.0", "id": 1, "error": raw.clone() })).unwrap_err();
        match err {
            RpcError::Rpc { code, message, raw: got } => {
                assert_eq!(code, -32602);
                assert_eq!(message, "AA25 invalid account nonce");
                assert_eq!(got, raw);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_result_is_invalid() {
        assert!(matches!(
            into_result(json!({ "jsonrpc": "2.0", "id": 1 })),
            Err(RpcError::InvalidResponse(_))
        ));
    }
}
