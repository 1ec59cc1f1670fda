use crate::encoding::{fmt_address, parse_h256, u256_field, user_op_to_json};
use crate::error::{RpcError, SubmissionError};
use crate::rpc::JsonRpcTransport;
use crate::types::{GasLimits, UserOperation};
use ethers::types::{Address, H256};
use serde_json::Value;
use std::sync::Arc;

/// ERC-4337 bundler JSON-RPC client. One request per call, no retries.
#[derive(Clone)]
pub struct BundlerClient {
    transport: Arc<dyn JsonRpcTransport>,
}

impl BundlerClient {
    pub fn new(transport: Arc<dyn JsonRpcTransport>) -> Self {
        Self { transport }
    }

    /// Raw bundler estimate; scaling is the caller's decision.
    pub async fn estimate_user_operation_gas(
        &self,
        op: &UserOperation,
        entry_point: Address,
    ) -> Result<GasLimits, RpcError> {
        let params = serde_json::json!([user_op_to_json(op), fmt_address(entry_point)]);
        let res = self
            .transport
            .request("eth_estimateUserOperationGas", params)
            .await?;

        Ok(GasLimits {
            call_gas_limit: u256_field(&res, "callGasLimit")?,
            verification_gas_limit: u256_field(&res, "verificationGasLimit")?,
            pre_verification_gas: u256_field(&res, "preVerificationGas")?,
        })
    }

    pub async fn send_user_operation(
        &self,
        op: &UserOperation,
        entry_point: Address,
    ) -> Result<H256, SubmissionError> {
        let params = serde_json::json!([user_op_to_json(op), fmt_address(entry_point)]);
        let res = self
            .transport
            .request("eth_sendUserOperation", params)
            .await?;
        parse_userop_hash(&res).map_err(SubmissionError::from)
    }
}

fn parse_userop_hash(res: &Value) -> Result<H256, RpcError> {
    // Most bundlers return the userOpHash directly as a JSON string; some wrap it.
    let hash_str = if let Some(s) = res.as_str() {
        s
    } else if let Some(s) = res.get("result").and_then(|v| v.as_str()) {
        s
    } else if let Some(s) = res.get("userOpHash").and_then(|v| v.as_str()) {
        s
    } else if let Some(s) = res.get("userOperationHash").and_then(|v| v.as_str()) {
        s
    } else {
        return Err(RpcError::InvalidResponse(format!(
            "unexpected eth_sendUserOperation result shape: {res}"
        )));
    };

    parse_h256(hash_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedTransport;
    use ethers::types::U256;
    use serde_json::json;

    const HASH: &str = "0x1111111111111111111111111111111111111111111111111111111111111111";

    #[test]
    fn parse_userop_hash_from_string() {
        let hash = parse_userop_hash(&json!(HASH)).unwrap();
        assert_eq!(hash, parse_h256(HASH).unwrap());
    }

    #[test]
    fn parse_userop_hash_from_wrapped_objects() {
        for key in ["result", "userOpHash", "userOperationHash"] {
            let hash = parse_userop_hash(&json!({ key: HASH })).unwrap();
            assert_eq!(hash, parse_h256(HASH).unwrap());
        }
    }

    #[test]
    fn parse_userop_hash_rejects_unknown_shape() {
        assert!(parse_userop_hash(&json!({ "foo": "bar" })).is_err());
    }

    #[tokio::test]
    async fn estimate_sends_hex_op_and_entry_point() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(
            "eth_estimateUserOperationGas",
            Ok(json!({
                "callGasLimit": "0x10",
                "verificationGasLimit": "0x20",
                "preVerificationGas": "0x30",
            })),
        );
        let bundler = BundlerClient::new(transport.clone());
        let ep = Address::repeat_byte(0xee);
        let op = UserOperation {
            nonce: U256::from(3),
            ..Default::default()
        };

        let gas = bundler.estimate_user_operation_gas(&op, ep).await.unwrap();
        assert_eq!(gas.call_gas_limit, U256::from(0x10));
        assert_eq!(gas.pre_verification_gas, U256::from(0x30));

        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        let (method, params) = &calls[0];
        assert_eq!(method, "eth_estimateUserOperationGas");
        assert_eq!(params[0]["nonce"], "0x3");
        assert_eq!(params[1], fmt_address(ep));
    }

    #[tokio::test]
    async fn send_rejection_keeps_bundler_payload() {
        let transport = Arc::new(ScriptedTransport::new());
        let raw = json!({ "code": -32500, "message": "AA24 signature error" });
        transport.respond(
            "eth_sendUserOperation",
            Err(RpcError::Rpc {
                code: -32500,
                message: "AA24 signature error".into(),
                raw: raw.clone(),
            }),
        );
        let bundler = BundlerClient::new(transport);

        let err = bundler
            .send_user_operation(&UserOperation::default(), Address::zero())
            .await
            .unwrap_err();
        assert_eq!(err.code, Some(-32500));
        assert_eq!(err.payload, raw);
    }
}
