use crate::error::RpcError;
use crate::types::{SponsorshipResult, UserOperation};
use ethers::types::{Address, Bytes, H256, U256};
use serde_json::Value;

pub fn fmt_address(addr: Address) -> String {
    format!("0x{}", hex::encode(addr.as_bytes()))
}

pub fn fmt_h256(h: H256) -> String {
    format!("0x{}", hex::encode(h.as_bytes()))
}

/// JSON-RPC "quantity" encoding.
pub fn fmt_u256(v: U256) -> String {
    if v.is_zero() {
        "0x0".to_string()
    } else {
        format!("0x{:x}", v)
    }
}

pub fn fmt_bytes(b: &Bytes) -> String {
    format!("0x{}", hex::encode(b.as_ref()))
}

pub fn user_op_to_json(op: &UserOperation) -> Value {
    serde_json::json!({
        "sender": fmt_address(op.sender),
        "nonce": fmt_u256(op.nonce),
        "initCode": fmt_bytes(&op.init_code),
        "callData": fmt_bytes(&op.call_data),
        "callGasLimit": fmt_u256(op.call_gas_limit),
        "verificationGasLimit": fmt_u256(op.verification_gas_limit),
        "preVerificationGas": fmt_u256(op.pre_verification_gas),
        "maxFeePerGas": fmt_u256(op.max_fee_per_gas),
        "maxPriorityFeePerGas": fmt_u256(op.max_priority_fee_per_gas),
        "paymasterAndData": fmt_bytes(&op.paymaster_and_data),
        "signature": fmt_bytes(&op.signature),
    })
}

pub fn parse_u256_quantity(s: &str) -> Result<U256, RpcError> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() {
        return Ok(U256::zero());
    }
    U256::from_str_radix(s, 16)
        .map_err(|e| RpcError::InvalidResponse(format!("bad quantity 0x{s}: {e}")))
}

pub fn parse_h256(s: &str) -> Result<H256, RpcError> {
    let bytes = parse_hex(s)?;
    if bytes.len() != 32 {
        return Err(RpcError::InvalidResponse(format!(
            "expected 32-byte hex, got {} bytes",
            bytes.len()
        )));
    }
    Ok(H256::from_slice(&bytes))
}

pub fn parse_hex(s: &str) -> Result<Vec<u8>, RpcError> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(s).map_err(|e| RpcError::InvalidResponse(format!("invalid hex: {e}")))
}

/// Reads a quantity field that may be a hex string or (from lenient servers) a JSON number.
pub fn u256_field(v: &Value, key: &str) -> Result<U256, RpcError> {
    match v.get(key) {
        Some(Value::String(s)) => parse_u256_quantity(s),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(U256::from)
            .ok_or_else(|| RpcError::InvalidResponse(format!("field {key} is not a u64"))),
        _ => Err(RpcError::InvalidResponse(format!(
            "missing or invalid field {key}"
        ))),
    }
}

pub fn bytes_field(v: &Value, key: &str) -> Result<Bytes, RpcError> {
    let s = v
        .get(key)
        .and_then(|x| x.as_str())
        .ok_or_else(|| RpcError::InvalidResponse(format!("missing or invalid field {key}")))?;
    Ok(Bytes::from(parse_hex(s)?))
}

pub fn parse_sponsorship(v: &Value) -> Result<SponsorshipResult, RpcError> {
    Ok(SponsorshipResult {
        paymaster_and_data: bytes_field(v, "paymasterAndData")?,
        call_gas_limit: u256_field(v, "callGasLimit")?,
        verification_gas_limit: u256_field(v, "verificationGasLimit")?,
        pre_verification_gas: u256_field(v, "preVerificationGas")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn quantities_have_no_leading_zeros() {
        assert_eq!(fmt_u256(U256::zero()), "0x0");
        assert_eq!(fmt_u256(U256::from(0x0100u64)), "0x100");
        assert_eq!(fmt_u256(U256::from(20_000_000_000u64)), "0x4a817c800");
    }

    #[test]
    fn user_op_json_uses_hex_for_every_numeric_field() {
        let op = UserOperation {
            sender: Address::repeat_byte(0xab),
            nonce: U256::from(1),
            call_gas_limit: U256::from(100_000),
            ..Default::default()
        };
        let v = user_op_to_json(&op);
        assert_eq!(v["nonce"], "0x1");
        assert_eq!(v["callGasLimit"], "0x186a0");
        assert_eq!(v["initCode"], "0x");
        assert_eq!(v["maxFeePerGas"], "0x0");
        assert_eq!(
            v["sender"],
            "0xabababababababababababababababababababab"
        );
    }

    #[test]
    fn parse_sponsorship_takes_fields_verbatim() {
        let res = json!({
            "paymasterAndData": "0xdeadbeef",
            "callGasLimit": "0x1",
            "verificationGasLimit": "0x2",
            "preVerificationGas": "0x3",
        });
        let s = parse_sponsorship(&res).unwrap();
        assert_eq!(s.paymaster_and_data, Bytes::from(vec![0xde, 0xad, 0xbe, 0xef]));
        assert_eq!(s.call_gas_limit, U256::from(1));
        assert_eq!(s.verification_gas_limit, U256::from(2));
        assert_eq!(s.pre_verification_gas, U256::from(3));
    }

    #[test]
    fn parse_sponsorship_rejects_missing_paymaster_data() {
        let res = json!({ "callGasLimit": "0x1" });
        assert!(parse_sponsorship(&res).is_err());
    }

    #[test]
    fn u256_field_accepts_numbers() {
        let v = json!({ "callGasLimit": 42 });
        assert_eq!(u256_field(&v, "callGasLimit").unwrap(), U256::from(42));
    }
}
