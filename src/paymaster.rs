use crate::encoding::{fmt_address, parse_sponsorship, user_op_to_json};
use crate::error::RpcError;
use crate::rpc::JsonRpcTransport;
use crate::types::{SponsorshipResult, UserOperation};
use ethers::types::Address;
use serde_json::Value;
use std::sync::Arc;

/// `pm_sponsorUserOperation` client (EntryPoint v0.6 response shape).
#[derive(Clone)]
pub struct PaymasterClient {
    transport: Arc<dyn JsonRpcTransport>,
    /// Optional sponsorship context (e.g. `{ "sponsorshipPolicyId": ".." }`),
    /// appended as a third param when set.
    context: Option<Value>,
}

impl PaymasterClient {
    pub fn new(transport: Arc<dyn JsonRpcTransport>) -> Self {
        Self {
            transport,
            context: None,
        }
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    pub async fn sponsor_user_operation(
        &self,
        op: &UserOperation,
        entry_point: Address,
    ) -> Result<SponsorshipResult, RpcError> {
        let mut params = vec![user_op_to_json(op), Value::String(fmt_address(entry_point))];
        if let Some(ctx) = &self.context {
            params.push(ctx.clone());
        }

        let res = self
            .transport
            .request("pm_sponsorUserOperation", Value::Array(params))
            .await?;
        parse_sponsorship(&res)
    }
}
