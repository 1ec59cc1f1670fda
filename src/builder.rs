//! Typestate assembly of an unsigned `UserOperation`.
//!
//! `Init → AddressResolved → DeploymentChecked → CallDataSet → GasEstimated →
//! FeesSet → UnsignedUserOperation`. Each step consumes the previous one, so a
//! step cannot be skipped and a finished operation cannot be mutated.

use crate::calldata::{encode_wallet_call, init_code};
use crate::chain::WalletChain;
use crate::error::{ChainReadError, WalletError};
use crate::gas::{GasEstimator, GasSource};
use crate::signature::dummy_signature;
use crate::types::{PasskeyPublicKey, UserOperation, WalletCall, WalletRef};
use ethers::types::{Address, Bytes, U256};
use std::sync::Arc;

/// Collaborators and fixed parameters shared by every build.
pub struct BuildContext {
    pub chain: Arc<dyn WalletChain>,
    pub gas: GasEstimator,
    pub factory: Address,
    pub salt: U256,
    /// Used for the placeholder signature sent with estimation requests.
    pub signature_version: u8,
    pub valid_until: u64,
}

pub struct UserOperationBuilder<'a, S> {
    ctx: &'a BuildContext,
    state: S,
}

pub struct Init;

pub struct AddressResolved {
    sender: Address,
    public_key: Option<PasskeyPublicKey>,
}

pub struct DeploymentChecked {
    sender: Address,
    nonce: U256,
    init_code: Bytes,
    deployed: bool,
}

pub struct CallDataSet {
    op: UserOperation,
    deployed: bool,
}

pub struct GasEstimated {
    op: UserOperation,
    deployed: bool,
    gas_source: GasSource,
}

pub struct FeesSet {
    op: UserOperation,
    deployed: bool,
    gas_source: GasSource,
}

impl<'a> UserOperationBuilder<'a, Init> {
    pub fn new(ctx: &'a BuildContext) -> Self {
        Self { ctx, state: Init }
    }

    pub async fn resolve_address(
        self,
        wallet: &WalletRef,
    ) -> Result<UserOperationBuilder<'a, AddressResolved>, ChainReadError> {
        let sender = match wallet {
            WalletRef::Passkey(key) => self.ctx.chain.wallet_address(key).await?,
            WalletRef::Known { address, .. } => *address,
        };
        tracing::debug!(sender = ?sender, "wallet address resolved");

        Ok(UserOperationBuilder {
            ctx: self.ctx,
            state: AddressResolved {
                sender,
                public_key: wallet.public_key(),
            },
        })
    }
}

impl<'a> UserOperationBuilder<'a, AddressResolved> {
    pub fn sender(&self) -> Address {
        self.state.sender
    }

    /// Reads code presence and the fresh EntryPoint nonce.
    pub async fn check_deployment(
        self,
    ) -> Result<UserOperationBuilder<'a, DeploymentChecked>, WalletError> {
        let AddressResolved { sender, public_key } = self.state;
        let deployed = self.ctx.chain.is_deployed(sender).await?;

        let init_code = if deployed {
            Bytes::default()
        } else {
            let key = public_key.ok_or(WalletError::MissingPublicKey(sender))?;
            init_code(self.ctx.factory, &key, self.ctx.salt)
        };
        let nonce = self.ctx.chain.nonce(sender).await?;
        tracing::debug!(sender = ?sender, deployed, nonce = %nonce, "deployment checked");

        Ok(UserOperationBuilder {
            ctx: self.ctx,
            state: DeploymentChecked {
                sender,
                nonce,
                init_code,
                deployed,
            },
        })
    }
}

impl<'a> UserOperationBuilder<'a, DeploymentChecked> {
    pub fn is_deployed(&self) -> bool {
        self.state.deployed
    }

    pub fn call_data(self, call: &WalletCall) -> UserOperationBuilder<'a, CallDataSet> {
        let DeploymentChecked {
            sender,
            nonce,
            init_code,
            deployed,
        } = self.state;

        UserOperationBuilder {
            ctx: self.ctx,
            state: CallDataSet {
                op: UserOperation {
                    sender,
                    nonce,
                    init_code,
                    call_data: encode_wallet_call(call),
                    ..Default::default()
                },
                deployed,
            },
        }
    }
}

impl<'a> UserOperationBuilder<'a, CallDataSet> {
    /// Never fails; see [`GasEstimator::estimate`].
    pub async fn estimate_gas(self) -> UserOperationBuilder<'a, GasEstimated> {
        let CallDataSet { mut op, deployed } = self.state;

        let mut draft = op.clone();
        draft.signature = dummy_signature(self.ctx.signature_version, self.ctx.valid_until);
        let quote = self.ctx.gas.estimate(&draft, deployed).await;

        op.call_gas_limit = quote.limits.call_gas_limit;
        op.verification_gas_limit = quote.limits.verification_gas_limit;
        op.pre_verification_gas = quote.limits.pre_verification_gas;
        op.paymaster_and_data = quote.paymaster_and_data;

        UserOperationBuilder {
            ctx: self.ctx,
            state: GasEstimated {
                op,
                deployed,
                gas_source: quote.source,
            },
        }
    }
}

impl<'a> UserOperationBuilder<'a, GasEstimated> {
    pub fn gas_source(&self) -> &GasSource {
        &self.state.gas_source
    }

    pub async fn set_fees(self) -> Result<UserOperationBuilder<'a, FeesSet>, ChainReadError> {
        let GasEstimated {
            mut op,
            deployed,
            gas_source,
        } = self.state;

        let suggestion = self.ctx.chain.fee_suggestion().await?;
        let fees = self.ctx.gas.fees(suggestion);
        op.max_fee_per_gas = fees.max_fee_per_gas;
        op.max_priority_fee_per_gas = fees.max_priority_fee_per_gas;

        Ok(UserOperationBuilder {
            ctx: self.ctx,
            state: FeesSet {
                op,
                deployed,
                gas_source,
            },
        })
    }
}

impl<'a> UserOperationBuilder<'a, FeesSet> {
    pub fn finish(self) -> UnsignedUserOperation {
        let FeesSet {
            op,
            deployed,
            gas_source,
        } = self.state;
        UnsignedUserOperation {
            op,
            deployed,
            gas_source,
        }
    }
}

/// Every field final except the signature. Read-only until [`sign`](Self::sign).
#[derive(Clone, Debug)]
pub struct UnsignedUserOperation {
    op: UserOperation,
    deployed: bool,
    gas_source: GasSource,
}

impl UnsignedUserOperation {
    pub fn op(&self) -> &UserOperation {
        &self.op
    }

    /// Whether the wallet already existed when the operation was built.
    pub fn was_deployed(&self) -> bool {
        self.deployed
    }

    pub fn gas_source(&self) -> &GasSource {
        &self.gas_source
    }

    pub fn sign(self, signature: Bytes) -> SignedUserOperation {
        let mut op = self.op;
        op.signature = signature;
        SignedUserOperation { op }
    }
}

/// Ready for submission. Consumed by the bundler call.
#[derive(Clone, Debug)]
pub struct SignedUserOperation {
    op: UserOperation,
}

impl SignedUserOperation {
    pub fn op(&self) -> &UserOperation {
        &self.op
    }

    pub fn into_inner(self) -> UserOperation {
        self.op
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundler::BundlerClient;
    use crate::calldata;
    use crate::testing::{FakeChain, ScriptedTransport};
    use crate::types::FeeFields;
    use ethers::types::H256;

    fn key() -> PasskeyPublicKey {
        PasskeyPublicKey {
            x: H256::repeat_byte(0x0a),
            y: H256::repeat_byte(0x0b),
        }
    }

    fn context(chain: Arc<FakeChain>) -> BuildContext {
        BuildContext {
            chain,
            gas: GasEstimator::new(
                BundlerClient::new(Arc::new(ScriptedTransport::failing())),
                None,
                Address::repeat_byte(0xee),
            ),
            factory: Address::repeat_byte(0xfa),
            salt: U256::zero(),
            signature_version: 1,
            valid_until: 0,
        }
    }

    async fn build(ctx: &BuildContext, wallet: WalletRef, call: WalletCall) -> UnsignedUserOperation {
        UserOperationBuilder::new(ctx)
            .resolve_address(&wallet)
            .await
            .unwrap()
            .check_deployment()
            .await
            .unwrap()
            .call_data(&call)
            .estimate_gas()
            .await
            .set_fees()
            .await
            .unwrap()
            .finish()
    }

    #[tokio::test]
    async fn undeployed_wallet_gets_init_code() {
        let chain = Arc::new(FakeChain::new(Address::repeat_byte(0xee), 1));
        let ctx = context(chain.clone());

        let unsigned = build(&ctx, WalletRef::Passkey(key()), WalletCall::DeployOnly).await;
        let op = unsigned.op();

        assert_eq!(op.sender, FakeChain::address_for(&key()));
        assert_eq!(op.init_code, calldata::init_code(ctx.factory, &key(), U256::zero()));
        assert!(op.call_data.is_empty());
        assert!(op.gas().is_complete());
        assert!(op.signature.is_empty());
        assert!(!unsigned.was_deployed());
    }

    #[tokio::test]
    async fn deployed_wallet_has_no_init_code_and_fresh_nonce() {
        let chain = Arc::new(FakeChain::new(Address::repeat_byte(0xee), 1));
        let sender = FakeChain::address_for(&key());
        chain.set_deployed(sender, true);
        chain.set_nonce(sender, U256::from(4));
        let ctx = context(chain.clone());
        let call = WalletCall::EthTransfer {
            to: Address::repeat_byte(0x42),
            value: U256::from(1),
        };

        let first = build(&ctx, WalletRef::Passkey(key()), call.clone()).await;
        assert!(first.op().init_code.is_empty());
        assert_eq!(first.op().nonce, U256::from(4));

        chain.set_nonce(sender, U256::from(5));
        let second = build(&ctx, WalletRef::Passkey(key()), call).await;
        assert_eq!(second.op().nonce, U256::from(5));
    }

    #[tokio::test]
    async fn known_undeployed_address_without_key_is_rejected() {
        let chain = Arc::new(FakeChain::new(Address::repeat_byte(0xee), 1));
        let ctx = context(chain);
        let address = Address::repeat_byte(0x55);

        let err = UserOperationBuilder::new(&ctx)
            .resolve_address(&WalletRef::Known {
                address,
                public_key: None,
            })
            .await
            .unwrap()
            .check_deployment()
            .await
            .err()
            .unwrap();
        assert!(matches!(err, WalletError::MissingPublicKey(a) if a == address));
    }

    #[tokio::test]
    async fn chain_failure_stops_the_build() {
        let chain = Arc::new(FakeChain::new(Address::repeat_byte(0xee), 1));
        chain.fail_reads(true);
        let ctx = context(chain);

        let err = UserOperationBuilder::new(&ctx)
            .resolve_address(&WalletRef::Passkey(key()))
            .await
            .err()
            .unwrap();
        assert_eq!(err.call, "factory.getAddress");
    }

    #[tokio::test]
    async fn fees_follow_chain_suggestion() {
        let chain = Arc::new(FakeChain::new(Address::repeat_byte(0xee), 1));
        chain.set_fees(Some(FeeFields {
            max_fee_per_gas: U256::from(7_000),
            max_priority_fee_per_gas: U256::from(300),
        }));
        let ctx = context(chain);

        let unsigned = build(&ctx, WalletRef::Passkey(key()), WalletCall::DeployOnly).await;
        assert_eq!(unsigned.op().max_fee_per_gas, U256::from(7_000));
        assert_eq!(unsigned.op().max_priority_fee_per_gas, U256::from(300));
    }

    #[tokio::test]
    async fn signing_keeps_every_other_field() {
        let chain = Arc::new(FakeChain::new(Address::repeat_byte(0xee), 1));
        let ctx = context(chain);
        let unsigned = build(&ctx, WalletRef::Passkey(key()), WalletCall::DeployOnly).await;
        let before = unsigned.op().clone();

        let signed = unsigned.sign(Bytes::from(vec![1, 2, 3]));
        let after = signed.into_inner();
        assert_eq!(after.signature, Bytes::from(vec![1, 2, 3]));
        assert_eq!(after.hash(Address::zero(), 1), before.hash(Address::zero(), 1));
    }
}
