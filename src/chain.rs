use crate::bindings::bonus_token::BonusToken;
use crate::bindings::entry_point::EntryPoint;
use crate::bindings::wallet_factory::WalletFactory;
use crate::error::ChainReadError;
use crate::types::{FeeFields, PasskeyPublicKey, UserOperation};
use async_trait::async_trait;
use ethers::providers::Middleware;
use ethers::types::{Address, H256, U256};
use std::sync::Arc;

/// Read-only chain view the builder and orchestrator depend on.
#[async_trait]
pub trait WalletChain: Send + Sync {
    /// Counterfactual wallet address for a passkey; identical before and after deployment.
    async fn wallet_address(&self, key: &PasskeyPublicKey) -> Result<Address, ChainReadError>;

    async fn is_deployed(&self, address: Address) -> Result<bool, ChainReadError>;

    /// EntryPoint nonce for `(address, key = 0)`.
    async fn nonce(&self, address: Address) -> Result<U256, ChainReadError>;

    /// `None` when the node has no fee data.
    async fn fee_suggestion(&self) -> Result<Option<FeeFields>, ChainReadError>;

    async fn user_op_hash(&self, op: &UserOperation) -> Result<H256, ChainReadError>;

    async fn balance(&self, address: Address) -> Result<U256, ChainReadError>;

    async fn token_balance(&self, token: Address, owner: Address) -> Result<U256, ChainReadError>;
}

/// [`WalletChain`] over an ethers middleware, talking to the wallet factory
/// and the EntryPoint.
pub struct ChainReader<M> {
    client: Arc<M>,
    factory: WalletFactory<M>,
    entry_point: EntryPoint<M>,
    salt: U256,
}

impl<M: Middleware + 'static> ChainReader<M> {
    pub fn new(client: Arc<M>, factory: Address, entry_point: Address, salt: U256) -> Self {
        Self {
            factory: WalletFactory::new(factory, client.clone()),
            entry_point: EntryPoint::new(entry_point, client.clone()),
            client,
            salt,
        }
    }

    pub fn client(&self) -> Arc<M> {
        self.client.clone()
    }
}

#[async_trait]
impl<M: Middleware + 'static> WalletChain for ChainReader<M> {
    async fn wallet_address(&self, key: &PasskeyPublicKey) -> Result<Address, ChainReadError> {
        self.factory
            .get_address(key.as_words(), self.salt)
            .call()
            .await
            .map_err(|e| ChainReadError::new("factory.getAddress", e))
    }

    async fn is_deployed(&self, address: Address) -> Result<bool, ChainReadError> {
        let code = self
            .client
            .get_code(address, None)
            .await
            .map_err(|e| ChainReadError::new("eth_getCode", e))?;
        Ok(!code.as_ref().is_empty())
    }

    async fn nonce(&self, address: Address) -> Result<U256, ChainReadError> {
        self.entry_point
            .get_nonce(address, U256::zero())
            .call()
            .await
            .map_err(|e| ChainReadError::new("entryPoint.getNonce", e))
    }

    async fn fee_suggestion(&self) -> Result<Option<FeeFields>, ChainReadError> {
        // Fall back to the legacy gas price for nodes without EIP-1559 fee history.
        let (max_fee, max_priority) = match self.client.estimate_eip1559_fees(None).await {
            Ok(fees) => fees,
            Err(err) => {
                tracing::debug!(error = %err, "eip-1559 fee estimate unavailable; using gas price");
                let gas_price = self
                    .client
                    .get_gas_price()
                    .await
                    .map_err(|e| ChainReadError::new("eth_gasPrice", e))?;
                (gas_price, gas_price)
            }
        };

        if max_fee.is_zero() {
            return Ok(None);
        }
        Ok(Some(FeeFields {
            max_fee_per_gas: max_fee,
            max_priority_fee_per_gas: max_priority,
        }))
    }

    async fn user_op_hash(&self, op: &UserOperation) -> Result<H256, ChainReadError> {
        let hash = self
            .entry_point
            .get_user_op_hash(op.into())
            .call()
            .await
            .map_err(|e| ChainReadError::new("entryPoint.getUserOpHash", e))?;
        Ok(H256(hash))
    }

    async fn balance(&self, address: Address) -> Result<U256, ChainReadError> {
        self.client
            .get_balance(address, None)
            .await
            .map_err(|e| ChainReadError::new("eth_getBalance", e))
    }

    async fn token_balance(&self, token: Address, owner: Address) -> Result<U256, ChainReadError> {
        BonusToken::new(token, self.client.clone())
            .balance_of(owner)
            .call()
            .await
            .map_err(|e| ChainReadError::new("token.balanceOf", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::abi::AbiEncode;
    use crate::bundler::BundlerClient;
    use crate::gas::{fee_floor, GasEstimator};
    use crate::testing::ScriptedTransport;
    use ethers::providers::{MockProvider, Provider};
    use ethers::types::Bytes;
    use serde_json::Value;

    fn reader() -> (ChainReader<Provider<MockProvider>>, MockProvider) {
        let (provider, mock) = Provider::mocked();
        let reader = ChainReader::new(
            Arc::new(provider),
            Address::repeat_byte(0xfa),
            Address::repeat_byte(0xee),
            U256::zero(),
        );
        (reader, mock)
    }

    fn key() -> PasskeyPublicKey {
        PasskeyPublicKey {
            x: H256::repeat_byte(1),
            y: H256::repeat_byte(2),
        }
    }

    #[tokio::test]
    async fn wallet_address_is_deterministic() {
        let (reader, mock) = reader();
        let wallet = Address::repeat_byte(0x77);
        let encoded = Bytes::from(wallet.encode());
        mock.push::<Bytes, _>(encoded.clone()).unwrap();
        mock.push::<Bytes, _>(encoded).unwrap();

        let a = reader.wallet_address(&key()).await.unwrap();
        let b = reader.wallet_address(&key()).await.unwrap();
        assert_eq!(a, wallet);
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn empty_code_means_not_deployed() {
        let (reader, mock) = reader();
        mock.push::<Bytes, _>(Bytes::default()).unwrap();
        assert!(!reader.is_deployed(Address::repeat_byte(3)).await.unwrap());

        mock.push::<Bytes, _>(Bytes::from(vec![0x60, 0x80])).unwrap();
        assert!(reader.is_deployed(Address::repeat_byte(3)).await.unwrap());
    }

    #[tokio::test]
    async fn rpc_failure_is_a_chain_read_error() {
        // No scripted response: the mock transport errors.
        let (reader, _mock) = reader();
        let err = reader.nonce(Address::repeat_byte(3)).await.unwrap_err();
        assert_eq!(err.call, "entryPoint.getNonce");
    }

    /// Mock answers pop last-in first-out: queue the gas price, then the
    /// missing latest block that makes the EIP-1559 estimate fail.
    fn without_fee_history(mock: &MockProvider, gas_price: U256) {
        mock.push::<U256, _>(gas_price).unwrap();
        mock.push::<Value, _>(Value::Null).unwrap();
    }

    #[tokio::test]
    async fn fee_suggestion_falls_back_to_gas_price() {
        let (reader, mock) = reader();
        without_fee_history(&mock, U256::from(7_000_000_000u64));

        let fees = reader.fee_suggestion().await.unwrap().unwrap();
        assert_eq!(fees.max_fee_per_gas, U256::from(7_000_000_000u64));
        assert_eq!(fees.max_priority_fee_per_gas, U256::from(7_000_000_000u64));
    }

    #[tokio::test]
    async fn zero_fee_suggestion_applies_the_floor() {
        let (reader, mock) = reader();
        without_fee_history(&mock, U256::zero());

        let suggestion = reader.fee_suggestion().await.unwrap();
        assert!(suggestion.is_none());

        let estimator = GasEstimator::new(
            BundlerClient::new(Arc::new(ScriptedTransport::new())),
            None,
            Address::repeat_byte(0xee),
        );
        let fees = estimator.fees(suggestion);
        assert_eq!(fees, fee_floor());
        assert_eq!(fees.max_fee_per_gas, U256::from(20_000_000_000u64));
        assert_eq!(fees.max_priority_fee_per_gas, U256::from(1_000_000_000u64));
    }

    #[tokio::test]
    async fn fee_suggestion_fails_when_gas_price_fails_too() {
        let (reader, mock) = reader();
        mock.push::<Value, _>(Value::Null).unwrap();
        let err = reader.fee_suggestion().await.unwrap_err();
        assert_eq!(err.call, "eth_gasPrice");
    }

    #[tokio::test]
    async fn user_op_hash_decodes_the_entry_point_answer() {
        let (reader, mock) = reader();
        let expected = H256::repeat_byte(0x5a);
        mock.push::<Bytes, _>(Bytes::from(expected.as_bytes().to_vec()))
            .unwrap();

        let hash = reader.user_op_hash(&UserOperation::default()).await.unwrap();
        assert_eq!(hash, expected);

        let err = reader.user_op_hash(&UserOperation::default()).await.unwrap_err();
        assert_eq!(err.call, "entryPoint.getUserOpHash");
    }
}
