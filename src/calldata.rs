use crate::bindings::bonus_token::{ClaimWelcomeBonusCall, TransferCall};
use crate::bindings::smart_wallet::{Call, ExecuteBatchCall, ExecuteCall};
use crate::bindings::wallet_factory::CreateAccountCall;
use crate::types::{PasskeyPublicKey, WalletCall};
use ethers::abi::AbiEncode;
use ethers::types::{Address, Bytes, U256};

/// `callData` for the wallet's `execute` / `executeBatch` entry points.
pub fn encode_wallet_call(call: &WalletCall) -> Bytes {
    match call {
        WalletCall::DeployOnly => Bytes::default(),
        WalletCall::EthTransfer { to, value } => eth_transfer(*to, *value),
        WalletCall::TokenTransfer { token, to, amount } => token_transfer(*token, *to, *amount),
        WalletCall::ClaimBonus { token } => claim_bonus(*token),
    }
}

/// `execute(to, value, 0x)`.
pub fn eth_transfer(to: Address, value: U256) -> Bytes {
    ExecuteCall {
        dest: to,
        value,
        func: Bytes::default(),
    }
    .encode()
    .into()
}

/// `executeBatch([{token, 0, transfer(to, amount)}])`.
pub fn token_transfer(token: Address, to: Address, amount: U256) -> Bytes {
    let inner: Bytes = TransferCall { to, amount }.encode().into();
    single_batch(token, inner)
}

/// `executeBatch([{token, 0, claimWelcomeBonus()}])`.
pub fn claim_bonus(token: Address) -> Bytes {
    let inner: Bytes = ClaimWelcomeBonusCall.encode().into();
    single_batch(token, inner)
}

// Token calls never carry ETH.
fn single_batch(dest: Address, data: Bytes) -> Bytes {
    ExecuteBatchCall {
        calls: vec![Call {
            dest,
            value: U256::zero(),
            data,
        }],
    }
    .encode()
    .into()
}

/// `factory ‖ createAccount(key, salt)`.
pub fn init_code(factory: Address, public_key: &PasskeyPublicKey, salt: U256) -> Bytes {
    let create = CreateAccountCall {
        key: public_key.as_words(),
        salt,
    }
    .encode();

    let mut v = Vec::with_capacity(20 + create.len());
    v.extend_from_slice(factory.as_bytes());
    v.extend_from_slice(&create);
    Bytes::from(v)
}
