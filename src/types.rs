use ethers::abi::{encode, Token};
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};

/// ERC-4337 UserOperation (EntryPoint v0.6 layout).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserOperation {
    pub sender: Address,
    pub nonce: U256,
    pub init_code: Bytes,
    pub call_data: Bytes,
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub paymaster_and_data: Bytes,
    pub signature: Bytes,
}

impl UserOperation {
    /// ABI encoding of every field except the signature, with the dynamic
    /// byte fields replaced by their keccak256 (EntryPoint v0.6 `pack`).
    pub fn pack_for_hash(&self) -> Vec<u8> {
        encode(&[
            Token::Address(self.sender),
            Token::Uint(self.nonce),
            Token::FixedBytes(keccak256(self.init_code.as_ref()).to_vec()),
            Token::FixedBytes(keccak256(self.call_data.as_ref()).to_vec()),
            Token::Uint(self.call_gas_limit),
            Token::Uint(self.verification_gas_limit),
            Token::Uint(self.pre_verification_gas),
            Token::Uint(self.max_fee_per_gas),
            Token::Uint(self.max_priority_fee_per_gas),
            Token::FixedBytes(keccak256(self.paymaster_and_data.as_ref()).to_vec()),
        ])
    }

    /// Off-chain equivalent of `EntryPoint.getUserOpHash`.
    pub fn hash(&self, entry_point: Address, chain_id: u64) -> H256 {
        let inner = keccak256(self.pack_for_hash());
        H256(keccak256(encode(&[
            Token::FixedBytes(inner.to_vec()),
            Token::Address(entry_point),
            Token::Uint(U256::from(chain_id)),
        ])))
    }

    pub fn gas(&self) -> GasLimits {
        GasLimits {
            call_gas_limit: self.call_gas_limit,
            verification_gas_limit: self.verification_gas_limit,
            pre_verification_gas: self.pre_verification_gas,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GasLimits {
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
}

impl GasLimits {
    pub fn is_complete(&self) -> bool {
        !self.call_gas_limit.is_zero()
            && !self.verification_gas_limit.is_zero()
            && !self.pre_verification_gas.is_zero()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeeFields {
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

/// Paymaster answer to `pm_sponsorUserOperation`. Overwrites the operation's
/// gas fields and `paymasterAndData` as-is.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SponsorshipResult {
    pub paymaster_and_data: Bytes,
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
}

/// Uncompressed P-256 public key coordinates of a passkey.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PasskeyPublicKey {
    pub x: H256,
    pub y: H256,
}

impl PasskeyPublicKey {
    /// The `bytes32[2]` form the wallet factory takes.
    pub fn as_words(&self) -> [[u8; 32]; 2] {
        [self.x.0, self.y.0]
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasskeyCredential {
    pub public_key: PasskeyPublicKey,
    /// base64url credential id. Only needed to ask the authenticator to sign.
    pub credential_id: String,
}

/// Raw authenticator response; every binary field is base64url.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assertion {
    pub authenticator_data: String,
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String,
    pub signature: String,
    pub credential_id: String,
}

/// Assertion fields decoded back into raw bytes / text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedAssertion {
    pub authenticator_data: Vec<u8>,
    pub client_data_json: String,
    pub signature: Vec<u8>,
    pub credential_id: String,
}

/// What the wallet should execute once validated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WalletCall {
    /// Deploy the wallet, invoke nothing.
    DeployOnly,
    EthTransfer { to: Address, value: U256 },
    TokenTransfer {
        token: Address,
        to: Address,
        amount: U256,
    },
    ClaimBonus { token: Address },
}

/// Value leg of a `send_value` use-case.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transfer {
    Eth { to: Address, value: U256 },
    Token {
        token: Address,
        to: Address,
        amount: U256,
    },
}

impl From<&Transfer> for WalletCall {
    fn from(t: &Transfer) -> Self {
        match t {
            Transfer::Eth { to, value } => WalletCall::EthTransfer {
                to: *to,
                value: *value,
            },
            Transfer::Token { token, to, amount } => WalletCall::TokenTransfer {
                token: *token,
                to: *to,
                amount: *amount,
            },
        }
    }
}

/// How the caller identifies the wallet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WalletRef {
    /// Derive the address from the key.
    Passkey(PasskeyPublicKey),
    /// Address already known; the key is only needed if the wallet is not deployed yet.
    Known {
        address: Address,
        public_key: Option<PasskeyPublicKey>,
    },
}

impl WalletRef {
    pub fn public_key(&self) -> Option<PasskeyPublicKey> {
        match self {
            WalletRef::Passkey(k) => Some(*k),
            WalletRef::Known { public_key, .. } => *public_key,
        }
    }
}
