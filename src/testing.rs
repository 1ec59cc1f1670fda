//! In-memory chain and JSON-RPC fakes shared by unit tests.

use crate::chain::WalletChain;
use crate::error::{ChainReadError, RpcError};
use crate::rpc::JsonRpcTransport;
use crate::types::{FeeFields, PasskeyPublicKey, UserOperation};
use async_trait::async_trait;
use ethers::types::{Address, H256, U256};
use ethers::utils::keccak256;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

/// Answers JSON-RPC calls from per-method queues; the last queued answer for a
/// method is sticky. Unscripted methods fail.
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<HashMap<String, VecDeque<Result<Value, RpcError>>>>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport that fails every request.
    pub fn failing() -> Self {
        Self::default()
    }

    pub fn respond(&self, method: &str, response: Result<Value, RpcError>) {
        self.responses
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, method: &str) -> Vec<Value> {
        self.calls()
            .into_iter()
            .filter(|(m, _)| m == method)
            .map(|(_, p)| p)
            .collect()
    }
}

#[async_trait]
impl JsonRpcTransport for ScriptedTransport {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.calls
            .lock()
            .unwrap()
            .push((method.to_string(), params));

        let mut responses = self.responses.lock().unwrap();
        let next = match responses.get_mut(method) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        next.unwrap_or_else(|| {
            Err(RpcError::Transport {
                url: "scripted://".into(),
                message: format!("no response scripted for {method}"),
            })
        })
    }
}

#[derive(Default)]
struct FakeChainState {
    deployed: HashSet<Address>,
    nonces: HashMap<Address, U256>,
    balances: HashMap<Address, U256>,
    token_balances: HashMap<(Address, Address), U256>,
    fees: Option<FeeFields>,
    fail_reads: bool,
    reads: Vec<&'static str>,
}

/// Chain with CREATE2-like addresses (keccak of the key) and settable state.
pub struct FakeChain {
    pub entry_point: Address,
    pub chain_id: u64,
    state: Mutex<FakeChainState>,
}

impl FakeChain {
    pub fn new(entry_point: Address, chain_id: u64) -> Self {
        Self {
            entry_point,
            chain_id,
            state: Mutex::new(FakeChainState::default()),
        }
    }

    pub fn address_for(key: &PasskeyPublicKey) -> Address {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(key.x.as_bytes());
        buf.extend_from_slice(key.y.as_bytes());
        Address::from_slice(&keccak256(buf)[12..])
    }

    pub fn set_deployed(&self, address: Address, deployed: bool) {
        let mut s = self.state.lock().unwrap();
        if deployed {
            s.deployed.insert(address);
        } else {
            s.deployed.remove(&address);
        }
    }

    pub fn set_nonce(&self, address: Address, nonce: U256) {
        self.state.lock().unwrap().nonces.insert(address, nonce);
    }

    pub fn set_balance(&self, address: Address, balance: U256) {
        self.state.lock().unwrap().balances.insert(address, balance);
    }

    pub fn set_token_balance(&self, token: Address, owner: Address, balance: U256) {
        self.state
            .lock()
            .unwrap()
            .token_balances
            .insert((token, owner), balance);
    }

    pub fn set_fees(&self, fees: Option<FeeFields>) {
        self.state.lock().unwrap().fees = fees;
    }

    pub fn fail_reads(&self, fail: bool) {
        self.state.lock().unwrap().fail_reads = fail;
    }

    pub fn reads(&self) -> Vec<&'static str> {
        self.state.lock().unwrap().reads.clone()
    }

    fn read(&self, call: &'static str) -> Result<std::sync::MutexGuard<'_, FakeChainState>, ChainReadError> {
        let mut s = self.state.lock().unwrap();
        s.reads.push(call);
        if s.fail_reads {
            return Err(ChainReadError::new(call, "node unavailable"));
        }
        Ok(s)
    }
}

#[async_trait]
impl WalletChain for FakeChain {
    async fn wallet_address(&self, key: &PasskeyPublicKey) -> Result<Address, ChainReadError> {
        drop(self.read("factory.getAddress")?);
        Ok(Self::address_for(key))
    }

    async fn is_deployed(&self, address: Address) -> Result<bool, ChainReadError> {
        Ok(self.read("eth_getCode")?.deployed.contains(&address))
    }

    async fn nonce(&self, address: Address) -> Result<U256, ChainReadError> {
        Ok(self
            .read("entryPoint.getNonce")?
            .nonces
            .get(&address)
            .copied()
            .unwrap_or_default())
    }

    async fn fee_suggestion(&self) -> Result<Option<FeeFields>, ChainReadError> {
        Ok(self.read("fees")?.fees)
    }

    async fn user_op_hash(&self, op: &UserOperation) -> Result<H256, ChainReadError> {
        drop(self.read("entryPoint.getUserOpHash")?);
        Ok(op.hash(self.entry_point, self.chain_id))
    }

    async fn balance(&self, address: Address) -> Result<U256, ChainReadError> {
        Ok(self
            .read("eth_getBalance")?
            .balances
            .get(&address)
            .copied()
            .unwrap_or_default())
    }

    async fn token_balance(&self, token: Address, owner: Address) -> Result<U256, ChainReadError> {
        Ok(self
            .read("token.balanceOf")?
            .token_balances
            .get(&(token, owner))
            .copied()
            .unwrap_or_default())
    }
}
