use anyhow::{anyhow, Context, Result};
use ethers::types::{Address, U256};
use passkey_aa::PasskeyCredential;
use serde::Deserialize;
use std::{env, fs, path::Path};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRaw {
    pub chain_id: u64,
    pub rpc: String,
    #[serde(default)]
    pub rpc_env_var: Option<String>,
    pub entry_point: String,
    pub factory: String,
    #[serde(default)]
    pub bonus_token: Option<String>,
    /// CREATE2 salt passed to the factory; decimal or 0x-hex.
    #[serde(default)]
    pub salt: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Deployment {
    pub chain_id: u64,
    pub rpc_url: String,
    pub entry_point: Address,
    pub factory: Address,
    pub bonus_token: Option<Address>,
    pub salt: U256,
}

pub fn load_deployment(path: &Path, rpc_override: Option<String>) -> Result<Deployment> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read deployment json at {}", path.display()))?;
    let raw: DeploymentRaw = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse deployment json at {}", path.display()))?;
    resolve_deployment(raw, rpc_override)
}

fn resolve_deployment(raw: DeploymentRaw, rpc_override: Option<String>) -> Result<Deployment> {
    let rpc_url = if let Some(rpc) = rpc_override {
        rpc
    } else if let Some(env_var) = raw.rpc_env_var.clone() {
        env::var(&env_var).unwrap_or(raw.rpc.clone())
    } else {
        raw.rpc.clone()
    };

    let entry_point = parse_addr(&raw.entry_point).context("invalid entryPoint address")?;
    let factory = parse_addr(&raw.factory).context("invalid factory address")?;
    let bonus_token = raw
        .bonus_token
        .as_deref()
        .map(parse_addr)
        .transpose()
        .context("invalid bonusToken address")?;
    let salt = match raw.salt.as_deref() {
        Some(s) => parse_uint(s).context("invalid salt")?,
        None => U256::zero(),
    };

    Ok(Deployment {
        chain_id: raw.chain_id,
        rpc_url,
        entry_point,
        factory,
        bonus_token,
        salt,
    })
}

pub fn load_credential(path: &Path) -> Result<PasskeyCredential> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read credential json at {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse credential json at {}", path.display()))
}

pub fn save_credential(path: &Path, credential: &PasskeyCredential) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(credential)?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))
}

pub fn parse_addr(s: &str) -> Result<Address> {
    s.parse::<Address>().map_err(|e| anyhow!("{e}"))
}

/// Decimal or 0x-prefixed hex.
pub fn parse_uint(s: &str) -> Result<U256> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x") {
        U256::from_str_radix(hex, 16).map_err(|e| anyhow!("{e}"))
    } else {
        U256::from_dec_str(s).map_err(|e| anyhow!("{e}"))
    }
}
