mod config;

use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgGroup, Args, Parser, Subcommand};
use config::{load_credential, load_deployment, parse_addr, parse_uint, save_credential, Deployment};
use ethers::prelude::*;
use ethers::utils::parse_ether;
use passkey_aa::bundler::BundlerClient;
use passkey_aa::chain::{ChainReader, WalletChain};
use passkey_aa::challenge::to_base64url;
use passkey_aa::encoding;
use passkey_aa::gas::GasEstimator;
use passkey_aa::passkey::{CreateOptions, LocalPasskey, PasskeyBackend, RemotePasskey, UserVerification};
use passkey_aa::paymaster::PaymasterClient;
use passkey_aa::rpc::HttpTransport;
use passkey_aa::{
    PasskeyCredential, PasskeyPublicKey, PipelineConfig, SmartWalletOrchestrator, Transfer,
    UserOpOutcome, WalletContracts, WalletRef,
};
use rand::rngs::OsRng;
use rand::RngCore;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

// In --json mode stdout carries a single JSON object; everything human goes to stderr.
macro_rules! outln {
    ($machine_mode:expr, $($arg:tt)*) => {{
        if $machine_mode {
            eprintln!($($arg)*);
        } else {
            println!($($arg)*);
        }
    }};
}

#[derive(Parser, Debug)]
#[command(name = "passkey-aa", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a passkey (local software key, or through the device bridge).
    CreatePasskey(CreatePasskeyArgs),

    /// Print the counterfactual wallet address and its on-chain state.
    Account(AccountArgs),

    /// Deploy the wallet through a UserOperation (optionally claiming the welcome bonus).
    Deploy(DeployArgs),

    /// Send ETH or tokens from the wallet.
    Send(SendArgs),
}

#[derive(Args, Debug)]
struct PasskeyArgs {
    /// Credential JSON (`{ "publicKey": { "x", "y" }, "credentialId" }`).
    #[arg(long, env = "PASSKEY_AA_CREDENTIAL")]
    credential: Option<PathBuf>,

    /// Local software passkey private key (hex).
    ///
    /// Recommended: source the env file written by `create-passkey`.
    #[arg(long, env = "PASSKEY_AA_PASSKEY_KEY", hide_env_values = true)]
    passkey_key: Option<String>,

    /// Device bridge URL; `/create` and `/get` are POSTed under it.
    #[arg(long, env = "PASSKEY_AA_PASSKEY_BRIDGE")]
    passkey_bridge: Option<String>,

    /// WebAuthn relying-party id.
    #[arg(long, env = "PASSKEY_AA_RP_ID", default_value = "localhost")]
    rp_id: String,
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Deployment artifact (entryPoint + factory + optional bonus token).
    #[arg(long, default_value = "deployments/base-sepolia.json")]
    deployment: PathBuf,

    /// Override the chain RPC URL (otherwise uses deployment JSON).
    #[arg(long, env = "PASSKEY_AA_RPC_URL")]
    rpc: Option<String>,

    #[command(flatten)]
    passkey: PasskeyArgs,

    /// Print a single JSON object to stdout; all logs go to stderr.
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Args, Debug)]
struct CreatePasskeyArgs {
    #[command(flatten)]
    passkey: PasskeyArgs,

    /// User name shown by the authenticator.
    #[arg(long, default_value = "passkey-aa")]
    user_name: String,

    /// Where to write the credential JSON (defaults under .secrets/).
    #[arg(long)]
    out: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Args, Debug)]
struct AccountArgs {
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args, Debug)]
struct TxArgs {
    /// Bundler RPC URL (must support ERC-4337 JSON-RPC methods).
    #[arg(long, env = "PASSKEY_AA_BUNDLER_URL")]
    bundler: String,

    /// Paymaster RPC URL (`pm_sponsorUserOperation`). Self-funded when unset.
    #[arg(long, env = "PASSKEY_AA_PAYMASTER_URL")]
    paymaster_url: Option<String>,

    /// Sponsorship policy id sent as paymaster context.
    #[arg(long, env = "PASSKEY_AA_SPONSORSHIP_POLICY_ID")]
    sponsorship_policy_id: Option<String>,

    /// Fee multiplier in basis points (e.g. 15000 = 1.5x).
    ///
    /// Applied to maxFeePerGas and maxPriorityFeePerGas.
    #[arg(long, default_value_t = 10000, env = "PASSKEY_AA_GAS_MULTIPLIER_BPS")]
    gas_multiplier_bps: u64,

    /// Signature expiry (unix seconds); 0 never expires.
    #[arg(long, default_value_t = 0)]
    valid_until: u64,

    /// Confirmation polling interval.
    #[arg(long, default_value_t = 3000)]
    confirm_interval_ms: u64,

    /// Confirmation polls before reporting "unconfirmed".
    #[arg(long, default_value_t = 20)]
    confirm_attempts: u32,
}

#[derive(Args, Debug)]
struct DeployArgs {
    #[command(flatten)]
    common: CommonArgs,

    #[command(flatten)]
    tx: TxArgs,

    /// Also claim the welcome bonus from the deployment's bonus token.
    #[arg(long, default_value_t = false)]
    claim_bonus: bool,
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("asset").required(true).args(["eth", "token"])))]
struct SendArgs {
    #[command(flatten)]
    common: CommonArgs,

    #[command(flatten)]
    tx: TxArgs,

    /// Recipient.
    #[arg(long)]
    to: String,

    /// Amount of ETH (decimal string, e.g. 0.0001).
    #[arg(long)]
    eth: Option<String>,

    /// ERC-20 token to transfer.
    #[arg(long, requires = "amount")]
    token: Option<String>,

    /// Token amount in raw base units.
    #[arg(long)]
    amount: Option<String>,

    /// Wallet address, when it differs from the one derived from the passkey.
    #[arg(long)]
    wallet: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        // Always write logs to stderr so stdout can be used for script-friendly outputs.
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Command::CreatePasskey(args) => cmd_create_passkey(args).await,
        Command::Account(args) => cmd_account(args).await,
        Command::Deploy(args) => cmd_deploy(args).await,
        Command::Send(args) => cmd_send(args).await,
    }
}

async fn cmd_create_passkey(args: CreatePasskeyArgs) -> Result<()> {
    let machine_mode = args.json;
    let mut challenge = [0u8; 32];
    OsRng.fill_bytes(&mut challenge);

    let options = CreateOptions {
        rp_id: args.passkey.rp_id.clone(),
        rp_name: "passkey-aa".to_string(),
        user_name: args.user_name.clone(),
        challenge: to_base64url(&challenge),
        user_verification: UserVerification::Required,
        timeout_ms: Some(120_000),
    };

    let secrets_dir = choose_secrets_dir()?;
    let (credential, env_path) = if let Some(url) = args.passkey.passkey_bridge.clone() {
        let credential = RemotePasskey::new(url)
            .create(options)
            .await
            .context("passkey creation failed")?;
        (credential, None)
    } else {
        let local = LocalPasskey::generate().context("failed to generate passkey")?;
        let credential = local.create(options).await?;
        let path = secrets_dir.join(format!("passkey_{}.env", credential.credential_id));
        write_passkey_env_file(&path, &credential, &local.secret_hex())?;
        (credential, Some(path))
    };

    let cred_path = args
        .out
        .unwrap_or_else(|| secrets_dir.join(format!("credential_{}.json", credential.credential_id)));
    save_credential(&cred_path, &credential)?;

    if machine_mode {
        let out = serde_json::json!({
            "credential": credential,
            "credentialPath": cred_path.display().to_string(),
            "envPath": env_path.as_ref().map(|p| p.display().to_string()),
        });
        println!("{}", out);
    }

    if let Some(p) = env_path.as_ref() {
        outln!(machine_mode, "generated local passkey; key saved to {}", p.display());
    }
    outln!(machine_mode, "credentialId:   {}", credential.credential_id);
    outln!(machine_mode, "publicKey.x:    {:?}", credential.public_key.x);
    outln!(machine_mode, "publicKey.y:    {:?}", credential.public_key.y);
    outln!(machine_mode, "credential:     {}", cred_path.display());

    Ok(())
}

async fn cmd_account(args: AccountArgs) -> Result<()> {
    let machine_mode = args.common.json;
    let dep = load_deployment(&args.common.deployment, args.common.rpc.clone())?;
    let credential = resolve_credential(&args.common.passkey)?;
    let chain = connect(&dep).await?;

    let address = chain
        .wallet_address(&credential.public_key)
        .await
        .context("failed to derive wallet address")?;
    let deployed = chain.is_deployed(address).await?;
    let balance = chain.balance(address).await?;
    let bonus = match dep.bonus_token {
        Some(token) => Some(chain.token_balance(token, address).await?),
        None => None,
    };

    if machine_mode {
        let out = serde_json::json!({
            "wallet": encoding::fmt_address(address),
            "deployed": deployed,
            "balance": encoding::fmt_u256(balance),
            "bonusTokenBalance": bonus.map(encoding::fmt_u256),
            "credentialId": credential.credential_id,
        });
        println!("{}", out);
    }

    outln!(machine_mode, "chainId:        {}", dep.chain_id);
    outln!(machine_mode, "entryPoint:     {:?}", dep.entry_point);
    outln!(machine_mode, "factory:        {:?}", dep.factory);
    outln!(machine_mode, "wallet:         {:?}", address);
    outln!(machine_mode, "isDeployed:     {}", deployed);
    outln!(machine_mode, "balance (wei):  {}", balance);
    if let Some(b) = bonus {
        outln!(machine_mode, "bonus balance:  {}", b);
    }

    Ok(())
}

async fn cmd_deploy(args: DeployArgs) -> Result<()> {
    let machine_mode = args.common.json;
    let dep = load_deployment(&args.common.deployment, args.common.rpc.clone())?;
    let credential = resolve_credential(&args.common.passkey)?;
    let orchestrator = compose(&dep, &args.common.passkey, &args.tx, &credential).await?;

    let outcome = if args.claim_bonus {
        orchestrator
            .deploy_and_claim_bonus(credential.public_key)
            .await
            .context("deploy + claim bonus failed")?
    } else {
        orchestrator
            .deploy_only(credential.public_key)
            .await
            .context("deploy failed")?
    };

    report(machine_mode, &outcome)
}

async fn cmd_send(args: SendArgs) -> Result<()> {
    let machine_mode = args.common.json;
    let dep = load_deployment(&args.common.deployment, args.common.rpc.clone())?;
    let credential = resolve_credential(&args.common.passkey)?;

    let to = parse_addr(&args.to).context("invalid --to address")?;
    let transfer = match (&args.eth, &args.token, &args.amount) {
        (Some(eth), None, _) => Transfer::Eth {
            to,
            value: parse_ether(eth).context("invalid --eth amount")?,
        },
        (None, Some(token), Some(amount)) => Transfer::Token {
            token: parse_addr(token).context("invalid --token address")?,
            to,
            amount: parse_uint(amount).context("invalid --amount")?,
        },
        _ => bail!("pass either --eth <amount> or --token <address> --amount <units>"),
    };
    let wallet = match &args.wallet {
        Some(w) => WalletRef::Known {
            address: parse_addr(w).context("invalid --wallet address")?,
            public_key: Some(credential.public_key),
        },
        None => WalletRef::Passkey(credential.public_key),
    };

    let orchestrator = compose(&dep, &args.common.passkey, &args.tx, &credential).await?;
    let outcome = orchestrator
        .send_value(wallet, transfer)
        .await
        .context("send failed")?;

    report(machine_mode, &outcome)
}

async fn connect(dep: &Deployment) -> Result<Arc<ChainReader<Provider<Http>>>> {
    let provider =
        Provider::<Http>::try_from(dep.rpc_url.as_str())?.interval(Duration::from_millis(350));

    let chain_id = provider.get_chainid().await?.as_u64();
    if chain_id != dep.chain_id {
        return Err(anyhow!(
            "chainId mismatch: deployment has {}, RPC returned {}",
            dep.chain_id,
            chain_id
        ));
    }

    Ok(Arc::new(ChainReader::new(
        Arc::new(provider),
        dep.factory,
        dep.entry_point,
        dep.salt,
    )))
}

async fn compose(
    dep: &Deployment,
    passkey: &PasskeyArgs,
    tx: &TxArgs,
    credential: &PasskeyCredential,
) -> Result<SmartWalletOrchestrator> {
    let chain = connect(dep).await?;

    let bundler = BundlerClient::new(Arc::new(HttpTransport::new(tx.bundler.clone())));
    let paymaster = tx.paymaster_url.clone().map(|url| {
        let pm = PaymasterClient::new(Arc::new(HttpTransport::new(url)));
        match tx.sponsorship_policy_id.clone() {
            Some(id) => pm.with_context(serde_json::json!({ "sponsorshipPolicyId": id })),
            None => pm,
        }
    });
    if paymaster.is_none() {
        tracing::info!("no paymaster configured; the wallet pays its own gas");
    }

    let backend = passkey_backend(passkey)?;
    let config = PipelineConfig {
        rp_id: passkey.rp_id.clone(),
        valid_until: tx.valid_until,
        fee_multiplier_bps: tx.gas_multiplier_bps,
        confirm_interval: Duration::from_millis(tx.confirm_interval_ms),
        confirm_attempts: tx.confirm_attempts,
        allow_credentials: vec![credential.credential_id.clone()],
        ..Default::default()
    };

    Ok(SmartWalletOrchestrator::new(
        chain,
        GasEstimator::new(bundler, paymaster, dep.entry_point),
        WalletContracts {
            factory: dep.factory,
            entry_point: dep.entry_point,
            salt: dep.salt,
            bonus_token: dep.bonus_token,
        },
        backend,
        config,
    ))
}

/// Credential file if given, else the local key's own credential.
fn resolve_credential(args: &PasskeyArgs) -> Result<PasskeyCredential> {
    if let Some(path) = args.credential.as_ref() {
        return load_credential(path);
    }
    if let Some(key) = args.passkey_key.as_deref() {
        return Ok(LocalPasskey::from_hex(key)
            .context("invalid PASSKEY_AA_PASSKEY_KEY")?
            .credential());
    }
    Err(anyhow!(
        "missing passkey: pass --credential (or PASSKEY_AA_CREDENTIAL), or set PASSKEY_AA_PASSKEY_KEY"
    ))
}

fn passkey_backend(args: &PasskeyArgs) -> Result<Arc<dyn PasskeyBackend>> {
    if let Some(url) = args.passkey_bridge.clone() {
        return Ok(Arc::new(RemotePasskey::new(url)));
    }
    if let Some(key) = args.passkey_key.as_deref() {
        let local = LocalPasskey::from_hex(key).context("invalid PASSKEY_AA_PASSKEY_KEY")?;
        return Ok(Arc::new(local));
    }
    Err(anyhow!(
        "no authenticator: set --passkey-bridge (or PASSKEY_AA_PASSKEY_BRIDGE), or PASSKEY_AA_PASSKEY_KEY"
    ))
}

fn report(machine_mode: bool, outcome: &UserOpOutcome) -> Result<()> {
    if machine_mode {
        let out = serde_json::json!({
            "userOpHash": encoding::fmt_h256(outcome.user_op_hash),
            "confirmed": outcome.confirmed,
            "userOperation": encoding::user_op_to_json(&outcome.op),
            "wallet": serde_json::to_value(&outcome.state)?,
        });
        println!("{}", out);
        return Ok(());
    }

    println!(
        "\nUserOperation (submitted):\n{}",
        serde_json::to_string_pretty(&encoding::user_op_to_json(&outcome.op))?
    );
    println!("\nuserOpHash:     {}", encoding::fmt_h256(outcome.user_op_hash));
    println!("wallet:         {:?}", outcome.state.address);
    println!("isDeployed:     {}", outcome.state.deployed);
    println!("balance (wei):  {}", outcome.state.balance);
    if let Some(b) = outcome.state.token_balance {
        println!("token balance:  {}", b);
    }
    if outcome.confirmed {
        println!("confirmed:      yes");
    } else {
        println!("confirmed:      not yet (the operation may still be included; re-run `account` to check)");
    }
    Ok(())
}

fn choose_secrets_dir() -> Result<PathBuf> {
    // Prefer the repo root `.secrets/` even if the CLI is run from a subdirectory.
    // Heuristic: walk up a few directories looking for a `deployments/` folder or `.git/`.
    let mut dir = std::env::current_dir().context("failed to read current dir")?;

    for _ in 0..6 {
        if dir.join(".git").exists() || dir.join("deployments").is_dir() {
            return Ok(dir.join(".secrets"));
        }
        if !dir.pop() {
            break;
        }
    }

    let cwd = std::env::current_dir().context("failed to read current dir")?;
    Ok(cwd.join(".secrets"))
}

fn write_passkey_env_file(path: &Path, credential: &PasskeyCredential, secret_hex: &str) -> Result<()> {
    let PasskeyPublicKey { x, y } = credential.public_key;
    let contents = format!(
        "# Generated by passkey-aa create-passkey\n# DO NOT COMMIT THIS FILE.\nexport PASSKEY_AA_PASSKEY_KEY={}\n# credentialId={} x={:?} y={:?}\n",
        secret_hex, credential.credential_id, x, y
    );

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("failed to create .secrets dir")?;
    }

    fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))?;

    // Best-effort restrictive permissions (unix).
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perm = fs::Permissions::from_mode(0o600);
        let _ = fs::set_permissions(path, perm);
    }

    Ok(())
}
