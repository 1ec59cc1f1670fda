//! Use-cases: deploy, deploy + claim bonus, send value.
//!
//! Each runs build → hash → challenge → assertion → format → sign → submit →
//! confirm as one sequence under a per-sender lock. A failure anywhere aborts
//! the sequence; running it again starts over from address resolution.

use crate::builder::{AddressResolved, BuildContext, SignedUserOperation, UserOperationBuilder};
use crate::chain::WalletChain;
use crate::challenge::{build_challenge, to_base64url, DEFAULT_VERSION, NO_EXPIRY};
use crate::error::{ChainReadError, PipelineError, Stage, StageExt, SubmissionError, WalletError};
use crate::gas::GasEstimator;
use crate::passkey::{GetOptions, PasskeyBackend, UserVerification};
use crate::signature::format_signature;
use crate::types::{PasskeyPublicKey, Transfer, UserOperation, WalletCall, WalletRef};
use ethers::types::{Address, H256, U256};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::Instrument;

/// Knobs for signing and confirmation.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Relying-party id the passkey was registered under.
    pub rp_id: String,
    pub signature_version: u8,
    /// Unix seconds; 0 means no expiry.
    pub valid_until: u64,
    /// Basis points applied to the chain fee suggestion.
    pub fee_multiplier_bps: u64,
    pub confirm_interval: Duration,
    pub confirm_attempts: u32,
    pub user_verification: UserVerification,
    /// base64url credential ids offered to the authenticator.
    pub allow_credentials: Vec<String>,
    pub passkey_timeout_ms: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            rp_id: "localhost".to_string(),
            signature_version: DEFAULT_VERSION,
            valid_until: NO_EXPIRY,
            fee_multiplier_bps: 10_000,
            confirm_interval: Duration::from_secs(3),
            confirm_attempts: 20,
            user_verification: UserVerification::Required,
            allow_credentials: Vec::new(),
            passkey_timeout_ms: Some(60_000),
        }
    }
}

/// Contract addresses the wallet flows are bound to.
#[derive(Clone, Copy, Debug)]
pub struct WalletContracts {
    pub factory: Address,
    pub entry_point: Address,
    pub salt: U256,
    pub bonus_token: Option<Address>,
}

/// Wallet state observed on chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletState {
    pub address: Address,
    pub deployed: bool,
    pub nonce: U256,
    pub balance: U256,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_balance: Option<U256>,
}

#[derive(Clone, Debug)]
pub struct UserOpOutcome {
    /// As reported by the bundler.
    pub user_op_hash: H256,
    pub op: UserOperation,
    /// False when polling ran out before the expected effect showed up.
    pub confirmed: bool,
    pub state: WalletState,
}

enum Goal {
    Deploy,
    ClaimBonus { token: Address },
    Send(Transfer),
}

impl Goal {
    fn flow(&self) -> &'static str {
        match self {
            Goal::Deploy => "deploy",
            Goal::ClaimBonus { .. } => "claim_bonus",
            Goal::Send(Transfer::Eth { .. }) => "send_eth",
            Goal::Send(Transfer::Token { .. }) => "send_token",
        }
    }

    fn call(&self) -> WalletCall {
        match self {
            Goal::Deploy => WalletCall::DeployOnly,
            Goal::ClaimBonus { token } => WalletCall::ClaimBonus { token: *token },
            Goal::Send(t) => t.into(),
        }
    }

    fn watched_token(&self) -> Option<Address> {
        match self {
            Goal::Deploy | Goal::Send(Transfer::Eth { .. }) => None,
            Goal::ClaimBonus { token } | Goal::Send(Transfer::Token { token, .. }) => Some(*token),
        }
    }

    /// True once `now` shows the effect of the submitted operation.
    fn reached(&self, before: &WalletState, submitted_nonce: U256, now: &WalletState) -> bool {
        match self {
            Goal::Deploy => now.deployed,
            Goal::ClaimBonus { .. } => {
                now.deployed && increased(before.token_balance, now.token_balance)
            }
            Goal::Send(Transfer::Eth { value, .. }) => {
                if value.is_zero() {
                    now.nonce > submitted_nonce
                } else {
                    now.balance.saturating_add(*value) <= before.balance
                }
            }
            Goal::Send(Transfer::Token { amount, .. }) => match (before.token_balance, now.token_balance) {
                (Some(b), Some(n)) if !amount.is_zero() => n.saturating_add(*amount) <= b,
                _ => now.nonce > submitted_nonce,
            },
        }
    }
}

fn increased(before: Option<U256>, now: Option<U256>) -> bool {
    match (before, now) {
        (Some(b), Some(n)) => n > b,
        (None, Some(n)) => !n.is_zero(),
        _ => false,
    }
}

pub struct SmartWalletOrchestrator {
    ctx: BuildContext,
    contracts: WalletContracts,
    passkey: Arc<dyn PasskeyBackend>,
    config: PipelineConfig,
    sender_locks: Mutex<HashMap<Address, Arc<Mutex<()>>>>,
}

impl SmartWalletOrchestrator {
    pub fn new(
        chain: Arc<dyn WalletChain>,
        gas: GasEstimator,
        contracts: WalletContracts,
        passkey: Arc<dyn PasskeyBackend>,
        config: PipelineConfig,
    ) -> Self {
        let ctx = BuildContext {
            chain,
            gas: gas.with_fee_multiplier_bps(config.fee_multiplier_bps),
            factory: contracts.factory,
            salt: contracts.salt,
            signature_version: config.signature_version,
            valid_until: config.valid_until,
        };
        Self {
            ctx,
            contracts,
            passkey,
            config,
            sender_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn contracts(&self) -> &WalletContracts {
        &self.contracts
    }

    pub async fn wallet_address(&self, key: &PasskeyPublicKey) -> Result<Address, ChainReadError> {
        self.ctx.chain.wallet_address(key).await
    }

    pub async fn wallet_state(
        &self,
        address: Address,
        token: Option<Address>,
    ) -> Result<WalletState, ChainReadError> {
        let chain = &self.ctx.chain;
        let deployed = chain.is_deployed(address).await?;
        let nonce = chain.nonce(address).await?;
        let balance = chain.balance(address).await?;
        let token_balance = match token {
            Some(token) => Some(chain.token_balance(token, address).await?),
            None => None,
        };
        Ok(WalletState {
            address,
            deployed,
            nonce,
            balance,
            token_balance,
        })
    }

    /// Deploys the wallet for `key` with an empty call.
    pub async fn deploy_only(&self, key: PasskeyPublicKey) -> Result<UserOpOutcome, PipelineError> {
        self.execute(WalletRef::Passkey(key), Goal::Deploy).await
    }

    /// Deploys if needed and claims the welcome bonus in the same operation.
    pub async fn deploy_and_claim_bonus(
        &self,
        key: PasskeyPublicKey,
    ) -> Result<UserOpOutcome, PipelineError> {
        let token = self
            .contracts
            .bonus_token
            .ok_or(WalletError::NoBonusToken)
            .at(Stage::SetCallData)?;
        self.execute(WalletRef::Passkey(key), Goal::ClaimBonus { token })
            .await
    }

    pub async fn send_value(
        &self,
        wallet: WalletRef,
        transfer: Transfer,
    ) -> Result<UserOpOutcome, PipelineError> {
        self.execute(wallet, Goal::Send(transfer)).await
    }

    async fn execute(&self, wallet: WalletRef, goal: Goal) -> Result<UserOpOutcome, PipelineError> {
        let request_id = format!("{:016x}", rand::random::<u64>());
        let span = tracing::info_span!("user_op", request_id = %request_id, flow = goal.flow());
        async {
            let result = self.run(&wallet, &goal).await;
            match &result {
                Ok(out) => tracing::info!(
                    user_op_hash = ?out.user_op_hash,
                    confirmed = out.confirmed,
                    "user operation finished"
                ),
                Err(e) if e.source.is_cancelled() => {
                    tracing::info!(stage = %e.stage, "cancelled by user; nothing submitted")
                }
                Err(e) => tracing::warn!(stage = %e.stage, error = %e.source, "user operation failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run(&self, wallet: &WalletRef, goal: &Goal) -> Result<UserOpOutcome, PipelineError> {
        let started = Instant::now();
        let builder = UserOperationBuilder::new(&self.ctx)
            .resolve_address(wallet)
            .await
            .at(Stage::ResolveAddress)?;
        let sender = builder.sender();
        stage_done(Stage::ResolveAddress, started);

        let lock = self.sender_lock(sender).await;
        let result = {
            let _guard = lock.lock().await;
            self.run_locked(builder, goal, started).await
        };
        self.release_sender_lock(sender, lock).await;
        result
    }

    async fn run_locked(
        &self,
        builder: UserOperationBuilder<'_, AddressResolved>,
        goal: &Goal,
        started: Instant,
    ) -> Result<UserOpOutcome, PipelineError> {
        let sender = builder.sender();
        let version = self.config.signature_version;
        let valid_until = self.config.valid_until;

        let before = self
            .wallet_state(sender, goal.watched_token())
            .await
            .at(Stage::CheckDeployment)?;
        if matches!(goal, Goal::Deploy) && before.deployed {
            return Err(PipelineError::new(
                Stage::CheckDeployment,
                WalletError::AlreadyDeployed(sender),
            ));
        }
        let builder = builder.check_deployment().await.at(Stage::CheckDeployment)?;
        stage_done(Stage::CheckDeployment, started);

        let builder = builder.call_data(&goal.call());
        stage_done(Stage::SetCallData, started);

        let builder = builder.estimate_gas().await;
        tracing::info!(
            stage = %Stage::EstimateGas,
            source = ?builder.gas_source(),
            elapsed_ms = elapsed_ms(started),
            "stage complete"
        );

        let unsigned = builder.set_fees().await.at(Stage::SetFees)?.finish();
        stage_done(Stage::SetFees, started);

        let hash = self
            .ctx
            .chain
            .user_op_hash(unsigned.op())
            .await
            .at(Stage::HashUserOp)?;
        let challenge = build_challenge(hash, version, valid_until).at(Stage::HashUserOp)?;
        stage_done(Stage::HashUserOp, started);

        let assertion = self
            .passkey
            .get(GetOptions {
                rp_id: self.config.rp_id.clone(),
                challenge: to_base64url(&challenge),
                allow_credentials: self.config.allow_credentials.clone(),
                user_verification: self.config.user_verification,
                timeout_ms: self.config.passkey_timeout_ms,
            })
            .await
            .at(Stage::Sign)?;
        stage_done(Stage::Sign, started);

        let signature =
            format_signature(&assertion, version, valid_until).at(Stage::FormatSignature)?;
        let signed = unsigned.sign(signature);
        stage_done(Stage::FormatSignature, started);

        let submitted_nonce = signed.op().nonce;
        let (user_op_hash, op) = self.submit(signed).await.at(Stage::Submit)?;
        if user_op_hash != hash {
            tracing::warn!(
                bundler = ?user_op_hash,
                entry_point = ?hash,
                "bundler returned a different userOpHash"
            );
        }
        stage_done(Stage::Submit, started);

        let (confirmed, state) = self.confirm(goal, &before, submitted_nonce).await;
        tracing::info!(
            stage = %Stage::Confirm,
            confirmed,
            elapsed_ms = elapsed_ms(started),
            "stage complete"
        );

        Ok(UserOpOutcome {
            user_op_hash,
            op,
            confirmed,
            state,
        })
    }

    async fn submit(
        &self,
        signed: SignedUserOperation,
    ) -> Result<(H256, UserOperation), SubmissionError> {
        let op = signed.into_inner();
        let hash = self
            .ctx
            .gas
            .bundler()
            .send_user_operation(&op, self.contracts.entry_point)
            .await?;
        Ok((hash, op))
    }

    /// Polls until `goal` is observed; after the last attempt one more read
    /// decides. Read failures are logged and never fail the use-case.
    async fn confirm(&self, goal: &Goal, before: &WalletState, submitted_nonce: U256) -> (bool, WalletState) {
        let token = goal.watched_token();
        let mut last = before.clone();

        for attempt in 1..=self.config.confirm_attempts {
            tokio::time::sleep(self.config.confirm_interval).await;
            match self.wallet_state(before.address, token).await {
                Ok(now) if goal.reached(before, submitted_nonce, &now) => return (true, now),
                Ok(now) => last = now,
                Err(e) => tracing::debug!(attempt, error = %e, "confirmation read failed"),
            }
        }

        match self.wallet_state(before.address, token).await {
            Ok(now) => (goal.reached(before, submitted_nonce, &now), now),
            Err(e) => {
                tracing::warn!(error = %e, "final confirmation read failed; reporting last known state");
                (false, last)
            }
        }
    }

    async fn sender_lock(&self, sender: Address) -> Arc<Mutex<()>> {
        self.sender_locks
            .lock()
            .await
            .entry(sender)
            .or_default()
            .clone()
    }

    /// Drops the map entry once no other flow holds or waits on it.
    async fn release_sender_lock(&self, sender: Address, lock: Arc<Mutex<()>>) {
        let mut locks = self.sender_locks.lock().await;
        drop(lock);
        if locks.get(&sender).map_or(false, |l| Arc::strong_count(l) == 1) {
            locks.remove(&sender);
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

fn stage_done(stage: Stage, started: Instant) {
    tracing::info!(stage = %stage, elapsed_ms = elapsed_ms(started), "stage complete");
}
