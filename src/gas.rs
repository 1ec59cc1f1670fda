use crate::bundler::BundlerClient;
use crate::error::EstimationFailure;
use crate::paymaster::PaymasterClient;
use crate::types::{FeeFields, GasLimits, SponsorshipResult, UserOperation};
use ethers::types::{Address, Bytes, U256};

/// Bundler estimates are scaled by `NUM / DEN` (150%) before use.
const ESTIMATE_MULTIPLIER_NUM: u64 = 3;
const ESTIMATE_MULTIPLIER_DEN: u64 = 2;

const FALLBACK_CALL_GAS: u64 = 300_000;
const FALLBACK_VERIFICATION_GAS_DEPLOYED: u64 = 800_000;
const FALLBACK_VERIFICATION_GAS_UNDEPLOYED: u64 = 2_000_000;
const FALLBACK_PRE_VERIFICATION_GAS: u64 = 100_000;
const FALLBACK_PRE_VERIFICATION_GAS_UNDEPLOYED: u64 = 150_000;

/// Where the gas fields came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GasSource {
    Sponsored,
    BundlerEstimate,
    Fallback,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GasQuote {
    pub limits: GasLimits,
    /// Empty unless sponsored.
    pub paymaster_and_data: Bytes,
    pub source: GasSource,
}

impl From<SponsorshipResult> for GasQuote {
    fn from(s: SponsorshipResult) -> Self {
        Self {
            limits: GasLimits {
                call_gas_limit: s.call_gas_limit,
                verification_gas_limit: s.verification_gas_limit,
                pre_verification_gas: s.pre_verification_gas,
            },
            paymaster_and_data: s.paymaster_and_data,
            source: GasSource::Sponsored,
        }
    }
}

pub struct GasEstimator {
    bundler: BundlerClient,
    paymaster: Option<PaymasterClient>,
    entry_point: Address,
    /// Applied to the chain's fee suggestion, in basis points.
    fee_multiplier_bps: u64,
}

impl GasEstimator {
    pub fn new(
        bundler: BundlerClient,
        paymaster: Option<PaymasterClient>,
        entry_point: Address,
    ) -> Self {
        Self {
            bundler,
            paymaster,
            entry_point,
            fee_multiplier_bps: 10_000,
        }
    }

    pub fn with_fee_multiplier_bps(mut self, bps: u64) -> Self {
        self.fee_multiplier_bps = bps.max(1);
        self
    }

    pub fn bundler(&self) -> &BundlerClient {
        &self.bundler
    }

    pub fn entry_point(&self) -> Address {
        self.entry_point
    }

    /// Sponsor, else estimate, else constants. Never fails.
    ///
    /// `draft` must carry a placeholder signature of realistic shape; its gas
    /// fields are ignored.
    pub async fn estimate(&self, draft: &UserOperation, deployed: bool) -> GasQuote {
        let sponsor_err = match &self.paymaster {
            Some(pm) => match pm.sponsor_user_operation(draft, self.entry_point).await {
                Ok(sponsored) if sponsored_limits_complete(&sponsored) => {
                    tracing::info!(
                        call_gas_limit = %sponsored.call_gas_limit,
                        verification_gas_limit = %sponsored.verification_gas_limit,
                        pre_verification_gas = %sponsored.pre_verification_gas,
                        "gas sponsored by paymaster"
                    );
                    return sponsored.into();
                }
                Ok(_) => "paymaster returned zero gas limits".to_string(),
                Err(e) => e.to_string(),
            },
            None => "no paymaster configured".to_string(),
        };

        let bundler_err = match self
            .bundler
            .estimate_user_operation_gas(draft, self.entry_point)
            .await
        {
            Ok(est) if !est.is_complete() => "bundler returned zero gas limits".to_string(),
            Ok(est) => match scale_estimate(est) {
                Some(limits) => {
                    tracing::info!(
                        sponsor = %sponsor_err,
                        call_gas_limit = %limits.call_gas_limit,
                        verification_gas_limit = %limits.verification_gas_limit,
                        pre_verification_gas = %limits.pre_verification_gas,
                        "using bundler gas estimate (x1.5), self-funded"
                    );
                    return GasQuote {
                        limits,
                        paymaster_and_data: Bytes::default(),
                        source: GasSource::BundlerEstimate,
                    };
                }
                None => "bundler gas estimate out of range".to_string(),
            },
            Err(e) => e.to_string(),
        };

        let failure = EstimationFailure {
            sponsor: sponsor_err,
            bundler: bundler_err,
        };
        tracing::warn!(error = %failure, deployed, "falling back to fixed gas limits");

        GasQuote {
            limits: fallback_limits(deployed),
            paymaster_and_data: Bytes::default(),
            source: GasSource::Fallback,
        }
    }

    /// Fee fields from the chain suggestion, or the floor when there is none.
    pub fn fees(&self, suggestion: Option<FeeFields>) -> FeeFields {
        let Some(s) = suggestion else {
            let floor = fee_floor();
            tracing::info!(
                max_fee_per_gas = %floor.max_fee_per_gas,
                max_priority_fee_per_gas = %floor.max_priority_fee_per_gas,
                "no fee suggestion from chain; using floor"
            );
            return floor;
        };

        let max_priority_fee_per_gas = self.scale_fee(s.max_priority_fee_per_gas);
        let max_fee_per_gas = self.scale_fee(s.max_fee_per_gas).max(max_priority_fee_per_gas);

        FeeFields {
            max_fee_per_gas,
            max_priority_fee_per_gas,
        }
    }

    /// Saturates instead of overflowing on absurd suggestions.
    fn scale_fee(&self, fee: U256) -> U256 {
        let bps = U256::from(self.fee_multiplier_bps);
        match fee.checked_mul(bps) {
            Some(v) => v / U256::from(10_000u64),
            None => (fee / U256::from(10_000u64)).saturating_mul(bps),
        }
    }
}

fn sponsored_limits_complete(s: &SponsorshipResult) -> bool {
    !s.call_gas_limit.is_zero()
        && !s.verification_gas_limit.is_zero()
        && !s.pre_verification_gas.is_zero()
}

/// `None` when scaling a field would overflow.
pub fn scale_estimate(est: GasLimits) -> Option<GasLimits> {
    let scale = |v: U256| {
        v.checked_mul(U256::from(ESTIMATE_MULTIPLIER_NUM))
            .map(|v| v / U256::from(ESTIMATE_MULTIPLIER_DEN))
    };
    Some(GasLimits {
        call_gas_limit: scale(est.call_gas_limit)?,
        verification_gas_limit: scale(est.verification_gas_limit)?,
        pre_verification_gas: scale(est.pre_verification_gas)?,
    })
}

/// Conservative limits; deployment adds account creation to verification.
pub fn fallback_limits(deployed: bool) -> GasLimits {
    if deployed {
        GasLimits {
            call_gas_limit: U256::from(FALLBACK_CALL_GAS),
            verification_gas_limit: U256::from(FALLBACK_VERIFICATION_GAS_DEPLOYED),
            pre_verification_gas: U256::from(FALLBACK_PRE_VERIFICATION_GAS),
        }
    } else {
        GasLimits {
            call_gas_limit: U256::from(FALLBACK_CALL_GAS),
            verification_gas_limit: U256::from(FALLBACK_VERIFICATION_GAS_UNDEPLOYED),
            pre_verification_gas: U256::from(FALLBACK_PRE_VERIFICATION_GAS_UNDEPLOYED),
        }
    }
}

/// 20 gwei max fee, 1 gwei priority fee.
pub fn fee_floor() -> FeeFields {
    FeeFields {
        max_fee_per_gas: gwei(20),
        max_priority_fee_per_gas: gwei(1),
    }
}

fn gwei(n: u64) -> U256 {
    U256::from(n) * U256::exp10(9)
}
