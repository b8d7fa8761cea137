//! Payout configuration
//!
//! Runtime settings consumed by the pipeline. Loading and migrating
//! configuration files happens outside the crate; this module only defines
//! the shape (with serde defaults) and validates it.
//!
//! Rates (`fee_rate`, `donate_bonds`, `donate_fees`, override fees) are
//! fractions in `[0, 1]`. Distribution maps (`bonds`, `fees`, `donations`)
//! hold percentages in `[0, 100]`.

use crate::core::address;
use crate::core::DEFAULT_SIMULATION_BATCH_SIZE;
use crate::models::PayoutMode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Config parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

// ============================================================================
// Sections
// ============================================================================

/// Where the share of below-minimum-balance delegators goes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BelowMinimumBalanceDestination {
    /// Their bonds are computed and folded into the baker's fee income
    #[default]
    Baker,
    /// They are left out of the denominator so everyone else shares it
    Everyone,
}

/// Per-delegator settings; every field falls back to the global default
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DelegatorOverride {
    pub recipient: Option<String>,
    pub fee: Option<f64>,
    pub is_baker_paying_tx_fee: Option<bool>,
    pub is_baker_paying_allocation_tx_fee: Option<bool>,
    /// Cap on the balance used for reward math
    pub max_balance: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DelegatorsConfig {
    pub minimum_balance: i64,
    pub below_minimum_balance_destination: BelowMinimumBalanceDestination,
    /// Delegators that are never paid
    pub ignore: Vec<String>,
    /// When non-empty, only these delegators are paid
    pub prefilter: Vec<String>,
    pub overrides: BTreeMap<String, DelegatorOverride>,
}

/// Split of the baker's own income
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IncomeRecipients {
    /// Percentages of bond income per address
    pub bonds: BTreeMap<String, f64>,
    /// Percentages of fee income per address
    pub fees: BTreeMap<String, f64>,
    /// Percentages of the donated amount per address
    pub donations: BTreeMap<String, f64>,
    /// Fraction of bond income donated
    pub donate_bonds: f64,
    /// Fraction of fee income donated
    pub donate_fees: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverdelegationConfig {
    pub is_protection_enabled: bool,
}

impl Default for OverdelegationConfig {
    fn default() -> Self {
        Self {
            is_protection_enabled: true,
        }
    }
}

/// What to do when the payout address cannot cover a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceCheckMode {
    #[default]
    Fail,
    WaitAndRetry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalanceCheckConfig {
    pub mode: BalanceCheckMode,
    pub interval_secs: u64,
    /// Notify the admin every this many failed attempts
    pub notify_every: u32,
}

impl Default for BalanceCheckConfig {
    fn default() -> Self {
        Self {
            mode: BalanceCheckMode::Fail,
            interval_secs: 300,
            notify_every: 12,
        }
    }
}

impl BalanceCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PayoutOptions {
    pub minimum_payout_amount: i64,
    pub is_baker_paying_tx_fee: bool,
    pub is_baker_paying_allocation_tx_fee: bool,
    pub ignore_empty_accounts: bool,
    pub ignore_kt: bool,
    pub excluded_prefixes: Vec<String>,
    pub tx_gas_limit_buffer: i64,
    pub kt_tx_gas_limit_buffer: i64,
    pub tx_deserialization_gas_buffer: i64,
    pub tx_fee_buffer: i64,
    pub kt_tx_fee_buffer: i64,
    pub simulation_batch_size: usize,
    /// Deserialization gas of the operation envelope itself
    pub metadata_deserialization_gas: i64,
    pub mix_in_contract_calls: bool,
    pub mix_in_fa_transfers: bool,
    /// Merge recipes of several cycles into one transfer per recipient
    pub accumulate: bool,
    pub balance_check: BalanceCheckConfig,
}

impl Default for PayoutOptions {
    fn default() -> Self {
        Self {
            minimum_payout_amount: 0,
            is_baker_paying_tx_fee: false,
            is_baker_paying_allocation_tx_fee: false,
            ignore_empty_accounts: false,
            ignore_kt: false,
            excluded_prefixes: Vec::new(),
            tx_gas_limit_buffer: 100,
            kt_tx_gas_limit_buffer: 1_000,
            tx_deserialization_gas_buffer: 5,
            tx_fee_buffer: 0,
            kt_tx_fee_buffer: 0,
            simulation_batch_size: DEFAULT_SIMULATION_BATCH_SIZE,
            metadata_deserialization_gas: 0,
            mix_in_contract_calls: false,
            mix_in_fa_transfers: false,
            accumulate: false,
            balance_check: BalanceCheckConfig::default(),
        }
    }
}

// ============================================================================
// Top level
// ============================================================================

/// Complete payout configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PayoutConfiguration {
    pub baker: String,
    /// Default fee rate charged to delegators
    pub fee_rate: f64,
    pub payout_mode: PayoutMode,
    pub delegators: DelegatorsConfig,
    pub income_recipients: IncomeRecipients,
    pub overdelegation: OverdelegationConfig,
    pub payouts: PayoutOptions,
}

impl Default for PayoutConfiguration {
    fn default() -> Self {
        Self {
            baker: String::new(),
            fee_rate: 0.05,
            payout_mode: PayoutMode::Actual,
            delegators: DelegatorsConfig::default(),
            income_recipients: IncomeRecipients::default(),
            overdelegation: OverdelegationConfig::default(),
            payouts: PayoutOptions::default(),
        }
    }
}

impl PayoutConfiguration {
    /// Parse and validate a JSON configuration
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    /// [`ConfigError::Invalid`] naming the first offending field
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !address::is_valid_address(&self.baker) {
            return Err(ConfigError::Invalid(format!(
                "baker must be a valid address, got '{}'",
                self.baker
            )));
        }

        check_rate("fee_rate", self.fee_rate)?;
        for (delegator, ov) in &self.delegators.overrides {
            if let Some(fee) = ov.fee {
                check_rate(&format!("overrides.{}.fee", delegator), fee)?;
            }
            if let Some(recipient) = &ov.recipient {
                if !address::is_valid_address(recipient) {
                    return Err(ConfigError::Invalid(format!(
                        "overrides.{}.recipient is not a valid address",
                        delegator
                    )));
                }
            }
            if matches!(ov.max_balance, Some(max) if max < 0) {
                return Err(ConfigError::Invalid(format!(
                    "overrides.{}.max_balance must be >= 0",
                    delegator
                )));
            }
        }

        if self.delegators.minimum_balance < 0 {
            return Err(ConfigError::Invalid(
                "delegators.minimum_balance must be >= 0".to_string(),
            ));
        }

        let income = &self.income_recipients;
        check_rate("income_recipients.donate_bonds", income.donate_bonds)?;
        check_rate("income_recipients.donate_fees", income.donate_fees)?;
        check_percentages("income_recipients.bonds", &income.bonds)?;
        check_percentages("income_recipients.fees", &income.fees)?;
        check_percentages("income_recipients.donations", &income.donations)?;
        if (income.donate_bonds > 0.0 || income.donate_fees > 0.0) && income.donations.is_empty() {
            return Err(ConfigError::Invalid(
                "income_recipients.donations must name a destination when donating".to_string(),
            ));
        }

        let payouts = &self.payouts;
        if payouts.simulation_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "payouts.simulation_batch_size must be > 0".to_string(),
            ));
        }
        if payouts.minimum_payout_amount < 0 {
            return Err(ConfigError::Invalid(
                "payouts.minimum_payout_amount must be >= 0".to_string(),
            ));
        }
        if payouts.balance_check.interval_secs == 0 || payouts.balance_check.notify_every == 0 {
            return Err(ConfigError::Invalid(
                "payouts.balance_check interval and notify_every must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn delegator_override(&self, delegator: &str) -> Option<&DelegatorOverride> {
        self.delegators.overrides.get(delegator)
    }
}

fn check_rate(field: &str, rate: f64) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&rate) {
        return Err(ConfigError::Invalid(format!(
            "{} must be within [0, 1], got {}",
            field, rate
        )));
    }
    Ok(())
}

fn check_percentages(field: &str, map: &BTreeMap<String, f64>) -> Result<(), ConfigError> {
    for (address, percentage) in map {
        if !address::is_valid_address(address) {
            return Err(ConfigError::Invalid(format!(
                "{} contains invalid address '{}'",
                field, address
            )));
        }
        if *percentage < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "{}.{} must be >= 0",
                field, address
            )));
        }
    }
    let total: f64 = map.values().sum();
    if total > 100.0 {
        return Err(ConfigError::Invalid(format!(
            "{} percentages sum to {} (> 100)",
            field, total
        )));
    }
    Ok(())
}
