//! Chain facts about a baker and its delegators for one cycle.
//!
//! Both types are read-only snapshots produced by the Collector.

use crate::models::types::PayoutMode;
use serde::{Deserialize, Serialize};

/// One staking relationship at the cycle snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegator {
    pub address: String,
    pub delegated_balance: i64,
    pub staked_balance: i64,
    /// Account was emptied during the cycle
    #[serde(default)]
    pub emptied: bool,
}

impl Delegator {
    pub fn new(address: impl Into<String>, delegated_balance: i64) -> Self {
        Self {
            address: address.into(),
            delegated_balance,
            staked_balance: 0,
            emptied: false,
        }
    }
}

/// Aggregate reward facts for a baker in one cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleRewardData {
    pub cycle: i64,
    pub own_staked_balance: i64,
    pub own_delegated_balance: i64,
    pub external_staked_balance: i64,
    pub external_delegated_balance: i64,
    pub block_delegated_rewards: i64,
    pub endorsement_delegated_rewards: i64,
    pub ideal_block_delegated_rewards: i64,
    pub ideal_endorsement_delegated_rewards: i64,
    pub block_delegated_fees: i64,
    /// Cap on the baker's frozen stake, when the baker set one
    #[serde(default)]
    pub frozen_deposit_limit: Option<i64>,
    pub delegators: Vec<Delegator>,
}

impl CycleRewardData {
    /// Rewards earned by delegated balances, per payout mode
    pub fn delegated_rewards(&self, mode: PayoutMode) -> i64 {
        match mode {
            PayoutMode::Actual => self.block_delegated_rewards + self.endorsement_delegated_rewards,
            PayoutMode::Ideal => {
                self.ideal_block_delegated_rewards + self.ideal_endorsement_delegated_rewards
            }
        }
    }

    /// Pool distributed between baker and delegators (rewards plus block fees)
    pub fn total_delegated_rewards(&self, mode: PayoutMode) -> i64 {
        self.delegated_rewards(mode) + self.block_delegated_fees
    }

    /// Own stake that counts toward delegation capacity
    pub fn effective_staked_balance(&self) -> i64 {
        match self.frozen_deposit_limit {
            Some(limit) => self.own_staked_balance.min(limit),
            None => self.own_staked_balance,
        }
    }
}
