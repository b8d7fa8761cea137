//! Cycle payout blueprint
//!
//! The durable output of the generate stage: every recipe for one cycle
//! plus a summary of how the cycle's rewards were split.

use crate::models::recipe::PayoutRecipe;
use crate::models::types::PayoutKind;
use serde::{Deserialize, Serialize};

/// Aggregated figures for one cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CyclePayoutSummary {
    pub cycle: i64,
    /// Delegators reported by the collector
    pub delegators: usize,
    /// Delegators with a valid reward
    pub paid_delegators: usize,
    pub own_staked_balance: i64,
    pub own_delegated_balance: i64,
    pub external_staked_balance: i64,
    pub external_delegated_balance: i64,
    pub earned_rewards: i64,
    pub earned_fees: i64,
    /// Pool split between baker, delegators and donations
    pub total_distributable: i64,
    /// Bonds assigned to valid delegator rewards (before tx fees)
    pub distributed_rewards: i64,
    /// Baker's own bond share after donations
    pub bond_income: i64,
    /// Collected baker fees after donations
    pub fee_income: i64,
    pub donated_bonds: i64,
    pub donated_fees: i64,
    /// Tx fees of the cycle's transfers, filled after execution
    #[serde(default)]
    pub transaction_fees_paid: i64,
    /// Unix seconds when the summary was produced
    #[serde(default)]
    pub timestamp: u64,
}

impl CyclePayoutSummary {
    pub fn donated_total(&self) -> i64 {
        self.donated_bonds + self.donated_fees
    }

    /// Every distributable mutez is accounted for exactly once
    pub fn is_balanced(&self) -> bool {
        self.distributed_rewards + self.bond_income + self.fee_income + self.donated_total()
            == self.total_distributable
    }
}

/// All recipes of one cycle with their summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CyclePayoutBlueprint {
    pub cycle: i64,
    pub payouts: Vec<PayoutRecipe>,
    pub summary: CyclePayoutSummary,
}

impl CyclePayoutBlueprint {
    pub fn valid_payouts(&self) -> impl Iterator<Item = &PayoutRecipe> {
        self.payouts.iter().filter(|p| p.is_valid)
    }

    pub fn invalid_payouts(&self) -> impl Iterator<Item = &PayoutRecipe> {
        self.payouts.iter().filter(|p| !p.is_valid)
    }

    /// Total amount of valid transfers of `kind`
    pub fn total_of_kind(&self, kind: PayoutKind) -> i64 {
        self.valid_payouts()
            .filter(|p| p.kind == kind)
            .map(|p| p.amount)
            .sum()
    }
}
