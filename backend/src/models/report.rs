//! Payout reports and batch results
//!
//! Reports are the persisted record of what was paid. The prepare stage
//! matches them back to recipes by [`PayoutRecipe::id`] so that a re-run
//! never pays the same recipe twice.

use crate::models::accumulated::AccumulatedPayoutRecipe;
use crate::models::recipe::PayoutRecipe;
use crate::models::types::{PayoutKind, TxKind};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Persisted outcome of one recipe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutReport {
    /// Recipe id this report belongs to
    pub id: String,
    pub baker: String,
    pub timestamp: u64,
    pub cycle: i64,
    pub kind: PayoutKind,
    pub tx_kind: TxKind,
    #[serde(default)]
    pub fa_contract: Option<String>,
    #[serde(default)]
    pub fa_token_id: Option<u64>,
    pub delegator: String,
    pub delegated_balance: i64,
    pub recipient: String,
    pub amount: i64,
    pub fee_rate: f64,
    pub fee: i64,
    pub tx_fee: i64,
    #[serde(default)]
    pub op_hash: String,
    pub success: bool,
    #[serde(default)]
    pub note: String,
}

impl PayoutReport {
    pub fn from_recipe(recipe: &PayoutRecipe, op_hash: &str, success: bool, note: &str) -> Self {
        Self {
            id: recipe.id(),
            baker: recipe.baker.clone(),
            timestamp: unix_now(),
            cycle: recipe.cycle,
            kind: recipe.kind,
            tx_kind: recipe.tx_kind,
            fa_contract: recipe.fa_contract.clone(),
            fa_token_id: recipe.fa_token_id,
            delegator: recipe.delegator.clone(),
            delegated_balance: recipe.delegated_balance,
            recipient: recipe.recipient.clone(),
            amount: recipe.amount,
            fee_rate: recipe.fee_rate,
            fee: recipe.fee,
            tx_fee: recipe.tx_fee(),
            op_hash: op_hash.to_string(),
            success,
            note: if note.is_empty() {
                recipe.note.clone()
            } else {
                note.to_string()
            },
        }
    }

    /// Report for a recipe that was never sent
    pub fn invalid(recipe: &PayoutRecipe) -> Self {
        let note = recipe
            .invalid_reason
            .map(|r| r.to_string())
            .unwrap_or_default();
        Self::from_recipe(recipe, "", false, &note)
    }
}

/// Outcome of dispatching and confirming one batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub payouts: Vec<AccumulatedPayoutRecipe>,
    #[serde(default)]
    pub op_hash: String,
    pub is_success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl BatchResult {
    pub fn success(payouts: Vec<AccumulatedPayoutRecipe>, op_hash: String) -> Self {
        Self {
            payouts,
            op_hash,
            is_success: true,
            error: None,
        }
    }

    pub fn failure(payouts: Vec<AccumulatedPayoutRecipe>, op_hash: String, error: impl Into<String>) -> Self {
        Self {
            payouts,
            op_hash,
            is_success: false,
            error: Some(error.into()),
        }
    }

    /// One report per constituent recipe
    pub fn to_reports(&self) -> Vec<PayoutReport> {
        let note = self.error.as_deref().unwrap_or("");
        self.payouts
            .iter()
            .flat_map(|p| p.disaggregate())
            .map(|recipe| PayoutReport::from_recipe(&recipe, &self.op_hash, self.is_success, note))
            .collect()
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
