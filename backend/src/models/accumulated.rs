//! Accumulated payout recipe
//!
//! Merges recipes owed to the same recipient across several cycles into a
//! single transfer, while keeping the constituent recipes so that reports
//! can be written per cycle afterwards.
//!
//! # Critical Invariants
//!
//! 1. **Identity**: `add` only merges recipes whose recipient, delegator,
//!    kind, tx kind, FA contract, FA token id and validity are equal. Any
//!    difference is an [`AccumulationError`] naming every mismatched field.
//! 2. **Conservation**: the merged amount and fee are the exact sums of the
//!    constituents (plus the surplus tx fee refund, see
//!    [`AccumulatedPayoutRecipe::refund_surplus_tx_fee`]).
//! 3. **Order independence**: amount and fee totals do not depend on the
//!    order recipes are added in.

use crate::models::recipe::PayoutRecipe;
use crate::models::types::OpLimits;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One identity field that differs between two recipes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMismatch {
    pub field: &'static str,
    pub left: String,
    pub right: String,
}

impl std::fmt::Display for FieldMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({} != {})", self.field, self.left, self.right)
    }
}

/// Errors raised when merging recipes
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AccumulationError {
    #[error("Cannot accumulate recipes with different {}", join_mismatches(.0))]
    Mismatch(Vec<FieldMismatch>),
}

fn join_mismatches(mismatches: &[FieldMismatch]) -> String {
    mismatches
        .iter()
        .map(|m| m.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl AccumulationError {
    /// Names of the mismatched fields
    pub fn fields(&self) -> Vec<&'static str> {
        match self {
            AccumulationError::Mismatch(mismatches) => mismatches.iter().map(|m| m.field).collect(),
        }
    }
}

/// One or more recipes paid as a single transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccumulatedPayoutRecipe {
    /// Representative recipe; `amount`, `fee` and `op_limits` hold the totals
    pub recipe: PayoutRecipe,
    /// Constituent recipes, in the order they were added
    pub recipes: Vec<PayoutRecipe>,
    /// Tx fee returned to the recipient after merging
    #[serde(default)]
    pub refunded_tx_fee: i64,
}

impl AccumulatedPayoutRecipe {
    pub fn from_recipe(recipe: PayoutRecipe) -> Self {
        Self {
            recipe: recipe.clone(),
            recipes: vec![recipe],
            refunded_tx_fee: 0,
        }
    }

    pub fn representative(&self) -> &PayoutRecipe {
        &self.recipe
    }

    pub fn is_merged(&self) -> bool {
        self.recipes.len() > 1
    }

    /// Merge `other` into this recipe
    ///
    /// # Errors
    /// [`AccumulationError::Mismatch`] listing every identity field that
    /// differs; `self` is left untouched in that case.
    pub fn add(&mut self, other: AccumulatedPayoutRecipe) -> Result<(), AccumulationError> {
        let mismatches = identity_mismatches(&self.recipe, &other.recipe);
        if !mismatches.is_empty() {
            return Err(AccumulationError::Mismatch(mismatches));
        }

        self.recipe.amount += other.recipe.amount;
        self.recipe.fee += other.recipe.fee;
        self.recipe.delegated_balance = self.recipe.delegated_balance.max(other.recipe.delegated_balance);
        self.recipe.op_limits = match (self.recipe.op_limits, other.recipe.op_limits) {
            (Some(a), Some(b)) => Some(a.max(&b)),
            (a, b) => a.or(b),
        };
        self.refunded_tx_fee += other.refunded_tx_fee;
        self.recipes.extend(other.recipes);
        Ok(())
    }

    /// Return tx fees the recipient no longer owes after merging
    ///
    /// Each constituent was charged its own tx fee, but the merged transfer
    /// only pays one. When recipients pay their own fees, the difference is
    /// added back to the transferred amount.
    pub fn refund_surplus_tx_fee(&mut self) {
        if !self.is_merged() || self.recipe.is_baker_paying_tx_fee || !self.recipe.is_valid {
            return;
        }
        let charged: i64 = self.recipes.iter().map(|r| r.tx_fee()).sum();
        let surplus = charged - self.recipe.tx_fee() - self.refunded_tx_fee;
        if surplus > 0 {
            self.recipe.amount += surplus;
            self.refunded_tx_fee += surplus;
        }
    }

    /// Split back into per-cycle recipes for reporting
    ///
    /// The first constituent carries the merged transfer's tx fee and the
    /// refund; the others report a zero tx fee. Amounts sum to the merged
    /// amount.
    pub fn disaggregate(&self) -> Vec<PayoutRecipe> {
        if !self.is_merged() {
            return vec![self.recipe.clone()];
        }

        self.recipes
            .iter()
            .enumerate()
            .map(|(i, recipe)| {
                let mut recipe = recipe.clone();
                if i == 0 {
                    recipe.amount += self.refunded_tx_fee;
                    recipe.op_limits = self.recipe.op_limits;
                } else {
                    recipe.op_limits = recipe.op_limits.map(|limits| OpLimits {
                        transaction_fee: 0,
                        ..limits
                    });
                }
                recipe
            })
            .collect()
    }
}

fn identity_mismatches(left: &PayoutRecipe, right: &PayoutRecipe) -> Vec<FieldMismatch> {
    let mut mismatches = Vec::new();
    let mut check = |field: &'static str, l: String, r: String| {
        if l != r {
            mismatches.push(FieldMismatch {
                field,
                left: l,
                right: r,
            });
        }
    };

    check("recipient", left.recipient.clone(), right.recipient.clone());
    check("delegator", left.delegator.clone(), right.delegator.clone());
    check("kind", left.kind.to_string(), right.kind.to_string());
    check("tx_kind", left.tx_kind.to_string(), right.tx_kind.to_string());
    check(
        "fa_contract",
        format!("{:?}", left.fa_contract),
        format!("{:?}", right.fa_contract),
    );
    check(
        "fa_token_id",
        format!("{:?}", left.fa_token_id),
        format!("{:?}", right.fa_token_id),
    );
    check("is_valid", left.is_valid.to_string(), right.is_valid.to_string());
    mismatches
}
