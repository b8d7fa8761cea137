//! Batch splitting
//!
//! Greedy bin-packing of estimated payouts into operations that respect the
//! chain's per-operation limits.
//!
//! # Critical Invariants
//!
//! 1. **Limits**: every batch satisfies `gas ≤ 95% hard gas`,
//!    `storage ≤ 95% hard storage` and
//!    `bytes ≤ 95% max operation length − 1000`.
//! 2. **Order**: concatenating the batches reproduces the input exactly.
//! 3. **Fit**: a payout that does not fit into an empty batch is an
//!    invariant violation (estimation guarantees single transfers fit).

use crate::chain::{DraftOperation, OperationLimits, TransferContent};
use crate::core::{BATCH_LIMIT_SAFETY_PERCENT, BATCH_SERIALIZATION_BUFFER};
use crate::error::{PayoutError, Result};
use crate::models::{AccumulatedPayoutRecipe, OpLimits};
use serde_json::json;

/// Usable share of the per-operation limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchCapacity {
    pub gas: i64,
    pub storage: i64,
    pub bytes: usize,
}

impl BatchCapacity {
    pub fn from_limits(limits: &OperationLimits) -> Self {
        let percent = BATCH_LIMIT_SAFETY_PERCENT;
        Self {
            gas: limits.hard_gas_limit_per_operation * percent / 100,
            storage: limits.hard_storage_limit_per_operation * percent / 100,
            bytes: (limits.max_operation_data_length * percent as usize / 100)
                .saturating_sub(BATCH_SERIALIZATION_BUFFER),
        }
    }
}

/// Payouts sent together in one operation
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    payouts: Vec<AccumulatedPayoutRecipe>,
    /// Accumulator used to measure the serialized size
    op: DraftOperation,
    used_gas: i64,
    used_storage: i64,
}

impl Batch {
    pub fn new() -> Self {
        Self {
            payouts: Vec::new(),
            op: DraftOperation::default(),
            used_gas: 0,
            used_storage: 0,
        }
    }

    pub fn payouts(&self) -> &[AccumulatedPayoutRecipe] {
        &self.payouts
    }

    pub fn into_payouts(self) -> Vec<AccumulatedPayoutRecipe> {
        self.payouts
    }

    /// Transfers with their estimated limits applied
    pub fn contents(&self) -> &[TransferContent] {
        &self.op.contents
    }

    pub fn len(&self) -> usize {
        self.payouts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payouts.is_empty()
    }

    pub fn used_gas(&self) -> i64 {
        self.used_gas
    }

    pub fn used_storage(&self) -> i64 {
        self.used_storage
    }

    pub fn serialized_len(&self) -> usize {
        self.op.serialized_len()
    }

    fn fits(&self, transfer: &TransferContent, limits: &OpLimits, capacity: &BatchCapacity) -> bool {
        self.used_gas + limits.total_gas() <= capacity.gas
            && self.used_storage + limits.storage_limit <= capacity.storage
            && self.op.serialized_len() + transfer.serialized_len() <= capacity.bytes
    }

    fn push(&mut self, payout: AccumulatedPayoutRecipe, transfer: TransferContent, limits: &OpLimits) {
        self.used_gas += limits.total_gas();
        self.used_storage += limits.storage_limit;
        self.op.push(transfer);
        self.payouts.push(payout);
    }
}

impl Default for Batch {
    fn default() -> Self {
        Self::new()
    }
}

/// Pack `payouts` into batches, preserving order
///
/// # Errors
/// [`PayoutError::InvariantViolation`] when one payout alone exceeds the
/// capacity.
pub fn split_into_batches(
    source: &str,
    payouts: Vec<AccumulatedPayoutRecipe>,
    capacity: &BatchCapacity,
) -> Result<Vec<Batch>> {
    let mut batches = Vec::new();
    let mut current = Batch::new();

    for payout in payouts {
        let recipe = payout.representative();
        let limits = recipe.op_limits.unwrap_or_default();
        let transfer = TransferContent::from_recipe(source, recipe).with_limits(&limits);

        if current.fits(&transfer, &limits, capacity) {
            current.push(payout, transfer, &limits);
            continue;
        }

        let fresh = Batch::new();
        if !fresh.fits(&transfer, &limits, capacity) {
            return Err(PayoutError::invariant(
                "payout does not fit into an empty batch",
                json!({
                    "recipient": recipe.recipient,
                    "cycle": recipe.cycle,
                    "gas": limits.total_gas(),
                    "storage": limits.storage_limit,
                    "bytes": fresh.serialized_len() + transfer.serialized_len(),
                    "capacity": {
                        "gas": capacity.gas,
                        "storage": capacity.storage,
                        "bytes": capacity.bytes,
                    },
                }),
            ));
        }

        if !current.is_empty() {
            batches.push(std::mem::replace(&mut current, fresh));
        }
        current.push(payout, transfer, &limits);
    }

    if !current.is_empty() {
        batches.push(current);
    }
    Ok(batches)
}

/// Which payouts may share an operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamOptions {
    pub mix_in_contract_calls: bool,
    pub mix_in_fa_transfers: bool,
}

/// Split payouts into token, contract and plain streams, then batch each
///
/// Streams are batched independently unless mixing is enabled, in which
/// case the mixed stream joins the plain one.
pub fn split_payouts_into_batches(
    source: &str,
    payouts: Vec<AccumulatedPayoutRecipe>,
    capacity: &BatchCapacity,
    options: StreamOptions,
) -> Result<Vec<Batch>> {
    let mut token = Vec::new();
    let mut contract = Vec::new();
    let mut plain = Vec::new();

    for payout in payouts {
        let recipe = payout.representative();
        if recipe.tx_kind.is_fa() && !options.mix_in_fa_transfers {
            token.push(payout);
        } else if recipe.is_contract_call() && !recipe.tx_kind.is_fa() && !options.mix_in_contract_calls {
            contract.push(payout);
        } else {
            plain.push(payout);
        }
    }

    let mut batches = Vec::new();
    for stream in [token, contract, plain] {
        if !stream.is_empty() {
            batches.extend(split_into_batches(source, stream, capacity)?);
        }
    }
    Ok(batches)
}
