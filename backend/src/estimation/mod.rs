//! Estimation engine
//!
//! Determines gas, storage and fee of draft transfers by simulating them.
//!
//! # Algorithm
//!
//! 1. Partition transfers into plain tez transfers, contract calls (KT
//!    destinations) and token transfers. Each group is cut into sub-batches
//!    of `batch_size`.
//! 2. Every sub-batch is simulated as one operation framed by two 1-mutez
//!    marker transfers. The receipt must hold exactly `n + 2` entries.
//! 3. The first marker carries the deserialization gas of the whole
//!    operation. `marker[0].gas − marker[last].gas − metadata gas` is the
//!    serialization gas, distributed over the payload by byte share.
//! 4. A failed sub-batch is re-simulated one transfer at a time; only a
//!    transfer whose own simulation fails is reported as failed.
//!
//! # Critical Invariants
//!
//! - Results are returned in input order, one per transfer.
//! - A receipt with the wrong number of entries is an invariant violation,
//!   never a per-transfer failure.

use crate::chain::{Collector, ContentCost, DraftOperation, TransferContent};
use crate::config::PayoutOptions;
use crate::core::address;
use crate::core::math::{ceil_div, mul_div};
use crate::core::{
    ALLOCATION_STORAGE_BYTES, FEE_MUTEZ_PER_BYTE, GAS_UNITS_PER_FEE_MUTEZ, MINIMAL_FEE_MUTEZ,
    STORAGE_COST_PER_BYTE,
};
use crate::error::{PayoutError, Result};
use crate::models::OpLimits;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

/// Buffers and sizes applied by the estimator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EstimationSettings {
    pub batch_size: usize,
    pub metadata_deserialization_gas: i64,
    pub tx_gas_limit_buffer: i64,
    pub kt_tx_gas_limit_buffer: i64,
    pub tx_deserialization_gas_buffer: i64,
    pub tx_fee_buffer: i64,
    pub kt_tx_fee_buffer: i64,
}

impl Default for EstimationSettings {
    fn default() -> Self {
        Self::from(&PayoutOptions::default())
    }
}

impl From<&PayoutOptions> for EstimationSettings {
    fn from(options: &PayoutOptions) -> Self {
        Self {
            batch_size: options.simulation_batch_size.max(1),
            metadata_deserialization_gas: options.metadata_deserialization_gas,
            tx_gas_limit_buffer: options.tx_gas_limit_buffer,
            kt_tx_gas_limit_buffer: options.kt_tx_gas_limit_buffer,
            tx_deserialization_gas_buffer: options.tx_deserialization_gas_buffer,
            tx_fee_buffer: options.tx_fee_buffer,
            kt_tx_fee_buffer: options.kt_tx_fee_buffer,
        }
    }
}

/// Estimated costs of one transfer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EstimationResult {
    pub op_limits: OpLimits,
    /// Burn for creating the destination account
    pub allocation_burn: i64,
    /// Burn for storage paid beyond allocation
    pub storage_burn: i64,
}

/// Singleton simulation of a transfer failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EstimationFailure {
    pub message: String,
}

pub type EstimationOutcome = std::result::Result<EstimationResult, EstimationFailure>;

/// Transfer group; groups are never simulated together
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum TransferGroup {
    Plain,
    Contract,
    Token,
}

fn group_of(transfer: &TransferContent) -> TransferGroup {
    if transfer.parameters.is_some() {
        TransferGroup::Token
    } else if address::is_contract(&transfer.destination) {
        TransferGroup::Contract
    } else {
        TransferGroup::Plain
    }
}

/// Estimate every transfer in `transfers`
///
/// # Arguments
/// * `collector` - Simulation backend
/// * `source` - Payout address the transfers are sent from
/// * `public_key` - Key the simulation runs under
/// * `transfers` - Draft transfers (limits are ignored and re-estimated)
/// * `settings` - Buffers and sub-batch size
///
/// # Returns
/// One outcome per transfer, in input order.
///
/// # Errors
/// [`PayoutError::InvariantViolation`] when a receipt's entry count does
/// not match the simulated operation, and branch lookup failures.
pub fn estimate_transfers(
    collector: &dyn Collector,
    source: &str,
    public_key: &str,
    transfers: &[TransferContent],
    settings: &EstimationSettings,
) -> Result<Vec<EstimationOutcome>> {
    let mut outcomes: Vec<Option<EstimationOutcome>> = vec![None; transfers.len()];
    if transfers.is_empty() {
        return Ok(Vec::new());
    }

    let branch = collector
        .get_branch()
        .map_err(|e| PayoutError::collaborator("collector", e))?;
    let estimator = Estimator {
        collector,
        source,
        public_key,
        branch,
        settings,
    };

    for group in [TransferGroup::Plain, TransferGroup::Contract, TransferGroup::Token] {
        let indices: Vec<usize> = (0..transfers.len())
            .filter(|&i| group_of(&transfers[i]) == group)
            .collect();

        for chunk in indices.chunks(settings.batch_size.max(1)) {
            let results = estimator.estimate_chunk(transfers, chunk)?;
            for (&i, outcome) in chunk.iter().zip(results) {
                outcomes[i] = Some(outcome);
            }
        }
    }

    Ok(outcomes
        .into_iter()
        .map(|o| {
            o.unwrap_or_else(|| {
                Err(EstimationFailure {
                    message: "transfer was not estimated".to_string(),
                })
            })
        })
        .collect())
}

struct Estimator<'a> {
    collector: &'a dyn Collector,
    source: &'a str,
    public_key: &'a str,
    branch: String,
    settings: &'a EstimationSettings,
}

impl Estimator<'_> {
    /// Simulate `chunk` together, falling back to one-by-one on failure
    fn estimate_chunk(
        &self,
        transfers: &[TransferContent],
        chunk: &[usize],
    ) -> Result<Vec<EstimationOutcome>> {
        match self.simulate(transfers, chunk)? {
            Ok(outcomes) => Ok(outcomes),
            Err(message) if chunk.len() > 1 => {
                warn!(
                    transfers = chunk.len(),
                    error = %message,
                    "batch simulation failed, estimating transfers individually"
                );
                let mut outcomes = Vec::with_capacity(chunk.len());
                for &i in chunk {
                    let single = match self.simulate(transfers, &[i])? {
                        Ok(mut results) => results.pop().unwrap_or_else(|| {
                            Err(EstimationFailure {
                                message: "empty simulation result".to_string(),
                            })
                        }),
                        Err(message) => Err(EstimationFailure { message }),
                    };
                    outcomes.push(single);
                }
                Ok(outcomes)
            }
            Err(message) => Ok(vec![Err(EstimationFailure { message })]),
        }
    }

    /// One simulation call
    ///
    /// The outer `Result` carries invariant violations; the inner one a
    /// failed simulation.
    fn simulate(
        &self,
        transfers: &[TransferContent],
        chunk: &[usize],
    ) -> Result<std::result::Result<Vec<EstimationOutcome>, String>> {
        let mut op = DraftOperation::new(self.branch.clone());
        op.push(TransferContent::marker(self.source));
        for &i in chunk {
            op.push(unlimited(&transfers[i]));
        }
        op.push(TransferContent::marker(self.source));

        let receipt = match self.collector.simulate(&op, self.public_key) {
            Ok(receipt) => receipt,
            Err(e) => return Ok(Err(e.to_string())),
        };

        if receipt.contents.len() != chunk.len() + 2 {
            return Err(PayoutError::invariant(
                "simulation returned an unexpected number of cost entries",
                json!({
                    "expected": chunk.len() + 2,
                    "received": receipt.contents.len(),
                    "operation": op,
                }),
            ));
        }
        if !receipt.is_applied() {
            let message = receipt
                .first_error()
                .unwrap_or("operation not applied")
                .to_string();
            return Ok(Err(message));
        }

        let contents = &receipt.contents;
        let (first, last) = (&contents[0], &contents[contents.len() - 1]);
        let serialization_gas = (first.gas_used
            - last.gas_used
            - self.settings.metadata_deserialization_gas)
            .max(0);

        let payload = &op.contents[1..op.contents.len() - 1];
        let total_bytes: usize = payload.iter().map(TransferContent::serialized_len).sum();
        debug!(
            transfers = chunk.len(),
            serialization_gas, total_bytes, "simulated batch"
        );

        Ok(Ok(payload
            .iter()
            .zip(&contents[1..contents.len() - 1])
            .map(|(transfer, cost)| {
                let share = mul_div(
                    serialization_gas,
                    transfer.serialized_len() as i64,
                    total_bytes as i64,
                );
                Ok(self.limits_for(transfer, cost, share))
            })
            .collect()))
    }

    fn limits_for(
        &self,
        transfer: &TransferContent,
        cost: &ContentCost,
        serialization_gas: i64,
    ) -> EstimationResult {
        let settings = self.settings;
        let is_contract = transfer.parameters.is_some() || address::is_contract(&transfer.destination);
        let (gas_buffer, fee_buffer) = if is_contract {
            (settings.kt_tx_gas_limit_buffer, settings.kt_tx_fee_buffer)
        } else {
            (settings.tx_gas_limit_buffer, settings.tx_fee_buffer)
        };

        let allocation_storage = if cost.allocated_destination {
            ALLOCATION_STORAGE_BYTES
        } else {
            0
        };
        let mut limits = OpLimits {
            transaction_fee: 0,
            storage_limit: cost.paid_storage_size_diff + allocation_storage,
            gas_limit: cost.gas_used + gas_buffer,
            deserialization_gas_limit: serialization_gas + settings.tx_deserialization_gas_buffer,
        };

        // the fee is part of the encoding, so size it twice
        limits.transaction_fee = minimal_fee(transfer, &limits) + fee_buffer;
        limits.transaction_fee = minimal_fee(transfer, &limits) + fee_buffer;

        EstimationResult {
            op_limits: limits,
            allocation_burn: allocation_storage * STORAGE_COST_PER_BYTE,
            storage_burn: cost.paid_storage_size_diff * STORAGE_COST_PER_BYTE,
        }
    }
}

/// Transfer stripped of previous limits so every estimate starts clean
fn unlimited(transfer: &TransferContent) -> TransferContent {
    TransferContent {
        fee: 0,
        gas_limit: 0,
        storage_limit: 0,
        ..transfer.clone()
    }
}

/// `100 + ceil(gas / 10) + bytes`
pub fn minimal_fee(transfer: &TransferContent, limits: &OpLimits) -> i64 {
    let bytes = transfer.clone().with_limits(limits).serialized_len() as i64;
    MINIMAL_FEE_MUTEZ + ceil_div(limits.total_gas(), GAS_UNITS_PER_FEE_MUTEZ) + bytes * FEE_MUTEZ_PER_BYTE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_fee_counts_gas_and_bytes() {
        let transfer = TransferContent::tez("tz1a", "tz1b", 1_000);
        let limits = OpLimits {
            transaction_fee: 0,
            storage_limit: 0,
            gas_limit: 1_001,
            deserialization_gas_limit: 9,
        };
        let bytes = transfer.clone().with_limits(&limits).serialized_len() as i64;
        assert_eq!(minimal_fee(&transfer, &limits), 100 + 101 + bytes);
    }

    #[test]
    fn test_grouping() {
        let plain = TransferContent::tez("tz1a", "tz1b", 1);
        let kt = TransferContent::tez("tz1a", "KT1PWx2mnDueood7fEmfbBDKx1D9BAnnXitn", 1);
        assert_eq!(group_of(&plain), TransferGroup::Plain);
        assert_eq!(group_of(&kt), TransferGroup::Contract);
    }
}
