//! Batching and accumulation
//!
//! - [`accumulate`]: merge recipes of several cycles into one transfer per
//!   recipient identity
//! - [`split`]: bin-pack payouts into operations under protocol limits

pub mod accumulate;
pub mod split;

pub use accumulate::{accumulate_payouts, refit_merged_fees, refund_surplus_tx_fees, wrap_payouts};
pub use split::{split_into_batches, split_payouts_into_batches, Batch, BatchCapacity, StreamOptions};
