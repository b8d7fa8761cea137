//! Baker Payouts Core - Rust Engine
//!
//! Computes, prepares and sends the reward payouts a baker owes its
//! delegators for each completed cycle.
//!
//! # Architecture
//!
//! - **generate**: candidates, bond and fee distribution, estimation,
//!   payout blueprint
//! - **prepare**: idempotent filtering, accumulation, balance check
//! - **execute**: batching, dispatch, cancellation, reporting
//! - **estimation**: simulation-driven gas, storage and fee limits
//! - **batching**: cross-cycle accumulation and batch splitting
//! - **pipeline**: named stages threaded over an owned context
//! - **extension**: hook points for external extensions
//! - **monitor**: async cycle monitor
//! - **orchestrator**: [`PayoutEngine`] tying everything together
//! - **chain**: collaborator traits and the operation size model
//!
//! # Critical Invariants
//!
//! 1. All money values are i64 (mutez)
//! 2. Every cycle's distribution conserves the distributable total
//! 3. A recipe is never paid twice: prepare skips ids with a successful
//!    report

pub mod batching;
pub mod chain;
pub mod config;
pub mod core;
pub mod error;
pub mod estimation;
pub mod execute;
pub mod extension;
pub mod generate;
pub mod models;
pub mod monitor;
pub mod orchestrator;
pub mod pipeline;
pub mod prepare;

// Re-exports for convenience
pub use chain::{AdminNotifier, Collaborators, Collector, OpResult, Reporter, Signer, Transactor};
pub use config::PayoutConfiguration;
pub use error::{PayoutError, Result};
pub use execute::{ExecuteOptions, ExecutionResult, StopSignal};
pub use extension::{ExtensionHost, ExtensionRegistry, Hook};
pub use models::{
    AccumulatedPayoutRecipe, BatchResult, CyclePayoutBlueprint, CyclePayoutSummary, InvalidReason,
    PayoutRecipe, PayoutReport,
};
pub use monitor::{CycleMonitor, CycleMonitorOptions};
pub use orchestrator::PayoutEngine;
pub use prepare::{PreparationResult, PrepareOptions};
