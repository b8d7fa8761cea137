//! Collaborator roles
//!
//! The pipeline talks to the outside world only through these traits:
//!
//! - **Collector**: reads chain state and simulates operations
//! - **Signer**: owns the payout key
//! - **Transactor**: completes, dispatches and confirms operations
//! - **Reporter**: persists reports and summaries
//! - **AdminNotifier**: reaches the operator
//!
//! Implementations live outside this crate. All methods take `&self`;
//! implementations needing mutable state use interior mutability.

pub mod operation;

pub use operation::{DraftOperation, TransferContent, TransferParameters};

use crate::error::{PayoutError, Result};
use crate::models::{CycleRewardData, CyclePayoutSummary, PayoutReport};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure reported by a collaborator implementation
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CollaboratorError {
    #[error("rpc failure: {0}")]
    Rpc(String),

    #[error("operation rejected: {0}")]
    Rejected(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("{0}")]
    Other(String),
}

// ============================================================================
// Data exchanged with collaborators
// ============================================================================

/// Cost of one content of a simulated operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentCost {
    pub gas_used: i64,
    /// Bytes of storage paid by this content
    #[serde(default)]
    pub paid_storage_size_diff: i64,
    /// Destination account was created by this content
    #[serde(default)]
    pub allocated_destination: bool,
    pub applied: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl ContentCost {
    pub fn applied(gas_used: i64) -> Self {
        Self {
            gas_used,
            applied: true,
            ..Default::default()
        }
    }
}

/// Result of simulating a draft operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationReceipt {
    pub contents: Vec<ContentCost>,
}

impl SimulationReceipt {
    /// Every content applied
    pub fn is_applied(&self) -> bool {
        self.contents.iter().all(|c| c.applied)
    }

    pub fn first_error(&self) -> Option<&str> {
        self.contents.iter().find_map(|c| c.error.as_deref())
    }
}

/// Chain resource ceilings for one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationLimits {
    pub hard_gas_limit_per_operation: i64,
    pub hard_storage_limit_per_operation: i64,
    pub max_operation_data_length: usize,
}

/// Options passed to `Transactor::dispatch`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchOptions {
    /// Blocks to wait for before a dispatch counts as applied
    pub confirmations: u32,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self { confirmations: 2 }
    }
}

// ============================================================================
// Roles
// ============================================================================

pub trait Collector {
    fn get_last_completed_cycle(&self) -> std::result::Result<i64, CollaboratorError>;

    fn get_cycle_reward_data(
        &self,
        baker: &str,
        cycle: i64,
    ) -> std::result::Result<CycleRewardData, CollaboratorError>;

    /// Simulate `op` as if signed by `public_key`
    fn simulate(
        &self,
        op: &DraftOperation,
        public_key: &str,
    ) -> std::result::Result<SimulationReceipt, CollaboratorError>;

    fn get_balance(&self, address: &str) -> std::result::Result<i64, CollaboratorError>;

    fn is_revealed(&self, address: &str) -> std::result::Result<bool, CollaboratorError>;

    fn get_branch(&self) -> std::result::Result<String, CollaboratorError>;
}

pub trait Signer {
    fn public_key(&self) -> String;

    fn address(&self) -> String;

    fn sign(&self, op: &mut DraftOperation) -> std::result::Result<(), CollaboratorError>;
}

/// Handle on a dispatched operation
pub trait OpResult {
    fn op_hash(&self) -> String;

    /// Block until the operation is applied (or fails to be)
    fn wait_for_apply(&mut self) -> std::result::Result<(), CollaboratorError>;
}

pub trait Transactor {
    /// Fill in sequencing metadata (counter, branch)
    fn complete(
        &self,
        op: &mut DraftOperation,
        public_key: &str,
    ) -> std::result::Result<(), CollaboratorError>;

    fn dispatch(
        &self,
        op: &DraftOperation,
        options: &DispatchOptions,
    ) -> std::result::Result<Box<dyn OpResult>, CollaboratorError>;

    fn get_limits(&self) -> std::result::Result<OperationLimits, CollaboratorError>;
}

pub trait Reporter {
    fn get_existing_reports(
        &self,
        cycle: i64,
    ) -> std::result::Result<Vec<PayoutReport>, CollaboratorError>;

    fn report_payouts(&self, reports: &[PayoutReport]) -> std::result::Result<(), CollaboratorError>;

    fn report_invalid_payouts(
        &self,
        reports: &[PayoutReport],
    ) -> std::result::Result<(), CollaboratorError>;

    fn report_cycle_summary(
        &self,
        summary: &CyclePayoutSummary,
    ) -> std::result::Result<(), CollaboratorError>;

    fn get_existing_cycle_summary(
        &self,
        cycle: i64,
    ) -> std::result::Result<Option<CyclePayoutSummary>, CollaboratorError>;
}

pub trait AdminNotifier {
    fn notify_admin(&self, message: &str) -> std::result::Result<(), CollaboratorError>;
}

// ============================================================================
// Collaborator set
// ============================================================================

/// Borrowed view of the collaborators available to a pipeline run
///
/// Each stage requires only the roles it uses; a missing role is reported
/// as [`PayoutError::MissingCollaborator`] when the stage starts.
#[derive(Clone, Copy, Default)]
pub struct Collaborators<'a> {
    pub collector: Option<&'a dyn Collector>,
    pub signer: Option<&'a dyn Signer>,
    pub transactor: Option<&'a dyn Transactor>,
    pub reporter: Option<&'a dyn Reporter>,
    pub notifier: Option<&'a dyn AdminNotifier>,
}

impl<'a> Collaborators<'a> {
    pub fn collector(&self) -> Result<&'a dyn Collector> {
        self.collector
            .ok_or(PayoutError::MissingCollaborator("collector"))
    }

    pub fn signer(&self) -> Result<&'a dyn Signer> {
        self.signer.ok_or(PayoutError::MissingCollaborator("signer"))
    }

    pub fn transactor(&self) -> Result<&'a dyn Transactor> {
        self.transactor
            .ok_or(PayoutError::MissingCollaborator("transactor"))
    }

    pub fn reporter(&self) -> Result<&'a dyn Reporter> {
        self.reporter
            .ok_or(PayoutError::MissingCollaborator("reporter"))
    }

    /// Notify the operator; delivery failures are logged, never raised
    pub fn notify_admin(&self, message: &str) {
        match self.notifier {
            Some(notifier) => {
                if let Err(e) = notifier.notify_admin(message) {
                    tracing::warn!(error = %e, "failed to notify admin");
                }
            }
            None => tracing::warn!(message, "admin notification skipped, no notifier configured"),
        }
    }
}

impl std::fmt::Debug for Collaborators<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("collector", &self.collector.is_some())
            .field("signer", &self.signer.is_some())
            .field("transactor", &self.transactor.is_some())
            .field("reporter", &self.reporter.is_some())
            .field("notifier", &self.notifier.is_some())
            .finish()
    }
}
