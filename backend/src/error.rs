//! Pipeline error taxonomy
//!
//! Three tiers of failure exist in the payout pipeline:
//!
//! 1. **Invalidity** of a single candidate or recipe. This is data
//!    ([`InvalidReason`](crate::models::InvalidReason)), never an error.
//! 2. **Stage-fatal errors** ([`PayoutError`]) that abort the current run.
//! 3. **Invariant violations**: conditions that cannot happen when the
//!    collaborators behave. They are a distinct [`PayoutError`] variant that
//!    carries a JSON diagnostic payload so the caller can crash and report
//!    deliberately.

use crate::chain::CollaboratorError;
use crate::config::ConfigError;
use crate::extension::ExtensionError;
use crate::models::AccumulationError;
use serde_json::Value;
use thiserror::Error;

/// Diagnostic payload of an internal invariant violation
#[derive(Debug, Clone, PartialEq)]
pub struct InvariantViolation {
    pub message: String,
    pub diagnostics: Value,
}

impl std::fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.diagnostics)
    }
}

/// Errors that abort a pipeline run
#[derive(Debug, Error)]
pub enum PayoutError {
    #[error("Missing required collaborator: {0}")]
    MissingCollaborator(&'static str),

    #[error("Missing blueprint input: {0}")]
    MissingBlueprint(String),

    #[error("Payout address {0} is not revealed")]
    NotRevealed(String),

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: i64, available: i64 },

    #[error("Balance check rejected by extension: {0}")]
    BalanceCheckRejected(String),

    #[error("Payout run terminated by user during {0}")]
    TerminatedByUser(&'static str),

    #[error("Malformed distribution definition: {0}")]
    MalformedDistribution(String),

    #[error("Transactor resource limits unavailable: {0}")]
    LimitsUnavailable(String),

    #[error("{role} failed: {source}")]
    Collaborator {
        role: &'static str,
        #[source]
        source: CollaboratorError,
    },

    #[error("Accumulation error: {0}")]
    Accumulation(#[from] AccumulationError),

    #[error("Extension error: {0}")]
    Extension(#[from] ExtensionError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal invariant violated: {0}")]
    InvariantViolation(InvariantViolation),
}

impl PayoutError {
    /// Build an invariant violation with diagnostic metadata
    pub fn invariant(message: impl Into<String>, diagnostics: Value) -> Self {
        PayoutError::InvariantViolation(InvariantViolation {
            message: message.into(),
            diagnostics,
        })
    }

    /// Wrap a collaborator failure with the role that produced it
    pub fn collaborator(role: &'static str, source: CollaboratorError) -> Self {
        PayoutError::Collaborator { role, source }
    }

    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, PayoutError::InvariantViolation(_))
    }
}

pub type Result<T> = std::result::Result<T, PayoutError>;
