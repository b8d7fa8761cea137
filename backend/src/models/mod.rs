//! Domain models
//!
//! Chain snapshots, the candidate chain, recipes, blueprints and reports.

pub mod accumulated;
pub mod blueprint;
pub mod candidate;
pub mod delegator;
pub mod recipe;
pub mod report;
pub mod types;

pub use accumulated::{AccumulatedPayoutRecipe, AccumulationError, FieldMismatch};
pub use blueprint::{CyclePayoutBlueprint, CyclePayoutSummary};
pub use candidate::{
    CandidateWithBonds, CandidateWithBondsAndFee, CandidateWithSimulation, PayoutCandidate,
};
pub use delegator::{CycleRewardData, Delegator};
pub use recipe::{AccumulationKey, PayoutRecipe};
pub use report::{BatchResult, PayoutReport};
pub use types::{InvalidReason, OpLimits, PayoutKind, PayoutMode, TxKind};
