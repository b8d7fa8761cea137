//! Orchestrator - payout engine facade
//!
//! See `engine.rs` for the full implementation.

pub mod engine;

pub use engine::PayoutEngine;
