//! Protocol constants and small domain primitives shared by every stage.
//!
//! All money values are `i64` micro-units (mutez). Products that could
//! overflow are computed in `i128` before being narrowed back.

pub mod address;
pub mod math;

/// Maximum delegated balance a baker may accept per unit of own stake.
pub const DELEGATION_CAPACITY_FACTOR: i64 = 9;

/// Default number of transfers simulated together in one estimation call.
pub const DEFAULT_SIMULATION_BATCH_SIZE: usize = 50;

/// Amount sent by the marker transfers that frame every simulated batch.
pub const MARKER_TRANSFER_AMOUNT: i64 = 1;

/// Flat part of the minimal operation fee (mutez).
pub const MINIMAL_FEE_MUTEZ: i64 = 100;

/// Gas units paid by one mutez of fee (0.1 mutez per gas unit).
pub const GAS_UNITS_PER_FEE_MUTEZ: i64 = 10;

/// Fee charged per serialized byte (mutez).
pub const FEE_MUTEZ_PER_BYTE: i64 = 1;

/// Burn per byte of paid storage (mutez).
pub const STORAGE_COST_PER_BYTE: i64 = 250;

/// Storage paid when a transfer allocates a new implicit account.
pub const ALLOCATION_STORAGE_BYTES: i64 = 257;

/// Share of the protocol hard limits a batch may consume.
pub const BATCH_LIMIT_SAFETY_PERCENT: i64 = 95;

/// Bytes reserved in every batch for framing not covered by the size model.
pub const BATCH_SERIALIZATION_BUFFER: usize = 1_000;

/// Version attached to every extension hook payload.
pub const HOOK_PAYLOAD_VERSION: &str = "0.1";
