//! Draft operations and their size model
//!
//! A draft operation is the unsigned batch of transfers handed to the
//! collector for simulation and to the transactor for dispatch. The binary
//! encoding belongs to the chain client; this module only estimates the
//! serialized length, which is all estimation and batching need.
//!
//! # Size model
//!
//! ```text
//! operation = branch (32) + Σ content + signature (64)
//! content   = tag (1) + source (21) + zarith(fee, counter, gas, storage, amount)
//!           + destination (22) + parameters flag (1) + parameters
//! ```
//!
//! Zarith naturals take one byte per 7 bits of magnitude.

use crate::core::MARKER_TRANSFER_AMOUNT;
use crate::models::recipe::PayoutRecipe;
use crate::models::types::{OpLimits, TxKind};
use serde::{Deserialize, Serialize};

const BRANCH_BYTES: usize = 32;
const SIGNATURE_BYTES: usize = 64;
const CONTENT_TAG_BYTES: usize = 1;
const SOURCE_BYTES: usize = 21;
const DESTINATION_BYTES: usize = 22;
const PARAMETERS_FLAG_BYTES: usize = 1;
/// Entrypoint tag plus the 4-byte length prefix of the Micheline value
const PARAMETERS_HEADER_BYTES: usize = 5;
/// Micheline address literal: node tag, length prefix and 22 address bytes
const MICHELINE_ADDRESS_BYTES: usize = 27;
/// Prim/pair nodes wrapping the FA1.2 `(from, (to, value))` argument
const FA12_FRAMING_BYTES: usize = 6;
/// Sequence and pair nodes wrapping the FA2 `[(from, [(to, (id, amount))])]` argument
const FA2_FRAMING_BYTES: usize = 20;

/// Token call parameters of a transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "standard", rename_all = "snake_case")]
pub enum TransferParameters {
    Fa12 {
        from: String,
        to: String,
        amount: i64,
    },
    Fa2 {
        from: String,
        to: String,
        token_id: u64,
        amount: i64,
    },
}

impl TransferParameters {
    fn serialized_len(&self) -> usize {
        match self {
            TransferParameters::Fa12 { amount, .. } => {
                PARAMETERS_HEADER_BYTES
                    + FA12_FRAMING_BYTES
                    + 2 * MICHELINE_ADDRESS_BYTES
                    + 1
                    + zarith_len(*amount)
            }
            TransferParameters::Fa2 {
                token_id, amount, ..
            } => {
                PARAMETERS_HEADER_BYTES
                    + FA2_FRAMING_BYTES
                    + 2 * MICHELINE_ADDRESS_BYTES
                    + 2
                    + zarith_len(*token_id as i64)
                    + zarith_len(*amount)
            }
        }
    }
}

/// One transfer inside an operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferContent {
    pub source: String,
    pub destination: String,
    /// Native amount (zero for token transfers)
    pub amount: i64,
    #[serde(default)]
    pub fee: i64,
    #[serde(default)]
    pub counter: i64,
    #[serde(default)]
    pub gas_limit: i64,
    #[serde(default)]
    pub storage_limit: i64,
    #[serde(default)]
    pub parameters: Option<TransferParameters>,
}

impl TransferContent {
    pub fn tez(source: &str, destination: &str, amount: i64) -> Self {
        Self {
            source: source.to_string(),
            destination: destination.to_string(),
            amount,
            fee: 0,
            counter: 0,
            gas_limit: 0,
            storage_limit: 0,
            parameters: None,
        }
    }

    /// 1-mutez self transfer framing simulated batches
    pub fn marker(source: &str) -> Self {
        Self::tez(source, source, MARKER_TRANSFER_AMOUNT)
    }

    /// Transfer of `amount` to `recipient` in the given asset
    ///
    /// Token transfers call their FA contract; everything else is a native
    /// transfer.
    pub fn payout(
        source: &str,
        recipient: &str,
        amount: i64,
        tx_kind: TxKind,
        fa_contract: Option<&str>,
        fa_token_id: Option<u64>,
    ) -> Self {
        let contract = fa_contract.unwrap_or_default();
        match tx_kind {
            TxKind::Tez => Self::tez(source, recipient, amount),
            TxKind::Fa12 => Self {
                parameters: Some(TransferParameters::Fa12 {
                    from: source.to_string(),
                    to: recipient.to_string(),
                    amount,
                }),
                ..Self::tez(source, contract, 0)
            },
            TxKind::Fa2 => Self {
                parameters: Some(TransferParameters::Fa2 {
                    from: source.to_string(),
                    to: recipient.to_string(),
                    token_id: fa_token_id.unwrap_or(0),
                    amount,
                }),
                ..Self::tez(source, contract, 0)
            },
        }
    }

    /// Transfer paying `recipe` from `source`
    pub fn from_recipe(source: &str, recipe: &PayoutRecipe) -> Self {
        Self::payout(
            source,
            &recipe.recipient,
            recipe.amount,
            recipe.tx_kind,
            recipe.fa_contract.as_deref(),
            recipe.fa_token_id,
        )
    }

    /// Assign estimated limits
    pub fn with_limits(mut self, limits: &OpLimits) -> Self {
        self.fee = limits.transaction_fee;
        self.gas_limit = limits.total_gas();
        self.storage_limit = limits.storage_limit;
        self
    }

    pub fn serialized_len(&self) -> usize {
        CONTENT_TAG_BYTES
            + SOURCE_BYTES
            + zarith_len(self.fee)
            + zarith_len(self.counter)
            + zarith_len(self.gas_limit)
            + zarith_len(self.storage_limit)
            + zarith_len(self.amount)
            + DESTINATION_BYTES
            + PARAMETERS_FLAG_BYTES
            + self
                .parameters
                .as_ref()
                .map(|p| p.serialized_len())
                .unwrap_or(0)
    }
}

/// Unsigned operation carrying one or more transfers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftOperation {
    #[serde(default)]
    pub branch: String,
    pub contents: Vec<TransferContent>,
    #[serde(default)]
    pub signature: Option<String>,
}

impl DraftOperation {
    pub fn new(branch: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            contents: Vec::new(),
            signature: None,
        }
    }

    pub fn push(&mut self, content: TransferContent) {
        self.contents.push(content);
    }

    pub fn len(&self) -> usize {
        self.contents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }

    /// Estimated length of the signed binary encoding
    pub fn serialized_len(&self) -> usize {
        BRANCH_BYTES
            + SIGNATURE_BYTES
            + self
                .contents
                .iter()
                .map(TransferContent::serialized_len)
                .sum::<usize>()
    }
}

/// Bytes of a zarith-encoded natural
pub fn zarith_len(value: i64) -> usize {
    let mut magnitude = value.unsigned_abs() >> 7;
    let mut len = 1;
    while magnitude > 0 {
        magnitude >>= 7;
        len += 1;
    }
    len
}
