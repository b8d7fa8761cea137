//! Payout recipe model
//!
//! A recipe is the finalized, reportable unit produced by the generate
//! stage: one transfer (or one invalid entry) owed for one cycle.
//!
//! CRITICAL: All money values are i64 (mutez)

use crate::core::address;
use crate::models::candidate::CandidateWithSimulation;
use crate::models::types::{InvalidReason, OpLimits, PayoutKind, TxKind};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One reportable payout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutRecipe {
    pub baker: String,
    /// Delegator the payout belongs to (the baker for income and donations)
    pub delegator: String,
    pub cycle: i64,
    pub recipient: String,
    pub kind: PayoutKind,
    #[serde(default)]
    pub tx_kind: TxKind,
    #[serde(default)]
    pub fa_contract: Option<String>,
    #[serde(default)]
    pub fa_token_id: Option<u64>,
    pub delegated_balance: i64,
    #[serde(default)]
    pub staked_balance: i64,
    /// Amount transferred to the recipient (i64 mutez)
    pub amount: i64,
    pub fee_rate: f64,
    /// Baker fee collected from this delegator
    pub fee: i64,
    /// Estimated limits, absent until the transfer was estimated
    #[serde(default)]
    pub op_limits: Option<OpLimits>,
    #[serde(default)]
    pub note: String,
    pub is_valid: bool,
    #[serde(default)]
    pub invalid_reason: Option<InvalidReason>,
    #[serde(default)]
    pub is_baker_paying_tx_fee: bool,
}

/// Identity under which recipes of different cycles may be merged
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccumulationKey {
    pub recipient: String,
    pub delegator: String,
    pub kind: PayoutKind,
    pub tx_kind: TxKind,
    pub fa_contract: Option<String>,
    pub fa_token_id: Option<u64>,
    pub is_valid: bool,
}

impl PayoutRecipe {
    /// Finalize a delegator candidate into a recipe
    ///
    /// Invalid candidates keep their residual bonds in `amount` for
    /// visibility; they are never transferred.
    pub fn from_candidate(baker: &str, cycle: i64, candidate: &CandidateWithSimulation) -> Self {
        let base = candidate.base();
        let bonds = candidate.bonds();
        let is_valid = !candidate.is_invalid();

        Self {
            baker: baker.to_string(),
            delegator: base.source.clone(),
            cycle,
            recipient: base.recipient.clone(),
            kind: if is_valid {
                PayoutKind::DelegatorReward
            } else {
                PayoutKind::Invalid
            },
            tx_kind: bonds.tx_kind,
            fa_contract: bonds.fa_contract.clone(),
            fa_token_id: bonds.fa_token_id,
            delegated_balance: base.delegated_balance,
            staked_balance: base.staked_balance,
            amount: if is_valid {
                candidate.amount
            } else {
                bonds.bonds_amount
            },
            fee_rate: base.fee_rate,
            fee: candidate.candidate.fee,
            op_limits: candidate.op_limits,
            note: String::new(),
            is_valid,
            invalid_reason: base.invalid_reason,
            is_baker_paying_tx_fee: base.is_baker_paying_tx_fee,
        }
    }

    /// Income or donation transfer paid out of the baker's share
    pub fn baker_income(
        baker: &str,
        cycle: i64,
        recipient: &str,
        kind: PayoutKind,
        amount: i64,
    ) -> Self {
        Self {
            baker: baker.to_string(),
            delegator: baker.to_string(),
            cycle,
            recipient: recipient.to_string(),
            kind,
            tx_kind: TxKind::Tez,
            fa_contract: None,
            fa_token_id: None,
            delegated_balance: 0,
            staked_balance: 0,
            amount,
            fee_rate: 0.0,
            fee: 0,
            op_limits: None,
            note: String::new(),
            is_valid: true,
            invalid_reason: None,
            is_baker_paying_tx_fee: true,
        }
    }

    /// Mark invalid, keeping an earlier reason if one exists
    pub fn invalidate(&mut self, reason: InvalidReason) {
        if self.is_valid {
            self.is_valid = false;
            self.invalid_reason = Some(reason);
        }
    }

    /// Stable identifier used to match past reports
    pub fn id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.cycle.to_le_bytes());
        for part in [
            self.delegator.as_str(),
            self.recipient.as_str(),
            self.kind.as_str(),
            self.tx_kind.as_str(),
            self.fa_contract.as_deref().unwrap_or(""),
        ] {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        hasher.update(self.fa_token_id.unwrap_or(0).to_le_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn accumulation_key(&self) -> AccumulationKey {
        AccumulationKey {
            recipient: self.recipient.clone(),
            delegator: self.delegator.clone(),
            kind: self.kind,
            tx_kind: self.tx_kind,
            fa_contract: self.fa_contract.clone(),
            fa_token_id: self.fa_token_id,
            is_valid: self.is_valid,
        }
    }

    /// Transaction fee attached by estimation
    pub fn tx_fee(&self) -> i64 {
        self.op_limits.map(|l| l.transaction_fee).unwrap_or(0)
    }

    pub fn storage_limit(&self) -> i64 {
        self.op_limits.map(|l| l.storage_limit).unwrap_or(0)
    }

    pub fn total_gas(&self) -> i64 {
        self.op_limits.map(|l| l.total_gas()).unwrap_or(0)
    }

    /// Transfer invokes a contract (token transfer or KT destination)
    pub fn is_contract_call(&self) -> bool {
        self.tx_kind.is_fa() || address::is_contract(&self.recipient)
    }
}
