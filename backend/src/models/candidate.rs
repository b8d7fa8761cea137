//! Payout candidate and its decorated stages
//!
//! A candidate moves through the generate stage as a chain of value types,
//! each embedding the previous one:
//!
//! ```text
//! PayoutCandidate
//!   → CandidateWithBonds          (+ bonds, tx kind, token)
//!     → CandidateWithBondsAndFee  (+ baker fee)
//!       → CandidateWithSimulation (+ op limits, burns, final amount)
//! ```
//!
//! Every transform consumes the previous stage, so history is kept in the
//! embedded value and no stage mutates another's fields. Serialization
//! flattens the chain, which is the shape extension hooks receive.
//!
//! # Critical Invariants
//!
//! - The first invalid reason wins: `invalidated` never overwrites it.
//! - Collecting a fee moves value out of `bonds_amount` into `fee`; the sum
//!   of both is preserved by every transform.

use crate::models::types::{InvalidReason, OpLimits, TxKind};
use serde::{Deserialize, Serialize};

/// Draft payout for one delegator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutCandidate {
    /// Delegator the reward is owed to
    pub source: String,
    /// Address the reward is sent to
    pub recipient: String,
    pub fee_rate: f64,
    pub delegated_balance: i64,
    pub staked_balance: i64,
    #[serde(default)]
    pub is_emptied: bool,
    #[serde(default)]
    pub invalid_reason: Option<InvalidReason>,
    pub is_baker_paying_tx_fee: bool,
    pub is_baker_paying_allocation_tx_fee: bool,
}

impl PayoutCandidate {
    pub fn is_invalid(&self) -> bool {
        self.invalid_reason.is_some()
    }

    /// Mark invalid unless an earlier reason was already recorded
    pub fn invalidated(mut self, reason: InvalidReason) -> Self {
        if self.invalid_reason.is_none() {
            self.invalid_reason = Some(reason);
        }
        self
    }

    /// Attach the native bonds share computed by the distributor
    pub fn with_bonds(self, bonds_amount: i64) -> CandidateWithBonds {
        CandidateWithBonds {
            candidate: self,
            bonds_amount,
            tx_kind: TxKind::Tez,
            fa_contract: None,
            fa_token_id: None,
        }
    }
}

/// Candidate with its gross reward share
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateWithBonds {
    #[serde(flatten)]
    pub candidate: PayoutCandidate,
    pub bonds_amount: i64,
    #[serde(default)]
    pub tx_kind: TxKind,
    #[serde(default)]
    pub fa_contract: Option<String>,
    #[serde(default)]
    pub fa_token_id: Option<u64>,
}

impl CandidateWithBonds {
    pub fn base(&self) -> &PayoutCandidate {
        &self.candidate
    }

    pub fn is_invalid(&self) -> bool {
        self.candidate.is_invalid()
    }

    pub fn invalidated(mut self, reason: InvalidReason) -> Self {
        self.candidate = self.candidate.invalidated(reason);
        self
    }

    /// Collect `fee` out of the bonds
    pub fn with_fee(mut self, fee: i64) -> CandidateWithBondsAndFee {
        self.bonds_amount -= fee;
        CandidateWithBondsAndFee {
            candidate: self,
            fee,
        }
    }
}

/// Candidate after the baker's fee has been collected
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateWithBondsAndFee {
    #[serde(flatten)]
    pub candidate: CandidateWithBonds,
    pub fee: i64,
}

impl CandidateWithBondsAndFee {
    pub fn base(&self) -> &PayoutCandidate {
        self.candidate.base()
    }

    pub fn bonds_amount(&self) -> i64 {
        self.candidate.bonds_amount
    }

    pub fn is_invalid(&self) -> bool {
        self.candidate.is_invalid()
    }

    pub fn invalidated(mut self, reason: InvalidReason) -> Self {
        self.candidate = self.candidate.invalidated(reason);
        self
    }

    /// Apply estimated transaction costs.
    ///
    /// Costs the recipient pays are deducted from the bonds; when nothing
    /// is left the candidate becomes invalid with
    /// `not-enough-bonds-for-tx-fees`.
    pub fn with_simulation(
        self,
        op_limits: OpLimits,
        allocation_burn: i64,
        storage_burn: i64,
    ) -> CandidateWithSimulation {
        let base = self.base();
        let mut amount = self.bonds_amount();
        if !base.is_baker_paying_tx_fee {
            amount -= op_limits.transaction_fee + storage_burn;
        }
        if !base.is_baker_paying_allocation_tx_fee {
            amount -= allocation_burn;
        }

        let simulated = CandidateWithSimulation {
            candidate: self,
            op_limits: Some(op_limits),
            allocation_burn,
            storage_burn,
            amount,
        };
        if amount <= 0 {
            simulated.invalidated(InvalidReason::NotEnoughBondsForTxFees)
        } else {
            simulated
        }
    }

    /// Carry the candidate forward without estimation (already invalid)
    pub fn without_simulation(self) -> CandidateWithSimulation {
        let amount = self.bonds_amount();
        CandidateWithSimulation {
            candidate: self,
            op_limits: None,
            allocation_burn: 0,
            storage_burn: 0,
            amount,
        }
    }
}

/// Candidate with estimated limits and the amount that will be sent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateWithSimulation {
    #[serde(flatten)]
    pub candidate: CandidateWithBondsAndFee,
    #[serde(default)]
    pub op_limits: Option<OpLimits>,
    #[serde(default)]
    pub allocation_burn: i64,
    #[serde(default)]
    pub storage_burn: i64,
    /// Amount transferred to the recipient
    pub amount: i64,
}

impl CandidateWithSimulation {
    pub fn base(&self) -> &PayoutCandidate {
        self.candidate.base()
    }

    pub fn bonds(&self) -> &CandidateWithBonds {
        &self.candidate.candidate
    }

    pub fn is_invalid(&self) -> bool {
        self.candidate.is_invalid()
    }

    pub fn invalidated(mut self, reason: InvalidReason) -> Self {
        self.candidate = self.candidate.invalidated(reason);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate() -> PayoutCandidate {
        PayoutCandidate {
            source: "tz1delegator".to_string(),
            recipient: "tz1delegator".to_string(),
            fee_rate: 0.05,
            delegated_balance: 1_000_000,
            staked_balance: 0,
            is_emptied: false,
            invalid_reason: None,
            is_baker_paying_tx_fee: false,
            is_baker_paying_allocation_tx_fee: false,
        }
    }

    fn limits(fee: i64) -> OpLimits {
        OpLimits {
            transaction_fee: fee,
            storage_limit: 0,
            gas_limit: 1_000,
            deserialization_gas_limit: 10,
        }
    }

    #[test]
    fn test_first_invalid_reason_wins() {
        let c = candidate()
            .invalidated(InvalidReason::Ignored)
            .invalidated(InvalidReason::LowBalance);
        assert_eq!(c.invalid_reason, Some(InvalidReason::Ignored));
    }

    #[test]
    fn test_with_fee_preserves_total() {
        let c = candidate().with_bonds(10_000).with_fee(500);
        assert_eq!(c.bonds_amount(), 9_500);
        assert_eq!(c.bonds_amount() + c.fee, 10_000);
    }

    #[test]
    fn test_recipient_pays_tx_costs() {
        let c = candidate().with_bonds(10_000).with_fee(0).with_simulation(limits(400), 64_250, 0);
        // fee and allocation burn both deducted
        assert!(c.is_invalid());
        assert_eq!(c.base().invalid_reason, Some(InvalidReason::NotEnoughBondsForTxFees));

        let c = candidate().with_bonds(10_000).with_fee(0).with_simulation(limits(400), 0, 0);
        assert!(!c.is_invalid());
        assert_eq!(c.amount, 9_600);
    }

    #[test]
    fn test_baker_pays_tx_costs() {
        let mut base = candidate();
        base.is_baker_paying_tx_fee = true;
        base.is_baker_paying_allocation_tx_fee = true;
        let c = base.with_bonds(10_000).with_fee(0).with_simulation(limits(400), 64_250, 500);
        assert!(!c.is_invalid());
        assert_eq!(c.amount, 10_000);
    }

    #[test]
    fn test_serialization_flattens_chain() {
        let c = candidate().with_bonds(10_000).with_fee(500);
        let value = serde_json::to_value(&c).unwrap();
        assert_eq!(value["recipient"], "tz1delegator");
        assert_eq!(value["bonds_amount"], 9_500);
        assert_eq!(value["fee"], 500);
        assert_eq!(value["tx_kind"], "tez");

        let back: CandidateWithBondsAndFee = serde_json::from_value(value).unwrap();
        assert_eq!(back, c);
    }
}
