//! Enumerations and small value types shared across the data model.

use serde::{Deserialize, Serialize};

/// Role of a payout in the distribution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutKind {
    /// Reward owed to a delegator
    DelegatorReward,
    /// Share of the baker's own bonds sent to an income recipient
    BakerReward,
    /// Share of collected fees sent to an income recipient
    FeeIncome,
    /// Donation carved out of bonds and fees
    Donation,
    /// Payout that will not be paid
    Invalid,
}

impl PayoutKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutKind::DelegatorReward => "delegator_reward",
            PayoutKind::BakerReward => "baker_reward",
            PayoutKind::FeeIncome => "fee_income",
            PayoutKind::Donation => "donation",
            PayoutKind::Invalid => "invalid",
        }
    }
}

impl std::fmt::Display for PayoutKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Asset a payout is denominated in
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum TxKind {
    /// Native transfer
    #[default]
    #[serde(rename = "tez")]
    Tez,
    /// FA1.2 token transfer (contract call)
    #[serde(rename = "fa1.2")]
    Fa12,
    /// FA2 token transfer (contract call)
    #[serde(rename = "fa2")]
    Fa2,
}

impl TxKind {
    pub fn is_fa(&self) -> bool {
        matches!(self, TxKind::Fa12 | TxKind::Fa2)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TxKind::Tez => "tez",
            TxKind::Fa12 => "fa1.2",
            TxKind::Fa2 => "fa2",
        }
    }
}

impl std::fmt::Display for TxKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason a candidate or recipe is excluded from payment
///
/// Invalidity is data: it never aborts the pipeline and is reported to the
/// operator alongside the paid recipes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InvalidReason {
    Prefiltered,
    Ignored,
    InvalidAddress,
    LowBalance,
    Emptied,
    KtIgnored,
    RecipientTargetsPayout,
    ExcludedByPrefix,
    ZeroPayout,
    NotEnoughBondsForBakerFee,
    UnsupportedTxKind,
    FailedToEstimateTxCosts,
    NotEnoughBondsForTxFees,
    BelowMinimumPayout,
}

impl InvalidReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvalidReason::Prefiltered => "prefiltered",
            InvalidReason::Ignored => "ignored",
            InvalidReason::InvalidAddress => "invalid-address",
            InvalidReason::LowBalance => "low-balance",
            InvalidReason::Emptied => "emptied",
            InvalidReason::KtIgnored => "kt-ignored",
            InvalidReason::RecipientTargetsPayout => "recipient-targets-payout",
            InvalidReason::ExcludedByPrefix => "excluded-by-prefix",
            InvalidReason::ZeroPayout => "zero-payout",
            InvalidReason::NotEnoughBondsForBakerFee => "not-enough-bonds-for-baker-fee",
            InvalidReason::UnsupportedTxKind => "unsupported-tx-kind",
            InvalidReason::FailedToEstimateTxCosts => "failed-to-estimate-tx-costs",
            InvalidReason::NotEnoughBondsForTxFees => "not-enough-bonds-for-tx-fees",
            InvalidReason::BelowMinimumPayout => "below-minimum-payout",
        }
    }
}

impl std::fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which reward figures a cycle is paid from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutMode {
    /// Rewards actually earned on chain
    #[default]
    Actual,
    /// Rewards the baker would have earned with perfect participation
    Ideal,
}

/// Resource limits and fee assigned to one transfer by estimation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpLimits {
    pub transaction_fee: i64,
    pub storage_limit: i64,
    pub gas_limit: i64,
    pub deserialization_gas_limit: i64,
}

impl OpLimits {
    /// Gas the transfer consumes from the operation budget
    pub fn total_gas(&self) -> i64 {
        self.gas_limit + self.deserialization_gas_limit
    }

    /// Component-wise maximum, used when several estimates back one transfer
    pub fn max(&self, other: &OpLimits) -> OpLimits {
        OpLimits {
            transaction_fee: self.transaction_fee.max(other.transaction_fee),
            storage_limit: self.storage_limit.max(other.storage_limit),
            gas_limit: self.gas_limit.max(other.gas_limit),
            deserialization_gas_limit: self
                .deserialization_gas_limit
                .max(other.deserialization_gas_limit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_reason_serializes_kebab_case() {
        let json = serde_json::to_string(&InvalidReason::NotEnoughBondsForBakerFee).unwrap();
        assert_eq!(json, "\"not-enough-bonds-for-baker-fee\"");
        let json = serde_json::to_string(&InvalidReason::KtIgnored).unwrap();
        assert_eq!(json, "\"kt-ignored\"");
        assert_eq!(
            InvalidReason::FailedToEstimateTxCosts.to_string(),
            "failed-to-estimate-tx-costs"
        );
    }

    #[test]
    fn test_tx_kind_wire_names() {
        assert_eq!(serde_json::to_string(&TxKind::Fa12).unwrap(), "\"fa1.2\"");
        let kind: TxKind = serde_json::from_str("\"fa2\"").unwrap();
        assert_eq!(kind, TxKind::Fa2);
        assert!(kind.is_fa());
        assert!(!TxKind::Tez.is_fa());
    }

    #[test]
    fn test_op_limits_max() {
        let a = OpLimits {
            transaction_fee: 500,
            storage_limit: 0,
            gas_limit: 1_500,
            deserialization_gas_limit: 20,
        };
        let b = OpLimits {
            transaction_fee: 400,
            storage_limit: 257,
            gas_limit: 1_600,
            deserialization_gas_limit: 10,
        };
        let m = a.max(&b);
        assert_eq!(m, b.max(&a));
        assert_eq!(m.transaction_fee, 500);
        assert_eq!(m.storage_limit, 257);
        assert_eq!(m.total_gas(), 1_620);
    }
}
