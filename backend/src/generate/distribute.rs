//! Bond and fee distribution
//!
//! Splits a cycle's delegated reward pool between the baker and its
//! delegators, collects the baker's fee, and carves donations and income
//! transfers out of the baker's share.
//!
//! # Critical Invariants
//!
//! 1. **Conservation**: `Σ delegator bonds + baker bonds == total rewards`.
//!    Rounding remainders always land in the baker's bonds.
//! 2. **Multiply then divide**: every proportional share is computed as
//!    `value × part / whole` in `i128` ([`mul_div`]).
//! 3. **Invalid is final**: an invalid candidate keeps its reason and its
//!    bonds are folded into the collected fee.

use crate::config::{BelowMinimumBalanceDestination, PayoutConfiguration};
use crate::core::math::{apply_percentage, apply_rate, mul_div};
use crate::core::DELEGATION_CAPACITY_FACTOR;
use crate::error::{PayoutError, Result};
use crate::models::{
    CandidateWithBonds, CandidateWithBondsAndFee, CycleRewardData, InvalidReason,
    PayoutCandidate, PayoutKind, TxKind,
};
use std::collections::BTreeMap;

/// Whether a candidate takes part in the proportional split
///
/// Invalid candidates still receive bonds (which are then folded into the
/// baker's fee) unless they were filtered out by list, or fall below the
/// minimum balance while that share is redistributed to everyone.
pub fn is_eligible(candidate: &PayoutCandidate, configuration: &PayoutConfiguration) -> bool {
    match candidate.invalid_reason {
        None => true,
        Some(InvalidReason::Prefiltered) | Some(InvalidReason::Ignored) => false,
        Some(InvalidReason::LowBalance) => {
            configuration.delegators.below_minimum_balance_destination
                != BelowMinimumBalanceDestination::Everyone
        }
        Some(_) => true,
    }
}

/// Outcome of the bond split
#[derive(Debug, Clone, PartialEq)]
pub struct BondDistribution {
    /// Delegated reward pool of the cycle
    pub total_rewards: i64,
    /// Baker's own share, including rounding remainders
    pub baker_bonds: i64,
    pub candidates: Vec<CandidateWithBonds>,
}

/// Split the cycle's reward pool
///
/// # Formula
///
/// ```text
/// max_delegatable = effective_staked × 9
/// denominator     = baker_delegated + effective_delegated
///                   (clamped to max_delegatable when overdelegated
///                    and protection is enabled)
/// baker_bonds     = total × baker_delegated / denominator
/// share(d)        = (total − baker_bonds) × balance(d) / effective_delegated
/// ```
pub fn distribute_bonds(
    reward_data: &CycleRewardData,
    candidates: Vec<PayoutCandidate>,
    configuration: &PayoutConfiguration,
) -> BondDistribution {
    let total_rewards = reward_data.total_delegated_rewards(configuration.payout_mode);
    let max_delegatable = reward_data.effective_staked_balance() * DELEGATION_CAPACITY_FACTOR;

    let effective_delegated: i64 = candidates
        .iter()
        .filter(|c| is_eligible(c, configuration))
        .map(|c| c.delegated_balance)
        .sum();

    let mut baker_delegated = reward_data.own_delegated_balance;
    let mut denominator = baker_delegated + effective_delegated;
    if configuration.overdelegation.is_protection_enabled && denominator > max_delegatable {
        denominator = max_delegatable;
        baker_delegated = baker_delegated.min(max_delegatable);
    }

    let mut baker_bonds = if denominator > 0 {
        mul_div(total_rewards, baker_delegated, denominator)
    } else {
        total_rewards
    };
    let delegators_pool = total_rewards - baker_bonds;

    let candidates: Vec<CandidateWithBonds> = candidates
        .into_iter()
        .map(|c| {
            let bonds = if is_eligible(&c, configuration) {
                mul_div(delegators_pool, c.delegated_balance, effective_delegated)
            } else {
                0
            };
            c.with_bonds(bonds)
        })
        .collect();

    let distributed: i64 = candidates.iter().map(|c| c.bonds_amount).sum();
    baker_bonds += delegators_pool - distributed;

    BondDistribution {
        total_rewards,
        baker_bonds,
        candidates,
    }
}

/// Token payouts need a contract to call
pub fn check_tx_kind(candidate: CandidateWithBonds) -> CandidateWithBonds {
    if candidate.tx_kind.is_fa() && candidate.fa_contract.is_none() {
        candidate.invalidated(InvalidReason::UnsupportedTxKind)
    } else {
        candidate
    }
}

/// Collect the baker's fee from every candidate
///
/// Only native (tez) rewards pay a fee. Candidates left with nothing become
/// invalid with `not-enough-bonds-for-baker-fee`; invalid candidates have
/// their whole bonds reclassified as fee.
pub fn collect_baker_fees(candidates: Vec<CandidateWithBonds>) -> Vec<CandidateWithBondsAndFee> {
    candidates.into_iter().map(collect_baker_fee).collect()
}

fn collect_baker_fee(candidate: CandidateWithBonds) -> CandidateWithBondsAndFee {
    if candidate.is_invalid() {
        let bonds = candidate.bonds_amount;
        return candidate.with_fee(bonds);
    }
    if candidate.tx_kind != TxKind::Tez {
        return candidate.with_fee(0);
    }

    let bonds = candidate.bonds_amount;
    let fee = apply_rate(bonds, candidate.candidate.fee_rate);
    if bonds - fee <= 0 {
        return candidate
            .invalidated(InvalidReason::NotEnoughBondsForBakerFee)
            .with_fee(bonds);
    }
    candidate.with_fee(fee)
}

/// One transfer out of the baker's income
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomeTransfer {
    pub recipient: String,
    pub kind: PayoutKind,
    pub amount: i64,
}

/// Baker income after donations, and the transfers it funds
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncomeDistribution {
    pub bond_income: i64,
    pub fee_income: i64,
    pub donated_bonds: i64,
    pub donated_fees: i64,
    pub transfers: Vec<IncomeTransfer>,
}

/// Carve donations out of the baker's bonds and fees, then split the rest
///
/// Donations are split across destinations by percentage. When the
/// donation map assigns exactly 100%, the last destination absorbs the
/// rounding; otherwise the unassigned share stays with the baker and is
/// not counted as donated. Income maps only assign their percentages; the
/// unassigned rest stays with the baker. Transfers to `payout_address` and
/// zero amounts are skipped.
///
/// # Errors
/// [`PayoutError::MalformedDistribution`] when a percentage map sums above
/// 100.
pub fn distribute_income(
    baker_bonds: i64,
    collected_fees: i64,
    configuration: &PayoutConfiguration,
    payout_address: &str,
) -> Result<IncomeDistribution> {
    let recipients = &configuration.income_recipients;
    check_distribution("bonds", &recipients.bonds)?;
    check_distribution("fees", &recipients.fees)?;
    check_distribution("donations", &recipients.donations)?;

    let mut donated_bonds = apply_rate(baker_bonds, recipients.donate_bonds);
    let mut donated_fees = apply_rate(collected_fees, recipients.donate_fees);

    let mut transfers = Vec::new();
    let mut push = |recipient: &str, kind: PayoutKind, amount: i64| {
        if amount > 0 && recipient != payout_address {
            transfers.push(IncomeTransfer {
                recipient: recipient.to_string(),
                kind,
                amount,
            });
        }
    };

    let donated_total = donated_bonds + donated_fees;
    let complete = is_complete(&recipients.donations);
    let destinations = recipients.donations.len();
    let mut donation_left = donated_total;
    for (i, (recipient, percentage)) in recipients.donations.iter().enumerate() {
        let amount = if complete && i + 1 == destinations {
            donation_left
        } else {
            apply_percentage(donated_total, *percentage)
        };
        donation_left -= amount;
        push(recipient, PayoutKind::Donation, amount);
    }

    // unassigned donation share goes back to the baker, split like the carve
    if donation_left > 0 {
        let returned_bonds = mul_div(donation_left, donated_bonds, donated_total);
        donated_bonds -= returned_bonds;
        donated_fees -= donation_left - returned_bonds;
    }
    let bond_income = baker_bonds - donated_bonds;
    let fee_income = collected_fees - donated_fees;

    for (recipient, percentage) in &recipients.bonds {
        push(recipient, PayoutKind::BakerReward, apply_percentage(bond_income, *percentage));
    }
    for (recipient, percentage) in &recipients.fees {
        push(recipient, PayoutKind::FeeIncome, apply_percentage(fee_income, *percentage));
    }

    Ok(IncomeDistribution {
        bond_income,
        fee_income,
        donated_bonds,
        donated_fees,
        transfers,
    })
}

/// Percentage map assigns the whole amount (up to float noise)
fn is_complete(map: &BTreeMap<String, f64>) -> bool {
    let total: f64 = map.values().sum();
    (total - 100.0).abs() < 1e-9
}

/// Validate that a percentage map assigns at most 100%
pub fn check_distribution(name: &str, map: &BTreeMap<String, f64>) -> Result<()> {
    let total: f64 = map.values().sum();
    if total > 100.0 || map.values().any(|p| *p < 0.0) {
        return Err(PayoutError::MalformedDistribution(format!(
            "{} percentages sum to {}",
            name, total
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Delegator;

    const BAKER: &str = "tz1burnburnburnburnburnburnburjAYjjX";

    fn candidate(address: &str, balance: i64) -> PayoutCandidate {
        PayoutCandidate {
            source: address.to_string(),
            recipient: address.to_string(),
            fee_rate: 0.05,
            delegated_balance: balance,
            staked_balance: 0,
            is_emptied: false,
            invalid_reason: None,
            is_baker_paying_tx_fee: false,
            is_baker_paying_allocation_tx_fee: false,
        }
    }

    fn reward_data() -> CycleRewardData {
        CycleRewardData {
            cycle: 700,
            own_staked_balance: 500_000,
            own_delegated_balance: 500_000,
            external_delegated_balance: 19_000_000,
            block_delegated_rewards: 1_000,
            endorsement_delegated_rewards: 10_000,
            delegators: vec![Delegator::new("tz1a", 19_000_000)],
            ..Default::default()
        }
    }

    #[test]
    fn test_overdelegation_protection() {
        let mut config = PayoutConfiguration::default();
        let dist = distribute_bonds(&reward_data(), vec![candidate("tz1a", 19_000_000)], &config);
        assert_eq!(dist.baker_bonds, 1_222);
        assert_eq!(dist.candidates[0].bonds_amount, 11_000 - 1_222);

        config.overdelegation.is_protection_enabled = false;
        let dist = distribute_bonds(&reward_data(), vec![candidate("tz1a", 19_000_000)], &config);
        assert_eq!(dist.baker_bonds, 282);
    }

    #[test]
    fn test_rounding_remainder_goes_to_baker() {
        let config = PayoutConfiguration::default();
        let mut data = reward_data();
        data.own_staked_balance = 100_000_000;
        let candidates = vec![
            candidate("tz1a", 3_333_333),
            candidate("tz1b", 3_333_333),
            candidate("tz1c", 3_333_334),
        ];
        let dist = distribute_bonds(&data, candidates, &config);
        let delegated: i64 = dist.candidates.iter().map(|c| c.bonds_amount).sum();
        assert_eq!(delegated + dist.baker_bonds, dist.total_rewards);
    }

    #[test]
    fn test_ignored_candidates_get_nothing() {
        let config = PayoutConfiguration::default();
        let candidates = vec![
            candidate("tz1a", 9_500_000),
            candidate("tz1b", 9_500_000).invalidated(InvalidReason::Ignored),
        ];
        let dist = distribute_bonds(&reward_data(), candidates, &config);
        assert_eq!(dist.candidates[1].bonds_amount, 0);
        assert!(dist.candidates[0].bonds_amount > 0);
    }

    #[test]
    fn test_low_balance_destination() {
        let mut config = PayoutConfiguration::default();
        let low = candidate("tz1b", 1_000).invalidated(InvalidReason::LowBalance);
        assert!(is_eligible(&low, &config));
        config.delegators.below_minimum_balance_destination = BelowMinimumBalanceDestination::Everyone;
        assert!(!is_eligible(&low, &config));
    }

    #[test]
    fn test_fee_collection() {
        let collected = collect_baker_fees(vec![candidate("tz1a", 1).with_bonds(10_000_000)]);
        assert_eq!(collected[0].fee, 500_000);
        assert_eq!(collected[0].bonds_amount(), 9_500_000);
        assert!(!collected[0].is_invalid());

        let mut full = candidate("tz1a", 1);
        full.fee_rate = 1.0;
        let collected = collect_baker_fees(vec![full.with_bonds(10_000_000)]);
        assert_eq!(collected[0].fee, 10_000_000);
        assert_eq!(collected[0].bonds_amount(), 0);
        assert_eq!(
            collected[0].base().invalid_reason,
            Some(InvalidReason::NotEnoughBondsForBakerFee)
        );
    }

    #[test]
    fn test_invalid_and_token_fees() {
        let invalid = candidate("tz1a", 1)
            .invalidated(InvalidReason::Emptied)
            .with_bonds(7_000);
        let mut token = candidate("tz1b", 1).with_bonds(7_000);
        token.tx_kind = TxKind::Fa2;
        token.fa_contract = Some("KT1token".to_string());

        let collected = collect_baker_fees(vec![invalid, token]);
        assert_eq!(collected[0].fee, 7_000);
        assert_eq!(collected[0].bonds_amount(), 0);
        assert_eq!(collected[1].fee, 0);
        assert_eq!(collected[1].bonds_amount(), 7_000);
    }

    #[test]
    fn test_income_and_donations() {
        let mut config = PayoutConfiguration::default();
        let donor = "tz1ZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZ";
        let partner = "tz1YYYYYYYYYYYYYYYYYYYYYYYYYYYYYYYYY";
        config.income_recipients.donate_bonds = 0.1;
        config.income_recipients.donate_fees = 0.1;
        config.income_recipients.donations.insert(donor.to_string(), 100.0);
        config.income_recipients.bonds.insert(partner.to_string(), 50.0);
        config.income_recipients.fees.insert(BAKER.to_string(), 100.0);

        let income = distribute_income(1_000, 500, &config, BAKER).unwrap();
        assert_eq!(income.donated_bonds, 100);
        assert_eq!(income.donated_fees, 50);
        assert_eq!(income.bond_income, 900);
        assert_eq!(income.fee_income, 450);
        // fee income targets the payout address and is skipped
        assert_eq!(
            income.transfers,
            vec![
                IncomeTransfer {
                    recipient: donor.to_string(),
                    kind: PayoutKind::Donation,
                    amount: 150,
                },
                IncomeTransfer {
                    recipient: partner.to_string(),
                    kind: PayoutKind::BakerReward,
                    amount: 450,
                },
            ]
        );
    }

    #[test]
    fn test_partial_donation_map_pays_each_share() {
        let mut config = PayoutConfiguration::default();
        let first = "tz1YYYYYYYYYYYYYYYYYYYYYYYYYYYYYYYYY";
        let second = "tz1ZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZ";
        config.income_recipients.donate_bonds = 0.1;
        config.income_recipients.donations.insert(first.to_string(), 50.0);
        config.income_recipients.donations.insert(second.to_string(), 30.0);

        let income = distribute_income(1_000, 0, &config, BAKER).unwrap();
        let amounts: Vec<(&str, i64)> = income
            .transfers
            .iter()
            .map(|t| (t.recipient.as_str(), t.amount))
            .collect();
        assert_eq!(amounts, vec![(first, 50), (second, 30)]);
        // the unassigned 20% stays with the baker
        assert_eq!(income.donated_bonds, 80);
        assert_eq!(income.bond_income, 920);
        assert_eq!(income.bond_income + income.donated_bonds, 1_000);
    }

    #[test]
    fn test_complete_donation_map_gives_rounding_to_last() {
        let mut config = PayoutConfiguration::default();
        let first = "tz1YYYYYYYYYYYYYYYYYYYYYYYYYYYYYYYYY";
        let second = "tz1ZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZ";
        config.income_recipients.donate_bonds = 0.1;
        config.income_recipients.donations.insert(first.to_string(), 40.0);
        config.income_recipients.donations.insert(second.to_string(), 60.0);

        let income = distribute_income(1_010, 0, &config, BAKER).unwrap();
        let amounts: Vec<i64> = income.transfers.iter().map(|t| t.amount).collect();
        assert_eq!(amounts, vec![40, 61]);
        assert_eq!(income.donated_bonds, 101);
    }

    #[test]
    fn test_malformed_distribution() {
        let mut config = PayoutConfiguration::default();
        config.income_recipients.fees.insert("a".to_string(), 70.0);
        config.income_recipients.fees.insert("b".to_string(), 40.0);
        let err = distribute_income(1_000, 500, &config, BAKER).unwrap_err();
        assert!(matches!(err, PayoutError::MalformedDistribution(_)));
    }
}
