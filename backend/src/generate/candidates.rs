//! Candidate generation and validation
//!
//! Builds one [`PayoutCandidate`] per delegator, applying per-delegator
//! overrides over the global defaults, then runs the validator chain.
//!
//! # Validator chain
//!
//! Validators run in a fixed order and the first failure wins:
//!
//! 1. prefiltered (not in a non-empty prefilter list)
//! 2. ignored
//! 3. invalid recipient address
//! 4. below minimum balance
//! 5. emptied account (when `ignore_empty_accounts`)
//! 6. contract recipient (when `ignore_kt`)
//! 7. recipient is the baker or the payout address
//! 8. recipient matches an excluded prefix
//!
//! Candidates that arrive already invalid are left untouched.

use crate::config::PayoutConfiguration;
use crate::core::address;
use crate::models::{CycleRewardData, Delegator, InvalidReason, PayoutCandidate};

/// Ambient facts validators look at besides the candidate
pub struct ValidationContext<'a> {
    pub configuration: &'a PayoutConfiguration,
    /// Address the payouts are sent from
    pub payout_address: &'a str,
}

/// One link of the validator chain
pub struct Validator {
    pub name: &'static str,
    pub check: fn(&PayoutCandidate, &ValidationContext) -> Option<InvalidReason>,
}

/// Validators in evaluation order
pub const VALIDATORS: [Validator; 8] = [
    Validator {
        name: "prefiltered",
        check: check_prefiltered,
    },
    Validator {
        name: "ignored",
        check: check_ignored,
    },
    Validator {
        name: "recipient_address",
        check: check_recipient_address,
    },
    Validator {
        name: "minimum_balance",
        check: check_minimum_balance,
    },
    Validator {
        name: "emptied",
        check: check_emptied,
    },
    Validator {
        name: "kt_recipient",
        check: check_kt_recipient,
    },
    Validator {
        name: "recipient_targets_payout",
        check: check_recipient_targets_payout,
    },
    Validator {
        name: "excluded_prefix",
        check: check_excluded_prefix,
    },
];

fn check_prefiltered(c: &PayoutCandidate, ctx: &ValidationContext) -> Option<InvalidReason> {
    let prefilter = &ctx.configuration.delegators.prefilter;
    (!prefilter.is_empty() && !prefilter.contains(&c.source)).then_some(InvalidReason::Prefiltered)
}

fn check_ignored(c: &PayoutCandidate, ctx: &ValidationContext) -> Option<InvalidReason> {
    ctx.configuration
        .delegators
        .ignore
        .contains(&c.source)
        .then_some(InvalidReason::Ignored)
}

fn check_recipient_address(c: &PayoutCandidate, _: &ValidationContext) -> Option<InvalidReason> {
    (!address::is_valid_address(&c.recipient)).then_some(InvalidReason::InvalidAddress)
}

fn check_minimum_balance(c: &PayoutCandidate, ctx: &ValidationContext) -> Option<InvalidReason> {
    (c.delegated_balance < ctx.configuration.delegators.minimum_balance)
        .then_some(InvalidReason::LowBalance)
}

fn check_emptied(c: &PayoutCandidate, ctx: &ValidationContext) -> Option<InvalidReason> {
    (ctx.configuration.payouts.ignore_empty_accounts && c.is_emptied)
        .then_some(InvalidReason::Emptied)
}

fn check_kt_recipient(c: &PayoutCandidate, ctx: &ValidationContext) -> Option<InvalidReason> {
    (ctx.configuration.payouts.ignore_kt && address::is_contract(&c.recipient))
        .then_some(InvalidReason::KtIgnored)
}

fn check_recipient_targets_payout(
    c: &PayoutCandidate,
    ctx: &ValidationContext,
) -> Option<InvalidReason> {
    (c.recipient == ctx.configuration.baker || c.recipient == ctx.payout_address)
        .then_some(InvalidReason::RecipientTargetsPayout)
}

fn check_excluded_prefix(c: &PayoutCandidate, ctx: &ValidationContext) -> Option<InvalidReason> {
    ctx.configuration
        .payouts
        .excluded_prefixes
        .iter()
        .any(|prefix| c.recipient.starts_with(prefix.as_str()))
        .then_some(InvalidReason::ExcludedByPrefix)
}

/// Run the validator chain; the first failing validator marks the candidate
pub fn validate_candidate(candidate: PayoutCandidate, ctx: &ValidationContext) -> PayoutCandidate {
    if candidate.is_invalid() {
        return candidate;
    }
    match VALIDATORS.iter().find_map(|v| (v.check)(&candidate, ctx)) {
        Some(reason) => candidate.invalidated(reason),
        None => candidate,
    }
}

/// Draft candidate for `delegator` with overrides applied
pub fn candidate_for(delegator: &Delegator, configuration: &PayoutConfiguration) -> PayoutCandidate {
    let ov = configuration.delegator_override(&delegator.address);
    let payouts = &configuration.payouts;

    let mut delegated_balance = delegator.delegated_balance;
    if let Some(max) = ov.and_then(|o| o.max_balance) {
        delegated_balance = delegated_balance.min(max);
    }

    PayoutCandidate {
        source: delegator.address.clone(),
        recipient: ov
            .and_then(|o| o.recipient.clone())
            .unwrap_or_else(|| delegator.address.clone()),
        fee_rate: ov.and_then(|o| o.fee).unwrap_or(configuration.fee_rate),
        delegated_balance,
        staked_balance: delegator.staked_balance,
        is_emptied: delegator.emptied,
        invalid_reason: None,
        is_baker_paying_tx_fee: ov
            .and_then(|o| o.is_baker_paying_tx_fee)
            .unwrap_or(payouts.is_baker_paying_tx_fee),
        is_baker_paying_allocation_tx_fee: ov
            .and_then(|o| o.is_baker_paying_allocation_tx_fee)
            .unwrap_or(payouts.is_baker_paying_allocation_tx_fee),
    }
}

/// Candidates for every delegator of the cycle, validated
pub fn generate_candidates(
    reward_data: &CycleRewardData,
    ctx: &ValidationContext,
) -> Vec<PayoutCandidate> {
    reward_data
        .delegators
        .iter()
        .map(|d| validate_candidate(candidate_for(d, ctx.configuration), ctx))
        .collect()
}
