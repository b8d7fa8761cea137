//! Cross-cycle accumulation
//!
//! When several unpaid cycles are paid in one run, recipes owed to the same
//! recipient under the same identity are merged into one transfer. Groups
//! keep the order in which their first member appeared.

use crate::chain::TransferContent;
use crate::error::Result;
use crate::estimation::minimal_fee;
use crate::models::{AccumulatedPayoutRecipe, AccumulationKey, PayoutRecipe};
use std::collections::HashMap;
use tracing::debug;

/// Wrap each recipe on its own (accumulation disabled)
pub fn wrap_payouts(recipes: Vec<PayoutRecipe>) -> Vec<AccumulatedPayoutRecipe> {
    recipes
        .into_iter()
        .map(AccumulatedPayoutRecipe::from_recipe)
        .collect()
}

/// Merge recipes sharing an [`AccumulationKey`]
///
/// The first recipe of a group becomes the representative; the others are
/// folded into it with [`AccumulatedPayoutRecipe::add`].
pub fn accumulate_payouts(recipes: Vec<PayoutRecipe>) -> Result<Vec<AccumulatedPayoutRecipe>> {
    let input = recipes.len();
    let mut index: HashMap<AccumulationKey, usize> = HashMap::new();
    let mut accumulated: Vec<AccumulatedPayoutRecipe> = Vec::new();

    for recipe in recipes {
        let key = recipe.accumulation_key();
        match index.get(&key) {
            Some(&i) => accumulated[i].add(AccumulatedPayoutRecipe::from_recipe(recipe))?,
            None => {
                index.insert(key, accumulated.len());
                accumulated.push(AccumulatedPayoutRecipe::from_recipe(recipe));
            }
        }
    }

    debug!(input, output = accumulated.len(), "accumulated payouts");
    Ok(accumulated)
}

/// Refund surplus tx fees of every merged payout
pub fn refund_surplus_tx_fees(payouts: &mut [AccumulatedPayoutRecipe]) {
    for payout in payouts.iter_mut() {
        payout.refund_surplus_tx_fee();
    }
}

/// Raise the fee of merged payouts to cover their merged encoding
///
/// Merging keeps the largest constituent limits, but the summed amount can
/// encode to more bytes than any constituent did. The fee is raised to the
/// minimal fee of the merged transfer. When recipients pay their own fee
/// the raise comes out of the refund; whatever the refund cannot cover is
/// paid by the baker.
pub fn refit_merged_fees(source: &str, payouts: &mut [AccumulatedPayoutRecipe]) {
    for payout in payouts.iter_mut().filter(|p| p.is_merged()) {
        refit_fee(source, payout);
    }
}

fn refit_fee(source: &str, payout: &mut AccumulatedPayoutRecipe) {
    let Some(mut limits) = payout.recipe.op_limits else {
        return;
    };
    let before = limits.transaction_fee;

    // the fee is part of the encoding; stop once it covers itself
    loop {
        let transfer = TransferContent::from_recipe(source, &payout.recipe);
        let required = minimal_fee(&transfer, &limits);
        if required <= limits.transaction_fee {
            break;
        }
        let raise = required - limits.transaction_fee;
        limits.transaction_fee = required;
        if !payout.recipe.is_baker_paying_tx_fee {
            let taken = raise.min(payout.refunded_tx_fee);
            payout.refunded_tx_fee -= taken;
            payout.recipe.amount -= taken;
        }
        payout.recipe.op_limits = Some(limits);
    }

    if limits.transaction_fee > before {
        debug!(
            recipient = %payout.recipe.recipient,
            before,
            after = limits.transaction_fee,
            "raised fee of merged payout"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PayoutKind;

    fn recipe(cycle: i64, recipient: &str, amount: i64) -> PayoutRecipe {
        PayoutRecipe::baker_income("tz1baker", cycle, recipient, PayoutKind::DelegatorReward, amount)
    }

    #[test]
    fn test_groups_in_first_seen_order() {
        let recipes = vec![
            recipe(1, "tz1b", 10),
            recipe(1, "tz1a", 20),
            recipe(2, "tz1b", 30),
            recipe(2, "tz1a", 40),
            recipe(2, "tz1c", 50),
        ];
        let accumulated = accumulate_payouts(recipes).unwrap();
        let summary: Vec<(&str, i64, usize)> = accumulated
            .iter()
            .map(|a| (a.recipe.recipient.as_str(), a.recipe.amount, a.recipes.len()))
            .collect();
        assert_eq!(
            summary,
            vec![("tz1b", 40, 2), ("tz1a", 60, 2), ("tz1c", 50, 1)]
        );
    }

    #[test]
    fn test_invalid_and_valid_are_not_merged() {
        let mut invalid = recipe(2, "tz1a", 5);
        invalid.is_valid = false;
        let accumulated = accumulate_payouts(vec![recipe(1, "tz1a", 10), invalid]).unwrap();
        assert_eq!(accumulated.len(), 2);
    }
}
