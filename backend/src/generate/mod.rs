//! Generate stage
//!
//! Produces the [`CyclePayoutBlueprint`] of one cycle.
//!
//! # Stages
//!
//! 1. `check_conditions`: collaborators present, payout address revealed,
//!    distribution maps well formed
//! 2. `fetch_reward_data`
//! 3. `generate_candidates` + `after_candidates_generated` hook
//! 4. `distribute_bonds` + `after_bonds_distributed` hook
//! 5. `collect_fees` + `on_fees_collection` hook; the hook decides the fee
//!    and the delegator keeps the rest of its gross share
//! 6. `estimate_transaction_fees`
//! 7. `validate_payouts`
//! 8. `distribute_income`
//! 9. `finalize_blueprint` + `after_payouts_blueprint_generated` hook
//!
//! # Critical Invariants
//!
//! The finished summary satisfies
//! `distributed_rewards + bond_income + fee_income + donations ==
//! total_distributable`: residual bonds of every invalid candidate are
//! folded into fee income before income is distributed.

pub mod candidates;
pub mod distribute;

use crate::chain::{Collaborators, TransferContent};
use crate::config::PayoutConfiguration;
use crate::error::{PayoutError, Result};
use crate::estimation::{estimate_transfers, EstimationSettings};
use crate::extension::{ExtensionRegistry, Hook};
use crate::models::report::unix_now;
use crate::models::{
    CandidateWithBonds, CandidateWithBondsAndFee, CandidateWithSimulation, CycleRewardData,
    CyclePayoutBlueprint, CyclePayoutSummary, InvalidReason, PayoutCandidate, PayoutRecipe,
};
use crate::pipeline::{run_stages, Stage, StageContext};
use candidates::ValidationContext;
use distribute::IncomeDistribution;
use std::collections::HashMap;
use tracing::{info, warn, Span};

/// Per-run options of the generate stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateOptions {
    pub cycle: i64,
}

/// Intermediate results threaded between generate stages
#[derive(Debug, Default)]
pub struct GenerateStageData {
    pub payout_address: String,
    pub payout_public_key: String,
    pub reward_data: Option<CycleRewardData>,
    pub candidates: Vec<PayoutCandidate>,
    pub total_rewards: i64,
    pub baker_bonds: i64,
    pub candidates_with_bonds: Vec<CandidateWithBonds>,
    pub candidates_with_fees: Vec<CandidateWithBondsAndFee>,
    pub simulated: Vec<CandidateWithSimulation>,
    pub income: IncomeDistribution,
    pub income_recipes: Vec<PayoutRecipe>,
    pub blueprint: Option<CyclePayoutBlueprint>,
}

pub struct GenerateContext<'a> {
    pub configuration: &'a PayoutConfiguration,
    pub collaborators: Collaborators<'a>,
    pub extensions: &'a ExtensionRegistry,
    pub span: Span,
    pub stage_data: GenerateStageData,
}

impl StageContext for GenerateContext<'_> {
    fn span(&self) -> &Span {
        &self.span
    }
}

impl<'a> GenerateContext<'a> {
    pub fn new(
        configuration: &'a PayoutConfiguration,
        collaborators: Collaborators<'a>,
        extensions: &'a ExtensionRegistry,
        span: Span,
    ) -> Self {
        Self {
            configuration,
            collaborators,
            extensions,
            span,
            stage_data: GenerateStageData::default(),
        }
    }

    fn reward_data(&self) -> Result<&CycleRewardData> {
        self.stage_data
            .reward_data
            .as_ref()
            .ok_or_else(|| PayoutError::MissingBlueprint("cycle reward data not fetched".to_string()))
    }

    fn estimation_settings(&self) -> EstimationSettings {
        EstimationSettings::from(&self.configuration.payouts)
    }
}

fn generate_stages<'a>() -> [Stage<GenerateContext<'a>, GenerateOptions>; 9] {
    [
        Stage::new("check_conditions", check_conditions),
        Stage::new("fetch_reward_data", fetch_reward_data),
        Stage::new("generate_candidates", generate_candidates),
        Stage::new("distribute_bonds", distribute_bonds),
        Stage::new("collect_fees", collect_fees),
        Stage::new("estimate_transaction_fees", estimate_transaction_fees),
        Stage::new("validate_payouts", validate_payouts),
        Stage::new("distribute_income", distribute_income),
        Stage::new("finalize_blueprint", finalize_blueprint),
    ]
}

/// Run the generate pipeline for `options.cycle`
pub fn generate_payouts(
    context: GenerateContext<'_>,
    options: &GenerateOptions,
) -> Result<CyclePayoutBlueprint> {
    let context = run_stages(context, options, &generate_stages())?;
    context
        .stage_data
        .blueprint
        .ok_or_else(|| PayoutError::MissingBlueprint(format!("cycle {}", options.cycle)))
}

// ============================================================================
// Stages
// ============================================================================

fn check_conditions<'a>(mut ctx: GenerateContext<'a>, options: &GenerateOptions) -> Result<GenerateContext<'a>> {
    let collector = ctx.collaborators.collector()?;
    let signer = ctx.collaborators.signer()?;

    let payout_address = signer.address();
    let revealed = collector
        .is_revealed(&payout_address)
        .map_err(|e| PayoutError::collaborator("collector", e))?;
    if !revealed {
        return Err(PayoutError::NotRevealed(payout_address));
    }

    let recipients = &ctx.configuration.income_recipients;
    distribute::check_distribution("bonds", &recipients.bonds)?;
    distribute::check_distribution("fees", &recipients.fees)?;
    distribute::check_distribution("donations", &recipients.donations)?;

    info!(
        cycle = options.cycle,
        baker = %ctx.configuration.baker,
        payout_address = %payout_address,
        "generating payouts"
    );
    ctx.stage_data.payout_public_key = signer.public_key();
    ctx.stage_data.payout_address = payout_address;
    Ok(ctx)
}

fn fetch_reward_data<'a>(mut ctx: GenerateContext<'a>, options: &GenerateOptions) -> Result<GenerateContext<'a>> {
    let collector = ctx.collaborators.collector()?;
    let data = collector
        .get_cycle_reward_data(&ctx.configuration.baker, options.cycle)
        .map_err(|e| PayoutError::collaborator("collector", e))?;

    info!(
        cycle = options.cycle,
        delegators = data.delegators.len(),
        rewards = data.total_delegated_rewards(ctx.configuration.payout_mode),
        "fetched cycle reward data"
    );
    ctx.stage_data.reward_data = Some(data);
    Ok(ctx)
}

fn generate_candidates<'a>(mut ctx: GenerateContext<'a>, _: &GenerateOptions) -> Result<GenerateContext<'a>> {
    let validation = ValidationContext {
        configuration: ctx.configuration,
        payout_address: &ctx.stage_data.payout_address,
    };
    let mut generated = candidates::generate_candidates(ctx.reward_data()?, &validation);
    ctx.extensions
        .execute_hook(Hook::AfterCandidatesGenerated, &mut generated)?;

    let invalid = generated.iter().filter(|c| c.is_invalid()).count();
    info!(candidates = generated.len(), invalid, "generated candidates");
    ctx.stage_data.candidates = generated;
    Ok(ctx)
}

fn distribute_bonds<'a>(mut ctx: GenerateContext<'a>, _: &GenerateOptions) -> Result<GenerateContext<'a>> {
    let candidates = std::mem::take(&mut ctx.stage_data.candidates);
    let distribution = distribute::distribute_bonds(ctx.reward_data()?, candidates, ctx.configuration);

    let mut with_bonds = distribution.candidates;
    ctx.extensions
        .execute_hook(Hook::AfterBondsDistributed, &mut with_bonds)?;
    let with_bonds: Vec<CandidateWithBonds> =
        with_bonds.into_iter().map(distribute::check_tx_kind).collect();

    // the baker absorbs whatever the delegators do not receive
    let delegated: i64 = with_bonds.iter().map(|c| c.bonds_amount).sum();
    ctx.stage_data.total_rewards = distribution.total_rewards;
    ctx.stage_data.baker_bonds = distribution.total_rewards - delegated;

    info!(
        total_rewards = distribution.total_rewards,
        baker_bonds = ctx.stage_data.baker_bonds,
        "distributed bonds"
    );
    ctx.stage_data.candidates_with_bonds = with_bonds;
    Ok(ctx)
}

fn collect_fees<'a>(mut ctx: GenerateContext<'a>, _: &GenerateOptions) -> Result<GenerateContext<'a>> {
    let with_bonds = std::mem::take(&mut ctx.stage_data.candidates_with_bonds);
    let mut with_fees = distribute::collect_baker_fees(with_bonds);
    let gross: HashMap<String, i64> = with_fees
        .iter()
        .map(|c| (c.base().source.clone(), c.bonds_amount() + c.fee))
        .collect();
    ctx.extensions
        .execute_hook(Hook::OnFeesCollection, &mut with_fees)?;

    // a rewritten fee moves mutez between the delegator and the baker only
    for candidate in with_fees.iter_mut() {
        if let Some(&share) = gross.get(&candidate.base().source) {
            candidate.fee = candidate.fee.clamp(0, share.max(0));
            candidate.candidate.bonds_amount = share - candidate.fee;
        }
    }

    let collected: i64 = with_fees.iter().map(|c| c.fee).sum();
    info!(collected, "collected baker fees");
    ctx.stage_data.candidates_with_fees = with_fees;
    Ok(ctx)
}

fn estimate_transaction_fees<'a>(mut ctx: GenerateContext<'a>, _: &GenerateOptions) -> Result<GenerateContext<'a>> {
    let collector = ctx.collaborators.collector()?;
    let source = ctx.stage_data.payout_address.clone();

    let candidates: Vec<CandidateWithBondsAndFee> = std::mem::take(&mut ctx.stage_data.candidates_with_fees)
        .into_iter()
        .map(|c| {
            if !c.is_invalid() && c.bonds_amount() <= 0 {
                c.invalidated(InvalidReason::ZeroPayout)
            } else {
                c
            }
        })
        .collect();

    let transfers: Vec<TransferContent> = candidates
        .iter()
        .filter(|c| !c.is_invalid())
        .map(|c| candidate_transfer(&source, c))
        .collect();
    let mut outcomes = estimate_transfers(
        collector,
        &source,
        &ctx.stage_data.payout_public_key,
        &transfers,
        &ctx.estimation_settings(),
    )?
    .into_iter();

    let mut failed = 0;
    let simulated: Vec<CandidateWithSimulation> = candidates
        .into_iter()
        .map(|c| {
            if c.is_invalid() {
                return c.without_simulation();
            }
            match outcomes.next() {
                Some(Ok(estimate)) => {
                    c.with_simulation(estimate.op_limits, estimate.allocation_burn, estimate.storage_burn)
                }
                Some(Err(failure)) => {
                    failed += 1;
                    warn!(recipient = %c.base().recipient, error = %failure.message, "failed to estimate payout");
                    c.invalidated(InvalidReason::FailedToEstimateTxCosts)
                        .without_simulation()
                }
                None => c
                    .invalidated(InvalidReason::FailedToEstimateTxCosts)
                    .without_simulation(),
            }
        })
        .collect();

    info!(estimated = transfers.len(), failed, "estimated transaction fees");
    ctx.stage_data.simulated = simulated;
    Ok(ctx)
}

fn validate_payouts<'a>(mut ctx: GenerateContext<'a>, _: &GenerateOptions) -> Result<GenerateContext<'a>> {
    let minimum = ctx.configuration.payouts.minimum_payout_amount;
    ctx.stage_data.simulated = std::mem::take(&mut ctx.stage_data.simulated)
        .into_iter()
        .map(|c| {
            if !c.is_invalid() && c.amount < minimum {
                c.invalidated(InvalidReason::BelowMinimumPayout)
            } else {
                c
            }
        })
        .collect();
    Ok(ctx)
}

fn distribute_income<'a>(mut ctx: GenerateContext<'a>, options: &GenerateOptions) -> Result<GenerateContext<'a>> {
    let collected_fees: i64 = ctx
        .stage_data
        .simulated
        .iter()
        .map(|c| {
            let residual = if c.is_invalid() { c.bonds().bonds_amount } else { 0 };
            c.candidate.fee + residual
        })
        .sum();

    let income = distribute::distribute_income(
        ctx.stage_data.baker_bonds,
        collected_fees,
        ctx.configuration,
        &ctx.stage_data.payout_address,
    )?;

    let baker = ctx.configuration.baker.as_str();
    let mut recipes: Vec<PayoutRecipe> = income
        .transfers
        .iter()
        .map(|t| PayoutRecipe::baker_income(baker, options.cycle, &t.recipient, t.kind, t.amount))
        .collect();

    if !recipes.is_empty() {
        let collector = ctx.collaborators.collector()?;
        let source = &ctx.stage_data.payout_address;
        let transfers: Vec<TransferContent> = recipes
            .iter()
            .map(|r| TransferContent::from_recipe(source, r))
            .collect();
        let outcomes = estimate_transfers(
            collector,
            source,
            &ctx.stage_data.payout_public_key,
            &transfers,
            &ctx.estimation_settings(),
        )?;
        for (recipe, outcome) in recipes.iter_mut().zip(outcomes) {
            match outcome {
                Ok(estimate) => recipe.op_limits = Some(estimate.op_limits),
                Err(_) => recipe.invalidate(InvalidReason::FailedToEstimateTxCosts),
            }
        }
    }

    info!(
        bond_income = income.bond_income,
        fee_income = income.fee_income,
        donated = income.donated_bonds + income.donated_fees,
        transfers = recipes.len(),
        "distributed baker income"
    );
    ctx.stage_data.income = income;
    ctx.stage_data.income_recipes = recipes;
    Ok(ctx)
}

fn finalize_blueprint<'a>(mut ctx: GenerateContext<'a>, options: &GenerateOptions) -> Result<GenerateContext<'a>> {
    let baker = ctx.configuration.baker.clone();
    let data = ctx.reward_data()?.clone();
    let stage = &ctx.stage_data;

    let mut payouts: Vec<PayoutRecipe> = stage
        .simulated
        .iter()
        .map(|c| PayoutRecipe::from_candidate(&baker, options.cycle, c))
        .collect();
    payouts.extend(stage.income_recipes.iter().cloned());

    let valid_delegators: Vec<&CandidateWithSimulation> =
        stage.simulated.iter().filter(|c| !c.is_invalid()).collect();
    let summary = CyclePayoutSummary {
        cycle: options.cycle,
        delegators: data.delegators.len(),
        paid_delegators: valid_delegators.len(),
        own_staked_balance: data.own_staked_balance,
        own_delegated_balance: data.own_delegated_balance,
        external_staked_balance: data.external_staked_balance,
        external_delegated_balance: data.external_delegated_balance,
        earned_rewards: data.delegated_rewards(ctx.configuration.payout_mode),
        earned_fees: data.block_delegated_fees,
        total_distributable: stage.total_rewards,
        distributed_rewards: valid_delegators.iter().map(|c| c.bonds().bonds_amount).sum(),
        bond_income: stage.income.bond_income,
        fee_income: stage.income.fee_income,
        donated_bonds: stage.income.donated_bonds,
        donated_fees: stage.income.donated_fees,
        transaction_fees_paid: 0,
        timestamp: unix_now(),
    };
    if !summary.is_balanced() {
        warn!(cycle = options.cycle, "cycle summary does not balance");
    }

    let blueprint = CyclePayoutBlueprint {
        cycle: options.cycle,
        payouts,
        summary,
    };
    let mut observed = blueprint.clone();
    ctx.extensions
        .execute_hook(Hook::AfterPayoutsBlueprintGenerated, &mut observed)?;

    info!(
        cycle = options.cycle,
        payouts = blueprint.payouts.len(),
        valid = blueprint.valid_payouts().count(),
        "payout blueprint generated"
    );
    ctx.stage_data.blueprint = Some(blueprint);
    Ok(ctx)
}

/// Transfer a candidate's bonds would be paid with
fn candidate_transfer(source: &str, candidate: &CandidateWithBondsAndFee) -> TransferContent {
    let bonds = &candidate.candidate;
    TransferContent::payout(
        source,
        &candidate.base().recipient,
        candidate.bonds_amount(),
        bonds.tx_kind,
        bonds.fa_contract.as_deref(),
        bonds.fa_token_id,
    )
}
