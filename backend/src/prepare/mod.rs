//! Prepare stage
//!
//! Turns one or more cycle blueprints into the list of transfers that still
//! have to be paid.
//!
//! # Stages
//!
//! 1. `check_conditions`
//! 2. `load_past_reports`
//! 3. `filter_already_paid`
//! 4. `accumulate`
//! 5. `refund_surplus_fees` (then refit merged fees)
//! 6. `after_payouts_prepared` hook
//! 7. `check_balance` (with the `check_balance` hook)
//!
//! # Critical Invariants
//!
//! 1. **Idempotence**: a recipe whose id already has a successful report is
//!    never prepared again, so re-running prepare after a completed execute
//!    yields no valid payouts.
//! 2. **Funding**: prepare only succeeds once the payout address holds the
//!    native amount of every transfer plus its fees and storage burn.
//!    In wait-and-retry mode the wait ends early with
//!    [`PayoutError::TerminatedByUser`] once a stop is requested.

use crate::batching::{accumulate_payouts, refit_merged_fees, refund_surplus_tx_fees, wrap_payouts};
use crate::chain::Collaborators;
use crate::config::{BalanceCheckMode, PayoutConfiguration};
use crate::core::STORAGE_COST_PER_BYTE;
use crate::error::{PayoutError, Result};
use crate::execute::StopSignal;
use crate::extension::{ExtensionRegistry, Hook};
use crate::models::{AccumulatedPayoutRecipe, CyclePayoutBlueprint, PayoutRecipe, PayoutReport, TxKind};
use crate::pipeline::{run_stages, Stage, StageContext};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use tracing::{info, warn, Span};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrepareOptions {
    pub skip_balance_check: bool,
    /// Overrides the configured wait between balance checks
    pub balance_check_interval: Option<Duration>,
}

/// Payload of the `check_balance` hook
///
/// Extensions may waive the native balance check (for example when they
/// fund the payout address themselves) or report a shortfall of their own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckBalanceHookData {
    pub skip_tez_check: bool,
    pub is_sufficient: bool,
    #[serde(default)]
    pub message: String,
    pub payouts: Vec<AccumulatedPayoutRecipe>,
}

/// Output of the prepare stage
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreparationResult {
    pub blueprints: Vec<CyclePayoutBlueprint>,
    /// Transfers to execute
    pub payouts: Vec<AccumulatedPayoutRecipe>,
    pub invalid_payouts: Vec<PayoutRecipe>,
    pub reports_of_past_successful_payouts: Vec<PayoutReport>,
    /// Valid recipes skipped because a successful report exists
    pub already_paid: Vec<PayoutRecipe>,
}

impl PreparationResult {
    /// Native balance the payout address needs to execute every transfer
    pub fn required_balance(&self) -> i64 {
        required_balance(&self.payouts)
    }
}

#[derive(Debug, Default)]
pub struct PrepareStageData {
    pub payout_address: String,
    pub blueprints: Vec<CyclePayoutBlueprint>,
    pub past_reports: BTreeMap<i64, Vec<PayoutReport>>,
    pub valid: Vec<PayoutRecipe>,
    pub invalid: Vec<PayoutRecipe>,
    pub already_paid: Vec<PayoutRecipe>,
    pub payouts: Vec<AccumulatedPayoutRecipe>,
}

pub struct PrepareContext<'a> {
    pub configuration: &'a PayoutConfiguration,
    pub collaborators: Collaborators<'a>,
    pub extensions: &'a ExtensionRegistry,
    /// Ends the balance wait early
    pub stop: StopSignal,
    pub span: Span,
    pub stage_data: PrepareStageData,
}

impl StageContext for PrepareContext<'_> {
    fn span(&self) -> &Span {
        &self.span
    }
}

impl<'a> PrepareContext<'a> {
    pub fn new(
        configuration: &'a PayoutConfiguration,
        collaborators: Collaborators<'a>,
        extensions: &'a ExtensionRegistry,
        stop: StopSignal,
        span: Span,
        blueprints: Vec<CyclePayoutBlueprint>,
    ) -> Self {
        Self {
            configuration,
            collaborators,
            extensions,
            stop,
            span,
            stage_data: PrepareStageData {
                blueprints,
                ..Default::default()
            },
        }
    }
}

fn prepare_stages<'a>() -> [Stage<PrepareContext<'a>, PrepareOptions>; 7] {
    [
        Stage::new("check_conditions", check_conditions),
        Stage::new("load_past_reports", load_past_reports),
        Stage::new("filter_already_paid", filter_already_paid),
        Stage::new("accumulate", accumulate),
        Stage::new("refund_surplus_fees", refund_surplus_fees),
        Stage::new("after_payouts_prepared", after_payouts_prepared),
        Stage::new("check_balance", check_balance),
    ]
}

/// Run the prepare pipeline over the blueprints held by `context`
pub fn prepare_payouts(context: PrepareContext<'_>, options: &PrepareOptions) -> Result<PreparationResult> {
    let context = run_stages(context, options, &prepare_stages())?;
    let data = context.stage_data;
    Ok(PreparationResult {
        blueprints: data.blueprints,
        payouts: data.payouts,
        invalid_payouts: data.invalid,
        reports_of_past_successful_payouts: data
            .past_reports
            .into_values()
            .flatten()
            .filter(|r| r.success)
            .collect(),
        already_paid: data.already_paid,
    })
}

/// Native balance needed to pay `payouts`
///
/// ```text
/// required = Σ tez amounts + Σ tx fees + Σ storage_limit × 250
/// ```
pub fn required_balance(payouts: &[AccumulatedPayoutRecipe]) -> i64 {
    payouts
        .iter()
        .map(|p| {
            let recipe = p.representative();
            let native = if recipe.tx_kind == TxKind::Tez { recipe.amount } else { 0 };
            native + recipe.tx_fee() + recipe.storage_limit() * STORAGE_COST_PER_BYTE
        })
        .sum()
}

// ============================================================================
// Stages
// ============================================================================

fn check_conditions<'a>(mut ctx: PrepareContext<'a>, _: &PrepareOptions) -> Result<PrepareContext<'a>> {
    ctx.collaborators.reporter()?;
    ctx.collaborators.collector()?;
    let signer = ctx.collaborators.signer()?;

    if ctx.stage_data.blueprints.is_empty() {
        return Err(PayoutError::MissingBlueprint("no blueprints to prepare".to_string()));
    }
    ctx.stage_data.payout_address = signer.address();
    Ok(ctx)
}

fn load_past_reports<'a>(mut ctx: PrepareContext<'a>, _: &PrepareOptions) -> Result<PrepareContext<'a>> {
    let reporter = ctx.collaborators.reporter()?;
    let mut past = BTreeMap::new();
    for blueprint in &ctx.stage_data.blueprints {
        let reports = reporter
            .get_existing_reports(blueprint.cycle)
            .map_err(|e| PayoutError::collaborator("reporter", e))?;
        past.insert(blueprint.cycle, reports);
    }
    ctx.stage_data.past_reports = past;
    Ok(ctx)
}

fn filter_already_paid<'a>(mut ctx: PrepareContext<'a>, _: &PrepareOptions) -> Result<PrepareContext<'a>> {
    let paid: HashSet<&str> = ctx
        .stage_data
        .past_reports
        .values()
        .flatten()
        .filter(|r| r.success)
        .map(|r| r.id.as_str())
        .collect();

    let mut valid = Vec::new();
    let mut invalid = Vec::new();
    let mut already_paid = Vec::new();
    for recipe in ctx.stage_data.blueprints.iter().flat_map(|b| b.payouts.iter()) {
        if !recipe.is_valid {
            invalid.push(recipe.clone());
        } else if paid.contains(recipe.id().as_str()) {
            already_paid.push(recipe.clone());
        } else {
            valid.push(recipe.clone());
        }
    }

    info!(
        valid = valid.len(),
        invalid = invalid.len(),
        already_paid = already_paid.len(),
        "filtered payouts"
    );
    ctx.stage_data.valid = valid;
    ctx.stage_data.invalid = invalid;
    ctx.stage_data.already_paid = already_paid;
    Ok(ctx)
}

fn accumulate<'a>(mut ctx: PrepareContext<'a>, _: &PrepareOptions) -> Result<PrepareContext<'a>> {
    let valid = std::mem::take(&mut ctx.stage_data.valid);
    ctx.stage_data.payouts = if ctx.configuration.payouts.accumulate && ctx.stage_data.blueprints.len() > 1 {
        accumulate_payouts(valid)?
    } else {
        wrap_payouts(valid)
    };
    Ok(ctx)
}

fn refund_surplus_fees<'a>(mut ctx: PrepareContext<'a>, _: &PrepareOptions) -> Result<PrepareContext<'a>> {
    refund_surplus_tx_fees(&mut ctx.stage_data.payouts);
    refit_merged_fees(&ctx.stage_data.payout_address, &mut ctx.stage_data.payouts);
    Ok(ctx)
}

fn after_payouts_prepared<'a>(mut ctx: PrepareContext<'a>, _: &PrepareOptions) -> Result<PrepareContext<'a>> {
    ctx.extensions
        .execute_hook(Hook::AfterPayoutsPrepared, &mut ctx.stage_data.payouts)?;
    Ok(ctx)
}

fn check_balance<'a>(ctx: PrepareContext<'a>, options: &PrepareOptions) -> Result<PrepareContext<'a>> {
    if options.skip_balance_check || ctx.stage_data.payouts.is_empty() {
        return Ok(ctx);
    }

    let configuration = ctx.configuration;
    let settings = &configuration.payouts.balance_check;
    let interval = options.balance_check_interval.unwrap_or_else(|| settings.interval());
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let shortfall = match find_shortfall(&ctx)? {
            None => return Ok(ctx),
            Some(shortfall) => shortfall,
        };

        if settings.mode == BalanceCheckMode::Fail {
            return Err(shortfall.into_error());
        }

        let message = shortfall.message(&ctx.stage_data.payout_address);
        warn!(attempt, interval_secs = interval.as_secs(), %message, "balance check failed, waiting");
        if settings.notify_every > 0 && attempt % settings.notify_every == 0 {
            ctx.collaborators.notify_admin(&message);
        }
        if ctx.stop.wait(interval) {
            warn!(attempt, "stop requested while waiting for funds");
            return Err(PayoutError::TerminatedByUser("balance check"));
        }
    }
}

enum Shortfall {
    Tez { required: i64, available: i64 },
    Extension(String),
}

impl Shortfall {
    fn into_error(self) -> PayoutError {
        match self {
            Shortfall::Tez { required, available } => PayoutError::InsufficientBalance { required, available },
            Shortfall::Extension(message) => PayoutError::BalanceCheckRejected(message),
        }
    }

    fn message(&self, payout_address: &str) -> String {
        match self {
            Shortfall::Tez { required, available } => format!(
                "payout address {payout_address} holds {available} mutez, {required} mutez required"
            ),
            Shortfall::Extension(message) => format!("balance check rejected: {message}"),
        }
    }
}

fn find_shortfall(ctx: &PrepareContext<'_>) -> Result<Option<Shortfall>> {
    let mut hook_data = CheckBalanceHookData {
        skip_tez_check: false,
        is_sufficient: true,
        message: String::new(),
        payouts: ctx.stage_data.payouts.clone(),
    };
    ctx.extensions.execute_hook(Hook::CheckBalance, &mut hook_data)?;

    if !hook_data.is_sufficient {
        return Ok(Some(Shortfall::Extension(hook_data.message)));
    }
    if hook_data.skip_tez_check {
        return Ok(None);
    }

    let collector = ctx.collaborators.collector()?;
    let available = collector
        .get_balance(&ctx.stage_data.payout_address)
        .map_err(|e| PayoutError::collaborator("collector", e))?;
    let required = required_balance(&ctx.stage_data.payouts);
    if available < required {
        Ok(Some(Shortfall::Tez { required, available }))
    } else {
        Ok(None)
    }
}
