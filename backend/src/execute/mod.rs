//! Execute stage
//!
//! Sends prepared payouts to the chain batch by batch and writes reports.
//!
//! # Stages
//!
//! 1. `check_conditions`
//! 2. `load_limits`
//! 3. `split_batches`
//! 4. `execute_batches`
//! 5. `report_results`
//!
//! # Critical Invariants
//!
//! 1. **Cancellation**: when a stop is requested before batch *k* starts,
//!    batches *k..n* are reported as failed with `terminated by user` and
//!    none of them is dispatched. A batch already dispatched is always
//!    confirmed before the stop is honoured.
//! 2. **Failures are data**: a batch that fails to complete, sign, dispatch
//!    or confirm becomes a failed [`BatchResult`]; only setup and final
//!    reporting failures abort the stage.

pub mod stop;

pub use stop::StopSignal;

use crate::batching::{split_payouts_into_batches, Batch, BatchCapacity, StreamOptions};
use crate::chain::{CollaboratorError, Collaborators, DispatchOptions, DraftOperation, OperationLimits};
use crate::config::PayoutConfiguration;
use crate::error::{PayoutError, Result};
use crate::models::{BatchResult, CyclePayoutSummary, PayoutReport};
use crate::pipeline::{run_stages, Stage, StageContext};
use crate::prepare::PreparationResult;
use std::collections::BTreeMap;
use tracing::{error, info, warn, Span};

/// Note attached to batches skipped after a stop request
pub const TERMINATED_BY_USER: &str = "terminated by user";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecuteOptions {
    pub dispatch: DispatchOptions,
}

/// Output of the execute stage
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionResult {
    pub batch_results: Vec<BatchResult>,
    /// Cycle summaries as reported, with fees paid filled in
    pub summaries: Vec<CyclePayoutSummary>,
    /// A stop request cut the run short
    pub stopped: bool,
}

impl ExecutionResult {
    pub fn successful_batches(&self) -> usize {
        self.batch_results.iter().filter(|b| b.is_success).count()
    }

    pub fn failed_batches(&self) -> usize {
        self.batch_results.len() - self.successful_batches()
    }
}

#[derive(Debug, Default)]
pub struct ExecuteStageData {
    pub payout_address: String,
    pub public_key: String,
    pub limits: Option<OperationLimits>,
    pub batches: Vec<Batch>,
    pub batch_results: Vec<BatchResult>,
    pub summaries: Vec<CyclePayoutSummary>,
    pub stopped: bool,
}

pub struct ExecuteContext<'a> {
    pub configuration: &'a PayoutConfiguration,
    pub collaborators: Collaborators<'a>,
    pub stop: StopSignal,
    pub span: Span,
    pub preparation: PreparationResult,
    pub stage_data: ExecuteStageData,
}

impl StageContext for ExecuteContext<'_> {
    fn span(&self) -> &Span {
        &self.span
    }
}

impl<'a> ExecuteContext<'a> {
    pub fn new(
        configuration: &'a PayoutConfiguration,
        collaborators: Collaborators<'a>,
        stop: StopSignal,
        span: Span,
        preparation: PreparationResult,
    ) -> Self {
        Self {
            configuration,
            collaborators,
            stop,
            span,
            preparation,
            stage_data: ExecuteStageData::default(),
        }
    }
}

fn execute_stages<'a>() -> [Stage<ExecuteContext<'a>, ExecuteOptions>; 5] {
    [
        Stage::new("check_conditions", check_conditions),
        Stage::new("load_limits", load_limits),
        Stage::new("split_batches", split_batches),
        Stage::new("execute_batches", execute_batches),
        Stage::new("report_results", report_results),
    ]
}

/// Run the execute pipeline over a prepared run
pub fn execute_payouts(context: ExecuteContext<'_>, options: &ExecuteOptions) -> Result<ExecutionResult> {
    let context = run_stages(context, options, &execute_stages())?;
    let data = context.stage_data;
    Ok(ExecutionResult {
        batch_results: data.batch_results,
        summaries: data.summaries,
        stopped: data.stopped,
    })
}

// ============================================================================
// Stages
// ============================================================================

fn check_conditions<'a>(mut ctx: ExecuteContext<'a>, _: &ExecuteOptions) -> Result<ExecuteContext<'a>> {
    ctx.collaborators.transactor()?;
    ctx.collaborators.reporter()?;
    let signer = ctx.collaborators.signer()?;
    ctx.stage_data.payout_address = signer.address();
    ctx.stage_data.public_key = signer.public_key();
    Ok(ctx)
}

fn load_limits<'a>(mut ctx: ExecuteContext<'a>, _: &ExecuteOptions) -> Result<ExecuteContext<'a>> {
    let limits = ctx
        .collaborators
        .transactor()?
        .get_limits()
        .map_err(|e| PayoutError::LimitsUnavailable(e.to_string()))?;
    ctx.stage_data.limits = Some(limits);
    Ok(ctx)
}

fn split_batches<'a>(mut ctx: ExecuteContext<'a>, _: &ExecuteOptions) -> Result<ExecuteContext<'a>> {
    let limits = ctx
        .stage_data
        .limits
        .ok_or_else(|| PayoutError::LimitsUnavailable("limits not loaded".to_string()))?;
    let options = &ctx.configuration.payouts;
    let streams = StreamOptions {
        mix_in_contract_calls: options.mix_in_contract_calls,
        mix_in_fa_transfers: options.mix_in_fa_transfers,
    };

    let payouts = std::mem::take(&mut ctx.preparation.payouts);
    let batches = split_payouts_into_batches(
        &ctx.stage_data.payout_address,
        payouts,
        &BatchCapacity::from_limits(&limits),
        streams,
    )?;

    info!(batches = batches.len(), "split payouts into batches");
    ctx.stage_data.batches = batches;
    Ok(ctx)
}

fn execute_batches<'a>(mut ctx: ExecuteContext<'a>, options: &ExecuteOptions) -> Result<ExecuteContext<'a>> {
    let batches = std::mem::take(&mut ctx.stage_data.batches);
    let total = batches.len();
    let mut results: Vec<BatchResult> = Vec::with_capacity(total);
    let mut stopped = false;

    for (index, batch) in batches.into_iter().enumerate() {
        if !stopped && ctx.stop.is_stop_requested() {
            stopped = true;
            warn!(batch = index + 1, total, "stop requested, remaining batches skipped");
            ctx.collaborators.notify_admin(&format!(
                "payouts {TERMINATED_BY_USER}: {} of {total} batches not sent",
                total - index
            ));
        }
        if stopped {
            results.push(BatchResult::failure(batch.into_payouts(), String::new(), TERMINATED_BY_USER));
            continue;
        }

        let result = execute_batch(&ctx, batch, options);
        if result.is_success {
            info!(batch = index + 1, total, op_hash = %result.op_hash, "batch applied");
        } else {
            error!(
                batch = index + 1,
                total,
                error = result.error.as_deref().unwrap_or_default(),
                "batch failed"
            );
        }
        results.push(result);
        write_partial_report(&ctx, &results);
    }

    ctx.stage_data.batch_results = results;
    ctx.stage_data.stopped = stopped;
    Ok(ctx)
}

fn report_results<'a>(mut ctx: ExecuteContext<'a>, _: &ExecuteOptions) -> Result<ExecuteContext<'a>> {
    let reporter = ctx.collaborators.reporter()?;

    let reports = cumulative_reports(&ctx.stage_data.batch_results);
    reporter
        .report_payouts(&reports)
        .map_err(|e| PayoutError::collaborator("reporter", e))?;

    let invalid: Vec<PayoutReport> = ctx
        .preparation
        .invalid_payouts
        .iter()
        .map(PayoutReport::invalid)
        .collect();
    reporter
        .report_invalid_payouts(&invalid)
        .map_err(|e| PayoutError::collaborator("reporter", e))?;

    let fees = fees_paid_by_cycle(
        reports
            .iter()
            .chain(ctx.preparation.reports_of_past_successful_payouts.iter()),
    );
    let mut summaries = Vec::with_capacity(ctx.preparation.blueprints.len());
    for blueprint in &ctx.preparation.blueprints {
        let mut summary = blueprint.summary.clone();
        summary.transaction_fees_paid = fees.get(&blueprint.cycle).copied().unwrap_or(0);
        reporter
            .report_cycle_summary(&summary)
            .map_err(|e| PayoutError::collaborator("reporter", e))?;
        summaries.push(summary);
    }

    info!(
        reports = reports.len(),
        invalid = invalid.len(),
        cycles = summaries.len(),
        "payout reports written"
    );
    ctx.stage_data.summaries = summaries;
    Ok(ctx)
}

// ============================================================================
// Helpers
// ============================================================================

fn execute_batch(ctx: &ExecuteContext<'_>, batch: Batch, options: &ExecuteOptions) -> BatchResult {
    let outcome = ctx.stop.guarded(|| send_batch(ctx, &batch, &options.dispatch));
    match outcome {
        Ok(op_hash) => BatchResult::success(batch.into_payouts(), op_hash),
        Err((op_hash, e)) => BatchResult::failure(batch.into_payouts(), op_hash, e.to_string()),
    }
}

/// Complete, sign, dispatch and confirm one batch
///
/// # Returns
/// The operation hash, or the hash known so far (empty before dispatch)
/// together with the error.
fn send_batch(
    ctx: &ExecuteContext<'_>,
    batch: &Batch,
    dispatch: &DispatchOptions,
) -> std::result::Result<String, (String, CollaboratorError)> {
    let unsent = |e: CollaboratorError| (String::new(), e);
    let missing = |role: &str| CollaboratorError::Other(format!("missing {role}"));

    let transactor = ctx.collaborators.transactor.ok_or_else(|| unsent(missing("transactor")))?;
    let signer = ctx.collaborators.signer.ok_or_else(|| unsent(missing("signer")))?;

    let mut op = DraftOperation::new(String::new());
    for content in batch.contents() {
        op.push(content.clone());
    }
    transactor
        .complete(&mut op, &ctx.stage_data.public_key)
        .map_err(unsent)?;
    signer.sign(&mut op).map_err(unsent)?;

    let mut handle = transactor.dispatch(&op, dispatch).map_err(unsent)?;
    let op_hash = handle.op_hash();
    match handle.wait_for_apply() {
        Ok(()) => Ok(op_hash),
        Err(e) => Err((op_hash, e)),
    }
}

fn cumulative_reports(results: &[BatchResult]) -> Vec<PayoutReport> {
    results.iter().flat_map(BatchResult::to_reports).collect()
}

/// Report every batch result so far; failures are logged only
fn write_partial_report(ctx: &ExecuteContext<'_>, results: &[BatchResult]) {
    let Some(reporter) = ctx.collaborators.reporter else {
        return;
    };
    if let Err(e) = reporter.report_payouts(&cumulative_reports(results)) {
        warn!(error = %e, "failed to write partial payout report");
    }
}

fn fees_paid_by_cycle<'r>(reports: impl Iterator<Item = &'r PayoutReport>) -> BTreeMap<i64, i64> {
    let mut fees = BTreeMap::new();
    for report in reports.filter(|r| r.success) {
        *fees.entry(report.cycle).or_insert(0) += report.tx_fee;
    }
    fees
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccumulatedPayoutRecipe, OpLimits, PayoutKind, PayoutRecipe};

    fn report(cycle: i64, tx_fee: i64, success: bool) -> PayoutReport {
        let mut recipe =
            PayoutRecipe::baker_income("tz1baker", cycle, "tz1income", PayoutKind::BakerReward, 1_000);
        recipe.op_limits = Some(OpLimits {
            transaction_fee: tx_fee,
            ..Default::default()
        });
        PayoutReport::from_recipe(&recipe, "oo1", success, "")
    }

    #[test]
    fn test_fees_paid_counts_successful_reports_only() {
        let reports = vec![report(10, 400, true), report(10, 300, false), report(11, 250, true)];
        let fees = fees_paid_by_cycle(reports.iter());
        assert_eq!(fees.get(&10), Some(&400));
        assert_eq!(fees.get(&11), Some(&250));
    }

    #[test]
    fn test_cumulative_reports_disaggregate_batches() {
        let recipe = PayoutRecipe::baker_income("tz1baker", 3, "tz1income", PayoutKind::BakerReward, 10);
        let results = vec![
            BatchResult::success(vec![AccumulatedPayoutRecipe::from_recipe(recipe.clone())], "oo1".into()),
            BatchResult::failure(
                vec![AccumulatedPayoutRecipe::from_recipe(recipe)],
                String::new(),
                TERMINATED_BY_USER,
            ),
        ];
        let reports = cumulative_reports(&results);
        assert_eq!(reports.len(), 2);
        assert!(reports[0].success);
        assert_eq!(reports[1].note, TERMINATED_BY_USER);
    }
}
