//! Payout engine
//!
//! Owns the configuration, collaborators, extension registry and stop
//! signal of one payout process, and runs the generate, prepare and
//! execute pipelines over them.
//!
//! # Architecture
//!
//! ```text
//! for each unpaid cycle:
//!   generate  → CyclePayoutBlueprint
//! prepare(blueprints) → PreparationResult
//! execute(preparation) → ExecutionResult (batches, reports, summaries)
//! ```
//!
//! Every pipeline run logs under a `payouts` span carrying the engine's
//! run id and the stage name.
//!
//! # Example
//!
//! ```rust,ignore
//! use baker_payouts_core_rs::orchestrator::PayoutEngine;
//! use baker_payouts_core_rs::config::PayoutConfiguration;
//!
//! let configuration = PayoutConfiguration::from_json(&json)?;
//! let engine = PayoutEngine::new(configuration)?
//!     .with_collector(collector)
//!     .with_signer(signer)
//!     .with_transactor(transactor)
//!     .with_reporter(reporter);
//!
//! let result = engine.pay_cycles(&[745, 746], &Default::default(), &Default::default())?;
//! println!("{} batches sent", result.successful_batches());
//! ```

use crate::chain::{AdminNotifier, Collaborators, Collector, Reporter, Signer, Transactor};
use crate::config::PayoutConfiguration;
use crate::error::{PayoutError, Result};
use crate::execute::{execute_payouts, ExecuteContext, ExecuteOptions, ExecutionResult, StopSignal};
use crate::extension::ExtensionRegistry;
use crate::generate::{generate_payouts, GenerateContext, GenerateOptions};
use crate::models::CyclePayoutBlueprint;
use crate::monitor::{CycleMonitor, CycleMonitorOptions};
use crate::prepare::{prepare_payouts, PreparationResult, PrepareContext, PrepareOptions};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, info_span, Span};
use uuid::Uuid;

type Shared<T> = Option<Arc<T>>;

/// Entry point running payouts for one baker
pub struct PayoutEngine {
    configuration: PayoutConfiguration,
    collector: Shared<dyn Collector + Send + Sync>,
    signer: Shared<dyn Signer + Send + Sync>,
    transactor: Shared<dyn Transactor + Send + Sync>,
    reporter: Shared<dyn Reporter + Send + Sync>,
    notifier: Shared<dyn AdminNotifier + Send + Sync>,
    extensions: ExtensionRegistry,
    stop: StopSignal,
    run_id: Uuid,
}

impl PayoutEngine {
    /// Create an engine without collaborators
    ///
    /// # Arguments
    ///
    /// * `configuration` - Payout configuration of the baker
    ///
    /// # Errors
    ///
    /// [`PayoutError::Config`] when the configuration does not validate.
    pub fn new(configuration: PayoutConfiguration) -> Result<Self> {
        configuration.validate()?;
        let run_id = Uuid::new_v4();
        info!(run_id = %run_id, baker = %configuration.baker, "payout engine created");
        Ok(Self {
            configuration,
            collector: None,
            signer: None,
            transactor: None,
            reporter: None,
            notifier: None,
            extensions: ExtensionRegistry::new(),
            stop: StopSignal::new(),
            run_id,
        })
    }

    pub fn with_collector(mut self, collector: Arc<dyn Collector + Send + Sync>) -> Self {
        self.collector = Some(collector);
        self
    }

    pub fn with_signer(mut self, signer: Arc<dyn Signer + Send + Sync>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn with_transactor(mut self, transactor: Arc<dyn Transactor + Send + Sync>) -> Self {
        self.transactor = Some(transactor);
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter + Send + Sync>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn AdminNotifier + Send + Sync>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_extensions(mut self, extensions: ExtensionRegistry) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn configuration(&self) -> &PayoutConfiguration {
        &self.configuration
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Handle that stops the current run
    ///
    /// A request ends the balance wait of prepare and skips the remaining
    /// batches of execute. It is cleared once the run has honoured it.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn request_stop(&self) {
        self.stop.request_stop();
    }

    /// Borrowed view handed to the pipelines
    pub fn collaborators(&self) -> Collaborators<'_> {
        Collaborators {
            collector: self.collector.as_deref().map(|c| c as &dyn Collector),
            signer: self.signer.as_deref().map(|s| s as &dyn Signer),
            transactor: self.transactor.as_deref().map(|t| t as &dyn Transactor),
            reporter: self.reporter.as_deref().map(|r| r as &dyn Reporter),
            notifier: self.notifier.as_deref().map(|n| n as &dyn AdminNotifier),
        }
    }

    fn span(&self, stage: &'static str) -> Span {
        info_span!("payouts", run_id = %self.run_id, baker = %self.configuration.baker, stage)
    }

    // ========================================================================
    // Pipelines
    // ========================================================================

    /// Build the payout blueprint of `cycle`
    pub fn generate(&self, cycle: i64) -> Result<CyclePayoutBlueprint> {
        let context = GenerateContext::new(
            &self.configuration,
            self.collaborators(),
            &self.extensions,
            self.span("generate"),
        );
        generate_payouts(context, &GenerateOptions { cycle })
    }

    /// Select what is still unpaid in `blueprints` and check funding
    pub fn prepare(
        &self,
        blueprints: Vec<CyclePayoutBlueprint>,
        options: &PrepareOptions,
    ) -> Result<PreparationResult> {
        let context = PrepareContext::new(
            &self.configuration,
            self.collaborators(),
            &self.extensions,
            self.stop.clone(),
            self.span("prepare"),
            blueprints,
        );
        let result = prepare_payouts(context, options);
        if matches!(result, Err(PayoutError::TerminatedByUser(_))) {
            self.stop.reset();
        }
        result
    }

    /// Send a prepared run and write its reports
    pub fn execute(&self, preparation: PreparationResult, options: &ExecuteOptions) -> Result<ExecutionResult> {
        let context = ExecuteContext::new(
            &self.configuration,
            self.collaborators(),
            self.stop.clone(),
            self.span("execute"),
            preparation,
        );
        let result = execute_payouts(context, options);
        // the request applied to this run only
        self.stop.reset();
        result
    }

    /// Generate, prepare and execute `cycles` as one run
    pub fn pay_cycles(
        &self,
        cycles: &[i64],
        prepare: &PrepareOptions,
        execute: &ExecuteOptions,
    ) -> Result<ExecutionResult> {
        let blueprints = cycles
            .iter()
            .map(|&cycle| self.generate(cycle))
            .collect::<Result<Vec<_>>>()?;
        let preparation = self.prepare(blueprints, prepare)?;
        self.execute(preparation, execute)
    }

    /// Cycles in `from..=to` without a reported cycle summary
    pub fn unpaid_cycles(&self, from: i64, to: i64) -> Result<Vec<i64>> {
        let reporter = self.collaborators().reporter()?;
        let mut unpaid = Vec::new();
        for cycle in from..=to {
            let summary = reporter
                .get_existing_cycle_summary(cycle)
                .map_err(|e| PayoutError::collaborator("reporter", e))?;
            if summary.is_none() {
                unpaid.push(cycle);
            }
        }
        Ok(unpaid)
    }

    /// Start a [`CycleMonitor`] on this engine's collector
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_cycle_monitor(
        &self,
        options: CycleMonitorOptions,
    ) -> Result<(CycleMonitor, mpsc::Receiver<i64>)> {
        let collector = self
            .collector
            .clone()
            .ok_or(PayoutError::MissingCollaborator("collector"))?;
        Ok(CycleMonitor::spawn(collector, options))
    }
}

impl std::fmt::Debug for PayoutEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayoutEngine")
            .field("baker", &self.configuration.baker)
            .field("run_id", &self.run_id)
            .field("collaborators", &self.collaborators())
            .field("extensions", &self.extensions)
            .field("stop_requested", &self.stop.is_stop_requested())
            .finish()
    }
}
