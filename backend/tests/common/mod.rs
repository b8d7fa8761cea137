//! Shared test collaborators
//!
//! In-memory implementations of every collaborator role. State lives behind
//! `Mutex`es so the mocks are `Send + Sync` and can be shared with the
//! engine through `Arc` while tests inspect them.

#![allow(dead_code)]

use baker_payouts_core_rs::chain::{
    AdminNotifier, CollaboratorError, Collector, ContentCost, DispatchOptions, DraftOperation,
    OpResult, OperationLimits, Reporter, Signer, SimulationReceipt, Transactor, TransferParameters,
};
use baker_payouts_core_rs::config::PayoutConfiguration;
use baker_payouts_core_rs::execute::StopSignal;
use baker_payouts_core_rs::models::{
    CycleRewardData, CyclePayoutSummary, Delegator, PayoutReport,
};
use baker_payouts_core_rs::PayoutEngine;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

pub const BAKER: &str = "tz1burnburnburnburnburnburnburjAYjjX";
pub const PAYOUT_ADDRESS: &str = "tz1ZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZ";
pub const PAYOUT_PUBLIC_KEY: &str = "edpkpayout";
pub const PARTNER: &str = "tz1YYYYYYYYYYYYYYYYYYYYYYYYYYYYYYYYY";
pub const CONTRACT: &str = "KT1PWx2mnDueood7fEmfbBDKx1D9BAnnXitn";

/// Gas every simulated payload transfer consumes
pub const TRANSFER_GAS: i64 = 1_000;
/// Gas of the trailing marker transfer
pub const MARKER_GAS: i64 = 100;

const ALPHABET: &[u8] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

// ============================================================================
// Address Helpers
// ============================================================================

fn encoded(prefix: &str, i: usize) -> String {
    let mut suffix = String::new();
    let mut n = i;
    for _ in 0..6 {
        suffix.push(ALPHABET[n % ALPHABET.len()] as char);
        n /= ALPHABET.len();
    }
    format!("{prefix}{}{suffix}", "d".repeat(27))
}

/// Structurally valid implicit address, distinct per `i`
pub fn implicit(i: usize) -> String {
    encoded("tz1", i)
}

/// Structurally valid contract address, distinct per `i`
pub fn contract(i: usize) -> String {
    encoded("KT1", i)
}

// ============================================================================
// Configuration & Chain Data Helpers
// ============================================================================

pub fn configuration() -> PayoutConfiguration {
    PayoutConfiguration {
        baker: BAKER.to_string(),
        ..Default::default()
    }
}

/// Reward data with enough own stake to avoid overdelegation
pub fn reward_data(cycle: i64, delegators: Vec<Delegator>) -> CycleRewardData {
    let external: i64 = delegators.iter().map(|d| d.delegated_balance).sum();
    CycleRewardData {
        cycle,
        own_staked_balance: 100_000_000_000,
        own_delegated_balance: 1_000_000_000,
        external_delegated_balance: external,
        block_delegated_rewards: 10_000_000,
        endorsement_delegated_rewards: 90_000_000,
        block_delegated_fees: 1_234_567,
        delegators,
        ..Default::default()
    }
}

/// `count` delegators with balances 1_000_000_000 × (i + 1)
pub fn delegators(count: usize) -> Vec<Delegator> {
    (0..count)
        .map(|i| Delegator::new(implicit(i), 1_000_000_000 * (i as i64 + 1)))
        .collect()
}

pub fn limits() -> OperationLimits {
    OperationLimits {
        hard_gas_limit_per_operation: 1_040_000,
        hard_storage_limit_per_operation: 60_000,
        max_operation_data_length: 32_768,
    }
}

// ============================================================================
// Collector
// ============================================================================

#[derive(Default)]
pub struct MockCollector {
    pub last_cycle: Mutex<i64>,
    /// Scripted answers of `get_last_completed_cycle`, consumed first
    pub cycle_script: Mutex<VecDeque<Result<i64, CollaboratorError>>>,
    pub reward_data: Mutex<BTreeMap<i64, CycleRewardData>>,
    /// Successive balances; the last one repeats
    pub balances: Mutex<VecDeque<i64>>,
    pub unrevealed: Mutex<bool>,
    /// Destinations whose transfers fail to simulate
    pub failing: Mutex<HashSet<String>>,
    /// Destinations that do not exist yet
    pub unallocated: Mutex<HashSet<String>>,
    /// Drop this many entries from every receipt
    pub truncate_receipts: Mutex<usize>,
    pub simulations: Mutex<Vec<DraftOperation>>,
}

impl MockCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rewards(self, data: CycleRewardData) -> Self {
        self.reward_data.lock().unwrap().insert(data.cycle, data);
        self
    }

    pub fn with_balance(self, balance: i64) -> Self {
        self.balances.lock().unwrap().push_back(balance);
        self
    }

    pub fn fail_destination(&self, address: &str) {
        self.failing.lock().unwrap().insert(address.to_string());
    }

    pub fn simulation_count(&self) -> usize {
        self.simulations.lock().unwrap().len()
    }
}

/// Address a transfer pays, looking through token parameters
fn beneficiary(destination: &str, parameters: &Option<TransferParameters>) -> String {
    match parameters {
        Some(TransferParameters::Fa12 { to, .. }) | Some(TransferParameters::Fa2 { to, .. }) => to.clone(),
        None => destination.to_string(),
    }
}

impl Collector for MockCollector {
    fn get_last_completed_cycle(&self) -> Result<i64, CollaboratorError> {
        if let Some(scripted) = self.cycle_script.lock().unwrap().pop_front() {
            return scripted;
        }
        Ok(*self.last_cycle.lock().unwrap())
    }

    fn get_cycle_reward_data(&self, _baker: &str, cycle: i64) -> Result<CycleRewardData, CollaboratorError> {
        self.reward_data
            .lock()
            .unwrap()
            .get(&cycle)
            .cloned()
            .ok_or_else(|| CollaboratorError::Rpc(format!("no data for cycle {cycle}")))
    }

    fn simulate(&self, op: &DraftOperation, _public_key: &str) -> Result<SimulationReceipt, CollaboratorError> {
        self.simulations.lock().unwrap().push(op.clone());
        let failing = self.failing.lock().unwrap();
        let unallocated = self.unallocated.lock().unwrap();
        let last = op.contents.len().saturating_sub(1);

        let mut contents: Vec<ContentCost> = op
            .contents
            .iter()
            .enumerate()
            .map(|(i, content)| {
                if i == 0 {
                    // first marker carries the deserialization gas of the payload
                    return ContentCost::applied(MARKER_GAS + 10 * last as i64);
                }
                if i == last {
                    return ContentCost::applied(MARKER_GAS);
                }
                let target = beneficiary(&content.destination, &content.parameters);
                if failing.contains(&target) {
                    return ContentCost {
                        gas_used: 0,
                        applied: false,
                        error: Some("script_rejected".to_string()),
                        ..Default::default()
                    };
                }
                ContentCost {
                    allocated_destination: unallocated.contains(&target),
                    ..ContentCost::applied(TRANSFER_GAS)
                }
            })
            .collect();

        let truncate = *self.truncate_receipts.lock().unwrap();
        contents.truncate(contents.len().saturating_sub(truncate));
        Ok(SimulationReceipt { contents })
    }

    fn get_balance(&self, _address: &str) -> Result<i64, CollaboratorError> {
        let mut balances = self.balances.lock().unwrap();
        let balance = if balances.len() > 1 {
            balances.pop_front()
        } else {
            balances.front().copied()
        };
        Ok(balance.unwrap_or(i64::MAX / 4))
    }

    fn is_revealed(&self, _address: &str) -> Result<bool, CollaboratorError> {
        Ok(!*self.unrevealed.lock().unwrap())
    }

    fn get_branch(&self) -> Result<String, CollaboratorError> {
        Ok("BLockGenesisGenesisGenesisGenesisGenesisb83baZgbyZe".to_string())
    }
}

// ============================================================================
// Signer
// ============================================================================

#[derive(Default)]
pub struct MockSigner;

impl Signer for MockSigner {
    fn public_key(&self) -> String {
        PAYOUT_PUBLIC_KEY.to_string()
    }

    fn address(&self) -> String {
        PAYOUT_ADDRESS.to_string()
    }

    fn sign(&self, op: &mut DraftOperation) -> Result<(), CollaboratorError> {
        op.signature = Some("edsigmock".to_string());
        Ok(())
    }
}

// ============================================================================
// Transactor
// ============================================================================

pub struct MockOpResult {
    hash: String,
    fail: bool,
}

impl OpResult for MockOpResult {
    fn op_hash(&self) -> String {
        self.hash.clone()
    }

    fn wait_for_apply(&mut self) -> Result<(), CollaboratorError> {
        if self.fail {
            return Err(CollaboratorError::Timeout(format!("{} not applied", self.hash)));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MockTransactor {
    pub limits: Mutex<Option<OperationLimits>>,
    pub dispatched: Mutex<Vec<DraftOperation>>,
    /// Zero-based dispatch indices whose confirmation fails
    pub failing_dispatches: Mutex<HashSet<usize>>,
    /// Request a stop right after this many dispatches
    pub stop_after: Mutex<Option<(usize, StopSignal)>>,
}

impl MockTransactor {
    pub fn new() -> Self {
        Self {
            limits: Mutex::new(Some(limits())),
            ..Default::default()
        }
    }

    pub fn dispatch_count(&self) -> usize {
        self.dispatched.lock().unwrap().len()
    }
}

impl Transactor for MockTransactor {
    fn complete(&self, op: &mut DraftOperation, _public_key: &str) -> Result<(), CollaboratorError> {
        op.branch = "BLockGenesisGenesisGenesisGenesisGenesisb83baZgbyZe".to_string();
        for (i, content) in op.contents.iter_mut().enumerate() {
            content.counter = 1 + i as i64;
        }
        Ok(())
    }

    fn dispatch(&self, op: &DraftOperation, _options: &DispatchOptions) -> Result<Box<dyn OpResult>, CollaboratorError> {
        let mut dispatched = self.dispatched.lock().unwrap();
        let index = dispatched.len();
        dispatched.push(op.clone());

        if let Some((after, stop)) = self.stop_after.lock().unwrap().as_ref() {
            if dispatched.len() == *after {
                stop.request_stop();
            }
        }
        Ok(Box::new(MockOpResult {
            hash: format!("oo{index}"),
            fail: self.failing_dispatches.lock().unwrap().contains(&index),
        }))
    }

    fn get_limits(&self) -> Result<OperationLimits, CollaboratorError> {
        self.limits
            .lock()
            .unwrap()
            .ok_or_else(|| CollaboratorError::Rpc("constants unavailable".to_string()))
    }
}

// ============================================================================
// Reporter & Notifier
// ============================================================================

#[derive(Default)]
pub struct MockReporter {
    /// Latest report per recipe id
    pub reports: Mutex<BTreeMap<String, PayoutReport>>,
    pub invalid: Mutex<Vec<PayoutReport>>,
    pub summaries: Mutex<BTreeMap<i64, CyclePayoutSummary>>,
    pub report_calls: Mutex<usize>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn successful_reports(&self) -> Vec<PayoutReport> {
        self.reports
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.success)
            .cloned()
            .collect()
    }

    pub fn failed_reports(&self) -> Vec<PayoutReport> {
        self.reports
            .lock()
            .unwrap()
            .values()
            .filter(|r| !r.success)
            .cloned()
            .collect()
    }
}

impl Reporter for MockReporter {
    fn get_existing_reports(&self, cycle: i64) -> Result<Vec<PayoutReport>, CollaboratorError> {
        Ok(self
            .reports
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.cycle == cycle)
            .cloned()
            .collect())
    }

    fn report_payouts(&self, reports: &[PayoutReport]) -> Result<(), CollaboratorError> {
        *self.report_calls.lock().unwrap() += 1;
        let mut stored = self.reports.lock().unwrap();
        for report in reports {
            stored.insert(report.id.clone(), report.clone());
        }
        Ok(())
    }

    fn report_invalid_payouts(&self, reports: &[PayoutReport]) -> Result<(), CollaboratorError> {
        self.invalid.lock().unwrap().extend_from_slice(reports);
        Ok(())
    }

    fn report_cycle_summary(&self, summary: &CyclePayoutSummary) -> Result<(), CollaboratorError> {
        self.summaries
            .lock()
            .unwrap()
            .insert(summary.cycle, summary.clone());
        Ok(())
    }

    fn get_existing_cycle_summary(&self, cycle: i64) -> Result<Option<CyclePayoutSummary>, CollaboratorError> {
        Ok(self.summaries.lock().unwrap().get(&cycle).cloned())
    }
}

#[derive(Default)]
pub struct MockNotifier {
    pub messages: Mutex<Vec<String>>,
}

impl AdminNotifier for MockNotifier {
    fn notify_admin(&self, message: &str) -> Result<(), CollaboratorError> {
        self.messages.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

/// Every mock wired into one engine
pub struct Harness {
    pub collector: Arc<MockCollector>,
    pub transactor: Arc<MockTransactor>,
    pub reporter: Arc<MockReporter>,
    pub notifier: Arc<MockNotifier>,
    pub engine: PayoutEngine,
}

impl Harness {
    pub fn new(configuration: PayoutConfiguration, collector: MockCollector) -> Self {
        let collector = Arc::new(collector);
        let transactor = Arc::new(MockTransactor::new());
        let reporter = Arc::new(MockReporter::new());
        let notifier = Arc::new(MockNotifier::default());
        let engine = PayoutEngine::new(configuration)
            .expect("valid configuration")
            .with_collector(collector.clone())
            .with_signer(Arc::new(MockSigner))
            .with_transactor(transactor.clone())
            .with_reporter(reporter.clone())
            .with_notifier(notifier.clone());
        Self {
            collector,
            transactor,
            reporter,
            notifier,
            engine,
        }
    }
}
