//! Cycle Monitor Tests

mod common;

use baker_payouts_core_rs::chain::CollaboratorError;
use baker_payouts_core_rs::CycleMonitorOptions;
use baker_payouts_core_rs::CycleMonitor;
use common::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

// ============================================================================
// Test Helpers
// ============================================================================

fn fast(start_after: Option<i64>) -> CycleMonitorOptions {
    CycleMonitorOptions {
        poll_interval: Duration::from_millis(5),
        error_backoff: Duration::from_millis(5),
        start_after,
    }
}

async fn next_cycle(rx: &mut tokio::sync::mpsc::Receiver<i64>) -> Option<i64> {
    timeout(Duration::from_secs(5), rx.recv()).await.ok().flatten()
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_catches_up_without_gaps() {
    let collector = Arc::new(MockCollector::new());
    *collector.last_cycle.lock().unwrap() = 503;

    let (monitor, mut rx) = CycleMonitor::spawn(collector.clone(), fast(Some(500)));
    assert_eq!(next_cycle(&mut rx).await, Some(501));
    assert_eq!(next_cycle(&mut rx).await, Some(502));
    assert_eq!(next_cycle(&mut rx).await, Some(503));

    *collector.last_cycle.lock().unwrap() = 505;
    assert_eq!(next_cycle(&mut rx).await, Some(504));
    assert_eq!(next_cycle(&mut rx).await, Some(505));
    monitor.shutdown().await;
}

#[tokio::test]
async fn test_first_poll_is_baseline() {
    let collector = Arc::new(MockCollector::new());
    *collector.last_cycle.lock().unwrap() = 600;

    let (monitor, mut rx) = CycleMonitor::spawn(collector.clone(), fast(None));
    // let a few polls pass before the next cycle completes
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(rx.try_recv().is_err(), "the current cycle is not reported");

    *collector.last_cycle.lock().unwrap() = 601;
    assert_eq!(next_cycle(&mut rx).await, Some(601));
    monitor.shutdown().await;
}

#[tokio::test]
async fn test_poll_errors_back_off_and_recover() {
    let collector = Arc::new(MockCollector::new());
    *collector.last_cycle.lock().unwrap() = 701;
    {
        let mut script = collector.cycle_script.lock().unwrap();
        script.push_back(Err(CollaboratorError::Rpc("node unreachable".to_string())));
        script.push_back(Err(CollaboratorError::Timeout("slow node".to_string())));
    }

    let (monitor, mut rx) = CycleMonitor::spawn(collector.clone(), fast(Some(700)));
    assert_eq!(next_cycle(&mut rx).await, Some(701));
    assert!(collector.cycle_script.lock().unwrap().is_empty());
    monitor.shutdown().await;
}

#[tokio::test]
async fn test_cancel_closes_channel() {
    let collector = Arc::new(MockCollector::new());
    let (mut monitor, mut rx) = CycleMonitor::spawn(collector, fast(Some(0)));

    monitor.cancel();
    assert_eq!(timeout(Duration::from_secs(5), rx.recv()).await.ok(), Some(None));
    monitor.shutdown().await;
}

#[tokio::test]
async fn test_engine_spawns_monitor_on_its_collector() {
    let harness = Harness::new(configuration(), MockCollector::new());
    *harness.collector.last_cycle.lock().unwrap() = 42;

    let (monitor, mut rx) = harness
        .engine
        .spawn_cycle_monitor(fast(Some(41)))
        .expect("collector configured");
    assert_eq!(next_cycle(&mut rx).await, Some(42));
    drop(monitor);
    assert_eq!(timeout(Duration::from_secs(5), rx.recv()).await.ok(), Some(None));
}
