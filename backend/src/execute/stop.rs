//! Cooperative cancellation of a payout run
//!
//! A stop request never interrupts a batch mid-flight: the execute loop
//! checks [`StopSignal::is_stop_requested`] before each batch, and the
//! dispatch plus confirmation of a batch runs inside
//! [`StopSignal::guarded`]. The balance wait of the prepare stage sleeps
//! through [`StopSignal::wait`] so a request also ends it.
//!
//! A request belongs to one run: the engine clears it with
//! [`StopSignal::reset`] once that run has honoured it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Longest uninterrupted sleep inside [`StopSignal::wait`]
const WAIT_SLICE: Duration = Duration::from_millis(100);

/// Shared stop flag; clones observe the same state
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    requested: Arc<AtomicBool>,
    in_critical_section: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Clear a request so the next run starts fresh
    pub fn reset(&self) {
        self.requested.store(false, Ordering::SeqCst);
    }

    /// Sleep for `duration` unless a stop is requested first
    ///
    /// # Returns
    /// `true` when the wait ended because of a stop request.
    pub fn wait(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_stop_requested() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep((deadline - now).min(WAIT_SLICE));
        }
    }

    /// A batch is being dispatched or confirmed right now
    pub fn is_in_critical_section(&self) -> bool {
        self.in_critical_section.load(Ordering::SeqCst)
    }

    /// Run `f` as a critical section
    pub fn guarded<R>(&self, f: impl FnOnce() -> R) -> R {
        let _section = CriticalSection::enter(&self.in_critical_section);
        f()
    }
}

struct CriticalSection<'a>(&'a AtomicBool);

impl<'a> CriticalSection<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for CriticalSection<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_the_request() {
        let signal = StopSignal::new();
        let handle = signal.clone();
        assert!(!signal.is_stop_requested());
        handle.request_stop();
        assert!(signal.is_stop_requested());
    }

    #[test]
    fn test_guarded_marks_critical_section() {
        let signal = StopSignal::new();
        let observer = signal.clone();
        let seen = signal.guarded(|| observer.is_in_critical_section());
        assert!(seen);
        assert!(!signal.is_in_critical_section());
    }

    #[test]
    fn test_reset_clears_request_for_every_clone() {
        let signal = StopSignal::new();
        let handle = signal.clone();
        handle.request_stop();
        signal.reset();
        assert!(!handle.is_stop_requested());
    }

    #[test]
    fn test_wait_returns_early_on_stop() {
        let signal = StopSignal::new();
        assert!(!signal.wait(Duration::ZERO));

        let handle = signal.clone();
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            handle.request_stop();
        });
        let started = Instant::now();
        assert!(signal.wait(Duration::from_secs(30)));
        assert!(started.elapsed() < Duration::from_secs(5));
        stopper.join().unwrap();
    }

    #[test]
    fn test_stop_during_section_does_not_abort_it() {
        let signal = StopSignal::new();
        let handle = signal.clone();
        let value = signal.guarded(|| {
            handle.request_stop();
            42
        });
        assert_eq!(value, 42);
        assert!(signal.is_stop_requested());
    }
}
