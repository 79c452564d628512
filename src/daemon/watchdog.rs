// src/daemon/watchdog.rs

//! Idle/busy watchdog
//!
//! A periodic tick counts how long the daemon has been idle and asks for
//! termination once a threshold is crossed. Thresholds differ by lock state:
//! an unlocked daemon exits quickly, a locked one waits for its client much
//! longer.
//!
//! Ticks are suppressed entirely while the watchdog is disabled or a call is
//! working. Termination is further held back while a transaction is running
//! (`can_terminate` false); the request is dropped and re-evaluated on the next
//! tick.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// Default tick period
pub const DEFAULT_TICK: Duration = Duration::from_millis(1000);

/// Idle ticks tolerated while unlocked
pub const DEFAULT_IDLE_TICKS: u64 = 20;

/// Idle ticks tolerated while locked
pub const DEFAULT_LOCKED_TICKS: u64 = 600;

/// Activity flags shared between the dispatcher and the watchdog
#[derive(Debug)]
pub struct Activity {
    working: AtomicBool,
    can_terminate: AtomicBool,
    enabled: AtomicBool,
    ticks: AtomicU64,
}

impl Default for Activity {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Activity {
    pub fn new(enabled: bool) -> Self {
        Self {
            working: AtomicBool::new(false),
            can_terminate: AtomicBool::new(true),
            enabled: AtomicBool::new(enabled),
            ticks: AtomicU64::new(0),
        }
    }

    /// Mark a call as working and restart the idle count
    pub fn start_working(&self) {
        self.working.store(true, Ordering::SeqCst);
        self.ticks.store(0, Ordering::SeqCst);
    }

    pub fn stop_working(&self) {
        self.working.store(false, Ordering::SeqCst);
    }

    pub fn is_working(&self) -> bool {
        self.working.load(Ordering::SeqCst)
    }

    pub fn set_can_terminate(&self, value: bool) {
        self.can_terminate.store(value, Ordering::SeqCst);
    }

    pub fn can_terminate(&self) -> bool {
        self.can_terminate.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, value: bool) {
        self.enabled.store(value, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    pub fn reset_ticks(&self) {
        self.ticks.store(0, Ordering::SeqCst);
    }
}

/// Result of a single watchdog tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Disabled, working, or already terminated; nothing counted
    Suppressed,
    /// Still under the threshold
    Counting(u64),
    /// Over the threshold but a transaction is running
    Deferred(u64),
    /// Over the threshold; the daemon should exit
    Terminate,
}

/// Tick counter with lock-dependent thresholds
#[derive(Debug)]
pub struct Watchdog {
    activity: Arc<Activity>,
    idle_threshold: u64,
    locked_threshold: u64,
    fired: AtomicBool,
}

impl Watchdog {
    pub fn new(activity: Arc<Activity>, idle_threshold: u64, locked_threshold: u64) -> Self {
        Self {
            activity,
            idle_threshold,
            locked_threshold,
            fired: AtomicBool::new(false),
        }
    }

    pub fn activity(&self) -> &Arc<Activity> {
        &self.activity
    }

    /// Advance the counter by one tick
    pub fn tick(&self, locked: bool) -> TickOutcome {
        if self.fired.load(Ordering::SeqCst)
            || !self.activity.is_enabled()
            || self.activity.is_working()
        {
            return TickOutcome::Suppressed;
        }

        let count = self.activity.ticks.fetch_add(1, Ordering::SeqCst) + 1;
        let threshold = if locked {
            self.locked_threshold
        } else {
            self.idle_threshold
        };

        if count <= threshold {
            debug!("Watchdog : {}", count);
            return TickOutcome::Counting(count);
        }
        if !self.activity.can_terminate() {
            debug!("Watchdog : {} (transaction running, not terminating)", count);
            return TickOutcome::Deferred(count);
        }
        if self.fired.swap(true, Ordering::SeqCst) {
            return TickOutcome::Suppressed;
        }
        info!(
            "Watchdog: idle for {} ticks ({}), terminating",
            count,
            if locked { "locked" } else { "unlocked" }
        );
        TickOutcome::Terminate
    }

    /// Tick every `period` until termination fires or `stop` resolves
    ///
    /// `is_locked` is sampled on each tick; `terminate` runs once.
    pub async fn run<L, T, S>(self: Arc<Self>, period: Duration, is_locked: L, terminate: T, stop: S)
    where
        L: Fn() -> bool,
        T: FnOnce(),
        S: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(period);
        // the first tick of a tokio interval completes immediately
        interval.tick().await;
        tokio::pin!(stop);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if self.tick(is_locked()) == TickOutcome::Terminate {
                        terminate();
                        return;
                    }
                }
                _ = &mut stop => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn watchdog() -> Watchdog {
        Watchdog::new(Arc::new(Activity::new(true)), 20, 600)
    }

    #[test]
    fn test_terminates_once_after_idle_threshold() {
        let wd = watchdog();
        let mut terminations = 0;
        for n in 1..=30 {
            match wd.tick(false) {
                TickOutcome::Terminate => {
                    assert_eq!(n, 21);
                    terminations += 1;
                }
                TickOutcome::Counting(c) => assert_eq!(c, n),
                TickOutcome::Suppressed => assert!(n > 21),
                TickOutcome::Deferred(_) => panic!("unexpected deferral"),
            }
        }
        assert_eq!(terminations, 1);
    }

    #[test]
    fn test_working_tick_does_not_count() {
        let wd = watchdog();
        wd.tick(false);
        wd.activity().start_working();
        assert_eq!(wd.tick(false), TickOutcome::Suppressed);
        assert_eq!(wd.activity().ticks(), 0);

        wd.activity().stop_working();
        assert_eq!(wd.tick(false), TickOutcome::Counting(1));
    }

    #[test]
    fn test_disabled_does_not_count() {
        let wd = watchdog();
        wd.activity().set_enabled(false);
        for _ in 0..50 {
            assert_eq!(wd.tick(false), TickOutcome::Suppressed);
        }
        assert_eq!(wd.activity().ticks(), 0);
    }

    #[test]
    fn test_locked_threshold() {
        let wd = watchdog();
        for _ in 0..30 {
            assert!(matches!(wd.tick(true), TickOutcome::Counting(_)));
        }
        // unlocking makes the same count exceed the idle threshold
        assert_eq!(wd.tick(false), TickOutcome::Terminate);
    }

    #[test]
    fn test_terminates_once_after_locked_threshold() {
        let wd = Watchdog::new(Arc::new(Activity::new(true)), 2, 5);
        for n in 1..=5 {
            assert_eq!(wd.tick(true), TickOutcome::Counting(n));
        }
        assert_eq!(wd.tick(true), TickOutcome::Terminate);
        assert_eq!(wd.tick(true), TickOutcome::Suppressed);
        assert_eq!(wd.tick(false), TickOutcome::Suppressed);
    }

    #[test]
    fn test_deferred_while_transaction_runs() {
        let wd = watchdog();
        wd.activity().set_can_terminate(false);
        for _ in 0..20 {
            wd.tick(false);
        }
        assert_eq!(wd.tick(false), TickOutcome::Deferred(21));
        assert_eq!(wd.tick(false), TickOutcome::Deferred(22));

        wd.activity().set_can_terminate(true);
        assert_eq!(wd.tick(false), TickOutcome::Terminate);
    }

    #[tokio::test]
    async fn test_run_calls_terminate() {
        let wd = Arc::new(Watchdog::new(Arc::new(Activity::new(true)), 3, 600));
        let (tx, rx) = tokio::sync::oneshot::channel();
        wd.clone()
            .run(
                Duration::from_millis(10),
                || false,
                move || {
                    let _ = tx.send(());
                },
                std::future::pending(),
            )
            .await;
        assert!(rx.await.is_ok());
        assert_eq!(wd.activity().ticks(), 4);
    }
}
