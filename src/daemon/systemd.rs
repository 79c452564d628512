// src/daemon/systemd.rs

//! Systemd integration for dnfdaemon
//!
//! The daemon reports its state through the notification protocol:
//! - `READY=1` - Socket bound, calls are accepted
//! - `STATUS=<message>` - Human-readable status
//! - `WATCHDOG=1` - Service manager keep-alive (when `WatchdogSec=` is set)
//! - `STOPPING=1` - Shutdown started
//!
//! The service manager keep-alive is unrelated to the idle watchdog in
//! [`super::watchdog`], which decides when the daemon exits on its own.

use std::time::{Duration, Instant};
use tracing::debug;

/// Loop period used when the service manager sets no watchdog
const DEFAULT_HOUSEKEEPING: Duration = Duration::from_secs(60);

/// Systemd notification state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyState<'a> {
    Ready,
    Stopping,
    Status(&'a str),
    Watchdog,
}

impl NotifyState<'_> {
    /// Wire form of the notification
    pub fn as_assignment(&self) -> String {
        match self {
            NotifyState::Ready => "READY=1".to_string(),
            NotifyState::Stopping => "STOPPING=1".to_string(),
            NotifyState::Status(s) => format!("STATUS={}", s),
            NotifyState::Watchdog => "WATCHDOG=1".to_string(),
        }
    }
}

/// Send notifications to systemd
///
/// Returns true if they were delivered (systemd is managing the service).
pub fn notify(states: &[NotifyState<'_>]) -> bool {
    if std::env::var_os("NOTIFY_SOCKET").is_none() {
        return false;
    }

    let sd_states: Vec<sd_notify::NotifyState<'_>> = states
        .iter()
        .map(|s| match s {
            NotifyState::Ready => sd_notify::NotifyState::Ready,
            NotifyState::Stopping => sd_notify::NotifyState::Stopping,
            NotifyState::Status(msg) => sd_notify::NotifyState::Status(msg),
            NotifyState::Watchdog => sd_notify::NotifyState::Watchdog,
        })
        .collect();

    match sd_notify::notify(false, &sd_states) {
        Ok(()) => true,
        Err(e) => {
            debug!("sd_notify failed: {}", e);
            false
        }
    }
}

pub fn notify_ready() -> bool {
    notify(&[NotifyState::Ready])
}

pub fn notify_status(message: &str) -> bool {
    notify(&[NotifyState::Status(message)])
}

pub fn notify_watchdog() -> bool {
    notify(&[NotifyState::Watchdog])
}

pub fn notify_stopping() -> bool {
    notify(&[NotifyState::Stopping])
}

/// Watchdog timeout configured by the service manager
pub fn watchdog_timeout() -> Option<Duration> {
    std::env::var("WATCHDOG_USEC")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .filter(|usec| *usec > 0)
        .map(Duration::from_micros)
}

/// Periodic `WATCHDOG=1` keep-alive
pub struct WatchdogTask {
    interval: Duration,
    last_ping: Instant,
}

impl WatchdogTask {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_ping: Instant::now(),
        }
    }

    /// Keep-alive at half the configured timeout, if one is configured
    pub fn from_env() -> Option<Self> {
        watchdog_timeout().map(|timeout| Self::new(timeout / 2))
    }

    /// Send a ping if one is due; returns true if it was sent
    pub fn tick(&mut self) -> bool {
        if self.last_ping.elapsed() >= self.interval {
            self.last_ping = Instant::now();
            notify_watchdog()
        } else {
            false
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

/// Service-manager state for the accept loop
pub struct SystemdManager {
    watchdog: Option<WatchdogTask>,
    is_systemd: bool,
}

impl Default for SystemdManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemdManager {
    pub fn new() -> Self {
        Self {
            watchdog: WatchdogTask::from_env(),
            is_systemd: std::env::var_os("NOTIFY_SOCKET").is_some(),
        }
    }

    pub fn is_systemd(&self) -> bool {
        self.is_systemd
    }

    /// Report readiness, with an optional status line
    pub fn notify_ready(&self, status: Option<&str>) {
        if !self.is_systemd {
            return;
        }
        match status {
            Some(msg) => notify(&[NotifyState::Ready, NotifyState::Status(msg)]),
            None => notify_ready(),
        };
    }

    pub fn notify_stopping(&self) {
        if self.is_systemd {
            notify_stopping();
        }
    }

    pub fn notify_status(&self, message: &str) {
        if self.is_systemd {
            notify_status(message);
        }
    }

    /// Send a keep-alive if due
    pub fn watchdog_tick(&mut self) {
        if let Some(ref mut wd) = self.watchdog {
            wd.tick();
        }
    }

    /// How often the accept loop should wake for housekeeping
    pub fn tick_interval(&self) -> Duration {
        self.watchdog
            .as_ref()
            .map(|wd| wd.interval())
            .unwrap_or(DEFAULT_HOUSEKEEPING)
            .min(DEFAULT_HOUSEKEEPING)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notify_state_assignment() {
        assert_eq!(NotifyState::Ready.as_assignment(), "READY=1");
        assert_eq!(NotifyState::Stopping.as_assignment(), "STOPPING=1");
        assert_eq!(NotifyState::Watchdog.as_assignment(), "WATCHDOG=1");
        assert_eq!(
            NotifyState::Status("serving").as_assignment(),
            "STATUS=serving"
        );
    }

    #[test]
    fn test_watchdog_task_interval() {
        let mut wd = WatchdogTask::new(Duration::from_secs(3600));
        assert_eq!(wd.interval(), Duration::from_secs(3600));
        // not due yet
        assert!(!wd.tick());
    }

    #[test]
    fn test_tick_interval_is_bounded() {
        let manager = SystemdManager::new();
        let interval = manager.tick_interval();
        assert!(interval > Duration::ZERO);
        assert!(interval <= DEFAULT_HOUSEKEEPING);
    }
}
