// src/daemon/lock.rs

//! Locks guarding the package-management session
//!
//! Two locks with different scopes:
//!
//! - **Session lock** ([`SessionLock`]): in-process, single-holder gate over
//!   the mutable engine session. Clients `Lock` before doing anything that
//!   touches packages and `Unlock` when done.
//! - **Instance lock** ([`InstanceLock`]): `flock(LOCK_EX)` on a file, held for
//!   the daemon's lifetime so only one daemon runs at a time.
//!
//! # Session States
//!
//! ```text
//! Unlocked --acquire--> LockedIdle(c) --begin_work--> LockedWorking(c)
//!    ^                     |    ^                          |
//!    +------release--------+    +--------end_work----------+
//! ```

use super::auth::CallerId;
use crate::error::{Error, Result};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Message carried by every lock-ownership failure
const LOCKED_MESSAGE: &str = "dnf is locked by another application";

/// State of the session lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockState {
    Unlocked,
    LockedIdle(CallerId),
    LockedWorking(CallerId),
}

impl LockState {
    pub fn holder(&self) -> Option<&CallerId> {
        match self {
            LockState::Unlocked => None,
            LockState::LockedIdle(c) | LockState::LockedWorking(c) => Some(c),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LockState::Unlocked => "unlocked",
            LockState::LockedIdle(_) => "locked-idle",
            LockState::LockedWorking(_) => "locked-working",
        }
    }
}

/// Single-holder lock over the engine session
#[derive(Debug)]
pub struct SessionLock {
    state: Mutex<LockState>,
}

impl Default for SessionLock {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionLock {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LockState::Unlocked),
        }
    }

    /// Take the lock if nobody holds it
    ///
    /// Returns false when the lock is busy, including when `caller` already
    /// holds it.
    pub fn acquire(&self, caller: &CallerId) -> bool {
        let mut state = self.state.lock();
        match &*state {
            LockState::Unlocked => {
                *state = LockState::LockedIdle(caller.clone());
                info!("LOCK: Locked by {}", caller);
                true
            }
            other => {
                debug!("LOCK: {} refused, state {}", caller, other.as_str());
                false
            }
        }
    }

    /// Give the lock back
    ///
    /// Only the holder may release. The caller is responsible for disposing
    /// the engine session afterwards.
    pub fn release(&self, caller: &CallerId) -> Result<()> {
        let mut state = self.state.lock();
        match state.holder() {
            Some(holder) if holder == caller => {
                *state = LockState::Unlocked;
                info!("UNLOCK: Lock released by {}", caller);
                Ok(())
            }
            _ => Err(Error::Locked(LOCKED_MESSAGE.to_string())),
        }
    }

    /// Fail unless `caller` holds the lock
    pub fn check(&self, caller: &CallerId) -> Result<()> {
        match self.state.lock().holder() {
            Some(holder) if holder == caller => Ok(()),
            _ => Err(Error::Locked(LOCKED_MESSAGE.to_string())),
        }
    }

    /// Mark the holder as working
    pub fn begin_work(&self, caller: &CallerId) -> Result<()> {
        let mut state = self.state.lock();
        match state.holder() {
            Some(holder) if holder == caller => {
                *state = LockState::LockedWorking(caller.clone());
                Ok(())
            }
            _ => Err(Error::Locked(LOCKED_MESSAGE.to_string())),
        }
    }

    /// Back to idle; a no-op unless working
    pub fn end_work(&self) {
        let mut state = self.state.lock();
        if let LockState::LockedWorking(holder) = &*state {
            *state = LockState::LockedIdle(holder.clone());
        }
    }

    /// Drop the lock regardless of holder, for shutdown
    pub fn force_release(&self) {
        let mut state = self.state.lock();
        if let Some(holder) = state.holder() {
            info!("UNLOCK: Lock held by {} dropped at shutdown", holder);
        }
        *state = LockState::Unlocked;
    }

    pub fn state(&self) -> LockState {
        self.state.lock().clone()
    }

    pub fn holder(&self) -> Option<CallerId> {
        self.state.lock().holder().cloned()
    }

    pub fn is_locked(&self) -> bool {
        !matches!(*self.state.lock(), LockState::Unlocked)
    }
}

/// Single-instance process lock
///
/// Held using `flock(LOCK_EX)` for the daemon's entire lifetime and released
/// when dropped.
pub struct InstanceLock {
    /// Kept open to maintain the lock
    #[allow(dead_code)]
    file: File,
    path: PathBuf,
}

impl InstanceLock {
    /// Default lock path for the daemon
    pub const DEFAULT_PATH: &'static str = "/run/dnfdaemon/dnfdaemon.lock";

    /// Try to take the lock without blocking
    ///
    /// Returns `Ok(None)` if another process holds it.
    pub fn try_acquire<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = File::create(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                info!("Acquired instance lock at {:?}", path);
                Ok(Some(Self { file, path }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                debug!("Instance lock already held at {:?}", path);
                Ok(None)
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Whether any process holds the lock, without taking it
    pub fn is_held<P: AsRef<Path>>(path: P) -> bool {
        let Ok(file) = File::open(path.as_ref()) else {
            return false;
        };
        match file.try_lock_exclusive() {
            Ok(()) => {
                let _ = file.unlock();
                false
            }
            Err(_) => true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// PID recorded next to the lock file, if any
    pub fn holder_pid<P: AsRef<Path>>(lock_path: P) -> Option<u32> {
        fs::read_to_string(lock_path.as_ref().with_extension("pid"))
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }

    /// Record our PID next to the lock file
    pub fn write_pid(&self) -> Result<()> {
        fs::write(self.path.with_extension("pid"), std::process::id().to_string())?;
        Ok(())
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(self.path.with_extension("pid"));
        info!("Released instance lock at {:?}", self.path);
    }
}
