// src/daemon/session.rs

//! The package-management session
//!
//! One [`Session`] exists per daemon. It owns the session lock, the activity
//! flags read by the watchdog, the sticky GPG import decisions and a lazily
//! opened engine. The engine is dropped on unlock, after every transaction
//! and at shutdown, so the next use starts from fresh system state.

use super::auth::CallerId;
use super::lock::SessionLock;
use super::watchdog::Activity;
use crate::engine::{Engine, EngineFactory, Package};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// An open engine plus data cached for its lifetime
pub struct EngineSession {
    engine: Box<dyn Engine>,
    obsoletes: Option<Vec<Package>>,
}

impl EngineSession {
    fn new(engine: Box<dyn Engine>) -> Self {
        Self {
            engine,
            obsoletes: None,
        }
    }

    pub fn engine(&mut self) -> &mut dyn Engine {
        self.engine.as_mut()
    }

    /// Forget cached data after the package universe changed
    pub fn invalidate(&mut self) {
        self.obsoletes = None;
    }

    /// Obsoleting packages, computed once per engine session
    pub fn obsoletes(&mut self) -> Result<Vec<Package>> {
        if let Some(cached) = &self.obsoletes {
            return Ok(cached.clone());
        }
        let obsoletes = self.engine.obsoletes()?;
        debug!("Cached {} obsoleting packages", obsoletes.len());
        self.obsoletes = Some(obsoletes.clone());
        Ok(obsoletes)
    }
}

/// Process-wide session state
pub struct Session {
    lock: SessionLock,
    activity: Arc<Activity>,
    factory: Arc<dyn EngineFactory>,
    engine: Mutex<Option<EngineSession>>,
    disposed: AtomicBool,
    gpg_confirmations: Mutex<HashMap<String, bool>>,
}

impl Session {
    pub fn new(factory: Arc<dyn EngineFactory>, activity: Arc<Activity>) -> Self {
        Self {
            lock: SessionLock::new(),
            activity,
            factory,
            engine: Mutex::new(None),
            disposed: AtomicBool::new(false),
            gpg_confirmations: Mutex::new(HashMap::new()),
        }
    }

    pub fn lock(&self) -> &SessionLock {
        &self.lock
    }

    pub fn activity(&self) -> &Arc<Activity> {
        &self.activity
    }

    /// Run `f` against the engine, opening it first if needed
    ///
    /// Fails once the session has been disposed.
    pub fn with_engine<R>(&self, f: impl FnOnce(&mut EngineSession) -> Result<R>) -> Result<R> {
        let mut slot = self.engine.lock();
        if self.disposed.load(Ordering::SeqCst) {
            return Err(Error::Service("session is disposed".to_string()));
        }
        if slot.is_none() {
            info!("Opening engine session");
            *slot = Some(EngineSession::new(self.factory.open()?));
        }
        match slot.as_mut() {
            Some(session) => f(session),
            None => Err(Error::Service("engine session unavailable".to_string())),
        }
    }

    pub fn has_engine(&self) -> bool {
        self.engine.lock().is_some()
    }

    /// Drop the engine; the next use opens a fresh one
    pub fn reset(&self) {
        if self.engine.lock().take().is_some() {
            info!("Engine session closed");
        }
    }

    /// Drop the engine and any lock, for shutdown
    ///
    /// The engine is never reopened afterwards.
    pub fn dispose(&self) {
        {
            let mut slot = self.engine.lock();
            self.disposed.store(true, Ordering::SeqCst);
            if slot.take().is_some() {
                info!("Engine session disposed");
            }
        }
        self.lock.force_release();
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Stored import decision for a signing key
    ///
    /// An unseen key is recorded as not trusted. Returns the decision and
    /// whether the key was new.
    pub fn gpg_decision(&self, hexkeyid: &str) -> (bool, bool) {
        let mut confirmations = self.gpg_confirmations.lock();
        match confirmations.get(hexkeyid) {
            Some(decision) => (*decision, false),
            None => {
                confirmations.insert(hexkeyid.to_string(), false);
                (false, true)
            }
        }
    }

    pub fn set_gpg_decision(&self, hexkeyid: &str, confirmed: bool) {
        info!("GPG key {} import confirmed: {}", hexkeyid, confirmed);
        self.gpg_confirmations
            .lock()
            .insert(hexkeyid.to_string(), confirmed);
    }

    /// Enter the working state for the lock holder
    ///
    /// The returned guard leaves the working state when dropped, also on
    /// error paths.
    pub fn begin_work(&self, caller: &CallerId) -> Result<WorkGuard<'_>> {
        self.lock.begin_work(caller)?;
        self.activity.start_working();
        Ok(WorkGuard { session: self })
    }

    /// Keep the watchdog from terminating the process until the guard drops
    pub fn hold_termination(&self) -> TerminationGuard<'_> {
        self.activity.set_can_terminate(false);
        TerminationGuard {
            activity: &self.activity,
        }
    }
}

/// Working state of a dispatched call
pub struct WorkGuard<'a> {
    session: &'a Session,
}

impl Drop for WorkGuard<'_> {
    fn drop(&mut self) {
        self.session.activity.stop_working();
        self.session.lock.end_work();
    }
}

/// Transaction in progress
pub struct TerminationGuard<'a> {
    activity: &'a Arc<Activity>,
}

impl Drop for TerminationGuard<'_> {
    fn drop(&mut self) {
        self.activity.set_can_terminate(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::lock::LockState;
    use crate::engine::{Catalog, MemoryEngineFactory};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingFactory {
        inner: MemoryEngineFactory,
        opened: AtomicUsize,
    }

    impl EngineFactory for CountingFactory {
        fn open(&self) -> Result<Box<dyn Engine>> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            self.inner.open()
        }
    }

    fn session() -> (Session, Arc<CountingFactory>) {
        let factory = Arc::new(CountingFactory {
            inner: MemoryEngineFactory::new(Catalog::default()),
            opened: AtomicUsize::new(0),
        });
        let session = Session::new(factory.clone(), Arc::new(Activity::new(true)));
        (session, factory)
    }

    #[test]
    fn test_engine_opened_lazily_and_reused() {
        let (session, factory) = session();
        assert!(!session.has_engine());

        session.with_engine(|s| s.engine().installed()).unwrap();
        session.with_engine(|s| s.engine().installed()).unwrap();
        assert_eq!(factory.opened.load(Ordering::SeqCst), 1);

        session.reset();
        assert!(!session.has_engine());
        session.with_engine(|s| s.engine().installed()).unwrap();
        assert_eq!(factory.opened.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_work_guard_restores_on_error() {
        let (session, _) = session();
        let caller = CallerId::new("1000:1").unwrap();
        session.lock().acquire(&caller);

        let result: Result<()> = (|| {
            let _work = session.begin_work(&caller)?;
            assert!(session.activity().is_working());
            assert_eq!(session.lock().state(), LockState::LockedWorking(caller.clone()));
            Err(Error::Transaction("boom".to_string()))
        })();

        assert!(result.is_err());
        assert!(!session.activity().is_working());
        assert_eq!(session.lock().state(), LockState::LockedIdle(caller));
    }

    #[test]
    fn test_begin_work_requires_holder() {
        let (session, _) = session();
        let caller = CallerId::new("1000:1").unwrap();
        assert!(matches!(session.begin_work(&caller), Err(Error::Locked(_))));
        assert!(!session.activity().is_working());
    }

    #[test]
    fn test_termination_guard() {
        let (session, _) = session();
        {
            let _hold = session.hold_termination();
            assert!(!session.activity().can_terminate());
        }
        assert!(session.activity().can_terminate());
    }

    #[test]
    fn test_gpg_decisions_are_sticky() {
        let (session, _) = session();
        assert_eq!(session.gpg_decision("ABCD"), (false, true));
        assert_eq!(session.gpg_decision("ABCD"), (false, false));

        session.set_gpg_decision("ABCD", true);
        assert_eq!(session.gpg_decision("ABCD"), (true, false));
        session.reset();
        assert_eq!(session.gpg_decision("ABCD"), (true, false));
    }

    #[test]
    fn test_disposed_session_stays_closed() {
        let (session, factory) = session();
        let caller = CallerId::new("1000:1").unwrap();
        session.lock().acquire(&caller);
        session.with_engine(|s| s.engine().installed()).unwrap();

        session.dispose();
        assert!(session.is_disposed());
        assert!(!session.has_engine());
        assert!(!session.lock().is_locked());

        let err = session.with_engine(|s| s.engine().installed()).unwrap_err();
        assert!(matches!(err, Error::Service(_)));
        assert!(!session.has_engine());
        assert_eq!(factory.opened.load(Ordering::SeqCst), 1);
    }
}
