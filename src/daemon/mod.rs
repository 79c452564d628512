// src/daemon/mod.rs

//! dnfdaemon service - privileged package-management sessions
//!
//! The daemon owns one package-management session at a time. Unprivileged
//! front-ends connect over a Unix socket, take the session lock, run queries
//! and transactions through it, and receive progress as signals on a separate
//! event stream.
//!
//! ```text
//! front-end                              dnfdaemon
//!      │                                     │
//!      ├─ POST /v1/call {"method":"Lock"} ──►│ permission gate
//!      │◄──────────── {"result": true} ──────┤ session lock
//!      │                                     │
//!      ├─ GET /v1/events ───────────────────►│
//!      │◄───────── SSE signals ──────────────┤ broadcast channel
//! ```
//!
//! # Module Structure
//!
//! - `auth` - Caller identity, authorization brokers, permission gate
//! - `lock` - Session lock state machine and single-instance lock
//! - `watchdog` - Idle/busy watchdog
//! - `session` - Engine session resource
//! - `action` - Derived package actions
//! - `dispatch` - Call dispatcher
//! - `routes` - HTTP routes
//! - `socket` - Unix socket listener
//! - `systemd` - Service manager notifications
//! - `client` - Call bridge and typed client

pub mod action;
pub mod auth;
pub mod client;
pub mod dispatch;
pub mod lock;
pub mod routes;
pub mod session;
pub mod socket;
pub mod systemd;
pub mod watchdog;

use crate::engine::{Catalog, EngineFactory, MemoryEngineFactory, RpmAction, TransactionStage};
use crate::error::{Error, Result};
use axum::Extension;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

pub use action::{PackageAction, classify};
pub use auth::{
    Authority, CallerId, PeerCredentials, PermissionGate, StaticAuthority, default_authority,
};
pub use client::{CallBridge, ClientConfig, DaemonClient, HttpTransport, Transport};
pub use dispatch::{API_VERSION, Dispatcher, MethodCall};
pub use lock::{InstanceLock, LockState, SessionLock};
pub use session::Session;
pub use socket::{DEFAULT_SOCKET_PATH, SocketConfig, SocketManager};
pub use systemd::{SystemdManager, notify_ready, notify_status, notify_stopping};
pub use watchdog::{Activity, TickOutcome, Watchdog};

/// Default PolicyKit action guarding every privileged call
pub const DEFAULT_ACTION_ID: &str = "org.baseurl.DnfSystem";

/// How long shutdown waits for in-flight calls to be answered
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Path to Unix socket (default: /run/dnfdaemon/dnfdaemon.sock)
    pub socket_path: PathBuf,
    /// Socket file mode (default: 0o660)
    pub socket_mode: u32,
    /// Socket group
    pub socket_group: Option<String>,
    /// Single-instance lock file
    pub lock_path: PathBuf,
    /// JSON catalogue backing the engine; an empty system when unset
    pub catalog_path: Option<PathBuf>,
    /// Watchdog tick period
    pub tick_interval: Duration,
    /// Idle ticks before exit while unlocked
    pub idle_timeout_ticks: u64,
    /// Idle ticks before exit while locked
    pub locked_timeout_ticks: u64,
    /// Start with the idle watchdog enabled
    pub watchdog: bool,
    /// Require PolicyKit for untrusted callers
    pub require_polkit: bool,
    /// Groups authorized without asking PolicyKit
    pub trusted_gids: Vec<u32>,
    /// Bounded wait for the authorization broker
    pub auth_timeout: Duration,
    /// PolicyKit action id
    pub action_id: String,
    /// Window for the `recent` package filter
    pub recent_days: u32,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            socket_mode: 0o660,
            socket_group: None,
            lock_path: PathBuf::from(InstanceLock::DEFAULT_PATH),
            catalog_path: None,
            tick_interval: watchdog::DEFAULT_TICK,
            idle_timeout_ticks: watchdog::DEFAULT_IDLE_TICKS,
            locked_timeout_ticks: watchdog::DEFAULT_LOCKED_TICKS,
            watchdog: true,
            require_polkit: true,
            trusted_gids: vec![0],
            auth_timeout: Duration::from_secs(600),
            action_id: DEFAULT_ACTION_ID.to_string(),
            recent_days: 7,
        }
    }
}

impl DaemonConfig {
    pub fn with_socket_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.socket_path = path.into();
        self
    }

    pub fn with_lock_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.lock_path = path.into();
        self
    }

    pub fn with_catalog<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.catalog_path = Some(path.into());
        self
    }

    /// Disable idle termination (`--notimeout`)
    pub fn without_timeout(mut self) -> Self {
        self.watchdog = false;
        self
    }

    fn socket_config(&self) -> SocketConfig {
        SocketConfig {
            unix_path: self.socket_path.clone(),
            unix_mode: self.socket_mode,
            unix_group: self.socket_group.clone(),
        }
    }
}

/// Error response body (RFC 7807 style)
///
/// `name` is the wire error name the client maps back onto [`Error`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProblemDocument {
    pub name: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
}

impl ProblemDocument {
    pub fn from_error(err: &Error) -> Self {
        Self::new(err.wire_name(), err.http_status(), err.to_string())
    }

    /// Request that never reached the dispatcher
    pub fn bad_request(detail: &str) -> Self {
        Self::new(
            Error::Service(String::new()).wire_name(),
            400,
            detail.to_string(),
        )
    }

    fn new(name: String, status: u16, detail: String) -> Self {
        let title = StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("Error")
            .to_string();
        Self {
            name,
            title,
            status,
            detail,
        }
    }

    /// Typed error for the client side
    pub fn into_error(self) -> Error {
        Error::from_wire(&self.name, &self.detail)
    }
}

/// Signals pushed to every event-stream subscriber
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal")]
pub enum DaemonEvent {
    /// Transaction stage change, optionally with the affected package ids
    TransactionEvent {
        event: TransactionStage,
        data: Option<Vec<String>>,
    },
    /// Parallel download batch started
    DownloadStart { num_files: u64, num_bytes: u64 },
    /// Progress within a download batch
    DownloadProgress {
        name: String,
        frac: f64,
        total_frac: f64,
        total_files: u64,
    },
    /// One download finished; `status` 0 is success
    DownloadEnd { name: String, status: i32, msg: String },
    /// Per-file download progress with formatted size and time
    UpdateProgress {
        name: String,
        frac: f64,
        fread: String,
        ftime: String,
    },
    /// Repository metadata loading progress
    RepoMetaDataProgress { name: String, frac: f64 },
    #[serde(rename = "RPMProgress")]
    RpmProgress {
        package: String,
        action: RpmAction,
        te_current: u64,
        te_total: u64,
        ts_current: u64,
        ts_total: u64,
    },
    /// A signing key needs confirmation before import
    #[serde(rename = "GPGImport")]
    GpgImport {
        pkg_id: String,
        userid: String,
        hexkeyid: String,
        keyurl: String,
        timestamp: i64,
    },
}

impl DaemonEvent {
    /// Signal name, also used as the SSE event name
    pub fn name(&self) -> &'static str {
        match self {
            DaemonEvent::TransactionEvent { .. } => "TransactionEvent",
            DaemonEvent::DownloadStart { .. } => "DownloadStart",
            DaemonEvent::DownloadProgress { .. } => "DownloadProgress",
            DaemonEvent::DownloadEnd { .. } => "DownloadEnd",
            DaemonEvent::UpdateProgress { .. } => "UpdateProgress",
            DaemonEvent::RepoMetaDataProgress { .. } => "RepoMetaDataProgress",
            DaemonEvent::RpmProgress { .. } => "RPMProgress",
            DaemonEvent::GpgImport { .. } => "GPGImport",
        }
    }
}

/// Daemon state (shared across handlers)
pub struct DaemonState {
    pub config: DaemonConfig,
    pub dispatcher: Arc<Dispatcher>,
    pub started_at: Instant,
    /// Held for the daemon's lifetime when running as the system service
    instance_lock: Option<InstanceLock>,
}

impl DaemonState {
    /// Wire up session, permission gate and dispatcher for `config`
    pub fn new(
        config: DaemonConfig,
        factory: Arc<dyn EngineFactory>,
        instance_lock: Option<InstanceLock>,
    ) -> Self {
        let authority = default_authority(config.require_polkit, config.trusted_gids.clone());
        Self::with_authority(config, factory, authority, instance_lock)
    }

    pub fn with_authority(
        config: DaemonConfig,
        factory: Arc<dyn EngineFactory>,
        authority: Arc<dyn Authority>,
        instance_lock: Option<InstanceLock>,
    ) -> Self {
        let activity = Arc::new(Activity::new(config.watchdog));
        let session = Arc::new(Session::new(factory, activity));
        let gate = PermissionGate::new(authority, config.action_id.clone(), config.auth_timeout);
        let dispatcher = Arc::new(Dispatcher::new(session, gate, config.recent_days));

        Self {
            config,
            dispatcher,
            started_at: Instant::now(),
            instance_lock,
        }
    }

    pub fn instance_lock(&self) -> Option<&InstanceLock> {
        self.instance_lock.as_ref()
    }
}

/// Check if a daemon holds the instance lock at `lock_path`
pub fn is_daemon_running(lock_path: &std::path::Path) -> bool {
    InstanceLock::is_held(lock_path)
}

/// Build the engine factory named by the configuration
pub fn engine_factory(config: &DaemonConfig) -> Result<Arc<dyn EngineFactory>> {
    match &config.catalog_path {
        Some(path) => {
            info!("Loading package catalogue from {}", path.display());
            Ok(Arc::new(MemoryEngineFactory::load(path)?))
        }
        None => {
            warn!("No catalogue configured, serving an empty system");
            Ok(Arc::new(MemoryEngineFactory::new(Catalog::default())))
        }
    }
}

/// Run the daemon
///
/// Acquires the instance lock, then serves until Exit, watchdog termination
/// or Ctrl-C.
pub async fn run_daemon(config: DaemonConfig) -> Result<()> {
    info!("Starting dnfdaemon version {}", env!("CARGO_PKG_VERSION"));

    let instance_lock = InstanceLock::try_acquire(&config.lock_path)?
        .ok_or_else(|| Error::Service("Another daemon instance is already running".to_string()))?;
    instance_lock.write_pid()?;
    info!("Daemon PID: {}", std::process::id());

    let factory = engine_factory(&config)?;
    let state = Arc::new(DaemonState::new(config, factory, Some(instance_lock)));
    serve(state).await
}

/// Bind the socket and serve calls until shutdown
pub async fn serve(state: Arc<DaemonState>) -> Result<()> {
    use hyper::server::conn::http1;
    use hyper_util::rt::TokioIo;
    use hyper_util::server::graceful::GracefulShutdown;
    use hyper_util::service::TowerToHyperService;

    let mut systemd_manager = SystemdManager::new();
    if systemd_manager.is_systemd() {
        info!("Running under systemd supervision");
    }

    let mut socket_manager = SocketManager::new(state.config.socket_config());
    socket_manager.bind()?;
    let unix_listener = socket_manager
        .take_unix_listener()
        .ok_or_else(|| Error::Service("Unix listener was not bound".to_string()))?;

    let app = routes::build_router(state.clone());
    let dispatcher = state.dispatcher.clone();

    let watchdog = Arc::new(Watchdog::new(
        dispatcher.session().activity().clone(),
        state.config.idle_timeout_ticks,
        state.config.locked_timeout_ticks,
    ));
    let watchdog_task = {
        let locked = dispatcher.clone();
        let terminate = dispatcher.clone();
        let stop = dispatcher.shutdown_signal();
        tokio::spawn(watchdog.run(
            state.config.tick_interval,
            move || locked.session().lock().is_locked(),
            move || terminate.request_shutdown(),
            dispatch::shutdown_requested(stop),
        ))
    };

    systemd_manager.notify_ready(Some("dnfdaemon ready for connections"));
    info!("Daemon ready, accepting connections");

    let graceful = GracefulShutdown::new();
    let shutdown = dispatcher.shutdown_signal();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let tick_interval = systemd_manager.tick_interval();

    loop {
        tokio::select! {
            accepted = tokio::time::timeout(tick_interval, unix_listener.accept()) => {
                match accepted {
                    Ok(Ok((stream, _addr))) => match PeerCredentials::from_socket(&stream) {
                        Ok(creds) => {
                            let caller = CallerId::from_credentials(creds);
                            debug!("Connection from {}", caller);
                            let service =
                                TowerToHyperService::new(app.clone().layer(Extension(caller)));
                            let conn = http1::Builder::new()
                                .serve_connection(TokioIo::new(stream), service);
                            let conn = graceful.watch(conn);
                            tokio::spawn(async move {
                                if let Err(err) = conn.await {
                                    debug!("Error serving connection: {:?}", err);
                                }
                            });
                        }
                        Err(e) => warn!("Rejecting connection without peer credentials: {}", e),
                    },
                    Ok(Err(e)) => error!("Failed to accept connection: {}", e),
                    // housekeeping
                    Err(_) => systemd_manager.watchdog_tick(),
                }
            }
            _ = dispatch::shutdown_requested(shutdown.clone()) => {
                info!("Stopping accept loop");
                break;
            }
            _ = &mut ctrl_c => {
                info!("Received shutdown signal");
                dispatcher.request_shutdown();
                break;
            }
        }
    }

    systemd_manager.notify_stopping();
    info!("Daemon shutting down");

    // request_shutdown already disposed the session; this covers Ctrl-C races
    dispatcher.session().dispose();
    watchdog_task.abort();

    tokio::select! {
        _ = graceful.shutdown() => debug!("All connections closed"),
        _ = tokio::time::sleep(SHUTDOWN_GRACE) => {
            warn!("Timed out waiting for connections to close");
        }
    }

    socket_manager.cleanup();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();

        assert_eq!(
            config.socket_path,
            PathBuf::from("/run/dnfdaemon/dnfdaemon.sock")
        );
        assert_eq!(config.socket_mode, 0o660);
        assert_eq!(config.tick_interval, Duration::from_millis(1000));
        assert_eq!(config.idle_timeout_ticks, 20);
        assert_eq!(config.locked_timeout_ticks, 600);
        assert_eq!(config.trusted_gids, vec![0]);
        assert_eq!(config.action_id, "org.baseurl.DnfSystem");
        assert!(config.watchdog);
        assert!(!config.clone().without_timeout().watchdog);
    }

    #[test]
    fn test_problem_document_round_trip() {
        let problem = ProblemDocument::from_error(&Error::Locked(
            "dnf is locked by another application".to_string(),
        ));
        assert_eq!(problem.status, 409);
        assert_eq!(problem.title, "Conflict");

        let json = serde_json::to_string(&problem).unwrap();
        let parsed: ProblemDocument = serde_json::from_str(&json).unwrap();
        assert!(parsed.into_error().is_locked());
    }

    #[test]
    fn test_daemon_event_serialization() {
        let event = DaemonEvent::TransactionEvent {
            event: TransactionStage::StartRun,
            data: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["signal"], "TransactionEvent");
        assert_eq!(json["event"], "start-run");

        let event = DaemonEvent::RpmProgress {
            package: "foo,0,1.0,1,x86_64,fedora".to_string(),
            action: RpmAction::Install,
            te_current: 10,
            te_total: 100,
            ts_current: 1,
            ts_total: 2,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["signal"], event.name());
        assert_eq!(json["action"], "install");
        let parsed: DaemonEvent = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_state_uses_configured_watchdog() {
        let config = DaemonConfig::default().without_timeout();
        let factory = Arc::new(MemoryEngineFactory::new(Catalog::default()));
        let state = DaemonState::new(config, factory, None);
        assert!(!state.dispatcher.session().activity().is_enabled());
        assert!(state.instance_lock().is_none());
    }
}
