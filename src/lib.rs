// src/lib.rs

//! dnfdaemon - privileged package-management session service
//!
//! A long-running daemon that lets unprivileged front-ends drive package
//! queries and transactions on the system's behalf.
//!
//! # Architecture
//!
//! - Exclusive session: one caller at a time holds the session lock
//! - Permission gate: every privileged call is authorized once per caller
//! - Idle watchdog: the daemon exits on its own when nobody uses it
//! - Two channels: request/reply calls plus a broadcast signal stream
//! - Engine seam: package management proper sits behind the `Engine` trait

pub mod config;
pub mod daemon;
pub mod engine;
pub mod error;
pub mod package_id;
pub mod version;

pub use daemon::client::{ClientConfig, DaemonClient};
pub use daemon::{DaemonConfig, DaemonEvent, run_daemon};
pub use engine::{Engine, EngineFactory, EventSink};
pub use error::{ERROR_PREFIX, Error, Result};
pub use package_id::PackageId;
