// tests/common/mod.rs

//! Shared helpers for integration tests: a real daemon on a temporary socket.

#![allow(dead_code)]

use dnfdaemon::{ClientConfig, DaemonClient, DaemonConfig};
use std::path::PathBuf;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Catalogue with one installed package, an update behind a signing key,
/// an older build and a group.
pub const CATALOG: &str = r#"{
    "installed": [
        {"name": "foo", "version": "1.0", "release": "1", "arch": "x86_64", "from_repo": "fedora", "size": 100}
    ],
    "repos": [
        {"id": "fedora", "name": "Fedora", "packages": [
            {"name": "foo", "version": "1.0", "release": "1", "arch": "x86_64", "size": 100},
            {"name": "foo", "version": "0.9", "release": "1", "arch": "x86_64", "size": 90},
            {"name": "bar", "version": "3.0", "release": "2", "arch": "noarch", "summary": "Bar tool", "tags": ["cli"]}
        ]},
        {"id": "updates", "name": "Updates", "gpgcheck": true,
         "gpgkey": {"hexkeyid": "ABCD1234", "userid": "Updates", "keyurl": "file:///key", "timestamp": 1700000000},
         "packages": [
            {"name": "foo", "version": "2.0", "release": "1", "arch": "x86_64", "size": 200}
        ]}
    ],
    "categories": [{"id": "apps", "name": "Applications", "groups": ["tools"]}],
    "groups": [{"id": "tools", "name": "Tools", "mandatory": ["bar"]}]
}"#;

pub const FOO_INSTALLED: &str = "foo,0,1.0,1,x86_64,@fedora";
pub const FOO_UPDATE: &str = "foo,0,2.0,1,x86_64,updates";
pub const FOO_OLD: &str = "foo,0,0.9,1,x86_64,fedora";
pub const BAR: &str = "bar,0,3.0,2,noarch,fedora";

const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

/// A daemon serving a catalogue from a temporary directory
///
/// Keep the value alive for the duration of the test; dropping it asks the
/// daemon to exit.
pub struct TestDaemon {
    dir: TempDir,
    pub config: DaemonConfig,
    handle: Option<JoinHandle<dnfdaemon::Result<()>>>,
}

impl TestDaemon {
    pub fn start(catalog: &str) -> Self {
        Self::start_with(catalog, |config| config)
    }

    /// Start with a configuration adjusted by `adjust`
    pub fn start_with(catalog: &str, adjust: impl FnOnce(DaemonConfig) -> DaemonConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let catalog_path = dir.path().join("catalog.json");
        std::fs::write(&catalog_path, catalog).unwrap();

        let config = DaemonConfig {
            require_polkit: false,
            trusted_gids: vec![],
            ..DaemonConfig::default()
        }
        .with_socket_path(dir.path().join("dnfdaemon.sock"))
        .with_lock_path(dir.path().join("dnfdaemon.lock"))
        .with_catalog(catalog_path);
        let config = adjust(config);

        let mut daemon = Self {
            dir,
            config,
            handle: None,
        };
        daemon.handle = Some(spawn_daemon(daemon.config.clone()));
        daemon.wait_until_ready();
        daemon
    }

    fn wait_until_ready(&mut self) {
        let started = Instant::now();
        while started.elapsed() < STARTUP_TIMEOUT {
            if self.handle.as_ref().is_some_and(|h| h.is_finished()) {
                let result = self.handle.take().unwrap().join().unwrap();
                panic!("daemon exited during startup: {:?}", result);
            }
            if self.socket_path().exists() && DaemonClient::connect(self.client_config()).is_ok() {
                return;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        panic!("daemon did not start within {:?}", STARTUP_TIMEOUT);
    }

    pub fn dir(&self) -> &std::path::Path {
        self.dir.path()
    }

    pub fn socket_path(&self) -> PathBuf {
        self.config.socket_path.clone()
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            socket_path: self.socket_path(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn client(&self) -> DaemonClient {
        DaemonClient::connect(self.client_config()).unwrap()
    }

    /// Wait for the daemon thread to finish and return its result
    ///
    /// Returns `None` if it is still running after `timeout`.
    pub fn wait_for_exit(&mut self, timeout: Duration) -> Option<dnfdaemon::Result<()>> {
        let started = Instant::now();
        while started.elapsed() < timeout {
            match &self.handle {
                Some(handle) if !handle.is_finished() => {}
                _ => return self.handle.take().map(|h| h.join().unwrap()),
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        None
    }
}

impl Drop for TestDaemon {
    fn drop(&mut self) {
        if self.handle.as_ref().is_some_and(|h| !h.is_finished()) {
            let stopped = DaemonClient::connect(self.client_config())
                .and_then(|client| client.exit())
                .unwrap_or(false);
            if stopped {
                let _ = self.wait_for_exit(STARTUP_TIMEOUT);
            }
        }
    }
}

/// Run a daemon on its own runtime in a background thread
pub fn spawn_daemon(config: DaemonConfig) -> JoinHandle<dnfdaemon::Result<()>> {
    std::thread::spawn(move || {
        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(dnfdaemon::run_daemon(config))
    })
}
