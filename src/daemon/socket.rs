// src/daemon/socket.rs

//! Unix socket listener for dnfdaemon
//!
//! The daemon only listens on a Unix domain socket. Access is limited by the
//! socket file's mode and group; callers are identified per connection from
//! `SO_PEERCRED` (see [`super::auth::PeerCredentials`]).

use crate::error::{Error, Result};
use std::ffi::CString;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tokio::net::UnixListener;
use tracing::{info, warn};

/// Default socket path
pub const DEFAULT_SOCKET_PATH: &str = "/run/dnfdaemon/dnfdaemon.sock";

/// Socket configuration
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Path to Unix socket
    pub unix_path: PathBuf,
    /// Unix socket file permissions
    pub unix_mode: u32,
    /// Optional group for socket ownership
    pub unix_group: Option<String>,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            unix_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            unix_mode: 0o660,
            unix_group: None,
        }
    }
}

/// Owns the daemon's listening socket and its file
pub struct SocketManager {
    config: SocketConfig,
    unix_listener: Option<UnixListener>,
    bound: bool,
}

impl SocketManager {
    pub fn new(config: SocketConfig) -> Self {
        Self {
            config,
            unix_listener: None,
            bound: false,
        }
    }

    /// Bind the configured socket
    ///
    /// A stale socket file left by a previous run is replaced. Must be called
    /// from within a tokio runtime.
    pub fn bind(&mut self) -> Result<()> {
        let path = &self.config.unix_path;
        if path.exists() {
            std::fs::remove_file(path)?;
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(path).map_err(|e| {
            Error::Service(format!(
                "Failed to bind Unix socket at {}: {}",
                path.display(),
                e
            ))
        })?;
        self.bound = true;

        std::fs::set_permissions(path, std::fs::Permissions::from_mode(self.config.unix_mode))?;

        if let Some(ref group) = self.config.unix_group {
            set_socket_group(path, group)?;
        }

        info!(
            "Listening on Unix socket: {} (mode: {:o})",
            path.display(),
            self.config.unix_mode
        );

        self.unix_listener = Some(listener);
        Ok(())
    }

    pub fn unix_listener(&self) -> Option<&UnixListener> {
        self.unix_listener.as_ref()
    }

    /// Take ownership of the Unix listener
    pub fn take_unix_listener(&mut self) -> Option<UnixListener> {
        self.unix_listener.take()
    }

    pub fn socket_path(&self) -> &Path {
        &self.config.unix_path
    }

    /// Remove the socket file if this manager created it
    pub fn cleanup(&mut self) {
        if !self.bound {
            return;
        }
        self.bound = false;
        if self.config.unix_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.config.unix_path) {
                warn!("Failed to remove socket file: {}", e);
            }
        }
    }
}

impl Drop for SocketManager {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Look up a group id by name
fn group_id(group_name: &str) -> Result<Option<u32>> {
    let group_cstr = CString::new(group_name)
        .map_err(|_| Error::Config(format!("Invalid group name: {}", group_name)))?;

    // SAFETY: getgrnam returns NULL or a pointer to static storage that is
    // valid until the next getgr* call on this thread.
    let gid = unsafe {
        let grp = libc::getgrnam(group_cstr.as_ptr());
        if grp.is_null() {
            None
        } else {
            Some((*grp).gr_gid)
        }
    };
    Ok(gid)
}

/// Set group ownership on a socket file
///
/// A missing group leaves the file with its default group.
fn set_socket_group(path: &Path, group_name: &str) -> Result<()> {
    use nix::unistd::{Gid, chown};

    let Some(gid) = group_id(group_name)? else {
        warn!(
            "Group '{}' not found, socket keeps its default group",
            group_name
        );
        return Ok(());
    };

    chown(path, None, Some(Gid::from_raw(gid)))
        .map_err(|e| Error::Service(format!("Failed to set socket group: {}", e)))?;
    info!("Socket group set to {} ({})", group_name, gid);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(path: PathBuf) -> SocketConfig {
        SocketConfig {
            unix_path: path,
            unix_mode: 0o660,
            unix_group: None,
        }
    }

    #[tokio::test]
    async fn test_bind_sets_mode() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("run/dnfdaemon.sock");

        let mut manager = SocketManager::new(config(socket_path.clone()));
        manager.bind().unwrap();

        assert!(socket_path.exists());
        assert!(manager.unix_listener().is_some());
        let mode = std::fs::metadata(&socket_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o660);
    }

    #[tokio::test]
    async fn test_bind_replaces_stale_socket() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("dnfdaemon.sock");
        std::fs::write(&socket_path, b"stale").unwrap();

        let mut manager = SocketManager::new(config(socket_path.clone()));
        manager.bind().unwrap();
        assert!(manager.take_unix_listener().is_some());
        assert!(manager.take_unix_listener().is_none());
    }

    #[tokio::test]
    async fn test_cleanup_on_drop() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("dnfdaemon.sock");

        {
            let mut manager = SocketManager::new(config(socket_path.clone()));
            manager.bind().unwrap();
            assert!(socket_path.exists());
        }

        assert!(!socket_path.exists());
    }

    #[test]
    fn test_unbound_manager_leaves_file() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("other.sock");
        std::fs::write(&socket_path, b"not ours").unwrap();

        drop(SocketManager::new(config(socket_path.clone())));
        assert!(socket_path.exists());
    }

    #[test]
    fn test_group_lookup() {
        assert!(group_id("no-such-group-dnfdaemon").unwrap().is_none());
        assert!(matches!(group_id("bad\0name"), Err(Error::Config(_))));
    }
}
