// src/daemon/auth.rs

//! Caller identity and the permission gate
//!
//! Provides:
//! - Peer credential extraction (SO_PEERCRED)
//! - Caller identities (`"<uid>:<pid>"`)
//! - The [`Authority`] seam to the system authorization broker
//! - A permission gate that caches successful checks per caller
//!
//! # Security Model
//!
//! - **Root users** (UID 0) and **trusted groups**: always authorized
//! - **Other users**: authorized by PolicyKit when the `polkit` feature is
//!   enabled, denied otherwise (unless PolicyKit is not required)
//!
//! Authorization is asked once per caller. A grant is remembered for the life
//! of the process; a denial is not, so a caller may retry after an interactive
//! prompt.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::io;
use std::os::unix::io::AsRawFd;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Peer credentials from a Unix socket connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerCredentials {
    /// Process ID of the peer
    pub pid: u32,
    /// User ID of the peer
    pub uid: u32,
    /// Group ID of the peer
    pub gid: u32,
}

impl PeerCredentials {
    /// Extract peer credentials from a connected Unix socket
    ///
    /// Uses the SO_PEERCRED socket option; works for both std and tokio
    /// streams.
    pub fn from_socket<S: AsRawFd>(stream: &S) -> io::Result<Self> {
        #[cfg(target_os = "linux")]
        {
            let fd = stream.as_raw_fd();

            let mut cred: libc::ucred = unsafe { std::mem::zeroed() };
            let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;

            let result = unsafe {
                libc::getsockopt(
                    fd,
                    libc::SOL_SOCKET,
                    libc::SO_PEERCRED,
                    &mut cred as *mut _ as *mut libc::c_void,
                    &mut len,
                )
            };

            if result == -1 {
                return Err(io::Error::last_os_error());
            }

            Ok(PeerCredentials {
                pid: cred.pid as u32,
                uid: cred.uid,
                gid: cred.gid,
            })
        }

        #[cfg(not(target_os = "linux"))]
        {
            let _ = stream;
            Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "Peer credentials not supported on this platform",
            ))
        }
    }

    /// Check if the peer is running as root
    pub fn is_root(&self) -> bool {
        self.uid == 0
    }
}

/// Identity of a remote caller
///
/// Equality and hashing use the identity string only; attached credentials
/// are informational and feed the authorization broker.
#[derive(Debug, Clone)]
pub struct CallerId {
    id: String,
    credentials: Option<PeerCredentials>,
}

impl CallerId {
    /// Create a caller identity without credentials
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(Error::InvalidCaller("empty caller identity".to_string()));
        }
        Ok(Self {
            id,
            credentials: None,
        })
    }

    /// Identity of a socket peer, rendered as `"<uid>:<pid>"`
    pub fn from_credentials(credentials: PeerCredentials) -> Self {
        Self {
            id: format!("{}:{}", credentials.uid, credentials.pid),
            credentials: Some(credentials),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.id
    }

    pub fn credentials(&self) -> Option<&PeerCredentials> {
        self.credentials.as_ref()
    }
}

impl PartialEq for CallerId {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for CallerId {}

impl Hash for CallerId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for CallerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// The system authorization broker
pub trait Authority: Send + Sync {
    /// Ask whether `caller` may perform `action_id`, waiting at most `timeout`
    fn check_authorization(
        &self,
        caller: &CallerId,
        action_id: &str,
        timeout: Duration,
    ) -> Result<bool>;
}

/// Credential-based authority
///
/// Root and members of trusted groups are authorized. Everyone else is
/// authorized only when PolicyKit is not required.
#[derive(Debug, Clone)]
pub struct StaticAuthority {
    /// Require PolicyKit for callers that are not trusted
    require_polkit: bool,
    /// Trusted GIDs that are always authorized
    trusted_gids: Vec<u32>,
}

impl Default for StaticAuthority {
    fn default() -> Self {
        Self {
            require_polkit: true,
            trusted_gids: vec![0],
        }
    }
}

impl StaticAuthority {
    pub fn new(require_polkit: bool, trusted_gids: Vec<u32>) -> Self {
        Self {
            require_polkit,
            trusted_gids,
        }
    }

    /// Whether the caller is trusted without asking PolicyKit
    pub fn is_trusted(&self, caller: &CallerId) -> bool {
        match caller.credentials() {
            Some(creds) => creds.is_root() || self.trusted_gids.contains(&creds.gid),
            None => false,
        }
    }
}

impl Authority for StaticAuthority {
    fn check_authorization(
        &self,
        caller: &CallerId,
        action_id: &str,
        _timeout: Duration,
    ) -> Result<bool> {
        if self.is_trusted(caller) {
            return Ok(true);
        }
        if self.require_polkit {
            debug!(
                "{} is not trusted and PolicyKit is unavailable for {}",
                caller, action_id
            );
            return Ok(false);
        }
        Ok(true)
    }
}

/// PolicyKit authority over the system bus
///
/// Trusted callers short-circuit; everyone else is checked as a
/// `unix-process` subject with user interaction allowed.
#[cfg(feature = "polkit")]
pub struct PolkitAuthority {
    trusted: StaticAuthority,
}

#[cfg(feature = "polkit")]
impl PolkitAuthority {
    const DESTINATION: &'static str = "org.freedesktop.PolicyKit1";
    const PATH: &'static str = "/org/freedesktop/PolicyKit1/Authority";
    const INTERFACE: &'static str = "org.freedesktop.PolicyKit1.Authority";
    /// CheckAuthorization flag: AllowUserInteraction
    const ALLOW_USER_INTERACTION: u32 = 1;

    pub fn new(trusted_gids: Vec<u32>) -> Self {
        Self {
            trusted: StaticAuthority::new(true, trusted_gids),
        }
    }
}

#[cfg(feature = "polkit")]
impl Authority for PolkitAuthority {
    fn check_authorization(
        &self,
        caller: &CallerId,
        action_id: &str,
        timeout: Duration,
    ) -> Result<bool> {
        use std::collections::HashMap;
        use zbus::zvariant::Value;

        if self.trusted.is_trusted(caller) {
            return Ok(true);
        }
        let creds = caller
            .credentials()
            .ok_or_else(|| Error::InvalidCaller(format!("{} has no process credentials", caller)))?;

        let bus_err = |e: zbus::Error| Error::Service(format!("PolicyKit: {}", e));
        let conn = zbus::blocking::connection::Builder::system()
            .map_err(bus_err)?
            .method_timeout(timeout)
            .build()
            .map_err(bus_err)?;

        let mut subject: HashMap<&str, Value<'_>> = HashMap::new();
        subject.insert("pid", Value::from(creds.pid));
        subject.insert("start-time", Value::from(0u64));
        subject.insert("uid", Value::from(creds.uid as i32));
        let details: HashMap<&str, &str> = HashMap::new();

        let reply = conn
            .call_method(
                Some(Self::DESTINATION),
                Self::PATH,
                Some(Self::INTERFACE),
                "CheckAuthorization",
                &(
                    ("unix-process", subject),
                    action_id,
                    details,
                    Self::ALLOW_USER_INTERACTION,
                    "",
                ),
            )
            .map_err(bus_err)?;
        let (granted, _challenge, _details): (bool, bool, HashMap<String, String>) =
            reply.body().deserialize().map_err(bus_err)?;
        Ok(granted)
    }
}

/// Build the authority for a configuration
pub fn default_authority(require_polkit: bool, trusted_gids: Vec<u32>) -> Arc<dyn Authority> {
    #[cfg(feature = "polkit")]
    if require_polkit {
        return Arc::new(PolkitAuthority::new(trusted_gids));
    }
    Arc::new(StaticAuthority::new(require_polkit, trusted_gids))
}

/// Per-caller authorization cache in front of an [`Authority`]
pub struct PermissionGate {
    authority: Arc<dyn Authority>,
    action_id: String,
    timeout: Duration,
    authorized: Mutex<HashSet<CallerId>>,
}

impl PermissionGate {
    pub fn new(authority: Arc<dyn Authority>, action_id: impl Into<String>, timeout: Duration) -> Self {
        Self {
            authority,
            action_id: action_id.into(),
            timeout,
            authorized: Mutex::new(HashSet::new()),
        }
    }

    /// Ensure `caller` is authorized, asking the broker at most once per
    /// successful caller
    pub fn check_permission(&self, caller: &CallerId) -> Result<()> {
        if caller.as_str().is_empty() {
            return Err(Error::InvalidCaller("empty caller identity".to_string()));
        }
        if self.authorized.lock().contains(caller) {
            return Ok(());
        }

        // The broker may block on an interactive prompt; don't hold the cache lock
        let granted = self
            .authority
            .check_authorization(caller, &self.action_id, self.timeout)?;
        if !granted {
            warn!("AUTH: {} denied for {}", caller, self.action_id);
            return Err(Error::AccessDenied("Session is not authorized".to_string()));
        }

        info!("AUTH: {} authorized for {}", caller, self.action_id);
        self.authorized.lock().insert(caller.clone());
        Ok(())
    }

    /// Whether a caller has already been authorized
    pub fn is_authorized(&self, caller: &CallerId) -> bool {
        self.authorized.lock().contains(caller)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct CountingAuthority {
        calls: AtomicUsize,
        grant: AtomicBool,
    }

    impl CountingAuthority {
        fn new(grant: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                grant: AtomicBool::new(grant),
            })
        }
    }

    impl Authority for CountingAuthority {
        fn check_authorization(&self, _: &CallerId, _: &str, _: Duration) -> Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.grant.load(Ordering::SeqCst))
        }
    }

    fn gate(authority: Arc<CountingAuthority>) -> PermissionGate {
        PermissionGate::new(authority, "org.baseurl.DnfSystem", Duration::from_secs(600))
    }

    fn user(uid: u32, gid: u32) -> CallerId {
        CallerId::from_credentials(PeerCredentials {
            pid: 4242,
            uid,
            gid,
        })
    }

    #[test]
    fn test_caller_id_format() {
        assert_eq!(user(1000, 1000).as_str(), "1000:4242");
        assert!(matches!(CallerId::new(""), Err(Error::InvalidCaller(_))));
        assert!(matches!(CallerId::new("  "), Err(Error::InvalidCaller(_))));
    }

    #[test]
    fn test_caller_id_equality_ignores_credentials() {
        let plain = CallerId::new("1000:4242").unwrap();
        assert_eq!(plain, user(1000, 1000));
    }

    #[test]
    fn test_gate_caches_success() {
        let authority = CountingAuthority::new(true);
        let gate = gate(authority.clone());
        let caller = user(1000, 1000);

        gate.check_permission(&caller).unwrap();
        gate.check_permission(&caller).unwrap();
        assert_eq!(authority.calls.load(Ordering::SeqCst), 1);
        assert!(gate.is_authorized(&caller));
    }

    #[test]
    fn test_gate_does_not_cache_denial() {
        let authority = CountingAuthority::new(false);
        let gate = gate(authority.clone());
        let caller = user(1000, 1000);

        assert!(matches!(
            gate.check_permission(&caller),
            Err(Error::AccessDenied(_))
        ));
        assert!(!gate.is_authorized(&caller));

        // a later retry may succeed
        authority.grant.store(true, Ordering::SeqCst);
        gate.check_permission(&caller).unwrap();
        assert_eq!(authority.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_static_authority() {
        let strict = StaticAuthority::default();
        let timeout = Duration::from_secs(1);
        assert!(strict.check_authorization(&user(0, 0), "a", timeout).unwrap());
        assert!(!strict.check_authorization(&user(1000, 1000), "a", timeout).unwrap());

        let wheel = StaticAuthority::new(true, vec![10]);
        assert!(wheel.check_authorization(&user(1000, 10), "a", timeout).unwrap());

        let open = StaticAuthority::new(false, vec![]);
        assert!(open.check_authorization(&user(1000, 1000), "a", timeout).unwrap());
        let anonymous = CallerId::new("test-client").unwrap();
        assert!(open.check_authorization(&anonymous, "a", timeout).unwrap());
        assert!(!strict.check_authorization(&anonymous, "a", timeout).unwrap());
    }

    #[test]
    fn test_peer_credentials_of_socket_pair() {
        let (a, _b) = std::os::unix::net::UnixStream::pair().unwrap();
        let creds = PeerCredentials::from_socket(&a).unwrap();
        assert_eq!(creds.pid, std::process::id());
        assert_eq!(creds.uid, unsafe { libc::getuid() });
    }
}
