// src/error.rs

//! Error types for dnfdaemon
//!
//! Every error that can cross the call interface has a stable wire name
//! (`org.baseurl.DnfSystem.<Kind>Error`). The server renders errors with that
//! name and the client maps the name back onto the same variant.

use thiserror::Error;

/// Prefix shared by every wire error name
pub const ERROR_PREFIX: &str = "org.baseurl.DnfSystem";

/// Result type for dnfdaemon operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the daemon, the engine seam and the client bridge
#[derive(Error, Debug)]
pub enum Error {
    /// The authorization broker refused the caller
    #[error("{0}")]
    AccessDenied(String),

    /// The session lock is held by another caller, or is required but absent
    #[error("{0}")]
    Locked(String),

    /// The engine failed to resolve or commit a transaction
    #[error("{0}")]
    Transaction(String),

    /// The operation is not provided by the current engine
    #[error("{0}")]
    NotImplemented(String),

    /// A package id string did not decode
    #[error("malformed package id '{id}': {reason}")]
    MalformedId { id: String, reason: String },

    /// No package record matches a package id
    #[error("package not found: {0}")]
    PackageNotFound(String),

    /// Caller identity was missing or empty
    #[error("invalid caller: {0}")]
    InvalidCaller(String),

    /// Unclassified engine or transport error
    #[error("{0}")]
    Service(String),

    /// The client gave up waiting for a reply
    #[error("no reply within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// A blocking call was attempted while another one is waiting
    #[error("a call is already waiting for its reply on this client")]
    ReentrantCall,

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Short kind used to build the wire name
    fn kind(&self) -> &'static str {
        match self {
            Error::AccessDenied(_) => "AccessDenied",
            Error::Locked(_) => "Locked",
            Error::Transaction(_) => "Transaction",
            Error::NotImplemented(_) => "NotImplemented",
            Error::MalformedId { .. } => "MalformedId",
            Error::PackageNotFound(_) => "PackageNotFound",
            Error::InvalidCaller(_) => "InvalidCaller",
            Error::Timeout { .. } => "Timeout",
            Error::ReentrantCall => "ReentrantCall",
            Error::Config(_) => "Config",
            Error::Service(_) | Error::Io(_) | Error::Json(_) => "Service",
        }
    }

    /// Fully qualified error name as sent over the call interface
    pub fn wire_name(&self) -> String {
        format!("{}.{}Error", ERROR_PREFIX, self.kind())
    }

    /// HTTP status used when the error is rendered as a problem document
    pub fn http_status(&self) -> u16 {
        match self {
            Error::AccessDenied(_) => 403,
            Error::Locked(_) => 409,
            Error::MalformedId { .. } | Error::InvalidCaller(_) => 400,
            Error::PackageNotFound(_) => 404,
            Error::NotImplemented(_) => 501,
            Error::Timeout { .. } => 504,
            _ => 500,
        }
    }

    /// Rebuild a typed error from a wire name and message
    ///
    /// Names are matched by suffix so that both the current and the legacy
    /// (`Yum*`) names map onto the same variant. Anything unrecognized becomes
    /// `Service` with the original name and message preserved.
    pub fn from_wire(name: &str, message: &str) -> Self {
        let kind = name.rsplit('.').next().unwrap_or(name);
        let message = message.to_string();
        match kind {
            "AccessDeniedError" => Error::AccessDenied(message),
            "LockedError" | "YumLockedError" => Error::Locked(message),
            "TransactionError" | "YumTransactionError" => Error::Transaction(message),
            "NotImplementedError" | "YumNotImplementedError" => Error::NotImplemented(message),
            "MalformedIdError" => Error::MalformedId {
                id: String::new(),
                reason: message,
            },
            "PackageNotFoundError" => Error::PackageNotFound(message),
            "InvalidCallerError" => Error::InvalidCaller(message),
            "ServiceError" => Error::Service(message),
            _ if name.is_empty() => Error::Service(message),
            _ => Error::Service(format!("{}: {}", name, message)),
        }
    }

    /// Check whether this error only reflects a busy or foreign lock
    pub fn is_locked(&self) -> bool {
        matches!(self, Error::Locked(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names() {
        assert_eq!(
            Error::AccessDenied("no".into()).wire_name(),
            "org.baseurl.DnfSystem.AccessDeniedError"
        );
        assert_eq!(
            Error::Locked("busy".into()).wire_name(),
            "org.baseurl.DnfSystem.LockedError"
        );
        let io = Error::Io(std::io::Error::other("boom"));
        assert_eq!(io.wire_name(), "org.baseurl.DnfSystem.ServiceError");
    }

    #[test]
    fn test_from_wire_known_names() {
        let err = Error::from_wire("org.baseurl.DnfSystem.AccessDeniedError", "denied");
        assert!(matches!(err, Error::AccessDenied(ref m) if m == "denied"));

        let err = Error::from_wire("org.baseurl.Yum.YumLockedError", "held");
        assert!(err.is_locked());

        let err = Error::from_wire("org.baseurl.DnfSystem.NotImplementedError", "later");
        assert!(matches!(err, Error::NotImplemented(_)));
    }

    #[test]
    fn test_from_wire_unknown_keeps_text() {
        let err = Error::from_wire("org.example.Weird", "something odd");
        match err {
            Error::Service(msg) => {
                assert!(msg.contains("org.example.Weird"));
                assert!(msg.contains("something odd"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_http_status() {
        assert_eq!(Error::AccessDenied(String::new()).http_status(), 403);
        assert_eq!(Error::Locked(String::new()).http_status(), 409);
        assert_eq!(Error::PackageNotFound(String::new()).http_status(), 404);
        assert_eq!(Error::Service(String::new()).http_status(), 500);
    }
}
