//! Error types for the caching layer and both store clients.

use crate::config::{Role, StoreKind};
use std::fmt;

/// Result type for cache and store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for cache-table.
///
/// Variants map onto the failure classes of the two stores:
/// configuration mistakes are fatal, connection and transient query
/// failures are retried up to a bound, duplicate keys are classified
/// so callers can react to them specifically.
#[derive(Debug, Clone)]
pub enum Error {
    /// Malformed record structure, unknown field or type, missing store section.
    ///
    /// This is a programmer error and is never retried.
    ConfigError(String),

    /// Connecting or authenticating to a store failed after every attempt.
    ConnectionError {
        /// Which store the connection was for.
        store: StoreKind,
        /// Server alias from the configuration.
        server: String,
        /// Role the connection serves.
        role: Role,
        /// Number of attempts made before giving up.
        attempts: u32,
        /// Last failure reported by the driver.
        message: String,
    },

    /// A relational statement kept losing its connection.
    ///
    /// Raised once the retry budget is exhausted; the same statement was
    /// re-issued `attempts` times.
    TransientQueryError {
        attempts: u32,
        message: String,
        sql: String,
    },

    /// Duplicate key violation on the relational store.
    ///
    /// Carries the violated key so callers can treat it as "already exists".
    DuplicateKey {
        key_name: String,
        key_value: String,
        message: String,
    },

    /// Non-transient statement error (syntax, constraint other than duplicate key).
    QueryError { code: Option<u32>, message: String },

    /// The transport to a store was lost.
    ///
    /// Store clients treat this as a signal to drop the connection; the
    /// relational client retries the statement on it.
    Disconnected(String),

    /// A connect or call exceeded its configured timeout.
    Timeout(String),

    /// Key/value store error.
    ///
    /// Inside the batched fetch these are absorbed and downgraded to misses.
    BackendError(String),

    /// Data repository error that does not fit the relational classes.
    RepositoryError(String),

    /// Serialization failed when converting a record to cache bytes.
    SerializationError(String),

    /// Deserialization failed when converting cache bytes to a record.
    DeserializationError(String),

    /// Cache entry with a bad magic header or the wrong family tag.
    InvalidCacheEntry(String),

    /// Cache entry written with a different wire format version.
    VersionMismatch {
        /// Version this build writes
        expected: u8,
        /// Version found in the entry
        found: u8,
    },

    /// A value or record failed a shape check.
    ValidationError(String),

    /// Operation not supported by this backend.
    NotImplemented(String),

    /// Generic error with custom message.
    Other(String),
}

impl Error {
    /// True for failures that reconnecting and re-running may fix.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Disconnected(_) | Error::Timeout(_))
    }

    /// True for a classified duplicate key violation.
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, Error::DuplicateKey { .. })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ConfigError(msg) => write!(f, "Config error: {}", msg),
            Error::ConnectionError {
                store,
                server,
                role,
                attempts,
                message,
            } => write!(
                f,
                "Failed to connect to {} server '{}' ({}) after {} attempt(s): {}",
                store, server, role, attempts, message
            ),
            Error::TransientQueryError {
                attempts,
                message,
                sql,
            } => write!(
                f,
                "Query failed after {} attempt(s): {}\n{}",
                attempts, message, sql
            ),
            Error::DuplicateKey {
                key_name,
                key_value,
                ..
            } => write!(
                f,
                "Duplicate key: '{}' already exists for key '{}'",
                key_value, key_name
            ),
            Error::QueryError {
                code: Some(code),
                message,
            } => write!(f, "Query error ({}): {}", code, message),
            Error::QueryError {
                code: None,
                message,
            } => write!(f, "Query error: {}", message),
            Error::Disconnected(msg) => write!(f, "Disconnected: {}", msg),
            Error::Timeout(msg) => write!(f, "Timeout: {}", msg),
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::RepositoryError(msg) => write!(f, "Repository error: {}", msg),
            Error::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            Error::DeserializationError(msg) => write!(f, "Deserialization error: {}", msg),
            Error::InvalidCacheEntry(msg) => write!(f, "Invalid cache entry: {}", msg),
            Error::VersionMismatch { expected, found } => write!(
                f,
                "Cache version mismatch: expected {}, found {}",
                expected, found
            ),
            Error::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            Error::NotImplemented(msg) => write!(f, "Not implemented: {}", msg),
            Error::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

// ============================================================================
// Conversions from other error types
// ============================================================================

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        if e.is_io() {
            Error::BackendError(e.to_string())
        } else if e.is_syntax() || e.is_data() {
            Error::ConfigError(e.to_string())
        } else {
            Error::SerializationError(e.to_string())
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Disconnected(e.to_string())
    }
}

impl From<String> for Error {
    fn from(e: String) -> Self {
        Error::Other(e)
    }
}

impl From<&str> for Error {
    fn from(e: &str) -> Self {
        Error::Other(e.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
            Error::Disconnected(format!("Redis error: {}", e))
        } else if e.is_timeout() {
            Error::Timeout(format!("Redis error: {}", e))
        } else {
            Error::BackendError(format!("Redis error: {}", e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::ValidationError("Test".to_string());
        assert_eq!(err.to_string(), "Validation error: Test");
    }

    #[test]
    fn test_error_from_string() {
        let err: Error = "test error".into();
        assert!(matches!(err, Error::Other(_)));
    }

    #[test]
    fn test_transient_query_error_reports_attempts() {
        let err = Error::TransientQueryError {
            attempts: 5,
            message: "server has gone away".to_string(),
            sql: "SELECT 1".to_string(),
        };
        assert!(err.to_string().contains("after 5 attempt(s)"));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_connection_error_display() {
        let err = Error::ConnectionError {
            store: StoreKind::KeyValue,
            server: "session".to_string(),
            role: Role::Read,
            attempts: 5,
            message: "refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to connect to key/value server 'session' (read) after 5 attempt(s): refused"
        );
    }

    #[test]
    fn test_predicates() {
        assert!(Error::Disconnected("gone".into()).is_transient());
        assert!(Error::Timeout("slow".into()).is_transient());
        assert!(!Error::BackendError("x".into()).is_transient());
        let dup = Error::DuplicateKey {
            key_name: "email".into(),
            key_value: "a@x.com".into(),
            message: String::new(),
        };
        assert!(dup.is_duplicate_key());
    }
}
