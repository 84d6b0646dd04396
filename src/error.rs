//! Error types for the store layer.

use std::fmt;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the cache and reset services.
///
/// Every method on [`CacheService`](crate::CacheService) and
/// [`StoreResetService`](crate::StoreResetService) is fallible. Transport
/// failures are propagated unmodified; nothing here retries.
#[derive(Debug, Clone)]
pub enum Error {
    /// The key-value store could not be reached.
    ///
    /// Common causes:
    /// - Connection refused or dropped
    /// - Pool exhausted or closed
    /// - Network I/O error
    ///
    /// **Recovery:** Retryable by the caller.
    StoreUnavailable(String),

    /// The store was reachable but rejected the command.
    ///
    /// Typically a type error such as running `INCR` on a non-integer value
    /// or `HGET` on a key holding a string.
    CommandFailed(String),

    /// A command or pool checkout exceeded its configured limit.
    Timeout(String),

    /// The store explicitly reported the key as absent.
    ///
    /// Only raised by operations where absence is a distinct store reply
    /// (e.g. `TTL` returning -2). Plain `get` returns `Ok(None)` instead.
    NotFound(String),

    /// A collection has no bulk-clear capability.
    ///
    /// The reset service turns this into a skip; it never reaches callers of
    /// `clean_database`.
    CapabilityUnsupported(String),

    /// A destructive operation was refused by the environment guard.
    ///
    /// The reset service turns this into a successful no-op.
    GuardedOperationSkipped(String),

    /// One or more collections failed to clear.
    ///
    /// Collections cleared before the failure stay cleared.
    ResetFailed {
        /// Names of the collections whose clear call failed
        failed: Vec<String>,
        /// First failure message
        message: String,
    },

    /// Serialization failed when encoding a value for the store.
    SerializationError(String),

    /// Decoding bytes read from the store failed.
    ///
    /// **Recovery:** Delete the key and write it again.
    DeserializationError(String),

    /// Stored bytes do not carry a valid envelope header.
    InvalidCacheEntry(String),

    /// Envelope schema version differs from the compiled one.
    VersionMismatch {
        /// Expected schema version (from compiled code)
        expected: u32,
        /// Found schema version (from stored entry)
        found: u32,
    },

    /// Invalid configuration.
    ConfigError(String),

    /// Generic error with custom message.
    Other(String),
}

impl Error {
    /// Whether the caller may reasonably retry the same call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::StoreUnavailable(_) | Error::Timeout(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::StoreUnavailable(msg) => write!(f, "Store unavailable: {}", msg),
            Error::CommandFailed(msg) => write!(f, "Command failed: {}", msg),
            Error::Timeout(msg) => write!(f, "Timeout: {}", msg),
            Error::NotFound(key) => write!(f, "Not found: {}", key),
            Error::CapabilityUnsupported(name) => {
                write!(f, "Capability unsupported: {}", name)
            }
            Error::GuardedOperationSkipped(msg) => {
                write!(f, "Guarded operation skipped: {}", msg)
            }
            Error::ResetFailed { failed, message } => {
                write!(
                    f,
                    "Reset failed for [{}]: {}",
                    failed.join(", "),
                    message
                )
            }
            Error::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            Error::DeserializationError(msg) => write!(f, "Deserialization error: {}", msg),
            Error::InvalidCacheEntry(msg) => write!(f, "Invalid cache entry: {}", msg),
            Error::VersionMismatch { expected, found } => {
                write!(
                    f,
                    "Cache version mismatch: expected {}, found {}",
                    expected, found
                )
            }
            Error::ConfigError(msg) => write!(f, "Config error: {}", msg),
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
            Error::StoreUnavailable(e.to_string())
        } else if e.is_syntax() || e.is_eof() || e.is_data() {
            Error::DeserializationError(e.to_string())
        } else {
            Error::SerializationError(e.to_string())
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::StoreUnavailable(e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        Error::Timeout(e.to_string())
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
impl From<deadpool_redis::redis::RedisError> for Error {
    fn from(e: deadpool_redis::redis::RedisError) -> Self {
        if e.is_timeout() {
            Error::Timeout(format!("Redis error: {}", e))
        } else if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() {
            Error::StoreUnavailable(format!("Redis error: {}", e))
        } else {
            Error::CommandFailed(format!("Redis error: {}", e))
        }
    }
}

#[cfg(feature = "redis")]
impl From<deadpool_redis::PoolError> for Error {
    fn from(e: deadpool_redis::PoolError) -> Self {
        match e {
            deadpool_redis::PoolError::Timeout(kind) => {
                Error::Timeout(format!("Redis pool timeout ({:?})", kind))
            }
            deadpool_redis::PoolError::Backend(inner) => inner.into(),
            other => Error::StoreUnavailable(format!("Failed to get Redis connection: {}", other)),
        }
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_) | sqlx::Error::PoolClosed | sqlx::Error::Tls(_) => {
                Error::StoreUnavailable(format!("Database error: {}", e))
            }
            sqlx::Error::PoolTimedOut => Error::Timeout(format!("Database error: {}", e)),
            other => Error::CommandFailed(format!("Database error: {}", other)),
        }
    }
}
