//! Common error types for Strongbox.

use thiserror::Error;

/// Top-level error type for Strongbox operations.
///
/// The type is `Clone` so that a single in-flight unlock attempt can hand
/// the same outcome to every caller waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// No usable durable store, or invalid settings.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A persisted record failed to parse or has the wrong shape.
    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    /// Integrity check failed: wrong passphrase or tampered data.
    ///
    /// The message is deliberately uniform so callers cannot tell the two apart.
    #[error("Authentication failed")]
    Authentication,

    /// Encrypt/decrypt requested while the session is not unlocked.
    #[error("Vault is not unlocked")]
    NotUnlocked,

    /// The underlying store rejected a write.
    #[error("Storage write failed: {0}")]
    StorageWrite(String),

    /// The underlying store failed to serve a read.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Cryptographic operation failed for a reason other than authentication.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Operation not permitted.
    #[error("Not permitted: {0}")]
    NotPermitted(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
