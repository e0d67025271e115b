//! Common types used throughout Strongbox.

use std::fmt;
use zeroize::Zeroize;

/// Sensitive data wrapper that zeroizes on drop.
///
/// Decrypted vault payloads are handed out in this wrapper so plaintext does
/// not linger in freed memory.
#[derive(Clone, PartialEq, Eq, Zeroize)]
#[zeroize(drop)]
pub struct SensitiveBytes(Vec<u8>);

impl SensitiveBytes {
    /// Create new sensitive bytes.
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    /// Get a reference to the inner bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Get the length.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for SensitiveBytes {
    fn from(data: Vec<u8>) -> Self {
        Self(data)
    }
}

impl fmt::Debug for SensitiveBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SensitiveBytes([REDACTED; {} bytes])", self.0.len())
    }
}

/// Explicit acknowledgement required by destructive operations.
///
/// Destructive calls take this token instead of a bare `bool` so that the
/// caller has to spell out its intent at the call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// The caller confirmed the destructive operation.
    Confirmed,
    /// No confirmation was given.
    Unconfirmed,
}

impl Confirmation {
    /// Build a confirmation from a user answer such as a `--yes` flag.
    pub fn from_flag(confirmed: bool) -> Self {
        if confirmed {
            Self::Confirmed
        } else {
            Self::Unconfirmed
        }
    }

    /// Fail with `NotPermitted` unless confirmed.
    pub fn require(self, operation: &str) -> crate::Result<()> {
        match self {
            Self::Confirmed => Ok(()),
            Self::Unconfirmed => Err(crate::Error::NotPermitted(format!(
                "{} is destructive and requires confirmation",
                operation
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensitive_bytes_debug_is_redacted() {
        let bytes = SensitiveBytes::new(b"secret".to_vec());
        let rendered = format!("{:?}", bytes);
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("6 bytes"));
    }

    #[test]
    fn test_sensitive_bytes_accessors() {
        let bytes = SensitiveBytes::from(Vec::new());
        assert!(bytes.is_empty());
        assert_eq!(bytes.len(), 0);
    }

    #[test]
    fn test_confirmation_require() {
        assert!(Confirmation::Confirmed.require("clear").is_ok());
        let err = Confirmation::Unconfirmed.require("clear").unwrap_err();
        assert!(matches!(err, crate::Error::NotPermitted(_)));
        assert_eq!(Confirmation::from_flag(true), Confirmation::Confirmed);
    }
}
