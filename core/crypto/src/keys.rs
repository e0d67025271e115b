//! Key types with secure memory handling.
//!
//! Key material zeroizes its memory on drop to prevent sensitive data from
//! persisting after a session is locked.

use rand::RngCore;
use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use strongbox_common::{Error, Result};

/// Length of encryption keys in bytes (256-bit).
pub const KEY_LENGTH: usize = 32;

/// Smallest salt accepted for key derivation.
pub const MIN_SALT_LEN: usize = 16;

/// Salt length used when none is configured.
pub const DEFAULT_SALT_LEN: usize = 16;

/// Symmetric vault key derived from the user passphrase.
///
/// Lives only in process memory while a session is unlocked and is never
/// serialized.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct VaultKey {
    key: [u8; KEY_LENGTH],
}

impl VaultKey {
    /// Create a vault key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Get the key bytes.
    ///
    /// # Security
    /// The returned slice should be used immediately and not stored.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }

    /// Generate a random key.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LENGTH];
        rand::rngs::OsRng.fill_bytes(&mut key);
        Self { key }
    }
}

impl PartialEq for VaultKey {
    fn eq(&self, other: &Self) -> bool {
        self.key.ct_eq(&other.key).into()
    }
}

impl Eq for VaultKey {}

impl fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VaultKey([REDACTED])")
    }
}

/// Salt for key derivation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Salt(Vec<u8>);

impl Salt {
    /// Generate a random salt of `len` bytes.
    ///
    /// # Errors
    /// - Returns error if `len` is below [`MIN_SALT_LEN`]
    pub fn generate(len: usize) -> Result<Self> {
        if len < MIN_SALT_LEN {
            return Err(Error::InvalidInput(format!(
                "Salt must be at least {} bytes, got {}",
                MIN_SALT_LEN, len
            )));
        }
        let mut salt = vec![0u8; len];
        rand::rngs::OsRng.fill_bytes(&mut salt);
        Ok(Self(salt))
    }

    /// Create from bytes.
    ///
    /// # Errors
    /// - Returns error if the salt is shorter than [`MIN_SALT_LEN`]
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() < MIN_SALT_LEN {
            return Err(Error::InvalidInput(format!(
                "Salt must be at least {} bytes, got {}",
                MIN_SALT_LEN,
                bytes.len()
            )));
        }
        Ok(Self(bytes))
    }

    /// Get the salt bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Salt length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false for a constructed salt; present for API symmetry.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vault_key_generate() {
        let key1 = VaultKey::generate();
        let key2 = VaultKey::generate();

        assert_ne!(key1, key2);
    }

    #[test]
    fn test_vault_key_debug_redacted() {
        let key = VaultKey::from_bytes([7u8; KEY_LENGTH]);
        assert_eq!(format!("{:?}", key), "VaultKey([REDACTED])");
    }

    #[test]
    fn test_salt_generate() {
        let salt1 = Salt::generate(DEFAULT_SALT_LEN).unwrap();
        let salt2 = Salt::generate(DEFAULT_SALT_LEN).unwrap();

        assert_eq!(salt1.len(), DEFAULT_SALT_LEN);
        assert_ne!(salt1.as_bytes(), salt2.as_bytes());
    }

    #[test]
    fn test_salt_too_short_rejected() {
        assert!(Salt::generate(8).is_err());
        assert!(Salt::from_bytes(vec![0u8; MIN_SALT_LEN - 1]).is_err());
        assert!(Salt::from_bytes(vec![0u8; 32]).is_ok());
    }
}
