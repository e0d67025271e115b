//! Key derivation using Argon2id.
//!
//! Argon2id is a memory-hard password hashing function that provides
//! resistance to both GPU and time-memory trade-off attacks.

use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};

use crate::keys::{Salt, VaultKey, KEY_LENGTH};
use strongbox_common::{Error, Result};

/// Lowest accepted Argon2id iteration count.
pub const MIN_ITERATIONS: u32 = 2;

/// Highest accepted Argon2id iteration count.
pub const MAX_ITERATIONS: u32 = 64;

/// Highest accepted memory cost in KiB (1 GiB).
pub const MAX_MEMORY_COST_KIB: u32 = 1 << 20;

/// Highest accepted degree of parallelism.
pub const MAX_PARALLELISM: u32 = 16;

/// Parameters for Argon2id key derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KdfParams {
    /// Number of iterations (Argon2 time cost).
    pub iterations: u32,
    /// Memory cost in KiB (e.g., 65536 = 64 MiB).
    pub memory_cost: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl KdfParams {
    /// Create parameters from explicit costs.
    pub fn new(iterations: u32, memory_cost: u32, parallelism: u32) -> Self {
        Self {
            iterations,
            memory_cost,
            parallelism,
        }
    }

    /// Create parameters suitable for interactive use.
    ///
    /// Targets roughly half a second to a second of derivation time.
    pub fn interactive() -> Self {
        Self {
            iterations: 3,
            memory_cost: 65536, // 64 MiB
            parallelism: 4,
        }
    }

    /// Create parameters suitable for sensitive data.
    ///
    /// Higher security parameters that may take several seconds.
    pub fn sensitive() -> Self {
        Self {
            iterations: 4,
            memory_cost: 262144, // 256 MiB
            parallelism: 4,
        }
    }

    /// Create moderate parameters for constrained devices.
    pub fn moderate() -> Self {
        Self {
            iterations: 3,
            memory_cost: 32768, // 32 MiB
            parallelism: 2,
        }
    }

    /// Look up a preset by name.
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "interactive" => Some(Self::interactive()),
            "moderate" => Some(Self::moderate()),
            "sensitive" => Some(Self::sensitive()),
            _ => None,
        }
    }

    /// Check the work factor and that Argon2 accepts the costs.
    ///
    /// # Errors
    /// - `InvalidInput` if `iterations` is below [`MIN_ITERATIONS`]
    /// - `InvalidInput` if Argon2 rejects the memory/parallelism pair
    pub fn validate(&self) -> Result<()> {
        if self.iterations < MIN_ITERATIONS {
            return Err(Error::InvalidInput(format!(
                "KDF iterations must be at least {}, got {}",
                MIN_ITERATIONS, self.iterations
            )));
        }
        if self.iterations > MAX_ITERATIONS {
            return Err(Error::InvalidInput(format!(
                "KDF iterations must be at most {}, got {}",
                MAX_ITERATIONS, self.iterations
            )));
        }
        if self.memory_cost > MAX_MEMORY_COST_KIB {
            return Err(Error::InvalidInput(format!(
                "KDF memory cost must be at most {} KiB, got {}",
                MAX_MEMORY_COST_KIB, self.memory_cost
            )));
        }
        if self.parallelism > MAX_PARALLELISM {
            return Err(Error::InvalidInput(format!(
                "KDF parallelism must be at most {}, got {}",
                MAX_PARALLELISM, self.parallelism
            )));
        }
        self.argon2_params()
            .map(|_| ())
            .map_err(|e| Error::InvalidInput(format!("Invalid KDF parameters: {}", e)))
    }

    fn argon2_params(&self) -> std::result::Result<Params, argon2::Error> {
        Params::new(
            self.memory_cost,
            self.iterations,
            self.parallelism,
            Some(KEY_LENGTH),
        )
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::interactive()
    }
}

/// Derive a vault key from a passphrase and salt using Argon2id.
///
/// Any passphrase is accepted, including an empty one: a wrong passphrase is
/// only detected later when decryption fails.
///
/// # Postconditions
/// - The derived key is deterministic given the same inputs
///
/// # Errors
/// - Returns `Crypto` if the Argon2id parameters are invalid
///
/// # Security
/// - Passphrase is not stored or logged
/// - The intermediate buffer is moved into a zeroizing key
pub fn derive_key(passphrase: &[u8], salt: &Salt, params: &KdfParams) -> Result<VaultKey> {
    let argon2_params = params
        .argon2_params()
        .map_err(|e| Error::Crypto(format!("Invalid KDF parameters: {}", e)))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut key_bytes = [0u8; KEY_LENGTH];
    argon2
        .hash_password_into(passphrase, salt.as_bytes(), &mut key_bytes)
        .map_err(|e| Error::Crypto(format!("Key derivation failed: {}", e)))?;

    let key = VaultKey::from_bytes(key_bytes);
    zeroize::Zeroize::zeroize(&mut key_bytes);
    Ok(key)
}
