//! Vault settings and persisted record keys.

use serde::{Deserialize, Serialize};
use std::path::Path;

use strongbox_common::{Error, Result};
use strongbox_crypto::{KdfParams, DEFAULT_SALT_LEN, MIN_SALT_LEN};

/// Key of the vault metadata record.
pub const META_KEY: &str = "strongbox.vault.meta";

/// Key of the encrypted payload record.
pub const CIPHER_KEY: &str = "strongbox.vault.cipher";

/// Key of the snapshot list record.
pub const SNAPSHOTS_KEY: &str = "strongbox.vault.snapshots";

/// Well-known keys the vault persists under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordKeys {
    /// Vault metadata (salt, cost parameters, format version).
    pub meta: String,
    /// Current encrypted payload.
    pub cipher: String,
    /// Snapshot list.
    pub snapshots: String,
}

impl Default for RecordKeys {
    fn default() -> Self {
        Self {
            meta: META_KEY.to_string(),
            cipher: CIPHER_KEY.to_string(),
            snapshots: SNAPSHOTS_KEY.to_string(),
        }
    }
}

/// Tunables for a vault session.
///
/// Only consulted when a new vault is bootstrapped or the passphrase is
/// rotated; unlocking an existing vault always uses the parameters stored
/// in its metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VaultSettings {
    /// Argon2id cost parameters for new metadata.
    pub kdf: KdfParams,
    /// Salt length in bytes for new metadata.
    pub salt_len: usize,
    /// Record keys in the backing store.
    pub keys: RecordKeys,
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self {
            kdf: KdfParams::default(),
            salt_len: DEFAULT_SALT_LEN,
            keys: RecordKeys::default(),
        }
    }
}

impl VaultSettings {
    /// Settings with the given KDF parameters and defaults elsewhere.
    pub fn with_kdf(kdf: KdfParams) -> Self {
        Self {
            kdf,
            ..Self::default()
        }
    }

    /// Check the settings before they are used.
    ///
    /// # Errors
    /// - `Configuration` if the work factor is too low, the salt is too
    ///   short, or record keys are empty or collide
    pub fn validate(&self) -> Result<()> {
        self.kdf
            .validate()
            .map_err(|e| Error::Configuration(e.to_string()))?;

        if self.salt_len < MIN_SALT_LEN {
            return Err(Error::Configuration(format!(
                "Salt length must be at least {} bytes, got {}",
                MIN_SALT_LEN, self.salt_len
            )));
        }

        let keys = [&self.keys.meta, &self.keys.cipher, &self.keys.snapshots];
        if keys.iter().any(|k| k.is_empty()) {
            return Err(Error::Configuration("Record keys cannot be empty".to_string()));
        }
        if keys[0] == keys[1] || keys[0] == keys[2] || keys[1] == keys[2] {
            return Err(Error::Configuration("Record keys must be distinct".to_string()));
        }

        Ok(())
    }

    /// Serialize settings to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Parse and validate settings from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(json)
            .map_err(|e| Error::Configuration(format!("Invalid settings: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load and validate settings from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Cannot read settings {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_valid() {
        let settings = VaultSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.salt_len, DEFAULT_SALT_LEN);
        assert_eq!(settings.keys.meta, META_KEY);
    }

    #[test]
    fn test_low_work_factor_rejected() {
        let settings = VaultSettings::with_kdf(KdfParams::new(1, 1024, 1));
        assert!(matches!(settings.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_short_salt_rejected() {
        let settings = VaultSettings {
            salt_len: 8,
            ..VaultSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_colliding_keys_rejected() {
        let mut settings = VaultSettings::default();
        settings.keys.cipher = settings.keys.meta.clone();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings = VaultSettings::from_json(
            r#"{"kdf": {"iterations": 4, "memoryCost": 4096, "parallelism": 1}}"#,
        )
        .unwrap();
        assert_eq!(settings.kdf, KdfParams::new(4, 4096, 1));
        assert_eq!(settings.keys, RecordKeys::default());
    }

    #[test]
    fn test_json_roundtrip_and_load() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("settings.json");
        let settings = VaultSettings::with_kdf(KdfParams::moderate());
        std::fs::write(&path, settings.to_json().unwrap()).unwrap();

        assert_eq!(VaultSettings::load(&path).unwrap(), settings);
        assert!(matches!(
            VaultSettings::load(temp.path().join("missing.json")),
            Err(Error::Configuration(_))
        ));
    }
}
