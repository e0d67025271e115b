//! Key derivation service.
//!
//! Argon2id is deliberately slow, so derivation and bulk crypto run on the
//! blocking thread pool instead of stalling the async runtime.

use zeroize::Zeroizing;

use crate::config::VaultSettings;
use crate::record::VaultMeta;
use strongbox_common::{Error, Result};
use strongbox_crypto::{derive_key, KdfParams, Salt, VaultKey};

/// Run a CPU-bound crypto closure on the blocking pool.
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Crypto(format!("Crypto task failed: {}", e)))?
}

/// Derives vault keys from passphrases.
#[derive(Debug, Clone)]
pub struct KeyDerivation {
    params: KdfParams,
    salt_len: usize,
}

impl KeyDerivation {
    /// Create a derivation service for new metadata.
    ///
    /// # Errors
    /// - `Configuration` if the settings are invalid
    pub fn new(settings: &VaultSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            params: settings.kdf,
            salt_len: settings.salt_len,
        })
    }

    /// Parameters used for newly generated metadata.
    pub fn params(&self) -> &KdfParams {
        &self.params
    }

    /// Derive the key for existing metadata.
    ///
    /// Deterministic for identical inputs. A wrong passphrase still yields a
    /// key; it is only caught when decryption fails.
    pub async fn derive(&self, passphrase: &[u8], meta: &VaultMeta) -> Result<VaultKey> {
        let passphrase = Zeroizing::new(passphrase.to_vec());
        let salt = meta.salt.clone();
        let params = meta.params;

        run_blocking(move || derive_key(&passphrase, &salt, &params)).await
    }

    /// Generate fresh metadata with a random salt and derive its key.
    pub async fn generate_new(&self, passphrase: &[u8]) -> Result<(VaultMeta, VaultKey)> {
        let salt = Salt::generate(self.salt_len)?;
        let meta = VaultMeta::new(salt, self.params);
        let key = self.derive(passphrase, &meta).await?;
        Ok((meta, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::FORMAT_VERSION;

    fn service() -> KeyDerivation {
        KeyDerivation::new(&VaultSettings::with_kdf(KdfParams::new(2, 1024, 1))).unwrap()
    }

    #[tokio::test]
    async fn test_generate_new_meta() {
        let kdf = service();
        let (meta, _key) = kdf.generate_new(b"p@ss1").await.unwrap();

        assert_eq!(meta.version, FORMAT_VERSION);
        assert_eq!(meta.salt.len(), 16);
        assert_eq!(meta.params, *kdf.params());
    }

    #[tokio::test]
    async fn test_derive_matches_generated_key() {
        let kdf = service();
        let (meta, key) = kdf.generate_new(b"p@ss1").await.unwrap();

        assert_eq!(kdf.derive(b"p@ss1", &meta).await.unwrap(), key);
        assert_ne!(kdf.derive(b"wrong", &meta).await.unwrap(), key);
    }

    #[tokio::test]
    async fn test_fresh_salt_each_time() {
        let kdf = service();
        let (meta1, key1) = kdf.generate_new(b"same").await.unwrap();
        let (meta2, key2) = kdf.generate_new(b"same").await.unwrap();

        assert_ne!(meta1.salt, meta2.salt);
        assert_ne!(key1, key2);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let settings = VaultSettings::with_kdf(KdfParams::new(1, 1024, 1));
        assert!(matches!(
            KeyDerivation::new(&settings),
            Err(Error::Configuration(_))
        ));
    }
}
