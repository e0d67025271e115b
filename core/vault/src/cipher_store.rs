//! Vault metadata and encrypted payload persistence.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::RecordKeys;
use crate::locks::KeyedLocks;
use crate::record::{
    decode_envelope, decode_meta, encode_envelope, encode_meta, RecordError, VaultMeta,
    VaultRecord,
};
use strongbox_common::{Confirmation, Error, Result};
use strongbox_crypto::Envelope;
use strongbox_storage::KeyValueStore;

/// Treat any failure from a store write as a rejected write.
pub(crate) fn write_error(err: Error) -> Error {
    match err {
        Error::StorageWrite(_) => err,
        other => Error::StorageWrite(other.to_string()),
    }
}

/// Read a raw record, folding store failures into [`RecordError`].
pub(crate) async fn read_raw(
    store: &dyn KeyValueStore,
    key: &str,
) -> std::result::Result<String, RecordError> {
    match store.get(key).await {
        Ok(Some(raw)) => Ok(raw),
        Ok(None) => Err(RecordError::Missing),
        Err(e) => Err(RecordError::Unreadable(e.to_string())),
    }
}

/// Collapse a diagnostic result into "present or absent", logging why a
/// record that exists was ignored.
fn present<T>(key: &str, result: std::result::Result<T, RecordError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(RecordError::Missing) => None,
        Err(reason) => {
            warn!(key, %reason, "Ignoring unusable vault record");
            None
        }
    }
}

/// Stores the vault metadata and the current encrypted payload as two
/// independent records, so a failed write to one leaves the other intact.
///
/// Reads never fail: a missing or malformed record is reported as absent.
/// The `inspect_*` methods expose the reason for diagnostics.
#[derive(Clone)]
pub struct CipherStore {
    store: Arc<dyn KeyValueStore>,
    locks: Arc<KeyedLocks>,
    keys: RecordKeys,
}

impl CipherStore {
    /// Create a store over `store`, sharing `locks` with other writers of
    /// the same backend.
    pub fn new(store: Arc<dyn KeyValueStore>, locks: Arc<KeyedLocks>, keys: RecordKeys) -> Self {
        Self { store, locks, keys }
    }

    /// Record keys in use.
    pub fn keys(&self) -> &RecordKeys {
        &self.keys
    }

    /// Read and validate the metadata record.
    pub async fn inspect_meta(&self) -> std::result::Result<VaultMeta, RecordError> {
        let raw = read_raw(self.store.as_ref(), &self.keys.meta).await?;
        decode_meta(&raw)
    }

    /// Read and validate the payload record.
    pub async fn inspect_cipher(&self) -> std::result::Result<Envelope, RecordError> {
        let raw = read_raw(self.store.as_ref(), &self.keys.cipher).await?;
        decode_envelope(&raw)
    }

    /// Vault metadata, or `None` if missing or malformed.
    pub async fn load_meta(&self) -> Option<VaultMeta> {
        present(&self.keys.meta, self.inspect_meta().await)
    }

    /// Current encrypted payload, or `None` if missing or malformed.
    pub async fn load_cipher(&self) -> Option<Envelope> {
        present(&self.keys.cipher, self.inspect_cipher().await)
    }

    /// Both halves of the vault, or `None` if either is unusable.
    pub async fn load_record(&self) -> Option<VaultRecord> {
        let meta = self.load_meta().await?;
        let cipher = self.load_cipher().await?;
        Some(VaultRecord { meta, cipher })
    }

    /// True iff both metadata and payload are present and well formed.
    pub async fn has_vault(&self) -> bool {
        self.load_record().await.is_some()
    }

    /// Persist the metadata record.
    ///
    /// # Errors
    /// - `StorageWrite` if the store rejects the write
    pub async fn save_meta(&self, meta: &VaultMeta) -> Result<()> {
        let raw = encode_meta(meta)?;
        let _guard = self.locks.acquire(&self.keys.meta).await;
        self.store
            .set(&self.keys.meta, &raw)
            .await
            .map_err(write_error)?;
        debug!(key = %self.keys.meta, "Saved vault metadata");
        Ok(())
    }

    /// Persist the payload record.
    ///
    /// # Errors
    /// - `StorageWrite` if the store rejects the write
    pub async fn save_cipher(&self, envelope: &Envelope) -> Result<()> {
        let raw = encode_envelope(envelope)?;
        let _guard = self.locks.acquire(&self.keys.cipher).await;
        self.store
            .set(&self.keys.cipher, &raw)
            .await
            .map_err(write_error)?;
        debug!(key = %self.keys.cipher, bytes = envelope.ciphertext.len(), "Saved vault payload");
        Ok(())
    }

    /// Remove the metadata record only.
    ///
    /// # Errors
    /// - `StorageWrite` if the store rejects the removal
    pub async fn remove_meta(&self) -> Result<()> {
        let _guard = self.locks.acquire(&self.keys.meta).await;
        self.store
            .remove(&self.keys.meta)
            .await
            .map_err(write_error)?;
        debug!(key = %self.keys.meta, "Removed vault metadata");
        Ok(())
    }

    /// Irreversibly remove both vault records.
    ///
    /// # Errors
    /// - `NotPermitted` without an explicit confirmation
    /// - `StorageWrite` if the store rejects a removal
    pub async fn clear_all(&self, confirmation: Confirmation) -> Result<()> {
        confirmation.require("Clearing the vault")?;

        let _meta_guard = self.locks.acquire(&self.keys.meta).await;
        let _cipher_guard = self.locks.acquire(&self.keys.cipher).await;

        self.store
            .remove(&self.keys.cipher)
            .await
            .map_err(write_error)?;
        self.store
            .remove(&self.keys.meta)
            .await
            .map_err(write_error)?;

        info!("Vault records cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strongbox_crypto::{KdfParams, Salt, NONCE_SIZE, TAG_SIZE};
    use strongbox_storage::MemoryStore;

    fn setup() -> (CipherStore, Arc<MemoryStore>) {
        let backend = Arc::new(MemoryStore::new());
        let store = CipherStore::new(
            backend.clone(),
            Arc::new(KeyedLocks::new()),
            RecordKeys::default(),
        );
        (store, backend)
    }

    fn meta() -> VaultMeta {
        VaultMeta::new(Salt::generate(16).unwrap(), KdfParams::new(2, 1024, 1))
    }

    fn envelope() -> Envelope {
        Envelope::new(vec![3u8; NONCE_SIZE], vec![4u8; TAG_SIZE])
    }

    #[tokio::test]
    async fn test_empty_store_has_no_vault() {
        let (store, _) = setup();

        assert!(!store.has_vault().await);
        assert_eq!(store.inspect_meta().await, Err(RecordError::Missing));
        assert!(store.load_record().await.is_none());
    }

    #[tokio::test]
    async fn test_has_vault_requires_both_records() {
        let (store, _) = setup();
        let meta = meta();

        store.save_meta(&meta).await.unwrap();
        assert!(!store.has_vault().await);

        store.save_cipher(&envelope()).await.unwrap();
        assert!(store.has_vault().await);

        let record = store.load_record().await.unwrap();
        assert_eq!(record.meta, meta);
        assert_eq!(record.cipher, envelope());
    }

    #[tokio::test]
    async fn test_malformed_record_reads_as_absent() {
        let (store, backend) = setup();
        store.save_meta(&meta()).await.unwrap();
        backend
            .set(&RecordKeys::default().cipher, "{not json")
            .await
            .unwrap();

        assert!(store.load_cipher().await.is_none());
        assert!(!store.has_vault().await);
        assert!(matches!(
            store.inspect_cipher().await,
            Err(RecordError::Unparsable(_))
        ));
        // The other record is unaffected.
        assert!(store.load_meta().await.is_some());
    }

    #[tokio::test]
    async fn test_failed_write_leaves_other_record() {
        let backend = Arc::new(MemoryStore::with_quota(200));
        let store = CipherStore::new(
            backend.clone(),
            Arc::new(KeyedLocks::new()),
            RecordKeys::default(),
        );
        let meta = meta();
        store.save_meta(&meta).await.unwrap();

        let huge = Envelope::new(vec![0u8; NONCE_SIZE], vec![0u8; 4096]);
        let result = store.save_cipher(&huge).await;

        assert!(matches!(result, Err(Error::StorageWrite(_))));
        assert_eq!(store.load_meta().await, Some(meta));
        assert!(store.load_cipher().await.is_none());
    }

    #[tokio::test]
    async fn test_clear_all_requires_confirmation() {
        let (store, backend) = setup();
        store.save_meta(&meta()).await.unwrap();
        store.save_cipher(&envelope()).await.unwrap();

        let refused = store.clear_all(Confirmation::Unconfirmed).await;
        assert!(matches!(refused, Err(Error::NotPermitted(_))));
        assert!(store.has_vault().await);

        store.clear_all(Confirmation::Confirmed).await.unwrap();
        assert!(!store.has_vault().await);
        assert!(backend.is_empty());
    }
}
