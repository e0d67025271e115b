//! Snapshot list persistence.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cipher_store::{read_raw, write_error};
use crate::locks::KeyedLocks;
use crate::record::{decode_snapshot_list, encode_snapshot_list, RecordError, Snapshot};
use strongbox_common::{Confirmation, Error, Result};
use strongbox_storage::KeyValueStore;

fn newest_first(snapshots: &mut [Snapshot]) {
    snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

/// Persists named, timestamped snapshots as a single list record.
///
/// Storage order is never trusted: every read sorts by creation time,
/// newest first. Updates are read-modify-write cycles serialized on the
/// list key.
#[derive(Clone)]
pub struct SnapshotStore {
    store: Arc<dyn KeyValueStore>,
    locks: Arc<KeyedLocks>,
    key: String,
}

impl SnapshotStore {
    /// Create a snapshot store persisting under `key`.
    pub fn new(store: Arc<dyn KeyValueStore>, locks: Arc<KeyedLocks>, key: impl Into<String>) -> Self {
        Self {
            store,
            locks,
            key: key.into(),
        }
    }

    /// Read the list with diagnostics, newest first.
    ///
    /// Individually invalid entries are skipped; a list that is not an
    /// array at all is an error.
    pub async fn inspect(&self) -> std::result::Result<Vec<Snapshot>, RecordError> {
        let raw = read_raw(self.store.as_ref(), &self.key).await?;
        let (mut snapshots, rejected) = decode_snapshot_list(&raw)?;
        for reason in rejected {
            warn!(key = %self.key, %reason, "Skipping unusable snapshot entry");
        }
        newest_first(&mut snapshots);
        Ok(snapshots)
    }

    /// All snapshots, newest first. Missing or malformed lists read as empty.
    pub async fn list(&self) -> Vec<Snapshot> {
        match self.inspect().await {
            Ok(snapshots) => snapshots,
            Err(RecordError::Missing) => Vec::new(),
            Err(reason) => {
                warn!(key = %self.key, %reason, "Ignoring unusable snapshot list");
                Vec::new()
            }
        }
    }

    /// Look up a snapshot by id.
    pub async fn get(&self, id: &str) -> Option<Snapshot> {
        self.list().await.into_iter().find(|s| s.id == id)
    }

    /// Load the list for an update while holding the key lock.
    ///
    /// An unreadable backend aborts the update so that a transient read
    /// failure cannot overwrite the list with an empty one.
    async fn load_for_update(&self) -> Result<Vec<Snapshot>> {
        match self.inspect().await {
            Ok(snapshots) => Ok(snapshots),
            Err(RecordError::Missing) => Ok(Vec::new()),
            Err(RecordError::Unreadable(reason)) => Err(Error::Storage(reason)),
            Err(reason) => {
                warn!(key = %self.key, %reason, "Replacing unusable snapshot list");
                Ok(Vec::new())
            }
        }
    }

    /// Append a snapshot.
    ///
    /// # Errors
    /// - `InvalidInput` if a snapshot with the same id exists
    /// - `Storage` if the current list cannot be read
    /// - `StorageWrite` if the store rejects the write
    pub async fn add(&self, snapshot: Snapshot) -> Result<()> {
        let _guard = self.locks.acquire(&self.key).await;

        let mut snapshots = self.load_for_update().await?;
        if snapshots.iter().any(|s| s.id == snapshot.id) {
            return Err(Error::InvalidInput(format!(
                "Snapshot {} already exists",
                snapshot.id
            )));
        }

        let id = snapshot.id.clone();
        snapshots.push(snapshot);
        newest_first(&mut snapshots);

        let raw = encode_snapshot_list(&snapshots)?;
        self.store.set(&self.key, &raw).await.map_err(write_error)?;

        debug!(snapshot = %id, count = snapshots.len(), "Snapshot added");
        Ok(())
    }

    /// Delete a snapshot by id.
    ///
    /// Deleting an absent id is a no-op and returns `Ok(false)`.
    ///
    /// # Errors
    /// - `NotPermitted` without an explicit confirmation
    /// - `StorageWrite` if the store rejects the write
    pub async fn delete(&self, id: &str, confirmation: Confirmation) -> Result<bool> {
        confirmation.require("Deleting a snapshot")?;

        let _guard = self.locks.acquire(&self.key).await;

        let mut snapshots = self.load_for_update().await?;
        let before = snapshots.len();
        snapshots.retain(|s| s.id != id);
        if snapshots.len() == before {
            debug!(snapshot = %id, "Snapshot not present, nothing to delete");
            return Ok(false);
        }

        let raw = encode_snapshot_list(&snapshots)?;
        self.store.set(&self.key, &raw).await.map_err(write_error)?;

        info!(snapshot = %id, "Snapshot deleted");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use strongbox_crypto::{Envelope, NONCE_SIZE, TAG_SIZE};
    use strongbox_storage::MemoryStore;

    const KEY: &str = "snapshots";

    fn setup() -> (SnapshotStore, Arc<MemoryStore>) {
        let backend = Arc::new(MemoryStore::new());
        let store = SnapshotStore::new(backend.clone(), Arc::new(KeyedLocks::new()), KEY);
        (store, backend)
    }

    fn snapshot(id: &str, created_ms: i64) -> Snapshot {
        Snapshot {
            id: id.to_string(),
            name: format!("snapshot {}", id),
            created_at: DateTime::<Utc>::from_timestamp_millis(created_ms).unwrap(),
            payload: Envelope::new(vec![0u8; NONCE_SIZE], vec![1u8; TAG_SIZE]),
            meta: None,
        }
    }

    fn created(snapshots: &[Snapshot]) -> Vec<i64> {
        snapshots.iter().map(|s| s.created_at.timestamp_millis()).collect()
    }

    #[tokio::test]
    async fn test_list_sorted_newest_first() {
        let (store, _) = setup();

        store.add(snapshot("a", 100)).await.unwrap();
        store.add(snapshot("b", 300)).await.unwrap();
        store.add(snapshot("c", 200)).await.unwrap();

        assert_eq!(created(&store.list().await), vec![300, 200, 100]);
    }

    #[tokio::test]
    async fn test_storage_order_not_trusted() {
        let (store, backend) = setup();
        let raw = encode_snapshot_list(&[snapshot("a", 100), snapshot("b", 300), snapshot("c", 200)])
            .unwrap();
        backend.set(KEY, &raw).await.unwrap();

        assert_eq!(created(&store.list().await), vec![300, 200, 100]);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (store, _) = setup();
        store.add(snapshot("a", 100)).await.unwrap();
        store.add(snapshot("b", 200)).await.unwrap();

        assert!(store.delete("a", Confirmation::Confirmed).await.unwrap());
        assert_eq!(store.list().await.len(), 1);

        assert!(!store.delete("a", Confirmation::Confirmed).await.unwrap());
        assert_eq!(store.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_requires_confirmation() {
        let (store, _) = setup();
        store.add(snapshot("a", 100)).await.unwrap();

        let result = store.delete("a", Confirmation::Unconfirmed).await;
        assert!(matches!(result, Err(Error::NotPermitted(_))));
        assert!(store.get("a").await.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let (store, _) = setup();
        store.add(snapshot("a", 100)).await.unwrap();

        let result = store.add(snapshot("a", 500)).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert_eq!(store.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_list_reads_empty_and_is_replaced() {
        let (store, backend) = setup();
        backend.set(KEY, "\"garbage\"").await.unwrap();

        assert!(store.list().await.is_empty());
        assert!(matches!(store.inspect().await, Err(RecordError::Unparsable(_))));

        store.add(snapshot("a", 1)).await.unwrap();
        assert_eq!(store.list().await.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_adds_are_not_lost() {
        let (store, _) = setup();

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move { store.add(snapshot(&format!("s{}", i), i)).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(store.list().await.len(), 16);
    }
}
