//! Key-value store trait definition.

use async_trait::async_trait;

use strongbox_common::Result;

/// Generic durable string-keyed store supplied by the hosting environment.
///
/// Implementations enforce no schema and offer no transactions; callers
/// that need read-modify-write consistency must serialize writers
/// themselves.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Get the store name (e.g., "memory", "local").
    fn name(&self) -> &str;

    /// Read the value stored under `key`.
    ///
    /// # Returns
    /// `Ok(None)` if the key is absent.
    ///
    /// # Errors
    /// - `Storage` if the backend cannot be read
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    /// - `StorageWrite` if the backend rejects the write (e.g. quota)
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove `key`. Removing an absent key is not an error.
    ///
    /// # Errors
    /// - `StorageWrite` if the backend rejects the removal
    async fn remove(&self, key: &str) -> Result<()>;
}
