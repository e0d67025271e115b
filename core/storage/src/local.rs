//! Local filesystem key-value store.

use async_trait::async_trait;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use crate::store::KeyValueStore;
use strongbox_common::{Error, Result};

/// Characters kept verbatim in file names; everything else is escaped.
const KEY_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.');

/// Extension for value files.
const VALUE_EXTENSION: &str = "json";

/// Local filesystem key-value store.
///
/// Stores each key as one file inside a root directory. Writes go to a
/// uniquely named temporary file first and are renamed into place, so a
/// failed write never leaves a half-written value behind.
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Create a new local store rooted at `root`.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    ///
    /// # Errors
    /// - `Configuration` if the root cannot be created or is not a directory
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        if !root.exists() {
            std::fs::create_dir_all(&root).map_err(|e| {
                Error::Configuration(format!(
                    "Cannot create store directory {}: {}",
                    root.display(),
                    e
                ))
            })?;
        }

        if !root.is_dir() {
            return Err(Error::Configuration(format!(
                "Store root {} is not a directory",
                root.display()
            )));
        }

        Ok(Self { root })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a key to its value file.
    fn key_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() {
            return Err(Error::InvalidInput("Store key cannot be empty".to_string()));
        }
        let encoded = utf8_percent_encode(key, KEY_ESCAPE).to_string();
        if encoded == "." || encoded == ".." {
            return Err(Error::InvalidInput(format!("Invalid store key: {}", key)));
        }
        Ok(self.root.join(format!("{}.{}", encoded, VALUE_EXTENSION)))
    }

    /// List the keys currently stored.
    pub async fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|e| Error::Storage(e.to_string()))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::Storage(e.to_string()))?
        {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name.strip_suffix(&format!(".{}", VALUE_EXTENSION)) {
                keys.push(percent_decode_str(stem).decode_utf8_lossy().into_owned());
            }
        }

        keys.sort();
        Ok(keys)
    }
}

#[async_trait]
impl KeyValueStore for LocalStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.key_path(key)?;

        match fs::read_to_string(&path).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Storage(format!("Failed to read {}: {}", key, e))),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.key_path(key)?;
        let tmp = self
            .root
            .join(format!(".{}.tmp", Uuid::new_v4().simple()));

        if let Err(e) = fs::write(&tmp, value.as_bytes()).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(Error::StorageWrite(format!("Failed to write {}: {}", key, e)));
        }

        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(Error::StorageWrite(format!("Failed to write {}: {}", key, e)));
        }

        debug!(key, bytes = value.len(), "Stored value");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let path = self.key_path(key)?;

        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::StorageWrite(format!("Failed to remove {}: {}", key, e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (LocalStore, TempDir) {
        let temp = TempDir::new().unwrap();
        let store = LocalStore::new(temp.path()).unwrap();
        (store, temp)
    }

    #[tokio::test]
    async fn test_set_get() {
        let (store, _temp) = setup();

        store.set("vault.meta", "{\"a\":1}").await.unwrap();
        let value = store.get("vault.meta").await.unwrap();
        assert_eq!(value.as_deref(), Some("{\"a\":1}"));
    }

    #[tokio::test]
    async fn test_missing_key_is_none() {
        let (store, _temp) = setup();
        assert_eq!(store.get("nothing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_remove_absent_key() {
        let (store, _temp) = setup();

        store.set("k", "v").await.unwrap();
        store.remove("k").await.unwrap();
        store.remove("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_keys_are_escaped_and_listed() {
        let (store, temp) = setup();

        store.set("a/b", "1").await.unwrap();
        store.set("plain.key", "2").await.unwrap();

        assert!(temp.path().join("a%2Fb.json").exists());
        assert_eq!(store.keys().await.unwrap(), vec!["a/b", "plain.key"]);
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let (store, temp) = setup();
        store.set("k", "persisted").await.unwrap();
        drop(store);

        let reopened = LocalStore::new(temp.path()).unwrap();
        assert_eq!(reopened.get("k").await.unwrap().as_deref(), Some("persisted"));
    }

    #[test]
    fn test_root_is_file_fails() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("file");
        std::fs::write(&file, b"x").unwrap();

        let result = LocalStore::new(&file);
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_invalid_keys_rejected() {
        let (store, _temp) = setup();
        assert!(store.key_path("").is_err());
        assert!(store.key_path("..").is_err());
    }
}
