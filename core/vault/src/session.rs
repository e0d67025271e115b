//! Vault session management.
//!
//! A [`VaultSession`] owns the lock/unlock state machine and the derived
//! key while unlocked. It is cheap to clone; clones share one session, so
//! consumers receive it by reference or clone instead of reaching for a
//! global. Keys are zeroized when the session is locked or dropped.

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::{Arc, Mutex, RwLock};
use subtle::ConstantTimeEq;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::cipher_store::CipherStore;
use crate::config::VaultSettings;
use crate::derivation::{run_blocking, KeyDerivation};
use crate::locks::KeyedLocks;
use crate::record::{Snapshot, VaultMeta, VaultRecord};
use crate::snapshots::SnapshotStore;
use strongbox_common::{Confirmation, Error, Result, SensitiveBytes};
use strongbox_crypto::{decrypt_envelope, encrypt_envelope, Envelope, VaultKey};
use strongbox_storage::KeyValueStore;

/// State of the vault session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No key in memory.
    Locked,
    /// An `init` attempt is deriving or verifying a key.
    Unlocking,
    /// The key is cached and crypto calls are allowed.
    Unlocked,
    /// The last `init` attempt failed. No key in memory.
    Error,
}

/// Key slot guarded by one lock so state and key never disagree.
struct Slot {
    state: SessionState,
    key: Option<Arc<VaultKey>>,
    meta: Option<VaultMeta>,
    /// Bumped by `lock()` so an attempt that outlives a lock cannot
    /// install its key afterwards.
    epoch: u64,
}

type InitAttempt = Shared<BoxFuture<'static, Result<()>>>;

/// The one `init` attempt currently running.
struct InFlight {
    passphrase: Zeroizing<Vec<u8>>,
    attempt: InitAttempt,
}

struct SessionInner {
    cipher_store: CipherStore,
    snapshots: SnapshotStore,
    kdf: KeyDerivation,
    slot: RwLock<Slot>,
    in_flight: Mutex<Option<InFlight>>,
    /// Serializes operations that replace the vault payload.
    record_lock: AsyncMutex<()>,
}

/// Client-held encrypted vault session.
///
/// Lifecycle: construct → [`init`](Self::init) → [`lock`](Self::lock) →
/// drop. Once unlocked, [`encrypt`](Self::encrypt) and
/// [`decrypt`](Self::decrypt) may run concurrently.
#[derive(Clone)]
pub struct VaultSession {
    inner: Arc<SessionInner>,
}

impl VaultSession {
    /// Create a locked session over `store`.
    ///
    /// # Errors
    /// - `Configuration` if the settings are invalid
    pub fn new(store: Arc<dyn KeyValueStore>, settings: &VaultSettings) -> Result<Self> {
        let kdf = KeyDerivation::new(settings)?;
        let locks = Arc::new(KeyedLocks::new());
        let cipher_store = CipherStore::new(store.clone(), locks.clone(), settings.keys.clone());
        let snapshots = SnapshotStore::new(store, locks, settings.keys.snapshots.clone());

        debug!("Vault session created");
        Ok(Self {
            inner: Arc::new(SessionInner {
                cipher_store,
                snapshots,
                kdf,
                slot: RwLock::new(Slot {
                    state: SessionState::Locked,
                    key: None,
                    meta: None,
                    epoch: 0,
                }),
                in_flight: Mutex::new(None),
                record_lock: AsyncMutex::new(()),
            }),
        })
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.inner.read_slot().state
    }

    /// Check if the session holds a key.
    pub fn is_unlocked(&self) -> bool {
        self.state() == SessionState::Unlocked
    }

    /// Metadata of the unlocked vault.
    pub fn meta(&self) -> Option<VaultMeta> {
        self.inner.read_slot().meta.clone()
    }

    /// True iff both vault records are present.
    pub async fn has_vault(&self) -> bool {
        self.inner.cipher_store.has_vault().await
    }

    /// Metadata and payload persistence.
    pub fn cipher_store(&self) -> &CipherStore {
        &self.inner.cipher_store
    }

    /// Snapshot persistence.
    pub fn snapshots(&self) -> &SnapshotStore {
        &self.inner.snapshots
    }

    /// Bootstrap a new vault or unlock the existing one.
    ///
    /// With no vault in the store, fresh metadata and an empty encrypted
    /// payload are persisted and the session unlocks. Otherwise the key
    /// derived from `passphrase` must decrypt the stored payload.
    ///
    /// Concurrent calls with the same passphrase share one attempt. A call
    /// with a different passphrase waits for the running attempt and then
    /// makes its own.
    ///
    /// # Errors
    /// - `Authentication` if the passphrase is wrong or data was tampered
    /// - `StorageWrite` if bootstrapping could not persist the vault
    /// - `NotUnlocked` if `lock()` was called while the attempt ran
    ///
    /// On error the session is left without a key and persisted records are
    /// not modified by a failed unlock.
    pub async fn init(&self, passphrase: &[u8]) -> Result<()> {
        loop {
            let (attempt, joined) = {
                let mut in_flight = self.inner.in_flight.lock().unwrap_or_else(|p| p.into_inner());
                match in_flight.as_ref() {
                    Some(running) => {
                        let same: bool = running.passphrase.as_slice().ct_eq(passphrase).into();
                        (running.attempt.clone(), same)
                    }
                    None => {
                        let attempt = self.start_attempt(passphrase);
                        *in_flight = Some(InFlight {
                            passphrase: Zeroizing::new(passphrase.to_vec()),
                            attempt: attempt.clone(),
                        });
                        (attempt, true)
                    }
                }
            };

            if !joined {
                debug!("Waiting for a concurrent unlock attempt to finish");
            }
            let outcome = attempt.clone().await;

            {
                let mut in_flight = self.inner.in_flight.lock().unwrap_or_else(|p| p.into_inner());
                if in_flight
                    .as_ref()
                    .is_some_and(|running| running.attempt.ptr_eq(&attempt))
                {
                    *in_flight = None;
                }
            }

            if joined {
                return outcome;
            }
        }
    }

    /// Spawn an unlock attempt so it completes even if every caller stops
    /// polling it.
    fn start_attempt(&self, passphrase: &[u8]) -> InitAttempt {
        let epoch = {
            let mut slot = self.inner.write_slot();
            // An unlocked session keeps serving crypto calls with its
            // cached key while the attempt runs.
            if slot.state != SessionState::Unlocked {
                slot.state = SessionState::Unlocking;
            }
            slot.epoch
        };

        let inner = self.inner.clone();
        let passphrase = Zeroizing::new(passphrase.to_vec());
        let task = tokio::spawn(async move { inner.run_init(passphrase, epoch).await });

        async move {
            task.await
                .unwrap_or_else(|e| Err(Error::Crypto(format!("Unlock task failed: {}", e))))
        }
        .boxed()
        .shared()
    }

    /// Discard the cached key and return to `Locked`.
    ///
    /// Idempotent and always permitted. Crypto calls already holding the
    /// key finish first; the key is zeroized once the last of them drops it.
    /// A running `init` attempt is abandoned, so the next `init` starts a
    /// fresh one.
    pub fn lock(&self) {
        let mut in_flight = self.inner.in_flight.lock().unwrap_or_else(|p| p.into_inner());
        *in_flight = None;
        let mut slot = self.inner.write_slot();
        let was = slot.state;
        slot.key = None;
        slot.meta = None;
        slot.state = SessionState::Locked;
        slot.epoch += 1;
        if was != SessionState::Locked {
            info!("Vault locked");
        }
    }

    /// Encrypt `plaintext` under the session key with a fresh nonce.
    ///
    /// # Errors
    /// - `NotUnlocked` unless the session is unlocked
    pub async fn encrypt(&self, plaintext: &[u8]) -> Result<Envelope> {
        let key = self.inner.current_key()?;
        let data = Zeroizing::new(plaintext.to_vec());
        run_blocking(move || encrypt_envelope(&key, &data)).await
    }

    /// Decrypt an envelope produced under the session key.
    ///
    /// # Errors
    /// - `NotUnlocked` unless the session is unlocked
    /// - `Authentication` if the envelope does not verify
    pub async fn decrypt(&self, envelope: &Envelope) -> Result<SensitiveBytes> {
        let key = self.inner.current_key()?;
        let envelope = envelope.clone();
        run_blocking(move || decrypt_envelope(&key, &envelope)).await
    }

    /// Decrypt the current vault payload.
    ///
    /// # Errors
    /// - `NotUnlocked` unless the session is unlocked
    /// - `NotFound` if the payload record is missing or malformed
    pub async fn read_payload(&self) -> Result<SensitiveBytes> {
        self.inner.current_key()?;
        let envelope = self
            .inner
            .cipher_store
            .load_cipher()
            .await
            .ok_or_else(|| Error::NotFound("Vault payload".to_string()))?;
        self.decrypt(&envelope).await
    }

    /// Replace the vault payload.
    ///
    /// # Errors
    /// - `NotUnlocked` unless the session is unlocked
    /// - `StorageWrite` if the store rejects the write
    pub async fn write_payload(&self, plaintext: &[u8]) -> Result<()> {
        let _guard = self.inner.record_lock.lock().await;
        let envelope = self.encrypt(plaintext).await?;
        self.inner.cipher_store.save_cipher(&envelope).await?;
        info!(bytes = plaintext.len(), "Vault payload updated");
        Ok(())
    }

    /// Store the current payload as a new named snapshot.
    ///
    /// The snapshot is encrypted under a fresh nonce and carries the current
    /// metadata so it stays decryptable after a passphrase rotation.
    pub async fn capture_snapshot(&self, name: impl Into<String>) -> Result<Snapshot> {
        let _guard = self.inner.record_lock.lock().await;
        let meta = self.meta().ok_or(Error::NotUnlocked)?;

        let plaintext = self.read_payload().await?;
        let payload = self.encrypt(plaintext.as_bytes()).await?;

        let snapshot = Snapshot {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            created_at: Utc::now(),
            payload,
            meta: Some(meta),
        };
        self.inner.snapshots.add(snapshot.clone()).await?;

        info!(snapshot = %snapshot.id, name = %snapshot.name, "Snapshot captured");
        Ok(snapshot)
    }

    /// Make a snapshot the current payload, using the session key.
    ///
    /// # Errors
    /// - `NotUnlocked` unless the session is unlocked
    /// - `NotFound` if no snapshot has this id
    /// - `InvalidInput` if the snapshot was captured under other metadata;
    ///   use [`restore_snapshot_with_passphrase`](Self::restore_snapshot_with_passphrase)
    /// - `Authentication` if the snapshot does not verify
    pub async fn restore_snapshot(&self, id: &str) -> Result<()> {
        let _guard = self.inner.record_lock.lock().await;
        let meta = self.meta().ok_or(Error::NotUnlocked)?;
        let snapshot = self.find_snapshot(id).await?;

        if snapshot.meta.as_ref().is_some_and(|m| m != &meta) {
            return Err(Error::InvalidInput(format!(
                "Snapshot {} was captured under a different passphrase",
                id
            )));
        }

        let plaintext = self.decrypt(&snapshot.payload).await?;
        self.replace_payload(plaintext, id).await
    }

    /// Make a snapshot the current payload, deriving its key from the
    /// passphrase that was in force when it was captured.
    pub async fn restore_snapshot_with_passphrase(&self, id: &str, passphrase: &[u8]) -> Result<()> {
        let _guard = self.inner.record_lock.lock().await;
        let current = self.meta().ok_or(Error::NotUnlocked)?;
        let snapshot = self.find_snapshot(id).await?;

        let snapshot_meta = snapshot.meta.clone().unwrap_or(current);
        let key = Arc::new(self.inner.kdf.derive(passphrase, &snapshot_meta).await?);
        let payload = snapshot.payload.clone();
        let plaintext = run_blocking(move || decrypt_envelope(&key, &payload)).await?;

        self.replace_payload(plaintext, id).await
    }

    async fn find_snapshot(&self, id: &str) -> Result<Snapshot> {
        self.inner
            .snapshots
            .get(id)
            .await
            .ok_or_else(|| Error::NotFound(format!("Snapshot {}", id)))
    }

    async fn replace_payload(&self, plaintext: SensitiveBytes, id: &str) -> Result<()> {
        let envelope = self.encrypt(plaintext.as_bytes()).await?;
        self.inner.cipher_store.save_cipher(&envelope).await?;
        info!(snapshot = %id, "Snapshot restored");
        Ok(())
    }

    /// Rotate the passphrase: new salt, new key, payload re-encrypted.
    ///
    /// Metadata is written before the payload; if the payload write fails
    /// the previous metadata is put back.
    ///
    /// # Errors
    /// - `NotUnlocked` unless the session is unlocked
    /// - `Authentication` if `current` is wrong
    /// - `StorageWrite` if the rotated vault could not be persisted
    pub async fn change_passphrase(&self, current: &[u8], new: &[u8]) -> Result<()> {
        let _guard = self.inner.record_lock.lock().await;
        let key = self.inner.current_key()?;
        let old_meta = self.meta().ok_or(Error::NotUnlocked)?;

        let candidate = self.inner.kdf.derive(current, &old_meta).await?;
        if candidate != *key {
            return Err(Error::Authentication);
        }

        let plaintext = self.read_payload().await?;
        let (new_meta, new_key) = self.inner.kdf.generate_new(new).await?;
        let new_key = Arc::new(new_key);
        let envelope = {
            let new_key = new_key.clone();
            run_blocking(move || encrypt_envelope(&new_key, plaintext.as_bytes())).await?
        };

        let store = &self.inner.cipher_store;
        store.save_meta(&new_meta).await?;
        if let Err(e) = store.save_cipher(&envelope).await {
            error!(error = %e, "Payload write failed during rotation, restoring metadata");
            if let Err(restore) = store.save_meta(&old_meta).await {
                error!(error = %restore, "Could not restore previous vault metadata");
            }
            return Err(e);
        }

        let mut slot = self.inner.write_slot();
        if slot.state == SessionState::Unlocked {
            slot.key = Some(new_key);
            slot.meta = Some(new_meta);
        }
        info!("Vault passphrase changed");
        Ok(())
    }

    /// Lock the session and irreversibly remove the vault records.
    ///
    /// Snapshots are kept.
    pub async fn clear(&self, confirmation: Confirmation) -> Result<()> {
        confirmation.require("Clearing the vault")?;
        let _guard = self.inner.record_lock.lock().await;
        self.lock();
        self.inner.cipher_store.clear_all(confirmation).await
    }
}

impl SessionInner {
    fn read_slot(&self) -> std::sync::RwLockReadGuard<'_, Slot> {
        self.slot.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write_slot(&self) -> std::sync::RwLockWriteGuard<'_, Slot> {
        self.slot.write().unwrap_or_else(|p| p.into_inner())
    }

    fn current_key(&self) -> Result<Arc<VaultKey>> {
        let slot = self.read_slot();
        match (slot.state, slot.key.as_ref()) {
            (SessionState::Unlocked, Some(key)) => Ok(key.clone()),
            _ => Err(Error::NotUnlocked),
        }
    }

    async fn run_init(self: Arc<Self>, passphrase: Zeroizing<Vec<u8>>, epoch: u64) -> Result<()> {
        let outcome = match self.cipher_store.load_record().await {
            None => self.bootstrap(&passphrase).await,
            Some(record) => self.unlock_existing(&passphrase, record).await,
        };

        let mut slot = self.write_slot();
        if slot.epoch != epoch {
            debug!("Session locked during unlock attempt, discarding result");
            return Err(Error::NotUnlocked);
        }

        match outcome {
            Ok((key, meta)) => {
                slot.key = Some(Arc::new(key));
                slot.meta = Some(meta);
                slot.state = SessionState::Unlocked;
                info!("Vault unlocked");
                Ok(())
            }
            Err(e) => {
                slot.key = None;
                slot.meta = None;
                slot.state = SessionState::Error;
                warn!(error = %e, "Vault unlock failed");
                Err(e)
            }
        }
    }

    async fn bootstrap(&self, passphrase: &[u8]) -> Result<(VaultKey, VaultMeta)> {
        let previous = self.cipher_store.load_meta().await;
        if previous.is_some() {
            warn!("Vault metadata present without payload, bootstrapping a new vault");
        }

        let (meta, key) = self.kdf.generate_new(passphrase).await?;
        let key = Arc::new(key);
        let envelope = {
            let key = key.clone();
            run_blocking(move || encrypt_envelope(&key, &[])).await?
        };

        self.cipher_store.save_meta(&meta).await?;
        if let Err(e) = self.cipher_store.save_cipher(&envelope).await {
            error!(error = %e, "Payload write failed during bootstrap, reverting metadata");
            let reverted = match previous {
                Some(previous) => self.cipher_store.save_meta(&previous).await,
                None => self.cipher_store.remove_meta().await,
            };
            if let Err(revert) = reverted {
                error!(error = %revert, "Could not revert vault metadata");
            }
            return Err(e);
        }

        info!(iterations = meta.iterations(), "New vault bootstrapped");
        Ok((Arc::unwrap_or_clone(key), meta))
    }

    async fn unlock_existing(
        &self,
        passphrase: &[u8],
        record: VaultRecord,
    ) -> Result<(VaultKey, VaultMeta)> {
        let key = Arc::new(self.kdf.derive(passphrase, &record.meta).await?);
        {
            let key = key.clone();
            let cipher = record.cipher;
            // Only the verification outcome matters; the plaintext is
            // zeroized as it drops.
            run_blocking(move || decrypt_envelope(&key, &cipher).map(drop)).await?;
        }
        Ok((Arc::unwrap_or_clone(key), record.meta))
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        let slot = self.slot.get_mut().unwrap_or_else(|p| p.into_inner());
        slot.key = None;
        slot.meta = None;
        slot.state = SessionState::Locked;
    }
}
