//! Vault engine for Strongbox.
//!
//! This module provides:
//! - Vault bootstrap, unlock and lock through [`VaultSession`]
//! - Persistence of vault metadata and the encrypted payload
//! - Named, timestamped snapshots of the payload
//! - Key derivation off the async runtime
//!
//! # Architecture
//! The vault sits between application code and a generic key-value store.
//! Every persisted record passes through the validation boundary in
//! [`record`]; unreadable records are reported as absent to callers and as
//! a [`RecordError`] to diagnostics.

pub mod cipher_store;
pub mod config;
pub mod derivation;
pub mod locks;
pub mod record;
pub mod session;
pub mod snapshots;

pub use cipher_store::CipherStore;
pub use config::{RecordKeys, VaultSettings};
pub use derivation::KeyDerivation;
pub use locks::KeyedLocks;
pub use record::{RecordError, Snapshot, VaultMeta, VaultRecord, FORMAT_VERSION};
pub use session::{SessionState, VaultSession};
pub use snapshots::SnapshotStore;
