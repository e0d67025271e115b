//! Cryptographic primitives for Strongbox.
//!
//! This module provides:
//! - Key derivation using Argon2id
//! - Authenticated encryption using XChaCha20-Poly1305
//! - Nonce + ciphertext envelopes for persisted payloads
//! - Secure key management with automatic zeroization
//!
//! # Security Guarantees
//! - All key material is automatically zeroized on drop
//! - No plaintext or key material is ever logged
//! - Decryption fails closed: no partial plaintext on a bad tag

pub mod aead;
pub mod envelope;
pub mod kdf;
pub mod keys;

pub use aead::{open, seal, NONCE_SIZE, TAG_SIZE};
pub use envelope::{decrypt_envelope, encrypt_envelope, Envelope};
pub use kdf::{
    derive_key, KdfParams, MAX_ITERATIONS, MAX_MEMORY_COST_KIB, MAX_PARALLELISM, MIN_ITERATIONS,
};
pub use keys::{Salt, VaultKey, DEFAULT_SALT_LEN, KEY_LENGTH, MIN_SALT_LEN};
