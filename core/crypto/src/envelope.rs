//! Nonce + ciphertext envelopes.
//!
//! An [`Envelope`] is the unit persisted for the vault payload and for each
//! snapshot. It is meaningless without the key that produced it.

use crate::aead::{open, seal};
use crate::keys::VaultKey;
use strongbox_common::{Result, SensitiveBytes};

/// One authenticated-encryption output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Nonce used for this encryption; never reused under one key.
    pub iv: Vec<u8>,
    /// Ciphertext including the Poly1305 tag.
    pub ciphertext: Vec<u8>,
}

impl Envelope {
    /// Assemble an envelope from stored parts.
    pub fn new(iv: Vec<u8>, ciphertext: Vec<u8>) -> Self {
        Self { iv, ciphertext }
    }
}

/// Encrypt `plaintext` under `key` with a fresh random nonce.
pub fn encrypt_envelope(key: &VaultKey, plaintext: &[u8]) -> Result<Envelope> {
    let (nonce, ciphertext) = seal(key.as_bytes(), plaintext)?;
    Ok(Envelope {
        iv: nonce.to_vec(),
        ciphertext,
    })
}

/// Decrypt an envelope, failing closed with `Authentication` on any
/// integrity problem.
pub fn decrypt_envelope(key: &VaultKey, envelope: &Envelope) -> Result<SensitiveBytes> {
    open(key.as_bytes(), &envelope.iv, &envelope.ciphertext).map(SensitiveBytes::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aead::NONCE_SIZE;
    use proptest::prelude::*;
    use strongbox_common::Error;

    #[test]
    fn test_envelope_uses_full_nonce() {
        let key = VaultKey::generate();
        let envelope = encrypt_envelope(&key, b"hello").unwrap();
        assert_eq!(envelope.iv.len(), NONCE_SIZE);
    }

    #[test]
    fn test_wrong_key_rejected() {
        let envelope = encrypt_envelope(&VaultKey::generate(), b"hello").unwrap();
        let result = decrypt_envelope(&VaultKey::generate(), &envelope);
        assert_eq!(result.unwrap_err(), Error::Authentication);
    }

    #[test]
    fn test_truncated_ciphertext_rejected() {
        let key = VaultKey::generate();
        let mut envelope = encrypt_envelope(&key, b"hello world").unwrap();
        envelope.ciphertext.truncate(4);
        assert_eq!(
            decrypt_envelope(&key, &envelope).unwrap_err(),
            Error::Authentication
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_roundtrip(plaintext in proptest::collection::vec(any::<u8>(), 0..2048)) {
            let key = VaultKey::generate();
            let envelope = encrypt_envelope(&key, &plaintext).unwrap();
            let decrypted = decrypt_envelope(&key, &envelope).unwrap();
            prop_assert_eq!(decrypted.as_bytes(), plaintext.as_slice());
        }

        #[test]
        fn prop_bit_flip_rejected(
            plaintext in proptest::collection::vec(any::<u8>(), 1..256),
            flip in any::<prop::sample::Index>(),
        ) {
            let key = VaultKey::generate();
            let mut envelope = encrypt_envelope(&key, &plaintext).unwrap();
            let idx = flip.index(envelope.ciphertext.len());
            envelope.ciphertext[idx] ^= 0x80;
            prop_assert_eq!(decrypt_envelope(&key, &envelope).unwrap_err(), Error::Authentication);
        }
    }
}
