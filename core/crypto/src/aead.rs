//! Authenticated encryption using XChaCha20-Poly1305.
//!
//! XChaCha20-Poly1305 provides both confidentiality and authenticity,
//! with a 24-byte nonce that is safe for random generation.

use chacha20poly1305::{
    aead::{generic_array::GenericArray, Aead, AeadCore, KeyInit, OsRng},
    XChaCha20Poly1305,
};

use crate::keys::KEY_LENGTH;
use strongbox_common::{Error, Result};

/// Nonce size for XChaCha20-Poly1305 (24 bytes).
pub const NONCE_SIZE: usize = 24;

/// Authentication tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

fn cipher_for(key: &[u8]) -> Result<XChaCha20Poly1305> {
    if key.len() != KEY_LENGTH {
        return Err(Error::Crypto(format!(
            "Invalid key length: expected {}, got {}",
            KEY_LENGTH,
            key.len()
        )));
    }
    Ok(XChaCha20Poly1305::new(GenericArray::from_slice(key)))
}

/// Encrypt plaintext under a freshly generated random nonce.
///
/// # Postconditions
/// - Returns `(nonce, ciphertext || tag)`
/// - The ciphertext length is plaintext length + TAG_SIZE
///
/// # Errors
/// - Returns error if key length is incorrect
/// - Returns error if encryption fails
pub fn seal(key: &[u8], plaintext: &[u8]) -> Result<([u8; NONCE_SIZE], Vec<u8>)> {
    let cipher = cipher_for(key)?;
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    nonce_bytes.copy_from_slice(&nonce);
    Ok((nonce_bytes, ciphertext))
}

/// Decrypt and authenticate `ciphertext` produced by [`seal`].
///
/// A nonce of the wrong size or a ciphertext shorter than the tag cannot have
/// come from [`seal`] and is rejected the same way as a bad tag.
///
/// # Errors
/// - `Crypto` if the key length is incorrect
/// - `Authentication` if the envelope is malformed or the tag does not verify
///
/// # Security
/// - Authenticates before returning any plaintext
pub fn open(key: &[u8], nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher_for(key)?;

    if nonce.len() != NONCE_SIZE || ciphertext.len() < TAG_SIZE {
        return Err(Error::Authentication);
    }

    cipher
        .decrypt(GenericArray::from_slice(nonce), ciphertext)
        .map_err(|_| Error::Authentication)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_seal_open_roundtrip() {
        let key = [42u8; KEY_LENGTH];
        let plaintext = b"Hello, World!";

        let (nonce, ciphertext) = seal(&key, plaintext).unwrap();
        let decrypted = open(&key, &nonce, &ciphertext).unwrap();

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_ciphertext_size() {
        let key = [42u8; KEY_LENGTH];
        let plaintext = b"Test message";

        let (_, ciphertext) = seal(&key, plaintext).unwrap();

        assert_eq!(ciphertext.len(), plaintext.len() + TAG_SIZE);
    }

    #[test]
    fn test_nonces_not_reused() {
        let key = [42u8; KEY_LENGTH];
        let mut seen = HashSet::new();

        for _ in 0..2000 {
            let (nonce, _) = seal(&key, b"same plaintext").unwrap();
            assert!(seen.insert(nonce), "nonce reused");
        }
    }

    #[test]
    fn test_wrong_key_fails() {
        let (nonce, ciphertext) = seal(&[1u8; KEY_LENGTH], b"Secret data").unwrap();
        let result = open(&[2u8; KEY_LENGTH], &nonce, &ciphertext);

        assert_eq!(result, Err(Error::Authentication));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = [42u8; KEY_LENGTH];
        let (nonce, mut ciphertext) = seal(&key, b"Important data").unwrap();
        ciphertext[5] ^= 0xFF;

        assert_eq!(open(&key, &nonce, &ciphertext), Err(Error::Authentication));
    }

    #[test]
    fn test_tampered_nonce_fails() {
        let key = [42u8; KEY_LENGTH];
        let (mut nonce, ciphertext) = seal(&key, b"Important data").unwrap();
        nonce[0] ^= 0x01;

        assert_eq!(open(&key, &nonce, &ciphertext), Err(Error::Authentication));
    }

    #[test]
    fn test_malformed_envelope_fails_closed() {
        let key = [42u8; KEY_LENGTH];
        assert_eq!(open(&key, &[0u8; 12], &[0u8; 32]), Err(Error::Authentication));
        assert_eq!(
            open(&key, &[0u8; NONCE_SIZE], &[0u8; TAG_SIZE - 1]),
            Err(Error::Authentication)
        );
    }

    #[test]
    fn test_invalid_key_length() {
        let short_key = [0u8; 16];

        assert!(matches!(seal(&short_key, b"data"), Err(Error::Crypto(_))));
    }

    #[test]
    fn test_empty_plaintext() {
        let key = [42u8; KEY_LENGTH];

        let (nonce, ciphertext) = seal(&key, b"").unwrap();
        let decrypted = open(&key, &nonce, &ciphertext).unwrap();

        assert!(decrypted.is_empty());
    }
}
