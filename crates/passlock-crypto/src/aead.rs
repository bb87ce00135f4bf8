//! Authenticated Encryption with Associated Data
//!
//! Uses AES-256-GCM (96-bit nonce).
//! Key size: 32 bytes.  Nonce: 12 bytes (random, fresh per call).  Tag: 16 bytes.
//!
//! Nonce and ciphertext travel separately (`iv` / `ciphertext` on the wire).

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::CryptoError;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Encrypt `plaintext` under a fresh random nonce; returns `(nonce, ciphertext+tag)`.
/// `aad`: additional associated data (authenticated but not encrypted).
pub fn encrypt(
    key: &[u8; KEY_LEN],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<([u8; NONCE_LEN], Vec<u8>), CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::EncryptionFailure)?;
    let nonce = generate_nonce();
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::EncryptionFailure)?;
    Ok((nonce, ciphertext))
}

/// Authenticate and decrypt. Any failure, including a malformed nonce, is an
/// `AuthenticationFailure`.
pub fn decrypt(
    key: &[u8; KEY_LEN],
    nonce: &[u8],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if nonce.len() != NONCE_LEN || ciphertext.len() < TAG_LEN {
        return Err(CryptoError::AuthenticationFailure);
    }
    let cipher =
        Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::AuthenticationFailure)?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map_err(|_| CryptoError::AuthenticationFailure)?;
    Ok(Zeroizing::new(plaintext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        let key = [9u8; KEY_LEN];
        let (nonce, mut ct) = encrypt(&key, b"hello", b"").unwrap();
        ct[0] ^= 0x01;
        assert!(matches!(
            decrypt(&key, &nonce, &ct, b""),
            Err(CryptoError::AuthenticationFailure)
        ));
    }

    #[test]
    fn aad_is_bound() {
        let key = [9u8; KEY_LEN];
        let (nonce, ct) = encrypt(&key, b"hello", b"v1").unwrap();
        assert!(decrypt(&key, &nonce, &ct, b"v2").is_err());
        assert_eq!(decrypt(&key, &nonce, &ct, b"v1").unwrap().as_slice(), b"hello");
    }

    #[test]
    fn malformed_nonce_is_an_auth_failure() {
        let key = [9u8; KEY_LEN];
        let (_, ct) = encrypt(&key, b"hello", b"").unwrap();
        assert!(matches!(
            decrypt(&key, &[0u8; 8], &ct, b""),
            Err(CryptoError::AuthenticationFailure)
        ));
    }
}
