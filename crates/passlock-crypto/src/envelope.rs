//! Vault key envelope
//!
//! The vault key is 32 random bytes generated once at vault creation. It is
//! persisted only wrapped (AES-256-GCM) under the password-derived KEK.
//! Changing the master password re-wraps the same vault key, so item
//! ciphertexts never need re-encryption.

use rand::RngCore;
use zeroize::ZeroizeOnDrop;

use crate::aead::{self, NONCE_LEN};
use crate::error::CryptoError;
use crate::kdf::Kek;

pub const VAULT_KEY_LEN: usize = 32;

/// Raw 32-byte vault key. Zeroized on drop; deliberately not `Clone`.
#[derive(ZeroizeOnDrop)]
pub struct VaultKey([u8; VAULT_KEY_LEN]);

impl VaultKey {
    pub fn generate() -> Self {
        let mut key = Self([0u8; VAULT_KEY_LEN]);
        rand::rngs::OsRng.fill_bytes(&mut key.0);
        key
    }

    /// Copy key material straight into the key buffer. The caller owns (and
    /// wipes) `bytes`; no intermediate copy is made.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != VAULT_KEY_LEN {
            return Err(CryptoError::CorruptEnvelope);
        }
        let mut key = Self([0u8; VAULT_KEY_LEN]);
        key.0.copy_from_slice(bytes);
        Ok(key)
    }

    pub fn as_bytes(&self) -> &[u8; VAULT_KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("VaultKey(..)")
    }
}

/// Wrapped vault key as persisted in `VaultMeta` (`wrapNonce` / `wrappedVaultKey`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedVaultKey {
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
}

/// Wrap the vault key under the KEK with a fresh nonce.
pub fn wrap(kek: &Kek, vault_key: &VaultKey) -> Result<WrappedVaultKey, CryptoError> {
    let (nonce, ciphertext) = aead::encrypt(kek.as_bytes(), vault_key.as_bytes(), b"")?;
    Ok(WrappedVaultKey { nonce, ciphertext })
}

/// Unwrap the vault key.
///
/// A tag mismatch means wrong password, corruption or tampering; callers must
/// not try to tell these apart. A well-authenticated plaintext of the wrong
/// length is `CorruptEnvelope`.
pub fn unwrap(kek: &Kek, nonce: &[u8], ciphertext: &[u8]) -> Result<VaultKey, CryptoError> {
    let plaintext = aead::decrypt(kek.as_bytes(), nonce, ciphertext, b"")?;
    VaultKey::from_slice(&plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kdf::{derive, KdfParams, SALT_LEN};

    #[test]
    fn wrap_unwrap_roundtrip() {
        let kek = derive("correct-horse-battery", &[3u8; SALT_LEN], &KdfParams::default()).unwrap();
        let vault_key = VaultKey::generate();
        let wrapped = wrap(&kek, &vault_key).unwrap();
        let unwrapped = unwrap(&kek, &wrapped.nonce, &wrapped.ciphertext).unwrap();
        assert_eq!(unwrapped.as_bytes(), vault_key.as_bytes());
    }

    #[test]
    fn wrong_password_is_authentication_failure() {
        let salt = [3u8; SALT_LEN];
        let params = KdfParams::default();
        let kek = derive("correct-horse-battery", &salt, &params).unwrap();
        let wrapped = wrap(&kek, &VaultKey::generate()).unwrap();

        let wrong = derive("correct-horse-battery!", &salt, &params).unwrap();
        for _ in 0..3 {
            assert!(matches!(
                unwrap(&wrong, &wrapped.nonce, &wrapped.ciphertext),
                Err(CryptoError::AuthenticationFailure)
            ));
        }
    }

    #[test]
    fn every_wrap_uses_a_fresh_nonce() {
        let kek = Kek::from_bytes([5u8; 32]);
        let vault_key = VaultKey::generate();
        let a = wrap(&kek, &vault_key).unwrap();
        let b = wrap(&kek, &vault_key).unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn wrong_length_plaintext_is_corrupt_envelope() {
        let kek = Kek::from_bytes([5u8; 32]);
        let (nonce, ciphertext) = aead::encrypt(kek.as_bytes(), &[1u8; 31], b"").unwrap();
        assert!(matches!(
            unwrap(&kek, &nonce, &ciphertext),
            Err(CryptoError::CorruptEnvelope)
        ));
    }

    #[test]
    fn from_slice_requires_exact_key_length() {
        let key = VaultKey::from_slice(&[7u8; VAULT_KEY_LEN]).unwrap();
        assert_eq!(key.as_bytes(), &[7u8; VAULT_KEY_LEN]);
        assert!(matches!(
            VaultKey::from_slice(&[7u8; VAULT_KEY_LEN + 1]),
            Err(CryptoError::CorruptEnvelope)
        ));
    }
}
