//! Item secret codec
//!
//! Secret-bearing fields of a vault item (`password`, `notes`) are serialised
//! to canonical JSON and sealed under the *vault key* (never the KEK), with a
//! fresh random nonce on every write, including unchanged re-saves.

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::aead;
use crate::envelope::VaultKey;
use crate::error::CryptoError;

/// Plaintext secret fields of one vault item. Zeroized on drop.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct SecretPayload {
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub notes: String,
}

impl SecretPayload {
    pub fn new(password: impl Into<String>, notes: impl Into<String>) -> Self {
        Self {
            password: password.into(),
            notes: notes.into(),
        }
    }
}

impl std::fmt::Debug for SecretPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretPayload")
            .field("password", &"<redacted>")
            .field("notes", &"<redacted>")
            .finish()
    }
}

/// Sealed secret as stored on a `VaultItem` (`ciphertext` + `iv`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedSecret {
    pub iv: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

pub fn encrypt_secret(
    vault_key: &VaultKey,
    payload: &SecretPayload,
) -> Result<EncryptedSecret, CryptoError> {
    let plaintext = Zeroizing::new(serde_json::to_vec(payload)?);
    let (nonce, ciphertext) = aead::encrypt(vault_key.as_bytes(), &plaintext, b"")?;
    Ok(EncryptedSecret {
        iv: nonce.to_vec(),
        ciphertext,
    })
}

pub fn decrypt_secret(
    vault_key: &VaultKey,
    sealed: &EncryptedSecret,
) -> Result<SecretPayload, CryptoError> {
    let plaintext = aead::decrypt(vault_key.as_bytes(), &sealed.iv, &sealed.ciphertext, b"")?;
    Ok(serde_json::from_slice(&plaintext)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_and_nonce_freshness() {
        let key = VaultKey::generate();
        let payload = SecretPayload::new("p@ss1", "recovery codes: 1234");
        let a = encrypt_secret(&key, &payload).unwrap();
        let b = encrypt_secret(&key, &payload).unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
        assert_eq!(decrypt_secret(&key, &a).unwrap(), payload);
        assert_eq!(decrypt_secret(&key, &b).unwrap(), payload);
    }

    #[test]
    fn other_vault_key_cannot_decrypt() {
        let sealed = encrypt_secret(&VaultKey::generate(), &SecretPayload::new("x", "")).unwrap();
        assert!(matches!(
            decrypt_secret(&VaultKey::generate(), &sealed),
            Err(CryptoError::AuthenticationFailure)
        ));
    }

    #[test]
    fn missing_fields_default_to_empty() {
        let key = VaultKey::generate();
        let (nonce, ciphertext) = aead::encrypt(key.as_bytes(), br#"{"password":"only"}"#, b"").unwrap();
        let sealed = EncryptedSecret {
            iv: nonce.to_vec(),
            ciphertext,
        };
        let payload = decrypt_secret(&key, &sealed).unwrap();
        assert_eq!(payload.password, "only");
        assert_eq!(payload.notes, "");
    }

    #[test]
    fn debug_output_is_redacted() {
        let rendered = format!("{:?}", SecretPayload::new("hunter2", "secret notes"));
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("secret notes"));
    }
}
