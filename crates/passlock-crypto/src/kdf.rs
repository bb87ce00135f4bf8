//! Key derivation
//!
//! `derive`: Argon2id, turns the master password into the 32-byte
//!   key-encryption-key (KEK) that wraps the vault key.
//!
//! The function is pure: identical (password, salt, params) always yield the
//! same KEK. Parameters are validated, never clamped.

use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::ZeroizeOnDrop;

use crate::error::CryptoError;

pub const KDF_ALGORITHM: &str = "argon2id";
pub const SALT_LEN: usize = 16;
pub const KEK_LEN: usize = 32;

pub const MIN_TIME_COST: u32 = 3;
pub const MAX_TIME_COST: u32 = 10;
pub const MIN_MEMORY_COST_KIB: u32 = 64 * 1024; // 64 MiB
pub const MAX_MEMORY_COST_KIB: u32 = 1024 * 1024; // 1 GiB
pub const MIN_PARALLELISM: u32 = 1;
pub const MAX_PARALLELISM: u32 = 8;

/// Argon2id cost parameters. Immutable once an envelope was created with them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KdfParams {
    pub time_cost: u32,
    #[serde(rename = "memoryCostKiB")]
    pub memory_cost_kib: u32,
    pub parallelism: u32,
    pub output_len: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            time_cost: 3,
            memory_cost_kib: 64 * 1024,
            parallelism: 1,
            output_len: KEK_LEN as u32,
        }
    }
}

impl KdfParams {
    pub fn validate(&self) -> Result<(), CryptoError> {
        if !(MIN_TIME_COST..=MAX_TIME_COST).contains(&self.time_cost) {
            return Err(CryptoError::InvalidKdfInput(format!(
                "time cost {} outside {MIN_TIME_COST}..={MAX_TIME_COST}",
                self.time_cost
            )));
        }
        if !(MIN_MEMORY_COST_KIB..=MAX_MEMORY_COST_KIB).contains(&self.memory_cost_kib) {
            return Err(CryptoError::InvalidKdfInput(format!(
                "memory cost {} KiB outside {MIN_MEMORY_COST_KIB}..={MAX_MEMORY_COST_KIB}",
                self.memory_cost_kib
            )));
        }
        if !(MIN_PARALLELISM..=MAX_PARALLELISM).contains(&self.parallelism) {
            return Err(CryptoError::InvalidKdfInput(format!(
                "parallelism {} outside {MIN_PARALLELISM}..={MAX_PARALLELISM}",
                self.parallelism
            )));
        }
        if self.output_len as usize != KEK_LEN {
            return Err(CryptoError::InvalidKdfInput(format!(
                "output length must be {KEK_LEN}, got {}",
                self.output_len
            )));
        }
        Ok(())
    }
}

/// 32-byte key-encryption-key derived from the master password. Zeroized on drop.
#[derive(ZeroizeOnDrop)]
pub struct Kek([u8; KEK_LEN]);

impl Kek {
    pub fn as_bytes(&self) -> &[u8; KEK_LEN] {
        &self.0
    }

    #[cfg(test)]
    pub(crate) fn from_bytes(bytes: [u8; KEK_LEN]) -> Self {
        Self(bytes)
    }
}

impl std::fmt::Debug for Kek {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Kek(..)")
    }
}

/// Derive the KEK from a master password + 16-byte salt.
pub fn derive(password: &str, salt: &[u8], params: &KdfParams) -> Result<Kek, CryptoError> {
    if password.is_empty() {
        return Err(CryptoError::InvalidKdfInput("password is empty".into()));
    }
    if salt.len() != SALT_LEN {
        return Err(CryptoError::InvalidKdfInput(format!(
            "salt must be {SALT_LEN} bytes, got {}",
            salt.len()
        )));
    }
    params.validate()?;

    let argon_params = Params::new(
        params.memory_cost_kib,
        params.time_cost,
        params.parallelism,
        Some(KEK_LEN),
    )
    .map_err(|e| CryptoError::InvalidKdfInput(e.to_string()))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

    let mut kek = Kek([0u8; KEK_LEN]);
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut kek.0)
        .map_err(|e| CryptoError::InvalidKdfInput(e.to_string()))?;
    Ok(kek)
}

/// Generate a fresh random 16-byte salt (once per envelope; never reused).
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_is_deterministic() {
        let salt = [7u8; SALT_LEN];
        let params = KdfParams::default();
        let a = derive("correct-horse-battery", &salt, &params).unwrap();
        let b = derive("correct-horse-battery", &salt, &params).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn salt_changes_output() {
        let params = KdfParams::default();
        let a = derive("pw-123456789", &[1u8; SALT_LEN], &params).unwrap();
        let b = derive("pw-123456789", &[2u8; SALT_LEN], &params).unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn empty_password_rejected() {
        let err = derive("", &[0u8; SALT_LEN], &KdfParams::default()).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidKdfInput(_)));
    }

    #[test]
    fn weak_params_are_not_clamped() {
        let params = KdfParams {
            time_cost: 1,
            ..KdfParams::default()
        };
        assert!(matches!(
            derive("pw", &[0u8; SALT_LEN], &params),
            Err(CryptoError::InvalidKdfInput(_))
        ));

        let params = KdfParams {
            memory_cost_kib: 8 * 1024,
            ..KdfParams::default()
        };
        assert!(params.validate().is_err());

        let params = KdfParams {
            output_len: 64,
            ..KdfParams::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn short_salt_rejected() {
        let err = derive("pw", &[0u8; 8], &KdfParams::default()).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidKdfInput(_)));
    }

    #[test]
    fn params_use_wire_names() {
        let json = serde_json::to_value(KdfParams::default()).unwrap();
        assert_eq!(json["timeCost"], 3);
        assert_eq!(json["memoryCostKiB"], 65536);
        assert_eq!(json["parallelism"], 1);
        assert_eq!(json["outputLen"], 32);
    }
}
