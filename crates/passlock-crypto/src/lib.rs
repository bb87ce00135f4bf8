//! passlock-crypto: PassLock cryptographic primitives
//!
//! # Design principles
//! - NO custom crypto; Argon2id and AES-256-GCM come from audited RustCrypto crates.
//! - Zeroize all key material and decrypted payloads on drop.
//! - Every AEAD failure is reported as the same `AuthenticationFailure`.
//!
//! # Module layout
//! - `kdf`      : Argon2id key-encryption-key derivation + parameter validation
//! - `aead`     : AES-256-GCM encrypt/decrypt helpers with random 96-bit nonces
//! - `envelope` : wrap / unwrap of the 32-byte vault key under the KEK
//! - `secret`   : per-item secret payload codec under the vault key
//! - `error`    : unified error type

pub mod aead;
pub mod envelope;
pub mod error;
pub mod kdf;
pub mod secret;

pub use envelope::{VaultKey, WrappedVaultKey};
pub use error::CryptoError;
pub use kdf::{Kek, KdfParams};
pub use secret::{EncryptedSecret, SecretPayload};
