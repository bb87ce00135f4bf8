use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid key derivation input: {0}")]
    InvalidKdfInput(String),

    #[error("AEAD encryption failed")]
    EncryptionFailure,

    #[error("AEAD decryption failed (authentication tag mismatch)")]
    AuthenticationFailure,

    #[error("Vault key envelope is corrupt")]
    CorruptEnvelope,

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),
}
