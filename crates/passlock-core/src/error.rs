use passlock_crypto::CryptoError;
use thiserror::Error;

/// Shown for every AEAD tag mismatch, whether caused by a wrong password,
/// corruption or tampering.
pub const AUTH_FAILURE_MESSAGE: &str = "Incorrect master password or unable to decrypt";
pub const CORRUPT_VAULT_MESSAGE: &str = "Vault data corrupted";

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Vault is locked; unlock with the master password first")]
    Locked,

    #[error("Vault not initialised")]
    NotInitialised,

    #[error("Vault already initialised")]
    AlreadyInitialised,

    #[error("Vault metadata version conflict (expected version {expected})")]
    VersionConflict { expected: u64 },

    #[error("Vault item not found: {0}")]
    NotFound(String),

    #[error("No open record for item {0}")]
    UnknownItem(String),

    #[error("Network failure: {0}")]
    Network(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server rejected request ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Master password rejected: {0}")]
    PasswordPolicy(String),

    #[error("Invalid settings: {0}")]
    Settings(String),

    #[error("Background task failed: {0}")]
    Task(String),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),
}

pub type VaultResult<T> = Result<T, VaultError>;

impl VaultError {
    /// End-user text. Authentication failures collapse into one message so the
    /// UI never acts as a tamper-vs-wrong-password oracle.
    pub fn user_message(&self) -> String {
        match self {
            VaultError::Crypto(CryptoError::AuthenticationFailure) => {
                AUTH_FAILURE_MESSAGE.to_string()
            }
            VaultError::Crypto(CryptoError::CorruptEnvelope) => CORRUPT_VAULT_MESSAGE.to_string(),
            VaultError::Crypto(CryptoError::InvalidKdfInput(detail)) => {
                format!("Invalid master password or key parameters: {detail}")
            }
            VaultError::Crypto(_) => CORRUPT_VAULT_MESSAGE.to_string(),
            VaultError::VersionConflict { .. } => {
                "Vault settings changed elsewhere; reload and try again".to_string()
            }
            VaultError::Network(_) | VaultError::Http(_) => {
                "Unsaved changes: the server could not be reached".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Only persistence failures may be retried, and only by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, VaultError::Network(_) | VaultError::Http(_))
    }

    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, VaultError::Crypto(CryptoError::AuthenticationFailure))
    }
}
