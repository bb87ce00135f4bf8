//! passlock-core: client side of the PassLock zero-knowledge vault
//!
//! # Module layout
//! - `session`   : custody of the vault key with idle and absolute expiry
//! - `scheduler` : wall-clock deadline timers (`schedule_at` / cancel)
//! - `clock`     : wall-clock sources for deadlines
//! - `reconciler`: per-record dirty tracking and debounced autosave
//! - `cache`     : decrypted secret cache keyed by id + `updatedAt`
//! - `vault`     : the `Passlock` service composing everything above
//! - `api`       : persistence contract, REST client and in-memory store
//! - `models`    : wire types
//! - `policy`    : master password rules and strength estimate
//! - `settings`  : layered configuration
//! - `paths`     : platform data directory
//! - `error`     : `VaultError` and the user-facing message policy

pub mod api;
pub mod cache;
pub mod clock;
pub mod error;
pub mod models;
pub mod paths;
pub mod policy;
pub mod reconciler;
pub mod scheduler;
pub mod session;
pub mod settings;
pub mod vault;

pub use api::{HttpVaultApi, MemoryVaultApi, VaultApi};
pub use cache::SecretCache;
pub use clock::{Clock, SystemClock, TokioClock};
pub use error::{VaultError, VaultResult};
pub use models::{ItemFilter, ItemMetadata, VaultItem, VaultMeta};
pub use reconciler::{CommitOutcome, DirtyFlags, Draft, Reconciler, ReconcilerConfig, SaveState};
pub use scheduler::{Scheduler, TimerHandle, TokioScheduler};
pub use session::{
    ActivitySignal, LockReason, Session, SessionConfig, SessionLease, SessionState, SessionStatus,
};
pub use settings::PasslockSettings;
pub use vault::{Passlock, VaultStatus};

pub use passlock_crypto::{KdfParams, SecretPayload};
