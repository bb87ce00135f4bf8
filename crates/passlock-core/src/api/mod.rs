//! Persistence contract.
//!
//! The backend is a dumb store of opaque ciphertext. Everything crossing this
//! trait is already encrypted; the only plaintext is item metadata.

pub mod http;
pub mod memory;

use async_trait::async_trait;

use crate::error::VaultResult;
use crate::models::{
    ItemFilter, NewVaultItem, SetupVaultRequest, VaultItem, VaultItemPatch, VaultMeta,
    VaultMetaPatch,
};

pub use http::HttpVaultApi;
pub use memory::MemoryVaultApi;

#[async_trait]
pub trait VaultApi: Send + Sync + 'static {
    /// `None` when the vault has not been set up yet.
    async fn get_meta(&self) -> VaultResult<Option<VaultMeta>>;

    /// Fails with `AlreadyInitialised` if metadata exists.
    async fn setup(&self, request: &SetupVaultRequest) -> VaultResult<VaultMeta>;

    /// Compare-and-swap on `expected_version`; the store bumps the version.
    async fn patch_meta(&self, patch: &VaultMetaPatch) -> VaultResult<VaultMeta>;

    async fn list_items(&self, filter: &ItemFilter) -> VaultResult<Vec<VaultItem>>;

    async fn get_item(&self, id: &str) -> VaultResult<VaultItem>;

    async fn create_item(&self, item: &NewVaultItem) -> VaultResult<VaultItem>;

    /// Partial update. The store refreshes `updated_at`.
    async fn update_item(&self, id: &str, patch: &VaultItemPatch) -> VaultResult<VaultItem>;

    async fn delete_item(&self, id: &str) -> VaultResult<()>;
}
