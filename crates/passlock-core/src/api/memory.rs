use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::api::VaultApi;
use crate::clock::{Clock, SystemClock};
use crate::error::{VaultError, VaultResult};
use crate::models::{
    ItemFilter, NewVaultItem, SetupVaultRequest, VaultItem, VaultItemPatch, VaultMeta,
    VaultMetaPatch, MAX_LISTED_ITEMS,
};

#[derive(Default)]
struct Store {
    meta: Option<VaultMeta>,
    items: HashMap<String, VaultItem>,
    last_stamp: Option<DateTime<Utc>>,
    latency: Duration,
    failing_writes: usize,
    updates: Vec<(String, VaultItemPatch)>,
}

/// In-process store with the same status semantics as the REST backend.
/// Records item updates and can inject latency and network failures.
pub struct MemoryVaultApi {
    clock: Arc<dyn Clock>,
    store: Mutex<Store>,
    updates_in_flight: AtomicUsize,
    max_concurrent_updates: AtomicUsize,
}

impl Default for MemoryVaultApi {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl MemoryVaultApi {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            store: Mutex::new(Store::default()),
            updates_in_flight: AtomicUsize::new(0),
            max_concurrent_updates: AtomicUsize::new(0),
        }
    }

    /// Delay applied to every call before it touches the store.
    pub fn set_latency(&self, latency: Duration) {
        self.store.lock().latency = latency;
    }

    /// The next `n` writes fail with a network error without being applied.
    pub fn fail_next_writes(&self, n: usize) {
        self.store.lock().failing_writes = n;
    }

    pub fn update_count(&self) -> usize {
        self.store.lock().updates.len()
    }

    pub fn updates(&self) -> Vec<(String, VaultItemPatch)> {
        self.store.lock().updates.clone()
    }

    pub fn max_concurrent_updates(&self) -> usize {
        self.max_concurrent_updates.load(Ordering::SeqCst)
    }

    pub fn stored_meta(&self) -> Option<VaultMeta> {
        self.store.lock().meta.clone()
    }

    pub fn stored_item(&self, id: &str) -> Option<VaultItem> {
        self.store.lock().items.get(id).cloned()
    }

    async fn delay(&self) {
        let latency = self.store.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    /// Strictly increasing timestamps, even when the clock is paused.
    fn stamp(&self, store: &mut Store) -> DateTime<Utc> {
        let mut now = self.clock.now();
        if let Some(last) = store.last_stamp {
            if now <= last {
                now = last + chrono::Duration::microseconds(1);
            }
        }
        store.last_stamp = Some(now);
        now
    }

    fn take_failure(store: &mut Store) -> VaultResult<()> {
        if store.failing_writes > 0 {
            store.failing_writes -= 1;
            return Err(VaultError::Network("injected write failure".into()));
        }
        Ok(())
    }

    async fn apply_update(&self, id: &str, patch: &VaultItemPatch) -> VaultResult<VaultItem> {
        self.delay().await;
        let mut store = self.store.lock();
        Self::take_failure(&mut store)?;
        if patch.is_empty() {
            return Err(VaultError::Api {
                status: 400,
                message: "No fields to update".into(),
            });
        }
        if !store.items.contains_key(id) {
            return Err(VaultError::NotFound(id.to_string()));
        }
        let stamp = self.stamp(&mut store);
        let Some(item) = store.items.get_mut(id) else {
            return Err(VaultError::NotFound(id.to_string()));
        };
        if let Some(name) = &patch.name {
            item.meta.name = name.trim().to_string();
        }
        if let Some(username) = &patch.username {
            item.meta.username = Some(username.clone());
        }
        if let Some(url) = &patch.url {
            item.meta.url = Some(url.clone());
        }
        if let Some(folder) = &patch.folder {
            item.meta.folder = Some(folder.clone());
        }
        if let Some(favorite) = patch.favorite {
            item.meta.favorite = favorite;
        }
        if let Some(ciphertext) = &patch.ciphertext {
            item.ciphertext = ciphertext.clone();
        }
        if let Some(iv) = &patch.iv {
            item.iv = iv.clone();
        }
        item.updated_at = stamp;
        let updated = item.clone();
        store.updates.push((id.to_string(), patch.clone()));
        Ok(updated)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl VaultApi for MemoryVaultApi {
    async fn get_meta(&self) -> VaultResult<Option<VaultMeta>> {
        self.delay().await;
        Ok(self.store.lock().meta.clone())
    }

    async fn setup(&self, request: &SetupVaultRequest) -> VaultResult<VaultMeta> {
        self.delay().await;
        let mut store = self.store.lock();
        Self::take_failure(&mut store)?;
        if store.meta.is_some() {
            return Err(VaultError::AlreadyInitialised);
        }
        let now = self.stamp(&mut store);
        let meta = VaultMeta {
            kdf_algorithm: request.kdf_algorithm.clone(),
            kdf_params: request.kdf_params,
            salt: request.salt.clone(),
            wrapped_vault_key: request.wrapped_vault_key.clone(),
            wrap_nonce: request.wrap_nonce.clone(),
            version: request.version.max(1),
            created_at: Some(now),
            updated_at: Some(now),
        };
        store.meta = Some(meta.clone());
        Ok(meta)
    }

    async fn patch_meta(&self, patch: &VaultMetaPatch) -> VaultResult<VaultMeta> {
        self.delay().await;
        let mut store = self.store.lock();
        Self::take_failure(&mut store)?;
        let now = self.stamp(&mut store);
        let Some(meta) = store.meta.as_mut() else {
            return Err(VaultError::NotInitialised);
        };
        if meta.version != patch.expected_version {
            return Err(VaultError::VersionConflict {
                expected: patch.expected_version,
            });
        }
        meta.kdf_algorithm = patch.kdf_algorithm.clone();
        meta.kdf_params = patch.kdf_params;
        meta.salt = patch.salt.clone();
        meta.wrapped_vault_key = patch.wrapped_vault_key.clone();
        meta.wrap_nonce = patch.wrap_nonce.clone();
        meta.version += 1;
        meta.updated_at = Some(now);
        Ok(meta.clone())
    }

    async fn list_items(&self, filter: &ItemFilter) -> VaultResult<Vec<VaultItem>> {
        self.delay().await;
        let store = self.store.lock();
        let mut items: Vec<VaultItem> = store
            .items
            .values()
            .filter(|item| filter.matches(item))
            .cloned()
            .collect();
        items.sort_by(|a, b| {
            b.meta
                .favorite
                .cmp(&a.meta.favorite)
                .then(b.updated_at.cmp(&a.updated_at))
        });
        items.truncate(MAX_LISTED_ITEMS);
        Ok(items)
    }

    async fn get_item(&self, id: &str) -> VaultResult<VaultItem> {
        self.delay().await;
        self.store
            .lock()
            .items
            .get(id)
            .cloned()
            .ok_or_else(|| VaultError::NotFound(id.to_string()))
    }

    async fn create_item(&self, item: &NewVaultItem) -> VaultResult<VaultItem> {
        self.delay().await;
        let mut store = self.store.lock();
        Self::take_failure(&mut store)?;
        let now = self.stamp(&mut store);
        let mut meta = item.meta.clone();
        meta.name = meta.name.trim().to_string();
        let created = VaultItem {
            id: Uuid::new_v4().simple().to_string(),
            meta,
            ciphertext: item.ciphertext.clone(),
            iv: item.iv.clone(),
            created_at: now,
            updated_at: now,
        };
        store.items.insert(created.id.clone(), created.clone());
        Ok(created)
    }

    async fn update_item(&self, id: &str, patch: &VaultItemPatch) -> VaultResult<VaultItem> {
        let current = self.updates_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent_updates.fetch_max(current, Ordering::SeqCst);
        let _guard = InFlight(&self.updates_in_flight);
        self.apply_update(id, patch).await
    }

    async fn delete_item(&self, id: &str) -> VaultResult<()> {
        self.delay().await;
        let mut store = self.store.lock();
        Self::take_failure(&mut store)?;
        store
            .items
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| VaultError::NotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ItemMetadata;
    use passlock_crypto::KdfParams;

    fn new_item(name: &str, folder: Option<&str>, favorite: bool) -> NewVaultItem {
        NewVaultItem {
            meta: ItemMetadata {
                name: name.into(),
                folder: folder.map(str::to_string),
                favorite,
                ..ItemMetadata::default()
            },
            ciphertext: vec![1, 2, 3],
            iv: vec![0; 12],
        }
    }

    #[tokio::test]
    async fn setup_twice_conflicts() {
        let api = MemoryVaultApi::default();
        let req = SetupVaultRequest::argon2id(KdfParams::default(), &[0; 16], &[0; 12], &[0; 48]);
        assert_eq!(api.setup(&req).await.unwrap().version, 1);
        assert!(matches!(api.setup(&req).await, Err(VaultError::AlreadyInitialised)));
    }

    #[tokio::test]
    async fn meta_patch_is_compare_and_swap() {
        let api = MemoryVaultApi::default();
        let req = SetupVaultRequest::argon2id(KdfParams::default(), &[0; 16], &[0; 12], &[0; 48]);
        api.setup(&req).await.unwrap();
        let patch = VaultMetaPatch {
            kdf_algorithm: req.kdf_algorithm.clone(),
            kdf_params: req.kdf_params,
            salt: vec![9; 16],
            wrapped_vault_key: vec![9; 48],
            wrap_nonce: vec![9; 12],
            expected_version: 1,
        };
        assert_eq!(api.patch_meta(&patch).await.unwrap().version, 2);
        assert!(matches!(
            api.patch_meta(&patch).await,
            Err(VaultError::VersionConflict { expected: 1 })
        ));
    }

    #[tokio::test]
    async fn listing_orders_favourites_then_recent() {
        let api = MemoryVaultApi::default();
        let a = api.create_item(&new_item("a", Some("Work"), false)).await.unwrap();
        let b = api.create_item(&new_item("b", None, true)).await.unwrap();
        let c = api.create_item(&new_item("c", Some("Work"), false)).await.unwrap();

        let all = api.list_items(&ItemFilter::default()).await.unwrap();
        let ids: Vec<_> = all.iter().map(|i| i.id.clone()).collect();
        assert_eq!(ids, vec![b.id.clone(), c.id.clone(), a.id.clone()]);

        let work = api
            .list_items(&ItemFilter {
                folder: Some("Work".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(work.len(), 2);

        let searched = api
            .list_items(&ItemFilter {
                query: Some("WORK".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        let ids: Vec<_> = searched.iter().map(|i| i.id.clone()).collect();
        assert_eq!(ids, vec![c.id, a.id]);
    }

    #[tokio::test]
    async fn empty_patch_is_rejected() {
        let api = MemoryVaultApi::default();
        let item = api.create_item(&new_item("a", None, false)).await.unwrap();
        let err = api.update_item(&item.id, &VaultItemPatch::default()).await.unwrap_err();
        assert!(matches!(err, VaultError::Api { status: 400, .. }));
        assert_eq!(api.update_count(), 0);
    }

    #[tokio::test]
    async fn injected_failures_are_not_applied() {
        let api = MemoryVaultApi::default();
        let item = api.create_item(&new_item("a", None, false)).await.unwrap();
        api.fail_next_writes(1);
        let patch = VaultItemPatch {
            favorite: Some(true),
            ..VaultItemPatch::default()
        };
        assert!(api.update_item(&item.id, &patch).await.unwrap_err().is_retryable());
        assert!(!api.stored_item(&item.id).unwrap().meta.favorite);
        let updated = api.update_item(&item.id, &patch).await.unwrap();
        assert!(updated.meta.favorite);
        assert!(updated.updated_at > item.updated_at);
    }
}
