//! Vault service: composes the KDF, envelope and secret codecs with the
//! session, secret cache, reconciler and persistence backend.

use std::sync::Arc;

use passlock_crypto::envelope::{self, VaultKey};
use passlock_crypto::kdf::{self, Kek, KdfParams, KDF_ALGORITHM};
use passlock_crypto::secret::{decrypt_secret, encrypt_secret};
use passlock_crypto::{CryptoError, SecretPayload};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::api::{HttpVaultApi, VaultApi};
use crate::cache::SecretCache;
use crate::clock::SystemClock;
use crate::error::{VaultError, VaultResult};
use crate::models::{
    ItemFilter, ItemMetadata, NewVaultItem, SetupVaultRequest, VaultItem, VaultItemPatch,
    VaultMeta, VaultMetaPatch,
};
use crate::policy::validate_new_master_password;
use crate::reconciler::{Draft, Reconciler, ReconcilerConfig};
use crate::scheduler::{Scheduler, TokioScheduler};
use crate::session::{Session, SessionConfig, SessionLease};
use crate::settings::PasslockSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultStatus {
    Uninitialised,
    Locked,
    Unlocked,
}

pub struct Passlock<A: VaultApi> {
    api: Arc<A>,
    session: Session,
    cache: SecretCache,
    reconciler: Reconciler<A>,
    kdf: KdfParams,
}

impl Passlock<HttpVaultApi> {
    pub fn from_settings(settings: &PasslockSettings) -> VaultResult<Self> {
        let api = Arc::new(HttpVaultApi::new(&settings.api)?);
        let scheduler = Arc::new(TokioScheduler::new(Arc::new(SystemClock)));
        Ok(Self::new(
            api,
            scheduler,
            settings.session_config(),
            settings.reconciler_config(),
            settings.kdf,
        ))
    }
}

impl<A: VaultApi> Passlock<A> {
    pub fn new(
        api: Arc<A>,
        scheduler: Arc<dyn Scheduler>,
        session_config: SessionConfig,
        reconciler_config: ReconcilerConfig,
        kdf: KdfParams,
    ) -> Self {
        let session = Session::new(session_config, scheduler.clone());
        let cache = SecretCache::new();
        let evict = cache.clone();
        session.on_lock(move |_| evict.clear());
        let reconciler = Reconciler::new(
            api.clone(),
            session.clone(),
            cache.clone(),
            scheduler,
            reconciler_config,
        );
        Self {
            api,
            session,
            cache,
            reconciler,
            kdf,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn reconciler(&self) -> &Reconciler<A> {
        &self.reconciler
    }

    pub fn cache(&self) -> &SecretCache {
        &self.cache
    }

    pub fn api(&self) -> &Arc<A> {
        &self.api
    }

    pub async fn status(&self) -> VaultResult<VaultStatus> {
        if self.session.is_unlocked() {
            return Ok(VaultStatus::Unlocked);
        }
        Ok(match self.api.get_meta().await? {
            Some(_) => VaultStatus::Locked,
            None => VaultStatus::Uninitialised,
        })
    }

    /// Create the vault: fresh salt and vault key, wrapped under the KEK
    /// derived from `password`. The session is unlocked with the new key.
    pub async fn setup(&self, password: &str, confirm: &str) -> VaultResult<SessionLease> {
        validate_new_master_password(password, confirm)?;
        if self.api.get_meta().await?.is_some() {
            return Err(VaultError::AlreadyInitialised);
        }

        let salt = kdf::generate_salt();
        let vault_key = VaultKey::generate();
        let kek = derive_kek(password, salt.to_vec(), self.kdf).await?;
        let wrapped = envelope::wrap(&kek, &vault_key)?;
        let request =
            SetupVaultRequest::argon2id(self.kdf, &salt, &wrapped.nonce, &wrapped.ciphertext);
        let meta = self.api.setup(&request).await?;
        info!(version = meta.version, "vault initialised");

        Ok(self.session.unlock(vault_key))
    }

    pub async fn unlock(&self, password: &str) -> VaultResult<SessionLease> {
        let meta = self.api.get_meta().await?.ok_or(VaultError::NotInitialised)?;
        let vault_key = open_envelope(&meta, password).await?;
        let lease = self.session.unlock(vault_key);
        info!(version = meta.version, "vault unlocked");
        Ok(lease)
    }

    pub fn lock(&self) {
        self.session.lock();
    }

    /// Verify `current` against the stored envelope, then re-wrap the same
    /// vault key under a new salt and KEK. Guarded by the metadata version;
    /// on any failure the stored envelope is left untouched.
    pub async fn change_master_password(
        &self,
        current: &str,
        new: &str,
        confirm: &str,
    ) -> VaultResult<VaultMeta> {
        validate_new_master_password(new, confirm)?;
        self.session.lease()?;

        let meta = self.api.get_meta().await?.ok_or(VaultError::NotInitialised)?;
        let vault_key = open_envelope(&meta, current).await?;

        let salt = kdf::generate_salt();
        let kek = derive_kek(new, salt.to_vec(), self.kdf).await?;
        let wrapped = envelope::wrap(&kek, &vault_key)?;
        let patch = VaultMetaPatch {
            kdf_algorithm: KDF_ALGORITHM.to_string(),
            kdf_params: self.kdf,
            salt: salt.to_vec(),
            wrapped_vault_key: wrapped.ciphertext,
            wrap_nonce: wrapped.nonce.to_vec(),
            expected_version: meta.version,
        };
        match self.api.patch_meta(&patch).await {
            Ok(updated) => {
                info!(version = updated.version, "master password changed");
                Ok(updated)
            }
            Err(err) => {
                warn!(error = %err, "master password change not persisted");
                Err(err)
            }
        }
    }

    /// Metadata only; works while locked.
    pub async fn list_items(&self, filter: &ItemFilter) -> VaultResult<Vec<VaultItem>> {
        self.api.list_items(filter).await
    }

    pub async fn create_item(&self, draft: &Draft) -> VaultResult<VaultItem> {
        let lease = self.session.lease()?;
        let sealed = self
            .session
            .with_key_for(&lease, |key| encrypt_secret(key, &draft.secret))??;
        let item = self
            .api
            .create_item(&NewVaultItem::new(&draft.meta, sealed))
            .await?;
        let cached = self.session.while_current(&lease, || {
            self.cache
                .insert(&item.id, item.updated_at, draft.secret.clone())
        });
        if cached.is_err() {
            debug!(item_id = %item.id, "session changed during create, secret not cached");
        }
        info!(item_id = %item.id, "vault item created");
        Ok(item)
    }

    /// Decrypt an item's secret, served from the cache when `updated_at` matches.
    pub async fn open_item(&self, item: &VaultItem) -> VaultResult<SecretPayload> {
        let lease = self.session.lease()?;
        self.decrypt_under(&lease, item)
    }

    /// Fetch and decrypt one item. A result that arrives after the session
    /// locked is discarded.
    pub async fn fetch_and_open(&self, id: &str) -> VaultResult<(VaultItem, SecretPayload)> {
        let (item, secret, _) = self.fetch_under_lease(id).await?;
        Ok((item, secret))
    }

    /// Fetch, decrypt and start autosave tracking for an item.
    pub async fn open_for_edit(&self, id: &str) -> VaultResult<Draft> {
        let (item, secret, lease) = self.fetch_under_lease(id).await?;
        let draft = Draft {
            meta: item.meta.clone(),
            secret,
        };
        self.reconciler.open(&item, draft.secret.clone(), lease);
        Ok(draft)
    }

    /// Writes through the reconciler when the item is open for editing, so
    /// the write never overlaps an autosave and the baseline stays current.
    pub async fn update_item_metadata(
        &self,
        id: &str,
        meta: &ItemMetadata,
    ) -> VaultResult<VaultItem> {
        self.session.lease()?;
        if self.reconciler.is_open(id) {
            return self
                .reconciler
                .write_through(id, |draft| draft.meta = meta.clone())
                .await;
        }
        let patch = VaultItemPatch::default().with_metadata(meta);
        let item = self.api.update_item(id, &patch).await?;
        self.cache.evict(id);
        Ok(item)
    }

    pub async fn update_item_secret(
        &self,
        id: &str,
        secret: &SecretPayload,
    ) -> VaultResult<VaultItem> {
        let lease = self.session.lease()?;
        if self.reconciler.is_open(id) {
            return self
                .reconciler
                .write_through(id, |draft| draft.secret = secret.clone())
                .await;
        }
        let sealed = self
            .session
            .with_key_for(&lease, |key| encrypt_secret(key, secret))??;
        let item = self
            .api
            .update_item(id, &VaultItemPatch::secret(sealed))
            .await?;
        let cached = self.session.while_current(&lease, || {
            self.cache.insert(id, item.updated_at, secret.clone())
        });
        if cached.is_err() {
            self.cache.evict(id);
        }
        Ok(item)
    }

    pub async fn delete_item(&self, id: &str) -> VaultResult<()> {
        self.api.delete_item(id).await?;
        self.cache.evict(id);
        self.reconciler.close(id);
        info!(item_id = %id, "vault item deleted");
        Ok(())
    }

    async fn fetch_under_lease(
        &self,
        id: &str,
    ) -> VaultResult<(VaultItem, SecretPayload, SessionLease)> {
        let lease = self.session.lease()?;
        let item = self.api.get_item(id).await?;
        if !self.session.is_current(&lease) {
            debug!(item_id = %id, "session changed during fetch, discarding item");
            return Err(VaultError::Locked);
        }
        let secret = self.decrypt_under(&lease, &item)?;
        Ok((item, secret, lease))
    }

    fn decrypt_under(&self, lease: &SessionLease, item: &VaultItem) -> VaultResult<SecretPayload> {
        if let Some(hit) = self.cache.get(&item.id, item.updated_at) {
            return Ok(hit);
        }
        // Decrypt and cache under the session lock so a concurrent lock
        // clears the cache only after the insert.
        self.session
            .with_key_for(lease, |key| {
                let secret = decrypt_secret(key, &item.sealed_secret())?;
                self.cache.insert(&item.id, item.updated_at, secret.clone());
                Ok::<_, CryptoError>(secret)
            })?
            .map_err(|err| {
                warn!(item_id = %item.id, "item secret failed to decrypt");
                VaultError::from(err)
            })
    }
}

/// Runs Argon2id on the blocking pool.
async fn derive_kek(password: &str, salt: Vec<u8>, params: KdfParams) -> VaultResult<Kek> {
    let password = Zeroizing::new(password.to_string());
    let kek = tokio::task::spawn_blocking(move || kdf::derive(&password, &salt, &params))
        .await
        .map_err(|e| VaultError::Task(e.to_string()))??;
    Ok(kek)
}

async fn open_envelope(meta: &VaultMeta, password: &str) -> VaultResult<VaultKey> {
    if meta.kdf_algorithm != KDF_ALGORITHM {
        return Err(CryptoError::InvalidKdfInput(format!(
            "unsupported kdf {}",
            meta.kdf_algorithm
        ))
        .into());
    }
    let kek = derive_kek(password, meta.salt.clone(), meta.kdf_params).await?;
    envelope::unwrap(&kek, &meta.wrap_nonce, &meta.wrapped_vault_key).map_err(|err| {
        warn!("vault envelope failed to open");
        VaultError::from(err)
    })
}
