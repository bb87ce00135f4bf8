use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use passlock_crypto::SecretPayload;

/// Decrypted secrets keyed by item id, valid only for the `updated_at` they
/// were decrypted at. Cleared whenever the session locks.
#[derive(Clone, Default)]
pub struct SecretCache {
    entries: Arc<Mutex<HashMap<String, (DateTime<Utc>, SecretPayload)>>>,
}

impl SecretCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// A hit requires a matching `updated_at`; a stale entry is dropped.
    pub fn get(&self, id: &str, updated_at: DateTime<Utc>) -> Option<SecretPayload> {
        let mut entries = self.entries.lock();
        match entries.get(id) {
            Some((stamp, payload)) if *stamp == updated_at => Some(payload.clone()),
            Some(_) => {
                entries.remove(id);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, id: &str, updated_at: DateTime<Utc>, payload: SecretPayload) {
        self.entries
            .lock()
            .insert(id.to_string(), (updated_at, payload));
    }

    pub fn evict(&self, id: &str) {
        self.entries.lock().remove(id);
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
