//! Autosave reconciler.
//!
//! Each open record keeps a `draft` (live edits) and a `baseline` (last value
//! known to be persisted). Edits schedule a single debounced commit per
//! record; a newer edit replaces the pending commit, and reverting to the
//! baseline cancels it. Only one write per item id is ever in flight, even
//! across a close and reopen; a commit that comes due meanwhile is deferred
//! until the write settles. Writes are never retried automatically.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use passlock_crypto::secret::encrypt_secret;
use passlock_crypto::SecretPayload;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::api::VaultApi;
use crate::cache::SecretCache;
use crate::error::{VaultError, VaultResult};
use crate::models::{ItemMetadata, VaultItem, VaultItemPatch};
use crate::scheduler::{Scheduler, TimerHandle};
use crate::session::{Session, SessionLease};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(700);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Quiet period after the last edit before a commit fires.
    pub debounce: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
        }
    }
}

/// Editable state of one item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Draft {
    pub meta: ItemMetadata,
    pub secret: SecretPayload,
}

/// Secret fields need re-encryption; metadata is a plain patch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirtyFlags {
    pub secret: bool,
    pub meta: bool,
}

impl DirtyFlags {
    pub fn any(&self) -> bool {
        self.secret || self.meta
    }

    fn exact(draft: &Draft, baseline: &Draft) -> Self {
        Self {
            secret: draft.secret != baseline.secret,
            meta: draft.meta != baseline.meta,
        }
    }

    /// Ignores whitespace-only note edits and untrimmed metadata.
    fn meaningful(draft: &Draft, baseline: &Draft) -> Self {
        let notes_equal = draft
            .secret
            .notes
            .split_whitespace()
            .eq(baseline.secret.notes.split_whitespace());
        Self {
            secret: draft.secret.password != baseline.secret.password || !notes_equal,
            meta: draft.meta.normalized() != baseline.meta.normalized(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveState {
    Clean,
    Dirty,
    Saving,
    Saved,
    /// Last write failed; edits are kept and the message is user-facing.
    Unsaved(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// Nothing meaningful changed; no write was made.
    Skipped,
    /// A write for the record is in flight; this commit runs after it settles.
    Deferred,
    /// Replaced by a newer edit.
    Superseded,
    /// The record was closed or the session locked before the write settled.
    Discarded,
}

struct Record {
    token: u64,
    lease: SessionLease,
    draft: Draft,
    baseline: Draft,
    dirty: DirtyFlags,
    updated_at: DateTime<Utc>,
    pending: Option<TimerHandle>,
    pending_seq: u64,
    deferred: bool,
    save_state: SaveState,
}

#[derive(Default)]
struct State {
    records: HashMap<String, Record>,
    /// Ids with a write outstanding. Survives the record that started it.
    in_flight: HashSet<String>,
}

struct Shared<A> {
    api: Arc<A>,
    session: Session,
    cache: SecretCache,
    scheduler: Arc<dyn Scheduler>,
    config: ReconcilerConfig,
    state: Mutex<State>,
    settled: Notify,
    tokens: AtomicU64,
}

/// Marks an id as in flight for the duration of one write. Dropping it
/// without `release` (a cancelled flush) still clears the mark.
struct InFlight<'a, A> {
    shared: &'a Shared<A>,
    id: &'a str,
    released: bool,
}

impl<A> InFlight<'_, A> {
    fn release(&mut self, state: &mut State) {
        state.in_flight.remove(self.id);
        self.released = true;
    }
}

impl<A> Drop for InFlight<'_, A> {
    fn drop(&mut self) {
        if !self.released {
            self.shared.state.lock().in_flight.remove(self.id);
        }
        self.shared.settled.notify_waiters();
    }
}

pub struct Reconciler<A>(Arc<Shared<A>>);

impl<A> Clone for Reconciler<A> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<A: VaultApi> Reconciler<A> {
    pub fn new(
        api: Arc<A>,
        session: Session,
        cache: SecretCache,
        scheduler: Arc<dyn Scheduler>,
        config: ReconcilerConfig,
    ) -> Self {
        let shared = Arc::new(Shared {
            api,
            session: session.clone(),
            cache,
            scheduler,
            config,
            state: Mutex::new(State::default()),
            settled: Notify::new(),
            tokens: AtomicU64::new(0),
        });
        let weak = Arc::downgrade(&shared);
        session.on_lock(move |_| {
            if let Some(shared) = weak.upgrade() {
                let dropped = std::mem::take(&mut shared.state.lock().records);
                if !dropped.is_empty() {
                    debug!(count = dropped.len(), "dropped open drafts on lock");
                }
            }
        });
        Self(shared)
    }

    /// Start tracking `item` with its decrypted secret as the baseline.
    /// Replaces any record already open for the same id; a write that record
    /// still has in flight keeps deferring commits for the id until it settles.
    pub fn open(&self, item: &VaultItem, secret: SecretPayload, lease: SessionLease) {
        let baseline = Draft {
            meta: item.meta.clone(),
            secret,
        };
        let record = Record {
            token: self.0.tokens.fetch_add(1, Ordering::Relaxed),
            lease,
            draft: baseline.clone(),
            baseline,
            dirty: DirtyFlags::default(),
            updated_at: item.updated_at,
            pending: None,
            pending_seq: 0,
            deferred: false,
            save_state: SaveState::Clean,
        };
        self.0.state.lock().records.insert(item.id.clone(), record);
    }

    /// Stop tracking; a pending commit is cancelled and unsaved edits are dropped.
    pub fn close(&self, id: &str) -> bool {
        self.0.state.lock().records.remove(id).is_some()
    }

    pub fn is_open(&self, id: &str) -> bool {
        self.0.state.lock().records.contains_key(id)
    }

    pub fn open_count(&self) -> usize {
        self.0.state.lock().records.len()
    }

    /// Apply an edit to the draft and (re)schedule or cancel the commit.
    pub fn edit(&self, id: &str, f: impl FnOnce(&mut Draft)) -> VaultResult<DirtyFlags> {
        let mut state = self.0.state.lock();
        let record = state
            .records
            .get_mut(id)
            .ok_or_else(|| VaultError::UnknownItem(id.to_string()))?;
        f(&mut record.draft);
        record.dirty = DirtyFlags::exact(&record.draft, &record.baseline);
        let saving = record.save_state == SaveState::Saving;
        if record.dirty.any() {
            self.schedule(record, id, self.0.config.debounce);
            if !saving {
                record.save_state = SaveState::Dirty;
            }
        } else {
            record.pending = None;
            record.pending_seq += 1;
            if !saving {
                record.save_state = SaveState::Clean;
            }
        }
        Ok(record.dirty)
    }

    /// Commit now instead of waiting for the debounce.
    pub async fn flush(&self, id: &str) -> VaultResult<CommitOutcome> {
        let seq = self.take_pending(id)?;
        Ok(self.commit(id, seq).await?.0)
    }

    /// Apply `f` and write it immediately, waiting for any write already in
    /// flight for the id to settle first. Returns the stored item.
    pub async fn write_through(
        &self,
        id: &str,
        f: impl FnOnce(&mut Draft),
    ) -> VaultResult<VaultItem> {
        self.edit(id, f)?;
        loop {
            let settled = self.0.settled.notified();
            tokio::pin!(settled);
            settled.as_mut().enable();

            let seq = self.take_pending(id)?;
            match self.commit(id, seq).await? {
                (CommitOutcome::Committed, Some(item)) => return Ok(item),
                (CommitOutcome::Deferred, _) => settled.await,
                (CommitOutcome::Superseded, _) => {}
                (CommitOutcome::Skipped, _) => return self.0.api.get_item(id).await,
                _ if self.0.session.is_unlocked() => {
                    return Err(VaultError::UnknownItem(id.to_string()))
                }
                _ => return Err(VaultError::Locked),
            }
        }
    }

    pub fn snapshot(&self, id: &str) -> Option<Draft> {
        self.0.state.lock().records.get(id).map(|r| r.draft.clone())
    }

    pub fn baseline(&self, id: &str) -> Option<Draft> {
        self.0.state.lock().records.get(id).map(|r| r.baseline.clone())
    }

    pub fn dirty(&self, id: &str) -> Option<DirtyFlags> {
        self.0.state.lock().records.get(id).map(|r| r.dirty)
    }

    pub fn save_state(&self, id: &str) -> Option<SaveState> {
        self.0.state.lock().records.get(id).map(|r| r.save_state.clone())
    }

    pub fn has_pending(&self, id: &str) -> bool {
        self.0
            .state
            .lock()
            .records
            .get(id)
            .is_some_and(|r| r.pending.is_some())
    }

    /// Cancel the debounced commit and return the sequence a direct commit
    /// must carry.
    fn take_pending(&self, id: &str) -> VaultResult<u64> {
        let mut state = self.0.state.lock();
        let record = state
            .records
            .get_mut(id)
            .ok_or_else(|| VaultError::UnknownItem(id.to_string()))?;
        record.pending = None;
        record.pending_seq += 1;
        Ok(record.pending_seq)
    }

    pub fn updated_at(&self, id: &str) -> Option<DateTime<Utc>> {
        self.0.state.lock().records.get(id).map(|r| r.updated_at)
    }

    fn schedule(&self, record: &mut Record, id: &str, delay: Duration) {
        record.pending_seq += 1;
        let seq = record.pending_seq;
        let deadline = self.0.scheduler.now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        let weak = Arc::downgrade(&self.0);
        let id = id.to_string();
        record.pending = Some(self.0.scheduler.schedule_at(
            deadline,
            Box::pin(async move {
                if let Some(shared) = weak.upgrade() {
                    // Failures are recorded on the record and logged.
                    let _ = Reconciler(shared).commit(&id, seq).await;
                }
            }),
        ));
    }

    async fn commit(&self, id: &str, seq: u64) -> VaultResult<(CommitOutcome, Option<VaultItem>)> {
        let (token, lease, draft, changes) = {
            let mut state = self.0.state.lock();
            let busy = state.in_flight.contains(id);
            let Some(record) = state.records.get_mut(id) else {
                return Ok((CommitOutcome::Discarded, None));
            };
            if record.pending_seq != seq {
                return Ok((CommitOutcome::Superseded, None));
            }
            if let Some(own) = record.pending.take() {
                own.detach();
            }
            if busy {
                record.deferred = true;
                debug!(item_id = %id, "autosave deferred while a write is in flight");
                return Ok((CommitOutcome::Deferred, None));
            }
            let changes = DirtyFlags::meaningful(&record.draft, &record.baseline);
            if !changes.any() {
                record.dirty = DirtyFlags::default();
                record.save_state = SaveState::Clean;
                debug!(item_id = %id, "autosave skipped, no meaningful change");
                return Ok((CommitOutcome::Skipped, None));
            }
            record.save_state = SaveState::Saving;
            let snapshot = (record.token, record.lease, record.draft.clone(), changes);
            state.in_flight.insert(id.to_string());
            snapshot
        };
        let mut in_flight = InFlight {
            shared: &self.0,
            id,
            released: false,
        };

        let result = self.write(id, &lease, &draft, changes).await;
        let current = self.0.session.is_current(&lease);

        let mut state = self.0.state.lock();
        in_flight.release(&mut state);
        let Some(record) = state.records.get_mut(id) else {
            debug!(item_id = %id, "autosave result discarded, record closed");
            return Ok((CommitOutcome::Discarded, None));
        };
        if record.token != token {
            if std::mem::take(&mut record.deferred) && record.pending.is_none() {
                self.schedule(record, id, Duration::ZERO);
            }
            debug!(item_id = %id, "autosave result discarded, record reopened");
            return Ok((CommitOutcome::Discarded, None));
        }
        let deferred = std::mem::take(&mut record.deferred);
        if !current {
            return Ok((CommitOutcome::Discarded, None));
        }

        match result {
            Ok(item) => {
                if changes.secret {
                    record.baseline.secret = draft.secret.clone();
                }
                if changes.meta {
                    record.baseline.meta = draft.meta.clone();
                }
                record.updated_at = item.updated_at;
                let committed = record.baseline.secret.clone();
                record.dirty = DirtyFlags::meaningful(&record.draft, &record.baseline);
                if record.dirty.any() {
                    record.save_state = SaveState::Dirty;
                    if record.pending.is_none() {
                        let delay = if deferred {
                            Duration::ZERO
                        } else {
                            self.0.config.debounce
                        };
                        self.schedule(record, id, delay);
                    }
                } else {
                    record.save_state = SaveState::Saved;
                }
                info!(
                    item_id = %id,
                    secret = changes.secret,
                    meta = changes.meta,
                    "autosave committed"
                );
                drop(state);
                // Cache under the session lock so a concurrent lock clears it.
                let cached = self.0.session.while_current(&lease, || {
                    self.0.cache.insert(id, item.updated_at, committed)
                });
                if cached.is_err() {
                    debug!(item_id = %id, "session changed after commit, secret not cached");
                }
                Ok((CommitOutcome::Committed, Some(item)))
            }
            Err(err) => {
                record.dirty = DirtyFlags::exact(&record.draft, &record.baseline);
                record.save_state = SaveState::Unsaved(err.user_message());
                warn!(item_id = %id, error = %err, "autosave failed, edits kept");
                if deferred && record.pending.is_none() {
                    self.schedule(record, id, Duration::ZERO);
                }
                Err(err)
            }
        }
    }

    async fn write(
        &self,
        id: &str,
        lease: &SessionLease,
        draft: &Draft,
        changes: DirtyFlags,
    ) -> VaultResult<VaultItem> {
        let mut patch = VaultItemPatch::default();
        if changes.secret {
            let sealed = self
                .0
                .session
                .with_key_for(lease, |key| encrypt_secret(key, &draft.secret))??;
            patch = VaultItemPatch::secret(sealed);
        }
        if changes.meta {
            patch = patch.with_metadata(&draft.meta);
        }
        self.0.api.update_item(id, &patch).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(password: &str, notes: &str, name: &str) -> Draft {
        Draft {
            meta: ItemMetadata::named(name),
            secret: SecretPayload::new(password, notes),
        }
    }

    #[test]
    fn dirty_flags_are_independent() {
        let base = draft("pw", "n", "GitHub");
        let flags = DirtyFlags::exact(&draft("pw2", "n", "GitHub"), &base);
        assert_eq!(flags, DirtyFlags { secret: true, meta: false });
        let flags = DirtyFlags::exact(&draft("pw", "n", "GitLab"), &base);
        assert_eq!(flags, DirtyFlags { secret: false, meta: true });
    }

    #[test]
    fn whitespace_only_changes_are_not_meaningful() {
        let base = draft("pw", "line one\nline two", "GitHub");
        let edited = draft("pw", "  line one   line two ", " GitHub ");
        assert!(DirtyFlags::exact(&edited, &base).any());
        assert!(!DirtyFlags::meaningful(&edited, &base).any());
    }

    #[test]
    fn password_whitespace_is_significant() {
        let base = draft("pw", "", "x");
        assert!(DirtyFlags::meaningful(&draft("pw ", "", "x"), &base).secret);
    }
}
