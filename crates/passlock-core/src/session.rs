//! Session custody of the vault key.
//!
//! The session is the single owner of the unwrapped vault key. Consumers
//! borrow it synchronously through `with_key` / `with_key_for` and never keep
//! a copy. Expiry is decided from two wall-clock deadlines, an idle deadline
//! moved by user activity and an absolute deadline fixed at unlock. Every
//! query recomputes expiry from those deadlines, so a missed or late timer
//! can delay the lock notification but never extend access to the key.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use passlock_crypto::VaultKey;
use tokio::sync::watch;
use tracing::{debug, info, trace};

use crate::error::{VaultError, VaultResult};
use crate::scheduler::{Scheduler, TimerHandle};

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_ABSOLUTE_TIMEOUT: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub idle_timeout: Duration,
    pub absolute_timeout: Duration,
    /// Countdown refresh period for `subscribe()` receivers.
    pub tick: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            absolute_timeout: DEFAULT_ABSOLUTE_TIMEOUT,
            tick: DEFAULT_TICK,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Locked,
    Unlocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockReason {
    Explicit,
    IdleTimeout,
    AbsoluteTimeout,
}

/// User activity that counts toward the idle timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivitySignal {
    PointerMove,
    KeyPress,
    Click,
    Scroll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: SessionState,
    pub remaining: Duration,
    pub lock_reason: Option<LockReason>,
}

impl SessionStatus {
    fn locked(reason: Option<LockReason>) -> Self {
        Self {
            state: SessionState::Locked,
            remaining: Duration::ZERO,
            lock_reason: reason,
        }
    }
}

/// Proof that work was started under one particular unlock. Results produced
/// under a lease are discarded once the session locks or unlocks again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLease {
    generation: u64,
}

impl SessionLease {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    Idle,
    Absolute,
}

struct Unlocked {
    key: VaultKey,
    generation: u64,
    idle_deadline: DateTime<Utc>,
    absolute_deadline: DateTime<Utc>,
    idle_timer: Option<TimerHandle>,
    absolute_timer: Option<TimerHandle>,
    ticker: Option<TimerHandle>,
}

impl Unlocked {
    fn due(&self, now: DateTime<Utc>) -> Option<LockReason> {
        if now >= self.absolute_deadline {
            Some(LockReason::AbsoluteTimeout)
        } else if now >= self.idle_deadline {
            Some(LockReason::IdleTimeout)
        } else {
            None
        }
    }

    fn remaining(&self, now: DateTime<Utc>) -> Duration {
        let deadline = self.idle_deadline.min(self.absolute_deadline);
        (deadline - now).to_std().unwrap_or(Duration::ZERO)
    }

    fn timer_slot(&mut self, kind: TimerKind) -> &mut Option<TimerHandle> {
        match kind {
            TimerKind::Idle => &mut self.idle_timer,
            TimerKind::Absolute => &mut self.absolute_timer,
        }
    }
}

#[derive(Default)]
struct Inner {
    slot: Option<Unlocked>,
    generation: u64,
    last_lock_reason: Option<LockReason>,
}

type LockHook = Arc<dyn Fn(LockReason) + Send + Sync + 'static>;

struct Shared {
    config: SessionConfig,
    scheduler: Arc<dyn Scheduler>,
    inner: Mutex<Inner>,
    hooks: Mutex<Vec<LockHook>>,
    status: watch::Sender<SessionStatus>,
}

/// Cheap cloneable handle. Starts locked.
#[derive(Clone)]
pub struct Session(Arc<Shared>);

impl Session {
    pub fn new(config: SessionConfig, scheduler: Arc<dyn Scheduler>) -> Self {
        let (status, _) = watch::channel(SessionStatus::locked(None));
        Self(Arc::new(Shared {
            config,
            scheduler,
            inner: Mutex::new(Inner::default()),
            hooks: Mutex::new(Vec::new()),
            status,
        }))
    }

    pub fn config(&self) -> SessionConfig {
        self.0.config
    }

    /// Install a freshly unwrapped vault key. An already unlocked session is
    /// locked first, so at most one key is live.
    pub fn unlock(&self, key: VaultKey) -> SessionLease {
        self.lock_with(LockReason::Explicit);

        let now = self.0.scheduler.now();
        let lease = {
            let mut inner = self.0.inner.lock();
            inner.generation += 1;
            let generation = inner.generation;
            let idle_deadline = now + to_chrono(self.0.config.idle_timeout);
            let absolute_deadline = now + to_chrono(self.0.config.absolute_timeout);
            inner.slot = Some(Unlocked {
                key,
                generation,
                idle_deadline,
                absolute_deadline,
                idle_timer: Some(self.schedule_expiry(generation, TimerKind::Idle, idle_deadline)),
                absolute_timer: Some(self.schedule_expiry(
                    generation,
                    TimerKind::Absolute,
                    absolute_deadline,
                )),
                ticker: Some(self.schedule_ticker()),
            });
            inner.last_lock_reason = None;
            SessionLease { generation }
        };

        info!(generation = lease.generation, "vault session unlocked");
        self.publish();
        lease
    }

    pub fn lock(&self) {
        self.lock_with(LockReason::Explicit);
    }

    /// Returns `true` if this call performed the transition. Locking a
    /// locked session is a no-op.
    pub fn lock_with(&self, reason: LockReason) -> bool {
        let slot = {
            let mut inner = self.0.inner.lock();
            Self::take_slot(&mut inner, reason)
        };
        match slot {
            Some(slot) => {
                drop(slot);
                self.after_lock(reason);
                true
            }
            None => false,
        }
    }

    /// Move the idle deadline forward. Activity after expiry does nothing.
    pub fn record_activity(&self, signal: ActivitySignal) {
        trace!(?signal, "session activity");
        self.reset_idle_timer();
    }

    pub fn reset_idle_timer(&self) {
        if self.check_expiry() == SessionState::Locked {
            return;
        }
        let now = self.0.scheduler.now();
        let idle = to_chrono(self.0.config.idle_timeout);
        if let Some(slot) = self.0.inner.lock().slot.as_mut() {
            slot.idle_deadline = now + idle;
        }
    }

    /// Lock if a deadline has passed, whether or not its timer has fired.
    pub fn check_expiry(&self) -> SessionState {
        let now = self.0.scheduler.now();
        let expired = {
            let mut inner = self.0.inner.lock();
            let due = inner.slot.as_ref().and_then(|slot| slot.due(now));
            due.and_then(|reason| Self::take_slot(&mut inner, reason).map(|slot| (reason, slot)))
        };
        match expired {
            Some((reason, slot)) => {
                drop(slot);
                self.after_lock(reason);
                SessionState::Locked
            }
            None if self.0.inner.lock().slot.is_some() => SessionState::Unlocked,
            None => SessionState::Locked,
        }
    }

    pub fn state(&self) -> SessionState {
        self.check_expiry()
    }

    pub fn is_unlocked(&self) -> bool {
        self.check_expiry() == SessionState::Unlocked
    }

    /// Time until the earlier of the two deadlines; zero when locked.
    pub fn remaining(&self) -> Duration {
        if self.check_expiry() == SessionState::Locked {
            return Duration::ZERO;
        }
        let now = self.0.scheduler.now();
        self.0
            .inner
            .lock()
            .slot
            .as_ref()
            .map_or(Duration::ZERO, |slot| slot.remaining(now))
    }

    pub fn last_lock_reason(&self) -> Option<LockReason> {
        self.0.inner.lock().last_lock_reason
    }

    pub fn lease(&self) -> VaultResult<SessionLease> {
        if self.check_expiry() == SessionState::Locked {
            return Err(VaultError::Locked);
        }
        self.0
            .inner
            .lock()
            .slot
            .as_ref()
            .map(|slot| SessionLease {
                generation: slot.generation,
            })
            .ok_or(VaultError::Locked)
    }

    /// Whether results produced under `lease` may still be installed.
    pub fn is_current(&self, lease: &SessionLease) -> bool {
        self.check_expiry() == SessionState::Unlocked
            && self
                .0
                .inner
                .lock()
                .slot
                .as_ref()
                .is_some_and(|slot| slot.generation == lease.generation)
    }

    /// Borrow the live key for the duration of `f`. `f` must not call back
    /// into the session.
    pub fn with_key<R>(&self, f: impl FnOnce(&VaultKey) -> R) -> VaultResult<R> {
        self.check_expiry();
        let inner = self.0.inner.lock();
        let slot = inner.slot.as_ref().ok_or(VaultError::Locked)?;
        Ok(f(&slot.key))
    }

    /// Like `with_key`, but only under the unlock that issued `lease`.
    pub fn with_key_for<R>(
        &self,
        lease: &SessionLease,
        f: impl FnOnce(&VaultKey) -> R,
    ) -> VaultResult<R> {
        self.check_expiry();
        let inner = self.0.inner.lock();
        match inner.slot.as_ref() {
            Some(slot) if slot.generation == lease.generation => Ok(f(&slot.key)),
            _ => Err(VaultError::Locked),
        }
    }

    /// Run `f` only while `lease` is current. A concurrent lock waits until
    /// `f` returns, so its `on_lock` hooks always run after `f`. `f` must not
    /// call back into the session.
    pub fn while_current<R>(&self, lease: &SessionLease, f: impl FnOnce() -> R) -> VaultResult<R> {
        self.with_key_for(lease, |_| f())
    }

    /// Called after every transition to locked, outside the session lock.
    pub fn on_lock(&self, hook: impl Fn(LockReason) + Send + Sync + 'static) {
        self.0.hooks.lock().push(Arc::new(hook));
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.0.status.subscribe()
    }

    pub fn status(&self) -> SessionStatus {
        let state = self.check_expiry();
        SessionStatus {
            state,
            remaining: self.remaining(),
            lock_reason: self.last_lock_reason(),
        }
    }

    fn take_slot(inner: &mut Inner, reason: LockReason) -> Option<Unlocked> {
        let slot = inner.slot.take()?;
        inner.last_lock_reason = Some(reason);
        Some(slot)
    }

    fn after_lock(&self, reason: LockReason) {
        info!(?reason, "vault session locked");
        self.publish();
        let hooks: Vec<LockHook> = self.0.hooks.lock().clone();
        for hook in hooks {
            hook(reason);
        }
    }

    fn publish(&self) {
        self.0.status.send_replace(self.status());
    }

    fn schedule_expiry(&self, generation: u64, kind: TimerKind, deadline: DateTime<Utc>) -> TimerHandle {
        let weak = Arc::downgrade(&self.0);
        self.0.scheduler.schedule_at(
            deadline,
            Box::pin(async move {
                if let Some(shared) = weak.upgrade() {
                    Session(shared).on_timer(generation, kind);
                }
            }),
        )
    }

    fn schedule_ticker(&self) -> TimerHandle {
        let weak: Weak<Shared> = Arc::downgrade(&self.0);
        self.0.scheduler.schedule_every(
            self.0.config.tick,
            Box::new(move || match weak.upgrade() {
                Some(shared) => {
                    let session = Session(shared);
                    session.publish();
                    let live = session.0.inner.lock().slot.is_some();
                    live
                }
                None => false,
            }),
        )
    }

    fn on_timer(&self, generation: u64, kind: TimerKind) {
        let now = self.0.scheduler.now();
        let expired = {
            let mut inner = self.0.inner.lock();
            let due = match inner.slot.as_mut() {
                Some(slot) if slot.generation == generation => {
                    // The running timer owns this handle; release it without aborting.
                    if let Some(own) = slot.timer_slot(kind).take() {
                        own.detach();
                    }
                    match slot.due(now) {
                        Some(reason) => Some(reason),
                        None => {
                            let deadline = match kind {
                                TimerKind::Idle => slot.idle_deadline,
                                TimerKind::Absolute => slot.absolute_deadline,
                            };
                            debug!(?kind, "deadline moved, rescheduling expiry timer");
                            *slot.timer_slot(kind) =
                                Some(self.schedule_expiry(generation, kind, deadline));
                            None
                        }
                    }
                }
                _ => None,
            };
            due.and_then(|reason| Self::take_slot(&mut inner, reason).map(|slot| (reason, slot)))
        };
        if let Some((reason, slot)) = expired {
            drop(slot);
            self.after_lock(reason);
        }
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

/// `m:ss` countdown text.
pub fn format_remaining(remaining: Duration) -> String {
    let secs = remaining.as_secs();
    format!("{}:{:02}", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{SystemClock, TokioClock};
    use crate::scheduler::TokioScheduler;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn session(idle_ms: u64, absolute_ms: u64) -> Session {
        let scheduler = TokioScheduler::new(Arc::new(TokioClock::new()));
        Session::new(
            SessionConfig {
                idle_timeout: Duration::from_millis(idle_ms),
                absolute_timeout: Duration::from_millis(absolute_ms),
                tick: Duration::from_millis(100),
            },
            Arc::new(scheduler),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn starts_locked_and_key_is_unreachable() {
        let session = session(1000, 5000);
        assert_eq!(session.state(), SessionState::Locked);
        assert!(matches!(session.with_key(|_| ()), Err(VaultError::Locked)));
        assert!(matches!(session.lease(), Err(VaultError::Locked)));
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_lock_is_idempotent() {
        let session = session(1000, 5000);
        let locks = Arc::new(AtomicUsize::new(0));
        let counter = locks.clone();
        session.on_lock(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        session.unlock(VaultKey::generate());
        assert!(session.lock_with(LockReason::Explicit));
        assert!(!session.lock_with(LockReason::Explicit));
        session.lock();
        assert_eq!(locks.load(Ordering::SeqCst), 1);
        assert_eq!(session.last_lock_reason(), Some(LockReason::Explicit));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timeout_locks_at_deadline() {
        let session = session(1000, 60_000);
        session.unlock(VaultKey::generate());
        tokio::time::sleep(Duration::from_millis(999)).await;
        assert!(session.is_unlocked());
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(session.state(), SessionState::Locked);
        assert_eq!(session.last_lock_reason(), Some(LockReason::IdleTimeout));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_lease_is_rejected_after_relock() {
        let session = session(1000, 5000);
        let first = session.unlock(VaultKey::generate());
        session.lock();
        let second = session.unlock(VaultKey::generate());
        assert_ne!(first, second);
        assert!(matches!(session.with_key_for(&first, |_| ()), Err(VaultError::Locked)));
        assert!(session.with_key_for(&second, |_| ()).is_ok());
        assert!(!session.is_current(&first));
        assert!(session.is_current(&second));
    }

    #[tokio::test(start_paused = true)]
    async fn activity_after_expiry_does_not_revive() {
        let session = session(1000, 5000);
        session.unlock(VaultKey::generate());
        tokio::time::sleep(Duration::from_millis(1200)).await;
        session.record_activity(ActivitySignal::KeyPress);
        assert!(!session.is_unlocked());
    }

    #[tokio::test(start_paused = true)]
    async fn remaining_is_min_of_deadlines() {
        let session = session(1000, 1500);
        session.unlock(VaultKey::generate());
        tokio::time::sleep(Duration::from_millis(800)).await;
        session.record_activity(ActivitySignal::Click);
        // idle now ends at 1800, absolute at 1500
        assert_eq!(session.remaining(), Duration::from_millis(700));
    }

    #[tokio::test(start_paused = true)]
    async fn subscribers_see_lock() {
        let session = session(1000, 5000);
        let mut rx = session.subscribe();
        session.unlock(VaultKey::generate());
        assert_eq!(rx.borrow_and_update().state, SessionState::Unlocked);
        session.lock();
        rx.changed().await.unwrap();
        let status = *rx.borrow();
        assert_eq!(status.state, SessionState::Locked);
        assert_eq!(status.lock_reason, Some(LockReason::Explicit));
    }

    #[tokio::test]
    async fn lock_waits_for_work_under_current_lease() {
        let scheduler = TokioScheduler::new(Arc::new(SystemClock));
        let session = Session::new(SessionConfig::default(), Arc::new(scheduler));
        let hooked = Arc::new(AtomicBool::new(false));
        let flag = hooked.clone();
        session.on_lock(move |_| flag.store(true, Ordering::SeqCst));
        let lease = session.unlock(VaultKey::generate());

        let other = session.clone();
        let mut locker = None;
        let hook_ran_during_work = session
            .while_current(&lease, || {
                locker = Some(std::thread::spawn(move || other.lock()));
                std::thread::sleep(Duration::from_millis(50));
                hooked.load(Ordering::SeqCst)
            })
            .unwrap();
        locker.unwrap().join().unwrap();

        assert!(!hook_ran_during_work);
        assert!(hooked.load(Ordering::SeqCst));
        assert!(matches!(session.while_current(&lease, || ()), Err(VaultError::Locked)));
    }

    #[test]
    fn countdown_format() {
        assert_eq!(format_remaining(Duration::from_secs(600)), "10:00");
        assert_eq!(format_remaining(Duration::from_secs(65)), "1:05");
        assert_eq!(format_remaining(Duration::ZERO), "0:00");
    }
}
