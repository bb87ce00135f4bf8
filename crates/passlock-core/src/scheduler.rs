//! Deadline timers.
//!
//! Timers are keyed to absolute wall-clock deadlines. A timer task sleeps in
//! bounded slices and recomputes `deadline - now` after every wake, so a
//! suspended process fires promptly on resume instead of running out a stale
//! relative sleep.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::AbortHandle;

use crate::clock::{Clock, TokioClock};

pub type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Aborts its timer when dropped unless detached.
#[derive(Debug)]
pub struct TimerHandle {
    abort: Option<AbortHandle>,
}

impl TimerHandle {
    pub fn cancel(&mut self) {
        if let Some(abort) = self.abort.take() {
            abort.abort();
        }
    }

    /// Release the handle without aborting the timer. Used by a timer task
    /// that is about to drop its own handle while still running.
    pub fn detach(mut self) {
        self.abort = None;
    }

    pub fn is_finished(&self) -> bool {
        self.abort.as_ref().map_or(true, AbortHandle::is_finished)
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

pub trait Scheduler: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;

    /// Run `task` once the clock reaches `deadline`.
    fn schedule_at(&self, deadline: DateTime<Utc>, task: Task) -> TimerHandle;

    /// Call `tick` every `period` until it returns `false`.
    fn schedule_every(
        &self,
        period: Duration,
        tick: Box<dyn FnMut() -> bool + Send + 'static>,
    ) -> TimerHandle;

    fn cancel(&self, handle: &mut TimerHandle) {
        handle.cancel();
    }
}

pub const DEFAULT_MAX_SLICE: Duration = Duration::from_secs(1);

pub struct TokioScheduler {
    clock: Arc<dyn Clock>,
    max_slice: Duration,
}

impl TokioScheduler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            max_slice: DEFAULT_MAX_SLICE,
        }
    }

    pub fn with_max_slice(mut self, max_slice: Duration) -> Self {
        self.max_slice = max_slice.max(Duration::from_millis(1));
        self
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }
}

impl Default for TokioScheduler {
    fn default() -> Self {
        Self::new(Arc::new(TokioClock::new()))
    }
}

impl Scheduler for TokioScheduler {
    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn schedule_at(&self, deadline: DateTime<Utc>, task: Task) -> TimerHandle {
        let clock = self.clock.clone();
        let max_slice = self.max_slice;
        let handle = tokio::spawn(async move {
            loop {
                let remaining = match (deadline - clock.now()).to_std() {
                    Ok(remaining) if !remaining.is_zero() => remaining,
                    _ => break,
                };
                tokio::time::sleep(remaining.min(max_slice)).await;
            }
            task.await;
        });
        TimerHandle {
            abort: Some(handle.abort_handle()),
        }
    }

    fn schedule_every(
        &self,
        period: Duration,
        mut tick: Box<dyn FnMut() -> bool + Send + 'static>,
    ) -> TimerHandle {
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            interval.tick().await;
            loop {
                interval.tick().await;
                if !tick() {
                    break;
                }
            }
        });
        TimerHandle {
            abort: Some(handle.abort_handle()),
        }
    }
}
