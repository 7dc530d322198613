//! Binary semaphore with timed acquisition
//!
//! `Lock<T>` guards a value the way a mutex does, but acquisition can be
//! bounded: `acquire_timeout` gives up with [`CoreError::TimedOut`] and an
//! untimed `acquire` gives up with [`CoreError::CeilingExceeded`] once the
//! safety ceiling (5 minutes by default) has passed.
//!
//! ## Layout
//!
//! ```text
//! held: Mutex<bool>  ── the semaphore flag (Free = false, Blocked = true)
//! freed: Condvar     ── notified whenever the flag goes back to Free
//! value: Mutex<T>    ── only ever locked by the current flag holder
//! ```
//!
//! Waiters park on the condition variable and are woken on release; nobody
//! polls. The inner `value` mutex is uncontended because only the thread that
//! flipped `held` to true touches it.
//!
//! Poisoning is ignored: the flag is always restored by the guard's `Drop`,
//! including during unwinding, and the guarded collections never sit in a
//! half-updated state across a panic point.

use crate::error::{CoreError, CoreResult};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Default ceiling for untimed acquisitions
pub const LOCK_CEILING: Duration = Duration::from_secs(5 * 60);

pub struct Lock<T> {
    held: Mutex<bool>,
    freed: Condvar,
    value: Mutex<T>,
    ceiling: Duration,
}

impl<T> Lock<T> {
    /// Create a free lock around `value` with the default ceiling
    pub fn new(value: T) -> Self {
        Self::with_ceiling(value, LOCK_CEILING)
    }

    /// Create a free lock with a custom ceiling for untimed acquisitions
    pub fn with_ceiling(value: T, ceiling: Duration) -> Self {
        Self {
            held: Mutex::new(false),
            freed: Condvar::new(),
            value: Mutex::new(value),
            ceiling,
        }
    }

    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }

    /// Block until the lock is free, bounded by the safety ceiling
    pub fn acquire(&self) -> CoreResult<LockGuard<'_, T>> {
        match self.wait_free(self.ceiling) {
            Ok(()) => Ok(self.guard()),
            Err(()) => {
                tracing::warn!(ceiling = ?self.ceiling, "lock wait exceeded safety ceiling");
                Err(CoreError::CeilingExceeded(self.ceiling))
            }
        }
    }

    /// Block until the lock is free or `timeout` elapses
    ///
    /// A zero timeout means "wait indefinitely", which is still bounded by
    /// the ceiling.
    pub fn acquire_timeout(&self, timeout: Duration) -> CoreResult<LockGuard<'_, T>> {
        if timeout.is_zero() {
            return self.acquire();
        }
        match self.wait_free(timeout) {
            Ok(()) => Ok(self.guard()),
            Err(()) => Err(CoreError::TimedOut(timeout)),
        }
    }

    /// Take the lock only if it is free right now
    pub fn try_acquire(&self) -> Option<LockGuard<'_, T>> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if *held {
            return None;
        }
        *held = true;
        drop(held);
        Some(self.guard())
    }

    /// Whether some thread currently holds the lock
    pub fn is_held(&self) -> bool {
        *self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn into_inner(self) -> T {
        self.value
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait for the flag to go Free and claim it, giving up after `limit`
    fn wait_free(&self, limit: Duration) -> Result<(), ()> {
        let deadline = Instant::now().checked_add(limit);
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        while *held {
            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => limit,
            };
            if remaining.is_zero() {
                return Err(());
            }
            let (guard, _) = self
                .freed
                .wait_timeout(held, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            held = guard;
        }
        *held = true;
        Ok(())
    }

    /// Build a guard once the flag is ours
    fn guard(&self) -> LockGuard<'_, T> {
        let value = self.value.lock().unwrap_or_else(PoisonError::into_inner);
        LockGuard {
            lock: self,
            value: Some(value),
        }
    }

    fn release(&self) {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        *held = false;
        drop(held);
        self.freed.notify_one();
    }
}

impl<T: Default> Default for Lock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> fmt::Debug for Lock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lock")
            .field("held", &self.is_held())
            .field("ceiling", &self.ceiling)
            .finish_non_exhaustive()
    }
}

/// Proof of holding a [`Lock`]; releases it when dropped
pub struct LockGuard<'a, T> {
    lock: &'a Lock<T>,
    value: Option<MutexGuard<'a, T>>,
}

impl<T> LockGuard<'_, T> {
    /// Release explicitly (same as dropping the guard)
    pub fn release(self) {
        drop(self);
    }
}

impl<T> Deref for LockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Only `Drop` takes the inner guard
        match &self.value {
            Some(value) => value,
            None => unreachable!("lock guard used after release"),
        }
    }
}

impl<T> DerefMut for LockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.value {
            Some(value) => value,
            None => unreachable!("lock guard used after release"),
        }
    }
}

impl<T> Drop for LockGuard<'_, T> {
    fn drop(&mut self) {
        // Unlock the value before flipping the flag so the next holder
        // never finds the inner mutex still locked.
        self.value.take();
        self.lock.release();
    }
}
