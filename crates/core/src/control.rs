//! Thread control blocks
//!
//! One [`ThreadControl`] per cooperating worker [`Role`]. It holds the
//! worker's liveness state behind a [`Lock`] so the VM can pause, resume and
//! stop the worker, and probe it with a bounded wait.
//!
//! ## State machine
//!
//! ```text
//!            start                pause
//!   Dead ───────────▶ Alive ─────────────▶ Paused
//!    ▲                 │  ▲                  │
//!    │      stop       │  └──── resume ──────┘
//!    └─────────────────┘
//! ```
//!
//! `start` always lands on Alive, whatever the previous state. `stop` from
//! Paused is allowed too. Only Dead, Alive and Paused are ever stored:
//! `CommandPending` and `ResponseReady` are derived from the execution table
//! by the caller, and `Blocked` is a probe result meaning "lock not acquired
//! in time".

use crate::error::CoreResult;
use crate::lock::{LOCK_CEILING, Lock, LockGuard};
use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

/// The cooperating workers the VM coordinates with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i64)]
pub enum Role {
    StatusBar = 0,
    Communication = 1,
}

impl Role {
    pub const ALL: [Role; 2] = [Role::StatusBar, Role::Communication];

    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn from_code(code: i64) -> Option<Role> {
        match code {
            0 => Some(Role::StatusBar),
            1 => Some(Role::Communication),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Role::StatusBar => "status_bar",
            Role::Communication => "communication",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for ThreadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Status codes reported to the VM (wire values 0-5)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ThreadStatus {
    Dead = 0,
    Alive = 1,
    CommandPending = 2,
    ResponseReady = 3,
    Paused = 4,
    Blocked = 5,
}

/// Coarse reading of a status, as scripts branch on it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Dead,
    Alive,
    Paused,
}

impl ThreadStatus {
    pub fn code(self) -> i64 {
        self as u8 as i64
    }

    pub fn from_code(code: i64) -> Option<ThreadStatus> {
        match code {
            0 => Some(ThreadStatus::Dead),
            1 => Some(ThreadStatus::Alive),
            2 => Some(ThreadStatus::CommandPending),
            3 => Some(ThreadStatus::ResponseReady),
            4 => Some(ThreadStatus::Paused),
            5 => Some(ThreadStatus::Blocked),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ThreadStatus::Dead => "dead",
            ThreadStatus::Alive => "alive",
            ThreadStatus::CommandPending => "command_pending",
            ThreadStatus::ResponseReady => "response_ready",
            ThreadStatus::Paused => "paused",
            ThreadStatus::Blocked => "blocked",
        }
    }

    /// A worker with a command in flight is still alive; an unanswered
    /// probe counts as dead.
    pub fn liveness(self) -> Liveness {
        match self {
            ThreadStatus::Alive | ThreadStatus::CommandPending | ThreadStatus::ResponseReady => {
                Liveness::Alive
            }
            ThreadStatus::Paused => Liveness::Paused,
            ThreadStatus::Dead | ThreadStatus::Blocked => Liveness::Dead,
        }
    }

    fn from_stored(raw: u8) -> ThreadStatus {
        match raw {
            1 => ThreadStatus::Alive,
            4 => ThreadStatus::Paused,
            _ => ThreadStatus::Dead,
        }
    }
}

#[derive(Debug)]
pub struct ThreadControl {
    role: Role,
    state: Lock<ThreadStatus>,
    /// Mirror of the stored status for lock-free reads
    status: AtomicU8,
    /// Number of times this role has been (re)started
    generation: AtomicU64,
}

impl ThreadControl {
    pub fn new(role: Role) -> Self {
        Self::with_ceiling(role, LOCK_CEILING)
    }

    pub fn with_ceiling(role: Role, ceiling: Duration) -> Self {
        Self {
            role,
            state: Lock::with_ceiling(ThreadStatus::Dead, ceiling),
            status: AtomicU8::new(ThreadStatus::Dead as u8),
            generation: AtomicU64::new(0),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Last stored status, read without the lock
    pub fn status(&self) -> ThreadStatus {
        ThreadStatus::from_stored(self.status.load(Ordering::Acquire))
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Relaxed)
    }

    /// Hold the control block, bounded by the lock ceiling
    pub fn acquire(&self) -> CoreResult<ControlGuard<'_>> {
        Ok(ControlGuard {
            control: self,
            state: self.state.acquire()?,
        })
    }

    /// Hold the control block, giving up after `timeout` (zero = ceiling)
    pub fn acquire_timeout(&self, timeout: Duration) -> CoreResult<ControlGuard<'_>> {
        Ok(ControlGuard {
            control: self,
            state: self.state.acquire_timeout(timeout)?,
        })
    }

    /// Report the stored status, or `Blocked` if the lock stays held for
    /// longer than `timeout`
    pub fn check(&self, timeout: Duration) -> ThreadStatus {
        match self.acquire_timeout(timeout) {
            Ok(guard) => guard.status(),
            Err(_) => ThreadStatus::Blocked,
        }
    }

    pub fn start(&self) -> CoreResult<()> {
        self.acquire()?.start();
        Ok(())
    }

    pub fn stop(&self) -> CoreResult<bool> {
        Ok(self.acquire()?.stop())
    }

    pub fn pause(&self) -> CoreResult<bool> {
        Ok(self.acquire()?.pause())
    }

    pub fn resume(&self) -> CoreResult<bool> {
        Ok(self.acquire()?.resume())
    }
}

/// Exclusive access to a [`ThreadControl`]; transitions go through here
pub struct ControlGuard<'a> {
    control: &'a ThreadControl,
    state: LockGuard<'a, ThreadStatus>,
}

impl ControlGuard<'_> {
    pub fn role(&self) -> Role {
        self.control.role
    }

    pub fn status(&self) -> ThreadStatus {
        *self.state
    }

    fn set(&mut self, status: ThreadStatus) {
        *self.state = status;
        self.control.status.store(status as u8, Ordering::Release);
    }

    /// Any state → Alive
    pub fn start(&mut self) {
        self.control.generation.fetch_add(1, Ordering::Relaxed);
        self.set(ThreadStatus::Alive);
        tracing::debug!(role = %self.control.role, "thread started");
    }

    /// Alive or Paused → Dead; false if already Dead
    pub fn stop(&mut self) -> bool {
        if self.status() == ThreadStatus::Dead {
            return false;
        }
        self.set(ThreadStatus::Dead);
        tracing::debug!(role = %self.control.role, "thread stopped");
        true
    }

    /// Alive → Paused; false otherwise
    pub fn pause(&mut self) -> bool {
        if self.status() != ThreadStatus::Alive {
            return false;
        }
        self.set(ThreadStatus::Paused);
        true
    }

    /// Paused → Alive; false otherwise
    pub fn resume(&mut self) -> bool {
        if self.status() != ThreadStatus::Paused {
            return false;
        }
        self.set(ThreadStatus::Alive);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_role_codes() {
        assert_eq!(Role::from_code(0), Some(Role::StatusBar));
        assert_eq!(Role::from_code(1), Some(Role::Communication));
        assert_eq!(Role::from_code(2), None);
        assert_eq!(Role::Communication.code(), 1);
    }

    #[test]
    fn test_status_codes_round_trip() {
        for code in 0..=5 {
            assert_eq!(ThreadStatus::from_code(code).unwrap().code(), code);
        }
        assert_eq!(ThreadStatus::from_code(6), None);
    }

    #[test]
    fn test_liveness_mapping() {
        assert_eq!(ThreadStatus::CommandPending.liveness(), Liveness::Alive);
        assert_eq!(ThreadStatus::ResponseReady.liveness(), Liveness::Alive);
        assert_eq!(ThreadStatus::Paused.liveness(), Liveness::Paused);
        assert_eq!(ThreadStatus::Blocked.liveness(), Liveness::Dead);
    }

    #[test]
    fn test_pause_continue_state_machine() {
        let control = ThreadControl::new(Role::Communication);
        assert_eq!(control.status(), ThreadStatus::Dead);

        control.start().unwrap();
        assert_eq!(control.check(Duration::ZERO), ThreadStatus::Alive);

        assert!(control.pause().unwrap());
        assert_eq!(control.status(), ThreadStatus::Paused);
        assert!(!control.pause().unwrap());
        assert_eq!(control.status(), ThreadStatus::Paused);

        assert!(control.resume().unwrap());
        assert_eq!(control.status(), ThreadStatus::Alive);
        assert!(!control.resume().unwrap());

        assert!(control.stop().unwrap());
        assert_eq!(control.status(), ThreadStatus::Dead);
        assert!(!control.stop().unwrap());
    }

    #[test]
    fn test_transitions_on_dead_role_are_noops() {
        let control = ThreadControl::new(Role::StatusBar);
        assert!(!control.pause().unwrap());
        assert!(!control.resume().unwrap());
        assert_eq!(control.status(), ThreadStatus::Dead);
    }

    #[test]
    fn test_restart_bumps_generation() {
        let control = ThreadControl::new(Role::StatusBar);
        control.start().unwrap();
        control.pause().unwrap();
        control.start().unwrap();
        assert_eq!(control.status(), ThreadStatus::Alive);
        assert_eq!(control.generation(), 2);
    }

    #[test]
    fn test_check_reports_blocked_while_held() {
        let control = Arc::new(ThreadControl::new(Role::Communication));
        control.start().unwrap();

        let guard = control.acquire().unwrap();
        let prober = {
            let control = Arc::clone(&control);
            thread::spawn(move || control.check(Duration::from_millis(20)))
        };
        assert_eq!(prober.join().unwrap(), ThreadStatus::Blocked);
        drop(guard);

        // Blocked is never stored
        assert_eq!(control.check(Duration::from_millis(20)), ThreadStatus::Alive);
    }
}
