//! Scheduler facade
//!
//! [`Scheduler`] owns every shared structure the VM thread and its background
//! workers rendezvous through: one [`ThreadControl`] plus a send/recv channel
//! pair per [`Role`], the command/response [`ExecutionTable`] and the pub/sub
//! registry. It is built once at start-up and shared behind an `Arc`.
//!
//! Nothing here waits on the other side. `command` returns
//! [`CommandReply::NotReady`] until a worker has answered through `execute`,
//! and the VM is expected to poll.
//!
//! ## Locking
//!
//! Locks are always taken in this order:
//!
//! ```text
//! role control lock  →  facade gate  →  component locks
//! ```
//!
//! The gate serializes facade operations end to end, so each one is atomic
//! with respect to the others. It is never held while waiting for a role
//! lock. `execute` keeps the Communication control lock for the whole
//! dispatch (a short `check` meanwhile reports `Blocked`) but drops the gate
//! while the handler runs, so the handler may post and poll freely. The
//! handler must not pause, resume, start or stop the Communication role,
//! nor `check` it with a zero timeout: that waits on the lock `execute`
//! holds until the ceiling expires.
//!
//! ## Teardown
//!
//! `stop` marks the role Dead and drains its channels; stopping
//! Communication also cleans the execution table and releases every pub/sub
//! slot. `start` tears the role down the same way first, whether it was
//! live or not, so nothing posted while it was Dead reaches the new worker.
//! A channel write checks the status under the gate, so it either lands
//! before the drain or sees Dead.

use crate::config::SchedulerConfig;
use crate::snapshot::{RoleSnapshot, SchedulerSnapshot, SlotSnapshot};
use posctx_core::{
    BoundedQueue, CoreError, ExecutionTable, PubSubRegistry, Role, Slot, ThreadControl,
    ThreadStatus,
};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;

/// Wire value returned by `command` while no response is ready
pub const NOT_READY: &[u8] = b"cache";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("unknown role {0}")]
    UnknownRole(i64),

    #[error("unknown channel direction {0}")]
    UnknownDirection(i64),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Decode a VM role constant
pub fn decode_role(code: i64) -> SchedulerResult<Role> {
    Role::from_code(code).ok_or(SchedulerError::UnknownRole(code))
}

/// Channel direction, seen from the VM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i64)]
pub enum Direction {
    /// VM → worker
    Send = 0,
    /// Worker → VM
    Recv = 1,
}

impl Direction {
    pub fn from_code(code: i64) -> SchedulerResult<Direction> {
        match code {
            0 => Ok(Direction::Send),
            1 => Ok(Direction::Recv),
            _ => Err(SchedulerError::UnknownDirection(code)),
        }
    }

    pub fn code(self) -> i64 {
        self as i64
    }
}

/// Result of polling for a command's response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandReply {
    Ready(Vec<u8>),
    NotReady,
}

impl CommandReply {
    pub fn is_ready(&self) -> bool {
        matches!(self, CommandReply::Ready(_))
    }

    pub fn ready(self) -> Option<Vec<u8>> {
        match self {
            CommandReply::Ready(payload) => Some(payload),
            CommandReply::NotReady => None,
        }
    }

    /// Bytes handed to the VM: the response, or the `"cache"` sentinel
    pub fn into_wire(self) -> Vec<u8> {
        match self {
            CommandReply::Ready(payload) => payload,
            CommandReply::NotReady => NOT_READY.to_vec(),
        }
    }
}

impl From<Option<Vec<u8>>> for CommandReply {
    fn from(payload: Option<Vec<u8>>) -> Self {
        match payload {
            Some(payload) => CommandReply::Ready(payload),
            None => CommandReply::NotReady,
        }
    }
}

/// Control block and channels owned by one role
#[derive(Debug)]
struct RoleState {
    control: ThreadControl,
    send: BoundedQueue,
    recv: BoundedQueue,
}

impl RoleState {
    fn new(role: Role, config: &SchedulerConfig) -> Self {
        let ceiling = config.lock_ceiling();
        Self {
            control: ThreadControl::with_ceiling(role, ceiling),
            send: BoundedQueue::with_ceiling(config.channel_payload_max, ceiling),
            recv: BoundedQueue::with_ceiling(config.channel_payload_max, ceiling),
        }
    }

    fn queue(&self, direction: Direction) -> &BoundedQueue {
        match direction {
            Direction::Send => &self.send,
            Direction::Recv => &self.recv,
        }
    }
}

#[derive(Debug)]
pub struct Scheduler {
    config: SchedulerConfig,
    gate: Mutex<()>,
    roles: [RoleState; 2],
    table: ExecutionTable,
    pubsub: PubSubRegistry,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let ceiling = config.lock_ceiling();
        Self {
            gate: Mutex::new(()),
            roles: Role::ALL.map(|role| RoleState::new(role, &config)),
            table: ExecutionTable::with_ceiling(config.execution_payload_max, ceiling),
            pubsub: PubSubRegistry::with_ceiling(
                config.pubsub_slots,
                config.channel_payload_max,
                ceiling,
            ),
            config,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    fn role(&self, role: Role) -> &RoleState {
        match role {
            Role::StatusBar => &self.roles[0],
            Role::Communication => &self.roles[1],
        }
    }

    fn gate(&self) -> MutexGuard<'_, ()> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop everything queued for `role`; caller holds the role lock
    fn teardown(&self, role: Role) -> SchedulerResult<()> {
        let _gate = self.gate();
        let state = self.role(role);
        let mut released = state.send.drain()? + state.recv.drain()?;
        if role == Role::Communication {
            released += self.table.clean()?;
            released += self.pubsub.reset()?;
        }
        if released > 0 {
            tracing::debug!(%role, released, "released queued messages");
        }
        Ok(())
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Bring `role` to Alive on fresh queues and tables
    pub fn start(&self, role: Role) -> SchedulerResult<bool> {
        let mut control = self.role(role).control.acquire()?;
        self.teardown(role)?;
        control.start();
        tracing::info!(%role, generation = self.role(role).control.generation(), "role started");
        Ok(true)
    }

    /// Mark `role` Dead and release its queues; false if it was already Dead
    pub fn stop(&self, role: Role) -> SchedulerResult<bool> {
        let mut control = self.role(role).control.acquire()?;
        let stopped = control.stop();
        self.teardown(role)?;
        if stopped {
            tracing::info!(%role, "role stopped");
        }
        Ok(stopped)
    }

    /// Alive → Paused
    pub fn pause(&self, role: Role) -> SchedulerResult<bool> {
        Ok(self.role(role).control.pause()?)
    }

    /// Paused → Alive (the VM calls this `continue`)
    pub fn resume(&self, role: Role) -> SchedulerResult<bool> {
        Ok(self.role(role).control.resume()?)
    }

    /// Probe `role` within `timeout` (zero waits up to the lock ceiling)
    ///
    /// An Alive Communication role reports `CommandPending` while a command
    /// awaits a worker, then `ResponseReady` while an answer awaits the VM.
    /// `Blocked` means the control lock stayed held for the whole timeout.
    pub fn check(&self, role: Role, timeout: Duration) -> ThreadStatus {
        let Ok(control) = self.role(role).control.acquire_timeout(timeout) else {
            return ThreadStatus::Blocked;
        };
        let status = control.status();
        if status != ThreadStatus::Alive || role != Role::Communication {
            return status;
        }

        let _gate = self.gate();
        match self.table.outstanding() {
            Ok((commands, _)) if commands > 0 => ThreadStatus::CommandPending,
            Ok((_, responses)) if responses > 0 => ThreadStatus::ResponseReady,
            Ok(_) => ThreadStatus::Alive,
            Err(e) => {
                tracing::warn!(%role, error = %e, "execution table unavailable during check");
                ThreadStatus::Blocked
            }
        }
    }

    /// Last stored status of `role`, without taking any lock
    pub fn role_status(&self, role: Role) -> ThreadStatus {
        self.role(role).control.status()
    }

    /// Stop every role
    pub fn shutdown(&self) -> SchedulerResult<()> {
        for role in Role::ALL {
            self.stop(role)?;
        }
        Ok(())
    }

    // =========================================================================
    // Command / response
    // =========================================================================

    /// Post `payload` under `id` and return whatever answer was already ready
    ///
    /// The new command replaces the answer it returns, so the next call
    /// reports `NotReady` until a worker answers again.
    pub fn command(&self, id: i64, payload: &[u8]) -> SchedulerResult<CommandReply> {
        let _gate = self.gate();
        let ready = self.table.get(id, Slot::Response)?;
        self.table.enqueue(id, Slot::Command, payload)?;
        Ok(ready.into())
    }

    /// Collect a ready answer exactly once, or post `payload` if none is ready
    pub fn command_once(&self, id: i64, payload: &[u8]) -> SchedulerResult<CommandReply> {
        let _gate = self.gate();
        match self.table.dequeue(id, Slot::Response)? {
            Some(response) => {
                // Discard remnants so the answered command is not replayed
                self.table.dequeue(id, Slot::Command)?;
                Ok(CommandReply::Ready(response))
            }
            None => {
                self.table.enqueue(id, Slot::Command, payload)?;
                Ok(CommandReply::NotReady)
            }
        }
    }

    /// Claim pending commands matching `id_filter` (`ANY_ID` = all) and post
    /// each `Some` result of `handler` as that command's response
    ///
    /// Returns whether any command was dispatched.
    pub fn execute<F>(&self, id_filter: i64, mut handler: F) -> SchedulerResult<bool>
    where
        F: FnMut(&[u8]) -> Option<Vec<u8>>,
    {
        let _control = self.role(Role::Communication).control.acquire()?;

        let claimed = {
            let _gate = self.gate();
            let mut claimed = Vec::new();
            for id in self.table.pending(id_filter)? {
                if let Some(command) = self.table.dequeue(id, Slot::Command)? {
                    claimed.push((id, command));
                }
            }
            claimed
        };

        for (index, (id, command)) in claimed.iter().enumerate() {
            let Some(response) = handler(command) else {
                tracing::trace!(id, "handler produced no response");
                continue;
            };
            let posted = {
                let _gate = self.gate();
                self.table.enqueue(*id, Slot::Response, &response)
            };
            if let Err(e) = posted {
                self.requeue(&claimed[index..]);
                return Err(e.into());
            }
        }
        Ok(!claimed.is_empty())
    }

    /// Put claimed commands back for a later `execute`
    ///
    /// A command the VM re-posted in the meantime is left alone.
    fn requeue(&self, unanswered: &[(i64, Vec<u8>)]) {
        let _gate = self.gate();
        for (id, command) in unanswered {
            let reposted = match self.table.pending(*id) {
                Ok(ids) => !ids.is_empty(),
                Err(e) => {
                    tracing::warn!(id, error = %e, "dropped unanswered command");
                    continue;
                }
            };
            if reposted {
                continue;
            }
            match self.table.enqueue(*id, Slot::Command, command) {
                Ok(0) => tracing::warn!(id, "dropped unanswered command"),
                Ok(_) => tracing::debug!(id, "requeued unanswered command"),
                Err(e) => tracing::warn!(id, error = %e, "dropped unanswered command"),
            }
        }
    }

    // =========================================================================
    // Channels
    // =========================================================================

    /// Append `payload` to a role's channel; 0 if rejected or the role is Dead
    pub fn channel_write(
        &self,
        role: Role,
        direction: Direction,
        event_id: i64,
        payload: &[u8],
    ) -> SchedulerResult<usize> {
        let state = self.role(role);
        // `stop` marks the role Dead before its drain takes the gate
        let _gate = self.gate();
        if state.control.status() == ThreadStatus::Dead {
            tracing::debug!(%role, event_id, "channel write to dead role dropped");
            return Ok(0);
        }
        Ok(state.queue(direction).enqueue(event_id, payload)?)
    }

    /// Take the oldest message for `event_id` (`ANY_ID` = any)
    ///
    /// Returns the matched id and payload, or `(event_id, None)`.
    pub fn channel_read(
        &self,
        role: Role,
        direction: Direction,
        event_id: i64,
    ) -> SchedulerResult<(i64, Option<Vec<u8>>)> {
        let _gate = self.gate();
        match self.role(role).queue(direction).dequeue(Some(event_id))? {
            Some(message) => Ok((message.id, Some(message.payload))),
            None => Ok((event_id, None)),
        }
    }

    // =========================================================================
    // Pub/sub
    // =========================================================================

    /// Claim a subscriber slot; `None` when every slot is taken
    pub fn subscribe(&self) -> SchedulerResult<Option<usize>> {
        let _gate = self.gate();
        Ok(self.pubsub.subscribe()?)
    }

    pub fn listen(&self, slot: usize) -> SchedulerResult<Option<Vec<u8>>> {
        let _gate = self.gate();
        Ok(self.pubsub.listen(slot)?)
    }

    /// Fan `payload` out to every subscriber except `avoid`
    ///
    /// Returns the length written to the last slot touched.
    pub fn publish(&self, payload: &[u8], avoid: Option<usize>) -> SchedulerResult<usize> {
        let _gate = self.gate();
        Ok(self.pubsub.publish(payload, avoid)?)
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    pub fn snapshot(&self) -> SchedulerResult<SchedulerSnapshot> {
        let roles = Role::ALL
            .iter()
            .map(|&role| {
                let state = self.role(role);
                RoleSnapshot {
                    role: role.name(),
                    status: state.control.status().name(),
                    generation: state.control.generation(),
                    send_depth: state.send.len(),
                    recv_depth: state.recv.len(),
                }
            })
            .collect();

        let _gate = self.gate();
        let (pending_commands, ready_responses) = self.table.outstanding()?;
        let subscribers = self
            .pubsub
            .depths()?
            .into_iter()
            .map(|(slot, depth)| SlotSnapshot { slot, depth })
            .collect();

        Ok(SchedulerSnapshot {
            roles,
            table_records: self.table.len(),
            pending_commands,
            ready_responses,
            subscriber_capacity: self.pubsub.capacity()?,
            subscribers,
        })
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use posctx_core::ANY_ID;

    fn started() -> Scheduler {
        let scheduler = Scheduler::default();
        scheduler.start(Role::Communication).unwrap();
        scheduler
    }

    #[test]
    fn test_command_reply_wire_format() {
        assert_eq!(CommandReply::NotReady.into_wire(), b"cache".to_vec());
        assert_eq!(CommandReply::Ready(b"OK".to_vec()).into_wire(), b"OK".to_vec());
        assert_eq!(CommandReply::from(None), CommandReply::NotReady);
    }

    #[test]
    fn test_decode_role_and_direction() {
        assert_eq!(decode_role(1), Ok(Role::Communication));
        assert_eq!(decode_role(7), Err(SchedulerError::UnknownRole(7)));
        assert_eq!(Direction::from_code(1), Ok(Direction::Recv));
        assert_eq!(
            Direction::from_code(-1),
            Err(SchedulerError::UnknownDirection(-1))
        );
    }

    #[test]
    fn test_check_derives_command_state() {
        let scheduler = started();
        let wait = Duration::from_millis(10);
        assert_eq!(scheduler.check(Role::Communication, wait), ThreadStatus::Alive);

        scheduler.command(4, b"poll").unwrap();
        assert_eq!(
            scheduler.check(Role::Communication, wait),
            ThreadStatus::CommandPending
        );

        scheduler.execute(ANY_ID, |c| Some(c.to_vec())).unwrap();
        assert_eq!(
            scheduler.check(Role::Communication, wait),
            ThreadStatus::ResponseReady
        );

        scheduler.command_once(4, b"poll").unwrap();
        assert_eq!(scheduler.check(Role::Communication, wait), ThreadStatus::Alive);
    }

    #[test]
    fn test_paused_role_hides_command_state() {
        let scheduler = started();
        scheduler.command(1, b"x").unwrap();
        scheduler.pause(Role::Communication).unwrap();
        assert_eq!(
            scheduler.check(Role::Communication, Duration::from_millis(10)),
            ThreadStatus::Paused
        );
    }

    #[test]
    fn test_execute_with_no_work() {
        let scheduler = started();
        assert!(!scheduler.execute(ANY_ID, |_| None).unwrap());
    }

    #[test]
    fn test_execute_filter_leaves_other_ids() {
        let scheduler = started();
        scheduler.command(1, b"one").unwrap();
        scheduler.command(2, b"two").unwrap();

        let mut seen = Vec::new();
        assert!(
            scheduler
                .execute(2, |c| {
                    seen.push(c.to_vec());
                    None
                })
                .unwrap()
        );
        assert_eq!(seen, vec![b"two".to_vec()]);
        assert_eq!(
            scheduler.check(Role::Communication, Duration::from_millis(10)),
            ThreadStatus::CommandPending
        );
    }

    #[test]
    fn test_restart_discards_previous_state() {
        let scheduler = started();
        scheduler
            .channel_write(Role::Communication, Direction::Send, 1, b"old")
            .unwrap();
        scheduler.command(1, b"old").unwrap();
        scheduler.subscribe().unwrap();

        scheduler.start(Role::Communication).unwrap();
        let snapshot = scheduler.snapshot().unwrap();
        assert_eq!(snapshot.table_records, 0);
        assert!(snapshot.subscribers.is_empty());
        assert_eq!(snapshot.roles[1].send_depth, 0);
        assert_eq!(snapshot.roles[1].generation, 2);
    }

    #[test]
    fn test_requeue_restores_unanswered_commands() {
        let scheduler = started();
        scheduler.command(2, b"newer").unwrap();

        scheduler.requeue(&[(1, b"lost".to_vec()), (2, b"older".to_vec())]);
        assert_eq!(scheduler.table.pending(ANY_ID).unwrap(), vec![2, 1]);

        let mut seen = Vec::new();
        scheduler
            .execute(ANY_ID, |c| {
                seen.push(c.to_vec());
                None
            })
            .unwrap();
        assert_eq!(seen, vec![b"newer".to_vec(), b"lost".to_vec()]);
    }

    #[test]
    fn test_stop_status_bar_keeps_communication_state() {
        let scheduler = started();
        scheduler.start(Role::StatusBar).unwrap();
        scheduler.command(1, b"keep").unwrap();

        assert!(scheduler.stop(Role::StatusBar).unwrap());
        assert_eq!(scheduler.snapshot().unwrap().pending_commands, 1);
    }

    #[test]
    fn test_shutdown_stops_all_roles() {
        let scheduler = started();
        scheduler.start(Role::StatusBar).unwrap();
        scheduler.shutdown().unwrap();
        for role in Role::ALL {
            assert_eq!(scheduler.role_status(role), ThreadStatus::Dead);
        }
        assert!(!scheduler.stop(Role::Communication).unwrap());
    }

    #[test]
    fn test_snapshot_reports_depths() {
        let scheduler = started();
        scheduler
            .channel_write(Role::Communication, Direction::Recv, 3, b"a")
            .unwrap();
        let slot = scheduler.subscribe().unwrap().unwrap();
        scheduler.publish(b"hi", None).unwrap();

        let snapshot = scheduler.snapshot().unwrap();
        assert_eq!(snapshot.roles[1].status, "alive");
        assert_eq!(snapshot.roles[1].recv_depth, 1);
        assert_eq!(snapshot.roles[0].status, "dead");
        assert_eq!(snapshot.subscribers, vec![SlotSnapshot { slot, depth: 1 }]);
        assert_eq!(snapshot.subscriber_capacity, 10);
    }
}
