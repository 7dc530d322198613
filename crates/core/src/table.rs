//! Execution table: command/response rendezvous keyed by correlation id
//!
//! The VM thread posts a command under an id and later collects the response
//! for that same id. A worker thread claims pending commands, computes a
//! response and posts it back. Neither side waits on the other: every
//! operation returns immediately with whatever is there.
//!
//! ## Records
//!
//! Each id has at most one [`ExecutionRecord`], holding at most one
//! outstanding command and one outstanding response. Writes are
//! last-write-wins per slot. A record exists only while it holds data: it is
//! created on the first write for its id and removed once both slots have
//! been consumed.
//!
//! Posting a new command drops the response answered for the previous one,
//! so a response is only ever observed for the command it answers.
//!
//! Records are kept in creation order, so scans (`pending`, `clean`) are
//! deterministic.

use crate::error::{CoreResult, copy_payload};
use crate::lock::{LOCK_CEILING, Lock};
use crate::queue::ANY_ID;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Default exclusive payload bound for commands and responses
pub const EXECUTION_PAYLOAD_MAX: usize = 100_000;

/// Which half of a record an operation addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Command,
    Response,
}

/// One outstanding command/response pair
///
/// `command` is `Some` while the command has not been consumed, `response`
/// is `Some` while a response is ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRecord {
    pub id: i64,
    pub command: Option<Vec<u8>>,
    pub response: Option<Vec<u8>>,
}

impl ExecutionRecord {
    fn new(id: i64) -> Self {
        Self {
            id,
            command: None,
            response: None,
        }
    }

    fn slot(&self, slot: Slot) -> Option<&Vec<u8>> {
        match slot {
            Slot::Command => self.command.as_ref(),
            Slot::Response => self.response.as_ref(),
        }
    }

    fn slot_mut(&mut self, slot: Slot) -> &mut Option<Vec<u8>> {
        match slot {
            Slot::Command => &mut self.command,
            Slot::Response => &mut self.response,
        }
    }

    fn is_spent(&self) -> bool {
        self.command.is_none() && self.response.is_none()
    }
}

#[derive(Debug)]
pub struct ExecutionTable {
    records: Lock<Vec<ExecutionRecord>>,
    max_payload: usize,
    size: AtomicUsize,
}

impl ExecutionTable {
    pub fn new(max_payload: usize) -> Self {
        Self::with_ceiling(max_payload, LOCK_CEILING)
    }

    pub fn with_ceiling(max_payload: usize, ceiling: Duration) -> Self {
        Self {
            records: Lock::with_ceiling(Vec::new(), ceiling),
            max_payload,
            size: AtomicUsize::new(0),
        }
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    pub fn accepts(&self, len: usize) -> bool {
        len > 0 && len < self.max_payload
    }

    /// Copy out a pending command or ready response without clearing it
    pub fn get(&self, id: i64, slot: Slot) -> CoreResult<Option<Vec<u8>>> {
        let records = self.records.acquire()?;
        match records
            .iter()
            .find(|record| record.id == id)
            .and_then(|record| record.slot(slot))
        {
            Some(payload) => copy_payload(payload).map(Some),
            None => Ok(None),
        }
    }

    /// Store `payload` in the given slot of the record for `id`
    ///
    /// Creates the record if needed and overwrites any unconsumed value.
    /// Storing a command also drops a response left over from the previous
    /// command. Returns the bytes stored, 0 if the payload was rejected.
    pub fn enqueue(&self, id: i64, slot: Slot, payload: &[u8]) -> CoreResult<usize> {
        if !self.accepts(payload.len()) {
            tracing::debug!(
                id,
                ?slot,
                len = payload.len(),
                max = self.max_payload,
                "execution table rejected payload"
            );
            return Ok(0);
        }
        let payload = copy_payload(payload)?;
        let len = payload.len();

        let mut records = self.records.acquire()?;
        let index = match records.iter().position(|record| record.id == id) {
            Some(index) => index,
            None => {
                records.push(ExecutionRecord::new(id));
                records.len() - 1
            }
        };
        let record = &mut records[index];
        if slot == Slot::Command {
            record.response = None;
        }
        *record.slot_mut(slot) = Some(payload);
        self.size.store(records.len(), Ordering::Release);
        Ok(len)
    }

    /// Take the value out of the given slot, removing the record once both
    /// slots are empty
    pub fn dequeue(&self, id: i64, slot: Slot) -> CoreResult<Option<Vec<u8>>> {
        let mut records = self.records.acquire()?;
        let Some(index) = records.iter().position(|record| record.id == id) else {
            return Ok(None);
        };
        let payload = records[index].slot_mut(slot).take();
        if records[index].is_spent() {
            records.remove(index);
        }
        self.size.store(records.len(), Ordering::Release);
        Ok(payload)
    }

    /// Ids with a pending command matching `id_filter` (`ANY_ID` = all),
    /// in record order
    pub fn pending(&self, id_filter: i64) -> CoreResult<Vec<i64>> {
        let records = self.records.acquire()?;
        Ok(records
            .iter()
            .filter(|record| id_filter == ANY_ID || record.id == id_filter)
            .filter(|record| record.command.as_ref().is_some_and(|c| !c.is_empty()))
            .map(|record| record.id)
            .collect())
    }

    /// Count of records with a pending command and with a ready response
    pub fn outstanding(&self) -> CoreResult<(usize, usize)> {
        let records = self.records.acquire()?;
        let commands = records.iter().filter(|r| r.command.is_some()).count();
        let responses = records.iter().filter(|r| r.response.is_some()).count();
        Ok((commands, responses))
    }

    /// Drain every record, command first then response
    pub fn clean(&self) -> CoreResult<usize> {
        let ids: Vec<i64> = {
            let records = self.records.acquire()?;
            records.iter().map(|record| record.id).collect()
        };
        let mut released = 0;
        for id in ids {
            if self.dequeue(id, Slot::Command)?.is_some() {
                released += 1;
            }
            if self.dequeue(id, Slot::Response)?.is_some() {
                released += 1;
            }
        }
        if released > 0 {
            tracing::trace!(released, "execution table cleaned");
        }
        Ok(released)
    }

    /// Number of live records
    pub fn len(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ExecutionTable {
    fn default() -> Self {
        Self::new(EXECUTION_PAYLOAD_MAX)
    }
}
