//! Bounded message queue
//!
//! An ordered list of [`ChannelMessage`]s tagged with a correlation id. One
//! physical queue multiplexes many logical streams: an id-filtered dequeue
//! skips past older messages with other ids, so ordering is FIFO per id and
//! arrival order across ids.
//!
//! ## Bounds
//!
//! A payload is accepted iff `0 < len < max_payload`. Rejected payloads are a
//! silent no-op (`Ok(0)`), never an error: the VM treats 0 as "nothing
//! written" and retries or drops.
//!
//! ## Ownership
//!
//! The queue owns its messages. `dequeue` moves the message out to the
//! caller; `drain` drops everything left.

use crate::error::{CoreResult, copy_payload};
use crate::lock::{LOCK_CEILING, Lock};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Correlation id that matches any message on dequeue
pub const ANY_ID: i64 = 0;

/// Default exclusive payload bound for channel queues
pub const CHANNEL_PAYLOAD_MAX: usize = 100_000;

/// One message in a [`BoundedQueue`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMessage {
    pub id: i64,
    pub payload: Vec<u8>,
}

#[derive(Debug)]
pub struct BoundedQueue {
    messages: Lock<VecDeque<ChannelMessage>>,
    max_payload: usize,
    /// Mirror of `messages.len()`, readable without taking the lock
    size: AtomicUsize,
}

impl BoundedQueue {
    pub fn new(max_payload: usize) -> Self {
        Self::with_ceiling(max_payload, LOCK_CEILING)
    }

    pub fn with_ceiling(max_payload: usize, ceiling: Duration) -> Self {
        Self {
            messages: Lock::with_ceiling(VecDeque::new(), ceiling),
            max_payload,
            size: AtomicUsize::new(0),
        }
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Whether a payload of `len` bytes fits this queue
    pub fn accepts(&self, len: usize) -> bool {
        len > 0 && len < self.max_payload
    }

    /// Append a copy of `payload` under correlation id `id`
    ///
    /// Returns the number of bytes enqueued, 0 if the payload was rejected.
    pub fn enqueue(&self, id: i64, payload: &[u8]) -> CoreResult<usize> {
        if !self.accepts(payload.len()) {
            tracing::debug!(
                id,
                len = payload.len(),
                max = self.max_payload,
                "queue rejected payload"
            );
            return Ok(0);
        }
        let payload = copy_payload(payload)?;
        let len = payload.len();

        let mut messages = self.messages.acquire()?;
        messages.push_back(ChannelMessage { id, payload });
        self.size.store(messages.len(), Ordering::Release);
        Ok(len)
    }

    /// Remove the oldest message matching `id_filter`
    ///
    /// `None` and `Some(ANY_ID)` match the head of the queue.
    pub fn dequeue(&self, id_filter: Option<i64>) -> CoreResult<Option<ChannelMessage>> {
        let mut messages = self.messages.acquire()?;
        let position = match id_filter {
            None | Some(ANY_ID) => (!messages.is_empty()).then_some(0),
            Some(id) => messages.iter().position(|message| message.id == id),
        };
        let message = position.and_then(|index| messages.remove(index));
        self.size.store(messages.len(), Ordering::Release);
        Ok(message)
    }

    /// Drop every remaining message, returning how many were released
    pub fn drain(&self) -> CoreResult<usize> {
        let mut released = 0;
        while self.dequeue(None)?.is_some() {
            released += 1;
        }
        if released > 0 {
            tracing::trace!(released, "queue drained");
        }
        Ok(released)
    }

    pub fn len(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for BoundedQueue {
    fn default() -> Self {
        Self::new(CHANNEL_PAYLOAD_MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_per_id() {
        let queue = BoundedQueue::default();
        queue.enqueue(4, b"P1").unwrap();
        queue.enqueue(9, b"other").unwrap();
        queue.enqueue(4, b"P2").unwrap();
        queue.enqueue(4, b"P3").unwrap();

        for expected in [b"P1", b"P2", b"P3"] {
            let message = queue.dequeue(Some(4)).unwrap().unwrap();
            assert_eq!(message.id, 4);
            assert_eq!(message.payload, expected.to_vec());
        }
        assert!(queue.dequeue(Some(4)).unwrap().is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_unfiltered_dequeue_takes_head() {
        let queue = BoundedQueue::default();
        queue.enqueue(7, b"first").unwrap();
        queue.enqueue(3, b"second").unwrap();

        let message = queue.dequeue(None).unwrap().unwrap();
        assert_eq!((message.id, message.payload.as_slice()), (7, &b"first"[..]));

        let message = queue.dequeue(Some(ANY_ID)).unwrap().unwrap();
        assert_eq!((message.id, message.payload.as_slice()), (3, &b"second"[..]));
        assert!(queue.dequeue(None).unwrap().is_none());
    }

    #[test]
    fn test_filter_skips_older_messages() {
        let queue = BoundedQueue::default();
        queue.enqueue(1, b"a").unwrap();
        queue.enqueue(2, b"b").unwrap();

        assert_eq!(queue.dequeue(Some(2)).unwrap().unwrap().payload, b"b");
        assert_eq!(queue.dequeue(None).unwrap().unwrap().payload, b"a");
    }

    #[test]
    fn test_capacity_rejection_is_noop() {
        let queue = BoundedQueue::new(8);
        assert_eq!(queue.enqueue(1, &[0u8; 8]).unwrap(), 0);
        assert_eq!(queue.enqueue(1, &[0u8; 9]).unwrap(), 0);
        assert_eq!(queue.len(), 0);

        assert_eq!(queue.enqueue(1, &[0u8; 7]).unwrap(), 7);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_empty_payload_rejected() {
        let queue = BoundedQueue::default();
        assert_eq!(queue.enqueue(1, b"").unwrap(), 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_no_match_leaves_queue_untouched() {
        let queue = BoundedQueue::default();
        queue.enqueue(5, b"keep").unwrap();
        assert!(queue.dequeue(Some(6)).unwrap().is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_drain_releases_everything() {
        let queue = BoundedQueue::default();
        for id in 1..=5 {
            queue.enqueue(id, b"x").unwrap();
        }
        assert_eq!(queue.drain().unwrap(), 5);
        assert!(queue.is_empty());
        assert!(queue.dequeue(None).unwrap().is_none());
    }

    #[test]
    fn test_drain_empty_is_idempotent() {
        let queue = BoundedQueue::default();
        assert_eq!(queue.drain().unwrap(), 0);
        assert_eq!(queue.drain().unwrap(), 0);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_concurrent_producers_and_consumer() {
        let queue = Arc::new(BoundedQueue::default());
        let mut producers = Vec::new();

        for id in 1..=4i64 {
            let queue = Arc::clone(&queue);
            producers.push(thread::spawn(move || {
                for n in 0..50u32 {
                    queue.enqueue(id, &n.to_le_bytes()).unwrap();
                }
            }));
        }
        for producer in producers {
            producer.join().unwrap();
        }
        assert_eq!(queue.len(), 200);

        // Per-id order survives interleaving
        for id in 1..=4i64 {
            for n in 0..50u32 {
                let message = queue.dequeue(Some(id)).unwrap().unwrap();
                assert_eq!(message.payload, n.to_le_bytes().to_vec());
            }
        }
        assert!(queue.is_empty());
    }
}
