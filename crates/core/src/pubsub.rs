//! Publish/subscribe registry
//!
//! A fixed table of subscriber slots, each owning a [`BoundedQueue`].
//! `publish` fans a payload out to every active slot except an optional
//! excluded one, so a subscriber that publishes does not hear its own
//! message.
//!
//! Slots are claimed lowest-index first and are only released by `reset`
//! (scheduler teardown). Once every slot is taken, `subscribe` keeps
//! returning `None` until the next reset.

use crate::error::CoreResult;
use crate::lock::{LOCK_CEILING, Lock};
use crate::queue::{ANY_ID, BoundedQueue, CHANNEL_PAYLOAD_MAX};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Default number of subscriber slots
pub const PUBSUB_SLOTS: usize = 10;

#[derive(Debug)]
pub struct PubSubRegistry {
    slots: Lock<Vec<Option<BoundedQueue>>>,
    max_payload: usize,
    ceiling: Duration,
    active: AtomicUsize,
}

impl PubSubRegistry {
    pub fn new(capacity: usize, max_payload: usize) -> Self {
        Self::with_ceiling(capacity, max_payload, LOCK_CEILING)
    }

    pub fn with_ceiling(capacity: usize, max_payload: usize, ceiling: Duration) -> Self {
        let slots = (0..capacity).map(|_| None).collect();
        Self {
            slots: Lock::with_ceiling(slots, ceiling),
            max_payload,
            ceiling,
            active: AtomicUsize::new(0),
        }
    }

    /// Claim the lowest free slot, or `None` when all are taken
    pub fn subscribe(&self) -> CoreResult<Option<usize>> {
        let mut slots = self.slots.acquire()?;
        let Some(index) = slots.iter().position(Option::is_none) else {
            tracing::warn!(capacity = slots.len(), "pub/sub registry full");
            return Ok(None);
        };
        slots[index] = Some(BoundedQueue::with_ceiling(self.max_payload, self.ceiling));
        self.active.fetch_add(1, Ordering::AcqRel);
        tracing::debug!(slot = index, "subscribed");
        Ok(Some(index))
    }

    /// Enqueue `payload` into every active slot except `avoid`
    ///
    /// Returns the byte count written to the last slot touched (0 when there
    /// are no other subscribers or the payload was rejected).
    pub fn publish(&self, payload: &[u8], avoid: Option<usize>) -> CoreResult<usize> {
        let slots = self.slots.acquire()?;
        let mut written = 0;
        for (index, queue) in slots.iter().enumerate() {
            if Some(index) == avoid {
                continue;
            }
            if let Some(queue) = queue {
                written = queue.enqueue(ANY_ID, payload)?;
            }
        }
        Ok(written)
    }

    /// Take the oldest message waiting in `slot`
    pub fn listen(&self, slot: usize) -> CoreResult<Option<Vec<u8>>> {
        let slots = self.slots.acquire()?;
        match slots.get(slot) {
            Some(Some(queue)) => Ok(queue.dequeue(None)?.map(|message| message.payload)),
            _ => Ok(None),
        }
    }

    /// Drain every queue and release every slot, returning how many
    /// messages were dropped
    pub fn reset(&self) -> CoreResult<usize> {
        let mut slots = self.slots.acquire()?;
        let mut released = 0;
        for slot in slots.iter_mut() {
            if let Some(queue) = slot.take() {
                released += queue.drain()?;
            }
        }
        self.active.store(0, Ordering::Release);
        Ok(released)
    }

    pub fn is_active(&self, slot: usize) -> CoreResult<bool> {
        let slots = self.slots.acquire()?;
        Ok(matches!(slots.get(slot), Some(Some(_))))
    }

    /// Queue depth per active slot, as `(slot, depth)`
    pub fn depths(&self) -> CoreResult<Vec<(usize, usize)>> {
        let slots = self.slots.acquire()?;
        Ok(slots
            .iter()
            .enumerate()
            .filter_map(|(index, queue)| queue.as_ref().map(|q| (index, q.len())))
            .collect())
    }

    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> CoreResult<usize> {
        Ok(self.slots.acquire()?.len())
    }
}

impl Default for PubSubRegistry {
    fn default() -> Self {
        Self::new(PUBSUB_SLOTS, CHANNEL_PAYLOAD_MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_claims_lowest_slots() {
        let registry = PubSubRegistry::default();
        assert_eq!(registry.subscribe().unwrap(), Some(0));
        assert_eq!(registry.subscribe().unwrap(), Some(1));
        assert_eq!(registry.subscribe().unwrap(), Some(2));
        assert_eq!(registry.active_count(), 3);
    }

    #[test]
    fn test_publish_with_self_exclusion() {
        let registry = PubSubRegistry::default();
        for _ in 0..3 {
            registry.subscribe().unwrap();
        }

        assert_eq!(registry.publish(b"x", Some(1)).unwrap(), 1);
        assert_eq!(registry.listen(0).unwrap(), Some(b"x".to_vec()));
        assert_eq!(registry.listen(2).unwrap(), Some(b"x".to_vec()));
        assert_eq!(registry.listen(1).unwrap(), None);
    }

    #[test]
    fn test_publish_without_exclusion_reaches_all() {
        let registry = PubSubRegistry::default();
        registry.subscribe().unwrap();
        registry.subscribe().unwrap();

        registry.publish(b"hello", None).unwrap();
        assert_eq!(registry.listen(0).unwrap(), Some(b"hello".to_vec()));
        assert_eq!(registry.listen(1).unwrap(), Some(b"hello".to_vec()));
        assert_eq!(registry.listen(0).unwrap(), None);
    }

    #[test]
    fn test_publish_with_no_subscribers() {
        let registry = PubSubRegistry::default();
        assert_eq!(registry.publish(b"nobody", None).unwrap(), 0);
    }

    #[test]
    fn test_registry_exhaustion() {
        let registry = PubSubRegistry::new(3, CHANNEL_PAYLOAD_MAX);
        for expected in 0..3 {
            assert_eq!(registry.subscribe().unwrap(), Some(expected));
        }
        assert_eq!(registry.subscribe().unwrap(), None);
        assert_eq!(registry.subscribe().unwrap(), None);
    }

    #[test]
    fn test_listen_inactive_or_out_of_range() {
        let registry = PubSubRegistry::default();
        assert_eq!(registry.listen(0).unwrap(), None);
        assert_eq!(registry.listen(99).unwrap(), None);
    }

    #[test]
    fn test_reset_releases_slots_and_messages() {
        let registry = PubSubRegistry::default();
        registry.subscribe().unwrap();
        registry.subscribe().unwrap();
        registry.publish(b"a", None).unwrap();
        registry.publish(b"b", None).unwrap();

        assert_eq!(registry.reset().unwrap(), 4);
        assert_eq!(registry.active_count(), 0);
        assert!(!registry.is_active(0).unwrap());
        assert_eq!(registry.listen(0).unwrap(), None);

        // Slots are reusable after a reset
        assert_eq!(registry.subscribe().unwrap(), Some(0));
        assert_eq!(registry.reset().unwrap(), 0);
        assert_eq!(registry.reset().unwrap(), 0);
    }

    #[test]
    fn test_depths_reports_active_slots() {
        let registry = PubSubRegistry::default();
        registry.subscribe().unwrap();
        registry.subscribe().unwrap();
        registry.publish(b"m", Some(0)).unwrap();
        assert_eq!(registry.depths().unwrap(), vec![(0, 0), (1, 1)]);
    }
}
