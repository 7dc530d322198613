//! Response cache for polling callers
//!
//! `Scheduler::command` answers `NotReady` until a worker responds, and
//! again after the answer has been collected. A VM script that only wants
//! the latest known value can go through [`ResponseCache`] instead: it
//! returns the fresh answer when there is one, otherwise the last answer
//! seen for the same `(id, command)` pair.

use crate::scheduler::{CommandReply, Scheduler, SchedulerResult};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct ResponseCache {
    entries: HashMap<(i64, Vec<u8>), Vec<u8>>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Post `payload` through `scheduler.command` and resolve the reply
    /// against the cache
    pub fn command(
        &mut self,
        scheduler: &Scheduler,
        id: i64,
        payload: &[u8],
    ) -> SchedulerResult<Option<Vec<u8>>> {
        match scheduler.command(id, payload)? {
            CommandReply::Ready(response) => {
                self.entries
                    .insert((id, payload.to_vec()), response.clone());
                Ok(Some(response))
            }
            CommandReply::NotReady => Ok(self.get(id, payload).map(<[u8]>::to_vec)),
        }
    }

    pub fn get(&self, id: i64, payload: &[u8]) -> Option<&[u8]> {
        self.entries
            .get(&(id, payload.to_vec()))
            .map(Vec::as_slice)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use posctx_core::{ANY_ID, Role};

    #[test]
    fn test_cache_serves_last_answer() {
        let scheduler = Scheduler::default();
        scheduler.start(Role::Communication).unwrap();
        let mut cache = ResponseCache::new();

        assert_eq!(cache.command(&scheduler, 1, b"TOTAL").unwrap(), None);
        scheduler.execute(ANY_ID, |_| Some(b"42".to_vec())).unwrap();

        assert_eq!(
            cache.command(&scheduler, 1, b"TOTAL").unwrap(),
            Some(b"42".to_vec())
        );
        // The scheduler reports NotReady now; the cache still answers
        assert_eq!(
            cache.command(&scheduler, 1, b"TOTAL").unwrap(),
            Some(b"42".to_vec())
        );
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_keys_on_command_bytes() {
        let scheduler = Scheduler::default();
        let mut cache = ResponseCache::new();

        scheduler.command(1, b"A").unwrap();
        scheduler.execute(ANY_ID, |_| Some(b"a".to_vec())).unwrap();
        cache.command(&scheduler, 1, b"A").unwrap();

        assert_eq!(cache.get(1, b"A"), Some(&b"a"[..]));
        assert_eq!(cache.get(1, b"B"), None);
        assert_eq!(cache.get(2, b"A"), None);

        cache.clear();
        assert!(cache.is_empty());
    }
}
