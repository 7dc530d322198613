//! Background worker threads
//!
//! A [`Worker`] is the host side of a role: a named OS thread that polls the
//! scheduler on behalf of that role until the role is stopped.
//!
//! | Role | One poll |
//! |------|----------|
//! | Communication | `execute(ANY_ID, handler)`: answer every pending command |
//! | StatusBar | take the oldest `Send` message, post `handler`'s result to `Recv` under the same event id |
//!
//! The loop exits once the role is Dead and idles while it is Paused. When a
//! poll finds nothing to do the thread sleeps `worker_poll_ms` before the
//! next one. Start the role before spawning its worker, otherwise the thread
//! exits immediately.

use crate::scheduler::{Direction, Scheduler, SchedulerResult};
use posctx_core::{ANY_ID, Role, ThreadStatus};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

#[derive(Debug)]
pub struct Worker {
    role: Role,
    handle: JoinHandle<()>,
}

impl Worker {
    /// Spawn the worker thread for `role`
    pub fn spawn<F>(scheduler: Arc<Scheduler>, role: Role, handler: F) -> std::io::Result<Worker>
    where
        F: FnMut(&[u8]) -> Option<Vec<u8>> + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(format!("posctx-{}", role))
            .spawn(move || run(&scheduler, role, handler))?;
        Ok(Worker { role, handle })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the thread to exit (stop the role first)
    pub fn join(self) -> thread::Result<()> {
        self.handle.join()
    }
}

fn run<F>(scheduler: &Scheduler, role: Role, mut handler: F)
where
    F: FnMut(&[u8]) -> Option<Vec<u8>>,
{
    let poll = scheduler.config().worker_poll();
    tracing::debug!(%role, ?poll, "worker running");

    loop {
        match scheduler.role_status(role) {
            ThreadStatus::Dead => break,
            ThreadStatus::Paused => {
                thread::sleep(poll);
                continue;
            }
            _ => {}
        }

        match poll_once(scheduler, role, &mut handler) {
            Ok(true) => {}
            Ok(false) => thread::sleep(poll),
            Err(e) => {
                tracing::warn!(%role, error = %e, "worker poll failed");
                thread::sleep(poll);
            }
        }
    }

    tracing::debug!(%role, "worker exited");
}

fn poll_once<F>(scheduler: &Scheduler, role: Role, handler: &mut F) -> SchedulerResult<bool>
where
    F: FnMut(&[u8]) -> Option<Vec<u8>>,
{
    match role {
        Role::Communication => scheduler.execute(ANY_ID, handler),
        Role::StatusBar => {
            let (event_id, payload) = scheduler.channel_read(role, Direction::Send, ANY_ID)?;
            let Some(payload) = payload else {
                return Ok(false);
            };
            if let Some(reply) = handler(&payload) {
                scheduler.channel_write(role, Direction::Recv, event_id, &reply)?;
            }
            Ok(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_exits_when_role_dead() {
        let scheduler = Arc::new(Scheduler::default());
        let worker = Worker::spawn(Arc::clone(&scheduler), Role::Communication, |_| None).unwrap();
        worker.join().unwrap();
    }

    #[test]
    fn test_poll_once_status_bar_relays() {
        let scheduler = Scheduler::default();
        scheduler.start(Role::StatusBar).unwrap();
        scheduler
            .channel_write(Role::StatusBar, Direction::Send, 8, b"battery")
            .unwrap();

        let mut handler = |p: &[u8]| Some([p, b":ok"].concat());
        assert!(poll_once(&scheduler, Role::StatusBar, &mut handler).unwrap());
        assert!(!poll_once(&scheduler, Role::StatusBar, &mut handler).unwrap());

        let (id, reply) = scheduler
            .channel_read(Role::StatusBar, Direction::Recv, 8)
            .unwrap();
        assert_eq!((id, reply), (8, Some(b"battery:ok".to_vec())));
    }
}
