//! Posctx Core: concurrency primitives for cooperating VM worker threads
//!
//! This crate provides the building blocks the scheduler facade composes:
//! a timed binary lock, id-tagged bounded queues, the command/response
//! execution table, per-role thread control blocks and a small pub/sub
//! registry. Nothing here knows about the VM; every operation returns a
//! value immediately and never blocks past the lock ceiling.
//!
//! # Modules
//!
//! - `error`: Typed errors plus the thread-local error slot for FFI callers
//! - `lock`: Binary semaphore with timed acquisition and a safety ceiling
//! - `queue`: Bounded message queue with id-filtered dequeue
//! - `table`: Execution table holding command/response pairs by id
//! - `control`: Thread control blocks and the worker state machine
//! - `pubsub`: Fixed slot publish/subscribe registry

pub mod control;
pub mod error;
pub mod lock;
pub mod pubsub;
pub mod queue;
pub mod table;

pub use control::{ControlGuard, Liveness, Role, ThreadControl, ThreadStatus};
pub use lock::{LOCK_CEILING, Lock, LockGuard};
pub use pubsub::{PUBSUB_SLOTS, PubSubRegistry};
pub use queue::{ANY_ID, BoundedQueue, CHANNEL_PAYLOAD_MAX, ChannelMessage};
pub use table::{EXECUTION_PAYLOAD_MAX, ExecutionRecord, ExecutionTable, Slot};

// Error handling
pub use error::{
    CoreError, CoreResult, clear_runtime_error, copy_payload, has_runtime_error,
    posctx_clear_error as clear_error, posctx_get_error as get_error,
    posctx_has_error as has_error, posctx_take_error as take_error, set_runtime_error,
    take_runtime_error,
};
