//! Posctx Runtime: scheduling and message exchange for an embedded VM
//!
//! The scripting VM of a point-of-sale terminal talks to host-side worker
//! threads through the [`Scheduler`]: it starts, pauses and stops workers,
//! posts commands and polls for their answers, writes and reads per-role
//! channels and fans messages out to subscribers. Every call returns
//! immediately; "not ready yet" is a value, never a wait.
//!
//! The VM reaches all of this through the `extern "C"` functions in
//! [`ffi`]; Rust hosts use [`Scheduler`] and [`Worker`] directly.

pub mod cache;
pub mod config;
pub mod diagnostics;
pub mod ffi;
pub mod logging;
pub mod scheduler;
pub mod snapshot;
pub mod worker;

pub use cache::ResponseCache;
pub use config::{ConfigError, SchedulerConfig};
pub use logging::init_logging;
pub use scheduler::{
    CommandReply, Direction, NOT_READY, Scheduler, SchedulerError, SchedulerResult, decode_role,
};
pub use snapshot::{ReportFormat, RoleSnapshot, SchedulerSnapshot, SlotSnapshot};
pub use worker::Worker;

pub use posctx_core::{ANY_ID, Liveness, Role, ThreadStatus};

// Error handling (exported for the VM)
pub use posctx_core::error::{
    posctx_clear_error as clear_error, posctx_get_error as get_error,
    posctx_has_error as has_error, posctx_take_error as take_error,
};

// Scheduler operations (exported for the VM)
pub use ffi::{
    PosctxBytes, PosctxHandler, PosctxReply, posctx_bytes_free as bytes_free,
    posctx_check as check, posctx_command as command, posctx_command_once as command_once,
    posctx_continue as continue_role, posctx_execute as execute, posctx_pause as pause,
    posctx_reply_set as reply_set, posctx_runtime_init as runtime_init,
    posctx_scheduler_free as scheduler_free, posctx_scheduler_new as scheduler_new,
    posctx_start as start, posctx_stop as stop,
};

// Channel and pub/sub operations (exported for the VM)
pub use ffi::{
    posctx_channel_read as channel_read, posctx_channel_write as channel_write,
    posctx_listen as listen, posctx_publish as publish, posctx_subscribe as subscribe,
};
