//! C ABI for the scripting VM
//!
//! The VM binds these as `ThreadScheduler.*`, `ThreadChannel.*` and
//! `ThreadPubSub.*`. A scheduler is created once with
//! [`posctx_scheduler_new`] and passed to every call as an opaque pointer.
//!
//! Every entry point keeps the VM's polling contract: failures come back as
//! `false`, `0`, `-1`, a nil [`PosctxBytes`] or the `"cache"` sentinel, and
//! the reason is left in the thread-local error slot (`posctx_has_error`,
//! `posctx_take_error`).
//!
//! ## Byte buffers
//!
//! Returned payloads are owned by the caller and must be released with
//! [`posctx_bytes_free`]. A nil buffer (`ptr == NULL`) means "nothing".

use crate::config::SchedulerConfig;
use crate::logging::init_logging;
use crate::scheduler::{CommandReply, Direction, Scheduler, SchedulerResult, decode_role};
use posctx_core::{ThreadStatus, set_runtime_error};
use std::ffi::c_void;
use std::ptr;
use std::sync::Arc;
use std::time::Duration;

/// Byte buffer handed across the boundary
#[repr(C)]
#[derive(Debug)]
pub struct PosctxBytes {
    pub ptr: *mut u8,
    pub len: usize,
}

impl PosctxBytes {
    pub const NIL: PosctxBytes = PosctxBytes {
        ptr: ptr::null_mut(),
        len: 0,
    };

    pub fn from_vec(bytes: Vec<u8>) -> PosctxBytes {
        let boxed = bytes.into_boxed_slice();
        let len = boxed.len();
        PosctxBytes {
            ptr: Box::into_raw(boxed).cast::<u8>(),
            len,
        }
    }

    fn from_option(bytes: Option<Vec<u8>>) -> PosctxBytes {
        bytes.map_or(PosctxBytes::NIL, PosctxBytes::from_vec)
    }

    pub fn is_nil(&self) -> bool {
        self.ptr.is_null()
    }

    /// View the bytes
    ///
    /// # Safety
    /// `self` must come from this library and not have been freed
    pub unsafe fn as_slice(&self) -> &[u8] {
        if self.ptr.is_null() {
            &[]
        } else {
            unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
        }
    }
}

/// Response slot filled by an execute handler via [`posctx_reply_set`]
#[derive(Debug, Default)]
pub struct PosctxReply {
    payload: Option<Vec<u8>>,
}

/// Execute handler: receives one command and may answer it by calling
/// `posctx_reply_set(reply, ...)` before returning
pub type PosctxHandler =
    unsafe extern "C" fn(user: *mut c_void, command: *const u8, len: usize, reply: *mut PosctxReply);

unsafe fn input<'a>(ptr: *const u8, len: usize) -> &'a [u8] {
    if ptr.is_null() || len == 0 {
        &[]
    } else {
        unsafe { std::slice::from_raw_parts(ptr, len) }
    }
}

unsafe fn scheduler<'a>(handle: *const Scheduler, op: &str) -> Option<&'a Scheduler> {
    if handle.is_null() {
        set_runtime_error(format!("{}: null scheduler", op));
        None
    } else {
        Some(unsafe { &*handle })
    }
}

fn report<T>(op: &str, result: SchedulerResult<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            set_runtime_error(format!("{}: {}", op, e));
            None
        }
    }
}

// =============================================================================
// Lifecycle
// =============================================================================

/// Initialize logging from `POSCTX_LOG`
///
/// # Safety
/// Always safe to call; idempotent.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn posctx_runtime_init() {
    init_logging();
}

/// Create a scheduler configured from `POSCTX_*` environment variables
///
/// # Safety
/// The result must be released with `posctx_scheduler_free`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn posctx_scheduler_new() -> *const Scheduler {
    let scheduler = Arc::new(Scheduler::new(SchedulerConfig::from_env()));
    crate::diagnostics::watch(&scheduler);
    crate::diagnostics::install_signal_handler();
    Arc::into_raw(scheduler)
}

/// Stop every role and release the VM's reference
///
/// Workers holding their own reference exit once they see the roles Dead.
///
/// # Safety
/// `handle` must come from `posctx_scheduler_new` and not be used afterwards.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn posctx_scheduler_free(handle: *const Scheduler) {
    if handle.is_null() {
        return;
    }
    let scheduler = unsafe { Arc::from_raw(handle) };
    report("scheduler_free", scheduler.shutdown());
}

/// Release a buffer returned by this library
///
/// # Safety
/// `bytes` must come from this library and be freed at most once.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn posctx_bytes_free(bytes: PosctxBytes) {
    if bytes.ptr.is_null() {
        return;
    }
    let slice = ptr::slice_from_raw_parts_mut(bytes.ptr, bytes.len);
    drop(unsafe { Box::from_raw(slice) });
}

// =============================================================================
// ThreadScheduler
// =============================================================================

/// `ThreadScheduler.start(role) -> Bool`
///
/// # Safety
/// `handle` must be a live scheduler or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn posctx_start(handle: *const Scheduler, role: i64) -> bool {
    let Some(scheduler) = (unsafe { scheduler(handle, "start") }) else {
        return false;
    };
    report("start", decode_role(role).and_then(|r| scheduler.start(r))).unwrap_or(false)
}

/// `ThreadScheduler.stop(role) -> Bool`
///
/// # Safety
/// `handle` must be a live scheduler or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn posctx_stop(handle: *const Scheduler, role: i64) -> bool {
    let Some(scheduler) = (unsafe { scheduler(handle, "stop") }) else {
        return false;
    };
    report("stop", decode_role(role).and_then(|r| scheduler.stop(r))).unwrap_or(false)
}

/// `ThreadScheduler.pause(role) -> Bool`
///
/// # Safety
/// `handle` must be a live scheduler or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn posctx_pause(handle: *const Scheduler, role: i64) -> bool {
    let Some(scheduler) = (unsafe { scheduler(handle, "pause") }) else {
        return false;
    };
    report("pause", decode_role(role).and_then(|r| scheduler.pause(r))).unwrap_or(false)
}

/// `ThreadScheduler.continue(role) -> Bool`
///
/// # Safety
/// `handle` must be a live scheduler or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn posctx_continue(handle: *const Scheduler, role: i64) -> bool {
    let Some(scheduler) = (unsafe { scheduler(handle, "continue") }) else {
        return false;
    };
    report("continue", decode_role(role).and_then(|r| scheduler.resume(r))).unwrap_or(false)
}

/// `ThreadScheduler.check(role, timeout_ms) -> Int` (status code 0-5)
///
/// A timeout of 0 or less waits up to the lock ceiling. Unknown roles
/// report Dead.
///
/// # Safety
/// `handle` must be a live scheduler or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn posctx_check(handle: *const Scheduler, role: i64, timeout_ms: i64) -> i64 {
    let Some(scheduler) = (unsafe { scheduler(handle, "check") }) else {
        return ThreadStatus::Dead.code();
    };
    let Some(role) = report("check", decode_role(role)) else {
        return ThreadStatus::Dead.code();
    };
    let timeout = Duration::from_millis(timeout_ms.max(0) as u64);
    scheduler.check(role, timeout).code()
}

/// `ThreadScheduler.command(id, payload) -> Bytes` (response or `"cache"`)
///
/// # Safety
/// `handle` must be a live scheduler or null; `payload` must point to `len`
/// readable bytes or be null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn posctx_command(
    handle: *const Scheduler,
    id: i64,
    payload: *const u8,
    len: usize,
) -> PosctxBytes {
    let reply = unsafe { scheduler(handle, "command") }
        .and_then(|s| report("command", s.command(id, unsafe { input(payload, len) })))
        .unwrap_or(CommandReply::NotReady);
    PosctxBytes::from_vec(reply.into_wire())
}

/// `ThreadScheduler.command_once(id, payload) -> Bytes`
///
/// # Safety
/// Same as `posctx_command`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn posctx_command_once(
    handle: *const Scheduler,
    id: i64,
    payload: *const u8,
    len: usize,
) -> PosctxBytes {
    let reply = unsafe { scheduler(handle, "command_once") }
        .and_then(|s| report("command_once", s.command_once(id, unsafe { input(payload, len) })))
        .unwrap_or(CommandReply::NotReady);
    PosctxBytes::from_vec(reply.into_wire())
}

/// Answer the command currently being handled
///
/// Only the last call before the handler returns counts. Returns false for
/// a null reply.
///
/// # Safety
/// `reply` must be the pointer passed to the running handler; `payload`
/// must point to `len` readable bytes or be null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn posctx_reply_set(
    reply: *mut PosctxReply,
    payload: *const u8,
    len: usize,
) -> bool {
    let Some(reply) = (unsafe { reply.as_mut() }) else {
        return false;
    };
    reply.payload = Some(unsafe { input(payload, len) }.to_vec());
    true
}

/// `ThreadScheduler.execute(id_filter, handler) -> Bool`
///
/// Calls `handler` once per claimed command, on the calling thread.
///
/// # Safety
/// `handle` must be a live scheduler or null; `handler` must be safe to call
/// with `user` for the duration of this call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn posctx_execute(
    handle: *const Scheduler,
    id_filter: i64,
    handler: Option<PosctxHandler>,
    user: *mut c_void,
) -> bool {
    let Some(scheduler) = (unsafe { scheduler(handle, "execute") }) else {
        return false;
    };
    let Some(handler) = handler else {
        set_runtime_error("execute: null handler");
        return false;
    };
    let result = scheduler.execute(id_filter, |command| {
        let mut reply = PosctxReply::default();
        unsafe { handler(user, command.as_ptr(), command.len(), &mut reply) };
        reply.payload
    });
    report("execute", result).unwrap_or(false)
}

// =============================================================================
// ThreadChannel
// =============================================================================

/// `ThreadChannel.write(role, direction, event_id, payload) -> Int`
///
/// Returns the bytes enqueued, 0 if rejected or the role is not running.
///
/// # Safety
/// `handle` must be a live scheduler or null; `payload` must point to `len`
/// readable bytes or be null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn posctx_channel_write(
    handle: *const Scheduler,
    role: i64,
    direction: i64,
    event_id: i64,
    payload: *const u8,
    len: usize,
) -> i64 {
    let Some(scheduler) = (unsafe { scheduler(handle, "channel_write") }) else {
        return 0;
    };
    let payload = unsafe { input(payload, len) };
    let result = decode_role(role).and_then(|role| {
        let direction = Direction::from_code(direction)?;
        scheduler.channel_write(role, direction, event_id, payload)
    });
    report("channel_write", result).map_or(0, |written| written as i64)
}

/// `ThreadChannel.read(role, direction, event_id) -> (event_id, Bytes?)`
///
/// The matched id is stored through `out_event_id` when non-null; without a
/// match it is `event_id` and the buffer is nil.
///
/// # Safety
/// `handle` must be a live scheduler or null; `out_event_id` must be
/// writable or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn posctx_channel_read(
    handle: *const Scheduler,
    role: i64,
    direction: i64,
    event_id: i64,
    out_event_id: *mut i64,
) -> PosctxBytes {
    let (matched, payload) = unsafe { scheduler(handle, "channel_read") }
        .and_then(|scheduler| {
            let result = decode_role(role).and_then(|role| {
                let direction = Direction::from_code(direction)?;
                scheduler.channel_read(role, direction, event_id)
            });
            report("channel_read", result)
        })
        .unwrap_or((event_id, None));
    if let Some(out) = unsafe { out_event_id.as_mut() } {
        *out = matched;
    }
    PosctxBytes::from_option(payload)
}

// =============================================================================
// ThreadPubSub
// =============================================================================

/// `ThreadPubSub.subscribe() -> Int` (slot, or -1 when all are taken)
///
/// # Safety
/// `handle` must be a live scheduler or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn posctx_subscribe(handle: *const Scheduler) -> i64 {
    let scheduler = unsafe { scheduler(handle, "subscribe") };
    scheduler
        .and_then(|s| report("subscribe", s.subscribe()))
        .flatten()
        .map_or(-1, |slot| slot as i64)
}

/// `ThreadPubSub.listen(slot) -> Bytes?`
///
/// # Safety
/// `handle` must be a live scheduler or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn posctx_listen(handle: *const Scheduler, slot: i64) -> PosctxBytes {
    let Ok(slot) = usize::try_from(slot) else {
        return PosctxBytes::NIL;
    };
    let payload = unsafe { scheduler(handle, "listen") }
        .and_then(|s| report("listen", s.listen(slot)))
        .flatten();
    PosctxBytes::from_option(payload)
}

/// `ThreadPubSub.publish(payload, avoid_slot) -> Bool`
///
/// A negative `avoid_slot` excludes nobody.
///
/// # Safety
/// `handle` must be a live scheduler or null; `payload` must point to `len`
/// readable bytes or be null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn posctx_publish(
    handle: *const Scheduler,
    payload: *const u8,
    len: usize,
    avoid_slot: i64,
) -> bool {
    let Some(scheduler) = (unsafe { scheduler(handle, "publish") }) else {
        return false;
    };
    let avoid = usize::try_from(avoid_slot).ok();
    let payload = unsafe { input(payload, len) };
    report("publish", scheduler.publish(payload, avoid)).is_some_and(|written| written > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use posctx_core::{clear_runtime_error, has_runtime_error, take_runtime_error};

    #[test]
    fn test_null_scheduler_reports_error() {
        clear_runtime_error();
        assert!(!unsafe { posctx_start(ptr::null(), 1) });
        assert!(has_runtime_error());
        assert_eq!(take_runtime_error().as_deref(), Some("start: null scheduler"));

        let reply = unsafe { posctx_command(ptr::null(), 1, ptr::null(), 0) };
        assert_eq!(unsafe { reply.as_slice() }, b"cache");
        unsafe { posctx_bytes_free(reply) };
    }

    #[test]
    fn test_unknown_role_is_false() {
        let handle = unsafe { posctx_scheduler_new() };
        clear_runtime_error();
        assert!(!unsafe { posctx_pause(handle, 9) });
        assert_eq!(take_runtime_error().as_deref(), Some("pause: unknown role 9"));
        assert_eq!(unsafe { posctx_check(handle, 9, 10) }, 0);
        unsafe { posctx_scheduler_free(handle) };
    }

    #[test]
    fn test_bytes_free_nil_is_noop() {
        unsafe { posctx_bytes_free(PosctxBytes::NIL) };
        assert!(PosctxBytes::NIL.is_nil());
    }

    #[test]
    fn test_reply_set_null() {
        assert!(!unsafe { posctx_reply_set(ptr::null_mut(), b"x".as_ptr(), 1) });
    }
}
