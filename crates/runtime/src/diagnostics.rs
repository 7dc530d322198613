//! Runtime diagnostics for production debugging
//!
//! Provides a SIGQUIT (kill -3) handler that dumps the state of every live
//! scheduler to stderr: role statuses, channel depths, outstanding commands
//! and subscriber slots. The process keeps running.
//!
//! ```bash
//! kill -3 <pid>
//! POSCTX_REPORT=json kill -3 <pid>   # same, as JSON
//! ```
//!
//! ## Signal Safety
//!
//! `dump_diagnostics` does I/O and takes locks, which is not allowed inside
//! a signal handler. A dedicated thread waits for signals through
//! signal-hook's iterator API and does the dump from ordinary context.
//!
//! Schedulers are tracked by `Weak` reference, so watching one never keeps
//! it alive.

use crate::scheduler::Scheduler;
use crate::snapshot::ReportFormat;
use std::sync::{Arc, Mutex, Once, PoisonError, Weak};

static SIGNAL_HANDLER_INIT: Once = Once::new();
static WATCHED: Mutex<Vec<Weak<Scheduler>>> = Mutex::new(Vec::new());

/// Include `scheduler` in diagnostic dumps
pub fn watch(scheduler: &Arc<Scheduler>) {
    let mut watched = WATCHED.lock().unwrap_or_else(PoisonError::into_inner);
    watched.retain(|weak| weak.strong_count() > 0);
    watched.push(Arc::downgrade(scheduler));
}

/// Number of watched schedulers still alive
pub fn watched_count() -> usize {
    let watched = WATCHED.lock().unwrap_or_else(PoisonError::into_inner);
    watched.iter().filter(|weak| weak.strong_count() > 0).count()
}

/// Install the SIGQUIT signal handler for diagnostics
///
/// Called from `posctx_scheduler_new`. Safe to call multiple times.
pub fn install_signal_handler() {
    SIGNAL_HANDLER_INIT.call_once(|| {
        #[cfg(all(unix, feature = "diagnostics"))]
        {
            use signal_hook::consts::SIGQUIT;
            use signal_hook::iterator::Signals;

            let mut signals = match Signals::new([SIGQUIT]) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to register SIGQUIT handler");
                    return;
                }
            };

            if let Err(e) = std::thread::Builder::new()
                .name("posctx-diagnostics".to_string())
                .spawn(move || {
                    for sig in signals.forever() {
                        if sig == SIGQUIT {
                            dump_diagnostics();
                        }
                    }
                })
            {
                tracing::warn!(error = %e, "failed to start diagnostics thread");
            }
        }
    });
}

/// Render every watched scheduler in the given format
pub fn render_diagnostics(format: ReportFormat) -> String {
    let live: Vec<Arc<Scheduler>> = {
        let watched = WATCHED.lock().unwrap_or_else(PoisonError::into_inner);
        watched.iter().filter_map(Weak::upgrade).collect()
    };

    let mut out = String::from("\n=== Posctx Runtime Diagnostics ===\n");
    out.push_str(&format!("Timestamp: {:?}\n", std::time::SystemTime::now()));
    if live.is_empty() {
        out.push_str("  (no live schedulers)\n");
    }
    for (index, scheduler) in live.iter().enumerate() {
        out.push_str(&format!("\n--- Scheduler #{} ---\n", index + 1));
        match scheduler.snapshot() {
            Ok(snapshot) => {
                out.push_str(&snapshot.render(format));
                out.push('\n');
            }
            Err(e) => out.push_str(&format!("  snapshot unavailable: {}\n", e)),
        }
    }
    out.push_str("=== End Diagnostics ===\n");
    out
}

/// Dump diagnostics to stderr
pub fn dump_diagnostics() {
    use std::io::Write;

    let report = render_diagnostics(ReportFormat::from_env());
    let _ = std::io::stderr().lock().write_all(report.as_bytes());
}
