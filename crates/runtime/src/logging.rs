//! Logging setup
//!
//! Installs a `tracing` subscriber writing to stderr, filtered by the
//! `POSCTX_LOG` environment variable (same syntax as `RUST_LOG`, default
//! `warn`). Hosts that install their own subscriber first keep it.

use std::sync::Once;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter
pub const LOG_ENV: &str = "POSCTX_LOG";

const DEFAULT_FILTER: &str = "warn";

static LOGGING_INIT: Once = Once::new();

pub fn init_logging() {
    LOGGING_INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
        let installed = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
        if installed.is_ok() {
            tracing::debug!("posctx logging initialized");
        }
    });
}
