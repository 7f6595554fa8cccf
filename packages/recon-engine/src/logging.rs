//! Structured logging initialization, in the teacher's `tracing` +
//! `tracing-subscriber` idiom: one `init()` the binary calls once at
//! startup, env-filterable, falling back to `info` when `RUST_LOG` is
//! unset.

use tracing_subscriber::EnvFilter;

/// Install a global `tracing` subscriber reading `RUST_LOG`, defaulting
/// to `info` for this crate and `warn` everywhere else. Safe to call at
/// most once per process; a second call is a no-op (the error from
/// `try_init` is swallowed).
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,recon_engine=debug"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
