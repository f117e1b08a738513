//! Structured logging setup for hosts that want this crate to own its own
//! `tracing` subscriber. A host embedding namefix-core alongside its own
//! subscriber should skip this and just let `tracing` events propagate.

use tracing_subscriber::EnvFilter;

/// Install a global subscriber reading its filter from `NAMEFIX_LOG`,
/// falling back to `RUST_LOG`, falling back to `info`.
pub fn init() {
    let filter = EnvFilter::try_from_env("NAMEFIX_LOG")
        .or_else(|_| EnvFilter::try_from_env("RUST_LOG"))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
