//! Wires `tracing` output for the service's binaries: a `fmt` layer filtered by
//! `RUST_LOG`, defaulting to `info` when the variable is unset.

use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global subscriber. Idempotent per-process; call once from `main`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(true).init();
}
