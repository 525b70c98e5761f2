//! Process-wide logging setup. The core only emits `tracing` spans and
//! events; wiring them to a subscriber is a one-line call left to whatever
//! binary embeds this crate.

use tracing_subscriber::EnvFilter;

/// Installs a `tracing-subscriber` formatter honoring `RUST_LOG`, falling
/// back to `info` when unset. Safe to call once at process start; a second
/// call is a no-op (the global subscriber can only be set once).
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
