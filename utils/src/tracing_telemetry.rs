//! Tracing subscriber setup. No span-exporting backend is wired up here:
//! this is a library workspace with no process boundary to hand spans
//! across, so plain structured fmt output is all a caller needs.

use tracing_subscriber::{fmt, EnvFilter};

/// Installs a global `tracing` subscriber reading its filter from
/// `RUST_LOG`, falling back to `default_level` (e.g. `"info"`) when unset.
///
/// Safe to call more than once; subsequent calls are ignored rather than
/// panicking, since test harnesses commonly call this from every test.
pub fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = fmt().with_env_filter(filter).with_target(true).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_tracing_is_idempotent() {
        init_tracing("debug");
        init_tracing("debug");
    }
}
