//! Small ambient helpers shared by the binaries and crates in this
//! workspace: version/build info, default timing constants, and tracing
//! setup. Deliberately thin - this crate has no reconciliation logic in it.

pub mod tracing_telemetry;

pub use tracing_telemetry::init_tracing;

/// Default period between state-discovery polls of a project (§4.2).
pub const DEFAULT_DISCOVERY_PERIOD: &str = "30s";
/// Default TTL for a cached `ProjectState` entry (§4.9).
pub const DEFAULT_CACHE_TTL: &str = "5m";
/// Default interval at which the cache sweeps expired entries (§4.9).
pub const DEFAULT_CACHE_SWEEP_PERIOD: &str = "1m";
/// Default per-operation timeout before the executor gives up (§4.6).
pub const DEFAULT_OPERATION_TIMEOUT: &str = "30m";
/// Default base delay for the retry manager's exponential backoff (§4.7).
pub const DEFAULT_RETRY_BASE_DELAY: &str = "500ms";
/// Default ceiling for the retry manager's exponential backoff (§4.7).
pub const DEFAULT_RETRY_MAX_DELAY: &str = "30s";
/// Default rate-limiter refill period for one token (§4.1).
pub const DEFAULT_RATE_LIMIT_REFILL_PERIOD: &str = "1s";

/// Returns the crate's name and version, e.g. `atlas-reconciler 0.1.0`, for
/// use in CLI banners and user-agent strings.
#[macro_export]
macro_rules! package_description {
    () => {
        concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"))
    };
}

/// Returns a long version string embedding the build's git commit, for
/// `--version` output and startup log lines.
#[macro_export]
macro_rules! version_info_str {
    () => {
        concat!(
            env!("CARGO_PKG_VERSION"),
            " (",
            $crate::git_version::git_version!(fallback = "unknown"),
            ")"
        )
    };
}

pub use git_version;

#[cfg(test)]
mod tests {
    #[test]
    fn package_description_includes_crate_name() {
        let description = package_description!();
        assert!(description.contains(env!("CARGO_PKG_NAME")));
    }
}
