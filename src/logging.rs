//! Tracing subscriber setup.
//!
//! The library itself only emits `tracing` events; binaries and tests that
//! want to see them call [`init`] once at startup.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is not set
pub const DEFAULT_FILTER: &str = "info,blobdrain=debug";

/// Install a global fmt subscriber filtered by `RUST_LOG`, falling back to
/// `default_filter` (or [`DEFAULT_FILTER`]).
///
/// Returns `false` if a global subscriber was already installed, so tests
/// can call this repeatedly.
pub fn init(default_filter: Option<&str>) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter.unwrap_or(DEFAULT_FILTER)));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice() {
        let _ = init(Some("warn"));
        assert!(!init(None));
    }
}
