//! Logging setup with recordstore segment prefixes.
//!
//! The engine only emits `tracing` events; installing a subscriber is left to
//! the embedding application. [`init`] is a convenience for binaries and tests.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize tracing with recordstore defaults.
///
/// Sets up tracing-subscriber with:
/// - Environment filter (RUST_LOG)
/// - Compact format suitable for terminal output
pub fn init() -> bool {
    init_with_filter("info")
}

/// Initialize tracing with a custom default filter.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_with_filter(default_filter: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .try_init()
        .is_ok()
}

/// Segment prefixes for store lifecycle logging.
pub mod prefix {
    /// Store provisioned or opened
    pub const OPEN: &str = "✿";
    /// Store closed or removed
    pub const CLOSE: &str = "❀";
    /// Store-wide maintenance (rekey, purge)
    pub const DB: &str = "⊔";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_reports_existing_subscriber() {
        init_with_filter("debug");
        assert!(!init());
    }
}
