//! Console logging setup.
//!
//! Logs go to stderr so command output on stdout stays machine readable.
//! Game output is emitted under the `minecraft` target.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info";

/// Filter priority: `filter` argument, then `RUST_LOG`, then `info`.
fn build_filter(filter: Option<&str>) -> EnvFilter {
    filter
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

/// Installs the global subscriber. Later calls are no-ops.
pub fn init_logging(filter: Option<&str>) {
    tracing_subscriber::registry()
        .with(build_filter(filter))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .compact(),
        )
        .try_init()
        .ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_filter_wins() {
        assert_eq!(build_filter(Some("minecraft=debug")).to_string(), "minecraft=debug");
    }

    #[test]
    fn repeated_init_is_harmless() {
        init_logging(Some("warn"));
        init_logging(None);
    }
}
