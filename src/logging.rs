//! Tracing setup shared by the binaries.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Installs a fmt subscriber. `RUST_LOG` wins over `default_filter`.
///
/// Calling this twice (e.g. from tests) is harmless; the second call is ignored.
pub fn init(default_filter: &str) {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

/// Default filter for a binary: crate diagnostics at `info` (or `debug` when
/// verbose), everything else at `warn`.
pub fn default_filter(binary: &str, verbose: bool) -> String {
    let level = if verbose { "debug" } else { "info" };
    format!("warn,clipscout_tools={level},{binary}={level}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_parses() {
        let filter = default_filter("backend", true);
        assert_eq!(filter, "warn,clipscout_tools=debug,backend=debug");
        assert!(EnvFilter::try_new(&filter).is_ok());
        assert!(EnvFilter::try_new(default_filter("collect", false)).is_ok());
    }
}
