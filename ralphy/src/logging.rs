//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

/// Variable checked before `RUST_LOG`.
pub const LOG_ENV: &str = "RALPHY_LOG";

/// Filter directive: `RALPHY_LOG`, else `RUST_LOG`, else `warn` (`debug`
/// with `--verbose`).
pub fn filter_directive(verbose: bool, lookup: impl Fn(&str) -> Option<String>) -> String {
    lookup(LOG_ENV)
        .or_else(|| lookup("RUST_LOG"))
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| if verbose { "ralphy=debug" } else { "warn" }.to_string())
}

/// Install the global subscriber. Logs go to stderr so stdout stays clean.
pub fn init_logging(verbose: bool, json: bool) {
    let directive = filter_directive(verbose, |key| std::env::var(key).ok());
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("warn"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(e) = result {
        eprintln!("Failed to initialize logging: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive() {
        assert_eq!(filter_directive(false, |_| None), "warn");
        assert_eq!(filter_directive(true, |_| None), "ralphy=debug");
    }

    #[test]
    fn test_ralphy_log_wins_over_rust_log() {
        let lookup = |key: &str| match key {
            "RALPHY_LOG" => Some("ralphy=trace".to_string()),
            "RUST_LOG" => Some("info".to_string()),
            _ => None,
        };
        assert_eq!(filter_directive(false, lookup), "ralphy=trace");
    }

    #[test]
    fn test_blank_env_falls_back() {
        let lookup = |key: &str| (key == "RALPHY_LOG").then(|| "  ".to_string());
        assert_eq!(filter_directive(true, lookup), "ralphy=debug");
    }
}
