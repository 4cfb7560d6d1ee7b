//! Logging bootstrap.

use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Environment variable that forces debug logging when set to a non-empty value.
pub const DEBUG_ENV: &str = "FEDERATION_DEBUG";

/// Filter directive for the configured level, honoring `FEDERATION_DEBUG`.
pub fn filter_directive(log_level: &str, debug_flag: Option<&str>) -> String {
    match debug_flag {
        Some(flag) if !flag.trim().is_empty() => "debug".to_string(),
        _ => log_level.to_string(),
    }
}

/// Install the global subscriber. `RUST_LOG` takes precedence when set.
pub fn init(log_level: &str) {
    let debug_flag = std::env::var(DEBUG_ENV).ok();
    let directive = filter_directive(log_level, debug_flag.as_deref());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directive() {
        assert_eq!(filter_directive("info", None), "info");
        assert_eq!(filter_directive("warn", Some("")), "warn");
        assert_eq!(filter_directive("info", Some("1")), "debug");
    }
}
