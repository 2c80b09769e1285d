//! Logging setup.
//!
//! `RUST_LOG` wins when set; otherwise the filter follows `-q` / `-v`.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter directive for a verbosity level.
pub fn default_filter(quiet: bool, verbosity: u8) -> &'static str {
    if quiet {
        return "warn";
    }
    match verbosity {
        0 => "info",
        1 => "info,castbridge=debug,tower_http=debug",
        _ => "debug,castbridge=trace",
    }
}

/// Install the global subscriber. Later calls are ignored.
pub fn init(quiet: bool, verbosity: u8) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(quiet, verbosity)));

    let result = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();

    if let Err(e) = result {
        tracing::debug!("Logging already initialised: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiet_wins_over_verbose() {
        assert_eq!(default_filter(true, 2), "warn");
    }

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(default_filter(false, 0), "info");
        assert!(default_filter(false, 1).contains("castbridge=debug"));
        assert!(default_filter(false, 5).contains("castbridge=trace"));
    }

    #[test]
    fn test_filters_parse() {
        for (quiet, verbosity) in [(true, 0), (false, 0), (false, 1), (false, 2)] {
            assert!(EnvFilter::try_new(default_filter(quiet, verbosity)).is_ok());
        }
    }

    #[test]
    fn test_init_twice_does_not_panic() {
        init(false, 0);
        init(true, 0);
    }
}
