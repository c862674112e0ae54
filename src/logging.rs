//! Tracing subscriber setup. Logs go to stderr; stdout carries command output.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Environment variable holding an `EnvFilter` directive.
pub const LOG_ENV: &str = "STAGEHAND_LOG";

/// Directive used when `STAGEHAND_LOG` is unset.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "stagehand=debug"
    } else {
        "stagehand=info"
    }
}

/// Install the global subscriber. A second call is a no-op.
pub fn init_tracing(verbose: bool, json: bool) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    let _ = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false),
            )
            .try_init()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive() {
        assert_eq!(default_directive(false), "stagehand=info");
        assert_eq!(default_directive(true), "stagehand=debug");
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init_tracing(false, false);
        init_tracing(true, true);
    }
}
