//! Shared tracing/logging initialization.
//!
//! Logs always go to stderr: stdout of the relay is left to the operator and
//! the child's relayed traffic must never be interleaved with log lines.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialise the global tracing subscriber.
///
/// * `default_filter` -- default `RUST_LOG` value when the env-var is not set
///   (e.g. `"mcpipe=info"`).
/// * `log_json` -- when `true`, emit structured JSON log lines instead of the
///   human-readable format.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
    );
    if log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Build the default filter directive for the given crate targets.
///
/// The level applies to every listed target so the library and binary
/// crates log at the same verbosity.
pub fn default_filter(targets: &[&str], level: &str) -> String {
    targets
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_joins_targets() {
        assert_eq!(
            default_filter(&["mcpipe", "mcpipe_daemon"], "debug"),
            "mcpipe=debug,mcpipe_daemon=debug"
        );
    }

    #[test]
    fn default_filter_single_target() {
        assert_eq!(default_filter(&["mcpipe"], "warn"), "mcpipe=warn");
    }
}
