//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! The library itself only emits `tracing` events; installing a subscriber
//! is the embedder's choice. This helper covers the common case:
//! `PIPEWRIGHT_LOG` picks the level (e.g. "info", "debug"), defaulting to
//! `info`.

use tracing_subscriber::fmt;

/// Initialise a global logging subscriber.
///
/// Call at most once at startup; panics if a subscriber is already set.
pub fn init_logging(level: Option<tracing::Level>) {
    let level = level.unwrap_or_else(|| {
        std::env::var("PIPEWRIGHT_LOG")
            .ok()
            .and_then(|s| parse_level(&s))
            .unwrap_or(tracing::Level::INFO)
    });

    fmt()
        .with_max_level(level)
        .with_target(true)
        .init();
}

fn parse_level(s: &str) -> Option<tracing::Level> {
    match s.trim().to_lowercase().as_str() {
        "error" => Some(tracing::Level::ERROR),
        "warn" | "warning" => Some(tracing::Level::WARN),
        "info" => Some(tracing::Level::INFO),
        "debug" => Some(tracing::Level::DEBUG),
        "trace" => Some(tracing::Level::TRACE),
        _ => None,
    }
}
