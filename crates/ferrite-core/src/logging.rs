//! Logging integration for the ferrite ORM.
//!
//! Provides helpers for configuring [`tracing`]-based logging and for
//! creating per-statement spans around SQL execution.

/// Sets up the global tracing subscriber.
///
/// The filter directive is taken from the `FERRITE_LOG` environment variable
/// (falling back to `level` when unset). With `pretty` a human-readable
/// format is used; otherwise a structured JSON format suitable for log
/// aggregation.
///
/// Installing a second subscriber is a no-op rather than a panic so tests
/// can call this freely.
pub fn setup_logging(level: &str, pretty: bool) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_env("FERRITE_LOG")
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if pretty {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .pretty()
            .try_init()
            .ok();
    } else {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .try_init()
            .ok();
    }
}

/// Creates a tracing span for one SQL statement.
///
/// Enter this span around a driver round-trip so all log entries emitted
/// while the statement runs include the statement kind.
///
/// # Examples
///
/// ```
/// use ferrite_core::logging::statement_span;
///
/// let span = statement_span("insert");
/// let _guard = span.enter();
/// tracing::debug!("executing");
/// ```
pub fn statement_span(kind: &str) -> tracing::Span {
    tracing::debug_span!("statement", kind = kind)
}
