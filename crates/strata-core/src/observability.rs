//! Observability infrastructure: structured logging with consistent spans.
//!
//! Provides the process-wide logging initializer and span constructors
//! used across the ingestion pipeline and catalog components.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `strata_ingest=debug`)
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .init();
            }
        }
    });
}

/// Creates a span for ingestion operations with standard fields.
#[must_use]
pub fn ingest_span(operation: &str, workflow: &str, collection: &str) -> Span {
    tracing::info_span!(
        "ingest",
        op = operation,
        workflow = workflow,
        collection = collection,
    )
}

/// Creates a span for catalog operations with standard fields.
#[must_use]
pub fn catalog_span(operation: &str, store: &str) -> Span {
    tracing::info_span!("catalog", op = operation, store = store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_logging_is_idempotent() {
        init_logging(LogFormat::Pretty);
        init_logging(LogFormat::Pretty);
    }

    #[test]
    fn span_helpers_create_spans() {
        let span = ingest_span("aggregate", "rnaseq", "metadata");
        let _guard = span.enter();
        tracing::info!("test message in span");

        let span = catalog_span("register", "prod");
        let _guard2 = span.enter();
        tracing::info!("catalog message");
    }
}
