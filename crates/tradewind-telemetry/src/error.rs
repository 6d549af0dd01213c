//! Typed errors for the telemetry core.
//!
//! Most misuse (unknown workflow ids, no current span) is a silent no-op;
//! only the cases a caller can act on are surfaced here.

use crate::tracing::SpanId;
use thiserror::Error;

/// Errors reported by the tracer, the metrics collector, and config loading.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TelemetryError {
    /// Configuration could not be loaded or parsed.
    #[error("Config error: {0}")]
    Config(String),

    /// An exporter failed to handle an ended span.
    #[error("Export error: {0}")]
    Export(String),

    /// A span was ended while spans opened after it were still open.
    #[error("Span {ended} ended out of nesting order (current span is {current})")]
    OutOfOrderEnd { ended: SpanId, current: SpanId },

    /// A span was ended twice.
    #[error("Span {0} was already ended")]
    SpanAlreadyEnded(SpanId),

    /// A metric name was registered again under a different type.
    #[error("Metric '{name}' is registered as {registered}, not {requested}")]
    MetricTypeConflict {
        name: String,
        registered: String,
        requested: String,
    },

    /// Histogram boundaries were empty, non-finite, or not strictly ascending.
    #[error("Invalid histogram buckets: {0}")]
    InvalidBuckets(String),

    /// A (de)serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience result alias for the telemetry core.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

impl From<config::ConfigError> for TelemetryError {
    fn from(err: config::ConfigError) -> Self {
        TelemetryError::Config(err.to_string())
    }
}
