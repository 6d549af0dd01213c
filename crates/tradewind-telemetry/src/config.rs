//! Telemetry configuration
//!
//! Read once when a [`Tracer`](crate::tracing::Tracer) or
//! [`MetricsCollector`](crate::metrics::MetricsCollector) is constructed.
//! Values layer as defaults, then an optional file (TOML, YAML or JSON by
//! extension), then `TRADEWIND__*` environment variables.

use crate::error::{TelemetryError, TelemetryResult};
use config::{Config as Cfg, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable prefix, e.g. `TRADEWIND__TRACER__SERVICE_NAME`.
pub const ENV_PREFIX: &str = "TRADEWIND";

/// Tracer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TracerConfig {
    /// Service name stamped on every span
    pub service_name: String,
    /// Register the console exporter at construction
    pub export_to_console: bool,
    /// Maximum number of traces kept in the registry; `None` keeps everything
    pub max_traces: Option<usize>,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            service_name: "tradewind".to_string(),
            export_to_console: false,
            max_traces: Some(10_000),
        }
    }
}

impl TracerConfig {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    pub fn with_console_export(mut self, enabled: bool) -> Self {
        self.export_to_console = enabled;
        self
    }

    pub fn with_max_traces(mut self, max_traces: Option<usize>) -> Self {
        self.max_traces = max_traces;
        self
    }
}

/// Metrics collector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Points kept per gauge series
    pub gauge_series_capacity: usize,
    /// Points kept per histogram observation series
    pub observation_series_capacity: usize,
    /// Pick bucket sets for unregistered histograms from the metric name
    pub infer_buckets_from_name: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            gauge_series_capacity: 1000,
            observation_series_capacity: 10_000,
            infer_buckets_from_name: true,
        }
    }
}

impl MetricsConfig {
    pub fn with_gauge_series_capacity(mut self, capacity: usize) -> Self {
        self.gauge_series_capacity = capacity;
        self
    }

    pub fn with_observation_series_capacity(mut self, capacity: usize) -> Self {
        self.observation_series_capacity = capacity;
        self
    }

    pub fn with_bucket_inference(mut self, enabled: bool) -> Self {
        self.infer_buckets_from_name = enabled;
        self
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON lines instead of the human-readable format
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Top-level telemetry configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub tracer: TracerConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
}

impl TelemetryConfig {
    /// Load from a single file, format detected from the extension.
    pub fn from_file(path: impl AsRef<Path>) -> TelemetryResult<Self> {
        let path = path.as_ref();
        let format = detect_format(path)?;
        let content = std::fs::read_to_string(path)
            .map_err(|e| TelemetryError::Config(format!("{}: {}", path.display(), e)))?;

        Cfg::builder()
            .add_source(File::from_str(&content, format))
            .build()?
            .try_deserialize()
            .map_err(Into::into)
    }

    /// Layer defaults, an optional file, and `TRADEWIND__*` environment overrides.
    pub fn load(path: Option<&Path>) -> TelemetryResult<Self> {
        let mut builder = Cfg::builder();

        if let Some(path) = path {
            let format = detect_format(path)?;
            builder = builder.add_source(File::from(path).format(format));
        }

        builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
            .map_err(Into::into)
    }
}

fn detect_format(path: &Path) -> TelemetryResult<FileFormat> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| TelemetryError::Config("No file extension found".to_string()))?;

    match ext.to_lowercase().as_str() {
        "yaml" | "yml" => Ok(FileFormat::Yaml),
        "toml" => Ok(FileFormat::Toml),
        "json" => Ok(FileFormat::Json),
        other => Err(TelemetryError::Config(format!(
            "Unsupported config format: {}",
            other
        ))),
    }
}
