//! Tradewind Telemetry - in-process tracing and metrics for trading agents
//!
//! This crate provides the observability core of the Tradewind platform:
//! - Hierarchical span tracing with explicit or ambient context
//! - Agent and workflow tracing conventions
//! - Counters, gauges and bucketed histograms keyed by labels
//! - Trading dashboards and per-agent reports
//!
//! # Example
//!
//! ```rust
//! use tradewind_telemetry::{MetricsCollector, SpanKind, TracerConfig, create_default_tracing};
//! use tradewind_telemetry::tracing::Attributes;
//!
//! let (tracer, agents, _workflows) = create_default_tracing(TracerConfig::new("desk"));
//! let metrics = MetricsCollector::default();
//!
//! let signal: Result<f64, String> =
//!     agents.trace_agent_call("quant-1", "score", &serde_json::json!({"symbol": "AAPL"}), |_| {
//!         tracer.in_span("features", SpanKind::Internal, Attributes::new(), |_| Ok(0.8))
//!     });
//! metrics.record_signal("AAPL", "momentum", signal.unwrap(), "quant-1");
//!
//! assert_eq!(tracer.get_recent_traces(1)[0].total_spans, 2);
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod tracing;

pub use config::{LoggingConfig, MetricsConfig, TelemetryConfig, TracerConfig};
pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::{
    AgentMetricsReport, BucketSet, HistogramStats, MetricDefinition, MetricType, MetricValue,
    MetricsCollector, MetricsSummary, PortfolioSnapshot, TradeRecord, TradeSide, TradingDashboard,
    global_metrics, set_global_metrics,
};
pub use tracing::{
    AgentTracer, ExecutionContext, Span, SpanExporter, SpanKind, SpanStatus, TraceSummary, Tracer,
    WorkflowPerformance, WorkflowTracer, create_default_tracing, global_tracer, set_global_tracer,
};
