//! Metrics aggregation: counters, gauges and bucketed histograms addressed
//! by name and labels, plus trading-domain recorders and reports.

mod collector;
mod histogram;
mod key;
mod series;
mod trading;

pub use collector::{
    GaugeSnapshot, MetricDefinition, MetricType, MetricValue, MetricsCollector, MetricsSummary,
    global_metrics, set_global_metrics,
};
pub use histogram::{BucketSet, HistogramBuckets, HistogramStats};
pub use key::MetricKey;
pub use series::TimeSeries;
pub use trading::{
    AgentMetricsReport, GuardrailSummary, PortfolioSnapshot, PortfolioSummary, SignalSummary,
    TradeRecord, TradeSide, TradeSummary, TradingDashboard, WorkflowSummary,
};
