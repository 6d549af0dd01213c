//! Trading domain metrics
//!
//! Convenience recorders over the collector primitives. Each recorder takes
//! the collector lock once, so its writes land together.

use super::collector::{MetricDefinition, MetricStore, MetricsCollector};
use super::histogram::{BucketSet, HistogramStats};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

const SIGNALS_GENERATED: &str = "signals_generated_total";
const SIGNAL_CONFIDENCE: &str = "signal_confidence";
const TRADES_EXECUTED: &str = "trades_executed_total";
const TRADE_VOLUME: &str = "trade_volume_total";
const TRADE_VALUE: &str = "trade_value";
const TRADE_LATENCY: &str = "trade_latency_ms";
const TRADE_SLIPPAGE: &str = "trade_slippage_bps";
const TRADE_PNL: &str = "trade_pnl_bps";
const AGENT_REQUESTS: &str = "agent_requests_total";
const AGENT_LATENCY: &str = "agent_request_latency_ms";
const AGENT_ERRORS: &str = "agent_errors_total";
const AGENT_TOKENS: &str = "agent_tokens_total";
const WORKFLOW_EXECUTIONS: &str = "workflow_executions_total";
const WORKFLOW_DURATION: &str = "workflow_duration_ms";
const WORKFLOW_STEPS: &str = "workflow_last_steps_completed";
const GUARDRAIL_CHECKS: &str = "guardrail_checks_total";
const GUARDRAIL_VIOLATIONS: &str = "guardrail_violations_total";
const PORTFOLIO_VALUE: &str = "portfolio_value";
const PORTFOLIO_CASH: &str = "portfolio_cash";
const PORTFOLIO_POSITIONS: &str = "portfolio_positions";
const PORTFOLIO_DAILY_PNL: &str = "portfolio_daily_pnl";
const PORTFOLIO_GROSS_EXPOSURE: &str = "portfolio_gross_exposure";

pub(crate) fn register_domain_metrics(store: &mut MetricStore) {
    let definitions = [
        MetricDefinition::counter(SIGNALS_GENERATED, "Trading signals generated")
            .with_labels(&["symbol", "signal_type", "agent_id"]),
        MetricDefinition::histogram(SIGNAL_CONFIDENCE, "Signal confidence", BucketSet::unit_interval())
            .with_labels(&["signal_type"]),
        MetricDefinition::counter(TRADES_EXECUTED, "Trades executed").with_labels(&["symbol", "side"]),
        MetricDefinition::counter(TRADE_VOLUME, "Traded quantity")
            .with_unit("shares")
            .with_labels(&["symbol"]),
        MetricDefinition::histogram(TRADE_VALUE, "Trade notional", BucketSet::magnitude())
            .with_unit("usd")
            .with_labels(&["side"]),
        MetricDefinition::histogram(TRADE_LATENCY, "Order to fill latency", BucketSet::latency_ms())
            .with_unit("ms")
            .with_labels(&["side"]),
        MetricDefinition::histogram(TRADE_SLIPPAGE, "Execution slippage", BucketSet::returns_bps())
            .with_unit("bps")
            .with_labels(&["side"]),
        MetricDefinition::histogram(TRADE_PNL, "Realized trade PnL", BucketSet::returns_bps())
            .with_unit("bps")
            .with_labels(&["symbol"]),
        MetricDefinition::counter(AGENT_REQUESTS, "Agent requests")
            .with_labels(&["agent_id", "request_type", "status"]),
        MetricDefinition::histogram(AGENT_LATENCY, "Agent request latency", BucketSet::latency_ms())
            .with_unit("ms")
            .with_labels(&["agent_id"]),
        MetricDefinition::counter(AGENT_ERRORS, "Failed agent requests").with_labels(&["agent_id"]),
        MetricDefinition::counter(AGENT_TOKENS, "LLM tokens used by agents")
            .with_unit("tokens")
            .with_labels(&["agent_id"]),
        MetricDefinition::counter(WORKFLOW_EXECUTIONS, "Workflow executions")
            .with_labels(&["workflow_type", "status"]),
        MetricDefinition::histogram(WORKFLOW_DURATION, "Workflow duration", BucketSet::latency_ms())
            .with_unit("ms")
            .with_labels(&["workflow_type"]),
        MetricDefinition::gauge(WORKFLOW_STEPS, "Steps completed by the last workflow run")
            .with_labels(&["workflow_type"]),
        MetricDefinition::counter(GUARDRAIL_CHECKS, "Guardrail checks").with_labels(&["guardrail", "result"]),
        MetricDefinition::counter(GUARDRAIL_VIOLATIONS, "Guardrail violations")
            .with_labels(&["guardrail", "severity"]),
        MetricDefinition::gauge(PORTFOLIO_VALUE, "Total portfolio value").with_unit("usd"),
        MetricDefinition::gauge(PORTFOLIO_CASH, "Cash balance").with_unit("usd"),
        MetricDefinition::gauge(PORTFOLIO_POSITIONS, "Open positions"),
        MetricDefinition::gauge(PORTFOLIO_DAILY_PNL, "Daily PnL").with_unit("usd"),
        MetricDefinition::gauge(PORTFOLIO_GROSS_EXPOSURE, "Gross exposure").with_unit("usd"),
    ];
    for definition in definitions {
        if let Err(e) = store.register(definition) {
            warn!("Failed to register domain metric: {}", e);
        }
    }
}

/// Trade side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "buy",
            TradeSide::Sell => "sell",
        }
    }
}

/// One executed trade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: String,
    pub side: TradeSide,
    pub quantity: f64,
    pub price: f64,
    pub latency_ms: f64,
    pub slippage_bps: Option<f64>,
    pub pnl_bps: Option<f64>,
}

impl TradeRecord {
    pub fn new(symbol: impl Into<String>, side: TradeSide, quantity: f64, price: f64, latency_ms: f64) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity,
            price,
            latency_ms,
            slippage_bps: None,
            pnl_bps: None,
        }
    }

    pub fn with_slippage_bps(mut self, slippage_bps: f64) -> Self {
        self.slippage_bps = Some(slippage_bps);
        self
    }

    pub fn with_pnl_bps(mut self, pnl_bps: f64) -> Self {
        self.pnl_bps = Some(pnl_bps);
        self
    }
}

/// Point-in-time portfolio state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub total_value: f64,
    pub cash: f64,
    pub positions: u32,
    pub daily_pnl: f64,
    pub gross_exposure: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalSummary {
    pub total: f64,
    pub by_type: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeSummary {
    pub total: f64,
    pub by_side: BTreeMap<String, f64>,
    pub volume: f64,
    pub latency: Option<HistogramStats>,
    pub slippage: Option<HistogramStats>,
    pub pnl: Option<HistogramStats>,
}

/// Latest portfolio gauges; `None` until first reported
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSummary {
    pub value: Option<f64>,
    pub cash: Option<f64>,
    pub positions: Option<f64>,
    pub daily_pnl: Option<f64>,
    pub gross_exposure: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardrailSummary {
    pub checks: f64,
    pub violations: f64,
    /// Share of checks that passed; 0 when nothing was checked
    pub pass_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub executions: f64,
    pub successes: f64,
    /// 0 when nothing ran
    pub success_rate: f64,
    pub duration: Option<HistogramStats>,
}

/// Trading dashboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingDashboard {
    pub timestamp: DateTime<Utc>,
    pub signals: SignalSummary,
    pub trades: TradeSummary,
    pub portfolio: PortfolioSummary,
    pub guardrails: GuardrailSummary,
    pub workflows: WorkflowSummary,
}

/// Per-agent report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMetricsReport {
    pub agent_id: String,
    pub total_requests: f64,
    pub successful_requests: f64,
    pub failed_requests: f64,
    pub error_rate: f64,
    pub tokens_used: f64,
    pub latency: Option<HistogramStats>,
}

fn ratio(part: f64, whole: f64) -> f64 {
    if whole > 0.0 { part / whole } else { 0.0 }
}

fn status_label(success: bool) -> &'static str {
    if success { "success" } else { "error" }
}

impl MetricsCollector {
    /// Record a generated trading signal
    pub fn record_signal(&self, symbol: &str, signal_type: &str, confidence: f64, agent_id: &str) {
        let mut store = self.store.lock();
        store.increment(
            SIGNALS_GENERATED,
            1.0,
            &[("symbol", symbol), ("signal_type", signal_type), ("agent_id", agent_id)],
        );
        store.observe(SIGNAL_CONFIDENCE, confidence, &[("signal_type", signal_type)]);
    }

    /// Record an executed trade
    pub fn record_trade(&self, trade: &TradeRecord) {
        let side = trade.side.as_str();
        let mut store = self.store.lock();
        store.increment(TRADES_EXECUTED, 1.0, &[("symbol", trade.symbol.as_str()), ("side", side)]);
        store.increment(TRADE_VOLUME, trade.quantity, &[("symbol", trade.symbol.as_str())]);
        store.observe(TRADE_VALUE, trade.quantity * trade.price, &[("side", side)]);
        store.observe(TRADE_LATENCY, trade.latency_ms, &[("side", side)]);
        if let Some(slippage) = trade.slippage_bps {
            store.observe(TRADE_SLIPPAGE, slippage, &[("side", side)]);
        }
        if let Some(pnl) = trade.pnl_bps {
            store.observe(TRADE_PNL, pnl, &[("symbol", trade.symbol.as_str())]);
        }
    }

    /// Record one agent request
    pub fn record_agent_request(
        &self,
        agent_id: &str,
        request_type: &str,
        duration_ms: f64,
        success: bool,
        tokens: Option<u64>,
    ) {
        let mut store = self.store.lock();
        store.increment(
            AGENT_REQUESTS,
            1.0,
            &[
                ("agent_id", agent_id),
                ("request_type", request_type),
                ("status", status_label(success)),
            ],
        );
        store.observe(AGENT_LATENCY, duration_ms, &[("agent_id", agent_id)]);
        if !success {
            store.increment(AGENT_ERRORS, 1.0, &[("agent_id", agent_id)]);
        }
        if let Some(tokens) = tokens {
            store.increment(AGENT_TOKENS, tokens as f64, &[("agent_id", agent_id)]);
        }
    }

    /// Record one finished workflow run
    pub fn record_workflow_execution(
        &self,
        workflow_type: &str,
        duration_ms: f64,
        success: bool,
        steps_completed: u32,
    ) {
        let mut store = self.store.lock();
        store.increment(
            WORKFLOW_EXECUTIONS,
            1.0,
            &[("workflow_type", workflow_type), ("status", status_label(success))],
        );
        store.observe(WORKFLOW_DURATION, duration_ms, &[("workflow_type", workflow_type)]);
        store.set_gauge(WORKFLOW_STEPS, steps_completed as f64, &[("workflow_type", workflow_type)]);
    }

    /// Record a guardrail check; failures also count as a violation at `severity`
    pub fn record_guardrail_check(&self, guardrail: &str, passed: bool, severity: &str) {
        let mut store = self.store.lock();
        let result = if passed { "pass" } else { "fail" };
        store.increment(GUARDRAIL_CHECKS, 1.0, &[("guardrail", guardrail), ("result", result)]);
        if !passed {
            store.increment(
                GUARDRAIL_VIOLATIONS,
                1.0,
                &[("guardrail", guardrail), ("severity", severity)],
            );
        }
    }

    pub fn update_portfolio_metrics(&self, snapshot: &PortfolioSnapshot) {
        let mut store = self.store.lock();
        store.set_gauge(PORTFOLIO_VALUE, snapshot.total_value, &[]);
        store.set_gauge(PORTFOLIO_CASH, snapshot.cash, &[]);
        store.set_gauge(PORTFOLIO_POSITIONS, snapshot.positions as f64, &[]);
        store.set_gauge(PORTFOLIO_DAILY_PNL, snapshot.daily_pnl, &[]);
        store.set_gauge(PORTFOLIO_GROSS_EXPOSURE, snapshot.gross_exposure, &[]);
    }

    pub fn get_trading_dashboard(&self) -> TradingDashboard {
        let store = self.store.lock();

        let checks = store.counter_total(GUARDRAIL_CHECKS, &[]);
        let passed = store.counter_total(GUARDRAIL_CHECKS, &[("result", "pass")]);
        let executions = store.counter_total(WORKFLOW_EXECUTIONS, &[]);
        let successes = store.counter_total(WORKFLOW_EXECUTIONS, &[("status", "success")]);

        TradingDashboard {
            timestamp: Utc::now(),
            signals: SignalSummary {
                total: store.counter_total(SIGNALS_GENERATED, &[]),
                by_type: store.counter_by_label(SIGNALS_GENERATED, "signal_type"),
            },
            trades: TradeSummary {
                total: store.counter_total(TRADES_EXECUTED, &[]),
                by_side: store.counter_by_label(TRADES_EXECUTED, "side"),
                volume: store.counter_total(TRADE_VOLUME, &[]),
                latency: store.merged_histogram_stats(TRADE_LATENCY, &[]),
                slippage: store.merged_histogram_stats(TRADE_SLIPPAGE, &[]),
                pnl: store.merged_histogram_stats(TRADE_PNL, &[]),
            },
            portfolio: PortfolioSummary {
                value: store.gauge(PORTFOLIO_VALUE, &[]),
                cash: store.gauge(PORTFOLIO_CASH, &[]),
                positions: store.gauge(PORTFOLIO_POSITIONS, &[]),
                daily_pnl: store.gauge(PORTFOLIO_DAILY_PNL, &[]),
                gross_exposure: store.gauge(PORTFOLIO_GROSS_EXPOSURE, &[]),
            },
            guardrails: GuardrailSummary {
                checks,
                violations: store.counter_total(GUARDRAIL_VIOLATIONS, &[]),
                pass_rate: ratio(passed, checks),
            },
            workflows: WorkflowSummary {
                executions,
                successes,
                success_rate: ratio(successes, executions),
                duration: store.merged_histogram_stats(WORKFLOW_DURATION, &[]),
            },
        }
    }

    pub fn get_agent_metrics(&self, agent_id: &str) -> AgentMetricsReport {
        let store = self.store.lock();
        let agent = [("agent_id", agent_id)];

        let total = store.counter_total(AGENT_REQUESTS, &agent);
        let failed = store.counter_total(AGENT_REQUESTS, &[("agent_id", agent_id), ("status", "error")]);

        AgentMetricsReport {
            agent_id: agent_id.to_string(),
            total_requests: total,
            successful_requests: store
                .counter_total(AGENT_REQUESTS, &[("agent_id", agent_id), ("status", "success")]),
            failed_requests: failed,
            error_rate: ratio(failed, total),
            tokens_used: store.counter(AGENT_TOKENS, &agent),
            latency: store.histogram_stats(AGENT_LATENCY, &agent),
        }
    }
}
