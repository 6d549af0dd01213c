//! Span 导出器
//! Span exporters
//!
//! 每个结束的 Span 都会同步、按注册顺序交给所有导出器；导出器应当保持轻量
//! Every ended span is handed synchronously, in registration order, to each
//! exporter; exporters must stay fast

use super::span::SpanData;
use crate::error::TelemetryResult;
use tracing::info;

/// 导出器 trait
/// Exporter trait
pub trait SpanExporter: Send + Sync {
    /// 导出一个已结束的 Span
    /// Export one ended span
    fn export(&self, span: &SpanData) -> TelemetryResult<()>;

    /// 用于日志的名称
    /// Name used in logs
    fn name(&self) -> &str {
        "exporter"
    }
}

/// 闭包导出器
/// Closure-backed exporter
pub struct FnExporter<F> {
    name: String,
    f: F,
}

impl<F> FnExporter<F>
where
    F: Fn(&SpanData) + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> SpanExporter for FnExporter<F>
where
    F: Fn(&SpanData) + Send + Sync,
{
    fn export(&self, span: &SpanData) -> TelemetryResult<()> {
        (self.f)(span);
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Console 导出器 - 输出到控制台
/// Console Exporter - Outputs to the console
#[derive(Debug, Clone, Default)]
pub struct ConsoleExporter {
    /// 是否使用 JSON 格式
    /// Whether to use JSON format
    json_format: bool,
    /// 是否只输出摘要
    /// Whether to output summary only
    summary_only: bool,
}

impl ConsoleExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_json_format(mut self) -> Self {
        self.json_format = true;
        self
    }

    pub fn with_summary_only(mut self) -> Self {
        self.summary_only = true;
        self
    }

    pub(crate) fn format_span(&self, span: &SpanData) -> TelemetryResult<String> {
        if self.json_format {
            return Ok(serde_json::to_string_pretty(span)?);
        }

        let duration = span.duration_ms.unwrap_or(0.0);
        if self.summary_only {
            return Ok(format!(
                "[{}] {} | trace={} span={} | {:.2}ms | {}",
                span.kind, span.name, span.trace_id, span.span_id, duration, span.status
            ));
        }

        let parent = span
            .parent_span_id
            .map(|p| p.to_hex())
            .unwrap_or_else(|| "none".to_string());
        let attributes = span
            .attributes
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(", ");

        Ok(format!(
            r#"
┌─ Span ─────────────────────────────────────────────────────
│ Name:      {}
│ Service:   {}
│ Kind:      {}
│ TraceId:   {}
│ SpanId:    {}
│ ParentId:  {}
│ Duration:  {:.2}ms
│ Status:    {} {}
│ Attributes: {}
│ Events:    {} events
└────────────────────────────────────────────────────────────"#,
            span.name,
            span.service_name,
            span.kind,
            span.trace_id,
            span.span_id,
            parent,
            duration,
            span.status,
            span.status_message,
            attributes,
            span.events.len()
        ))
    }
}

impl SpanExporter for ConsoleExporter {
    fn export(&self, span: &SpanData) -> TelemetryResult<()> {
        info!(target: "tradewind::spans", "{}", self.format_span(span)?);
        Ok(())
    }

    fn name(&self) -> &str {
        "console"
    }
}
