//! 进程内追踪模块
//! In-process tracing module
//!
//! 提供层级化的执行追踪，支持:
//! Provides hierarchical execution tracing, supporting:
//! - Span 与 Trace 管理
//! - Span and trace management
//! - 显式与环境两种上下文传播方式
//! - Explicit and ambient context propagation
//! - 可插拔的 Span 导出器
//! - Pluggable span exporters
//! - Agent 和 Workflow 的约定式追踪
//! - Convention-based tracing for Agents and Workflows

mod context;
mod exporter;
mod instrumentation;
pub mod scope;
mod span;
mod tracer;

pub use context::{Baggage, SpanContext, SpanId, TraceId};
pub use exporter::{ConsoleExporter, FnExporter, SpanExporter};
pub use instrumentation::{AgentTracer, WorkflowPerformance, WorkflowTracer, create_default_tracing};
pub use scope::{ExecutionContext, with_task_context};
pub use span::{AttributeValue, Attributes, Span, SpanData, SpanEvent, SpanKind, SpanStatus};
pub use tracer::{TraceSummary, Tracer, current_span_id, global_tracer, set_global_tracer};
