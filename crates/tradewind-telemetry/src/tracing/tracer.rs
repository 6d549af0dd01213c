//! Tracer - 追踪器
//! Tracer
//!
//! 负责创建、链接、结束 Span，维护 trace 注册表，并把结束的 Span 分发给导出器
//! Creates, links and ends spans, owns the trace registry, and fans ended
//! spans out to exporters
//!
//! 每个操作都有两种形式：显式传入 `ExecutionContext` 的 `*_in` 版本，以及使用
//! 环境上下文（task-local / thread-local）的简写版本
//! Every operation comes in two forms: an explicit `*_in` variant taking an
//! `ExecutionContext`, and a shorthand that uses the ambient context

use super::context::{Baggage, SpanContext, SpanId, TraceId};
use super::exporter::{ConsoleExporter, FnExporter, SpanExporter};
use super::scope::{self, ExecutionContext, Removal};
use super::span::{Attributes, Span, SpanData, SpanKind, SpanStatus};
use crate::config::TracerConfig;
use crate::error::{TelemetryError, TelemetryResult};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, warn};

static NEXT_TRACER_ID: AtomicU64 = AtomicU64::new(1);

/// Trace 摘要
/// Trace summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceSummary {
    pub trace_id: TraceId,
    /// 根 Span 名称
    /// Root span name
    pub root_span: String,
    pub total_spans: usize,
    /// 根 Span 的持续时间，未结束时为 None
    /// Duration of the root span, `None` while it is open
    pub total_duration_ms: Option<f64>,
    pub error_count: usize,
    /// 有错误 Span 时为 error，否则为 ok
    /// `error` when any span errored, otherwise `ok`
    pub status: SpanStatus,
    pub start_time: DateTime<Utc>,
}

/// Trace 注册表：trace_id -> 按追加顺序排列的 Span
/// Trace registry: trace_id -> spans in append order
#[derive(Default)]
struct TraceRegistry {
    traces: HashMap<TraceId, Vec<Span>>,
    /// 按创建顺序，用于最近查询和淘汰
    /// Creation order, used for recency queries and eviction
    order: VecDeque<TraceId>,
}

impl TraceRegistry {
    fn insert_trace(&mut self, span: Span, max_traces: Option<usize>) {
        if let Some(max) = max_traces {
            self.evict_finished(max.max(1) - 1);
        }
        let trace_id = span.trace_id();
        self.order.push_back(trace_id);
        self.traces.insert(trace_id, vec![span]);
    }

    /// 按创建顺序淘汰，直到最多剩 `keep` 个 trace；仍有未结束 Span 的 trace 不会被淘汰
    /// Evict oldest-first until at most `keep` traces remain; a trace with any
    /// open span is pinned
    fn evict_finished(&mut self, keep: usize) {
        let mut index = 0;
        while self.traces.len() > keep && index < self.order.len() {
            let trace_id = self.order[index];
            let pinned = self
                .traces
                .get(&trace_id)
                .is_some_and(|spans| spans.iter().any(|span| !span.is_ended()));
            if pinned {
                index += 1;
                continue;
            }
            self.order.remove(index);
            self.traces.remove(&trace_id);
            debug!(trace_id = %trace_id, "Evicted trace from registry");
        }
        if self.traces.len() > keep {
            debug!(
                open = self.traces.len(),
                "Trace registry over capacity; every remaining trace is still open"
            );
        }
    }

    fn append(&mut self, span: Span) {
        let trace_id = span.trace_id();
        match self.traces.get_mut(&trace_id) {
            Some(spans) => spans.push(span),
            None => {
                // 父 trace 在全部结束后被淘汰
                // the parent trace had fully ended and was evicted
                debug!(trace_id = %trace_id, "Re-registering evicted trace");
                self.order.push_back(trace_id);
                self.traces.insert(trace_id, vec![span]);
            }
        }
    }
}

/// Tracer - 追踪器
/// Tracer - Tracing component
pub struct Tracer {
    id: u64,
    config: TracerConfig,
    registry: Mutex<TraceRegistry>,
    exporters: RwLock<Vec<Arc<dyn SpanExporter>>>,
}

impl Tracer {
    /// 创建 Tracer；配置只在此处读取一次
    /// Create a tracer; the config is read once, here
    pub fn new(config: TracerConfig) -> Self {
        let tracer = Self {
            id: NEXT_TRACER_ID.fetch_add(1, Ordering::Relaxed),
            config,
            registry: Mutex::new(TraceRegistry::default()),
            exporters: RwLock::new(Vec::new()),
        };
        if tracer.config.export_to_console {
            tracer.add_exporter(Arc::new(ConsoleExporter::new().with_summary_only()));
        }
        tracer
    }

    /// 获取服务名称
    /// Get service name
    pub fn service_name(&self) -> &str {
        &self.config.service_name
    }

    pub fn config(&self) -> &TracerConfig {
        &self.config
    }

    // ── Explicit context ─────────────────────────────────────────────

    /// 开启新 trace：无父 Span 的根 Span，并成为当前 Span
    /// Open a new trace: a parentless root span that becomes current
    pub fn start_trace_in(
        &self,
        cx: &mut ExecutionContext,
        name: impl Into<String>,
        attributes: Attributes,
    ) -> Span {
        let span = self.create_root(name.into(), SpanKind::Internal, attributes);
        cx.push(span.clone());
        span
    }

    /// 开启携带 baggage 的新 trace，baggage 会复制给所有子 Span
    /// Open a new trace seeded with baggage, which every child span inherits
    pub fn start_trace_with_baggage_in(
        &self,
        cx: &mut ExecutionContext,
        name: impl Into<String>,
        baggage: Baggage,
        attributes: Attributes,
    ) -> Span {
        let context = SpanContext::new_root().with_baggage(baggage);
        let span = self.register_root(name.into(), context, SpanKind::Internal, attributes);
        cx.push(span.clone());
        span
    }

    /// 开启 Span。父 Span 取显式参数，否则取当前 Span；都没有则提升为新 trace 的根
    /// Open a span. The parent is the explicit argument, else the current span;
    /// with neither, the span becomes the root of a new trace
    pub fn start_span_in(
        &self,
        cx: &mut ExecutionContext,
        name: impl Into<String>,
        parent: Option<&Span>,
        kind: SpanKind,
        attributes: Attributes,
    ) -> Span {
        let parent = parent.or_else(|| cx.current()).cloned();
        let span = self.create_span(name.into(), parent.as_ref(), kind, attributes);
        cx.push(span.clone());
        span
    }

    /// 结束 Span：写入结束时间、调用导出器、恢复当前 Span
    /// End a span: stamp `end_time`, run exporters, restore the current span
    ///
    /// 乱序结束或重复结束会返回错误，但 Span 仍然被结束并导出
    /// Ending out of nesting order or ending twice is reported as an error;
    /// the span is still ended and exported
    pub fn end_span_in(
        &self,
        cx: &mut ExecutionContext,
        span: &Span,
        status: Option<SpanStatus>,
    ) -> TelemetryResult<()> {
        let finished = self.finish_and_export(span, status);
        let removal = cx.remove(span);
        report_end(span, finished, removal)
    }

    /// 当前 Span
    /// Current span
    pub fn current_span_in(&self, cx: &ExecutionContext) -> Option<Span> {
        cx.current().cloned()
    }

    /// 记录异常到给定 Span 或当前 Span；都没有时不做任何事
    /// Record an exception on the given span or the current one; no-op if neither exists
    pub fn record_exception_in<E: fmt::Display + ?Sized>(
        &self,
        cx: &ExecutionContext,
        error: &E,
        span: Option<&Span>,
    ) {
        match span.or_else(|| cx.current()) {
            Some(span) => span.record_error(error),
            None => debug!("record_exception called with no span; ignoring"),
        }
    }

    /// 作用域 Span：正常返回以 ok 结束；返回 Err 或 panic 时记录异常、以 error 结束，
    /// 再原样传播
    /// Scoped span: a normal return ends it `ok`; an `Err` or a panic is recorded,
    /// the span ends `error`, and the error or panic propagates unchanged
    pub fn in_span_in<T, E, F>(
        &self,
        cx: &mut ExecutionContext,
        name: impl Into<String>,
        kind: SpanKind,
        attributes: Attributes,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce(&Span, &mut ExecutionContext) -> Result<T, E>,
        E: fmt::Display,
    {
        let span = self.start_span_in(cx, name, None, kind, attributes);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(&span, &mut *cx)));
        let status = record_outcome(&span, &outcome);
        let _ = self.end_span_in(cx, &span, Some(status));
        unwind_or_return(outcome)
    }

    // ── Ambient context ──────────────────────────────────────────────

    /// 见 [`Tracer::start_trace_in`]
    /// See [`Tracer::start_trace_in`]
    pub fn start_trace(&self, name: impl Into<String>, attributes: Attributes) -> Span {
        let span = self.create_root(name.into(), SpanKind::Internal, attributes);
        scope::with_ambient(self.id, |cx| cx.push(span.clone()));
        span
    }

    /// 见 [`Tracer::start_trace_with_baggage_in`]
    /// See [`Tracer::start_trace_with_baggage_in`]
    pub fn start_trace_with_baggage(
        &self,
        name: impl Into<String>,
        baggage: Baggage,
        attributes: Attributes,
    ) -> Span {
        let context = SpanContext::new_root().with_baggage(baggage);
        let span = self.register_root(name.into(), context, SpanKind::Internal, attributes);
        scope::with_ambient(self.id, |cx| cx.push(span.clone()));
        span
    }

    /// 见 [`Tracer::start_span_in`]
    /// See [`Tracer::start_span_in`]
    pub fn start_span(
        &self,
        name: impl Into<String>,
        parent: Option<&Span>,
        kind: SpanKind,
        attributes: Attributes,
    ) -> Span {
        let parent = match parent {
            Some(parent) => Some(parent.clone()),
            None => self.current_span(),
        };
        let span = self.create_span(name.into(), parent.as_ref(), kind, attributes);
        scope::with_ambient(self.id, |cx| cx.push(span.clone()));
        span
    }

    /// 见 [`Tracer::end_span_in`]
    /// See [`Tracer::end_span_in`]
    pub fn end_span(&self, span: &Span, status: Option<SpanStatus>) -> TelemetryResult<()> {
        let finished = self.finish_and_export(span, status);
        let removal = scope::with_ambient(self.id, |cx| cx.remove(span));
        report_end(span, finished, removal)
    }

    /// 当前执行上下文中的当前 Span
    /// The current span of the calling execution context
    pub fn current_span(&self) -> Option<Span> {
        scope::with_ambient(self.id, |cx| cx.current().cloned())
    }

    /// 见 [`Tracer::record_exception_in`]
    /// See [`Tracer::record_exception_in`]
    pub fn record_exception<E: fmt::Display + ?Sized>(&self, error: &E, span: Option<&Span>) {
        match span.cloned().or_else(|| self.current_span()) {
            Some(span) => span.record_error(error),
            None => debug!("record_exception called with no span; ignoring"),
        }
    }

    /// 见 [`Tracer::in_span_in`]
    /// See [`Tracer::in_span_in`]
    pub fn in_span<T, E, F>(
        &self,
        name: impl Into<String>,
        kind: SpanKind,
        attributes: Attributes,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce(&Span) -> Result<T, E>,
        E: fmt::Display,
    {
        self.in_child_span(name, None, kind, attributes, f)
    }

    /// 与 [`Tracer::in_span`] 相同，但可显式指定父 Span
    /// Like [`Tracer::in_span`] with an explicit parent
    pub fn in_child_span<T, E, F>(
        &self,
        name: impl Into<String>,
        parent: Option<&Span>,
        kind: SpanKind,
        attributes: Attributes,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce(&Span) -> Result<T, E>,
        E: fmt::Display,
    {
        let span = self.start_span(name, parent, kind, attributes);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(&span)));
        let status = record_outcome(&span, &outcome);
        let _ = self.end_span(&span, Some(status));
        unwind_or_return(outcome)
    }

    /// 异步作用域 Span，语义同 [`Tracer::in_span`]
    /// Async scoped span with the same semantics as [`Tracer::in_span`]
    ///
    /// 在多线程运行时中请配合 [`scope::with_task_context`] 使用，使当前 Span 跟随任务
    /// On a multi-threaded runtime wrap the task in [`scope::with_task_context`]
    /// so the current span follows the task
    pub async fn in_span_async<T, E, F, Fut>(
        &self,
        name: impl Into<String>,
        kind: SpanKind,
        attributes: Attributes,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce(Span) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let span = self.start_span(name, None, kind, attributes);
        let handle = span.clone();
        let outcome = AssertUnwindSafe(async move { f(handle).await })
            .catch_unwind()
            .await;
        let status = record_outcome(&span, &outcome);
        let _ = self.end_span(&span, Some(status));
        unwind_or_return(outcome)
    }

    // ── Exporters ────────────────────────────────────────────────────

    /// 注册导出器，之后每个结束的 Span 都会交给它
    /// Register an exporter; it receives every span ended afterwards
    pub fn add_exporter(&self, exporter: Arc<dyn SpanExporter>) {
        debug!(exporter = exporter.name(), "Registered span exporter");
        self.exporters.write().push(exporter);
    }

    /// 以闭包注册导出器
    /// Register a closure as an exporter
    pub fn add_exporter_fn<F>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(&SpanData) + Send + Sync + 'static,
    {
        self.add_exporter(Arc::new(FnExporter::new(name, f)));
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// 获取 trace 中所有 Span 的快照，按追加顺序
    /// Snapshots of every span in a trace, in append order
    pub fn get_trace(&self, trace_id: &TraceId) -> Vec<SpanData> {
        self.trace_spans(trace_id)
            .iter()
            .map(Span::snapshot)
            .collect()
    }

    /// 获取 trace 摘要
    /// Get a trace summary
    pub fn get_trace_summary(&self, trace_id: &TraceId) -> Option<TraceSummary> {
        summarize(*trace_id, &self.trace_spans(trace_id))
    }

    /// 最近的 trace 摘要，最新的在前
    /// Most recent trace summaries, newest first
    pub fn get_recent_traces(&self, limit: usize) -> Vec<TraceSummary> {
        let recent: Vec<(TraceId, Vec<Span>)> = {
            let registry = self.registry.lock();
            registry
                .order
                .iter()
                .rev()
                .take(limit)
                .filter_map(|id| registry.traces.get(id).map(|spans| (*id, spans.clone())))
                .collect()
        };
        recent
            .into_iter()
            .filter_map(|(id, spans)| summarize(id, &spans))
            .collect()
    }

    /// trace 是否仍在注册表中
    /// Whether the trace is still in the registry
    pub fn contains_trace(&self, trace_id: &TraceId) -> bool {
        self.registry.lock().traces.contains_key(trace_id)
    }

    pub fn trace_count(&self) -> usize {
        self.registry.lock().traces.len()
    }

    /// 清空注册表
    /// Clear the registry
    pub fn clear(&self) {
        let mut registry = self.registry.lock();
        registry.traces.clear();
        registry.order.clear();
    }

    // ── Internals ────────────────────────────────────────────────────

    fn create_root(&self, name: String, kind: SpanKind, attributes: Attributes) -> Span {
        self.register_root(name, SpanContext::new_root(), kind, attributes)
    }

    fn register_root(
        &self,
        name: String,
        context: SpanContext,
        kind: SpanKind,
        attributes: Attributes,
    ) -> Span {
        let span = Span::new(name, context, kind, &self.config.service_name, attributes);
        self.registry
            .lock()
            .insert_trace(span.clone(), self.config.max_traces);
        debug!(trace_id = %span.trace_id(), span = %span.name(), "Started trace");
        span
    }

    fn create_span(
        &self,
        name: String,
        parent: Option<&Span>,
        kind: SpanKind,
        attributes: Attributes,
    ) -> Span {
        let Some(parent) = parent else {
            return self.create_root(name, kind, attributes);
        };
        let span = Span::new(
            name,
            parent.context().new_child(),
            kind,
            &self.config.service_name,
            attributes,
        );
        self.registry.lock().append(span.clone());
        span
    }

    fn trace_spans(&self, trace_id: &TraceId) -> Vec<Span> {
        self.registry
            .lock()
            .traces
            .get(trace_id)
            .cloned()
            .unwrap_or_default()
    }

    /// 结束并导出；每个导出器的错误或 panic 被单独捕获
    /// Finish and export; each exporter's error or panic is caught on its own
    fn finish_and_export(&self, span: &Span, status: Option<SpanStatus>) -> bool {
        if !span.finish(status) {
            return false;
        }

        let data = span.snapshot();
        let exporters = self.exporters.read().clone();
        for exporter in exporters {
            match panic::catch_unwind(AssertUnwindSafe(|| exporter.export(&data))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(exporter = exporter.name(), "Failed to export span: {}", e)
                }
                Err(payload) => error!(
                    exporter = exporter.name(),
                    "Exporter panicked: {}",
                    panic_message(payload.as_ref())
                ),
            }
        }
        true
    }
}

impl Default for Tracer {
    fn default() -> Self {
        Self::new(TracerConfig::default())
    }
}

impl fmt::Debug for Tracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer")
            .field("service_name", &self.config.service_name)
            .field("traces", &self.trace_count())
            .field("exporters", &self.exporters.read().len())
            .finish()
    }
}

fn report_end(span: &Span, finished: bool, removal: Removal) -> TelemetryResult<()> {
    if !finished {
        warn!(span_id = %span.span_id(), "Span ended twice");
        return Err(TelemetryError::SpanAlreadyEnded(span.span_id()));
    }
    match removal {
        Removal::Top => Ok(()),
        Removal::Absent => {
            debug!(span_id = %span.span_id(), "Span ended outside the context that opened it");
            Ok(())
        }
        Removal::Buried { current } => {
            warn!(span_id = %span.span_id(), current = %current, "Span ended out of nesting order");
            Err(TelemetryError::OutOfOrderEnd {
                ended: span.span_id(),
                current,
            })
        }
    }
}

type Outcome<T, E> = std::thread::Result<Result<T, E>>;

/// 把作用域结果记录到 Span 上，返回结束状态
/// Record a scoped outcome on the span and return the status to end with
fn record_outcome<T, E: fmt::Display>(span: &Span, outcome: &Outcome<T, E>) -> SpanStatus {
    match outcome {
        Ok(Ok(_)) => SpanStatus::Ok,
        Ok(Err(e)) => {
            span.record_error(e);
            SpanStatus::Error
        }
        Err(payload) => {
            span.record_exception("panic", &panic_message(payload.as_ref()));
            SpanStatus::Error
        }
    }
}

fn unwind_or_return<T, E>(outcome: Outcome<T, E>) -> Result<T, E> {
    match outcome {
        Ok(result) => result,
        Err(payload) => panic::resume_unwind(payload),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn summarize(trace_id: TraceId, spans: &[Span]) -> Option<TraceSummary> {
    let root = spans
        .iter()
        .find(|span| span.parent_span_id().is_none())
        .or_else(|| spans.first())?;
    let root = root.snapshot();
    let error_count = spans
        .iter()
        .filter(|span| span.status() == SpanStatus::Error)
        .count();

    Some(TraceSummary {
        trace_id,
        root_span: root.name,
        total_spans: spans.len(),
        total_duration_ms: root.duration_ms,
        error_count,
        status: if error_count > 0 {
            SpanStatus::Error
        } else {
            SpanStatus::Ok
        },
        start_time: root.start_time,
    })
}

// 全局默认实例，便于迁移；新代码应显式注入 Tracer
// Process-wide default for migration; new code should inject a Tracer
lazy_static::lazy_static! {
    static ref GLOBAL_TRACER: RwLock<Option<Arc<Tracer>>> = RwLock::new(None);
}

/// 获取全局默认 Tracer，首次调用时以默认配置创建
/// Get the process-wide default tracer, created with the default config on first use
pub fn global_tracer() -> Arc<Tracer> {
    if let Some(tracer) = GLOBAL_TRACER.read().as_ref() {
        return tracer.clone();
    }
    GLOBAL_TRACER
        .write()
        .get_or_insert_with(|| Arc::new(Tracer::default()))
        .clone()
}

/// 替换全局默认 Tracer，返回旧实例
/// Replace the process-wide default tracer, returning the previous one
pub fn set_global_tracer(tracer: Arc<Tracer>) -> Option<Arc<Tracer>> {
    GLOBAL_TRACER.write().replace(tracer)
}

/// 只需要当前 Span id 的调用方使用
/// For callers that only need the current span's id
pub fn current_span_id(tracer: &Tracer) -> Option<SpanId> {
    tracer.current_span().map(|span| span.span_id())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn tracer() -> Tracer {
        Tracer::new(TracerConfig::new("test-service"))
    }

    #[test]
    fn test_start_trace_creates_root() {
        let tracer = tracer();
        let root = tracer.start_trace("workflow:daily", Attributes::new());

        assert!(root.parent_span_id().is_none());
        assert!(tracer.current_span().unwrap().same_span(&root));
        assert_eq!(tracer.get_trace(&root.trace_id()).len(), 1);

        tracer.end_span(&root, None).unwrap();
        assert!(tracer.current_span().is_none());
    }

    #[test]
    fn test_child_links_to_current() {
        let tracer = tracer();
        let root = tracer.start_trace("root", Attributes::new());
        let child = tracer.start_span("child", None, SpanKind::Client, Attributes::new());

        assert_eq!(child.trace_id(), root.trace_id());
        assert_eq!(child.parent_span_id(), Some(root.span_id()));
        assert!(tracer.current_span().unwrap().same_span(&child));

        tracer.end_span(&child, None).unwrap();
        assert!(tracer.current_span().unwrap().same_span(&root));
        tracer.end_span(&root, None).unwrap();
    }

    #[test]
    fn test_orphan_span_is_promoted_to_root() {
        let tracer = tracer();
        let span = tracer.start_span("orphan", None, SpanKind::Consumer, Attributes::new());

        assert!(span.parent_span_id().is_none());
        assert_eq!(span.kind(), SpanKind::Consumer);
        let summary = tracer.get_trace_summary(&span.trace_id()).unwrap();
        assert_eq!(summary.root_span, "orphan");
        tracer.end_span(&span, None).unwrap();
    }

    #[test]
    fn test_baggage_is_copied_to_children() {
        let tracer = tracer();
        let mut baggage = Baggage::new();
        baggage.insert("desk", "macro");

        let root = tracer.start_trace_with_baggage("rebalance", baggage, Attributes::new());
        let child = tracer.start_span("leg", None, SpanKind::Internal, Attributes::new());
        let grandchild = tracer.start_span("fill", None, SpanKind::Client, Attributes::new());

        for span in [&root, &child, &grandchild] {
            assert_eq!(span.context().baggage.get("desk"), Some("macro"));
        }
        assert!(root.parent_span_id().is_none());
        assert_eq!(grandchild.snapshot().baggage.get("desk"), Some("macro"));

        tracer.end_span(&grandchild, None).unwrap();
        tracer.end_span(&child, None).unwrap();
        tracer.end_span(&root, None).unwrap();
    }

    #[test]
    fn test_baggage_with_explicit_context() {
        let tracer = tracer();
        let mut cx = ExecutionContext::new();
        let baggage: Baggage = [("strategy", "carry")].into_iter().collect();

        let root = tracer.start_trace_with_baggage_in(&mut cx, "root", baggage, Attributes::new());
        let child = tracer.start_span_in(&mut cx, "child", None, SpanKind::Internal, Attributes::new());
        assert_eq!(child.context().baggage.get("strategy"), Some("carry"));
        assert_eq!(child.parent_span_id(), Some(root.span_id()));
        assert!(tracer.current_span().is_none());
    }

    #[test]
    fn test_end_span_overrides_status_and_stamps_time() {
        let tracer = tracer();
        let span = tracer.start_trace("root", Attributes::new());
        tracer
            .end_span(&span, Some(SpanStatus::Cancelled))
            .unwrap();

        let data = span.snapshot();
        assert!(data.end_time.is_some());
        assert!(data.duration_ms.unwrap() >= 0.0);
        assert_eq!(data.status, SpanStatus::Cancelled);
    }

    #[test]
    fn test_double_end_is_reported() {
        let tracer = tracer();
        let exported = Arc::new(StdMutex::new(0));
        let counter = exported.clone();
        tracer.add_exporter_fn("count", move |_| *counter.lock().unwrap() += 1);

        let span = tracer.start_trace("root", Attributes::new());
        tracer.end_span(&span, None).unwrap();
        let err = tracer.end_span(&span, None).unwrap_err();

        assert!(matches!(err, TelemetryError::SpanAlreadyEnded(id) if id == span.span_id()));
        assert_eq!(*exported.lock().unwrap(), 1);
    }

    #[test]
    fn test_out_of_order_end_is_reported() {
        let tracer = tracer();
        let mut cx = ExecutionContext::new();
        let root = tracer.start_trace_in(&mut cx, "root", Attributes::new());
        let child = tracer.start_span_in(&mut cx, "child", None, SpanKind::Internal, Attributes::new());

        let err = tracer.end_span_in(&mut cx, &root, None).unwrap_err();
        assert!(matches!(
            err,
            TelemetryError::OutOfOrderEnd { ended, current }
                if ended == root.span_id() && current == child.span_id()
        ));
        // the root is still ended, the child stays current
        assert!(root.is_ended());
        assert!(tracer.current_span_in(&cx).unwrap().same_span(&child));

        tracer.end_span_in(&mut cx, &child, None).unwrap();
        assert!(tracer.current_span_in(&cx).is_none());
    }

    #[test]
    fn test_exporters_run_in_order_and_failures_are_isolated() {
        struct Failing;
        impl SpanExporter for Failing {
            fn export(&self, _span: &SpanData) -> TelemetryResult<()> {
                Err(TelemetryError::Export("backend down".to_string()))
            }
        }

        let tracer = tracer();
        let calls = Arc::new(StdMutex::new(Vec::new()));

        let first = calls.clone();
        tracer.add_exporter_fn("first", move |s| first.lock().unwrap().push(format!("first:{}", s.name)));
        tracer.add_exporter(Arc::new(Failing));
        tracer.add_exporter_fn("panics", |_| panic!("exporter bug"));
        let last = calls.clone();
        tracer.add_exporter_fn("last", move |s| last.lock().unwrap().push(format!("last:{}", s.name)));

        let span = tracer.start_trace("root", Attributes::new());
        assert!(tracer.end_span(&span, None).is_ok());

        assert_eq!(
            *calls.lock().unwrap(),
            vec!["first:root".to_string(), "last:root".to_string()]
        );
    }

    #[test]
    fn test_in_span_ok() {
        let tracer = tracer();
        let root = tracer.start_trace("root", Attributes::new());

        let value: Result<u32, String> = tracer.in_span("work", SpanKind::Internal, Attributes::new(), |span| {
            span.set_attribute("rows", 3i64);
            Ok(3)
        });
        assert_eq!(value, Ok(3));

        let spans = tracer.get_trace(&root.trace_id());
        let work = spans.iter().find(|s| s.name == "work").unwrap();
        assert_eq!(work.status, SpanStatus::Ok);
        assert!(work.end_time.is_some());
        assert_eq!(work.parent_span_id, Some(root.span_id()));
        assert!(tracer.current_span().unwrap().same_span(&root));
        tracer.end_span(&root, None).unwrap();
    }

    #[test]
    fn test_in_span_error_is_recorded_and_returned() {
        let tracer = tracer();
        let result: Result<(), String> = tracer.in_span("fails", SpanKind::Internal, Attributes::new(), |_| {
            Err("venue rejected order".to_string())
        });
        assert_eq!(result, Err("venue rejected order".to_string()));

        let summary = &tracer.get_recent_traces(1)[0];
        assert_eq!(summary.error_count, 1);
        let data = &tracer.get_trace(&summary.trace_id)[0];
        assert_eq!(data.status, SpanStatus::Error);
        assert_eq!(data.status_message, "venue rejected order");
        assert_eq!(data.events[0].name, "exception");
        assert!(tracer.current_span().is_none());
    }

    #[test]
    fn test_in_span_panic_is_recorded_and_resumed() {
        let tracer = tracer();
        let caught = panic::catch_unwind(AssertUnwindSafe(|| {
            let _: Result<(), String> =
                tracer.in_span("explodes", SpanKind::Internal, Attributes::new(), |_| panic!("boom"));
        }));

        let payload = caught.unwrap_err();
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"boom"));

        let summary = &tracer.get_recent_traces(1)[0];
        let data = &tracer.get_trace(&summary.trace_id)[0];
        assert_eq!(data.status, SpanStatus::Error);
        assert_eq!(data.status_message, "boom");
        assert!(tracer.current_span().is_none());
    }

    #[test]
    fn test_in_span_in_explicit_context() {
        let tracer = tracer();
        let mut cx = ExecutionContext::new();
        let root = tracer.start_trace_in(&mut cx, "root", Attributes::new());

        let inner: Result<SpanId, String> =
            tracer.in_span_in(&mut cx, "step", SpanKind::Internal, Attributes::new(), |span, cx| {
                assert!(cx.current().unwrap().same_span(span));
                Ok(span.span_id())
            });
        let inner = inner.unwrap();

        let spans = tracer.get_trace(&root.trace_id());
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[1].span_id, inner);
        assert!(tracer.current_span_in(&cx).unwrap().same_span(&root));
        // the ambient context was never touched
        assert!(tracer.current_span().is_none());
    }

    #[tokio::test]
    async fn test_in_span_async() {
        let tracer = tracer();
        let result: Result<&str, String> = scope::with_task_context(tracer.in_span_async(
            "fetch",
            SpanKind::Client,
            Attributes::new(),
            |span| async move {
                tokio::task::yield_now().await;
                span.set_attribute("symbol", "AAPL");
                Ok("filled")
            },
        ))
        .await;
        assert_eq!(result, Ok("filled"));

        let summary = &tracer.get_recent_traces(1)[0];
        assert_eq!(summary.root_span, "fetch");
        assert_eq!(summary.status, SpanStatus::Ok);
        assert!(summary.total_duration_ms.is_some());
    }

    #[test]
    fn test_record_exception_targets() {
        let tracer = tracer();
        // no span at all: no-op
        tracer.record_exception("nothing to attach to", None);

        let root = tracer.start_trace("root", Attributes::new());
        tracer.record_exception("ambient failure", None);
        assert_eq!(root.status(), SpanStatus::Error);

        let other = tracer.start_trace("other", Attributes::new());
        tracer.record_exception("explicit failure", Some(&root));
        assert_eq!(other.status(), SpanStatus::Ok);
        assert_eq!(root.snapshot().events.len(), 2);
    }

    #[test]
    fn test_current_span_is_per_thread() {
        let tracer = Arc::new(tracer());
        let root = tracer.start_trace("main-thread", Attributes::new());

        let remote = tracer.clone();
        let other_root = std::thread::spawn(move || {
            assert!(remote.current_span().is_none());
            let span = remote.start_span("worker", None, SpanKind::Internal, Attributes::new());
            remote.end_span(&span, None).unwrap();
            span.trace_id()
        })
        .join()
        .unwrap();

        assert_ne!(other_root, root.trace_id());
        assert!(tracer.current_span().unwrap().same_span(&root));
        assert_eq!(current_span_id(&tracer), Some(root.span_id()));
    }

    #[test]
    fn test_recent_traces_and_eviction() {
        let tracer = Tracer::new(TracerConfig::new("test-service").with_max_traces(Some(3)));
        let mut ids = Vec::new();
        for i in 0..5 {
            let span = tracer.start_trace(format!("trace-{}", i), Attributes::new());
            tracer.end_span(&span, None).unwrap();
            ids.push(span.trace_id());
        }

        assert_eq!(tracer.trace_count(), 3);
        assert!(tracer.get_trace(&ids[0]).is_empty());
        assert!(tracer.get_trace_summary(&ids[1]).is_none());

        let recent: Vec<_> = tracer
            .get_recent_traces(2)
            .into_iter()
            .map(|s| s.root_span)
            .collect();
        assert_eq!(recent, vec!["trace-4".to_string(), "trace-3".to_string()]);

        tracer.clear();
        assert_eq!(tracer.trace_count(), 0);
    }

    #[test]
    fn test_eviction_skips_open_traces() {
        let tracer = Tracer::new(TracerConfig::new("test-service").with_max_traces(Some(1)));
        let long = tracer.start_trace("workflow:long", Attributes::new());

        let other = std::thread::scope(|s| {
            s.spawn(|| {
                let span = tracer.start_trace("other", Attributes::new());
                tracer.end_span(&span, None).unwrap();
                span.trace_id()
            })
            .join()
            .unwrap()
        });
        assert!(tracer.contains_trace(&long.trace_id()));
        assert!(tracer.contains_trace(&other));

        let late = tracer.start_span("step:late", None, SpanKind::Internal, Attributes::new());
        tracer.end_span(&late, None).unwrap();
        tracer.end_span(&long, None).unwrap();

        let summary = tracer.get_trace_summary(&long.trace_id()).unwrap();
        assert_eq!(summary.root_span, "workflow:long");
        assert_eq!(summary.total_spans, 2);

        // both traces are finished now, so the next root evicts them
        let next = tracer.start_trace("next", Attributes::new());
        assert_eq!(tracer.trace_count(), 1);
        assert!(!tracer.contains_trace(&long.trace_id()));
        tracer.end_span(&next, None).unwrap();
    }

    #[test]
    fn test_unknown_trace_queries() {
        let tracer = tracer();
        let unknown = TraceId::new();
        assert!(tracer.get_trace(&unknown).is_empty());
        assert!(tracer.get_trace_summary(&unknown).is_none());
        assert!(tracer.get_recent_traces(10).is_empty());
    }

    #[test]
    fn test_global_tracer_replacement() {
        let custom = Arc::new(Tracer::new(TracerConfig::new("global-test")));
        set_global_tracer(custom.clone());
        assert!(Arc::ptr_eq(&global_tracer(), &custom));
    }
}
