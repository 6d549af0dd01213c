//! 自动追踪集成
//! Automatic Tracing Integration
//!
//! 为 Agent 和 Workflow 提供带命名约定的追踪功能
//! Convention-named tracing for Agents and Workflows

use super::span::{AttributeValue, Attributes, Span, SpanEvent, SpanKind, SpanStatus};
use super::tracer::Tracer;
use crate::config::TracerConfig;
use crate::error::TelemetryResult;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// 序列化后的输入大小（字节）
/// Serialized size of an input payload, in bytes
fn input_size(input: &serde_json::Value) -> i64 {
    serde_json::to_string(input)
        .map(|s| s.len() as i64)
        .unwrap_or(0)
}

/// 把 JSON 对象中的标量展开为 `<prefix>.<key>` 属性，跳过非标量
/// Flatten the scalar entries of a JSON object into `<prefix>.<key>`
/// attributes, skipping non-scalars
fn flatten_context(prefix: &str, context: &serde_json::Value, attributes: &mut Attributes) {
    if let serde_json::Value::Object(map) = context {
        for (key, value) in map {
            if let Some(value) = AttributeValue::from_json(value) {
                attributes.insert(format!("{}.{}", prefix, key), value);
            }
        }
    }
}

fn attrs<const N: usize>(entries: [(&str, AttributeValue); N]) -> Attributes {
    entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

/// Agent 追踪器
/// Agent Tracer
#[derive(Debug, Clone)]
pub struct AgentTracer {
    tracer: Arc<Tracer>,
}

impl AgentTracer {
    pub fn new(tracer: Arc<Tracer>) -> Self {
        Self { tracer }
    }

    fn agent_call_attributes(agent_id: &str, task: &str, input: &serde_json::Value) -> Attributes {
        attrs([
            ("agent.id", agent_id.into()),
            ("agent.task", task.into()),
            ("agent.input_size", input_size(input).into()),
        ])
    }

    /// 追踪一次 Agent 调用：Span `agent:<id>`，kind=server
    /// Trace one agent call: span `agent:<id>`, kind=server
    pub fn trace_agent_call<T, E, F>(
        &self,
        agent_id: &str,
        task: &str,
        input: &serde_json::Value,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce(&Span) -> Result<T, E>,
        E: fmt::Display,
    {
        self.tracer.in_span(
            format!("agent:{}", agent_id),
            SpanKind::Server,
            Self::agent_call_attributes(agent_id, task, input),
            |span| {
                span.set_agent_id(agent_id);
                span.add_event_with_name("agent_start");
                let result = f(span);
                if result.is_ok() {
                    span.add_event_with_name("agent_complete");
                }
                result
            },
        )
    }

    /// [`AgentTracer::trace_agent_call`] 的异步版本
    /// Async form of [`AgentTracer::trace_agent_call`]
    pub async fn trace_agent_call_async<T, E, F, Fut>(
        &self,
        agent_id: &str,
        task: &str,
        input: &serde_json::Value,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce(Span) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let agent_id = agent_id.to_string();
        self.tracer
            .in_span_async(
                format!("agent:{}", agent_id),
                SpanKind::Server,
                Self::agent_call_attributes(&agent_id, task, input),
                |span| async move {
                    span.set_agent_id(agent_id);
                    span.add_event_with_name("agent_start");
                    let result = f(span.clone()).await;
                    if result.is_ok() {
                        span.add_event_with_name("agent_complete");
                    }
                    result
                },
            )
            .await
    }

    /// 追踪工具调用：Span `tool:<name>`，kind=client
    /// Trace a tool call: span `tool:<name>`, kind=client
    pub fn trace_tool_call<T, E, F>(
        &self,
        agent_id: &str,
        tool_name: &str,
        tool_input: &serde_json::Value,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce(&Span) -> Result<T, E>,
        E: fmt::Display,
    {
        self.tracer.in_span(
            format!("tool:{}", tool_name),
            SpanKind::Client,
            attrs([
                ("agent.id", agent_id.into()),
                ("tool.name", tool_name.into()),
                ("tool.input_size", input_size(tool_input).into()),
            ]),
            |span| {
                span.set_agent_id(agent_id);
                f(span)
            },
        )
    }

    /// 追踪决策：Span `decision:<type>`，上下文标量展开为 `decision.context.<key>`
    /// Trace a decision: span `decision:<type>`, scalar context entries become
    /// `decision.context.<key>`
    pub fn trace_decision<T, E, F>(
        &self,
        agent_id: &str,
        decision_type: &str,
        context: &serde_json::Value,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce(&Span) -> Result<T, E>,
        E: fmt::Display,
    {
        let mut attributes = attrs([
            ("agent.id", agent_id.into()),
            ("decision.type", decision_type.into()),
        ]);
        flatten_context("decision.context", context, &mut attributes);

        self.tracer.in_span(
            format!("decision:{}", decision_type),
            SpanKind::Internal,
            attributes,
            |span| {
                span.set_agent_id(agent_id);
                f(span)
            },
        )
    }

    /// 追踪 Agent 间通信：Span `comm:<from>-><to>`，kind=producer
    /// Trace agent-to-agent communication: span `comm:<from>-><to>`, kind=producer
    pub fn trace_agent_communication<T, E, F>(
        &self,
        from_agent: &str,
        to_agent: &str,
        message_type: &str,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce(&Span) -> Result<T, E>,
        E: fmt::Display,
    {
        self.tracer.in_span(
            format!("comm:{}->{}", from_agent, to_agent),
            SpanKind::Producer,
            attrs([
                ("comm.from", from_agent.into()),
                ("comm.to", to_agent.into()),
                ("comm.message_type", message_type.into()),
            ]),
            |span| {
                span.set_agent_id(from_agent);
                f(span)
            },
        )
    }

    /// 在当前 Span 上记录错误；没有当前 Span 时不做任何事
    /// Record an error on the current span; no-op without one
    pub fn record_agent_error<E: fmt::Display + ?Sized>(&self, error: &E) {
        self.tracer.record_exception(error, None);
    }

    /// 在当前 Span 上记录指标属性 `agent.metric.<name>`
    /// Record `agent.metric.<name>` on the current span
    pub fn record_agent_metric(&self, name: &str, value: impl Into<AttributeValue>) {
        match self.tracer.current_span() {
            Some(span) => span.set_attribute(format!("agent.metric.{}", name), value),
            None => debug!(metric = name, "No current span for agent metric"),
        }
    }

    /// 获取 Tracer
    /// Get Tracer
    pub fn tracer(&self) -> Arc<Tracer> {
        self.tracer.clone()
    }
}

/// 工作流性能摘要
/// Workflow performance summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowPerformance {
    pub workflow_id: String,
    /// 工作流 Span 的持续时间，未结束时为 None
    /// Duration of the workflow span, `None` while it is open
    pub total_duration_ms: Option<f64>,
    pub total_steps: usize,
    pub avg_step_duration_ms: f64,
    pub max_step_duration_ms: f64,
    pub steps_ok: usize,
    pub steps_error: usize,
}

/// workflow_id -> 工作流 Span，按登记顺序
/// workflow_id -> workflow span, in registration order
#[derive(Default)]
struct WorkflowRegistry {
    spans: HashMap<String, Span>,
    order: VecDeque<String>,
}

impl WorkflowRegistry {
    /// 登记工作流；超过上限时按登记顺序淘汰已结束的工作流
    /// Register a workflow; over the cap, ended workflows are evicted oldest-first
    fn insert(&mut self, workflow_id: &str, span: Span, max_entries: Option<usize>) {
        if self.spans.remove(workflow_id).is_some() {
            self.order.retain(|id| id != workflow_id);
        }
        if let Some(max) = max_entries {
            let keep = max.max(1) - 1;
            let mut index = 0;
            while self.spans.len() > keep && index < self.order.len() {
                let open = self
                    .spans
                    .get(&self.order[index])
                    .is_some_and(|span| !span.is_ended());
                if open {
                    index += 1;
                    continue;
                }
                if let Some(evicted) = self.order.remove(index) {
                    self.spans.remove(&evicted);
                    debug!(workflow_id = %evicted, "Evicted workflow lookup entry");
                }
            }
        }
        self.order.push_back(workflow_id.to_string());
        self.spans.insert(workflow_id.to_string(), span);
    }

    fn remove(&mut self, workflow_id: &str) -> Option<Span> {
        let span = self.spans.remove(workflow_id)?;
        self.order.retain(|id| id != workflow_id);
        Some(span)
    }

    fn len(&self) -> usize {
        self.spans.len()
    }
}

/// Workflow 追踪器
/// Workflow Tracer
///
/// 按业务 workflow_id 保存工作流 Span，步骤可在其它执行上下文中找到正确的父 Span。
/// 映射与 Tracer 共用 `max_traces` 上限；trace 被淘汰后对应条目也随之失效
/// Keeps workflow spans by business `workflow_id` so steps traced from another
/// execution context still find the right parent. The map shares the tracer's
/// `max_traces` cap, and an entry lapses once its trace has been evicted
pub struct WorkflowTracer {
    tracer: Arc<Tracer>,
    workflows: Mutex<WorkflowRegistry>,
}

impl WorkflowTracer {
    pub fn new(tracer: Arc<Tracer>) -> Self {
        Self {
            tracer,
            workflows: Mutex::new(WorkflowRegistry::default()),
        }
    }

    fn workflow_span(&self, workflow_id: &str) -> Option<Span> {
        let Some(span) = self.workflows.lock().spans.get(workflow_id).cloned() else {
            debug!(workflow_id, "Unknown workflow id");
            return None;
        };
        if span.is_ended() && !self.tracer.contains_trace(&span.trace_id()) {
            debug!(workflow_id, "Workflow trace was evicted; dropping lookup entry");
            self.workflows.lock().remove(workflow_id);
            return None;
        }
        Some(span)
    }

    fn register(&self, workflow_id: &str, span: &Span) {
        self.workflows
            .lock()
            .insert(workflow_id, span.clone(), self.tracer.config().max_traces);
    }

    /// 当前登记的工作流数量
    /// Number of registered workflows
    pub fn workflow_count(&self) -> usize {
        self.workflows.lock().len()
    }

    fn workflow_attributes(
        workflow_id: &str,
        name: &str,
        workflow_type: &str,
        context: &serde_json::Value,
    ) -> Attributes {
        let mut attributes = attrs([
            ("workflow.id", workflow_id.into()),
            ("workflow.name", name.into()),
            ("workflow.type", workflow_type.into()),
        ]);
        flatten_context("workflow.context", context, &mut attributes);
        attributes
    }

    /// 追踪整个工作流：Span `workflow:<name>`
    /// Trace a whole workflow: span `workflow:<name>`
    ///
    /// 结束后映射条目仍保留，供 [`WorkflowTracer::get_workflow_performance`] 使用
    /// The lookup entry outlives the scope so
    /// [`WorkflowTracer::get_workflow_performance`] keeps working
    pub fn trace_workflow<T, E, F>(
        &self,
        workflow_id: &str,
        name: &str,
        workflow_type: &str,
        context: &serde_json::Value,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce(&Span) -> Result<T, E>,
        E: fmt::Display,
    {
        self.tracer.in_span(
            format!("workflow:{}", name),
            SpanKind::Internal,
            Self::workflow_attributes(workflow_id, name, workflow_type, context),
            |span| {
                self.register(workflow_id, span);
                span.add_event_with_name("workflow_start");
                let result = f(span);
                if result.is_ok() {
                    span.add_event_with_name("workflow_complete");
                }
                result
            },
        )
    }

    /// 开始工作流（非作用域形式）
    /// Start a workflow without a closure
    pub fn start_workflow(
        &self,
        workflow_id: &str,
        name: &str,
        workflow_type: &str,
        context: &serde_json::Value,
    ) -> Span {
        let span = self.tracer.start_span(
            format!("workflow:{}", name),
            None,
            SpanKind::Internal,
            Self::workflow_attributes(workflow_id, name, workflow_type, context),
        );
        span.add_event_with_name("workflow_start");
        self.register(workflow_id, &span);
        span
    }

    /// 结束 [`WorkflowTracer::start_workflow`] 开始的工作流；未知 id 时不做任何事
    /// End a workflow opened by [`WorkflowTracer::start_workflow`]; no-op for
    /// an unknown id
    pub fn end_workflow(&self, workflow_id: &str, status: Option<SpanStatus>) -> TelemetryResult<()> {
        let Some(span) = self.workflow_span(workflow_id) else {
            return Ok(());
        };
        if status.unwrap_or(span.status()) != SpanStatus::Error {
            span.add_event_with_name("workflow_complete");
        }
        self.tracer.end_span(&span, status)
    }

    /// 移除工作流映射条目
    /// Drop a workflow's lookup entry
    pub fn forget_workflow(&self, workflow_id: &str) -> Option<Span> {
        self.workflows.lock().remove(workflow_id)
    }

    /// 追踪工作流步骤：Span `step:<name>`，父 Span 按 workflow_id 查找
    /// Trace a workflow step: span `step:<name>`, parented to the workflow
    /// looked up by `workflow_id`
    ///
    /// 未知的 workflow_id 时退回到当前 Span（或新 trace）
    /// With an unknown `workflow_id` it falls back to the current span (or a new trace)
    pub fn trace_step<T, E, F>(
        &self,
        workflow_id: &str,
        step_name: &str,
        step_number: u32,
        total_steps: u32,
        input: &serde_json::Value,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce(&Span) -> Result<T, E>,
        E: fmt::Display,
    {
        let parent = self.workflow_span(workflow_id);
        self.tracer.in_child_span(
            format!("step:{}", step_name),
            parent.as_ref(),
            SpanKind::Internal,
            attrs([
                ("workflow.id", workflow_id.into()),
                ("step.name", step_name.into()),
                ("step.number", step_number.into()),
                ("step.total", total_steps.into()),
                ("step.input_size", input_size(input).into()),
            ]),
            |span| {
                span.add_event_with_name("step_start");
                let result = f(span);
                if result.is_ok() {
                    span.add_event_with_name("step_complete");
                }
                result
            },
        )
    }

    /// 在工作流 Span 上记录指标属性 `workflow.metric.<name>`
    /// Record `workflow.metric.<name>` on the workflow span
    pub fn record_workflow_metric(
        &self,
        workflow_id: &str,
        name: &str,
        value: impl Into<AttributeValue>,
    ) {
        if let Some(span) = self.workflow_span(workflow_id) {
            span.set_attribute(format!("workflow.metric.{}", name), value);
        }
    }

    /// 在工作流 Span 上记录错误事件并置为错误状态
    /// Record a `workflow_error` event on the workflow span and mark it failed
    pub fn record_workflow_error<E: fmt::Display + ?Sized>(&self, workflow_id: &str, error: &E) {
        if let Some(span) = self.workflow_span(workflow_id) {
            let message = error.to_string();
            span.add_event(
                SpanEvent::new("workflow_error")
                    .with_attribute("error.type", std::any::type_name::<E>())
                    .with_attribute("error.message", message.as_str()),
            );
            span.set_error(message);
        }
    }

    /// 扫描工作流所在 trace 中以 `step:` 开头的 Span，计算性能摘要
    /// Derive a performance summary from the `step:` spans of the workflow's trace
    pub fn get_workflow_performance(&self, workflow_id: &str) -> Option<WorkflowPerformance> {
        let workflow = self.workflow_span(workflow_id)?;
        let steps: Vec<_> = self
            .tracer
            .get_trace(&workflow.trace_id())
            .into_iter()
            .filter(|span| span.name.starts_with("step:"))
            .collect();

        let durations: Vec<f64> = steps.iter().filter_map(|s| s.duration_ms).collect();
        let avg_step_duration_ms = if durations.is_empty() {
            0.0
        } else {
            durations.iter().sum::<f64>() / durations.len() as f64
        };

        Some(WorkflowPerformance {
            workflow_id: workflow_id.to_string(),
            total_duration_ms: workflow.duration_ms(),
            total_steps: steps.len(),
            avg_step_duration_ms,
            max_step_duration_ms: durations.iter().copied().fold(0.0, f64::max),
            steps_ok: steps
                .iter()
                .filter(|s| s.is_ended() && s.status == SpanStatus::Ok)
                .count(),
            steps_error: steps
                .iter()
                .filter(|s| s.status == SpanStatus::Error)
                .count(),
        })
    }

    /// 获取 Tracer
    /// Get Tracer
    pub fn tracer(&self) -> Arc<Tracer> {
        self.tracer.clone()
    }
}

/// 创建默认追踪设置：一个 Tracer 及其两个 façade
/// Create the default tracing setup: one tracer and both façades over it
pub fn create_default_tracing(
    config: TracerConfig,
) -> (Arc<Tracer>, Arc<AgentTracer>, Arc<WorkflowTracer>) {
    let tracer = Arc::new(Tracer::new(config));
    let agent_tracer = Arc::new(AgentTracer::new(tracer.clone()));
    let workflow_tracer = Arc::new(WorkflowTracer::new(tracer.clone()));
    (tracer, agent_tracer, workflow_tracer)
}
