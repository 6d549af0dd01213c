//! Span 定义和管理
//! Span definition and management
//!
//! `Span` 是共享句柄：克隆出的句柄指向同一份数据，Tracer 的注册表与调用方各持一份
//! `Span` is a shared handle: clones point at the same data, so the tracer's
//! registry and the caller observe the same span

use super::context::{Baggage, SpanContext, SpanId, TraceId};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Span 类型，仅作信息标注
/// Span kind, informational only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SpanKind {
    /// 内部操作
    /// Internal operation
    #[default]
    Internal,
    /// 服务器端（处理请求）
    /// Server side (handling a request)
    Server,
    /// 客户端（发起请求）
    /// Client side (issuing a request)
    Client,
    /// 消息生产者
    /// Message producer
    Producer,
    /// 消息消费者
    /// Message consumer
    Consumer,
}

impl fmt::Display for SpanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpanKind::Internal => write!(f, "internal"),
            SpanKind::Server => write!(f, "server"),
            SpanKind::Client => write!(f, "client"),
            SpanKind::Producer => write!(f, "producer"),
            SpanKind::Consumer => write!(f, "consumer"),
        }
    }
}

/// Span 状态
/// Span status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SpanStatus {
    /// 成功
    /// Success
    #[default]
    Ok,
    /// 错误
    /// Error
    Error,
    /// 调用方显式取消
    /// Explicitly cancelled by the caller
    Cancelled,
}

impl fmt::Display for SpanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpanStatus::Ok => write!(f, "ok"),
            SpanStatus::Error => write!(f, "error"),
            SpanStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// 属性值（标量）
/// Attribute value (scalar)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl AttributeValue {
    /// 从 JSON 标量转换，非标量返回 None
    /// Convert a JSON scalar; non-scalars yield `None`
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(AttributeValue::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(AttributeValue::Int)
                .or_else(|| n.as_f64().map(AttributeValue::Float)),
            serde_json::Value::String(s) => Some(AttributeValue::String(s.clone())),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttributeValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Int(v) => Some(*v as f64),
            AttributeValue::Float(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Bool(v) => write!(f, "{}", v),
            AttributeValue::Int(v) => write!(f, "{}", v),
            AttributeValue::Float(v) => write!(f, "{}", v),
            AttributeValue::String(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        AttributeValue::String(v.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        AttributeValue::String(v)
    }
}

impl From<&String> for AttributeValue {
    fn from(v: &String) -> Self {
        AttributeValue::String(v.clone())
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::Int(v)
    }
}

impl From<i32> for AttributeValue {
    fn from(v: i32) -> Self {
        AttributeValue::Int(v as i64)
    }
}

impl From<u32> for AttributeValue {
    fn from(v: u32) -> Self {
        AttributeValue::Int(v as i64)
    }
}

impl From<usize> for AttributeValue {
    fn from(v: usize) -> Self {
        AttributeValue::Int(v as i64)
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        AttributeValue::Float(v)
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        AttributeValue::Bool(v)
    }
}

/// 属性表
/// Attribute map
pub type Attributes = BTreeMap<String, AttributeValue>;

/// Span 事件，追加后不可变
/// Span event, immutable once appended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanEvent {
    /// 事件名称
    /// Event name
    pub name: String,
    /// 事件时间
    /// Event time
    pub timestamp: DateTime<Utc>,
    /// 事件属性
    /// Event attributes
    pub attributes: Attributes,
}

impl SpanEvent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            timestamp: Utc::now(),
            attributes: Attributes::new(),
        }
    }

    pub fn with_attribute(
        mut self,
        key: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Span 快照（用于导出与查询），序列化为扁平 JSON
/// Span snapshot (for export and queries), serialized as flat JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanData {
    pub name: String,
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub parent_span_id: Option<SpanId>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<f64>,
    pub kind: SpanKind,
    pub status: SpanStatus,
    pub status_message: String,
    pub attributes: Attributes,
    pub events: Vec<SpanEvent>,
    pub service_name: String,
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Baggage::is_empty")]
    pub baggage: Baggage,
}

impl SpanData {
    pub fn is_root(&self) -> bool {
        self.parent_span_id.is_none()
    }

    pub fn is_ended(&self) -> bool {
        self.end_time.is_some()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// 从导出的 JSON 还原快照
    /// Parse a snapshot back from its exported JSON
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// Span 可变部分
/// Mutable part of a span
struct SpanState {
    name: String,
    kind: SpanKind,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    status: SpanStatus,
    status_message: String,
    attributes: Attributes,
    events: Vec<SpanEvent>,
    agent_id: Option<String>,
}

struct SpanShared {
    context: SpanContext,
    service_name: String,
    state: RwLock<SpanState>,
}

/// Span - 追踪的基本单元
/// Span - the basic unit of tracing
///
/// 结束后仍可设置属性；调用方不应再修改已结束的 Span（约定，不做运行时检查）
/// Attributes stay settable after `end`; callers must not otherwise mutate an
/// ended span (a documented contract, not a runtime guard)
#[derive(Clone)]
pub struct Span {
    inner: Arc<SpanShared>,
}

impl Span {
    /// 创建新的 Span
    /// Create a new span
    pub(crate) fn new(
        name: impl Into<String>,
        context: SpanContext,
        kind: SpanKind,
        service_name: impl Into<String>,
        attributes: Attributes,
    ) -> Self {
        Self {
            inner: Arc::new(SpanShared {
                context,
                service_name: service_name.into(),
                state: RwLock::new(SpanState {
                    name: name.into(),
                    kind,
                    start_time: Utc::now(),
                    end_time: None,
                    status: SpanStatus::Ok,
                    status_message: String::new(),
                    attributes,
                    events: Vec::new(),
                    agent_id: None,
                }),
            }),
        }
    }

    /// 获取 SpanContext
    /// Get the span context
    pub fn context(&self) -> &SpanContext {
        &self.inner.context
    }

    pub fn trace_id(&self) -> TraceId {
        self.inner.context.trace_id
    }

    pub fn span_id(&self) -> SpanId {
        self.inner.context.span_id
    }

    pub fn parent_span_id(&self) -> Option<SpanId> {
        self.inner.context.parent_span_id
    }

    pub fn name(&self) -> String {
        self.inner.state.read().name.clone()
    }

    pub fn kind(&self) -> SpanKind {
        self.inner.state.read().kind
    }

    pub fn status(&self) -> SpanStatus {
        self.inner.state.read().status
    }

    pub fn service_name(&self) -> &str {
        &self.inner.service_name
    }

    /// 是否已结束
    /// Whether the span has ended
    pub fn is_ended(&self) -> bool {
        self.inner.state.read().end_time.is_some()
    }

    /// 两个句柄是否指向同一个 Span
    /// Whether two handles refer to the same span
    pub fn same_span(&self, other: &Span) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// 设置属性
    /// Set an attribute
    pub fn set_attribute(&self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        self.inner
            .state
            .write()
            .attributes
            .insert(key.into(), value.into());
    }

    /// 批量设置属性
    /// Set several attributes
    pub fn set_attributes(&self, attributes: impl IntoIterator<Item = (String, AttributeValue)>) {
        let mut state = self.inner.state.write();
        for (key, value) in attributes {
            state.attributes.insert(key, value);
        }
    }

    pub fn attribute(&self, key: &str) -> Option<AttributeValue> {
        self.inner.state.read().attributes.get(key).cloned()
    }

    /// 添加事件
    /// Add an event
    pub fn add_event(&self, event: SpanEvent) {
        self.inner.state.write().events.push(event);
    }

    /// 添加简单事件
    /// Add an event with no attributes
    pub fn add_event_with_name(&self, name: impl Into<String>) {
        self.add_event(SpanEvent::new(name));
    }

    /// 设置状态
    /// Set the status
    pub fn set_status(&self, status: SpanStatus, message: impl Into<String>) {
        let mut state = self.inner.state.write();
        state.status = status;
        state.status_message = message.into();
    }

    /// 设置为成功状态
    /// Mark as ok
    pub fn set_ok(&self) {
        self.set_status(SpanStatus::Ok, "");
    }

    /// 设置为错误状态
    /// Mark as error
    pub fn set_error(&self, message: impl Into<String>) {
        self.set_status(SpanStatus::Error, message);
    }

    /// 关联业务 Agent
    /// Associate a business agent
    pub fn set_agent_id(&self, agent_id: impl Into<String>) {
        self.inner.state.write().agent_id = Some(agent_id.into());
    }

    /// 记录异常：追加 `exception` 事件并置为错误状态
    /// Record an exception: append an `exception` event and set error status
    pub fn record_exception(&self, kind: &str, message: &str) {
        let event = SpanEvent::new("exception")
            .with_attribute("exception.type", kind)
            .with_attribute("exception.message", message);
        let mut state = self.inner.state.write();
        state.events.push(event);
        state.status = SpanStatus::Error;
        state.status_message = message.to_string();
    }

    /// 以错误值的类型名和消息记录异常
    /// Record an exception from an error value's type name and message
    pub fn record_error<E: fmt::Display + ?Sized>(&self, error: &E) {
        self.record_exception(std::any::type_name::<E>(), &error.to_string());
    }

    /// 结束 Span：写入结束时间并可覆盖状态；已结束则返回 false
    /// End the span, stamping `end_time` and optionally overriding the status;
    /// returns `false` when it was already ended
    pub(crate) fn finish(&self, status: Option<SpanStatus>) -> bool {
        let mut state = self.inner.state.write();
        if state.end_time.is_some() {
            return false;
        }
        let now = Utc::now();
        state.end_time = Some(now.max(state.start_time));
        if let Some(status) = status {
            state.status = status;
        }
        true
    }

    /// 持续时间，未结束时为 None
    /// Duration, `None` until the span has ended
    pub fn duration(&self) -> Option<chrono::Duration> {
        let state = self.inner.state.read();
        state.end_time.map(|end| end - state.start_time)
    }

    /// 获取持续时间（毫秒）
    /// Duration in milliseconds
    pub fn duration_ms(&self) -> Option<f64> {
        self.duration().map(duration_to_ms)
    }

    /// 获取 Span 快照（用于导出）
    /// Take a snapshot (for export)
    pub fn snapshot(&self) -> SpanData {
        let context = &self.inner.context;
        let state = self.inner.state.read();
        SpanData {
            name: state.name.clone(),
            trace_id: context.trace_id,
            span_id: context.span_id,
            parent_span_id: context.parent_span_id,
            start_time: state.start_time,
            end_time: state.end_time,
            duration_ms: state
                .end_time
                .map(|end| duration_to_ms(end - state.start_time)),
            kind: state.kind,
            status: state.status,
            status_message: state.status_message.clone(),
            attributes: state.attributes.clone(),
            events: state.events.clone(),
            service_name: self.inner.service_name.clone(),
            agent_id: state.agent_id.clone(),
            baggage: context.baggage.clone(),
        }
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Span")
            .field("name", &self.name())
            .field("trace_id", &self.trace_id())
            .field("span_id", &self.span_id())
            .field("ended", &self.is_ended())
            .finish()
    }
}

pub(crate) fn duration_to_ms(duration: chrono::Duration) -> f64 {
    duration
        .num_microseconds()
        .map(|us| us as f64 / 1000.0)
        .unwrap_or_else(|| duration.num_milliseconds() as f64)
}
