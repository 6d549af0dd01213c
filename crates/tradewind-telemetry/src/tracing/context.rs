//! Span 标识与传播上下文
//! Span identity and propagation context
//!
//! 每个 Span 持有一个 `SpanContext`：所属 trace、自身 id、父 id 以及向下传播的 baggage
//! Every span owns one `SpanContext`: its trace, its own id, its parent id and
//! the baggage handed down to children

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Trace ID - 16字节 (128位)
/// Trace ID - 16 bytes (128 bits)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TraceId([u8; 16]);

impl TraceId {
    /// 创建新的随机 Trace ID
    /// Create a new random Trace ID
    pub fn new() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill(&mut bytes);
        // 全零保留给无效 id
        // all-zero is reserved for the invalid id
        if bytes.iter().all(|&b| b == 0) {
            bytes[15] = 1;
        }
        Self(bytes)
    }

    /// 从字节数组创建
    /// Create from a byte array
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// 从十六进制字符串创建
    /// Create from a hexadecimal string
    pub fn from_hex(hex: &str) -> Result<Self, String> {
        if hex.len() != 32 {
            return Err("TraceId hex string must be 32 characters".to_string());
        }
        let bytes = hex::decode(hex).map_err(|e| e.to_string())?;
        let mut arr = [0u8; 16];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// 转换为十六进制字符串
    /// Convert to a hexadecimal string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// 是否有效（非全零）
    /// Whether it is valid (not all zeros)
    pub fn is_valid(&self) -> bool {
        self.0.iter().any(|&b| b != 0)
    }

    /// 无效的 Trace ID
    /// Invalid Trace ID
    pub const INVALID: TraceId = TraceId([0u8; 16]);
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TraceId({})", self.to_hex())
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for TraceId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for TraceId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for TraceId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        Self::from_hex(&hex).map_err(serde::de::Error::custom)
    }
}

/// Span ID - 8字节 (64位)
/// Span ID - 8 bytes (64 bits)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpanId([u8; 8]);

impl SpanId {
    /// 创建新的随机 Span ID
    /// Create a new random Span ID
    pub fn new() -> Self {
        let mut bytes = [0u8; 8];
        rand::thread_rng().fill(&mut bytes);
        if bytes.iter().all(|&b| b == 0) {
            bytes[7] = 1;
        }
        Self(bytes)
    }

    /// 从字节数组创建
    /// Create from a byte array
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    /// 从十六进制字符串创建
    /// Create from a hexadecimal string
    pub fn from_hex(hex: &str) -> Result<Self, String> {
        if hex.len() != 16 {
            return Err("SpanId hex string must be 16 characters".to_string());
        }
        let bytes = hex::decode(hex).map_err(|e| e.to_string())?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// 转换为十六进制字符串
    /// Convert to a hexadecimal string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// 是否有效（非全零）
    /// Whether it is valid (not all zeros)
    pub fn is_valid(&self) -> bool {
        self.0.iter().any(|&b| b != 0)
    }

    /// 无效的 Span ID
    /// Invalid Span ID
    pub const INVALID: SpanId = SpanId([0u8; 8]);
}

impl Default for SpanId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SpanId({})", self.to_hex())
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for SpanId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for SpanId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for SpanId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        Self::from_hex(&hex).map_err(serde::de::Error::custom)
    }
}

/// Baggage - 沿调用链向下传播的键值对
/// Baggage - key/value pairs propagated down the call chain
///
/// 子 Span 拿到的是父 baggage 的副本，修改不会回流到父 Span
/// A child receives a copy of its parent's baggage; changes never flow back up
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Baggage(BTreeMap<String, String>);

impl Baggage {
    /// 创建空的 Baggage
    /// Create empty baggage
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// 添加条目，同名条目被覆盖
    /// Add an entry, replacing any entry with the same key
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// 获取条目
    /// Get an entry
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(|v| v.as_str())
    }

    /// 移除条目
    /// Remove an entry
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// 是否为空
    /// Whether it is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Baggage {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Span Context - Span 的身份与传播信息
/// Span Context - Identity and propagation envelope of a span
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanContext {
    /// 整条 trace 共享的 id
    /// Id shared by the whole trace
    pub trace_id: TraceId,
    /// 本 Span 的 id
    /// Id of this span
    pub span_id: SpanId,
    /// 父 Span id，根 Span 为 None
    /// Parent span id, `None` only for the root span
    pub parent_span_id: Option<SpanId>,
    /// 向子 Span 传播的 baggage
    /// Baggage copied into every child context
    pub baggage: Baggage,
}

impl SpanContext {
    /// 创建新的根上下文（新 trace）
    /// Create a new root context (fresh trace)
    pub fn new_root() -> Self {
        Self {
            trace_id: TraceId::new(),
            span_id: SpanId::new(),
            parent_span_id: None,
            baggage: Baggage::new(),
        }
    }

    /// 创建子上下文：同一 trace，新的 span id，复制 baggage
    /// Create a child context: same trace, new span id, baggage copied by value
    pub fn new_child(&self) -> Self {
        Self {
            trace_id: self.trace_id,
            span_id: SpanId::new(),
            parent_span_id: Some(self.span_id),
            baggage: self.baggage.clone(),
        }
    }

    /// 设置 baggage
    /// Set baggage
    pub fn with_baggage(mut self, baggage: Baggage) -> Self {
        self.baggage = baggage;
        self
    }

    /// 是否为根上下文
    /// Whether this is a root context
    pub fn is_root(&self) -> bool {
        self.parent_span_id.is_none()
    }
}
