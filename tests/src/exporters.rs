//! Exporter doubles

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tradewind_telemetry::tracing::{SpanData, SpanExporter};
use tradewind_telemetry::{TelemetryError, TelemetryResult};

/// Keeps a copy of every span it receives
///
/// Clones share the same history, so keep one handle and give the tracer
/// another.
#[derive(Clone, Default)]
pub struct RecordingExporter {
    /// Every exported span, in export order
    pub spans: Arc<Mutex<Vec<SpanData>>>,
}

impl RecordingExporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle ready for `Tracer::add_exporter`
    pub fn shared(&self) -> Arc<dyn SpanExporter> {
        Arc::new(self.clone())
    }

    pub fn spans(&self) -> Vec<SpanData> {
        self.spans.lock().clone()
    }

    /// Names in export order
    pub fn names(&self) -> Vec<String> {
        self.spans.lock().iter().map(|s| s.name.clone()).collect()
    }

    pub fn count(&self) -> usize {
        self.spans.lock().len()
    }

    /// Most recent export of a span with this name
    pub fn find(&self, name: &str) -> Option<SpanData> {
        self.spans.lock().iter().rev().find(|s| s.name == name).cloned()
    }

    pub fn clear(&self) {
        self.spans.lock().clear();
    }
}

impl SpanExporter for RecordingExporter {
    fn export(&self, span: &SpanData) -> TelemetryResult<()> {
        self.spans.lock().push(span.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Always reports an export failure
pub struct FailingExporter {
    message: String,
    calls: AtomicUsize,
}

impl FailingExporter {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SpanExporter for FailingExporter {
    fn export(&self, _span: &SpanData) -> TelemetryResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(TelemetryError::Export(self.message.clone()))
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// Panics on every export
#[derive(Default)]
pub struct PanickingExporter {
    calls: AtomicUsize,
}

impl PanickingExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SpanExporter for PanickingExporter {
    fn export(&self, span: &SpanData) -> TelemetryResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        panic!("exporter panicked on span '{}'", span.name);
    }

    fn name(&self) -> &str {
        "panicking"
    }
}

/// Assert how many spans a [`RecordingExporter`] received, or that one with
/// a given name was among them
#[macro_export]
macro_rules! assert_exported {
    ($recorder:expr, $expected_count:expr) => {
        let count = $recorder.count();
        assert_eq!(
            count,
            $expected_count,
            "Expected {} exported spans, got {}: {:?}",
            $expected_count,
            count,
            $recorder.names()
        );
    };
    ($recorder:expr, name: $name:expr) => {
        assert!(
            $recorder.find($name).is_some(),
            "Expected a span named '{}' to be exported, got {:?}",
            $name,
            $recorder.names()
        );
    };
}
