//! Trace shape assertions

use std::collections::HashSet;
use tradewind_telemetry::tracing::SpanData;

/// Panic unless `spans` form one well-formed trace: a single shared trace id,
/// exactly one root, unique span ids, every parent present, and no span that
/// ended before it started
pub fn assert_well_formed_trace(spans: &[SpanData]) {
    assert!(!spans.is_empty(), "Trace has no spans");

    let trace_id = spans[0].trace_id;
    assert!(
        spans.iter().all(|s| s.trace_id == trace_id),
        "Spans belong to more than one trace"
    );

    let roots: Vec<_> = spans.iter().filter(|s| s.is_root()).map(|s| &s.name).collect();
    assert_eq!(roots.len(), 1, "Expected exactly one root span, found {:?}", roots);

    let mut ids = HashSet::new();
    for span in spans {
        assert!(ids.insert(span.span_id), "Duplicate span id {}", span.span_id);
    }

    for span in spans {
        if let Some(parent) = span.parent_span_id {
            assert!(
                ids.contains(&parent),
                "Span '{}' has parent {} outside the trace",
                span.name,
                parent
            );
        }
        if let Some(end) = span.end_time {
            assert!(end >= span.start_time, "Span '{}' ended before it started", span.name);
            assert!(span.duration_ms.is_some_and(|d| d >= 0.0));
        }
    }
}

/// Assert the span names of a trace, in append order
#[macro_export]
macro_rules! assert_span_names {
    ($tracer:expr, $trace_id:expr, [$($name:expr),* $(,)?]) => {
        let actual: Vec<String> = $tracer
            .get_trace(&$trace_id)
            .into_iter()
            .map(|s| s.name)
            .collect();
        let expected: Vec<String> = vec![$($name.to_string()),*];
        assert_eq!(actual, expected, "Unexpected span names in trace {}", $trace_id);
    };
}
