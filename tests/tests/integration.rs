use serde_json::json;
use std::io::Write;
use std::sync::Arc;
use tradewind_telemetry::tracing::{Attributes, Baggage, ExecutionContext, with_task_context};
use tradewind_telemetry::{
    MetricsCollector, SpanKind, SpanStatus, TelemetryConfig, TelemetryError, TradeRecord,
    TradeSide, Tracer, TracerConfig, create_default_tracing,
};
use tradewind_testing::{
    FailingExporter, PanickingExporter, RecordingExporter, assert_exported, assert_span_names,
    assert_well_formed_trace,
};

fn tracer() -> Arc<Tracer> {
    Arc::new(Tracer::new(TracerConfig::new("integration")))
}

#[test]
fn test_daily_workflow_scenario() {
    let (tracer, _, workflows) = create_default_tracing(TracerConfig::new("integration"));
    let recorder = RecordingExporter::new();
    tracer.add_exporter(recorder.shared());

    let result: Result<(), String> =
        workflows.trace_workflow("wf-daily", "daily", "rebalance", &json!({}), |root| {
            workflows.trace_step("wf-daily", "fetch", 1, 3, &json!({"source": "prices"}), |_| {
                Ok::<_, String>(())
            })?;
            workflows.trace_step("wf-daily", "score", 2, 3, &json!({}), |_| Ok::<_, String>(()))?;
            assert_eq!(tracer.current_span().unwrap().span_id(), root.span_id());
            Ok(())
        });
    assert!(result.is_ok());

    let trace_id = recorder.find("workflow:daily").unwrap().trace_id;
    assert_span_names!(tracer, trace_id, ["workflow:daily", "step:fetch", "step:score"]);
    assert_well_formed_trace(&tracer.get_trace(&trace_id));

    let summary = tracer.get_trace_summary(&trace_id).unwrap();
    assert_eq!(summary.total_spans, 3);
    assert_eq!(summary.error_count, 0);
    assert_eq!(summary.status, SpanStatus::Ok);

    let perf = workflows.get_workflow_performance("wf-daily").unwrap();
    assert_eq!(perf.total_steps, 2);
    assert_eq!(perf.steps_ok, 2);

    // steps end before the workflow, so they are exported first
    assert_exported!(recorder, 3);
    assert_eq!(recorder.names(), vec!["step:fetch", "step:score", "workflow:daily"]);
}

#[test]
fn test_faulty_exporters_do_not_block_others() {
    let tracer = tracer();
    let failing = Arc::new(FailingExporter::new("collector unreachable"));
    let panicking = Arc::new(PanickingExporter::new());
    let recorder = RecordingExporter::new();

    tracer.add_exporter(failing.clone());
    tracer.add_exporter(panicking.clone());
    tracer.add_exporter(recorder.shared());

    let root = tracer.start_trace("order:route", Attributes::new());
    let child = tracer.start_span("venue:xnys", None, SpanKind::Client, Attributes::new());
    assert!(tracer.end_span(&child, None).is_ok());
    assert!(tracer.end_span(&root, None).is_ok());

    assert_eq!(failing.call_count(), 2);
    assert_eq!(panicking.call_count(), 2);
    assert_exported!(recorder, 2);
    assert_exported!(recorder, name: "venue:xnys");
    assert!(tracer.current_span().is_none());
}

#[test]
fn test_error_propagates_unchanged_through_facades() {
    #[derive(Debug, PartialEq)]
    struct RiskLimit(u32);

    impl std::fmt::Display for RiskLimit {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "risk limit {} breached", self.0)
        }
    }

    let (tracer, agents, _) = create_default_tracing(TracerConfig::new("integration"));
    let recorder = RecordingExporter::new();
    tracer.add_exporter(recorder.shared());

    let result: Result<(), RiskLimit> = agents.trace_agent_call("pm", "size", &json!({}), |_| {
        agents.trace_tool_call("pm", "risk_check", &json!({}), |_| Err(RiskLimit(7)))
    });
    assert_eq!(result, Err(RiskLimit(7)));

    let tool = recorder.find("tool:risk_check").unwrap();
    let agent = recorder.find("agent:pm").unwrap();
    for span in [&tool, &agent] {
        assert_eq!(span.status, SpanStatus::Error);
        assert_eq!(span.status_message, "risk limit 7 breached");
        let exception = span.events.iter().find(|e| e.name == "exception").unwrap();
        assert!(
            exception.attributes["exception.type"]
                .as_str()
                .unwrap()
                .ends_with("RiskLimit")
        );
    }
    assert_well_formed_trace(&tracer.get_trace(&agent.trace_id));
}

#[test]
fn test_panic_is_resumed_with_original_payload() {
    let tracer = tracer();
    let recorder = RecordingExporter::new();
    tracer.add_exporter(recorder.shared());

    let caught = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let _: Result<(), String> =
            tracer.in_span("pricing", SpanKind::Internal, Attributes::new(), |_| {
                std::panic::panic_any(42u32)
            });
    }));
    assert_eq!(caught.unwrap_err().downcast_ref::<u32>(), Some(&42));

    let span = recorder.find("pricing").unwrap();
    assert_eq!(span.status, SpanStatus::Error);
    assert!(tracer.current_span().is_none());
}

#[test]
fn test_threads_keep_separate_current_spans() {
    let tracer = tracer();
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let tracer = tracer.clone();
            std::thread::spawn(move || {
                let root = tracer.start_trace(format!("desk-{}", i), Attributes::new());
                for step in 0..5 {
                    let r: Result<(), String> = tracer.in_span(
                        format!("step-{}", step),
                        SpanKind::Internal,
                        Attributes::new(),
                        |span| {
                            assert_eq!(span.parent_span_id(), Some(root.span_id()));
                            Ok(())
                        },
                    );
                    r.unwrap();
                }
                tracer.end_span(&root, None).unwrap();
                assert!(tracer.current_span().is_none());
                root.trace_id()
            })
        })
        .collect();

    for handle in handles {
        let trace_id = handle.join().unwrap();
        let spans = tracer.get_trace(&trace_id);
        assert_eq!(spans.len(), 6);
        assert_well_formed_trace(&spans);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_tasks_keep_separate_current_spans() {
    let tracer = tracer();
    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let tracer = tracer.clone();
            tokio::spawn(with_task_context(async move {
                tracer
                    .in_span_async(format!("task-{}", i), SpanKind::Consumer, Attributes::new(), |outer| {
                        let tracer = tracer.clone();
                        async move {
                            tokio::task::yield_now().await;
                            let inner = tracer.start_span("inner", None, SpanKind::Internal, Attributes::new());
                            assert_eq!(inner.parent_span_id(), Some(outer.span_id()));
                            tokio::task::yield_now().await;
                            tracer.end_span(&inner, None).unwrap();
                            Ok::<_, String>(outer.trace_id())
                        }
                    })
                    .await
            }))
        })
        .collect();

    for result in futures::future::join_all(tasks).await {
        let trace_id = result.unwrap().unwrap();
        let spans = tracer.get_trace(&trace_id);
        assert_eq!(spans.len(), 2);
        assert_well_formed_trace(&spans);
    }
}

#[test]
fn test_long_workflow_survives_eviction_pressure() {
    let (tracer, _, workflows) =
        create_default_tracing(TracerConfig::new("integration").with_max_traces(Some(1)));
    let recorder = RecordingExporter::new();
    tracer.add_exporter(recorder.shared());

    let workflow = workflows.start_workflow("wf-long", "long", "overnight", &json!({}));
    std::thread::scope(|s| {
        for i in 0..4 {
            let tracer = &tracer;
            s.spawn(move || {
                let span = tracer.start_trace(format!("quote-{}", i), Attributes::new());
                tracer.end_span(&span, None).unwrap();
            });
        }
    });

    let r: Result<(), String> =
        workflows.trace_step("wf-long", "late", 1, 1, &json!({}), |_| Ok(()));
    r.unwrap();
    workflows.end_workflow("wf-long", None).unwrap();

    let spans = tracer.get_trace(&workflow.trace_id());
    assert_well_formed_trace(&spans);
    assert_span_names!(tracer, workflow.trace_id(), ["workflow:long", "step:late"]);
    let summary = tracer.get_trace_summary(&workflow.trace_id()).unwrap();
    assert_eq!(summary.root_span, "workflow:long");
    assert_eq!(workflows.get_workflow_performance("wf-long").unwrap().total_steps, 1);
    assert_exported!(recorder, 6);
}

#[test]
fn test_baggage_reaches_every_span_of_a_trace() {
    let (tracer, agents, _) = create_default_tracing(TracerConfig::new("integration"));
    let recorder = RecordingExporter::new();
    tracer.add_exporter(recorder.shared());

    let mut baggage = Baggage::new();
    baggage.insert("book", "global-macro");
    baggage.insert("request_id", "r-17");
    let root = tracer.start_trace_with_baggage("desk:morning", baggage, Attributes::new());

    let r: Result<(), String> = agents.trace_agent_call("pm", "allocate", &json!({}), |_| {
        agents.trace_tool_call("pm", "optimizer", &json!({}), |_| Ok(()))
    });
    r.unwrap();
    tracer.end_span(&root, None).unwrap();

    let spans = tracer.get_trace(&root.trace_id());
    assert_eq!(spans.len(), 3);
    assert_well_formed_trace(&spans);
    for span in &spans {
        assert_eq!(span.baggage.get("book"), Some("global-macro"));
        assert_eq!(span.baggage.get("request_id"), Some("r-17"));
    }

    let exported = recorder.find("tool:optimizer").unwrap();
    let parsed = tradewind_telemetry::tracing::SpanData::from_json(&exported.to_json().unwrap()).unwrap();
    assert_eq!(parsed.baggage.get("book"), Some("global-macro"));
}

#[test]
fn test_explicit_context_matches_ambient_behavior() {
    let tracer = tracer();
    let mut cx = ExecutionContext::new();

    let root = tracer.start_trace_in(&mut cx, "backtest", Attributes::new());
    let leg = tracer.start_span_in(&mut cx, "leg", None, SpanKind::Internal, Attributes::new());
    let err = tracer.end_span_in(&mut cx, &root, None).unwrap_err();
    assert!(matches!(err, TelemetryError::OutOfOrderEnd { .. }));
    tracer.end_span_in(&mut cx, &leg, None).unwrap();
    assert!(matches!(
        tracer.end_span_in(&mut cx, &leg, None),
        Err(TelemetryError::SpanAlreadyEnded(_))
    ));

    assert!(cx.is_empty());
    assert_well_formed_trace(&tracer.get_trace(&root.trace_id()));
}

#[test]
fn test_tracing_and_metrics_together() {
    let (tracer, agents, _) = create_default_tracing(TracerConfig::new("integration"));
    let metrics = MetricsCollector::default();

    for (symbol, pnl) in [("AAPL", -120.0), ("MSFT", 45.0)] {
        let started = std::time::Instant::now();
        let result: Result<(), String> = agents.trace_agent_call("executor", "trade", &json!({"symbol": symbol}), |_| {
            metrics.record_trade(
                &TradeRecord::new(symbol, TradeSide::Buy, 10.0, 100.0, 12.0).with_pnl_bps(pnl),
            );
            agents.record_agent_metric("notional", 1000.0);
            Ok(())
        });
        metrics.record_agent_request(
            "executor",
            "trade",
            started.elapsed().as_secs_f64() * 1000.0,
            result.is_ok(),
            None,
        );
    }

    let dashboard = metrics.get_trading_dashboard();
    assert_eq!(dashboard.trades.total, 2.0);
    let pnl = dashboard.trades.pnl.unwrap();
    assert_eq!(pnl.count, 2);
    assert_eq!(pnl.sum, -75.0);

    let report = metrics.get_agent_metrics("executor");
    assert_eq!(report.total_requests, 2.0);
    assert_eq!(report.error_rate, 0.0);

    let recent = tracer.get_recent_traces(10);
    assert_eq!(recent.len(), 2);
    assert!(recent.iter().all(|t| t.root_span == "agent:executor"));
}

#[test]
fn test_config_file_drives_construction() {
    let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    write!(
        file,
        r#"{{
            "tracer": {{"service_name": "risk-desk", "max_traces": 2}},
            "metrics": {{"gauge_series_capacity": 3}}
        }}"#
    )
    .unwrap();

    let config = TelemetryConfig::from_file(file.path()).unwrap();
    let tracer = Tracer::new(config.tracer);
    let metrics = MetricsCollector::new(config.metrics);

    for i in 0..4 {
        let span = tracer.start_trace(format!("t{}", i), Attributes::new());
        assert_eq!(span.service_name(), "risk-desk");
        tracer.end_span(&span, None).unwrap();
        metrics.set_gauge("open_orders", i as f64, &[]);
    }

    assert_eq!(tracer.trace_count(), 2);
    assert_eq!(metrics.get_time_series("open_orders", &[], None).len(), 3);
}
