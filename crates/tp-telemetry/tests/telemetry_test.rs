use tp_telemetry::logging::{init_logging, init_logging_json};
use tp_telemetry::metrics::{MetricsCollector, SESSIONS_REGISTERED, TOOL_CALLS};
use tp_telemetry::tracing_setup::{create_tool_span, generate_trace_id};

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[test]
fn logging_init_is_idempotent() {
    init_logging("termpool-test", "debug");
    init_logging("termpool-test", "info");
    init_logging_json("termpool-test", "warn");
    tracing::info!("still logging after repeated init");
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

#[test]
fn counters_are_safe_across_threads() {
    let m = std::sync::Arc::new(MetricsCollector::new());
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let m = m.clone();
            std::thread::spawn(move || {
                for _ in 0..1_000 {
                    m.increment_counter(SESSIONS_REGISTERED, &[]);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(m.get_counter(SESSIONS_REGISTERED, &[]), 8_000);
}

#[test]
fn label_order_does_not_matter() {
    let m = MetricsCollector::new();
    m.increment_counter(TOOL_CALLS, &[("tool", "kill_session"), ("status", "killed")]);
    m.increment_counter(TOOL_CALLS, &[("status", "killed"), ("tool", "kill_session")]);
    assert_eq!(
        m.get_counter(TOOL_CALLS, &[("tool", "kill_session"), ("status", "killed")]),
        2
    );
}

#[test]
fn duration_for_unknown_name_is_zero() {
    let m = MetricsCollector::new();
    assert_eq!(m.duration_count("nope"), 0);
    assert_eq!(m.duration_total("nope"), 0.0);
    m.record_duration("custom_seconds", 1.5);
    assert_eq!(m.duration_count("custom_seconds"), 1);
}

// ---------------------------------------------------------------------------
// Trace IDs
// ---------------------------------------------------------------------------

#[test]
fn trace_ids_are_unique() {
    let ids: std::collections::HashSet<String> = (0..100).map(|_| generate_trace_id()).collect();
    assert_eq!(ids.len(), 100);
}

#[test]
fn tool_span_enters() {
    let (span, trace_id) = create_tool_span("list_sessions");
    let _guard = span.enter();
    tracing::debug!(%trace_id, "inside tool span");
}
