//! End-to-end correlation scenarios through the public engine surface, all
//! anchored at T0 = 2025-01-01T00:00:00Z with a 30 s late tolerance.

mod support;

use futures::StreamExt;
use std::{sync::atomic::Ordering, time::Duration};
use support::{event, ts, ScriptedSource, T0};
use weft_engine::{CorrelationEngine, EngineConfig, EngineError};
use weft_types::{Completeness, CorrelatedEvent};

fn engine() -> CorrelationEngine {
    CorrelationEngine::new(EngineConfig {
        late_tolerance: Duration::from_secs(30),
        ..EngineConfig::default()
    })
}

async fn collect(engine: &CorrelationEngine, query: &str) -> Vec<CorrelatedEvent> {
    engine
        .correlate(query)
        .await
        .unwrap()
        .map(|r| r.unwrap())
        .collect()
        .await
}

#[tokio::test]
async fn simple_inner_join_with_one_match() {
    let eng = engine();
    let loki = ScriptedSource::new("loki");
    loki.script(r#"{service="a"}"#, vec![event("loki", 0, "r1")]);
    loki.script(r#"{service="b"}"#, vec![event("loki", 1_000, "r1")]);
    eng.register_adapter(loki).unwrap();

    let out = collect(
        &eng,
        r#"loki({service="a"})[5m] and on(request_id) loki({service="b"})[5m]"#,
    )
    .await;
    assert_eq!(out.len(), 1);
    let c = &out[0];
    assert_eq!(c.join_key, "request_id");
    assert_eq!(c.join_value, "r1");
    assert_eq!(c.events.len(), 2);
    assert_eq!(c.timestamp, ts(0));
    assert_eq!(c.time_window.start, ts(0));
    assert_eq!(c.time_window.end, ts(1_000));
    assert_eq!(c.metadata.completeness, Completeness::Complete);
    assert_eq!(c.metadata.total_streams, 2);
}

#[tokio::test]
async fn left_join_without_right_match_stays_partial() {
    let eng = engine();
    let loki = ScriptedSource::new("loki");
    loki.script(r#"{service="a"}"#, vec![event("loki", 0, "r2")]);
    loki.script(r#"{service="b"}"#, vec![]);
    eng.register_adapter(loki).unwrap();

    let out = collect(
        &eng,
        r#"loki({service="a"})[5m] or on(request_id) loki({service="b"})[5m]"#,
    )
    .await;
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].join_value, "r2");
    assert_eq!(out[0].events.len(), 1);
    assert_eq!(out[0].metadata.completeness, Completeness::Partial);
}

#[tokio::test]
async fn anti_join_emits_unmatched_left_after_retirement() {
    let eng = engine();
    let loki = ScriptedSource::new("loki");
    loki.script(
        r#"{service="a"}"#,
        vec![event("loki", 0, "r3"), event("loki", 10, "r4")],
    );
    loki.script(r#"{service="b"}"#, vec![event("loki", 20, "r4")]);
    eng.register_adapter(loki).unwrap();

    let out = collect(
        &eng,
        r#"loki({service="a"})[5m] unless on(request_id) loki({service="b"})[5m]"#,
    )
    .await;
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].join_value, "r3");
    assert_eq!(out[0].metadata.completeness, Completeness::Partial);
    assert_eq!(out[0].events.len(), 1);
}

#[tokio::test]
async fn temporal_sub_window_suppresses_distant_matches() {
    let eng = engine();
    let loki = ScriptedSource::new("loki");
    loki.script(r#"{service="a"}"#, vec![event("loki", 0, "rt")]);
    loki.script(r#"{service="b"}"#, vec![event("loki", 10_000, "rt")]);
    eng.register_adapter(loki).unwrap();

    let out = collect(
        &eng,
        r#"loki({service="a"})[5m] and on(request_id) within(5s) loki({service="b"})[5m]"#,
    )
    .await;
    assert!(out.is_empty(), "got {:?}", out);
}

#[tokio::test]
async fn label_mapping_joins_differently_named_labels() {
    let eng = engine();
    let loki = ScriptedSource::new("loki");
    loki.script(
        r#"{service="a"}"#,
        vec![event("loki", 0, "ignored").with_label("request_id", "x")],
    );
    loki.script(
        r#"{service="b"}"#,
        vec![event("loki", 1_000, "ignored2").with_label("trace_id", "x")],
    );
    eng.register_adapter(loki).unwrap();

    let out = collect(
        &eng,
        r#"loki({service="a"})[5m] and on(request_id=trace_id) loki({service="b"})[5m]"#,
    )
    .await;
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].join_value, "x");
    assert_eq!(out[0].events.len(), 2);
    assert_eq!(out[0].metadata.completeness, Completeness::Complete);
}

#[tokio::test]
async fn post_filter_keeps_correlations_with_one_matching_event() {
    let eng = engine();
    let loki = ScriptedSource::new("loki");
    loki.script(
        r#"{service="a"}"#,
        vec![event("loki", 0, "r5").with_label("status", "500")],
    );
    loki.script(
        r#"{service="b"}"#,
        vec![event("loki", 1_000, "r5").with_label("status", "200")],
    );
    eng.register_adapter(loki).unwrap();

    let out = collect(
        &eng,
        r#"loki({service="a"})[5m] and on(request_id) loki({service="b"})[5m] {status=~"5.."}"#,
    )
    .await;
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].events.len(), 2);

    // the mirror filter rejects it
    let out = collect(
        &eng,
        r#"loki({service="a"})[5m] and on(request_id) loki({service="b"})[5m] {status=~"4.."}"#,
    )
    .await;
    assert!(out.is_empty());
}

#[tokio::test]
async fn three_stream_inner_join() {
    let eng = engine();
    let loki = ScriptedSource::new("loki");
    let graylog = ScriptedSource::new("graylog");
    loki.script("a", vec![event("loki", 0, "m1")]);
    loki.script("b", vec![event("loki", 100, "m1")]);
    graylog.script("c", vec![event("graylog", 200, "m1"), event("graylog", 300, "m2")]);
    eng.register_adapter(loki).unwrap();
    eng.register_adapter(graylog).unwrap();

    let out = collect(
        &eng,
        "loki(a)[5m] and on(request_id) loki(b)[5m] and on(request_id) graylog(c)[5m]",
    )
    .await;
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].join_value, "m1");
    assert_eq!(out[0].events.len(), 3);
    assert_eq!(out[0].metadata.total_streams, 3);
    assert_eq!(out[0].metadata.completeness, Completeness::Complete);
}

#[tokio::test]
async fn dedup_stage_suppresses_replayed_events() {
    // batch mode so the final correlation carries every surviving event
    let eng = CorrelationEngine::new(EngineConfig {
        join_mode: weft_engine::JoinMode::Batch,
        ..EngineConfig::default()
    });
    let loki = ScriptedSource::new("loki");
    // the same event twice, as a reconnect replay would produce
    loki.script(
        "a",
        vec![event("loki", 0, "r1"), event("loki", 0, "r1"), event("loki", 5, "r1")],
    );
    loki.script("b", vec![event("loki", 1_000, "r1")]);
    eng.register_adapter(loki).unwrap();

    let out = collect(&eng, "loki(a)[5m] and on(request_id) loki(b)[5m]").await;
    assert_eq!(out.len(), 1);
    // 2 distinct left events + 1 right; the replay is suppressed
    let sources: Vec<u64> = out[0].events.iter().map(|e| e.timestamp.millis()).collect();
    assert_eq!(sources, vec![T0, T0 + 5, T0 + 1_000]);
}

#[tokio::test]
async fn correlation_hook_sees_every_emission() {
    let eng = engine();
    let loki = ScriptedSource::new("loki");
    loki.script("a", vec![event("loki", 0, "r1")]);
    loki.script("b", vec![event("loki", 1, "r1")]);
    eng.register_adapter(loki).unwrap();

    let mut hook = Box::pin(eng.on_correlation());
    let out = collect(&eng, "loki(a)[5m] and on(request_id) loki(b)[5m]").await;
    assert_eq!(out.len(), 1);
    let seen = hook.next().await.unwrap();
    assert_eq!(seen.join_value, "r1");
    assert_eq!(seen.correlation_id, out[0].correlation_id);
}

#[tokio::test]
async fn monitor_counts_events_and_correlations() {
    let eng = engine();
    let loki = ScriptedSource::new("loki");
    loki.script("a", vec![event("loki", 0, "r1"), event("loki", 5, "r2")]);
    loki.script("b", vec![event("loki", 1, "r1")]);
    eng.register_adapter(loki).unwrap();

    let out = collect(&eng, "loki(a)[5m] and on(request_id) loki(b)[5m]").await;
    assert_eq!(out.len(), 1);
    let snapshot = eng.monitor().sample();
    assert_eq!(snapshot.events_processed, 3);
    assert_eq!(snapshot.correlations_found, 1);
    assert_eq!(snapshot.errors, 0);
}

#[tokio::test]
async fn source_failures_end_the_stream_with_the_error() {
    let eng = engine();
    let loki = ScriptedSource::new("loki");
    loki.script_results(
        "a",
        vec![
            Ok(event("loki", 0, "r1")),
            Err(weft_types::SourceError::MaxRetries {
                source_name: "loki".into(),
                attempts: 5,
                last: "connection refused".into(),
            }),
        ],
    );
    loki.script("b", vec![event("loki", 1, "r1")]);
    eng.register_adapter(loki).unwrap();

    let results: Vec<Result<CorrelatedEvent, EngineError>> = eng
        .correlate("loki(a)[5m] and on(request_id) loki(b)[5m]")
        .await
        .unwrap()
        .collect()
        .await;
    // the already-emitted correlation is valid, then the error ends the stream
    assert_eq!(results.len(), 2);
    assert!(results[0].is_ok());
    assert!(matches!(
        results[1],
        Err(EngineError::Source(weft_types::SourceError::MaxRetries { .. }))
    ));
}

#[tokio::test]
async fn destroy_tears_down_adapters_and_cancels_streams() {
    let eng = engine();
    let loki = ScriptedSource::new("loki");
    loki.script("a", vec![event("loki", 0, "r1")]);
    loki.script("b", vec![]);
    let handle = loki.clone();
    eng.register_adapter(loki).unwrap();

    eng.destroy().await;
    assert!(handle.destroyed.load(Ordering::SeqCst));
    assert!(matches!(
        eng.correlate("loki(a)[5m] and on(request_id) loki(b)[5m]").await,
        Err(EngineError::Cancelled)
    ));
}

#[tokio::test]
async fn performance_hook_publishes_snapshots() {
    let eng = CorrelationEngine::new(EngineConfig {
        gc_interval: Duration::from_millis(10),
        ..EngineConfig::default()
    });
    let loki = ScriptedSource::new("loki");
    loki.script("a", vec![event("loki", 0, "r1")]);
    loki.script("b", vec![event("loki", 1, "r1")]);
    eng.register_adapter(loki).unwrap();

    let mut metrics = Box::pin(eng.on_performance_metrics());
    let out = collect(&eng, "loki(a)[5m] and on(request_id) loki(b)[5m]").await;
    assert_eq!(out.len(), 1);
    // wait for a snapshot taken after the events went through
    loop {
        let snapshot = metrics.next().await.unwrap();
        if snapshot.events_processed >= 2 {
            assert_eq!(snapshot.correlations_found, 1);
            break;
        }
    }
}

#[tokio::test]
async fn memory_budget_crossing_emits_a_warning() {
    let eng = CorrelationEngine::new(EngineConfig {
        max_memory_mb: 0,
        gc_interval: Duration::from_millis(10),
        ..EngineConfig::default()
    });
    let loki = ScriptedSource::new("loki");
    loki.script("a", vec![event("loki", 0, "r1")]);
    loki.script("b", vec![]);
    eng.register_adapter(loki).unwrap();

    let mut warnings = Box::pin(eng.on_memory_warning());
    let mut stream = eng
        .correlate("loki(a)[5m] or on(request_id) loki(b)[5m]")
        .await
        .unwrap();
    // pull the partial but keep the pipeline alive so the window stays
    // resident while the sampler runs
    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.join_value, "r1");
    let warning = warnings.next().await.unwrap();
    assert_eq!(warning.budget_bytes, 0);
    assert!(warning.used_bytes > 0);
}

struct HangingSource;

#[async_trait::async_trait]
impl weft_types::EventSource for HangingSource {
    fn name(&self) -> &str {
        "hang"
    }

    async fn create_stream(
        &self,
        _selector: &str,
        _options: weft_types::StreamOptions,
    ) -> Result<weft_types::EventStream, weft_types::SourceError> {
        Ok(futures::stream::pending().boxed())
    }
}

#[tokio::test]
async fn destroy_cancels_inflight_queries() {
    let eng = CorrelationEngine::new(EngineConfig::default());
    eng.register_adapter(std::sync::Arc::new(HangingSource)).unwrap();
    let mut stream = eng
        .correlate("hang(a)[5m] and on(request_id) hang(b)[5m]")
        .await
        .unwrap();
    let pending = tokio::spawn(async move { stream.next().await });
    eng.destroy().await;
    let got = pending.await.unwrap();
    assert!(matches!(got, Some(Err(EngineError::Cancelled))), "got {:?}", got);
}

#[tokio::test]
async fn window_boundaries_admit_inclusively() {
    // the window opens at the first event; an event exactly at windowEnd
    // still joins it
    let eng = engine();
    let loki = ScriptedSource::new("loki");
    loki.script("a", vec![event("loki", 0, "w1")]);
    loki.script("b", vec![event("loki", 300_000, "w1")]);
    eng.register_adapter(loki).unwrap();
    let out = collect(&eng, "loki(a)[5m] and on(request_id) loki(b)[5m]").await;
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].time_window.end, ts(300_000));
}

#[tokio::test]
async fn events_older_than_the_late_tolerance_are_rejected() {
    let eng = engine();
    let loki = ScriptedSource::new("loki");
    // window opens at +40s; the event at exactly start-30s is admitted, the
    // one 1ms earlier is not
    loki.script(
        "a",
        vec![event("loki", 40_000, "w2"), event("loki", 9_999, "w2")],
    );
    loki.script("b", vec![event("loki", 10_000, "w2")]);
    eng.register_adapter(loki).unwrap();
    let out = collect(&eng, "loki(a)[5m] and on(request_id) loki(b)[5m]").await;
    assert_eq!(out.len(), 1);
    let times: Vec<u64> = out[0].events.iter().map(|e| e.timestamp.millis() - T0).collect();
    assert_eq!(times, vec![10_000, 40_000]);
}
