//! Smoke tests for the full observability stack.
//!
//! These tests require the Docker Compose stack running:
//! ```sh
//! docker compose up -d
//! ```
//!
//! Run with:
//! ```sh
//! cargo test --test telemetry_smoke_test -- --ignored --nocapture
//! ```

use std::sync::OnceLock;
use std::time::Duration;

use chrono::NaiveDate;
use opentelemetry::KeyValue;
use plowtrack::model::StreetId;

static TELEMETRY: OnceLock<plowtrack::telemetry::TelemetryGuard> = OnceLock::new();

fn ensure_telemetry() -> &'static plowtrack::telemetry::TelemetryGuard {
    TELEMETRY.get_or_init(|| {
        plowtrack::telemetry::init_telemetry(plowtrack::telemetry::TelemetryConfig {
            endpoint: Some("http://localhost:4317".to_string()),
            service_name: "plowtrack-smoke-test".to_string(),
        })
        .expect("failed to init telemetry")
    })
}

fn service_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
}

/// Force-flush all providers and give backends time to ingest.
async fn flush_and_wait(guard: &plowtrack::telemetry::TelemetryGuard) {
    guard.force_flush();
    // Give batch exporters and backends time to process.
    tokio::time::sleep(Duration::from_secs(8)).await;
}

// ---------------------------------------------------------------------------
// Traces
// ---------------------------------------------------------------------------

#[test]
#[ignore]
fn smoke_traces() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let guard = ensure_telemetry();

        // Generate trace data: spans must be entered to be exported.
        {
            let street = StreetId::new();
            let span = plowtrack::telemetry::status::start_street_span(&street, service_date());
            let _enter = span.enter();
            plowtrack::telemetry::status::record_outcome(&span, "ok");
        }

        flush_and_wait(guard).await;

        // Query Tempo for traces from our service.
        let client = reqwest::Client::new();
        let resp = client
            .get("http://localhost:3200/api/search")
            .query(&[("tags", "service.name=plowtrack-smoke-test"), ("limit", "5")])
            .send()
            .await
            .expect("failed to query Tempo");

        assert!(
            resp.status().is_success(),
            "Tempo query failed: {}",
            resp.status()
        );

        let body: serde_json::Value = resp.json().await.expect("failed to parse Tempo response");
        let traces = body["traces"].as_array();
        assert!(
            traces.is_some_and(|t| !t.is_empty()),
            "expected traces in Tempo, got: {body}"
        );
        println!("Tempo: found {} trace(s)", traces.unwrap().len());

        // The resource also carries the crate version, so a search scoped
        // to it must find the same traces.
        let version_tags = format!(
            "service.name=plowtrack-smoke-test service.version={}",
            env!("CARGO_PKG_VERSION")
        );
        let resp = client
            .get("http://localhost:3200/api/search")
            .query(&[("tags", version_tags.as_str()), ("limit", "5")])
            .send()
            .await
            .expect("failed to query Tempo");
        let body: serde_json::Value = resp.json().await.expect("failed to parse Tempo response");
        let traces = body["traces"].as_array();
        assert!(
            traces.is_some_and(|t| !t.is_empty()),
            "expected version-tagged traces in Tempo, got: {body}"
        );
    });
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

#[test]
#[ignore]
fn smoke_metrics() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let guard = ensure_telemetry();

        // Emit metric data.
        let transitions = plowtrack::telemetry::metrics::status_transitions();
        transitions.add(
            1,
            &[KeyValue::new("from", "open"), KeyValue::new("to", "en_route")],
        );
        transitions.add(
            1,
            &[KeyValue::new("from", "en_route"), KeyValue::new("to", "done")],
        );

        let histogram = plowtrack::telemetry::metrics::operation_duration_ms();
        histogram.record(42.5, &[KeyValue::new("operation", "smoke")]);

        let written = plowtrack::telemetry::metrics::work_logs_written();
        written.add(3, &[KeyValue::new("mode", "batch")]);

        flush_and_wait(guard).await;

        // Query Prometheus for our metric.
        let client = reqwest::Client::new();
        let resp = client
            .get("http://localhost:9090/api/v1/query")
            .query(&[("query", "plowtrack_status_transitions_total")])
            .send()
            .await
            .expect("failed to query Prometheus");

        assert!(
            resp.status().is_success(),
            "Prometheus query failed: {}",
            resp.status()
        );

        let body: serde_json::Value = resp
            .json()
            .await
            .expect("failed to parse Prometheus response");
        let results = body["data"]["result"].as_array();
        assert!(
            results.is_some_and(|r| !r.is_empty()),
            "expected metric results in Prometheus, got: {body}"
        );
        println!(
            "Prometheus: found {} series for plowtrack_status_transitions_total",
            results.unwrap().len()
        );
    });
}

// ---------------------------------------------------------------------------
// Logs
// ---------------------------------------------------------------------------

#[test]
#[ignore]
fn smoke_logs() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let guard = ensure_telemetry();

        // Emit log data via tracing macros (bridged to OTel logs).
        tracing::info!(component = "smoke-test", "smoke test info log");
        tracing::warn!(component = "smoke-test", "smoke test warning log");

        flush_and_wait(guard).await;

        // Query Loki for logs from our service.
        let client = reqwest::Client::new();
        let resp = client
            .get("http://localhost:3100/loki/api/v1/query_range")
            .query(&[
                ("query", r#"{service_name="plowtrack-smoke-test"}"#),
                ("limit", "10"),
            ])
            .send()
            .await
            .expect("failed to query Loki");

        assert!(
            resp.status().is_success(),
            "Loki query failed: {}",
            resp.status()
        );

        let body: serde_json::Value = resp.json().await.expect("failed to parse Loki response");
        let streams = body["data"]["result"].as_array();
        assert!(
            streams.is_some_and(|s| !s.is_empty()),
            "expected log streams in Loki, got: {body}"
        );
        println!("Loki: found {} stream(s)", streams.unwrap().len());
    });
}

// ---------------------------------------------------------------------------
// Full lifecycle
// ---------------------------------------------------------------------------

#[test]
#[ignore]
fn smoke_full_lifecycle() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let guard = ensure_telemetry();

        // Simulate one street's clearance day generating all signal types.
        let street = StreetId::new();

        // Traces: enter the street span so it is exported.
        {
            let span = plowtrack::telemetry::status::start_street_span(&street, service_date());
            let _enter = span.enter();
            plowtrack::telemetry::status::record_outcome(&span, "ok");
        }

        // Metrics: counters + histogram
        let transitions = plowtrack::telemetry::metrics::status_transitions();
        for (from, to) in [("open", "en_route"), ("en_route", "done"), ("done", "open")] {
            transitions.add(1, &[KeyValue::new("from", from), KeyValue::new("to", to)]);
        }

        let rounds = plowtrack::telemetry::metrics::rounds_started();
        rounds.add(1, &[]);

        let feed = plowtrack::telemetry::metrics::feed_events();
        feed.add(
            1,
            &[KeyValue::new("kind", "upsert"), KeyValue::new("outcome", "applied")],
        );
        feed.add(
            1,
            &[KeyValue::new("kind", "upsert"), KeyValue::new("outcome", "ignored")],
        );

        let written = plowtrack::telemetry::metrics::work_logs_written();
        written.add(2, &[KeyValue::new("mode", "batch")]);
        written.add(1, &[KeyValue::new("mode", "fallback")]);

        let batch = plowtrack::telemetry::metrics::batch_entities();
        batch.add(3, &[KeyValue::new("result", "ok")]);
        batch.add(1, &[KeyValue::new("result", "error")]);

        let duration = plowtrack::telemetry::metrics::operation_duration_ms();
        duration.record(150.0, &[KeyValue::new("operation", "batch.complete")]);
        duration.record(25.0, &[KeyValue::new("operation", "batch.start")]);

        // Logs: various levels
        tracing::info!(street = %street, "clearance started");
        tracing::info!(street = %street, "state transition: open -> done");
        tracing::warn!(street = %street, "simulated warning during lifecycle");

        flush_and_wait(guard).await;

        // Verify all three backends have data.
        let client = reqwest::Client::new();

        // Tempo
        let resp = client
            .get("http://localhost:3200/api/search")
            .query(&[("tags", "service.name=plowtrack-smoke-test"), ("limit", "5")])
            .send()
            .await
            .expect("failed to query Tempo");
        let body: serde_json::Value = resp.json().await.unwrap();
        let trace_count = body["traces"].as_array().map_or(0, |t| t.len());
        println!("Full lifecycle, Tempo: {trace_count} trace(s)");
        assert!(trace_count > 0, "expected traces in Tempo");

        // Prometheus
        let resp = client
            .get("http://localhost:9090/api/v1/query")
            .query(&[("query", "plowtrack_status_transitions_total")])
            .send()
            .await
            .expect("failed to query Prometheus");
        let body: serde_json::Value = resp.json().await.unwrap();
        let metric_count = body["data"]["result"].as_array().map_or(0, |r| r.len());
        println!("Full lifecycle, Prometheus: {metric_count} series");
        assert!(metric_count > 0, "expected metrics in Prometheus");

        // Loki
        let resp = client
            .get("http://localhost:3100/loki/api/v1/query_range")
            .query(&[
                ("query", r#"{service_name="plowtrack-smoke-test"}"#),
                ("limit", "10"),
            ])
            .send()
            .await
            .expect("failed to query Loki");
        let body: serde_json::Value = resp.json().await.unwrap();
        let log_count = body["data"]["result"].as_array().map_or(0, |s| s.len());
        println!("Full lifecycle, Loki: {log_count} stream(s)");
        assert!(log_count > 0, "expected logs in Loki");

        println!("Full lifecycle smoke test passed!");
    });
}
