//! Metric instrument factories for plowtrack.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"plowtrack"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for plowtrack instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("plowtrack")
}

/// Counter: status transitions applied to street records.
/// Labels: `from`, `to`.
pub fn status_transitions() -> Counter<u64> {
    meter()
        .u64_counter("plowtrack.status.transitions")
        .with_description("Number of street status transitions")
        .build()
}

/// Counter: new clearance rounds started.
pub fn rounds_started() -> Counter<u64> {
    meter()
        .u64_counter("plowtrack.rounds.started")
        .with_description("Number of clearance rounds started")
        .build()
}

/// Counter: feed events seen by reconcilers.
/// Labels: `kind` ("upsert" | "delete"), `outcome` ("applied" | "ignored" | "reset").
pub fn feed_events() -> Counter<u64> {
    meter()
        .u64_counter("plowtrack.feed.events")
        .with_description("Number of change-feed events processed")
        .build()
}

/// Counter: work-log entries written.
/// Labels: `mode` ("batch" | "fallback" | "manual").
pub fn work_logs_written() -> Counter<u64> {
    meter()
        .u64_counter("plowtrack.worklog.written")
        .with_description("Number of work-log entries written")
        .build()
}

/// Counter: store operations retried after a transient error.
/// Labels: `op`.
pub fn store_retries() -> Counter<u64> {
    meter()
        .u64_counter("plowtrack.store.retries")
        .with_description("Number of retried store operations")
        .build()
}

/// Counter: streets processed by batch operations.
/// Labels: `result` ("ok" | "error").
pub fn batch_entities() -> Counter<u64> {
    meter()
        .u64_counter("plowtrack.batch.entities")
        .with_description("Number of streets processed in batches")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("plowtrack.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
