//! Integration tests for telemetry initialization and span helpers.

use chrono::NaiveDate;
use plowtrack::model::StreetId;

#[test]
fn telemetry_initializes_without_endpoint() {
    // Note: tracing subscriber can only be set once per process.
    // Using try_init() in the implementation avoids panics if another
    // test already initialized a subscriber.
    let config = plowtrack::telemetry::TelemetryConfig {
        endpoint: None,
        service_name: "plowtrack-test".to_string(),
    };
    // This may return Err if a global subscriber was already set by
    // another test in this process; that is acceptable.
    let _guard = plowtrack::telemetry::init_telemetry(config);
}

#[test]
fn street_span_creates_and_records_outcome() {
    let street = StreetId::new();
    let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
    let span = plowtrack::telemetry::status::start_street_span(&street, date);
    plowtrack::telemetry::status::record_outcome(&span, "ok");
}

#[test]
fn street_span_records_error_outcomes_too() {
    let street = StreetId::new();
    let date = NaiveDate::from_ymd_opt(2024, 1, 16).unwrap();
    let span = plowtrack::telemetry::status::start_street_span(&street, date);
    plowtrack::telemetry::status::record_outcome(&span, "error");
}
