//! Work-window derivation tests: five-minute snapping, the continuation
//! rule, backward derivation from now, and batch sequencing.

use std::sync::Arc;

use chrono::NaiveDate;
use plowtrack::engine::Engine;
use plowtrack::engine::timing::{base_start, resolve_window, sequence_windows, snap};
use plowtrack::model::{
    ClockTime, StatusKey, StatusRecord, StreetId, TimeWindow, UserId, WorkLogEntry,
    window_timestamps,
};
use plowtrack::store::ClearanceStore;
use plowtrack::store::memory::MemStore;

fn ct(s: &str) -> ClockTime {
    s.parse().unwrap()
}

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
}

// ---------------------------------------------------------------------------
// Snapping
// ---------------------------------------------------------------------------

#[test]
fn snap_rounds_half_up_to_five_minutes() {
    assert_eq!(snap(ct("09:10")), ct("09:10"));
    assert_eq!(snap(ct("09:12")), ct("09:10"));
    assert_eq!(snap(ct("09:13")), ct("09:15"));
    assert_eq!(snap(ct("09:58")), ct("10:00"));
}

#[test]
fn snap_wraps_past_midnight() {
    assert_eq!(snap(ct("23:58")), ct("00:00"));
}

// ---------------------------------------------------------------------------
// Start derivation
// ---------------------------------------------------------------------------

#[test]
fn explicit_start_is_taken_verbatim() {
    // Not snapped, and any end-of-work signal is ignored.
    let start = base_start(ct("10:00"), 30, Some(ct("08:03")), Some(ct("09:55")));
    assert_eq!(start, ct("08:03"));
}

#[test]
fn recent_signal_continues_the_shift() {
    let start = base_start(ct("09:20"), 30, None, Some(ct("09:15")));
    assert_eq!(start, ct("09:15"));

    // The full window picks up where the previous shift stopped.
    let window = resolve_window(ct("09:20"), 20, None, Some(ct("09:15")));
    assert_eq!(window, TimeWindow::new(ct("09:15"), ct("09:35")));
}

#[test]
fn continued_signal_is_snapped() {
    let start = base_start(ct("09:20"), 30, None, Some(ct("09:13")));
    assert_eq!(start, ct("09:15"));
}

#[test]
fn signal_exactly_at_the_age_limit_still_continues() {
    let start = base_start(ct("09:45"), 10, None, Some(ct("09:15")));
    assert_eq!(start, ct("09:15"));
}

#[test]
fn lapsed_signal_counts_backward_from_now() {
    // 45 minutes since the last end: too old, so the 30 minutes of work
    // are assumed to have just finished.
    let start = base_start(ct("09:45"), 30, None, Some(ct("09:00")));
    assert_eq!(start, ct("09:15"));
}

#[test]
fn no_signal_counts_backward_from_now() {
    assert_eq!(base_start(ct("10:07"), 25, None, None), ct("09:40"));
    assert_eq!(base_start(ct("10:03"), 30, None, None), ct("09:35"));
}

#[test]
fn backward_derivation_wraps_midnight() {
    let window = resolve_window(ct("00:10"), 30, None, None);
    assert_eq!(window, TimeWindow::new(ct("23:40"), ct("00:10")));
    assert!(window.wraps_midnight());
    assert_eq!(window.span_minutes(), 30);
}

#[test]
fn continuation_works_across_midnight() {
    let start = base_start(ct("00:10"), 20, None, Some(ct("23:50")));
    assert_eq!(start, ct("23:50"));
}

#[test]
fn resolved_window_ends_after_its_duration() {
    let window = resolve_window(ct("09:45"), 30, None, Some(ct("09:00")));
    assert_eq!(window, TimeWindow::new(ct("09:15"), ct("09:45")));
}

// ---------------------------------------------------------------------------
// Batch sequencing
// ---------------------------------------------------------------------------

#[test]
fn sequence_windows_are_back_to_back() {
    let windows = sequence_windows(ct("08:00"), &[10, 10, 10]);
    assert_eq!(
        windows,
        vec![
            TimeWindow::new(ct("08:00"), ct("08:10")),
            TimeWindow::new(ct("08:10"), ct("08:20")),
            TimeWindow::new(ct("08:20"), ct("08:30")),
        ]
    );
}

#[test]
fn sequence_windows_carry_mixed_durations_past_midnight() {
    let windows = sequence_windows(ct("22:30"), &[60, 90]);
    assert_eq!(windows[0], TimeWindow::new(ct("22:30"), ct("23:30")));
    assert_eq!(windows[1], TimeWindow::new(ct("23:30"), ct("01:00")));
    assert!(windows[1].wraps_midnight());
}

#[tokio::test]
async fn engine_batch_windows_honor_an_explicit_start() {
    let engine = Engine::new(Arc::new(MemStore::new()));
    let windows = engine
        .resolve_batch_windows(UserId::new(), date(), &[10, 10, 10], Some(ct("08:00")))
        .await
        .unwrap();
    assert_eq!(
        windows,
        vec![
            TimeWindow::new(ct("08:00"), ct("08:10")),
            TimeWindow::new(ct("08:10"), ct("08:20")),
            TimeWindow::new(ct("08:20"), ct("08:30")),
        ]
    );
}

// ---------------------------------------------------------------------------
// End-of-work signal lookup
// ---------------------------------------------------------------------------

#[tokio::test]
async fn last_work_end_takes_the_later_of_logs_and_status() {
    let store = MemStore::new();
    let user = UserId::new();

    // A finished status round with the user on its roster...
    let key = StatusKey::new(StreetId::new(), date());
    let mut record = StatusRecord::fresh(key);
    record.finished_at = Some(date().and_hms_opt(9, 40, 0).unwrap());
    record.assigned_users.insert(user);
    store
        .upsert_current(&record, &record.round_entry())
        .await
        .unwrap();

    // ...and an earlier work-log entry.
    let entry = WorkLogEntry::for_shift(
        user,
        None,
        date(),
        TimeWindow::new(ct("08:30"), ct("09:15")),
        None,
    );
    store.insert_work_log(&entry).await.unwrap();

    assert_eq!(store.last_work_end(user, date()).await.unwrap(), Some(ct("09:40")));
}

#[tokio::test]
async fn last_work_end_is_none_for_an_unknown_user() {
    let store = MemStore::new();
    assert_eq!(store.last_work_end(UserId::new(), date()).await.unwrap(), None);
}

// ---------------------------------------------------------------------------
// Wall-clock composition
// ---------------------------------------------------------------------------

#[test]
fn wrapped_window_ends_on_the_next_day() {
    let (start, end) = window_timestamps(date(), TimeWindow::new(ct("23:40"), ct("00:10")));
    assert_eq!(start, date().and_hms_opt(23, 40, 0).unwrap());
    assert_eq!(
        end,
        date().succ_opt().unwrap().and_hms_opt(0, 10, 0).unwrap()
    );
}

#[test]
fn clock_time_parses_and_displays() {
    assert_eq!(ct("06:05").to_string(), "06:05");
    assert_eq!(ct("00:00").minutes(), 0);
    assert!("8h30".parse::<ClockTime>().is_err());
    assert!("25:00".parse::<ClockTime>().is_err());
    assert!("08:60".parse::<ClockTime>().is_err());
}

#[test]
fn minutes_since_wraps_backward_past_midnight() {
    assert_eq!(ct("00:10").minutes_since(ct("23:50")), 20);
    assert_eq!(ct("09:45").minutes_since(ct("09:00")), 45);
}
