//! Reconciler tests: pure event application on one side, a live
//! store-fed reconciler on the other.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use plowtrack::engine::{Engine, StatusView};
use plowtrack::feed::FeedEvent;
use plowtrack::model::{Actor, Role, Status, StatusKey, StatusRecord, StreetId, TimeWindow, UserId};
use plowtrack::realtime::{Applied, Reconciler, apply_event};
use plowtrack::store::ClearanceStore;
use plowtrack::store::memory::MemStore;
use tokio::sync::watch;

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
}

fn worker() -> Actor {
    Actor::new(UserId::new(), Role::Worker)
}

fn window(start: &str, end: &str) -> TimeWindow {
    TimeWindow::new(start.parse().unwrap(), end.parse().unwrap())
}

/// Poll the watch until the view satisfies `pred`, or fail after 5s.
async fn wait_until<F>(rx: &mut watch::Receiver<StatusView>, mut pred: F) -> StatusView
where
    F: FnMut(&StatusView) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        {
            let view = rx.borrow_and_update();
            if pred(&view) {
                return view.clone();
            }
        }
        tokio::select! {
            changed = rx.changed() => changed.expect("reconciler dropped its watch"),
            _ = tokio::time::sleep_until(deadline) => panic!("view never converged"),
        }
    }
}

// ---------------------------------------------------------------------------
// Pure event application
// ---------------------------------------------------------------------------

#[test]
fn upsert_replaces_the_record_wholesale() {
    let key = StatusKey::new(StreetId::new(), date());
    let mut current = StatusRecord::fresh(key);

    let mut incoming = StatusRecord::fresh(key);
    incoming.status = Status::Done;
    incoming.current_round = 2;
    incoming.total_rounds = 2;

    let applied = apply_event(&mut current, key, &FeedEvent::Upsert(incoming.clone()));
    assert_eq!(applied, Applied::Replaced { rounds_changed: true });
    assert_eq!(current, incoming);
}

#[test]
fn replaying_an_event_changes_nothing() {
    let key = StatusKey::new(StreetId::new(), date());
    let mut current = StatusRecord::fresh(key);

    let mut incoming = StatusRecord::fresh(key);
    incoming.status = Status::EnRoute;
    let event = FeedEvent::Upsert(incoming.clone());

    apply_event(&mut current, key, &event);
    let applied = apply_event(&mut current, key, &event);
    assert_eq!(applied, Applied::Replaced { rounds_changed: false });
    assert_eq!(current, incoming);
}

#[test]
fn roster_only_changes_do_not_flag_the_ledger() {
    let key = StatusKey::new(StreetId::new(), date());
    let mut current = StatusRecord::fresh(key);

    let mut incoming = current.clone();
    incoming.assigned_users.insert(UserId::new());

    let applied = apply_event(&mut current, key, &FeedEvent::Upsert(incoming));
    assert_eq!(applied, Applied::Replaced { rounds_changed: false });
}

#[test]
fn upsert_for_another_day_is_ignored() {
    let street = StreetId::new();
    let key = StatusKey::new(street, date());
    let mut current = StatusRecord::fresh(key);

    let other_day = StatusKey::new(street, date().succ_opt().unwrap());
    let mut incoming = StatusRecord::fresh(other_day);
    incoming.status = Status::Done;

    let before = current.clone();
    let applied = apply_event(&mut current, key, &FeedEvent::Upsert(incoming));
    assert_eq!(applied, Applied::Ignored);
    assert_eq!(current, before);
}

#[test]
fn upsert_for_another_street_is_ignored() {
    let key = StatusKey::new(StreetId::new(), date());
    let mut current = StatusRecord::fresh(key);

    let incoming = StatusRecord::fresh(StatusKey::new(StreetId::new(), date()));
    let applied = apply_event(&mut current, key, &FeedEvent::Upsert(incoming));
    assert_eq!(applied, Applied::Ignored);
}

#[test]
fn delete_resets_regardless_of_event_date() {
    let street = StreetId::new();
    let key = StatusKey::new(street, date());
    let mut current = StatusRecord::fresh(key);
    current.status = Status::Done;
    current.current_round = 3;

    let other_day = StatusKey::new(street, date().succ_opt().unwrap());
    let applied = apply_event(&mut current, key, &FeedEvent::Delete(other_day));
    assert_eq!(applied, Applied::Reset);
    assert_eq!(current.status, Status::Open);
    assert_eq!(current.current_round, 1);
    assert_eq!(current.date, date());
}

// ---------------------------------------------------------------------------
// Live reconciliation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn view_follows_engine_writes() {
    let store = Arc::new(MemStore::new());
    let engine = Engine::new(Arc::clone(&store));
    let street = StreetId::new();
    let actor = worker();

    let rec = Reconciler::attach(Arc::clone(&store), street, date())
        .await
        .unwrap();
    let mut rx = rec.watch();
    let stop = rec.stopper();
    let runner = tokio::spawn(async move {
        let mut rec = rec;
        rec.run().await;
    });

    engine.start(street, date(), actor).await.unwrap();
    engine
        .complete(street, date(), actor, window("08:00", "08:30"), None)
        .await
        .unwrap();

    let view = wait_until(&mut rx, |v| v.record.status == Status::Done).await;
    assert_eq!(view.record.street_id, street);
    assert_eq!(view.completed_rounds.len(), 1);
    assert_eq!(view.completed_rounds[0].round_number, 1);

    stop.stop();
    runner.await.unwrap();
}

#[tokio::test]
async fn delete_resets_the_live_view() {
    let store = Arc::new(MemStore::new());
    let engine = Engine::new(Arc::clone(&store));
    let street = StreetId::new();
    let admin = Actor::new(UserId::new(), Role::Admin);

    engine
        .complete(street, date(), admin, window("08:00", "08:30"), None)
        .await
        .unwrap();

    let rec = Reconciler::attach(Arc::clone(&store), street, date())
        .await
        .unwrap();
    assert_eq!(rec.view().record.status, Status::Done);

    let mut rx = rec.watch();
    let stop = rec.stopper();
    let runner = tokio::spawn(async move {
        let mut rec = rec;
        rec.run().await;
    });

    engine.purge(street, date(), admin).await.unwrap();

    let view = wait_until(&mut rx, |v| {
        v.record.status == Status::Open && v.completed_rounds.is_empty()
    })
    .await;
    assert_eq!(view.record.current_round, 1);

    stop.stop();
    runner.await.unwrap();
}

#[tokio::test]
async fn events_for_another_day_leave_the_view_alone() {
    let store = Arc::new(MemStore::new());
    let engine = Engine::new(Arc::clone(&store));
    let street = StreetId::new();
    let actor = worker();
    let other_day = date().succ_opt().unwrap();

    let rec = Reconciler::attach(Arc::clone(&store), street, date())
        .await
        .unwrap();
    let mut rx = rec.watch();
    let stop = rec.stopper();
    let runner = tokio::spawn(async move {
        let mut rec = rec;
        rec.run().await;
    });

    // Same street, wrong day first; the displayed day's event follows,
    // so once EnRoute shows, the wrong-day Done has been and gone.
    engine
        .complete(street, other_day, actor, window("07:00", "07:30"), None)
        .await
        .unwrap();
    engine.start(street, date(), actor).await.unwrap();

    let view = wait_until(&mut rx, |v| v.record.status == Status::EnRoute).await;
    assert_eq!(view.record.date, date());
    assert!(view.completed_rounds.is_empty());

    stop.stop();
    runner.await.unwrap();
}

#[tokio::test]
async fn refresh_catches_up_without_the_feed() {
    let store = Arc::new(MemStore::new());
    let engine = Engine::new(Arc::clone(&store));
    let street = StreetId::new();

    let mut rec = Reconciler::attach(Arc::clone(&store), street, date())
        .await
        .unwrap();
    assert_eq!(rec.view().record.status, Status::Open);

    // The reconciler is not running, so the write only lands on refresh.
    engine
        .complete(street, date(), worker(), window("08:00", "08:30"), None)
        .await
        .unwrap();
    rec.refresh().await.unwrap();

    assert_eq!(rec.view().record.status, Status::Done);
    assert_eq!(rec.view().completed_rounds.len(), 1);
}

#[tokio::test]
async fn retarget_switches_the_displayed_street() {
    let store = Arc::new(MemStore::new());
    let engine = Engine::new(Arc::clone(&store));
    let (s1, s2) = (StreetId::new(), StreetId::new());

    engine
        .complete(s2, date(), worker(), window("08:00", "08:30"), None)
        .await
        .unwrap();

    let mut rec = Reconciler::attach(Arc::clone(&store), s1, date())
        .await
        .unwrap();
    rec.retarget(s2, date()).await.unwrap();

    assert_eq!(rec.key(), StatusKey::new(s2, date()));
    assert_eq!(rec.view().record.street_id, s2);
    assert_eq!(rec.view().record.status, Status::Done);
}

#[tokio::test]
async fn attach_reads_without_creating() {
    let store = Arc::new(MemStore::new());
    let street = StreetId::new();

    let rec = Reconciler::attach(Arc::clone(&store), street, date())
        .await
        .unwrap();
    assert_eq!(rec.view().record.status, Status::Open);

    let stored = store
        .fetch_status(StatusKey::new(street, date()))
        .await
        .unwrap();
    assert!(stored.is_none());
}
