//! Work-window derivation: where did this stretch of work start?
//!
//! Operators record durations, not clock times. The rules here turn a
//! duration (or several, for a batch) into concrete start/end windows:
//! an explicit start is taken verbatim, a recent end-of-work signal is
//! continued from, and otherwise the start is worked backward from now.
//! Derived times land on five-minute marks; explicit times and window
//! ends are never re-snapped.

use chrono::{Local, NaiveDate};

use super::Engine;
use crate::error::Result;
use crate::model::{ClockTime, TimeWindow, UserId};
use crate::store::ClearanceStore;

/// Granularity of derived start times, minutes.
pub const SNAP_STEP_MIN: u16 = 5;

/// An end-of-work signal older than this no longer counts as "still out
/// working"; the backward-from-now rule applies instead.
pub const CONTINUATION_MAX_AGE_MIN: u32 = 30;

/// Round to the nearest five-minute mark, half up.
pub fn snap(t: ClockTime) -> ClockTime {
    t.snap_to(SNAP_STEP_MIN)
}

/// Pick the start of a stretch of work totalling `total_minutes`.
///
/// Precedence: an explicit start wins untouched; a last-end signal within
/// [`CONTINUATION_MAX_AGE_MIN`] of now continues the shift from there;
/// otherwise the work is assumed to have just finished and the start is
/// counted backward from now. All comparisons wrap past midnight.
pub fn base_start(
    now: ClockTime,
    total_minutes: u32,
    explicit: Option<ClockTime>,
    last_end: Option<ClockTime>,
) -> ClockTime {
    if let Some(start) = explicit {
        return start;
    }
    if let Some(end) = last_end {
        if now.minutes_since(end) <= CONTINUATION_MAX_AGE_MIN {
            return snap(end);
        }
    }
    let end = snap(now);
    snap(end.offset(-(total_minutes as i32)))
}

/// One window of `duration_min` minutes placed by [`base_start`].
pub fn resolve_window(
    now: ClockTime,
    duration_min: u32,
    explicit: Option<ClockTime>,
    last_end: Option<ClockTime>,
) -> TimeWindow {
    let start = base_start(now, duration_min, explicit, last_end);
    TimeWindow::new(start, start.offset(duration_min as i32))
}

/// Back-to-back windows from `base`, one per duration, in order. Each
/// window starts where the previous one ended.
pub fn sequence_windows(base: ClockTime, durations: &[u32]) -> Vec<TimeWindow> {
    let mut windows = Vec::with_capacity(durations.len());
    let mut start = base;
    for d in durations {
        let end = start.offset(*d as i32);
        windows.push(TimeWindow::new(start, end));
        start = end;
    }
    windows
}

impl<S: ClearanceStore> Engine<S> {
    /// Resolve the work window for one street, consulting the actor's
    /// latest end-of-work signal for the continuation rule.
    pub async fn resolve_window(
        &self,
        actor: UserId,
        date: NaiveDate,
        duration_min: u32,
        explicit_start: Option<ClockTime>,
    ) -> Result<TimeWindow> {
        let last_end = self.store().last_work_end(actor, date).await?;
        let now = ClockTime::from(Local::now().time());
        Ok(resolve_window(now, duration_min, explicit_start, last_end))
    }

    /// Resolve the window sequence for a batch. The continuation rule
    /// uses the sum of all durations, so the whole batch shifts as one
    /// stretch of work.
    pub async fn resolve_batch_windows(
        &self,
        actor: UserId,
        date: NaiveDate,
        durations: &[u32],
        explicit_start: Option<ClockTime>,
    ) -> Result<Vec<TimeWindow>> {
        let last_end = self.store().last_work_end(actor, date).await?;
        let now = ClockTime::from(Local::now().time());
        let total: u32 = durations.iter().sum();
        let base = base_start(now, total, explicit_start, last_end);
        Ok(sequence_windows(base, durations))
    }
}
