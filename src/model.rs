//! Core data model.
//!
//! A street is tracked per calendar day: its clearance status, the round
//! it is on, who is assigned, and the start/finish times that later turn
//! into billable work-log entries. The live record is mirrored into an
//! append-only round ledger so every clearance pass keeps its own history.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Newtype for street (serviced road segment) IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StreetId(pub Uuid);

impl StreetId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for StreetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short display: first 8 chars of UUID
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl Default for StreetId {
    fn default() -> Self {
        Self::new()
    }
}

/// Newtype for worker/user IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

/// The set of workers credited with a round's work. Order irrelevant,
/// always well-defined: an empty roster is an empty set, never a null.
pub type Roster = BTreeSet<UserId>;

// ---------------------------------------------------------------------------
// Clock time
// ---------------------------------------------------------------------------

/// A local wall-clock time as minutes since midnight, in `0..1440`.
///
/// Work-log start/end times are clock times, not full timestamps: the
/// service day is carried separately and windows may wrap past midnight.
/// All arithmetic wraps modulo one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClockTime(u16);

impl ClockTime {
    pub const MINUTES_PER_DAY: i32 = 24 * 60;

    /// Build from an arbitrary minute count, wrapping into `0..1440`.
    pub fn from_minutes(total: i32) -> Self {
        Self(total.rem_euclid(Self::MINUTES_PER_DAY) as u16)
    }

    /// Build from hour/minute components, wrapping out-of-range values.
    pub fn of(hour: i32, minute: i32) -> Self {
        Self::from_minutes(hour * 60 + minute)
    }

    pub fn minutes(self) -> u16 {
        self.0
    }

    pub fn hour(self) -> u32 {
        u32::from(self.0) / 60
    }

    pub fn minute(self) -> u32 {
        u32::from(self.0) % 60
    }

    /// Shift by a signed number of minutes, wrapping past midnight.
    pub fn offset(self, delta: i32) -> Self {
        Self::from_minutes(i32::from(self.0) + delta)
    }

    /// Wrapped distance in minutes from `earlier` forward to `self`.
    ///
    /// `00:10.minutes_since(23:50) == 20`.
    pub fn minutes_since(self, earlier: ClockTime) -> u32 {
        (i32::from(self.0) - i32::from(earlier.0)).rem_euclid(Self::MINUTES_PER_DAY) as u32
    }

    /// Snap to the nearest multiple of `step` minutes, round-half-up.
    /// Snapping may wrap past midnight (23:58 with step 5 becomes 00:00).
    pub fn snap_to(self, step: u16) -> Self {
        let step = i32::from(step.max(1));
        let snapped = (i32::from(self.0) + step / 2) / step * step;
        Self::from_minutes(snapped)
    }

    pub fn to_naive(self) -> NaiveTime {
        NaiveTime::from_num_seconds_from_midnight_opt(u32::from(self.0) * 60, 0)
            .unwrap_or(NaiveTime::MIN)
    }
}

impl From<NaiveTime> for ClockTime {
    fn from(t: NaiveTime) -> Self {
        // Seconds are truncated; the domain works in whole minutes.
        Self((t.hour() * 60 + t.minute()) as u16)
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

impl FromStr for ClockTime {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || Error::InvalidClockTime(s.to_string());
        let (h, m) = s.split_once(':').ok_or_else(bad)?;
        let hour: u32 = h.parse().map_err(|_| bad())?;
        let minute: u32 = m.parse().map_err(|_| bad())?;
        if hour >= 24 || minute >= 60 {
            return Err(bad());
        }
        Ok(Self((hour * 60 + minute) as u16))
    }
}

impl Serialize for ClockTime {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ClockTime {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A `{start, end}` clock-time window for one stretch of work.
/// `end < start` means the window wraps past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: ClockTime,
    pub end: ClockTime,
}

impl TimeWindow {
    pub fn new(start: ClockTime, end: ClockTime) -> Self {
        Self { start, end }
    }

    pub fn wraps_midnight(&self) -> bool {
        self.end < self.start
    }

    /// Window length in minutes, accounting for midnight wrap.
    pub fn span_minutes(&self) -> u32 {
        self.end.minutes_since(self.start)
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Clearance status of a street on a given day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Not yet touched this round.
    Open,
    /// A crew is on the street.
    EnRoute,
    /// This round's clearance is finished.
    Done,
}

impl Status {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: Status) -> bool {
        use Status::*;
        matches!(
            (self, to),
            (Open, EnRoute)
                | (Open, Done)     // direct completion without start
                | (EnRoute, Done)
                | (EnRoute, Open)  // reset
                | (Done, Open) // reset or next round
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Open => "open",
            Status::EnRoute => "en_route",
            Status::Done => "done",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Status::Open),
            "en_route" => Ok(Status::EnRoute),
            "done" => Ok(Status::Done),
            other => Err(Error::UnknownStatus(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Status record
// ---------------------------------------------------------------------------

/// Primary key of the live status table: one record per street per day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatusKey {
    pub street: StreetId,
    pub date: NaiveDate,
}

impl StatusKey {
    pub fn new(street: StreetId, date: NaiveDate) -> Self {
        Self { street, date }
    }
}

impl fmt::Display for StatusKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.street, self.date)
    }
}

/// The live clearance state of one street on one day. Upserted in place;
/// the per-round history lives in [`RoundEntry`] rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub street_id: StreetId,
    pub date: NaiveDate,
    pub status: Status,

    /// Round currently shown as "the" state. 1-based, never decreases.
    pub current_round: u32,
    /// Highest round started on this day.
    pub total_rounds: u32,

    /// Local wall-clock timestamps of the current round's work.
    pub started_at: Option<NaiveDateTime>,
    pub finished_at: Option<NaiveDateTime>,

    pub assigned_users: Roster,

    /// Who performed the last mutation. None for lazily created records.
    pub changed_by: Option<UserId>,
    pub updated_at: DateTime<Utc>,
}

impl StatusRecord {
    /// A brand-new Open record for the key: round 1, empty roster, no times.
    pub fn fresh(key: StatusKey) -> Self {
        Self {
            street_id: key.street,
            date: key.date,
            status: Status::Open,
            current_round: 1,
            total_rounds: 1,
            started_at: None,
            finished_at: None,
            assigned_users: Roster::new(),
            changed_by: None,
            updated_at: Utc::now(),
        }
    }

    pub fn key(&self) -> StatusKey {
        StatusKey::new(self.street_id, self.date)
    }

    /// Project this record onto its current round's ledger entry.
    ///
    /// Every mutation writes the record and this mirror in one logical
    /// operation, so the ledger row for `current_round` always matches
    /// the live record.
    pub fn round_entry(&self) -> RoundEntry {
        RoundEntry {
            street_id: self.street_id,
            date: self.date,
            round_number: self.current_round,
            status: self.status,
            started_at: self.started_at,
            finished_at: self.finished_at,
            assigned_users: self.assigned_users.clone(),
            changed_by: self.changed_by,
            updated_at: self.updated_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Round ledger
// ---------------------------------------------------------------------------

/// One row of the append-only round ledger: the state a given clearance
/// round reached. Unique by (street, date, round_number); never deleted.
/// The completed-rounds list shown to operators is the Done entries in
/// ascending round order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundEntry {
    pub street_id: StreetId,
    pub date: NaiveDate,
    /// 1-based, strictly increasing per (street, date).
    pub round_number: u32,
    pub status: Status,
    pub started_at: Option<NaiveDateTime>,
    pub finished_at: Option<NaiveDateTime>,
    pub assigned_users: Roster,
    pub changed_by: Option<UserId>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Work log
// ---------------------------------------------------------------------------

/// A billable work-time entry: one per assigned user per completed
/// stretch of work. Free-form entries carry no street.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkLogEntry {
    /// Client-generated, so a retried insert lands on the same row.
    pub id: Uuid,
    pub user_id: UserId,
    pub street_id: Option<StreetId>,
    pub date: NaiveDate,
    pub start_time: ClockTime,
    pub end_time: ClockTime,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl WorkLogEntry {
    pub fn for_shift(
        user: UserId,
        street: Option<StreetId>,
        date: NaiveDate,
        window: TimeWindow,
        notes: Option<&str>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user,
            street_id: street,
            date,
            start_time: window.start,
            end_time: window.end,
            notes: notes.map(str::to_string),
            created_at: Utc::now(),
        }
    }
}

/// Compose the full wall-clock timestamp a window start/end falls on.
/// An end that wraps past midnight lands on the following day.
pub fn window_timestamps(date: NaiveDate, window: TimeWindow) -> (NaiveDateTime, NaiveDateTime) {
    let started = date.and_time(window.start.to_naive());
    let end_date = if window.wraps_midnight() {
        date.succ_opt().unwrap_or(date)
    } else {
        date
    };
    (started, end_date.and_time(window.end.to_naive()))
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

/// Write capability of an actor's role. Role storage is external; the
/// caller presents the role alongside the user id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Worker,
    ReadOnly,
}

impl Role {
    pub fn can_write(self) -> bool {
        !matches!(self, Role::ReadOnly)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Admin => "admin",
            Role::Worker => "worker",
            Role::ReadOnly => "readonly",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "worker" => Ok(Role::Worker),
            "readonly" | "read_only" => Ok(Role::ReadOnly),
            other => Err(Error::Other(format!("unknown role: {other}"))),
        }
    }
}

/// The identity performing an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user: UserId,
    pub role: Role,
}

impl Actor {
    pub fn new(user: UserId, role: Role) -> Self {
        Self { user, role }
    }

    /// Gate for mutating operations.
    pub fn require_write(&self, action: &'static str) -> Result<(), Error> {
        if self.role.can_write() {
            Ok(())
        } else {
            Err(Error::PermissionDenied {
                user: self.user,
                action,
            })
        }
    }
}
