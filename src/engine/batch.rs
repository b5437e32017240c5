//! Batch operations: one operator intent applied across many streets.
//!
//! A batch shares its roster and its derived time windows, but every
//! street is written independently. A failure stops nothing and rolls
//! nothing back; the report says which streets landed and which did not.

use std::time::Instant;

use chrono::NaiveDate;
use opentelemetry::KeyValue;
use tracing::{Instrument, Span, info, warn};

use super::Engine;
use crate::error::{Error, Result};
use crate::model::{Actor, ClockTime, Roster, StreetId, TimeWindow};
use crate::store::ClearanceStore;
use crate::telemetry::metrics;
use crate::telemetry::status::{record_outcome, start_street_span};

/// A single operator intent applied to every selected street.
#[derive(Debug, Clone)]
pub enum BatchTransition {
    /// Mark every street EnRoute.
    Start,
    /// Complete every street over back-to-back time windows.
    Complete {
        /// Minutes of work per street.
        duration_min: u32,
        /// Start of the first window, taken verbatim.
        explicit_start: Option<ClockTime>,
        notes: Option<String>,
    },
    /// Reset every street to Open.
    Reset,
}

impl BatchTransition {
    fn name(&self) -> &'static str {
        match self {
            BatchTransition::Start => "start",
            BatchTransition::Complete { .. } => "complete",
            BatchTransition::Reset => "reset",
        }
    }
}

/// Per-street outcomes of one batch, in selection order.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub succeeded: Vec<StreetId>,
    pub failed: Vec<(StreetId, Error)>,
}

impl BatchReport {
    fn record(&mut self, street: StreetId, result: Result<()>) {
        match result {
            Ok(()) => self.succeeded.push(street),
            Err(e) => self.failed.push((street, e)),
        }
    }

    pub fn is_total_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Collapse into one result: any failed street turns the whole batch
    /// into [`Error::PartialBatch`], listing both sides.
    pub fn into_result(self) -> Result<Vec<StreetId>> {
        if self.failed.is_empty() {
            Ok(self.succeeded)
        } else {
            Err(Error::PartialBatch {
                succeeded: self.succeeded,
                failed: self.failed.into_iter().map(|(s, _)| s).collect(),
            })
        }
    }
}

impl<S: ClearanceStore> Engine<S> {
    /// Apply one transition to every street in selection order.
    ///
    /// The optional roster is shared by the whole selection. Completion
    /// windows are derived once for the batch and handed out
    /// back-to-back, so the entries read as one continuous shift.
    pub async fn batch_apply(
        &self,
        streets: &[StreetId],
        date: NaiveDate,
        actor: Actor,
        roster: Option<&Roster>,
        transition: BatchTransition,
    ) -> Result<BatchReport> {
        actor.require_write("batch transition")?;

        let kind = transition.name();
        let started = Instant::now();

        let report = match transition {
            BatchTransition::Start => self.start_batch(streets, date, actor, roster).await,
            BatchTransition::Complete {
                duration_min,
                explicit_start,
                notes,
            } => {
                let durations = vec![duration_min; streets.len()];
                let windows = self
                    .resolve_batch_windows(actor.user, date, &durations, explicit_start)
                    .await?;
                self.complete_batch(streets, date, actor, roster, windows, notes.as_deref())
                    .await
            }
            BatchTransition::Reset => self.reset_batch(streets, date, actor).await,
        };

        metrics::operation_duration_ms().record(
            started.elapsed().as_millis() as f64,
            &[KeyValue::new("operation", format!("batch.{kind}"))],
        );
        info!(
            kind,
            ok = report.succeeded.len(),
            failed = report.failed.len(),
            "batch applied"
        );
        for (street, e) in &report.failed {
            warn!(street = %street, error = %e, "batch entry failed");
        }
        Ok(report)
    }

    async fn start_batch(
        &self,
        streets: &[StreetId],
        date: NaiveDate,
        actor: Actor,
        roster: Option<&Roster>,
    ) -> BatchReport {
        let mut report = BatchReport::default();
        for &street in streets {
            let span = start_street_span(&street, date);
            let result = async {
                self.start(street, date, actor).await?;
                if let Some(users) = roster {
                    self.set_roster(street, date, actor, users.clone()).await?;
                }
                Ok(())
            }
            .instrument(span.clone())
            .await;
            finish_entry(&span, &mut report, street, result);
        }
        report
    }

    async fn complete_batch(
        &self,
        streets: &[StreetId],
        date: NaiveDate,
        actor: Actor,
        roster: Option<&Roster>,
        windows: Vec<TimeWindow>,
        notes: Option<&str>,
    ) -> BatchReport {
        let mut report = BatchReport::default();
        for (&street, window) in streets.iter().zip(windows) {
            let span = start_street_span(&street, date);
            let result = async {
                self.complete_with(street, date, actor, window, roster, notes)
                    .await?;
                Ok(())
            }
            .instrument(span.clone())
            .await;
            finish_entry(&span, &mut report, street, result);
        }
        report
    }

    async fn reset_batch(
        &self,
        streets: &[StreetId],
        date: NaiveDate,
        actor: Actor,
    ) -> BatchReport {
        let mut report = BatchReport::default();
        for &street in streets {
            let span = start_street_span(&street, date);
            let result = async {
                self.reset(street, date, actor).await?;
                Ok(())
            }
            .instrument(span.clone())
            .await;
            finish_entry(&span, &mut report, street, result);
        }
        report
    }
}

fn finish_entry(span: &Span, report: &mut BatchReport, street: StreetId, result: Result<()>) {
    let outcome = if result.is_ok() { "ok" } else { "error" };
    record_outcome(span, outcome);
    metrics::batch_entities().add(1, &[KeyValue::new("result", outcome)]);
    report.record(street, result);
}
