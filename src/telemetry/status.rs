//! Clearance span helpers.
//!
//! Provides span creation and outcome recording for streets flowing
//! through batch operations.

use chrono::NaiveDate;
use tracing::Span;

use crate::model::StreetId;

/// Start a span for applying one operation to one street.
///
/// The `clearance.outcome` field is declared empty and can be updated
/// via [`record_outcome`].
pub fn start_street_span(street: &StreetId, date: NaiveDate) -> Span {
    tracing::info_span!(
        "clearance.apply",
        "street.id" = %street,
        "service.date" = %date,
        "clearance.outcome" = tracing::field::Empty,
    )
}

/// Record the outcome of a street's operation on its span.
///
/// Emits a tracing `info` event scoped to the given span.
pub fn record_outcome(span: &Span, outcome: &str) {
    span.record("clearance.outcome", outcome);
    span.in_scope(|| {
        tracing::info!(outcome, "entity_processed");
    });
}
