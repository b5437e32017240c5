//! Clearance engine: status transitions, window derivation, batch apply.

pub mod batch;
pub mod status;
pub mod timing;

pub use batch::{BatchReport, BatchTransition};

use std::sync::Arc;

use crate::model::{RoundEntry, StatusRecord};
use crate::store::ClearanceStore;

/// The operations layer over a [`ClearanceStore`]. Cheap to clone and
/// share; all state lives in the store.
pub struct Engine<S> {
    store: Arc<S>,
}

impl<S> Clone for Engine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: ClearanceStore> Engine<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// The underlying store, for wiring up reconcilers.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}

/// One street/day as shown to an operator: the live record plus the
/// completed rounds from the ledger, ascending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusView {
    pub record: StatusRecord,
    pub completed_rounds: Vec<RoundEntry>,
}
