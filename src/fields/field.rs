//! Runtime field cell.

use crate::graph::ObjId;
use crate::queue::StepId;
use super::FieldId;

/// A scheduled delta waiting in the queue.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct PendingUpdate {
    pub step: StepId,
    pub delta: f64,
}

/// Input currently selected by a `Max` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Selection {
    pub obj: ObjId,
    pub field: FieldId,
}

/// Per-object storage of one field definition.
#[derive(Debug, Clone)]
pub struct Field {
    pub(crate) definition: FieldId,
    pub(crate) value: f64,
    pub(crate) updated_value: f64,
    pub(crate) within_update: bool,
    pub(crate) pending: Option<PendingUpdate>,
    pub(crate) selection: Option<Selection>,
}

impl Field {
    pub(crate) fn new(definition: FieldId) -> Self {
        Self {
            definition,
            value: 0.0,
            updated_value: 0.0,
            within_update: false,
            pending: None,
            selection: None,
        }
    }

    /// The definition that owns this slot.
    pub fn definition(&self) -> FieldId {
        self.definition
    }

    /// Committed value.
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Value including an update that is currently propagating.
    pub fn updated_value(&self) -> f64 {
        if self.within_update { self.updated_value } else { self.value }
    }

    /// The in-flight delta, 0 outside propagation.
    pub fn update(&self) -> f64 {
        self.updated_value() - self.value
    }

    pub fn is_within_update(&self) -> bool {
        self.within_update
    }

    /// Delta waiting in a queued step.
    pub fn pending_delta(&self) -> Option<f64> {
        self.pending.map(|p| p.delta)
    }

    pub fn pending_step(&self) -> Option<StepId> {
        self.pending.map(|p| p.step)
    }

    pub(crate) fn begin_update(&mut self, updated: f64) {
        self.within_update = true;
        self.updated_value = updated;
    }

    pub(crate) fn commit(&mut self) {
        self.value = self.updated_value;
        self.within_update = false;
    }
}
