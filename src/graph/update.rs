//! Scheduled field update step.

use std::marker::PhantomData;

use crate::queue::{Phase, Step, StepOutcome};
use super::{Graph, Obj, ObjId};

/// Queued delta for one field.
///
/// The delta itself lives on the field, so later updates merge into it and
/// only re-sort this step.
pub struct FieldUpdate<O> {
    obj: ObjId,
    slot: usize,
    phase: Phase,
    next_round: bool,
    sort_value: i64,
    _payload: PhantomData<fn() -> O>,
}

impl<O> FieldUpdate<O> {
    pub(crate) fn new(obj: ObjId, slot: usize, phase: Phase, next_round: bool, sort_value: i64) -> Self {
        Self { obj, slot, phase, next_round, sort_value, _payload: PhantomData }
    }

    pub fn obj(&self) -> ObjId {
        self.obj
    }

    pub fn slot(&self) -> usize {
        self.slot
    }
}

impl<O: Obj> Step<Graph<O>> for FieldUpdate<O> {
    fn phase(&self) -> Phase { self.phase }
    fn sort_value(&self) -> i64 { self.sort_value }
    fn next_round(&self) -> bool { self.next_round }
    fn name(&self) -> &str { "field-update" }

    fn process(&mut self, graph: &mut Graph<O>) -> StepOutcome {
        graph.apply_pending(self.obj, self.slot);
        StepOutcome::Done
    }
}
