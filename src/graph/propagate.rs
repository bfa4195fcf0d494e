//! Field materialization, initialization and propagation.
//!
//! ```text
//!   receive_update ──tolerance──▶ phase? ──no──▶ trigger_update ──▶ propagate
//!                                   │                                 │
//!                                  yes                     output-side links,
//!                                   ▼                      per related type
//!                       merge into pending FieldUpdate          │
//!                       (accumulate | replace), re-sort         ▼
//!                                                      transmit ──▶ receive_update
//! ```
//!
//! Propagation is depth-first. A field stays *within update* until every
//! downstream transmit has returned, then commits. Feedback loops re-enter
//! a field while it is in flight; each pass adds its own delta and the loop
//! ends once a delta falls below some field's tolerance.

use std::sync::Arc;

use smallvec::SmallVec;

use crate::fields::field::{PendingUpdate, Selection};
use crate::fields::operator::max_update;
use crate::fields::{Arguments, Candidate, Field, FieldId, Operator, UpdateMode};
use crate::queue::sort_value;
use super::{FieldUpdate, Graph, Obj, ObjId};

impl<O: Obj> Graph<O> {
    pub(crate) fn field_at(&self, obj: ObjId, slot: usize) -> Option<&Field> {
        self.entry(obj)?.fields.get(slot)?.as_ref()
    }

    pub(crate) fn field_at_mut(&mut self, obj: ObjId, slot: usize) -> Option<&mut Field> {
        self.entry_mut(obj)?.fields.get_mut(slot)?.as_mut()
    }

    /// Definition owning `slot` on `obj`.
    fn slot_definition(&self, obj: ObjId, slot: usize) -> Option<FieldId> {
        let ty = self.object_type(obj)?;
        self.registry.ty(ty).input_side().field_definitions(slot).first().copied()
    }

    // ========================================================================
    // Materialization
    // ========================================================================

    pub(crate) fn ensure_field(&mut self, obj: ObjId, slot: usize) {
        let Some(fd) = self.slot_definition(obj, slot) else {
            return;
        };
        let Some(cell) = self.entry_mut(obj).and_then(|e| e.fields.get_mut(slot)) else {
            return;
        };
        if cell.is_some() {
            return;
        }
        *cell = Some(Field::new(fd));
        self.initialize_field(obj, slot, fd);
    }

    /// Computes the first value of a new field from whatever inputs already
    /// exist. Missing inputs count as 0. A non-zero result propagates.
    fn initialize_field(&mut self, obj: ObjId, slot: usize, fd: FieldId) {
        let registry = Arc::clone(&self.registry);
        let operator = registry.field(fd).operator();

        let value = match operator {
            Operator::Max(cfg) => {
                let candidates = self.candidates(obj, slot, false);
                let (selected, value) = max_update(cfg, &candidates, 0.0);
                self.set_selection(obj, slot, selected);
                value
            }
            op => match op.arity() {
                None => {
                    let inputs: Vec<f64> = self.candidates(obj, slot, false).iter().map(|c| c.value).collect();
                    op.evaluate(&inputs)
                }
                Some(n) => {
                    let args: SmallVec<[f64; 3]> = (0..n).map(|arg| self.input_value(obj, slot, arg, false)).collect();
                    op.evaluate(&args)
                }
            },
        };

        tracing::trace!(obj = %obj, field = %registry.field(fd), value, "field initialized");
        if value != 0.0 {
            self.propagate(obj, slot, value);
        }
    }

    // ========================================================================
    // Input lookup
    // ========================================================================

    /// Inputs linked into `slot`, read committed or updated.
    pub(crate) fn candidates(&self, obj: ObjId, slot: usize, updated: bool) -> Vec<Candidate> {
        let mut out = Vec::new();
        let Some(ty) = self.object_type(obj) else {
            return out;
        };
        for table in self.registry.ty(ty).input_side().relations() {
            if !table.is_active(slot) {
                continue;
            }
            for related in self.follow(obj, table.relation()) {
                let Some(related_ty) = self.object_type(related) else {
                    continue;
                };
                for fl in table.links(related_ty, slot) {
                    if let Some(field) = self.field_at(related, fl.related_slot) {
                        let value = if updated { field.updated_value() } else { field.value() };
                        out.push(Candidate { obj: related, field: fl.related_field, value });
                    }
                }
            }
        }
        out
    }

    /// Value of fixed argument `arg` of `slot`, 0 when unconnected.
    pub(crate) fn input_value(&self, obj: ObjId, slot: usize, arg: usize, updated: bool) -> f64 {
        let Some(ty) = self.object_type(obj) else {
            return 0.0;
        };
        for table in self.registry.ty(ty).input_side().relations() {
            if !table.is_active(slot) {
                continue;
            }
            for related in self.follow(obj, table.relation()) {
                let Some(related_ty) = self.object_type(related) else {
                    continue;
                };
                let hit = table
                    .links(related_ty, slot)
                    .iter()
                    .find(|fl| fl.argument.map(usize::from) == Some(arg));
                if let Some(fl) = hit {
                    return self
                        .field_at(related, fl.related_slot)
                        .map_or(0.0, |f| if updated { f.updated_value() } else { f.value() });
                }
            }
        }
        0.0
    }

    fn set_selection(&mut self, obj: ObjId, slot: usize, selected: Option<Candidate>) {
        let new = selected.map(|c| Selection { obj: c.obj, field: c.field });
        let old = match self.field_at_mut(obj, slot) {
            Some(field) => std::mem::replace(&mut field.selection, new),
            None => return,
        };
        if old == new {
            return;
        }
        if let Some(old) = old
            && let Some(entry) = self.entry_mut(old.obj)
        {
            entry.payload.on_selection_changed(old.field, false);
        }
        if let Some(new) = new
            && let Some(entry) = self.entry_mut(new.obj)
        {
            entry.payload.on_selection_changed(new.field, true);
        }
    }

    // ========================================================================
    // Updates
    // ========================================================================

    pub(crate) fn receive_update_at(&mut self, obj: ObjId, slot: usize, delta: f64, mode: UpdateMode) {
        let Some(fd) = self.slot_definition(obj, slot) else {
            return;
        };
        let registry = Arc::clone(&self.registry);
        let def = registry.field(fd);

        if def.is_below_tolerance(delta) {
            tracing::trace!(obj = %obj, field = %def, delta, "update below tolerance");
            return;
        }
        match def.phase() {
            None if delta == 0.0 => {}
            None => self.trigger_update(obj, slot, delta),
            Some(phase) => self.schedule(obj, slot, phase, def.next_round(), delta, mode),
        }
    }

    /// Merges `delta` into the field's pending step, creating it if needed.
    fn schedule(
        &mut self,
        obj: ObjId,
        slot: usize,
        phase: crate::queue::Phase,
        next_round: bool,
        delta: f64,
        mode: UpdateMode,
    ) {
        let precision = self.config.sort_value_precision;
        let Some(field) = self.field_at_mut(obj, slot) else {
            return;
        };

        match field.pending {
            Some(mut pending) => {
                pending.delta = match mode {
                    UpdateMode::Accumulate => pending.delta + delta,
                    UpdateMode::Replace => delta,
                };
                field.pending = Some(pending);
                if let Err(e) = self.queue.update_sort_value(pending.step, sort_value(pending.delta, precision)) {
                    tracing::warn!(error = %e, obj = %obj, "pending field update has no queued step");
                }
            }
            None if delta == 0.0 => {}
            None => {
                let step = FieldUpdate::new(obj, slot, phase, next_round, sort_value(delta, precision));
                let id = self.queue.add_step(Box::new(step));
                if let Some(field) = self.field_at_mut(obj, slot) {
                    field.pending = Some(PendingUpdate { step: id, delta });
                }
            }
        }
    }

    /// Applies a scheduled delta. Called when its step is processed.
    pub(crate) fn apply_pending(&mut self, obj: ObjId, slot: usize) {
        let Some(pending) = self.field_at_mut(obj, slot).and_then(|f| f.pending.take()) else {
            return;
        };
        self.trigger_update(obj, slot, pending.delta);
    }

    pub(crate) fn trigger_update(&mut self, obj: ObjId, slot: usize, delta: f64) {
        let Some(fd) = self.slot_definition(obj, slot) else {
            return;
        };
        if self.registry.field(fd).is_below_tolerance(delta) {
            return;
        }
        let Some(field) = self.field_at(obj, slot) else {
            return;
        };
        let updated = field.updated_value() + delta;
        self.propagate(obj, slot, updated);
    }

    /// Moves the field to `updated` and sends the difference along its
    /// output-side links. An update that loops back into a field still in
    /// flight adds to the in-flight value, and only the outermost call
    /// commits.
    pub(crate) fn propagate(&mut self, obj: ObjId, slot: usize, updated: f64) {
        let registry = Arc::clone(&self.registry);
        let Some(ty) = self.object_type(obj) else {
            return;
        };
        let Some(field) = self.field_at_mut(obj, slot) else {
            return;
        };
        let outermost = !field.is_within_update();
        let update = updated - field.updated_value();
        field.begin_update(updated);

        for table in registry.ty(ty).output_side().relations() {
            if !table.is_active(slot) {
                continue;
            }
            for related in self.follow(obj, table.relation()) {
                let Some(related_ty) = self.object_type(related) else {
                    continue;
                };
                for fl in table.links(related_ty, slot) {
                    self.transmit(related, fl.related_slot, fl.argument.map(usize::from), update);
                }
            }
        }

        if outermost && let Some(field) = self.field_at_mut(obj, slot) {
            field.commit();
        }
    }

    /// Delivers an input delta to one output field.
    fn transmit(&mut self, obj: ObjId, slot: usize, arg: Option<usize>, update: f64) {
        self.ensure_field(obj, slot);
        let Some(fd) = self.slot_definition(obj, slot) else {
            return;
        };
        let registry = Arc::clone(&self.registry);
        let operator = registry.field(fd).operator();

        let delta = match operator {
            Operator::Max(cfg) => {
                let candidates = self.candidates(obj, slot, true);
                let value = self.field_at(obj, slot).map_or(0.0, Field::updated_value);
                let (selected, delta) = max_update(cfg, &candidates, value);
                self.set_selection(obj, slot, selected);
                delta
            }
            op => op.compute_update(arg, update, &ArgReader { graph: self, obj, slot }),
        };
        self.receive_update_at(obj, slot, delta, operator.update_mode(arg));
    }
}

/// Argument access for one output field.
struct ArgReader<'a, O: Obj> {
    graph: &'a Graph<O>,
    obj: ObjId,
    slot: usize,
}

impl<O: Obj> Arguments for ArgReader<'_, O> {
    fn value(&self) -> f64 {
        self.graph.field_at(self.obj, self.slot).map_or(0.0, Field::updated_value)
    }

    fn input_value(&self, arg: usize) -> f64 {
        self.graph.input_value(self.obj, self.slot, arg, false)
    }

    fn updated_input_value(&self, arg: usize) -> f64 {
        self.graph.input_value(self.obj, self.slot, arg, true)
    }

    fn candidates(&self) -> Vec<Candidate> {
        self.graph.candidates(self.obj, self.slot, true)
    }
}
