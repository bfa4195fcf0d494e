//! # Object Graph
//!
//! Arena of domain objects and their field cells, plus the queue that
//! drives scheduled updates.
//!
//! ```text
//!   Graph<O>
//!   ├── registry: Arc<TypeRegistry>      (frozen, shared)
//!   ├── objects:  [ObjId] -> { type, payload: O, fields: [slot] -> Field }
//!   └── queue:    Queue<Graph<O>>        (FieldUpdate, Anneal, domain steps)
//! ```
//!
//! The payload `O` answers relation traversals through [`Obj`]. Everything
//! else (slot lookup, link fan-out, operator evaluation) comes from the
//! registry's flattened tables.

pub mod propagate;
pub mod update;
pub mod simple;
pub mod snapshot;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use smallvec::{smallvec, SmallVec};

use crate::config::Config;
use crate::fields::{Field, FieldId};
use crate::queue::{Annealing, Queue, QueueProvider};
use crate::types::{RelationId, RelationKind, Relation, TypeId, TypeRegistry};
use crate::{Error, Result};

pub use update::FieldUpdate;
pub use simple::SimpleObj;
pub use snapshot::ObjSnapshot;

/// Object identifier. Never reused within one graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjId(pub u32);

impl ObjId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for ObjId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Domain payload of an object.
pub trait Obj: Send + 'static {
    /// Target of a `One` relation.
    fn follow_single_relation(&self, relation: &Relation) -> Option<ObjId>;

    /// Targets of a `Many` relation.
    fn follow_many_relation(&self, relation: &Relation) -> SmallVec<[ObjId; 4]> {
        self.follow_single_relation(relation).into_iter().collect()
    }

    /// A `Max` field selected (`true`) or dropped (`false`) this object's
    /// field as its winning input.
    fn on_selection_changed(&mut self, _field: FieldId, _selected: bool) {}
}

pub(crate) struct ObjEntry<O> {
    pub ty: TypeId,
    pub payload: O,
    pub fields: Box<[Option<Field>]>,
}

// ============================================================================
// Graph
// ============================================================================

pub struct Graph<O: Obj> {
    registry: Arc<TypeRegistry>,
    config: Config,
    objects: Vec<Option<ObjEntry<O>>>,
    queue: Queue<Graph<O>>,
    annealing: Option<(ObjId, FieldId)>,
}

impl<O: Obj> std::fmt::Debug for Graph<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("objects", &self.len())
            .field("queue", &self.queue)
            .finish()
    }
}

impl<O: Obj> Graph<O> {
    pub fn new(registry: impl Into<Arc<TypeRegistry>>) -> Self {
        Self::with_config(registry, Config::default())
    }

    pub fn with_config(registry: impl Into<Arc<TypeRegistry>>, config: Config) -> Self {
        Self {
            registry: registry.into(),
            queue: Queue::new().with_timeout(config.timeout()),
            config,
            objects: Vec::new(),
            annealing: None,
        }
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // ========================================================================
    // Objects
    // ========================================================================

    /// Registers an object of type `ty`. Its fields start out absent.
    pub fn add_object(&mut self, ty: TypeId, payload: O) -> ObjId {
        let slots = self.registry.ty(ty).num_slots();
        let id = ObjId(self.objects.len() as u32);
        self.objects.push(Some(ObjEntry {
            ty,
            payload,
            fields: (0..slots).map(|_| None).collect(),
        }));
        tracing::debug!(obj = %id, ty = %self.registry.ty(ty), "object added");
        id
    }

    /// Drops an object with its fields and withdraws its queued updates.
    pub fn remove_object(&mut self, id: ObjId) -> Option<O> {
        let entry = self.objects.get_mut(id.index())?.take()?;
        for field in entry.fields.iter().flatten() {
            if let Some(pending) = field.pending {
                self.queue.remove_step(pending.step).ok();
            }
        }
        if self.annealing.is_some_and(|(obj, _)| obj == id) {
            self.annealing = None;
        }
        tracing::debug!(obj = %id, "object removed");
        Some(entry.payload)
    }

    pub fn contains(&self, id: ObjId) -> bool {
        self.entry(id).is_some()
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.objects.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn object(&self, id: ObjId) -> Option<&O> {
        self.entry(id).map(|e| &e.payload)
    }

    pub fn object_mut(&mut self, id: ObjId) -> Option<&mut O> {
        self.entry_mut(id).map(|e| &mut e.payload)
    }

    pub fn object_type(&self, id: ObjId) -> Option<TypeId> {
        self.entry(id).map(|e| e.ty)
    }

    pub(crate) fn entry(&self, id: ObjId) -> Option<&ObjEntry<O>> {
        self.objects.get(id.index()).and_then(Option::as_ref)
    }

    pub(crate) fn entry_mut(&mut self, id: ObjId) -> Option<&mut ObjEntry<O>> {
        self.objects.get_mut(id.index()).and_then(Option::as_mut)
    }

    /// Objects reached from `id` through `relation`. Targets that are no
    /// longer in the graph are skipped.
    pub fn follow(&self, id: ObjId, relation: RelationId) -> SmallVec<[ObjId; 4]> {
        let Some(entry) = self.entry(id) else {
            return SmallVec::new();
        };
        let rel = self.registry.relation(relation);
        let mut targets: SmallVec<[ObjId; 4]> = match rel.kind() {
            RelationKind::SelfRef => smallvec![id],
            RelationKind::One => entry.payload.follow_single_relation(rel).into_iter().collect(),
            RelationKind::Many => entry.payload.follow_many_relation(rel),
        };
        targets.retain(|target| {
            let alive = self.contains(*target);
            if !alive {
                tracing::warn!(obj = %id, relation = %rel, target = %target, "relation points to a removed object");
            }
            alive
        });
        targets
    }

    // ========================================================================
    // Fields
    // ========================================================================

    pub(crate) fn slot(&self, obj: ObjId, fd: FieldId) -> Result<usize> {
        let entry = self.entry(obj).ok_or_else(|| Error::NotFound(format!("object {obj}")))?;
        self.registry
            .field_slot(entry.ty, fd)
            .ok_or_else(|| Error::NotFound(format!("field {fd} on object {obj}")))
    }

    /// The field behind `fd` if it has been materialized.
    pub fn field(&self, obj: ObjId, fd: FieldId) -> Option<&Field> {
        let slot = self.slot(obj, fd).ok()?;
        self.field_at(obj, slot)
    }

    /// Read access without materializing.
    pub fn field_output(&self, obj: ObjId, fd: FieldId) -> Option<&Field> {
        self.field(obj, fd)
    }

    pub fn field_value(&self, obj: ObjId, fd: FieldId) -> Option<f64> {
        self.field(obj, fd).map(Field::value)
    }

    pub fn field_updated_value(&self, obj: ObjId, fd: FieldId) -> Option<f64> {
        self.field(obj, fd).map(Field::updated_value)
    }

    /// The field behind `fd`, materialized and initialized from its inputs
    /// on first access.
    pub fn get_or_create_field_input(&mut self, obj: ObjId, fd: FieldId) -> Result<&Field> {
        let slot = self.slot(obj, fd)?;
        self.ensure_field(obj, slot);
        self.field_at(obj, slot)
            .ok_or_else(|| Error::NotFound(format!("field {fd} on object {obj}")))
    }

    /// Materializes every field of `obj` in slot order. Fields that
    /// already exist keep their state.
    pub fn init_fields(&mut self, obj: ObjId) -> Result<()> {
        let slots = self
            .entry(obj)
            .map(|e| e.fields.len())
            .ok_or_else(|| Error::NotFound(format!("object {obj}")))?;
        for slot in 0..slots {
            self.ensure_field(obj, slot);
        }
        Ok(())
    }

    /// Absolute write. The difference to the committed value propagates.
    pub fn set_field_value(&mut self, obj: ObjId, fd: FieldId, value: f64) -> Result<()> {
        let slot = self.slot(obj, fd)?;
        self.ensure_field(obj, slot);
        let Some(field) = self.field_at_mut(obj, slot) else {
            return Ok(());
        };
        if field.value == value {
            return Ok(());
        }
        self.propagate(obj, slot, value);
        Ok(())
    }

    /// Incremental write, subject to the field's tolerance and phase.
    pub fn receive_update(&mut self, obj: ObjId, fd: FieldId, delta: f64) -> Result<()> {
        let slot = self.slot(obj, fd)?;
        self.ensure_field(obj, slot);
        self.receive_update_at(obj, slot, delta, crate::fields::UpdateMode::Accumulate);
        Ok(())
    }

    /// Binds the annealing level driven by [`Anneal`](crate::Anneal) steps to a field.
    pub fn set_annealing_field(&mut self, obj: ObjId, fd: FieldId) -> Result<()> {
        self.slot(obj, fd)?;
        self.annealing = Some((obj, fd));
        Ok(())
    }
}

// ============================================================================
// Queue integration
// ============================================================================

impl<O: Obj> QueueProvider for Graph<O> {
    fn queue(&self) -> &Queue<Self> {
        &self.queue
    }

    fn queue_mut(&mut self) -> &mut Queue<Self> {
        &mut self.queue
    }
}

impl<O: Obj> Annealing for Graph<O> {
    fn annealing(&self) -> f64 {
        self.annealing
            .and_then(|(obj, fd)| self.field_value(obj, fd))
            .unwrap_or(0.0)
    }

    fn set_annealing(&mut self, value: f64) {
        let Some((obj, fd)) = self.annealing else {
            return;
        };
        if let Err(e) = self.set_field_value(obj, fd, value) {
            tracing::warn!(error = %e, "annealing field unavailable");
        }
    }

    fn anneal_step_size(&self) -> f64 {
        self.config.anneal_step_size
    }
}
