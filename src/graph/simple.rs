//! Map-backed object payload.

use hashbrown::HashMap;
use smallvec::SmallVec;

use crate::fields::FieldId;
use crate::types::{Relation, RelationId, RelationKind};
use crate::{Error, Result};
use super::{Graph, Obj, ObjId};

/// Payload that stores its relation targets in a map. Enough for graphs
/// whose objects carry no domain state of their own.
#[derive(Debug, Clone, Default)]
pub struct SimpleObj {
    related: HashMap<RelationId, SmallVec<[ObjId; 4]>>,
    selections: Vec<(FieldId, bool)>,
}

impl SimpleObj {
    pub fn relate(&mut self, relation: &Relation, target: ObjId) {
        let targets = self.related.entry(relation.id()).or_default();
        if relation.kind() == RelationKind::One {
            targets.clear();
        }
        if !targets.contains(&target) {
            targets.push(target);
        }
    }

    pub fn unrelate(&mut self, relation: RelationId, target: ObjId) {
        if let Some(targets) = self.related.get_mut(&relation) {
            targets.retain(|t| *t != target);
        }
    }

    pub fn related(&self, relation: RelationId) -> &[ObjId] {
        self.related.get(&relation).map(|t| t.as_slice()).unwrap_or(&[])
    }

    /// Selection notifications received from `Max` fields, oldest first.
    pub fn selections(&self) -> &[(FieldId, bool)] {
        &self.selections
    }
}

impl Obj for SimpleObj {
    fn follow_single_relation(&self, relation: &Relation) -> Option<ObjId> {
        self.related.get(&relation.id()).and_then(|t| t.first().copied())
    }

    fn follow_many_relation(&self, relation: &Relation) -> SmallVec<[ObjId; 4]> {
        self.related.get(&relation.id()).cloned().unwrap_or_default()
    }

    fn on_selection_changed(&mut self, field: FieldId, selected: bool) {
        self.selections.push((field, selected));
    }
}

impl Graph<SimpleObj> {
    /// Connects `from` to `to` through `relation` and `to` back to `from`
    /// through its reverse.
    pub fn relate(&mut self, from: ObjId, relation: RelationId, to: ObjId) -> Result<()> {
        let registry = std::sync::Arc::clone(self.registry());
        let rel = registry
            .get_relation(relation)
            .ok_or_else(|| Error::NotFound(format!("relation {relation}")))?;
        if rel.is_self() {
            return Err(Error::InvalidRelation("objects are SELF-related implicitly".into()));
        }
        let from_ty = self.object_type(from).ok_or_else(|| Error::NotFound(format!("object {from}")))?;
        let to_ty = self.object_type(to).ok_or_else(|| Error::NotFound(format!("object {to}")))?;

        let fits = |ty, end: Option<crate::types::TypeId>| end.is_none_or(|end| registry.is_instance_of(ty, end));
        if !fits(from_ty, rel.from()) || !fits(to_ty, rel.to()) {
            return Err(Error::IncompatibleLink(format!("object {from} -[{rel}]-> object {to}")));
        }

        let reverse = registry.relation(rel.reverse());
        if let Some(obj) = self.object_mut(from) {
            obj.relate(rel, to);
        }
        if let Some(obj) = self.object_mut(to) {
            obj.relate(reverse, from);
        }
        Ok(())
    }
}
