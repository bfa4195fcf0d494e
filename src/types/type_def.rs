//! Node of the type hierarchy.

use serde::{Deserialize, Serialize};
use crate::fields::FieldId;
use super::{FlattenedType, RelationId};

/// Type identifier, assigned densely in registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TypeId(pub u16);

impl TypeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for TypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A frozen type: hierarchy position, declared fields and both flattened
/// views.
#[derive(Debug, Clone)]
pub struct Type {
    pub(crate) id: TypeId,
    pub(crate) name: String,
    pub(crate) parents: Vec<TypeId>,
    pub(crate) children: Vec<TypeId>,
    pub(crate) depth: u32,
    /// Sorted ancestor closure, including the type itself.
    pub(crate) ancestors: Vec<TypeId>,
    pub(crate) fields: Vec<FieldId>,
    /// `[SELF]` followed by every relation whose source is an ancestor.
    pub(crate) relations: Vec<RelationId>,
    pub(crate) input_side: FlattenedType,
    pub(crate) output_side: FlattenedType,
}

impl Type {
    pub fn id(&self) -> TypeId { self.id }
    pub fn name(&self) -> &str { &self.name }
    pub fn parents(&self) -> &[TypeId] { &self.parents }
    pub fn children(&self) -> &[TypeId] { &self.children }
    pub fn depth(&self) -> u32 { self.depth }
    pub fn ancestors(&self) -> &[TypeId] { &self.ancestors }

    /// Field definitions declared directly on this type.
    pub fn fields(&self) -> &[FieldId] { &self.fields }

    /// The relation table, indexed by position in the flattened views.
    pub fn relations(&self) -> &[RelationId] { &self.relations }

    pub fn input_side(&self) -> &FlattenedType { &self.input_side }
    pub fn output_side(&self) -> &FlattenedType { &self.output_side }

    pub fn is_instance_of(&self, other: TypeId) -> bool {
        self.ancestors.binary_search(&other).is_ok()
    }

    /// Number of field slots an object of this type holds.
    pub fn num_slots(&self) -> usize {
        self.input_side.num_slots()
    }
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.name, self.id)
    }
}
