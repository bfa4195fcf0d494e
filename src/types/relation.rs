//! Typed, reversible associations between types.

use serde::{Deserialize, Serialize};
use super::TypeId;

/// Relation identifier, dense within one registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RelationId(pub u16);

impl RelationId {
    /// The identity relation every registry starts with.
    pub const SELF: RelationId = RelationId(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for RelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cardinality of a relation as seen from its source object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationKind {
    /// Zero or one target.
    One,
    /// Zero or more targets.
    Many,
    /// The object itself.
    SelfRef,
}

/// A directed association from objects of `from` to objects of `to`.
///
/// `from`/`to` are `None` only for [`RelationId::SELF`], which applies to
/// every type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub(crate) id: RelationId,
    pub(crate) name: String,
    pub(crate) kind: RelationKind,
    pub(crate) from: Option<TypeId>,
    pub(crate) to: Option<TypeId>,
    pub(crate) reverse: RelationId,
}

impl Relation {
    pub fn id(&self) -> RelationId { self.id }
    pub fn name(&self) -> &str { &self.name }
    pub fn kind(&self) -> RelationKind { self.kind }
    pub fn from(&self) -> Option<TypeId> { self.from }
    pub fn to(&self) -> Option<TypeId> { self.to }
    pub fn reverse(&self) -> RelationId { self.reverse }

    pub fn is_self(&self) -> bool {
        self.kind == RelationKind::SelfRef
    }
}

impl std::fmt::Display for Relation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{:?}", self.name, self.kind)
    }
}
