//! Field definitions and the links between them.

use serde::{Deserialize, Serialize};

use crate::queue::Phase;
use crate::types::{RelationId, TypeId};
use super::Operator;

/// Global field definition identifier, dense within one registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FieldId(pub u32);

impl FieldId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for FieldId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Field link identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LinkId(pub u32);

impl LinkId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for LinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Template of one scalar attribute of a type.
#[derive(Debug, Clone)]
pub struct FieldDefinition {
    pub(crate) id: FieldId,
    pub(crate) name: String,
    pub(crate) owner: TypeId,
    pub(crate) operator: Operator,
    pub(crate) tolerance: f64,
    pub(crate) phase: Option<Phase>,
    pub(crate) next_round: bool,
    pub(crate) parent: Option<FieldId>,
    pub(crate) children: Vec<FieldId>,
    pub(crate) inputs: Vec<LinkId>,
    pub(crate) outputs: Vec<LinkId>,
}

impl FieldDefinition {
    pub(crate) fn new(id: FieldId, name: String, owner: TypeId, operator: Operator) -> Self {
        Self {
            id,
            name,
            owner,
            operator,
            tolerance: 0.0,
            phase: None,
            next_round: false,
            parent: None,
            children: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn id(&self) -> FieldId { self.id }
    pub fn name(&self) -> &str { &self.name }
    pub fn owner(&self) -> TypeId { self.owner }
    pub fn operator(&self) -> &Operator { &self.operator }
    pub fn tolerance(&self) -> f64 { self.tolerance }
    pub fn phase(&self) -> Option<Phase> { self.phase }
    pub fn next_round(&self) -> bool { self.next_round }

    /// The definition this one overrides.
    pub fn parent(&self) -> Option<FieldId> { self.parent }

    /// Definitions overriding this one.
    pub fn children(&self) -> &[FieldId] { &self.children }

    pub fn inputs(&self) -> &[LinkId] { &self.inputs }
    pub fn outputs(&self) -> &[LinkId] { &self.outputs }

    /// Updates go through the queue instead of propagating immediately.
    pub fn is_scheduled(&self) -> bool {
        self.phase.is_some()
    }

    /// Whether a delta of this magnitude is dropped.
    pub fn is_below_tolerance(&self, delta: f64) -> bool {
        delta.abs() < self.tolerance
    }
}

impl std::fmt::Display for FieldDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.name, self.id)
    }
}

/// Directed edge `input -> output`, walked through `relation` from the
/// input's object to the output's object.
///
/// One record serves both mirrored sides: the output side walks
/// `relation`, the input side walks its reverse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldLinkDefinition {
    pub(crate) id: LinkId,
    pub(crate) input: FieldId,
    pub(crate) output: FieldId,
    pub(crate) relation: RelationId,
    pub(crate) argument: Option<u8>,
}

impl FieldLinkDefinition {
    pub fn id(&self) -> LinkId { self.id }
    pub fn input(&self) -> FieldId { self.input }
    pub fn output(&self) -> FieldId { self.output }
    pub fn relation(&self) -> RelationId { self.relation }
    pub fn argument(&self) -> Option<u8> { self.argument }
}
