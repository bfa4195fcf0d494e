//! Compiled, array-indexed view of a type.
//!
//! Every type carries two of these, one per [`Direction`]:
//!
//! ```text
//!                 input side                      output side
//!   fields   [fid] -> slot, required only   [fid] -> slot of winning override
//!   reverse  slot -> [required fd]          slot -> [every fd resolving there]
//!   links    inputs of the slot's fd,       outputs of every fd on the slot,
//!            via the reverse relation       via the declared relation
//! ```
//!
//! The link tables are indexed `[relation position][related type][origin slot]`,
//! so propagation looks up the concrete type of a related object and walks
//! exactly the links that apply to it. No runtime type tests happen there.

use serde::{Deserialize, Serialize};

use crate::fields::{FieldDefinition, FieldId, FieldLinkDefinition, LinkId};
use super::{Relation, RelationId, TypeId};

/// Which side of the mirrored link pair a flattened view walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Walked when a field is initialized: from an output to its inputs.
    Input,
    /// Walked when a field changes: from an input to its outputs.
    Output,
}

impl Direction {
    pub fn opposite(self) -> Direction {
        match self {
            Direction::Input => Direction::Output,
            Direction::Output => Direction::Input,
        }
    }
}

/// One link to walk, with the related object's slot already resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlattenedLink {
    pub link: LinkId,
    pub related_field: FieldId,
    pub related_slot: usize,
    pub argument: Option<u8>,
}

/// Fan-out table for one relation of the origin type.
#[derive(Debug, Clone)]
pub struct FlattenedTypeRelation {
    relation: RelationId,
    /// `[related type][origin slot]`
    links: Vec<Vec<Vec<FlattenedLink>>>,
    active_slots: Vec<bool>,
}

impl FlattenedTypeRelation {
    pub fn relation(&self) -> RelationId {
        self.relation
    }

    /// Whether any link leaves `slot` through this relation.
    pub fn is_active(&self, slot: usize) -> bool {
        self.active_slots.get(slot).copied().unwrap_or(false)
    }

    pub fn links(&self, related_type: TypeId, slot: usize) -> &[FlattenedLink] {
        self.links
            .get(related_type.index())
            .and_then(|per_slot| per_slot.get(slot))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Dense slot layout and link tables of one type for one direction.
#[derive(Debug, Clone)]
pub struct FlattenedType {
    type_id: TypeId,
    direction: Direction,
    fields: Vec<Option<usize>>,
    fields_reverse: Vec<Vec<FieldId>>,
    relations: Vec<FlattenedTypeRelation>,
}

impl FlattenedType {
    pub fn type_id(&self) -> TypeId { self.type_id }
    pub fn direction(&self) -> Direction { self.direction }

    pub fn num_slots(&self) -> usize {
        self.fields_reverse.len()
    }

    /// Slot of `fd` on this side, `None` if absent.
    pub fn field_slot(&self, fd: FieldId) -> Option<usize> {
        self.fields.get(fd.index()).copied().flatten()
    }

    /// Field definitions that share `slot`.
    pub fn field_definitions(&self, slot: usize) -> &[FieldId] {
        self.fields_reverse.get(slot).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn relations(&self) -> &[FlattenedTypeRelation] {
        &self.relations
    }
}

// ============================================================================
// Flattening
// ============================================================================

/// Read-only view of the registry under construction.
pub(crate) struct Flattener<'a> {
    pub fields: &'a [FieldDefinition],
    pub links: &'a [FieldLinkDefinition],
    pub relations: &'a [Relation],
    /// Sorted ancestor closure per type.
    pub ancestors: &'a [Vec<TypeId>],
    pub declared: &'a [Vec<FieldId>],
    pub relation_tables: &'a [Vec<RelationId>],
}

impl Flattener<'_> {
    fn is_instance_of(&self, ty: TypeId, of: TypeId) -> bool {
        self.ancestors[ty.index()].binary_search(&of).is_ok()
    }

    fn visible_fields(&self, ty: TypeId) -> Vec<bool> {
        let mut visible = vec![false; self.fields.len()];
        for anc in &self.ancestors[ty.index()] {
            for fd in &self.declared[anc.index()] {
                visible[fd.index()] = true;
            }
        }
        visible
    }

    /// Most derived visible override of `fd`.
    fn resolve(&self, fd: FieldId, visible: &[bool]) -> FieldId {
        self.fields[fd.index()]
            .children
            .iter()
            .find(|child| visible[child.index()])
            .map(|child| self.resolve(*child, visible))
            .unwrap_or(fd)
    }

    /// Slot layout of both sides, link tables still empty.
    pub fn field_maps(&self, ty: TypeId) -> (FlattenedType, FlattenedType) {
        let visible = self.visible_fields(ty);
        let n = self.fields.len();

        let mut input_fields = vec![None; n];
        let mut input_reverse = Vec::new();
        for (idx, _) in visible.iter().enumerate().filter(|(_, v)| **v) {
            let fd = FieldId(idx as u32);
            if self.resolve(fd, &visible) == fd {
                input_fields[idx] = Some(input_reverse.len());
                input_reverse.push(vec![fd]);
            }
        }

        let mut output_fields = vec![None; n];
        let mut output_reverse = vec![Vec::new(); input_reverse.len()];
        for (idx, _) in visible.iter().enumerate().filter(|(_, v)| **v) {
            let fd = FieldId(idx as u32);
            let winner = self.resolve(fd, &visible);
            if let Some(slot) = input_fields[winner.index()] {
                output_fields[idx] = Some(slot);
                output_reverse[slot].push(fd);
            }
        }

        let input = FlattenedType {
            type_id: ty,
            direction: Direction::Input,
            fields: input_fields,
            fields_reverse: input_reverse,
            relations: Vec::new(),
        };
        let output = FlattenedType {
            type_id: ty,
            direction: Direction::Output,
            fields: output_fields,
            fields_reverse: output_reverse,
            relations: Vec::new(),
        };
        (input, output)
    }

    /// Fills the link tables of `own`. `opposite` yields the other side of
    /// any type, used to resolve where a related field lives.
    pub fn link_tables<'b>(
        &self,
        own: &mut FlattenedType,
        opposite: impl Fn(TypeId) -> &'b FlattenedType,
    ) {
        let ty = own.type_id;
        let num_types = self.ancestors.len();
        let slots = own.num_slots();

        let mut tables = Vec::with_capacity(self.relation_tables[ty.index()].len());
        for &rel_id in &self.relation_tables[ty.index()] {
            let relation = &self.relations[rel_id.index()];
            let mut table = FlattenedTypeRelation {
                relation: rel_id,
                links: vec![vec![Vec::new(); slots]; num_types],
                active_slots: vec![false; slots],
            };

            for slot in 0..slots {
                for &fd in &own.fields_reverse[slot] {
                    let def = &self.fields[fd.index()];
                    let link_ids = match own.direction {
                        Direction::Output => &def.outputs,
                        Direction::Input => &def.inputs,
                    };

                    for link_id in link_ids {
                        let link = &self.links[link_id.index()];
                        let (walked, related_fd) = match own.direction {
                            Direction::Output => (link.relation, link.output),
                            Direction::Input => (self.relations[link.relation.index()].reverse, link.input),
                        };
                        if walked != rel_id {
                            continue;
                        }
                        let related_owner = self.fields[related_fd.index()].owner;

                        for t in 0..num_types {
                            let related_ty = TypeId(t as u16);
                            if relation.is_self() && related_ty != ty {
                                continue;
                            }
                            if let Some(target) = relation.to
                                && !self.is_instance_of(related_ty, target)
                            {
                                continue;
                            }
                            if !self.is_instance_of(related_ty, related_owner) {
                                continue;
                            }
                            let Some(related_slot) = opposite(related_ty).field_slot(related_fd) else {
                                continue;
                            };
                            table.links[t][slot].push(FlattenedLink {
                                link: *link_id,
                                related_field: related_fd,
                                related_slot,
                                argument: link.argument,
                            });
                            table.active_slots[slot] = true;
                        }
                    }
                }
            }
            tables.push(table);
        }
        own.relations = tables;
    }
}
