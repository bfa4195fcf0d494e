//! Type registry: declared mutably, flattened once, then frozen.
//!
//! ```text
//!   TypeRegistryBuilder ──add_type / add_relation / add_field / out──┐
//!                                                                     │
//!                         flatten(self) ─────────────────────────────┘
//!                              │  validate reverses, depth, closures,
//!                              │  slot layouts, link tables
//!                              ▼
//!                      TypeRegistry (immutable, Send + Sync, Arc-shared)
//! ```
//!
//! `flatten` consumes the builder, so registering anything after the
//! hierarchy has been compiled does not type-check.

use hashbrown::HashMap;

use crate::fields::{FieldDefinition, FieldId, FieldLinkDefinition, LinkId, Operator};
use crate::queue::Phase;
use crate::{Error, Result};
use super::flattened::Flattener;
use super::{Direction, FlattenedType, Relation, RelationId, RelationKind, Type, TypeId};

// ============================================================================
// Builder
// ============================================================================

#[derive(Debug, Clone)]
struct TypeDraft {
    name: String,
    parents: Vec<TypeId>,
    fields: Vec<FieldId>,
}

#[derive(Debug, Clone)]
struct RelationDraft {
    name: String,
    kind: RelationKind,
    from: Option<TypeId>,
    to: Option<TypeId>,
    reverse: Option<RelationId>,
}

/// Mutable declaration phase of a [`TypeRegistry`].
#[derive(Debug, Clone)]
pub struct TypeRegistryBuilder {
    types: Vec<TypeDraft>,
    type_names: HashMap<String, TypeId>,
    relations: Vec<RelationDraft>,
    fields: Vec<FieldDefinition>,
    links: Vec<FieldLinkDefinition>,
}

impl Default for TypeRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistryBuilder {
    pub fn new() -> Self {
        Self {
            types: Vec::new(),
            type_names: HashMap::new(),
            relations: vec![RelationDraft {
                name: "SELF".into(),
                kind: RelationKind::SelfRef,
                from: None,
                to: None,
                reverse: Some(RelationId::SELF),
            }],
            fields: Vec::new(),
            links: Vec::new(),
        }
    }

    // ========================================================================
    // Types
    // ========================================================================

    pub fn add_type(&mut self, name: impl Into<String>) -> Result<TypeId> {
        let name = name.into();
        if self.type_names.contains_key(&name) {
            return Err(Error::DuplicateType(name));
        }
        let id = TypeId(u16::try_from(self.types.len())
            .map_err(|_| Error::InvalidArgument("too many types".into()))?);
        self.type_names.insert(name.clone(), id);
        self.types.push(TypeDraft { name, parents: Vec::new(), fields: Vec::new() });
        Ok(id)
    }

    pub fn add_parent(&mut self, child: TypeId, parent: TypeId) -> Result<()> {
        self.check_type(child)?;
        self.check_type(parent)?;
        if child == parent || self.is_instance_of(parent, child) {
            return Err(Error::CyclicHierarchy(format!(
                "{} -> {}",
                self.types[child.index()].name,
                self.types[parent.index()].name
            )));
        }
        let parents = &mut self.types[child.index()].parents;
        if !parents.contains(&parent) {
            parents.push(parent);
        }
        Ok(())
    }

    pub fn type_id(&self, name: &str) -> Option<TypeId> {
        self.type_names.get(name).copied()
    }

    fn check_type(&self, ty: TypeId) -> Result<()> {
        if ty.index() < self.types.len() {
            Ok(())
        } else {
            Err(Error::NotFound(format!("type {ty}")))
        }
    }

    fn ancestors(&self, ty: TypeId) -> Vec<TypeId> {
        let mut seen = vec![false; self.types.len()];
        let mut stack = vec![ty];
        while let Some(t) = stack.pop() {
            if std::mem::replace(&mut seen[t.index()], true) {
                continue;
            }
            stack.extend(self.types[t.index()].parents.iter().copied());
        }
        seen.iter()
            .enumerate()
            .filter(|(_, s)| **s)
            .map(|(i, _)| TypeId(i as u16))
            .collect()
    }

    fn is_instance_of(&self, ty: TypeId, of: TypeId) -> bool {
        self.ancestors(ty).binary_search(&of).is_ok()
    }

    fn is_related(&self, a: TypeId, b: TypeId) -> bool {
        self.is_instance_of(a, b) || self.is_instance_of(b, a)
    }

    // ========================================================================
    // Relations
    // ========================================================================

    /// Declares a relation from objects of `from` to objects of `to`.
    /// A reverse must be attached with [`set_reverse`](Self::set_reverse)
    /// before flattening.
    pub fn add_relation(
        &mut self,
        name: impl Into<String>,
        kind: RelationKind,
        from: TypeId,
        to: TypeId,
    ) -> Result<RelationId> {
        let name = name.into();
        if kind == RelationKind::SelfRef {
            return Err(Error::InvalidRelation(format!("{name}: only the built-in SELF relation may be SelfRef")));
        }
        self.check_type(from)?;
        self.check_type(to)?;
        let id = RelationId(u16::try_from(self.relations.len())
            .map_err(|_| Error::InvalidArgument("too many relations".into()))?);
        self.relations.push(RelationDraft { name, kind, from: Some(from), to: Some(to), reverse: None });
        Ok(id)
    }

    pub fn set_reverse(&mut self, a: RelationId, b: RelationId) -> Result<()> {
        let (ra, rb) = (self.relation_draft(a)?, self.relation_draft(b)?);
        if ra.kind == RelationKind::SelfRef || rb.kind == RelationKind::SelfRef {
            return Err(Error::InvalidRelation("SELF is its own reverse".into()));
        }
        if ra.from != rb.to || ra.to != rb.from {
            return Err(Error::InvalidRelation(format!(
                "{} and {} do not connect the same types in opposite directions",
                ra.name, rb.name
            )));
        }
        self.relations[a.index()].reverse = Some(b);
        self.relations[b.index()].reverse = Some(a);
        Ok(())
    }

    /// Declares `name` from `from` to `to` together with its reverse.
    pub fn add_relation_pair(
        &mut self,
        name: impl Into<String>,
        kind: RelationKind,
        reverse_name: impl Into<String>,
        reverse_kind: RelationKind,
        from: TypeId,
        to: TypeId,
    ) -> Result<(RelationId, RelationId)> {
        let forward = self.add_relation(name, kind, from, to)?;
        let backward = self.add_relation(reverse_name, reverse_kind, to, from)?;
        self.set_reverse(forward, backward)?;
        Ok((forward, backward))
    }

    fn relation_draft(&self, id: RelationId) -> Result<&RelationDraft> {
        self.relations
            .get(id.index())
            .ok_or_else(|| Error::NotFound(format!("relation {id}")))
    }

    // ========================================================================
    // Fields
    // ========================================================================

    fn create_field_id(&self) -> FieldId {
        FieldId(self.fields.len() as u32)
    }

    pub fn add_field(&mut self, ty: TypeId, name: impl Into<String>, operator: Operator) -> Result<FieldId> {
        self.check_type(ty)?;
        let name = name.into();
        let declared = &self.types[ty.index()].fields;
        if declared.iter().any(|fd| self.fields[fd.index()].name == name) {
            return Err(Error::DuplicateField(format!("{}.{}", self.types[ty.index()].name, name)));
        }
        let id = self.create_field_id();
        self.fields.push(FieldDefinition::new(id, name, ty, operator));
        self.types[ty.index()].fields.push(id);
        Ok(id)
    }

    /// A plain input field: a sum over whatever is linked into it.
    pub fn input_field(&mut self, ty: TypeId, name: impl Into<String>) -> Result<FieldId> {
        self.add_field(ty, name, Operator::Sum)
    }

    fn field_mut(&mut self, fd: FieldId) -> Result<&mut FieldDefinition> {
        self.fields
            .get_mut(fd.index())
            .ok_or_else(|| Error::NotFound(format!("field {fd}")))
    }

    pub fn set_tolerance(&mut self, fd: FieldId, tolerance: f64) -> Result<()> {
        if !(tolerance >= 0.0) {
            return Err(Error::InvalidArgument(format!("tolerance {tolerance}")));
        }
        self.field_mut(fd)?.tolerance = tolerance;
        Ok(())
    }

    /// Schedules updates of `fd` in `phase` instead of propagating them
    /// immediately. `None` makes the field immediate again.
    pub fn set_phase(&mut self, fd: FieldId, phase: Option<Phase>) -> Result<()> {
        self.field_mut(fd)?.phase = phase;
        Ok(())
    }

    pub fn set_next_round(&mut self, fd: FieldId, next_round: bool) -> Result<()> {
        self.field_mut(fd)?.next_round = next_round;
        Ok(())
    }

    /// Declares `child` as an override of `parent`. The child's owner must
    /// be a subtype of the parent's owner.
    pub fn set_parent(&mut self, child: FieldId, parent: FieldId) -> Result<()> {
        let child_owner = self.field_mut(child)?.owner;
        let parent_owner = self.field_mut(parent)?.owner;
        if child == parent || child_owner == parent_owner || !self.is_instance_of(child_owner, parent_owner) {
            return Err(Error::InvalidOverride(format!(
                "{} does not override {}",
                self.fields[child.index()],
                self.fields[parent.index()]
            )));
        }
        if let Some(old) = self.fields[child.index()].parent.replace(parent) {
            self.fields[old.index()].children.retain(|c| *c != child);
        }
        self.fields[parent.index()].children.push(child);
        Ok(())
    }

    // ========================================================================
    // Links
    // ========================================================================

    /// Wires `input` into `output`, where `relation` leads from the input's
    /// object to the output's object. Fixed-arity operators need an
    /// argument slot, variable-arity ones take none.
    pub fn out(
        &mut self,
        input: FieldId,
        relation: RelationId,
        output: FieldId,
        argument: Option<u8>,
    ) -> Result<LinkId> {
        let in_def = self.fields.get(input.index()).ok_or_else(|| Error::NotFound(format!("field {input}")))?;
        let out_def = self.fields.get(output.index()).ok_or_else(|| Error::NotFound(format!("field {output}")))?;
        let rel = self.relation_draft(relation)?;

        let compatible = match (rel.from, rel.to) {
            (Some(from), Some(to)) => {
                self.is_related(in_def.owner, from) && self.is_related(out_def.owner, to)
            }
            _ => self.is_related(in_def.owner, out_def.owner),
        };
        if !compatible {
            return Err(Error::IncompatibleLink(format!("{in_def} -[{}]-> {out_def}", rel.name)));
        }

        match (out_def.operator.arity(), argument) {
            (None, None) => {}
            (Some(arity), Some(arg)) if (arg as usize) < arity => {
                let taken = out_def
                    .inputs
                    .iter()
                    .any(|l| self.links[l.index()].argument == Some(arg));
                if taken {
                    return Err(Error::InvalidArgument(format!("{out_def}: argument {arg} already wired")));
                }
            }
            (arity, arg) => {
                return Err(Error::InvalidArgument(format!(
                    "{out_def} ({}): arity {arity:?}, argument {arg:?}",
                    out_def.operator.name()
                )));
            }
        }

        let id = LinkId(self.links.len() as u32);
        self.links.push(FieldLinkDefinition { id, input, output, relation, argument });
        self.fields[input.index()].outputs.push(id);
        self.fields[output.index()].inputs.push(id);
        Ok(id)
    }

    /// Wires `input` into `output` with `relation` given from the output's
    /// side, i.e. leading from the output's object to the input's object.
    pub fn input(
        &mut self,
        output: FieldId,
        relation: RelationId,
        input: FieldId,
        argument: Option<u8>,
    ) -> Result<LinkId> {
        let rel = self.relation_draft(relation)?;
        let reverse = rel.reverse.ok_or_else(|| Error::MissingReverse(rel.name.clone()))?;
        self.out(input, reverse, output, argument)
    }

    // ========================================================================
    // Flattening
    // ========================================================================

    /// Compiles every type at once and freezes the registry.
    pub fn flatten(self) -> Result<TypeRegistry> {
        let relations = self.frozen_relations()?;
        let n = self.types.len();

        let ancestors: Vec<Vec<TypeId>> = (0..n).map(|i| self.ancestors(TypeId(i as u16))).collect();
        let mut depth = vec![None; n];
        for i in 0..n {
            self.depth(TypeId(i as u16), &mut depth);
        }
        let depth: Vec<u32> = depth.into_iter().map(|d| d.unwrap_or(0)).collect();

        let mut children = vec![Vec::new(); n];
        for (i, t) in self.types.iter().enumerate() {
            for p in &t.parents {
                children[p.index()].push(TypeId(i as u16));
            }
        }

        let relation_tables: Vec<Vec<RelationId>> = ancestors
            .iter()
            .map(|anc| {
                std::iter::once(RelationId::SELF)
                    .chain(relations.iter().filter_map(|r| match r.from {
                        Some(from) if anc.binary_search(&from).is_ok() => Some(r.id),
                        _ => None,
                    }))
                    .collect()
            })
            .collect();

        let declared: Vec<Vec<FieldId>> = self.types.iter().map(|t| t.fields.clone()).collect();

        let mut order: Vec<TypeId> = (0..n).map(|i| TypeId(i as u16)).collect();
        order.sort_by_key(|t| (depth[t.index()], *t));

        let flattener = Flattener {
            fields: &self.fields,
            links: &self.links,
            relations: &relations,
            ancestors: &ancestors,
            declared: &declared,
            relation_tables: &relation_tables,
        };

        let mut inputs: Vec<Option<FlattenedType>> = vec![None; n];
        let mut outputs: Vec<Option<FlattenedType>> = vec![None; n];
        for t in &order {
            let (input, output) = flattener.field_maps(*t);
            inputs[t.index()] = Some(input);
            outputs[t.index()] = Some(output);
        }
        let mut inputs: Vec<FlattenedType> = inputs.into_iter().flatten().collect();
        let mut outputs: Vec<FlattenedType> = outputs.into_iter().flatten().collect();

        for t in &order {
            flattener.link_tables(&mut inputs[t.index()], |other| &outputs[other.index()]);
        }
        for t in &order {
            flattener.link_tables(&mut outputs[t.index()], |other| &inputs[other.index()]);
        }

        let types: Vec<Type> = self
            .types
            .into_iter()
            .zip(inputs.into_iter().zip(outputs))
            .enumerate()
            .map(|(i, (draft, (input_side, output_side)))| Type {
                id: TypeId(i as u16),
                name: draft.name,
                parents: draft.parents,
                children: std::mem::take(&mut children[i]),
                depth: depth[i],
                ancestors: ancestors[i].clone(),
                fields: draft.fields,
                relations: relation_tables[i].clone(),
                input_side,
                output_side,
            })
            .collect();

        tracing::debug!(
            types = types.len(),
            relations = relations.len(),
            fields = self.fields.len(),
            links = self.links.len(),
            "flattened type hierarchy"
        );

        Ok(TypeRegistry {
            types,
            type_names: self.type_names,
            relations,
            fields: self.fields,
            links: self.links,
        })
    }

    fn frozen_relations(&self) -> Result<Vec<Relation>> {
        self.relations
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let reverse = r.reverse.ok_or_else(|| Error::MissingReverse(r.name.clone()))?;
                if self.relations[reverse.index()].reverse != Some(RelationId(i as u16)) {
                    return Err(Error::InvalidRelation(format!("{}: reverse is not mutual", r.name)));
                }
                Ok(Relation {
                    id: RelationId(i as u16),
                    name: r.name.clone(),
                    kind: r.kind,
                    from: r.from,
                    to: r.to,
                    reverse,
                })
            })
            .collect()
    }

    fn depth(&self, ty: TypeId, memo: &mut [Option<u32>]) -> u32 {
        if let Some(d) = memo[ty.index()] {
            return d;
        }
        let parents = self.types[ty.index()].parents.clone();
        let d = parents
            .iter()
            .map(|p| self.depth(*p, memo) + 1)
            .max()
            .unwrap_or(0);
        memo[ty.index()] = Some(d);
        d
    }
}

// ============================================================================
// Frozen registry
// ============================================================================

/// The compiled, immutable type catalog.
///
/// Lookups by id assume the id came from this registry and panic otherwise;
/// the `get_*` variants return `Option`.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    types: Vec<Type>,
    type_names: HashMap<String, TypeId>,
    relations: Vec<Relation>,
    fields: Vec<FieldDefinition>,
    links: Vec<FieldLinkDefinition>,
}

impl TypeRegistry {
    pub fn ty(&self, id: TypeId) -> &Type {
        &self.types[id.index()]
    }

    pub fn get_type(&self, id: TypeId) -> Option<&Type> {
        self.types.get(id.index())
    }

    pub fn type_by_name(&self, name: &str) -> Option<&Type> {
        self.type_names.get(name).map(|id| self.ty(*id))
    }

    pub fn types(&self) -> impl Iterator<Item = &Type> {
        self.types.iter()
    }

    pub fn relation(&self, id: RelationId) -> &Relation {
        &self.relations[id.index()]
    }

    pub fn get_relation(&self, id: RelationId) -> Option<&Relation> {
        self.relations.get(id.index())
    }

    pub fn relations(&self) -> impl Iterator<Item = &Relation> {
        self.relations.iter()
    }

    pub fn field(&self, id: FieldId) -> &FieldDefinition {
        &self.fields[id.index()]
    }

    pub fn get_field(&self, id: FieldId) -> Option<&FieldDefinition> {
        self.fields.get(id.index())
    }

    /// Field declared on `ty` itself under `name`.
    pub fn field_by_name(&self, ty: TypeId, name: &str) -> Option<&FieldDefinition> {
        self.ty(ty)
            .fields
            .iter()
            .map(|fd| self.field(*fd))
            .find(|def| def.name == name)
    }

    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    pub fn link(&self, id: LinkId) -> &FieldLinkDefinition {
        &self.links[id.index()]
    }

    pub fn flattened(&self, ty: TypeId, direction: Direction) -> &FlattenedType {
        let t = self.ty(ty);
        match direction {
            Direction::Input => &t.input_side,
            Direction::Output => &t.output_side,
        }
    }

    pub fn is_instance_of(&self, ty: TypeId, of: TypeId) -> bool {
        self.ty(ty).is_instance_of(of)
    }

    /// Slot holding `fd` on objects of `ty`, reached through any handle in
    /// its override chain.
    pub fn field_slot(&self, ty: TypeId, fd: FieldId) -> Option<usize> {
        self.ty(ty).output_side.field_slot(fd)
    }
}
