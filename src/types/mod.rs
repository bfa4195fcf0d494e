//! # Type System
//!
//! Multi-parent type DAG, typed reversible relations, and the per-type
//! flattened views compiled from them.
//!
//! Pure data after [`TypeRegistryBuilder::flatten`]: no interior mutability,
//! shared read-only between threads.

pub mod type_def;
pub mod relation;
pub mod flattened;
pub mod registry;

pub use type_def::{Type, TypeId};
pub use relation::{Relation, RelationId, RelationKind};
pub use flattened::{Direction, FlattenedLink, FlattenedType, FlattenedTypeRelation};
pub use registry::{TypeRegistry, TypeRegistryBuilder};
