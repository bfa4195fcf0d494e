//! # fieldnet: Typed Incremental Field Graph
//!
//! A reactive computation graph of scalar *fields* attached to typed
//! objects, driven by a deterministic discrete-event scheduler.
//!
//! ## Design Principles
//!
//! 1. **Build, then freeze**: types, relations and field definitions are
//!    declared on a [`TypeRegistryBuilder`] and compiled once by
//!    [`TypeRegistryBuilder::flatten`] into an immutable [`TypeRegistry`]
//! 2. **No runtime type dispatch**: propagation indexes straight into the
//!    per-type [`FlattenedType`] tables
//! 3. **Arena everything**: objects, steps and definitions are addressed by
//!    small integer ids, never by references
//! 4. **Deterministic draining**: the [`Queue`] orders work by
//!    `(round, phase, magnitude, timestamp)`, a strict total order
//!
//! ## Quick Start
//!
//! ```rust
//! use fieldnet::{Graph, Operator, RelationId, SimpleObj, TypeRegistryBuilder};
//!
//! # fn example() -> fieldnet::Result<()> {
//! let mut b = TypeRegistryBuilder::new();
//! let ty = b.add_type("Cell")?;
//! let a = b.input_field(ty, "a")?;
//! let c = b.input_field(ty, "b")?;
//! let m = b.add_field(ty, "m", Operator::Multiplication)?;
//! b.out(a, RelationId::SELF, m, Some(0))?;
//! b.out(c, RelationId::SELF, m, Some(1))?;
//!
//! let mut graph = Graph::new(b.flatten()?);
//! let obj = graph.add_object(ty, SimpleObj::default());
//! graph.set_field_value(obj, a, 3.0)?;
//! graph.set_field_value(obj, c, 4.0)?;
//! assert_eq!(graph.field_value(obj, m), Some(12.0));
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```
//!
//! ## Layers
//!
//! | Module | Role |
//! |--------|------|
//! | [`types`] | type DAG, relations, registry builder, flattening |
//! | [`fields`] | field definitions, links, operators, runtime cells |
//! | [`graph`] | object arena, propagation, scheduled field updates |
//! | [`queue`] | steps, phases, keys, draining loop |
//! | [`active`] | lock-guarded registry of live execution contexts |

// ============================================================================
// Modules
// ============================================================================

pub mod types;
pub mod fields;
pub mod graph;
pub mod queue;
pub mod active;
pub mod config;

// ============================================================================
// Re-exports: Type system
// ============================================================================

pub use types::{
    Type, TypeId, Relation, RelationId, RelationKind,
    TypeRegistry, TypeRegistryBuilder,
    FlattenedType, FlattenedTypeRelation, FlattenedLink, Direction,
};

// ============================================================================
// Re-exports: Fields
// ============================================================================

pub use fields::{
    FieldDefinition, FieldId, FieldLinkDefinition, LinkId,
    Field, Operator, Comparison, MaxConfig, TieBreak, UpdateMode, Softmax,
};

// ============================================================================
// Re-exports: Graph & Queue
// ============================================================================

pub use graph::{Graph, Obj, ObjId, SimpleObj, ObjSnapshot, FieldUpdate};
pub use queue::{
    Queue, QueueKey, QueueProvider, Step, StepId, StepOutcome, ProcessStats,
    Phase, Timestamp, MAX_ROUND, Anneal, Annealing, FnStep,
};
pub use active::ActiveRegistry;
pub use config::Config;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Duplicate type: {0}")]
    DuplicateType(String),

    #[error("Duplicate field: {0}")]
    DuplicateField(String),

    #[error("Cyclic type hierarchy: {0}")]
    CyclicHierarchy(String),

    #[error("Relation without reverse: {0}")]
    MissingReverse(String),

    #[error("Invalid relation: {0}")]
    InvalidRelation(String),

    #[error("Incompatible link: {0}")]
    IncompatibleLink(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid override: {0}")]
    InvalidOverride(String),

    #[error("Step {0} is already queued")]
    AlreadyQueued(StepId),

    #[error("Step {0} is not queued")]
    NotQueued(StepId),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
