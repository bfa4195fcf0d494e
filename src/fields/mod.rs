//! # Field Computation Graph
//!
//! Field definitions are the nodes of a computation template, links are
//! its edges. Each node applies an [`Operator`] whose update rule is
//! purely incremental.

pub mod definition;
pub mod operator;
pub mod field;
pub mod softmax;

pub use definition::{FieldDefinition, FieldId, FieldLinkDefinition, LinkId};
pub use operator::{Arguments, Candidate, Comparison, MaxConfig, Operator, TieBreak, UpdateMode};
pub use field::Field;
pub use softmax::Softmax;
