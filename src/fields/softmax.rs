//! Softmax as a composite of three operator fields.
//!
//! ```text
//!   input type      norm type          output type
//!   x ──SELF──▶ exp ──to_norm──▶ norm (Sum)
//!                │                  │
//!                └──to_output──▶ out = exp / norm ◀──norm_to_output──┘
//! ```

use crate::types::{RelationId, TypeId, TypeRegistryBuilder};
use crate::Result;
use super::{FieldId, Operator};

/// Field ids of a wired softmax.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Softmax {
    pub exp: FieldId,
    pub norm: FieldId,
    pub output: FieldId,
}

impl Softmax {
    /// Wires `exp(input) / sum(exp(inputs))`.
    ///
    /// `to_norm` leads from an input object to its normalizing object,
    /// `to_output` from an input object to its output object and
    /// `norm_to_output` from the normalizing object to the outputs.
    #[allow(clippy::too_many_arguments)]
    pub fn define(
        b: &mut TypeRegistryBuilder,
        name: &str,
        input_type: TypeId,
        input: FieldId,
        norm_type: TypeId,
        output_type: TypeId,
        to_norm: RelationId,
        to_output: RelationId,
        norm_to_output: RelationId,
    ) -> Result<Softmax> {
        let exp = b.add_field(input_type, format!("{name}_exp"), Operator::Exp)?;
        b.out(input, RelationId::SELF, exp, Some(0))?;

        let norm = b.add_field(norm_type, format!("{name}_norm"), Operator::Sum)?;
        b.out(exp, to_norm, norm, None)?;

        let output = b.add_field(output_type, name, Operator::Division)?;
        b.out(exp, to_output, output, Some(0))?;
        b.out(norm, norm_to_output, output, Some(1))?;

        Ok(Softmax { exp, norm, output })
    }
}
