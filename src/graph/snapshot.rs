//! Serializable capture of an object's committed field values.
//!
//! Keyed by [`FieldId`], which is stable for the lifetime of a registry, so
//! a snapshot restores into any graph built from the same registry.

use serde::{Deserialize, Serialize};

use crate::fields::{Field, FieldId};
use crate::types::TypeId;
use crate::{Error, Result};
use super::{Graph, Obj, ObjId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjSnapshot {
    pub type_id: TypeId,
    /// Materialized fields by owning definition, in slot order.
    pub fields: Vec<(FieldId, f64)>,
}

impl ObjSnapshot {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl<O: Obj> Graph<O> {
    pub fn snapshot(&self, obj: ObjId) -> Result<ObjSnapshot> {
        let entry = self.entry(obj).ok_or_else(|| Error::NotFound(format!("object {obj}")))?;
        Ok(ObjSnapshot {
            type_id: entry.ty,
            fields: entry
                .fields
                .iter()
                .flatten()
                .map(|f| (f.definition(), f.value()))
                .collect(),
        })
    }

    /// Writes the snapshot's values into `obj` as committed values, without
    /// initialization or propagation.
    pub fn restore(&mut self, obj: ObjId, snapshot: &ObjSnapshot) -> Result<()> {
        let ty = self.object_type(obj).ok_or_else(|| Error::NotFound(format!("object {obj}")))?;
        if ty != snapshot.type_id {
            return Err(Error::InvalidArgument(format!(
                "snapshot of type {} restored into object {obj} of type {ty}",
                snapshot.type_id
            )));
        }
        let slots = snapshot
            .fields
            .iter()
            .map(|(fd, value)| Ok((self.slot(obj, *fd)?, *fd, *value)))
            .collect::<Result<Vec<_>>>()?;

        for (slot, _, _) in &slots {
            if let Some(step) = self.field_at(obj, *slot).and_then(Field::pending_step) {
                self.queue.remove_step(step).ok();
            }
        }

        let Some(entry) = self.entry_mut(obj) else {
            return Ok(());
        };
        for (slot, fd, value) in slots {
            let mut field = Field::new(fd);
            field.value = value;
            entry.fields[slot] = Some(field);
        }
        Ok(())
    }

    /// Adds a new object carrying the snapshot's values.
    pub fn add_object_from_snapshot(&mut self, snapshot: &ObjSnapshot, payload: O) -> Result<ObjId> {
        if self.registry().get_type(snapshot.type_id).is_none() {
            return Err(Error::NotFound(format!("type {}", snapshot.type_id)));
        }
        let obj = self.add_object(snapshot.type_id, payload);
        self.restore(obj, snapshot)?;
        Ok(obj)
    }
}
