//! Translation between the UI's `id`/`rev` naming and the store's
//! `_id`/`_rev` naming. Every document crossing the store boundary goes
//! through [`to_store`] or [`to_ui`].

use serde_json::{Map, Value};
use thiserror::Error;

use crate::storage::{DocWrite, Revision, StoredDoc, ID_FIELD, REV_FIELD};

pub const UI_ID_FIELD: &str = "id";
pub const UI_REV_FIELD: &str = "rev";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MappingError {
    #[error("document must be a JSON object")]
    NotAnObject,
    #[error("document has no string `id`")]
    MissingId,
    #[error("document revision {0} is malformed")]
    InvalidRevision(String),
}

/// Convert a UI document into a store write.
///
/// A null, empty or missing `rev` marks the document as new.
pub fn to_store(ui: Value) -> Result<DocWrite, MappingError> {
    let Value::Object(mut body) = ui else {
        return Err(MappingError::NotAnObject);
    };
    let id = match body.remove(UI_ID_FIELD) {
        Some(Value::String(id)) if !id.is_empty() => id,
        _ => return Err(MappingError::MissingId),
    };
    let rev = match body.remove(UI_REV_FIELD) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.is_empty() => None,
        Some(Value::String(s)) => Some(
            s.parse::<Revision>()
                .map_err(|_| MappingError::InvalidRevision(s))?,
        ),
        Some(other) => return Err(MappingError::InvalidRevision(other.to_string())),
    };
    body.remove(ID_FIELD);
    body.remove(REV_FIELD);
    Ok(DocWrite { id, rev, body })
}

/// Convert a stored document into the UI representation.
pub fn to_ui(doc: StoredDoc) -> Value {
    let mut body: Map<String, Value> = doc.body;
    body.insert(UI_ID_FIELD.to_string(), Value::String(doc.id));
    body.insert(UI_REV_FIELD.to_string(), Value::String(doc.rev.to_string()));
    Value::Object(body)
}
