//! Field-delta decoder registries.
//!
//! An update event carries a flat map of source field name to raw wire value. Each
//! source has a registry mapping the field names it owns to decoder functions; a
//! decoder validates the wire value and writes the decoded value into a sparse patch
//! keyed by master view document field names. Source fields without a registry entry
//! are ignored, so upstream schema additions never break the delta path.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::bail;
use crate::conversions::date::decode_wire_date;
use crate::error::{ErrorKind, RevalResult};

pub mod profile;
pub mod recommendation;

/// Decodes one source field's wire value into the patch.
pub type FieldDecoder = fn(&mut Map<String, Value>, &Value) -> RevalResult<()>;

/// Runs every recognized updated field through its decoder and returns the sparse
/// patch of view document fields.
pub fn decode_updated_fields(
    registry: &HashMap<&'static str, FieldDecoder>,
    updated_fields: &Map<String, Value>,
) -> RevalResult<Map<String, Value>> {
    let mut patch = Map::new();
    for (field, value) in updated_fields {
        if let Some(decoder) = registry.get(field.as_str()) {
            decoder(&mut patch, value)?;
        }
    }
    Ok(patch)
}

fn string_value(value: &Value) -> RevalResult<Value> {
    match value {
        Value::Null | Value::String(_) => Ok(value.clone()),
        other => bail!(
            ErrorKind::InvalidData,
            "Updated field value is not a string",
            other
        ),
    }
}

fn bool_value(value: &Value) -> RevalResult<Value> {
    match value {
        Value::Null | Value::Bool(_) => Ok(value.clone()),
        other => bail!(
            ErrorKind::InvalidData,
            "Updated field value is not a boolean",
            other
        ),
    }
}

fn date_value(value: &Value) -> RevalResult<Value> {
    match value {
        Value::Null => Ok(Value::Null),
        other => Ok(serde_json::to_value(decode_wire_date(other)?)?),
    }
}
