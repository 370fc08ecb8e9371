//! Change-data-capture event types as delivered by the source queues.

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The kind of change a CDC event describes.
///
/// Only insert, update and replace are supported by the merge engine; any other
/// literal is preserved verbatim in [`CdcOperation::Other`] so the router can surface
/// it in an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CdcOperation {
    Insert,
    Update,
    Replace,
    Other(String),
}

impl CdcOperation {
    /// Returns the wire literal for this operation.
    pub fn as_str(&self) -> &str {
        match self {
            CdcOperation::Insert => "insert",
            CdcOperation::Update => "update",
            CdcOperation::Replace => "replace",
            CdcOperation::Other(literal) => literal,
        }
    }
}

impl<'de> Deserialize<'de> for CdcOperation {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let literal = String::deserialize(deserializer)?;
        Ok(match literal.to_ascii_lowercase().as_str() {
            "insert" => CdcOperation::Insert,
            "update" => CdcOperation::Update,
            "replace" => CdcOperation::Replace,
            _ => CdcOperation::Other(literal),
        })
    }
}

impl Serialize for CdcOperation {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

/// The field-level delta of an update event.
///
/// `updated_fields` is a flat map of source field name to raw wire value; values are
/// kept untyped here and decoded per field by the decoder registries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateDescription {
    pub updated_fields: Map<String, Value>,
}

/// A change event consumed from one of the source queues.
///
/// Constructed once at the queue boundary by deserializing the wire message, consumed
/// exactly once by the router, and never persisted. `full_document` carries the full
/// source entity for insert/replace events; `update_description` carries the field
/// delta for update events.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdcEvent<T> {
    pub operation_type: CdcOperation,
    #[serde(default = "none")]
    pub full_document: Option<T>,
    #[serde(default)]
    pub update_description: Option<UpdateDescription>,
}

fn none<T>() -> Option<T> {
    None
}

impl<T> CdcEvent<T> {
    /// Returns the updated-fields map of an update event, if present.
    pub fn updated_fields(&self) -> Option<&Map<String, Value>> {
        self.update_description
            .as_ref()
            .map(|description| &description.updated_fields)
    }
}
