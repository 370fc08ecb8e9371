//! Decoders for the recommendation source fields.

use std::collections::HashMap;
use std::sync::LazyLock;

use serde_json::{Map, Value};

use crate::bail;
use crate::cdc::fields::{string_value, FieldDecoder};
use crate::error::{ErrorKind, RevalResult};
use crate::types::RecommendationStatus;

/// Source field name to decoder, for recommendation update events.
///
/// A recommendation contributes only its administrative fields to the view; the
/// workflow dates stay in the recommendation system.
pub static FIELD_DECODERS: LazyLock<HashMap<&'static str, FieldDecoder>> = LazyLock::new(|| {
    HashMap::from([
        ("admin", decode_admin as FieldDecoder),
        ("outcome", decode_outcome as FieldDecoder),
        ("recommendationStatus", decode_recommendation_status as FieldDecoder),
    ])
});

fn decode_admin(patch: &mut Map<String, Value>, value: &Value) -> RevalResult<()> {
    patch.insert("admin".to_owned(), string_value(value)?);
    Ok(())
}

fn decode_outcome(patch: &mut Map<String, Value>, value: &Value) -> RevalResult<()> {
    patch.insert("outcome".to_owned(), string_value(value)?);
    Ok(())
}

fn decode_recommendation_status(patch: &mut Map<String, Value>, value: &Value) -> RevalResult<()> {
    let decoded = match value {
        Value::Null => Value::Null,
        Value::String(literal) => {
            serde_json::to_value(RecommendationStatus::from_str_strict(literal)?)?
        }
        other => bail!(
            ErrorKind::InvalidData,
            "Status field value is not a string",
            other
        ),
    };
    patch.insert("tisStatus".to_owned(), decoded);
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::cdc::fields::decode_updated_fields;

    #[test]
    fn test_recommendation_delta_decodes_to_view_fields() {
        let fields = json!({
            "admin": "admin two",
            "outcome": "APPROVED",
            "recommendationStatus": "SUBMITTED_TO_GMC"
        });

        let patch = decode_updated_fields(&FIELD_DECODERS, fields.as_object().unwrap()).unwrap();

        assert_eq!(patch["admin"], json!("admin two"));
        assert_eq!(patch["outcome"], json!("APPROVED"));
        assert_eq!(patch["tisStatus"], json!("SUBMITTED_TO_GMC"));
    }

    #[test]
    fn test_unknown_status_literal_is_fatal() {
        let fields = json!({"recommendationStatus": "REJECTED"});
        let err =
            decode_updated_fields(&FIELD_DECODERS, fields.as_object().unwrap()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConversionError);
    }
}
