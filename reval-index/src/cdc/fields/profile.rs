//! Decoders for the doctor profile source fields.

use std::collections::HashMap;
use std::sync::LazyLock;

use serde_json::{Map, Value};

use crate::bail;
use crate::cdc::fields::{bool_value, date_value, string_value, FieldDecoder};
use crate::error::{ErrorKind, RevalResult};
use crate::types::{RecommendationStatus, UnderNotice};

/// Source field name to decoder, for doctor profile update events.
pub static FIELD_DECODERS: LazyLock<HashMap<&'static str, FieldDecoder>> = LazyLock::new(|| {
    HashMap::from([
        ("doctorFirstName", decode_doctor_first_name as FieldDecoder),
        ("doctorLastName", decode_doctor_last_name as FieldDecoder),
        ("submissionDate", decode_submission_date as FieldDecoder),
        ("underNotice", decode_under_notice as FieldDecoder),
        ("doctorStatus", decode_doctor_status as FieldDecoder),
        ("lastUpdatedDate", decode_last_updated_date as FieldDecoder),
        ("designatedBodyCode", decode_designated_body as FieldDecoder),
        ("admin", decode_admin as FieldDecoder),
        ("existsInGmc", decode_exists_in_gmc as FieldDecoder),
    ])
});

fn decode_doctor_first_name(patch: &mut Map<String, Value>, value: &Value) -> RevalResult<()> {
    patch.insert("doctorFirstName".to_owned(), string_value(value)?);
    Ok(())
}

fn decode_doctor_last_name(patch: &mut Map<String, Value>, value: &Value) -> RevalResult<()> {
    patch.insert("doctorLastName".to_owned(), string_value(value)?);
    Ok(())
}

/// A null submission date is skipped rather than written through, since a doctor's
/// recorded submission must never be erased by a partial profile update.
fn decode_submission_date(patch: &mut Map<String, Value>, value: &Value) -> RevalResult<()> {
    let decoded = date_value(value)?;
    if !decoded.is_null() {
        patch.insert("submissionDate".to_owned(), decoded);
    }
    Ok(())
}

/// An unknown under-notice literal clears the field instead of failing the event,
/// since the profile source owns that vocabulary and extends it without notice.
fn decode_under_notice(patch: &mut Map<String, Value>, value: &Value) -> RevalResult<()> {
    let decoded = match string_value(value)? {
        Value::String(literal) => match UnderNotice::from_str_lenient(&literal) {
            Some(under_notice) => serde_json::to_value(under_notice)?,
            None => Value::Null,
        },
        _ => Value::Null,
    };
    patch.insert("underNotice".to_owned(), decoded);
    Ok(())
}

/// The status vocabulary is owned by this system, so an unknown literal is fatal for
/// the event.
fn decode_doctor_status(patch: &mut Map<String, Value>, value: &Value) -> RevalResult<()> {
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

fn decode_last_updated_date(patch: &mut Map<String, Value>, value: &Value) -> RevalResult<()> {
    patch.insert("lastUpdatedDate".to_owned(), date_value(value)?);
    Ok(())
}

/// A null designated body is skipped, disconnections arrive through the connection
/// audit log rather than a profile delta.
fn decode_designated_body(patch: &mut Map<String, Value>, value: &Value) -> RevalResult<()> {
    let decoded = string_value(value)?;
    if !decoded.is_null() {
        patch.insert("designatedBody".to_owned(), decoded);
    }
    Ok(())
}

fn decode_admin(patch: &mut Map<String, Value>, value: &Value) -> RevalResult<()> {
    patch.insert("admin".to_owned(), string_value(value)?);
    Ok(())
}

fn decode_exists_in_gmc(patch: &mut Map<String, Value>, value: &Value) -> RevalResult<()> {
    patch.insert("existsInGmc".to_owned(), bool_value(value)?);
    Ok(())
}
