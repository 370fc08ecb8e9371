//! Decoding of wire-level CDC date values.
//!
//! Change-stream messages carry dates in two accepted shapes: a nested
//! `{"$date": "<ISO-8601>"}` object (where the value may also be epoch milliseconds)
//! and a flat `"yyyy-MM-dd HH:mm:ss"` string. Bare ISO calendar dates are accepted as
//! well. Calendar-date decoding discards the time-of-day component; epoch inputs are
//! interpreted in the local system time zone.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone};
use serde_json::Value;

use crate::error::{ErrorKind, RevalResult};
use crate::{bail, reval_error};

const FLAT_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const CALENDAR_DATE_FORMAT: &str = "%Y-%m-%d";

/// Decodes a raw wire value into a datetime.
pub fn decode_wire_datetime(value: &Value) -> RevalResult<NaiveDateTime> {
    match value {
        Value::Object(map) => match map.get("$date") {
            Some(Value::String(text)) => {
                let parsed = DateTime::parse_from_rfc3339(text)?;
                Ok(parsed.naive_utc())
            }
            Some(Value::Number(number)) => {
                let millis = number.as_i64().ok_or_else(|| {
                    reval_error!(
                        ErrorKind::ConversionError,
                        "Epoch date value is not an integer",
                        number
                    )
                })?;
                Local
                    .timestamp_millis_opt(millis)
                    .single()
                    .map(|datetime| datetime.naive_local())
                    .ok_or_else(|| {
                        reval_error!(
                            ErrorKind::ConversionError,
                            "Epoch date value out of range",
                            millis
                        )
                    })
            }
            _ => bail!(
                ErrorKind::ConversionError,
                "Date object is missing a $date value",
                value
            ),
        },
        Value::String(text) => {
            if let Ok(datetime) = NaiveDateTime::parse_from_str(text, FLAT_DATETIME_FORMAT) {
                return Ok(datetime);
            }
            if let Ok(datetime) = DateTime::parse_from_rfc3339(text) {
                return Ok(datetime.naive_utc());
            }
            let date = NaiveDate::parse_from_str(text, CALENDAR_DATE_FORMAT)?;
            Ok(date.and_time(chrono::NaiveTime::MIN))
        }
        other => bail!(
            ErrorKind::ConversionError,
            "Unsupported wire date shape",
            other
        ),
    }
}

/// Decodes a raw wire value into a calendar date, discarding time-of-day.
pub fn decode_wire_date(value: &Value) -> RevalResult<NaiveDate> {
    decode_wire_datetime(value).map(|datetime| datetime.date())
}

/// Serde adapter for optional calendar-date fields carried in CDC wire shape.
pub mod cdc_date {
    use chrono::NaiveDate;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<Value>::deserialize(deserializer)? {
            None | Some(Value::Null) => Ok(None),
            Some(value) => super::decode_wire_date(&value)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}

/// Serde adapter for optional datetime fields carried in CDC wire shape.
pub mod cdc_datetime {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<Value>::deserialize(deserializer)? {
            None | Some(Value::Null) => Ok(None),
            Some(value) => super::decode_wire_datetime(&value)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}
