//! The denormalized master view document and its enumerated field types.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Literal used by upstream systems when a GMC reference number is not known.
const UNKNOWN_GMC_NUMBER: &str = "UNKNOWN";

/// Returns whether a GMC reference number can be trusted as a lookup key.
///
/// Upstream systems emit `null`, blank strings, or the literal `"UNKNOWN"` for doctors
/// that have no reliable GMC registration. Such values must never be used to resolve a
/// master view row, since they would collide across unrelated doctors.
pub fn is_reliable_gmc_number(value: &str) -> bool {
    !value.trim().is_empty() && value != UNKNOWN_GMC_NUMBER
}

/// Under-notice state of a doctor, as reported by the profile source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnderNotice {
    Yes,
    No,
    OnHold,
}

impl UnderNotice {
    /// Parses an under-notice literal, tolerating upstream vocabulary drift.
    ///
    /// Accepts both the enum names (`"YES"`, `"NO"`, `"ON_HOLD"`) and the display
    /// values (`"Yes"`, `"No"`, `"On Hold"`) case-insensitively. Any other literal
    /// yields [`None`] rather than an error.
    pub fn from_str_lenient(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("yes") {
            Some(UnderNotice::Yes)
        } else if value.eq_ignore_ascii_case("no") {
            Some(UnderNotice::No)
        } else if value.eq_ignore_ascii_case("on_hold") || value.eq_ignore_ascii_case("on hold") {
            Some(UnderNotice::OnHold)
        } else {
            None
        }
    }
}

/// Recommendation workflow status, shared by the profile and recommendation sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecommendationStatus {
    NotStarted,
    Started,
    SubmittedToGmc,
    Completed,
}

impl RecommendationStatus {
    /// Parses a status literal.
    ///
    /// Unlike [`UnderNotice::from_str_lenient`], an unknown literal here is a
    /// schema-compatibility error: the status vocabulary is owned by this system and a
    /// value outside it means the sources and the index have diverged.
    pub fn from_str_strict(value: &str) -> crate::error::RevalResult<Self> {
        match value.trim() {
            "NOT_STARTED" => Ok(RecommendationStatus::NotStarted),
            "STARTED" => Ok(RecommendationStatus::Started),
            "SUBMITTED_TO_GMC" => Ok(RecommendationStatus::SubmittedToGmc),
            "COMPLETED" => Ok(RecommendationStatus::Completed),
            other => Err(crate::reval_error!(
                crate::error::ErrorKind::ConversionError,
                "Unknown recommendation status literal",
                other
            )),
        }
    }
}

/// The denormalized master view row, aggregating facts about one doctor from the four
/// source systems.
///
/// Keyed by `gmc_reference_number` (see [`is_reliable_gmc_number`]); `tcs_person_id` is
/// a secondary lookup key populated by the programme-connection source. Every field
/// other than the document id is optional, since each source only ever contributes its
/// own subset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MasterDoctorView {
    pub id: String,
    pub tcs_person_id: Option<i64>,
    pub gmc_reference_number: Option<String>,
    // Profile fields.
    pub doctor_first_name: Option<String>,
    pub doctor_last_name: Option<String>,
    pub submission_date: Option<NaiveDate>,
    pub designated_body: Option<String>,
    pub gmc_status: Option<String>,
    pub last_updated_date: Option<NaiveDate>,
    pub under_notice: Option<UnderNotice>,
    pub exists_in_gmc: Option<bool>,
    // Recommendation fields (admin is shared with the profile source).
    pub admin: Option<String>,
    pub outcome: Option<String>,
    pub tis_status: Option<RecommendationStatus>,
    // Programme-connection fields.
    pub programme_name: Option<String>,
    pub membership_type: Option<String>,
    pub membership_start_date: Option<NaiveDate>,
    pub membership_end_date: Option<NaiveDate>,
    pub curriculum_end_date: Option<NaiveDate>,
    pub programme_owner: Option<String>,
    pub tcs_designated_body: Option<String>,
    pub placement_grade: Option<String>,
    // Connection-audit fields.
    pub updated_by: Option<String>,
    pub last_event_date_time: Option<NaiveDateTime>,
}

impl MasterDoctorView {
    /// Creates an empty view with a freshly generated document id.
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            ..Default::default()
        }
    }

    /// Creates a tombstone view carrying only the document id.
    ///
    /// Published downstream when a row is deleted so that consumers can drop their own
    /// copy of the record.
    pub fn tombstone(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Default::default()
        }
    }

    /// Derived connection status: `"Yes"` when the doctor has a designated body.
    pub fn connection_status(&self) -> &'static str {
        match self.designated_body.as_deref() {
            Some(body) if !body.trim().is_empty() => "Yes",
            _ => "No",
        }
    }

    /// Returns the GMC reference number when it is usable as a lookup key.
    pub fn reliable_gmc_number(&self) -> Option<&str> {
        self.gmc_reference_number
            .as_deref()
            .filter(|value| is_reliable_gmc_number(value))
    }
}
