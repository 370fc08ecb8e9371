//! Source entity shapes consumed from the CDC queues.
//!
//! Each struct mirrors the full-document payload emitted by one source system.
//! Deserialization is tolerant of unknown fields, since the sources evolve their
//! schemas independently of this index.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::conversions::date::{cdc_date, cdc_datetime};
use crate::types::view::{RecommendationStatus, UnderNotice};

/// Serde adapter for under-notice literals that tolerates vocabulary drift.
///
/// An unknown literal decodes to [`None`] instead of failing the whole document.
mod lenient_under_notice {
    use serde::{Deserialize, Deserializer};

    use crate::types::view::UnderNotice;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<UnderNotice>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(None),
            Some(literal) => Ok(UnderNotice::from_str_lenient(&literal)),
        }
    }
}

/// A doctor's record in the profile source system.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DoctorProfile {
    #[serde(alias = "_id")]
    pub gmc_reference_number: Option<String>,
    pub doctor_first_name: Option<String>,
    pub doctor_last_name: Option<String>,
    #[serde(deserialize_with = "cdc_date::deserialize")]
    pub submission_date: Option<NaiveDate>,
    #[serde(deserialize_with = "cdc_date::deserialize")]
    pub date_added: Option<NaiveDate>,
    #[serde(deserialize_with = "lenient_under_notice::deserialize")]
    pub under_notice: Option<UnderNotice>,
    pub sanction: Option<String>,
    pub doctor_status: Option<RecommendationStatus>,
    #[serde(deserialize_with = "cdc_date::deserialize")]
    pub last_updated_date: Option<NaiveDate>,
    pub designated_body_code: Option<String>,
    pub admin: Option<String>,
    pub exists_in_gmc: Option<bool>,
}

/// A revalidation recommendation in the recommendation/outcome source system.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Recommendation {
    #[serde(alias = "_id")]
    pub id: Option<String>,
    pub gmc_number: Option<String>,
    pub outcome: Option<String>,
    pub recommendation_type: Option<String>,
    pub recommendation_status: Option<RecommendationStatus>,
    #[serde(deserialize_with = "cdc_date::deserialize")]
    pub gmc_submission_date: Option<NaiveDate>,
    #[serde(deserialize_with = "cdc_date::deserialize")]
    pub actual_submission_date: Option<NaiveDate>,
    pub gmc_revalidation_id: Option<String>,
    #[serde(deserialize_with = "cdc_date::deserialize")]
    pub deferral_date: Option<NaiveDate>,
    pub deferral_reason: Option<String>,
    pub deferral_sub_reason: Option<String>,
    pub comments: Option<Vec<String>>,
    pub admin: Option<String>,
}

/// A programme-connection record exported by the training-management source system.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TraineeUpdate {
    pub tcs_person_id: Option<i64>,
    pub gmc_reference_number: Option<String>,
    pub doctor_first_name: Option<String>,
    pub doctor_last_name: Option<String>,
    pub submission_date: Option<NaiveDate>,
    pub programme_name: Option<String>,
    pub programme_membership_type: Option<String>,
    pub designated_body: Option<String>,
    pub tcs_designated_body: Option<String>,
    pub programme_owner: Option<String>,
    pub programme_membership_start_date: Option<NaiveDate>,
    pub programme_membership_end_date: Option<NaiveDate>,
    pub curriculum_end_date: Option<NaiveDate>,
    pub placement_grade: Option<String>,
    pub sync_end: Option<bool>,
}

/// One entry of the GMC connection audit log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionAuditLog {
    #[serde(alias = "_id")]
    pub id: Option<String>,
    pub gmc_id: Option<String>,
    pub gmc_client_id: Option<String>,
    pub new_designated_body_code: Option<String>,
    pub previous_designated_body_code: Option<String>,
    pub reason: Option<String>,
    pub request_type: Option<String>,
    #[serde(deserialize_with = "cdc_datetime::deserialize")]
    pub request_time: Option<NaiveDateTime>,
    pub response_code: Option<String>,
    pub updated_by: Option<String>,
}
