//! Merge service for the doctor profile source.

use std::future::Future;

use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use crate::cdc::fields::{decode_updated_fields, profile};
use crate::cdc::router::CdcHandler;
use crate::cdc::services::first_match;
use crate::error::RevalResult;
use crate::index::SearchBackend;
use crate::publish::{UpdatePublisher, UpdateSink};
use crate::repository::ViewRepository;
use crate::types::{is_reliable_gmc_number, CdcEvent, DoctorProfile, MasterDoctorView};

/// Folds doctor profile records into the master view.
///
/// The profile source is the originating system for a doctor, so a miss on upsert
/// creates the row; every other source only aggregates onto existing rows.
#[derive(Debug, Clone)]
pub struct ProfileService<B, S> {
    repository: ViewRepository<B>,
    publisher: UpdatePublisher<S>,
}

impl<B: SearchBackend, S: UpdateSink> ProfileService<B, S> {
    pub fn new(repository: ViewRepository<B>, publisher: UpdatePublisher<S>) -> Self {
        Self { repository, publisher }
    }

    /// Copies every profile-owned field into a fresh view.
    fn view_from_profile(gmc_reference_number: &str, profile: &DoctorProfile) -> MasterDoctorView {
        let mut view = MasterDoctorView::new();
        view.gmc_reference_number = Some(gmc_reference_number.to_owned());
        view.doctor_first_name = profile.doctor_first_name.clone();
        view.doctor_last_name = profile.doctor_last_name.clone();
        view.submission_date = profile.submission_date;
        view.designated_body = profile.designated_body_code.clone();
        view.last_updated_date = profile.last_updated_date;
        view.under_notice = profile.under_notice;
        view.tis_status = profile.doctor_status;
        view.admin = profile.admin.clone();
        view.exists_in_gmc = profile.exists_in_gmc;
        view
    }

    /// Builds the sparse patch a profile record contributes to an existing row.
    ///
    /// Nulls write through, except the designated body and submission date, which
    /// are only ever set when present.
    fn sparse_fields(profile: &DoctorProfile) -> RevalResult<Map<String, Value>> {
        let mut fields = Map::new();
        fields.insert(
            "doctorFirstName".to_owned(),
            serde_json::to_value(&profile.doctor_first_name)?,
        );
        fields.insert(
            "doctorLastName".to_owned(),
            serde_json::to_value(&profile.doctor_last_name)?,
        );
        if profile.submission_date.is_some() {
            fields.insert(
                "submissionDate".to_owned(),
                serde_json::to_value(profile.submission_date)?,
            );
        }
        if profile.designated_body_code.is_some() {
            fields.insert(
                "designatedBody".to_owned(),
                serde_json::to_value(&profile.designated_body_code)?,
            );
        }
        fields.insert(
            "lastUpdatedDate".to_owned(),
            serde_json::to_value(profile.last_updated_date)?,
        );
        fields.insert(
            "underNotice".to_owned(),
            serde_json::to_value(profile.under_notice)?,
        );
        fields.insert(
            "tisStatus".to_owned(),
            serde_json::to_value(profile.doctor_status)?,
        );
        fields.insert("admin".to_owned(), serde_json::to_value(&profile.admin)?);
        fields.insert(
            "existsInGmc".to_owned(),
            serde_json::to_value(profile.exists_in_gmc)?,
        );
        Ok(fields)
    }

    async fn try_upsert(&self, profile: &DoctorProfile) -> RevalResult<()> {
        let Some(gmc_reference_number) = profile
            .gmc_reference_number
            .as_deref()
            .filter(|key| is_reliable_gmc_number(key))
        else {
            warn!("profile record without a reliable GMC number skipped");
            return Ok(());
        };

        let views = self
            .repository
            .find_by_gmc_reference_number(gmc_reference_number)
            .await?;

        match first_match(views, gmc_reference_number) {
            None => {
                let view = Self::view_from_profile(gmc_reference_number, profile);
                self.repository.save(&view).await?;
                self.publisher.publish(&view).await;
            }
            Some(existing) => {
                let updated = self
                    .repository
                    .partial_update(&existing.id, Self::sparse_fields(profile)?)
                    .await?;
                self.publisher.publish(&updated).await;
            }
        }

        Ok(())
    }

    async fn try_apply_delta(&self, event: &CdcEvent<DoctorProfile>) -> RevalResult<()> {
        let Some(gmc_reference_number) = event
            .full_document
            .as_ref()
            .and_then(|profile| profile.gmc_reference_number.as_deref())
            .filter(|key| is_reliable_gmc_number(key))
        else {
            warn!("profile update without a reliable GMC number skipped");
            return Ok(());
        };

        let Some(updated_fields) = event.updated_fields().filter(|fields| !fields.is_empty())
        else {
            debug!(gmc_reference_number, "profile update carries no changed fields");
            return Ok(());
        };

        let patch = decode_updated_fields(&profile::FIELD_DECODERS, updated_fields)?;
        if patch.is_empty() {
            return Ok(());
        }

        let views = self
            .repository
            .find_by_gmc_reference_number(gmc_reference_number)
            .await?;
        let Some(existing) = first_match(views, gmc_reference_number) else {
            debug!(gmc_reference_number, "profile update for an unknown doctor skipped");
            return Ok(());
        };

        self.repository.partial_update(&existing.id, patch).await?;
        Ok(())
    }
}

impl<B: SearchBackend, S: UpdateSink> CdcHandler<DoctorProfile> for ProfileService<B, S> {
    fn upsert(&self, entity: DoctorProfile) -> impl Future<Output = RevalResult<()>> + Send {
        async move {
            self.try_upsert(&entity).await.inspect_err(|err| {
                error!(profile = ?entity, error = %err, "profile upsert failed");
            })
        }
    }

    fn apply_delta(
        &self,
        event: &CdcEvent<DoctorProfile>,
    ) -> impl Future<Output = RevalResult<()>> + Send {
        async move {
            self.try_apply_delta(event).await.inspect_err(|err| {
                error!(event = ?event, error = %err, "profile delta failed");
            })
        }
    }
}
