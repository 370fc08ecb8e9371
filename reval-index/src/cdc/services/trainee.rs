//! Merge service for the programme-connection (trainee) source.

use std::future::Future;

use tracing::{debug, error, warn};

use crate::cdc::router::CdcHandler;
use crate::error::RevalResult;
use crate::index::SearchBackend;
use crate::publish::{UpdatePublisher, UpdateSink};
use crate::repository::ViewRepository;
use crate::types::{is_reliable_gmc_number, CdcEvent, MasterDoctorView, TraineeUpdate};

/// Folds programme-connection exports into the master view.
///
/// This source is the only writer of `tcs_person_id` and the programme fields, and
/// the only one that detaches them again: an export without a GMC number means the
/// person dropped out of the source's connection query, and an export whose GMC
/// number moved to a different person leaves stale rows to clean up.
#[derive(Debug, Clone)]
pub struct TraineeService<B, S> {
    repository: ViewRepository<B>,
    publisher: UpdatePublisher<S>,
}

impl<B: SearchBackend, S: UpdateSink> TraineeService<B, S> {
    pub fn new(repository: ViewRepository<B>, publisher: UpdatePublisher<S>) -> Self {
        Self { repository, publisher }
    }

    /// Merges an export into a view.
    ///
    /// Identity and name fields are only set when present; the programme fields
    /// write through nulls, since the export is the complete current programme state
    /// and an absent value means the membership ended.
    fn merge_into(update: &TraineeUpdate, view: &mut MasterDoctorView) {
        if update.tcs_person_id.is_some() {
            view.tcs_person_id = update.tcs_person_id;
        }
        if update.gmc_reference_number.is_some() {
            view.gmc_reference_number = update.gmc_reference_number.clone();
        }
        if update.doctor_first_name.is_some() {
            view.doctor_first_name = update.doctor_first_name.clone();
        }
        if update.doctor_last_name.is_some() {
            view.doctor_last_name = update.doctor_last_name.clone();
        }
        if update.submission_date.is_some() {
            view.submission_date = update.submission_date;
        }
        if update.designated_body.is_some() {
            view.designated_body = update.designated_body.clone();
        }

        view.programme_name = update.programme_name.clone();
        view.membership_type = update.programme_membership_type.clone();
        view.programme_owner = update.programme_owner.clone();
        view.curriculum_end_date = update.curriculum_end_date;
        view.membership_start_date = update.programme_membership_start_date;
        view.membership_end_date = update.programme_membership_end_date;
        view.tcs_designated_body = update.tcs_designated_body.clone();
        view.placement_grade = update.placement_grade.clone();
    }

    /// Removes the source's contribution from one row.
    ///
    /// A row that has no designated body exists only because of this source, so it
    /// is deleted outright and a tombstone is returned for publishing. A connected
    /// row survives with its programme fields stripped.
    async fn remove_tis_info(&self, view: &MasterDoctorView) -> RevalResult<MasterDoctorView> {
        if view
            .designated_body
            .as_deref()
            .is_none_or(|body| body.trim().is_empty())
        {
            debug!(id = view.id, "removing master view row left without a designated body");
            self.repository.delete_by_id(&view.id).await?;
            return Ok(MasterDoctorView::tombstone(&view.id));
        }

        debug!(id = view.id, "detaching programme fields from master view row");
        self.repository
            .update_with(&view.id, |view| {
                view.tcs_person_id = None;
                view.tcs_designated_body = None;
                view.membership_start_date = None;
                view.membership_end_date = None;
                view.programme_name = None;
                view.curriculum_end_date = None;
                view.membership_type = None;
                view.programme_owner = None;
                view.placement_grade = None;
            })
            .await
    }

    /// Handles an export that carries no GMC number: the person was filtered out of
    /// the source's connection query, so every row under that person id loses its
    /// programme data.
    async fn detach_person(&self, tcs_person_id: i64) -> RevalResult<()> {
        let views = self.repository.find_by_person_id(tcs_person_id).await?;
        if views.is_empty() {
            debug!(tcs_person_id, "no master view rows for a filtered-out person");
            return Ok(());
        }

        for view in views {
            let detached = self.remove_tis_info(&view).await?;
            self.publisher.publish(&detached).await;
        }

        Ok(())
    }

    /// Detaches rows whose person id matches but whose GMC number no longer does.
    async fn detach_stale_rows(
        &self,
        tcs_person_id: i64,
        gmc_reference_number: &str,
    ) -> RevalResult<()> {
        let stale = self
            .repository
            .find_by_person_id_and_gmc_not(tcs_person_id, gmc_reference_number)
            .await?;
        for view in stale {
            let detached = self.remove_tis_info(&view).await?;
            self.publisher.publish(&detached).await;
        }

        Ok(())
    }

    async fn try_upsert(&self, update: &TraineeUpdate) -> RevalResult<()> {
        let Some(gmc_reference_number) = update.gmc_reference_number.as_deref() else {
            let Some(tcs_person_id) = update.tcs_person_id else {
                warn!("trainee export without a GMC number or person id skipped");
                return Ok(());
            };
            return self.detach_person(tcs_person_id).await;
        };

        if !is_reliable_gmc_number(gmc_reference_number) {
            warn!("trainee export without a reliable GMC number skipped");
            return Ok(());
        }

        // Prefer the row already linked to this person, fall back to the GMC number
        // alone, and only then create a fresh row.
        let mut existing = match update.tcs_person_id {
            Some(tcs_person_id) => {
                self.repository
                    .find_by_gmc_and_person_id(gmc_reference_number, tcs_person_id)
                    .await?
            }
            None => Vec::new(),
        };
        if existing.is_empty() {
            existing = self
                .repository
                .find_by_gmc_reference_number(gmc_reference_number)
                .await?;
        }
        if existing.len() > 1 {
            warn!(
                gmc_reference_number,
                matches = existing.len(),
                "multiple master view rows share one GMC number"
            );
        }

        if existing.is_empty() {
            let mut view = MasterDoctorView::new();
            Self::merge_into(update, &mut view);
            self.repository.save(&view).await?;
            self.publisher.publish(&view).await;
        } else {
            for view in existing {
                let updated = self
                    .repository
                    .update_with(&view.id, |view| Self::merge_into(update, view))
                    .await?;
                self.publisher.publish(&updated).await;
            }
        }

        if let Some(tcs_person_id) = update.tcs_person_id {
            self.detach_stale_rows(tcs_person_id, gmc_reference_number).await?;
        }

        Ok(())
    }
}

impl<B: SearchBackend, S: UpdateSink> CdcHandler<TraineeUpdate> for TraineeService<B, S> {
    fn upsert(&self, entity: TraineeUpdate) -> impl Future<Output = RevalResult<()>> + Send {
        async move {
            self.try_upsert(&entity).await.inspect_err(|err| {
                error!(trainee_update = ?entity, error = %err, "trainee upsert failed");
            })
        }
    }

    /// The programme-connection source exports whole records, so the delta path
    /// reuses the upsert when a full document is present.
    fn apply_delta(
        &self,
        event: &CdcEvent<TraineeUpdate>,
    ) -> impl Future<Output = RevalResult<()>> + Send {
        async move {
            match &event.full_document {
                Some(update) => self.try_upsert(update).await.inspect_err(|err| {
                    error!(event = ?event, error = %err, "trainee delta failed");
                }),
                None => {
                    debug!("trainee update without a full document skipped");
                    Ok(())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use serde_json::json;

    use super::*;
    use crate::config::PublishConfig;
    use crate::index::MemoryBackend;
    use crate::publish::MemorySink;

    const INDEX: &str = "masterdoctorindex";

    async fn service() -> (
        MemorySink,
        ViewRepository<MemoryBackend>,
        TraineeService<MemoryBackend, MemorySink>,
    ) {
        let backend = MemoryBackend::new();
        backend.create_index(INDEX, &json!({})).await.unwrap();
        let repository = ViewRepository::new(backend, INDEX);
        let sink = MemorySink::new();
        let publisher = UpdatePublisher::new(
            sink.clone(),
            PublishConfig {
                connection_update_routing_key: "connection".to_owned(),
                recommendation_update_routing_key: "recommendation".to_owned(),
            },
        );
        (sink.clone(), repository.clone(), TraineeService::new(repository, publisher))
    }

    fn export(gmc: Option<&str>, person_id: Option<i64>) -> TraineeUpdate {
        TraineeUpdate {
            gmc_reference_number: gmc.map(str::to_owned),
            tcs_person_id: person_id,
            doctor_first_name: Some("Ana".to_owned()),
            programme_name: Some("General Practice".to_owned()),
            programme_membership_type: Some("Substantive".to_owned()),
            tcs_designated_body: Some("1-TCSDB".to_owned()),
            programme_membership_start_date: NaiveDate::from_ymd_opt(2023, 8, 1),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn export_miss_creates_a_row_with_programme_fields() {
        let (sink, repository, service) = service().await;
        service.upsert(export(Some("7000001"), Some(42))).await.unwrap();

        let views = repository.find_by_gmc_reference_number("7000001").await.unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].tcs_person_id, Some(42));
        assert_eq!(views[0].programme_name.as_deref(), Some("General Practice"));
        assert_eq!(sink.messages().await.len(), 2);
    }

    #[tokio::test]
    async fn export_merge_keeps_identity_and_clears_ended_programme_fields() {
        let (_, repository, service) = service().await;
        let mut seeded = MasterDoctorView::new();
        seeded.gmc_reference_number = Some("7000001".to_owned());
        seeded.designated_body = Some("1-1ABCDE".to_owned());
        seeded.admin = Some("admin one".to_owned());
        seeded.programme_owner = Some("Old Owner".to_owned());
        repository.save(&seeded).await.unwrap();

        let mut update = export(Some("7000001"), Some(42));
        update.programme_owner = None;
        service.upsert(update).await.unwrap();

        let views = repository.find_by_gmc_reference_number("7000001").await.unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].id, seeded.id);
        assert_eq!(views[0].tcs_person_id, Some(42));
        // An absent programme owner means the membership record no longer has one.
        assert!(views[0].programme_owner.is_none());
        // Fields owned by other sources survive.
        assert_eq!(views[0].admin.as_deref(), Some("admin one"));
        assert_eq!(views[0].designated_body.as_deref(), Some("1-1ABCDE"));
    }

    #[tokio::test]
    async fn filtered_out_person_with_connection_is_detached() {
        let (sink, repository, service) = service().await;
        let mut seeded = MasterDoctorView::new();
        seeded.gmc_reference_number = Some("7000001".to_owned());
        seeded.tcs_person_id = Some(42);
        seeded.designated_body = Some("1-1ABCDE".to_owned());
        seeded.programme_name = Some("General Practice".to_owned());
        repository.save(&seeded).await.unwrap();

        service.upsert(export(None, Some(42))).await.unwrap();

        let views = repository.find_by_gmc_reference_number("7000001").await.unwrap();
        assert_eq!(views.len(), 1);
        assert!(views[0].tcs_person_id.is_none());
        assert!(views[0].programme_name.is_none());
        assert_eq!(views[0].designated_body.as_deref(), Some("1-1ABCDE"));
        assert_eq!(sink.messages().await.len(), 2);
    }

    #[tokio::test]
    async fn filtered_out_person_without_connection_is_deleted_and_tombstoned() {
        let (sink, repository, service) = service().await;
        let mut seeded = MasterDoctorView::new();
        seeded.gmc_reference_number = Some("7000001".to_owned());
        seeded.tcs_person_id = Some(42);
        seeded.programme_name = Some("General Practice".to_owned());
        repository.save(&seeded).await.unwrap();

        service.upsert(export(None, Some(42))).await.unwrap();

        assert!(repository
            .find_by_gmc_reference_number("7000001")
            .await
            .unwrap()
            .is_empty());

        let messages = sink.messages().await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].1["id"], seeded.id.as_str());
        assert_eq!(messages[0].1["gmcReferenceNumber"], serde_json::Value::Null);
    }

    #[tokio::test]
    async fn gmc_number_change_detaches_the_stale_row() {
        let (_, repository, service) = service().await;
        let mut stale = MasterDoctorView::new();
        stale.gmc_reference_number = Some("7000001".to_owned());
        stale.tcs_person_id = Some(42);
        stale.designated_body = Some("1-1ABCDE".to_owned());
        stale.programme_name = Some("General Practice".to_owned());
        repository.save(&stale).await.unwrap();

        service.upsert(export(Some("7000002"), Some(42))).await.unwrap();

        let old = repository.find_by_gmc_reference_number("7000001").await.unwrap();
        assert_eq!(old.len(), 1);
        assert!(old[0].tcs_person_id.is_none());
        assert!(old[0].programme_name.is_none());

        let new = repository.find_by_gmc_reference_number("7000002").await.unwrap();
        assert_eq!(new.len(), 1);
        assert_eq!(new[0].tcs_person_id, Some(42));
    }

    #[tokio::test]
    async fn unreliable_gmc_literal_is_skipped() {
        let (sink, repository, service) = service().await;
        service.upsert(export(Some("UNKNOWN"), Some(42))).await.unwrap();

        assert!(repository.find_by_person_id(42).await.unwrap().is_empty());
        assert!(sink.messages().await.is_empty());
    }
}
