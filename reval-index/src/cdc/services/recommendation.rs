//! Merge service for the recommendation source.

use std::future::Future;

use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use crate::cdc::fields::{decode_updated_fields, recommendation};
use crate::cdc::router::CdcHandler;
use crate::cdc::services::first_match;
use crate::error::RevalResult;
use crate::index::SearchBackend;
use crate::publish::{UpdatePublisher, UpdateSink};
use crate::repository::ViewRepository;
use crate::types::{is_reliable_gmc_number, CdcEvent, Recommendation};

/// Folds recommendation records into the master view.
///
/// Pure aggregation: a recommendation only ever decorates a row created by the
/// profile source, a miss is skipped rather than creating a row.
#[derive(Debug, Clone)]
pub struct RecommendationService<B, S> {
    repository: ViewRepository<B>,
    publisher: UpdatePublisher<S>,
}

impl<B: SearchBackend, S: UpdateSink> RecommendationService<B, S> {
    pub fn new(repository: ViewRepository<B>, publisher: UpdatePublisher<S>) -> Self {
        Self { repository, publisher }
    }

    fn sparse_fields(recommendation: &Recommendation) -> RevalResult<Map<String, Value>> {
        let mut fields = Map::new();
        fields.insert(
            "admin".to_owned(),
            serde_json::to_value(&recommendation.admin)?,
        );
        fields.insert(
            "outcome".to_owned(),
            serde_json::to_value(&recommendation.outcome)?,
        );
        fields.insert(
            "tisStatus".to_owned(),
            serde_json::to_value(recommendation.recommendation_status)?,
        );
        Ok(fields)
    }

    async fn try_upsert(&self, recommendation: &Recommendation) -> RevalResult<()> {
        let Some(gmc_number) = recommendation
            .gmc_number
            .as_deref()
            .filter(|key| is_reliable_gmc_number(key))
        else {
            warn!("recommendation without a reliable GMC number skipped");
            return Ok(());
        };

        let views = self.repository.find_by_gmc_reference_number(gmc_number).await?;
        let Some(existing) = first_match(views, gmc_number) else {
            debug!(gmc_number, "recommendation for an unknown doctor skipped");
            return Ok(());
        };

        let updated = self
            .repository
            .partial_update(&existing.id, Self::sparse_fields(recommendation)?)
            .await?;
        self.publisher.publish(&updated).await;

        Ok(())
    }

    async fn try_apply_delta(&self, event: &CdcEvent<Recommendation>) -> RevalResult<()> {
        let Some(gmc_number) = event
            .full_document
            .as_ref()
            .and_then(|recommendation| recommendation.gmc_number.as_deref())
            .filter(|key| is_reliable_gmc_number(key))
        else {
            warn!("recommendation update without a reliable GMC number skipped");
            return Ok(());
        };

        let Some(updated_fields) = event.updated_fields().filter(|fields| !fields.is_empty())
        else {
            debug!(gmc_number, "recommendation update carries no changed fields");
            return Ok(());
        };

        let patch = decode_updated_fields(&recommendation::FIELD_DECODERS, updated_fields)?;
        if patch.is_empty() {
            return Ok(());
        }

        let views = self.repository.find_by_gmc_reference_number(gmc_number).await?;
        let Some(existing) = first_match(views, gmc_number) else {
            debug!(gmc_number, "recommendation update for an unknown doctor skipped");
            return Ok(());
        };

        self.repository.partial_update(&existing.id, patch).await?;
        Ok(())
    }
}

impl<B: SearchBackend, S: UpdateSink> CdcHandler<Recommendation> for RecommendationService<B, S> {
    fn upsert(&self, entity: Recommendation) -> impl Future<Output = RevalResult<()>> + Send {
        async move {
            self.try_upsert(&entity).await.inspect_err(|err| {
                error!(recommendation = ?entity, error = %err, "recommendation upsert failed");
            })
        }
    }

    fn apply_delta(
        &self,
        event: &CdcEvent<Recommendation>,
    ) -> impl Future<Output = RevalResult<()>> + Send {
        async move {
            self.try_apply_delta(event).await.inspect_err(|err| {
                error!(event = ?event, error = %err, "recommendation delta failed");
            })
        }
    }
}
