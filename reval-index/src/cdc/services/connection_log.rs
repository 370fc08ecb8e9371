//! Merge service for the GMC connection audit log.

use std::future::Future;

use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use crate::cdc::router::CdcHandler;
use crate::cdc::services::first_match;
use crate::error::RevalResult;
use crate::index::SearchBackend;
use crate::publish::{UpdatePublisher, UpdateSink};
use crate::repository::ViewRepository;
use crate::types::{is_reliable_gmc_number, CdcEvent, ConnectionAuditLog};

/// Actor literal stamped on audit entries written by the GMC side.
const GMC_UPDATE_ACTOR: &str = "Updated by GMC";
/// Response code of a successful connection request.
const GMC_SUCCESS_RESPONSE_CODE: &str = "0";

/// Folds connection audit entries into the master view.
///
/// Only entries that represent an effective change are applied: the entry must
/// either originate from the GMC side or carry a success response code. Everything
/// else is an audit trail of rejected attempts and is discarded.
#[derive(Debug, Clone)]
pub struct ConnectionLogService<B, S> {
    repository: ViewRepository<B>,
    publisher: UpdatePublisher<S>,
}

impl<B: SearchBackend, S: UpdateSink> ConnectionLogService<B, S> {
    pub fn new(repository: ViewRepository<B>, publisher: UpdatePublisher<S>) -> Self {
        Self { repository, publisher }
    }

    fn is_effective(log: &ConnectionAuditLog) -> bool {
        log.updated_by.as_deref() == Some(GMC_UPDATE_ACTOR)
            || log.response_code.as_deref() == Some(GMC_SUCCESS_RESPONSE_CODE)
    }

    fn sparse_fields(log: &ConnectionAuditLog) -> RevalResult<Map<String, Value>> {
        let mut fields = Map::new();
        fields.insert("updatedBy".to_owned(), serde_json::to_value(&log.updated_by)?);
        fields.insert(
            "lastEventDateTime".to_owned(),
            serde_json::to_value(log.request_time)?,
        );
        Ok(fields)
    }

    async fn try_upsert(&self, log: &ConnectionAuditLog) -> RevalResult<()> {
        if !Self::is_effective(log) {
            debug!(
                gmc_id = log.gmc_id.as_deref(),
                response_code = log.response_code.as_deref(),
                "ineffective connection audit entry discarded"
            );
            return Ok(());
        }

        let Some(gmc_id) = log
            .gmc_id
            .as_deref()
            .filter(|key| is_reliable_gmc_number(key))
        else {
            warn!("connection audit entry without a reliable GMC number skipped");
            return Ok(());
        };

        let views = self.repository.find_by_gmc_reference_number(gmc_id).await?;
        let Some(existing) = first_match(views, gmc_id) else {
            debug!(gmc_id, "connection audit entry for an unknown doctor skipped");
            return Ok(());
        };

        let updated = self
            .repository
            .partial_update(&existing.id, Self::sparse_fields(log)?)
            .await?;
        self.publisher.publish(&updated).await;

        Ok(())
    }
}

impl<B: SearchBackend, S: UpdateSink> CdcHandler<ConnectionAuditLog> for ConnectionLogService<B, S> {
    fn upsert(&self, entity: ConnectionAuditLog) -> impl Future<Output = RevalResult<()>> + Send {
        async move {
            self.try_upsert(&entity).await.inspect_err(|err| {
                error!(audit_entry = ?entity, error = %err, "connection audit upsert failed");
            })
        }
    }

    /// The audit log source emits whole entries even for updates, so the delta path
    /// reuses the upsert when a full document is present.
    fn apply_delta(
        &self,
        event: &CdcEvent<ConnectionAuditLog>,
    ) -> impl Future<Output = RevalResult<()>> + Send {
        async move {
            match &event.full_document {
                Some(log) => self.try_upsert(log).await.inspect_err(|err| {
                    error!(event = ?event, error = %err, "connection audit delta failed");
                }),
                None => {
                    debug!("connection audit update without a full document skipped");
                    Ok(())
                }
            }
        }
    }
}
