//! Dispatch of change events to the per-entity merge services.

use std::future::Future;

use crate::bail;
use crate::error::{ErrorKind, RevalResult};
use crate::types::{CdcEvent, CdcOperation};

/// One entity's merge service, as seen by the router.
///
/// `upsert` folds a full source document into the master view; `apply_delta` folds an
/// update event's field delta. Implementations own key resolution, merge semantics and
/// publishing.
pub trait CdcHandler<T>: Send + Sync {
    fn upsert(&self, entity: T) -> impl Future<Output = RevalResult<()>> + Send;

    fn apply_delta(&self, event: &CdcEvent<T>) -> impl Future<Output = RevalResult<()>> + Send;
}

/// Routes one change event to the matching handler operation.
///
/// Insert and replace both carry a full document and go through the upsert path;
/// update goes through the delta path. Any other operation is rejected, the queue
/// boundary decides whether that dead-letters the message.
pub async fn route_event<T, H>(handler: &H, event: CdcEvent<T>) -> RevalResult<()>
where
    H: CdcHandler<T>,
{
    match &event.operation_type {
        CdcOperation::Insert | CdcOperation::Replace => {
            let Some(document) = event.full_document else {
                bail!(
                    ErrorKind::InvalidData,
                    "Change event carries no full document",
                    format!("'{}' event requires a full document", event.operation_type.as_str())
                );
            };
            handler.upsert(document).await
        }
        CdcOperation::Update => handler.apply_delta(&event).await,
        CdcOperation::Other(literal) => bail!(
            ErrorKind::UnsupportedOperation,
            "Unsupported change operation",
            literal
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::Mutex;

    use super::*;
    use crate::types::DoctorProfile;

    #[derive(Clone, Default)]
    struct RecordingHandler {
        upserts: Arc<Mutex<Vec<DoctorProfile>>>,
        deltas: Arc<Mutex<usize>>,
    }

    impl CdcHandler<DoctorProfile> for RecordingHandler {
        fn upsert(&self, entity: DoctorProfile) -> impl Future<Output = RevalResult<()>> + Send {
            async move {
                self.upserts.lock().await.push(entity);
                Ok(())
            }
        }

        fn apply_delta(
            &self,
            _event: &CdcEvent<DoctorProfile>,
        ) -> impl Future<Output = RevalResult<()>> + Send {
            async move {
                *self.deltas.lock().await += 1;
                Ok(())
            }
        }
    }

    fn event(operation_type: CdcOperation, full_document: Option<DoctorProfile>) -> CdcEvent<DoctorProfile> {
        CdcEvent {
            operation_type,
            full_document,
            update_description: None,
        }
    }

    #[tokio::test]
    async fn insert_and_replace_take_the_upsert_path() {
        let handler = RecordingHandler::default();

        route_event(&handler, event(CdcOperation::Insert, Some(DoctorProfile::default())))
            .await
            .unwrap();
        route_event(&handler, event(CdcOperation::Replace, Some(DoctorProfile::default())))
            .await
            .unwrap();

        assert_eq!(handler.upserts.lock().await.len(), 2);
        assert_eq!(*handler.deltas.lock().await, 0);
    }

    #[tokio::test]
    async fn update_takes_the_delta_path() {
        let handler = RecordingHandler::default();
        route_event(&handler, event(CdcOperation::Update, None))
            .await
            .unwrap();

        assert_eq!(*handler.deltas.lock().await, 1);
        assert!(handler.upserts.lock().await.is_empty());
    }

    #[tokio::test]
    async fn insert_without_document_is_invalid() {
        let handler = RecordingHandler::default();
        let err = route_event(&handler, event(CdcOperation::Insert, None))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn unknown_operation_is_rejected() {
        let handler = RecordingHandler::default();
        let err = route_event(
            &handler,
            event(CdcOperation::Other("drop".to_string()), None),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedOperation);
    }
}
