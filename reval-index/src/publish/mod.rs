//! Fan-out of refreshed views to downstream consumers.

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::warn;

use crate::config::PublishConfig;
use crate::error::RevalResult;
use crate::types::MasterDoctorView;

/// A destination for refreshed master view documents, keyed by routing key.
pub trait UpdateSink: Send + Sync {
    fn send(
        &self,
        routing_key: &str,
        message: &Value,
    ) -> impl Future<Output = RevalResult<()>> + Send;
}

/// Publishes a refreshed view to the connection and recommendation consumers.
///
/// Publishing is fire and forget: a failed send is logged at warn level and never
/// fails the merge that produced the view, since the index write has already
/// happened and the consumers resync periodically.
#[derive(Debug, Clone)]
pub struct UpdatePublisher<S> {
    sink: S,
    config: PublishConfig,
}

impl<S: UpdateSink> UpdatePublisher<S> {
    pub fn new(sink: S, config: PublishConfig) -> Self {
        Self { sink, config }
    }

    pub async fn publish(&self, view: &MasterDoctorView) {
        let message = match serde_json::to_value(view) {
            Ok(message) => message,
            Err(err) => {
                warn!(id = view.id, error = %err, "refreshed view could not be serialized");
                return;
            }
        };

        let connection = self
            .sink
            .send(&self.config.connection_update_routing_key, &message);
        let recommendation = self
            .sink
            .send(&self.config.recommendation_update_routing_key, &message);
        let (connection, recommendation) = futures::join!(connection, recommendation);

        if let Err(err) = connection {
            warn!(
                id = view.id,
                routing_key = self.config.connection_update_routing_key,
                error = %err,
                "publishing refreshed view failed"
            );
        }
        if let Err(err) = recommendation {
            warn!(
                id = view.id,
                routing_key = self.config.recommendation_update_routing_key,
                error = %err,
                "publishing refreshed view failed"
            );
        }
    }
}

/// Captures published messages in memory for assertions.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    messages: Arc<Mutex<Vec<(String, Value)>>>,
    fail: Arc<std::sync::atomic::AtomicBool>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent send fail.
    pub fn fail_sends(&self) {
        self.fail.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub async fn messages(&self) -> Vec<(String, Value)> {
        self.messages.lock().await.clone()
    }
}

impl UpdateSink for MemorySink {
    fn send(
        &self,
        routing_key: &str,
        message: &Value,
    ) -> impl Future<Output = RevalResult<()>> + Send {
        async move {
            if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
                crate::bail!(
                    crate::error::ErrorKind::PublishFailed,
                    "Publish failed",
                    format!("send to '{routing_key}' rejected")
                );
            }

            self.messages
                .lock()
                .await
                .push((routing_key.to_owned(), message.clone()));
            Ok(())
        }
    }
}
