//! Shared fixtures for the integration tests.

use serde_json::json;

use reval_index::config::PublishConfig;
use reval_index::index::{MemoryBackend, SearchBackend};
use reval_index::publish::{MemorySink, UpdatePublisher};
use reval_index::repository::ViewRepository;
use reval_index::types::MasterDoctorView;

pub const INDEX: &str = "masterdoctorindex";
pub const CONNECTION_KEY: &str = "reval.connection.update";
pub const RECOMMENDATION_KEY: &str = "reval.recommendation.update";

pub struct TestContext {
    pub backend: MemoryBackend,
    pub repository: ViewRepository<MemoryBackend>,
    pub sink: MemorySink,
    pub publisher: UpdatePublisher<MemorySink>,
}

/// Installs a fmt subscriber honoring `RUST_LOG`, once per test binary.
pub fn init_tracing() {
    use std::sync::Once;

    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub async fn context() -> TestContext {
    init_tracing();
    let backend = MemoryBackend::new();
    backend.create_index(INDEX, &json!({})).await.unwrap();
    let repository = ViewRepository::new(backend.clone(), INDEX);
    let sink = MemorySink::new();
    let publisher = UpdatePublisher::new(
        sink.clone(),
        PublishConfig {
            connection_update_routing_key: CONNECTION_KEY.to_owned(),
            recommendation_update_routing_key: RECOMMENDATION_KEY.to_owned(),
        },
    );

    TestContext { backend, repository, sink, publisher }
}

impl TestContext {
    /// Stores a minimal row for the given GMC number and returns it.
    pub async fn seed_doctor(&self, gmc_reference_number: &str) -> MasterDoctorView {
        let mut view = MasterDoctorView::new();
        view.gmc_reference_number = Some(gmc_reference_number.to_owned());
        self.repository.save(&view).await.unwrap();
        view
    }
}
