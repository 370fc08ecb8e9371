//! Read and write access to the master view index.

use std::time::Duration;

use rand::Rng;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::config::SearchConfig;
use crate::error::{ErrorKind, RevalResult};
use crate::index::{DocumentHit, SearchBackend};
use crate::reval_error;
use crate::types::MasterDoctorView;

/// Default conflict retry budget shared by the sparse and read-modify-write paths.
const DEFAULT_CONFLICT_RETRIES: u32 = 5;

/// Repository over the master view index.
///
/// Lookups return every match sorted by document id, so callers that resolve
/// duplicates by taking the first hit behave the same on every run. Writes go
/// through optimistic concurrency: the sparse path leans on the engine's
/// conflict retries, [`ViewRepository::update_with`] re-reads and re-applies on
/// a version conflict.
#[derive(Debug, Clone)]
pub struct ViewRepository<B> {
    backend: B,
    index: String,
    retry_on_conflict: u32,
}

impl<B: SearchBackend> ViewRepository<B> {
    pub fn new(backend: B, index: impl Into<String>) -> Self {
        Self {
            backend,
            index: index.into(),
            retry_on_conflict: DEFAULT_CONFLICT_RETRIES,
        }
    }

    /// Builds a repository with the conflict retry budget taken from configuration.
    pub fn from_config(backend: B, index: impl Into<String>, config: &SearchConfig) -> Self {
        Self::new(backend, index).with_retry_on_conflict(config.retry_on_conflict)
    }

    /// Overrides the conflict retry budget for both update paths.
    pub fn with_retry_on_conflict(mut self, retry_on_conflict: u32) -> Self {
        self.retry_on_conflict = retry_on_conflict;
        self
    }

    pub fn index_name(&self) -> &str {
        &self.index
    }

    fn view_from_hit(hit: DocumentHit) -> RevalResult<MasterDoctorView> {
        let mut view: MasterDoctorView = serde_json::from_value(hit.source)?;
        view.id = hit.id;
        Ok(view)
    }

    async fn search_views(&self, query: Value) -> RevalResult<Vec<MasterDoctorView>> {
        let mut hits = self.backend.search(&self.index, &query).await?;
        hits.sort_by(|left, right| left.id.cmp(&right.id));
        hits.into_iter().map(Self::view_from_hit).collect()
    }

    pub async fn find_by_gmc_reference_number(
        &self,
        gmc_reference_number: &str,
    ) -> RevalResult<Vec<MasterDoctorView>> {
        self.search_views(json!({
            "term": { "gmcReferenceNumber": gmc_reference_number }
        }))
        .await
    }

    pub async fn find_by_person_id(&self, tcs_person_id: i64) -> RevalResult<Vec<MasterDoctorView>> {
        self.search_views(json!({ "term": { "tcsPersonId": tcs_person_id } }))
            .await
    }

    pub async fn find_by_gmc_and_person_id(
        &self,
        gmc_reference_number: &str,
        tcs_person_id: i64,
    ) -> RevalResult<Vec<MasterDoctorView>> {
        self.search_views(json!({
            "bool": {
                "must": [
                    { "term": { "gmcReferenceNumber": gmc_reference_number } },
                    { "term": { "tcsPersonId": tcs_person_id } }
                ]
            }
        }))
        .await
    }

    /// Finds rows for a person whose GMC number differs from the given one, which
    /// is how a trainee's stale rows are located after a GMC number change.
    pub async fn find_by_person_id_and_gmc_not(
        &self,
        tcs_person_id: i64,
        gmc_reference_number: &str,
    ) -> RevalResult<Vec<MasterDoctorView>> {
        self.search_views(json!({
            "bool": {
                "must": [{ "term": { "tcsPersonId": tcs_person_id } }],
                "must_not": [{ "term": { "gmcReferenceNumber": gmc_reference_number } }]
            }
        }))
        .await
    }

    pub async fn save(&self, view: &MasterDoctorView) -> RevalResult<()> {
        let source = serde_json::to_value(view)?;
        self.backend
            .index_document(&self.index, &view.id, &source, None)
            .await
    }

    /// Read-modify-write of a full document under optimistic concurrency.
    ///
    /// Re-reads the document and re-applies `mutate` when a concurrent writer wins
    /// the race, up to the conflict retry budget. Returns the written view.
    pub async fn update_with<F>(&self, id: &str, mutate: F) -> RevalResult<MasterDoctorView>
    where
        F: Fn(&mut MasterDoctorView),
    {
        let mut attempt = 0;
        loop {
            let Some(hit) = self.backend.get_document(&self.index, id).await? else {
                return Err(reval_error!(
                    ErrorKind::PartialUpdateFailed,
                    "Document not found",
                    format!("no document '{id}' in index '{}'", self.index)
                ));
            };

            let token = hit.token;
            let mut view = Self::view_from_hit(hit)?;
            mutate(&mut view);

            let source = serde_json::to_value(&view)?;
            match self
                .backend
                .index_document(&self.index, id, &source, token)
                .await
            {
                Ok(()) => return Ok(view),
                Err(err) if err.kind() == ErrorKind::VersionConflict => {
                    attempt += 1;
                    if attempt >= self.retry_on_conflict {
                        return Err(err);
                    }
                    debug!(id, attempt, "retrying update after version conflict");
                    let jitter = rand::thread_rng().gen_range(5..50);
                    tokio::time::sleep(Duration::from_millis(jitter)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Merges `fields` into an existing document and returns the updated view.
    ///
    /// The merge runs engine-side with the conflict retry budget, so concurrent
    /// sparse updates touching different fields never lose each other's writes.
    pub async fn partial_update(
        &self,
        id: &str,
        fields: Map<String, Value>,
    ) -> RevalResult<MasterDoctorView> {
        let source = self
            .backend
            .partial_update(&self.index, id, &fields, self.retry_on_conflict)
            .await
            .map_err(|err| {
                reval_error!(
                    ErrorKind::PartialUpdateFailed,
                    "Partial update failed",
                    format!("document '{id}' in index '{}'", self.index),
                    source: err
                )
            })?;

        let Some(source) = source else {
            return Err(reval_error!(
                ErrorKind::PartialUpdateFailed,
                "Updated document source is null",
                format!("document '{id}' in index '{}'", self.index)
            ));
        };

        Self::view_from_hit(DocumentHit { id: id.to_owned(), source, token: None })
    }

    pub async fn delete_by_id(&self, id: &str) -> RevalResult<()> {
        self.backend.delete_document(&self.index, id).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::index::MemoryBackend;

    const INDEX: &str = "masterdoctorindex";

    async fn repository() -> (MemoryBackend, ViewRepository<MemoryBackend>) {
        let backend = MemoryBackend::new();
        backend.create_index(INDEX, &json!({})).await.unwrap();
        (backend.clone(), ViewRepository::new(backend, INDEX))
    }

    fn view(gmc: &str, person_id: Option<i64>) -> MasterDoctorView {
        let mut view = MasterDoctorView::new();
        view.gmc_reference_number = Some(gmc.to_owned());
        view.tcs_person_id = person_id;
        view
    }

    #[tokio::test]
    async fn save_then_find_round_trips_the_view() {
        let (_, repository) = repository().await;
        let mut stored = view("7000001", Some(42));
        stored.doctor_first_name = Some("Ada".to_owned());
        repository.save(&stored).await.unwrap();

        let found = repository.find_by_gmc_reference_number("7000001").await.unwrap();
        assert_eq!(found, vec![stored]);
    }

    #[tokio::test]
    async fn lookups_return_matches_sorted_by_id() {
        let (_, repository) = repository().await;
        for id in ["c", "a", "b"] {
            let mut duplicate = view("7000001", None);
            duplicate.id = id.to_owned();
            repository.save(&duplicate).await.unwrap();
        }

        let found = repository.find_by_gmc_reference_number("7000001").await.unwrap();
        let ids: Vec<_> = found.iter().map(|view| view.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn person_lookup_can_exclude_a_gmc_number() {
        let (_, repository) = repository().await;
        repository.save(&view("7000001", Some(42))).await.unwrap();
        repository.save(&view("7000002", Some(42))).await.unwrap();

        let stale = repository
            .find_by_person_id_and_gmc_not(42, "7000001")
            .await
            .unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].gmc_reference_number.as_deref(), Some("7000002"));
    }

    #[tokio::test]
    async fn partial_update_leaves_absent_fields_alone() {
        let (_, repository) = repository().await;
        let mut stored = view("7000001", Some(42));
        stored.admin = Some("admin one".to_owned());
        repository.save(&stored).await.unwrap();

        let mut fields = Map::new();
        fields.insert("outcome".to_owned(), json!("APPROVED"));
        let updated = repository.partial_update(&stored.id, fields).await.unwrap();

        assert_eq!(updated.outcome.as_deref(), Some("APPROVED"));
        assert_eq!(updated.admin.as_deref(), Some("admin one"));
        assert_eq!(updated.tcs_person_id, Some(42));
    }

    #[tokio::test]
    async fn partial_update_of_missing_document_fails() {
        let (_, repository) = repository().await;
        let err = repository
            .partial_update("missing", Map::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PartialUpdateFailed);
    }

    /// Delegates to [`MemoryBackend`] but sneaks in a concurrent write between a
    /// read and the following conditional write, once.
    #[derive(Clone)]
    struct RacingBackend {
        inner: MemoryBackend,
        raced: std::sync::Arc<std::sync::atomic::AtomicBool>,
    }

    impl SearchBackend for RacingBackend {
        fn alias_exists(&self, alias: &str) -> impl std::future::Future<Output = RevalResult<bool>> + Send {
            self.inner.alias_exists(alias)
        }
        fn get_indices(&self, name_or_alias: &str) -> impl std::future::Future<Output = RevalResult<Vec<crate::index::IndexInfo>>> + Send {
            self.inner.get_indices(name_or_alias)
        }
        fn get_mapping(&self, index: &str) -> impl std::future::Future<Output = RevalResult<Option<Value>>> + Send {
            self.inner.get_mapping(index)
        }
        fn create_index(&self, index: &str, mapping: &Value) -> impl std::future::Future<Output = RevalResult<()>> + Send {
            self.inner.create_index(index, mapping)
        }
        fn delete_index(&self, index: &str) -> impl std::future::Future<Output = RevalResult<()>> + Send {
            self.inner.delete_index(index)
        }
        fn reindex(&self, source_index: &str, target_index: &str) -> impl std::future::Future<Output = RevalResult<()>> + Send {
            self.inner.reindex(source_index, target_index)
        }
        fn add_alias(&self, index: &str, alias: &str) -> impl std::future::Future<Output = RevalResult<()>> + Send {
            self.inner.add_alias(index, alias)
        }
        fn delete_alias(&self, index: &str, alias: &str) -> impl std::future::Future<Output = RevalResult<()>> + Send {
            self.inner.delete_alias(index, alias)
        }
        fn get_document(&self, index: &str, id: &str) -> impl std::future::Future<Output = RevalResult<Option<DocumentHit>>> + Send {
            self.inner.get_document(index, id)
        }
        fn index_document(
            &self,
            index: &str,
            id: &str,
            source: &Value,
            token: Option<crate::index::WriteToken>,
        ) -> impl std::future::Future<Output = RevalResult<()>> + Send {
            async move {
                if token.is_some() && !self.raced.swap(true, std::sync::atomic::Ordering::SeqCst) {
                    let current = self.inner.get_document(index, id).await?;
                    if let Some(current) = current {
                        self.inner
                            .index_document(index, id, &current.source, None)
                            .await?;
                    }
                }
                self.inner.index_document(index, id, source, token).await
            }
        }
        fn search(&self, index: &str, query: &Value) -> impl std::future::Future<Output = RevalResult<Vec<DocumentHit>>> + Send {
            self.inner.search(index, query)
        }
        fn partial_update(
            &self,
            index: &str,
            id: &str,
            fields: &Map<String, Value>,
            retry_on_conflict: u32,
        ) -> impl std::future::Future<Output = RevalResult<Option<Value>>> + Send {
            self.inner.partial_update(index, id, fields, retry_on_conflict)
        }
        fn delete_document(&self, index: &str, id: &str) -> impl std::future::Future<Output = RevalResult<()>> + Send {
            self.inner.delete_document(index, id)
        }
    }

    #[tokio::test]
    async fn update_with_recovers_from_a_version_conflict() {
        let inner = MemoryBackend::new();
        inner.create_index(INDEX, &json!({})).await.unwrap();
        let backend = RacingBackend {
            inner,
            raced: std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false)),
        };
        let repository = ViewRepository::new(backend, INDEX);

        let stored = view("7000001", Some(42));
        repository.save(&stored).await.unwrap();

        let updated = repository
            .update_with(&stored.id, |view| {
                view.admin = Some("admin two".to_owned());
            })
            .await
            .unwrap();
        assert_eq!(updated.admin.as_deref(), Some("admin two"));
    }

    #[tokio::test]
    async fn configured_retry_budget_bounds_conflict_retries() {
        let inner = MemoryBackend::new();
        inner.create_index(INDEX, &json!({})).await.unwrap();
        let backend = RacingBackend {
            inner,
            raced: std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false)),
        };
        let config = SearchConfig {
            url: "http://localhost:9200".to_owned(),
            username: None,
            password: None,
            request_timeout_secs: 30,
            reindex_timeout_secs: 600,
            retry_on_conflict: 1,
        };
        let repository = ViewRepository::from_config(backend, INDEX, &config);

        let stored = view("7000001", Some(42));
        repository.save(&stored).await.unwrap();

        let err = repository
            .update_with(&stored.id, |view| {
                view.admin = Some("admin two".to_owned());
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::VersionConflict);
    }

    #[tokio::test]
    async fn full_document_rewrite_preserves_gmc_status() {
        let (backend, repository) = repository().await;
        backend
            .seed_document(
                INDEX,
                "doc-1",
                json!({
                    "id": "doc-1",
                    "gmcReferenceNumber": "7000001",
                    "gmcStatus": "Revalidate"
                }),
            )
            .await;

        let updated = repository
            .update_with("doc-1", |view| {
                view.admin = Some("admin one".to_owned());
            })
            .await
            .unwrap();
        assert_eq!(updated.gmc_status.as_deref(), Some("Revalidate"));

        let documents = backend.documents(INDEX).await;
        assert_eq!(documents[0].1["gmcStatus"], "Revalidate");
        assert_eq!(documents[0].1["admin"], "admin one");
    }
}
