//! The search-engine boundary trait.

use std::future::Future;

use serde_json::{Map, Value};

use crate::error::RevalResult;

/// Metadata of one physical index, as needed by the lifecycle manager.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexInfo {
    /// Physical index name.
    pub name: String,
    /// Engine-side creation timestamp in epoch milliseconds, used to pick the most
    /// recent backup during retention.
    pub creation_date_millis: Option<i64>,
    /// The index field mapping, verbatim as the engine reports it.
    pub mapping: Option<Value>,
    /// Aliases currently attached to the index.
    pub aliases: Vec<String>,
}

/// Optimistic-concurrency token of a stored document.
///
/// Mirrors the engine's sequence-number/primary-term pair: a conditional write carrying
/// a stale token fails with a version conflict instead of silently losing an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteToken {
    pub seq_no: i64,
    pub primary_term: i64,
}

/// One document returned by a lookup or search.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentHit {
    pub id: String,
    pub source: Value,
    pub token: Option<WriteToken>,
}

/// Trait for search engines that can hold the master view index.
///
/// [`SearchBackend`] is the single seam between the merge engine / lifecycle manager
/// and the actual search engine. The production implementation talks to Elasticsearch
/// over REST ([`crate::index::http::HttpSearchBackend`]); tests run against the
/// in-process [`crate::index::memory::MemoryBackend`].
///
/// Index-name arguments accept either a physical index name or an alias; the backend
/// resolves aliases the way the engine does. No operation retries internally; the
/// callers own the abort/continue decisions.
pub trait SearchBackend: Send + Sync {
    /// Returns whether an alias with the given name exists.
    fn alias_exists(&self, alias: &str) -> impl Future<Output = RevalResult<bool>> + Send;

    /// Returns metadata for every index matched by the given name or alias.
    ///
    /// Fails with [`crate::error::ErrorKind::IndexNotFound`] when nothing matches.
    fn get_indices(
        &self,
        name_or_alias: &str,
    ) -> impl Future<Output = RevalResult<Vec<IndexInfo>>> + Send;

    /// Returns the field mapping of an index, or [`None`] when the index is unknown.
    fn get_mapping(&self, index: &str) -> impl Future<Output = RevalResult<Option<Value>>> + Send;

    /// Creates an index with the given mapping.
    ///
    /// Fails with [`crate::error::ErrorKind::IndexAlreadyExists`] when the name is
    /// taken.
    fn create_index(
        &self,
        index: &str,
        mapping: &Value,
    ) -> impl Future<Output = RevalResult<()>> + Send;

    /// Deletes a physical index.
    fn delete_index(&self, index: &str) -> impl Future<Output = RevalResult<()>> + Send;

    /// Copies every document from `source_index` into `target_index` engine-side.
    ///
    /// Long-running; a transport timeout propagates to the caller as a fatal error.
    fn reindex(
        &self,
        source_index: &str,
        target_index: &str,
    ) -> impl Future<Output = RevalResult<()>> + Send;

    /// Attaches an alias to an index.
    fn add_alias(&self, index: &str, alias: &str) -> impl Future<Output = RevalResult<()>> + Send;

    /// Detaches an alias from an index.
    fn delete_alias(
        &self,
        index: &str,
        alias: &str,
    ) -> impl Future<Output = RevalResult<()>> + Send;

    /// Fetches a single document by id, with its concurrency token.
    fn get_document(
        &self,
        index: &str,
        id: &str,
    ) -> impl Future<Output = RevalResult<Option<DocumentHit>>> + Send;

    /// Writes a full document.
    ///
    /// When `token` is given the write is conditional: a stale token fails with
    /// [`crate::error::ErrorKind::VersionConflict`].
    fn index_document(
        &self,
        index: &str,
        id: &str,
        source: &Value,
        token: Option<WriteToken>,
    ) -> impl Future<Output = RevalResult<()>> + Send;

    /// Runs a query and returns the matching documents.
    fn search(
        &self,
        index: &str,
        query: &Value,
    ) -> impl Future<Output = RevalResult<Vec<DocumentHit>>> + Send;

    /// Merges `fields` into an existing document and returns the updated source.
    ///
    /// Fields not present in the map are untouched; `retry_on_conflict` is the
    /// engine-side retry budget for concurrent writers. Returns `Ok(None)` when the
    /// engine acknowledged the update but returned no document body.
    fn partial_update(
        &self,
        index: &str,
        id: &str,
        fields: &Map<String, Value>,
        retry_on_conflict: u32,
    ) -> impl Future<Output = RevalResult<Option<Value>>> + Send;

    /// Deletes a document by id; deleting a missing document is a no-op.
    fn delete_document(
        &self,
        index: &str,
        id: &str,
    ) -> impl Future<Output = RevalResult<()>> + Send;
}
