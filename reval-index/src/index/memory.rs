//! In-memory [`SearchBackend`] used by the test suites.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::bail;
use crate::error::{ErrorKind, RevalResult};
use crate::index::backend::{DocumentHit, IndexInfo, SearchBackend, WriteToken};
use crate::reval_error;

#[derive(Debug, Clone)]
struct StoredDocument {
    source: Value,
    seq_no: i64,
    primary_term: i64,
}

#[derive(Debug)]
struct MemoryIndex {
    mapping: Value,
    creation_date_millis: i64,
    documents: BTreeMap<String, StoredDocument>,
}

#[derive(Debug, Default)]
struct Inner {
    indices: HashMap<String, MemoryIndex>,
    /// Alias name to the set of physical indices it points at.
    aliases: HashMap<String, BTreeSet<String>>,
    next_seq_no: i64,
    next_creation_stamp: i64,
}

impl Inner {
    /// Resolves a name to physical index names, alias first, exact name second.
    fn resolve(&self, name_or_alias: &str) -> Vec<String> {
        if let Some(targets) = self.aliases.get(name_or_alias) {
            if !targets.is_empty() {
                return targets.iter().cloned().collect();
            }
        }

        if self.indices.contains_key(name_or_alias) {
            return vec![name_or_alias.to_owned()];
        }

        Vec::new()
    }

    fn aliases_of(&self, index: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .aliases
            .iter()
            .filter(|(_, targets)| targets.contains(index))
            .map(|(alias, _)| alias.clone())
            .collect();
        names.sort();
        names
    }

    fn take_seq_no(&mut self) -> i64 {
        self.next_seq_no += 1;
        self.next_seq_no
    }
}

/// An in-process search backend with the same observable behavior as the HTTP one.
///
/// Documents are kept ordered by id, so searches and multi-match resolution are
/// deterministic. Creation stamps are a monotonic counter, which preserves the
/// "most recently created index" ordering the backup retention relies on.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes a document directly, bypassing the trait. Test seeding only.
    pub async fn seed_document(&self, index: &str, id: &str, source: Value) {
        let mut inner = self.inner.lock().await;
        let seq_no = inner.take_seq_no();
        if let Some(entry) = inner.indices.get_mut(index) {
            entry.documents.insert(
                id.to_owned(),
                StoredDocument { source, seq_no, primary_term: 1 },
            );
        }
    }

    /// Returns every document of an index in id order. Test inspection only.
    pub async fn documents(&self, index: &str) -> Vec<(String, Value)> {
        let inner = self.inner.lock().await;
        inner
            .indices
            .get(index)
            .map(|entry| {
                entry
                    .documents
                    .iter()
                    .map(|(id, doc)| (id.clone(), doc.source.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns the physical index names, sorted. Test inspection only.
    pub async fn index_names(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        let mut names: Vec<String> = inner.indices.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Evaluates the query subset the merge engine emits: `term`, `bool` with
/// `must`/`must_not`, and `match_all`.
fn matches_query(source: &Value, query: &Value) -> bool {
    if query.get("match_all").is_some() {
        return true;
    }

    if let Some(term) = query.get("term").and_then(Value::as_object) {
        return term
            .iter()
            .all(|(field, expected)| source.get(field) == Some(expected));
    }

    if let Some(bool_query) = query.get("bool").and_then(Value::as_object) {
        let must_holds = bool_query
            .get("must")
            .and_then(Value::as_array)
            .map(|clauses| clauses.iter().all(|clause| matches_query(source, clause)))
            .unwrap_or(true);
        let must_not_holds = bool_query
            .get("must_not")
            .and_then(Value::as_array)
            .map(|clauses| !clauses.iter().any(|clause| matches_query(source, clause)))
            .unwrap_or(true);
        return must_holds && must_not_holds;
    }

    false
}

impl SearchBackend for MemoryBackend {
    fn alias_exists(&self, alias: &str) -> impl Future<Output = RevalResult<bool>> + Send {
        async move {
            let inner = self.inner.lock().await;
            Ok(inner
                .aliases
                .get(alias)
                .is_some_and(|targets| !targets.is_empty()))
        }
    }

    fn get_indices(
        &self,
        name_or_alias: &str,
    ) -> impl Future<Output = RevalResult<Vec<IndexInfo>>> + Send {
        async move {
            let inner = self.inner.lock().await;
            let names = inner.resolve(name_or_alias);
            if names.is_empty() {
                bail!(
                    ErrorKind::IndexNotFound,
                    "Index not found",
                    format!("no index or alias named '{name_or_alias}'")
                );
            }

            Ok(names
                .into_iter()
                .filter_map(|name| {
                    inner.indices.get(&name).map(|entry| IndexInfo {
                        creation_date_millis: Some(entry.creation_date_millis),
                        mapping: Some(entry.mapping.clone()),
                        aliases: inner.aliases_of(&name),
                        name,
                    })
                })
                .collect())
        }
    }

    fn get_mapping(&self, index: &str) -> impl Future<Output = RevalResult<Option<Value>>> + Send {
        async move {
            let inner = self.inner.lock().await;
            let names = inner.resolve(index);
            Ok(names
                .first()
                .and_then(|name| inner.indices.get(name))
                .map(|entry| entry.mapping.clone()))
        }
    }

    fn create_index(
        &self,
        index: &str,
        mapping: &Value,
    ) -> impl Future<Output = RevalResult<()>> + Send {
        async move {
            let mut inner = self.inner.lock().await;
            if inner.indices.contains_key(index) {
                bail!(
                    ErrorKind::IndexAlreadyExists,
                    "Index already exists",
                    format!("index '{index}' already exists")
                );
            }

            inner.next_creation_stamp += 1;
            let creation_date_millis = inner.next_creation_stamp;
            inner.indices.insert(
                index.to_owned(),
                MemoryIndex {
                    mapping: mapping.clone(),
                    creation_date_millis,
                    documents: BTreeMap::new(),
                },
            );

            Ok(())
        }
    }

    fn delete_index(&self, index: &str) -> impl Future<Output = RevalResult<()>> + Send {
        async move {
            let mut inner = self.inner.lock().await;
            if inner.indices.remove(index).is_none() {
                bail!(
                    ErrorKind::IndexNotFound,
                    "Index not found",
                    format!("cannot delete unknown index '{index}'")
                );
            }

            for targets in inner.aliases.values_mut() {
                targets.remove(index);
            }
            inner.aliases.retain(|_, targets| !targets.is_empty());

            Ok(())
        }
    }

    fn reindex(
        &self,
        source_index: &str,
        target_index: &str,
    ) -> impl Future<Output = RevalResult<()>> + Send {
        async move {
            let mut inner = self.inner.lock().await;
            let source_names = inner.resolve(source_index);
            if source_names.is_empty() {
                bail!(
                    ErrorKind::IndexNotFound,
                    "Index not found",
                    format!("reindex source '{source_index}' does not exist")
                );
            }

            let mut copied: Vec<(String, Value)> = Vec::new();
            for name in &source_names {
                if let Some(entry) = inner.indices.get(name) {
                    copied.extend(
                        entry
                            .documents
                            .iter()
                            .map(|(id, doc)| (id.clone(), doc.source.clone())),
                    );
                }
            }

            if !inner.indices.contains_key(target_index) {
                inner.next_creation_stamp += 1;
                let creation_date_millis = inner.next_creation_stamp;
                inner.indices.insert(
                    target_index.to_owned(),
                    MemoryIndex {
                        mapping: Value::Object(Map::new()),
                        creation_date_millis,
                        documents: BTreeMap::new(),
                    },
                );
            }

            for (id, source) in copied {
                let seq_no = inner.take_seq_no();
                if let Some(entry) = inner.indices.get_mut(target_index) {
                    entry
                        .documents
                        .insert(id, StoredDocument { source, seq_no, primary_term: 1 });
                }
            }

            Ok(())
        }
    }

    fn add_alias(&self, index: &str, alias: &str) -> impl Future<Output = RevalResult<()>> + Send {
        async move {
            let mut inner = self.inner.lock().await;
            if !inner.indices.contains_key(index) {
                bail!(
                    ErrorKind::IndexNotFound,
                    "Index not found",
                    format!("cannot alias unknown index '{index}'")
                );
            }

            inner
                .aliases
                .entry(alias.to_owned())
                .or_default()
                .insert(index.to_owned());

            Ok(())
        }
    }

    fn delete_alias(
        &self,
        index: &str,
        alias: &str,
    ) -> impl Future<Output = RevalResult<()>> + Send {
        async move {
            let mut inner = self.inner.lock().await;
            if let Some(targets) = inner.aliases.get_mut(alias) {
                targets.remove(index);
                if targets.is_empty() {
                    inner.aliases.remove(alias);
                }
            }

            Ok(())
        }
    }

    fn get_document(
        &self,
        index: &str,
        id: &str,
    ) -> impl Future<Output = RevalResult<Option<DocumentHit>>> + Send {
        async move {
            let inner = self.inner.lock().await;
            let names = inner.resolve(index);

            Ok(names
                .iter()
                .filter_map(|name| inner.indices.get(name))
                .find_map(|entry| entry.documents.get(id))
                .map(|doc| DocumentHit {
                    id: id.to_owned(),
                    source: doc.source.clone(),
                    token: Some(WriteToken {
                        seq_no: doc.seq_no,
                        primary_term: doc.primary_term,
                    }),
                }))
        }
    }

    fn index_document(
        &self,
        index: &str,
        id: &str,
        source: &Value,
        token: Option<WriteToken>,
    ) -> impl Future<Output = RevalResult<()>> + Send {
        async move {
            let mut inner = self.inner.lock().await;
            let names = inner.resolve(index);
            let Some(name) = names.first().cloned() else {
                bail!(
                    ErrorKind::IndexNotFound,
                    "Index not found",
                    format!("cannot write to unknown index '{index}'")
                );
            };

            if let Some(expected) = token {
                let current = inner
                    .indices
                    .get(&name)
                    .and_then(|entry| entry.documents.get(id))
                    .map(|doc| WriteToken {
                        seq_no: doc.seq_no,
                        primary_term: doc.primary_term,
                    });
                if current != Some(expected) {
                    bail!(
                        ErrorKind::VersionConflict,
                        "Version conflict",
                        format!("document '{id}' was modified concurrently")
                    );
                }
            }

            let seq_no = inner.take_seq_no();
            if let Some(entry) = inner.indices.get_mut(&name) {
                entry.documents.insert(
                    id.to_owned(),
                    StoredDocument {
                        source: source.clone(),
                        seq_no,
                        primary_term: 1,
                    },
                );
            }

            Ok(())
        }
    }

    fn search(
        &self,
        index: &str,
        query: &Value,
    ) -> impl Future<Output = RevalResult<Vec<DocumentHit>>> + Send {
        async move {
            let inner = self.inner.lock().await;
            let mut names = inner.resolve(index);
            names.sort();

            let mut hits = Vec::new();
            for name in names {
                if let Some(entry) = inner.indices.get(&name) {
                    for (id, doc) in &entry.documents {
                        if matches_query(&doc.source, query) {
                            hits.push(DocumentHit {
                                id: id.clone(),
                                source: doc.source.clone(),
                                token: Some(WriteToken {
                                    seq_no: doc.seq_no,
                                    primary_term: doc.primary_term,
                                }),
                            });
                        }
                    }
                }
            }

            Ok(hits)
        }
    }

    fn partial_update(
        &self,
        index: &str,
        id: &str,
        fields: &Map<String, Value>,
        _retry_on_conflict: u32,
    ) -> impl Future<Output = RevalResult<Option<Value>>> + Send {
        async move {
            let mut inner = self.inner.lock().await;
            let names = inner.resolve(index);
            let Some(name) = names.first().cloned() else {
                bail!(
                    ErrorKind::IndexNotFound,
                    "Index not found",
                    format!("cannot update document in unknown index '{index}'")
                );
            };

            let seq_no = inner.take_seq_no();
            let Some(doc) = inner
                .indices
                .get_mut(&name)
                .and_then(|entry| entry.documents.get_mut(id))
            else {
                return Err(reval_error!(
                    ErrorKind::PartialUpdateFailed,
                    "Document not found",
                    format!("no document '{id}' in index '{index}'")
                ));
            };

            if let Value::Object(source) = &mut doc.source {
                for (field, value) in fields {
                    source.insert(field.clone(), value.clone());
                }
            }
            doc.seq_no = seq_no;

            Ok(Some(doc.source.clone()))
        }
    }

    fn delete_document(
        &self,
        index: &str,
        id: &str,
    ) -> impl Future<Output = RevalResult<()>> + Send {
        async move {
            let mut inner = self.inner.lock().await;
            let names = inner.resolve(index);
            for name in names {
                if let Some(entry) = inner.indices.get_mut(&name) {
                    entry.documents.remove(id);
                }
            }

            Ok(())
        }
    }
}
