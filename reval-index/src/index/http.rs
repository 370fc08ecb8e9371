//! Elasticsearch REST implementation of [`SearchBackend`].

use std::future::Future;
use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::config::SearchConfig;
use crate::{bail, reval_error};
use crate::error::{ErrorKind, RevalError, RevalResult};
use crate::index::backend::{DocumentHit, IndexInfo, SearchBackend, WriteToken};

/// Talks to an Elasticsearch cluster over its REST API.
///
/// Writes are issued with `refresh=true` so that a subsequent lookup sees them, which
/// matches how the merge services chain a save with a publish of the fresh document.
#[derive(Debug, Clone)]
pub struct HttpSearchBackend {
    client: Client,
    base_url: String,
    username: Option<String>,
    password: Option<SecretString>,
    reindex_timeout: Duration,
}

impl HttpSearchBackend {
    pub fn new(config: &SearchConfig) -> RevalResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_owned(),
            username: config.username.clone(),
            password: config.password.clone(),
            reindex_timeout: Duration::from_secs(config.reindex_timeout_secs),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut builder = self
            .client
            .request(method, format!("{}/{}", self.base_url, path));
        if let Some(username) = &self.username {
            builder = builder.basic_auth(
                username,
                self.password.as_ref().map(|password| password.expose_secret()),
            );
        }
        builder
    }

    async fn read_body(response: Response) -> RevalResult<Value> {
        Ok(response.json().await?)
    }
}

/// Converts an Elasticsearch error response into a [`RevalError`], mapping the
/// engine's exception types onto our error kinds.
async fn fail_from_response(operation: &str, response: Response) -> RevalError {
    let status = response.status();
    let body: Value = response.json().await.unwrap_or(Value::Null);
    let error_type = body
        .pointer("/error/type")
        .and_then(Value::as_str)
        .unwrap_or("");
    let reason = body
        .pointer("/error/reason")
        .and_then(Value::as_str)
        .unwrap_or("no reason given");

    let kind = match error_type {
        "index_not_found_exception" => ErrorKind::IndexNotFound,
        "resource_already_exists_exception" => ErrorKind::IndexAlreadyExists,
        "version_conflict_engine_exception" => ErrorKind::VersionConflict,
        "document_missing_exception" => ErrorKind::PartialUpdateFailed,
        _ => match status {
            StatusCode::NOT_FOUND => ErrorKind::IndexNotFound,
            StatusCode::CONFLICT => ErrorKind::VersionConflict,
            _ => ErrorKind::TransportFailed,
        },
    };

    reval_error!(
        kind,
        "Search engine request failed",
        format!("{operation} returned {status}: {reason}")
    )
}

fn hit_from_value(hit: &Value) -> Option<DocumentHit> {
    let id = hit.get("_id").and_then(Value::as_str)?.to_owned();
    let source = hit.get("_source").cloned().unwrap_or(Value::Null);
    let token = match (
        hit.get("_seq_no").and_then(Value::as_i64),
        hit.get("_primary_term").and_then(Value::as_i64),
    ) {
        (Some(seq_no), Some(primary_term)) => Some(WriteToken { seq_no, primary_term }),
        _ => None,
    };

    Some(DocumentHit { id, source, token })
}

impl SearchBackend for HttpSearchBackend {
    fn alias_exists(&self, alias: &str) -> impl Future<Output = RevalResult<bool>> + Send {
        async move {
            let response = self
                .request(Method::HEAD, &format!("_alias/{alias}"))
                .send()
                .await?;
            Ok(response.status().is_success())
        }
    }

    fn get_indices(
        &self,
        name_or_alias: &str,
    ) -> impl Future<Output = RevalResult<Vec<IndexInfo>>> + Send {
        async move {
            let response = self.request(Method::GET, name_or_alias).send().await?;
            if !response.status().is_success() {
                return Err(fail_from_response("get indices", response).await);
            }

            let body = Self::read_body(response).await?;
            let Value::Object(entries) = body else {
                bail!(
                    ErrorKind::DeserializationError,
                    "Unexpected index metadata shape",
                    format!("expected an object keyed by index name for '{name_or_alias}'")
                );
            };

            let mut indices: Vec<IndexInfo> = entries
                .into_iter()
                .map(|(name, entry)| IndexInfo {
                    creation_date_millis: entry
                        .pointer("/settings/index/creation_date")
                        .and_then(Value::as_str)
                        .and_then(|millis| millis.parse().ok()),
                    mapping: entry.get("mappings").cloned(),
                    aliases: entry
                        .get("aliases")
                        .and_then(Value::as_object)
                        .map(|aliases| aliases.keys().cloned().collect())
                        .unwrap_or_default(),
                    name,
                })
                .collect();
            indices.sort_by(|left, right| left.name.cmp(&right.name));

            Ok(indices)
        }
    }

    fn get_mapping(&self, index: &str) -> impl Future<Output = RevalResult<Option<Value>>> + Send {
        async move {
            let response = self
                .request(Method::GET, &format!("{index}/_mapping"))
                .send()
                .await?;
            if response.status() == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if !response.status().is_success() {
                return Err(fail_from_response("get mapping", response).await);
            }

            let body = Self::read_body(response).await?;
            Ok(body
                .as_object()
                .and_then(|entries| entries.values().next())
                .and_then(|entry| entry.get("mappings"))
                .cloned())
        }
    }

    fn create_index(
        &self,
        index: &str,
        mapping: &Value,
    ) -> impl Future<Output = RevalResult<()>> + Send {
        async move {
            let response = self
                .request(Method::PUT, index)
                .json(&json!({ "mappings": mapping }))
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(fail_from_response("create index", response).await);
            }

            Ok(())
        }
    }

    fn delete_index(&self, index: &str) -> impl Future<Output = RevalResult<()>> + Send {
        async move {
            let response = self.request(Method::DELETE, index).send().await?;
            if !response.status().is_success() {
                return Err(fail_from_response("delete index", response).await);
            }

            Ok(())
        }
    }

    fn reindex(
        &self,
        source_index: &str,
        target_index: &str,
    ) -> impl Future<Output = RevalResult<()>> + Send {
        async move {
            // Copying a full index takes far longer than a document write, so this
            // request carries its own timeout.
            let response = self
                .request(Method::POST, "_reindex?refresh=true")
                .timeout(self.reindex_timeout)
                .json(&json!({
                    "source": { "index": source_index },
                    "dest": { "index": target_index }
                }))
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(fail_from_response("reindex", response).await);
            }

            let body = Self::read_body(response).await?;
            debug!(
                source = source_index,
                target = target_index,
                copied = body.get("total").and_then(|total| total.as_i64()),
                "reindex completed"
            );

            Ok(())
        }
    }

    fn add_alias(&self, index: &str, alias: &str) -> impl Future<Output = RevalResult<()>> + Send {
        async move {
            let response = self
                .request(Method::POST, "_aliases")
                .json(&json!({
                    "actions": [{ "add": { "index": index, "alias": alias } }]
                }))
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(fail_from_response("add alias", response).await);
            }

            Ok(())
        }
    }

    fn delete_alias(
        &self,
        index: &str,
        alias: &str,
    ) -> impl Future<Output = RevalResult<()>> + Send {
        async move {
            let response = self
                .request(Method::POST, "_aliases")
                .json(&json!({
                    "actions": [{ "remove": { "index": index, "alias": alias } }]
                }))
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(fail_from_response("delete alias", response).await);
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
            let response = self
                .request(Method::GET, &format!("{index}/_doc/{id}"))
                .send()
                .await?;
            if response.status() == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if !response.status().is_success() {
                return Err(fail_from_response("get document", response).await);
            }

            let body = Self::read_body(response).await?;
            Ok(hit_from_value(&body))
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
            let path = match token {
                Some(token) => format!(
                    "{index}/_doc/{id}?refresh=true&if_seq_no={}&if_primary_term={}",
                    token.seq_no, token.primary_term
                ),
                None => format!("{index}/_doc/{id}?refresh=true"),
            };
            let response = self.request(Method::PUT, &path).json(source).send().await?;
            if !response.status().is_success() {
                return Err(fail_from_response("index document", response).await);
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
            let response = self
                .request(Method::POST, &format!("{index}/_search"))
                .json(&json!({ "query": query, "seq_no_primary_term": true }))
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(fail_from_response("search", response).await);
            }

            let body = Self::read_body(response).await?;
            Ok(body
                .pointer("/hits/hits")
                .and_then(Value::as_array)
                .map(|hits| hits.iter().filter_map(hit_from_value).collect())
                .unwrap_or_default())
        }
    }

    fn partial_update(
        &self,
        index: &str,
        id: &str,
        fields: &Map<String, Value>,
        retry_on_conflict: u32,
    ) -> impl Future<Output = RevalResult<Option<Value>>> + Send {
        async move {
            let path = format!(
                "{index}/_update/{id}?refresh=true&retry_on_conflict={retry_on_conflict}"
            );
            let response = self
                .request(Method::POST, &path)
                .json(&json!({ "doc": fields, "_source": true }))
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(fail_from_response("partial update", response).await);
            }

            let body = Self::read_body(response).await?;
            Ok(body.pointer("/get/_source").filter(|source| !source.is_null()).cloned())
        }
    }

    fn delete_document(
        &self,
        index: &str,
        id: &str,
    ) -> impl Future<Output = RevalResult<()>> + Send {
        async move {
            let response = self
                .request(Method::DELETE, &format!("{index}/_doc/{id}?refresh=true"))
                .send()
                .await?;
            if response.status() == StatusCode::NOT_FOUND {
                debug!(index, id, "delete of a missing document ignored");
                return Ok(());
            }
            if !response.status().is_success() {
                return Err(fail_from_response("delete document", response).await);
            }

            Ok(())
        }
    }
}
