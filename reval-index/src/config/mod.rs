//! Configuration objects for the index maintenance services.
//!
//! These structs are deserialized from whatever configuration source the host process
//! uses; every tunable has a default so a minimal configuration only needs the search
//! engine url and the routing keys.

use secrecy::SecretString;
use serde::Deserialize;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_REINDEX_TIMEOUT_SECS: u64 = 600;
const DEFAULT_RETRY_ON_CONFLICT: u32 = 5;

/// Connection settings for the search engine backing the master view index.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    /// Base url of the search engine REST endpoint.
    pub url: String,
    /// Optional basic-auth username.
    #[serde(default)]
    pub username: Option<String>,
    /// Optional basic-auth password.
    #[serde(default)]
    pub password: Option<SecretString>,
    /// Timeout for ordinary document and alias operations.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Timeout for engine-side bulk reindex calls, which can run for minutes.
    #[serde(default = "default_reindex_timeout_secs")]
    pub reindex_timeout_secs: u64,
    /// Engine-side retry budget for partial updates hitting version conflicts.
    #[serde(default = "default_retry_on_conflict")]
    pub retry_on_conflict: u32,
}

/// Routing keys for the two downstream consumers of master view updates.
#[derive(Debug, Clone, Deserialize)]
pub struct PublishConfig {
    /// Routing key consumed by the connections system.
    pub connection_update_routing_key: String,
    /// Routing key consumed by the recommendations system.
    pub recommendation_update_routing_key: String,
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_reindex_timeout_secs() -> u64 {
    DEFAULT_REINDEX_TIMEOUT_SECS
}

fn default_retry_on_conflict() -> u32 {
    DEFAULT_RETRY_ON_CONFLICT
}
