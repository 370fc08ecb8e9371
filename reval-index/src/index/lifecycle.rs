//! Zero-downtime index rebuilds behind an alias.

use chrono::Local;
use tracing::{info, warn};

use crate::error::{ErrorKind, RevalResult};
use crate::index::backend::SearchBackend;
use crate::{bail, reval_error};

const BACKUP_ALIAS_SUFFIX: &str = "_backup";
const INDEX_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Rebuilds the master view index behind an alias without a read outage.
///
/// Readers always go through the alias. A resync snapshots the current index under a
/// backup alias, builds a fresh timestamped index from a source index, swings the
/// alias over, and prunes all but the latest backup.
#[derive(Debug)]
pub struct IndexLifecycleManager<B> {
    backend: B,
}

impl<B: SearchBackend> IndexLifecycleManager<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    fn backup_alias(alias: &str) -> String {
        format!("{alias}{BACKUP_ALIAS_SUFFIX}")
    }

    fn timestamped_name(alias: &str) -> String {
        format!("{alias}_{}", Local::now().format(INDEX_TIMESTAMP_FORMAT))
    }

    /// Rebuilds the index behind `target_alias` from the documents of
    /// `source_index`.
    ///
    /// Handles both the bootstrap layout, where a physical index still carries the
    /// alias name, and the steady state, where the alias points at a timestamped
    /// index. Backup pruning is best effort; every other step aborts the resync on
    /// failure.
    pub async fn resync(&self, source_index: &str, target_alias: &str) -> RevalResult<()> {
        info!(source = source_index, alias = target_alias, "starting index resync");

        let old_index_name = if self.backend.alias_exists(target_alias).await? {
            self.mark_current_index_as_backup(target_alias).await?
        } else {
            self.transfer_old_index_name_to_alias(target_alias).await?
        };

        let Some(mapping) = self.backend.get_mapping(&old_index_name).await? else {
            bail!(
                ErrorKind::MappingNotFound,
                "Mapping not found",
                format!("no mapping for old index '{old_index_name}'")
            );
        };

        // The bootstrap path may have created the backup within the same second,
        // which would make the timestamped names collide.
        let mut new_index_name = Self::timestamped_name(target_alias);
        if new_index_name == old_index_name {
            new_index_name.push_str("_1");
        }
        match self.backend.create_index(&new_index_name, &mapping).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::IndexAlreadyExists => {
                warn!(index = new_index_name, "target index already exists, reusing it");
            }
            Err(err) => return Err(err),
        }

        self.backend.reindex(source_index, &new_index_name).await?;
        self.backend.add_alias(&new_index_name, target_alias).await?;

        let backup_alias = Self::backup_alias(target_alias);
        if let Err(err) = self.delete_backup_indices_except_latest(&backup_alias).await {
            warn!(
                alias = backup_alias,
                error = %err,
                "backup pruning failed, stale backups must be removed manually"
            );
        }

        self.backend.delete_alias(&old_index_name, target_alias).await?;
        info!(
            old = old_index_name,
            new = new_index_name,
            alias = target_alias,
            "index resync completed"
        );

        Ok(())
    }

    /// Bootstrap path: a physical index still owns the alias name.
    ///
    /// An index and an alias cannot share a name, so the index is copied to a
    /// timestamped name, marked as a backup, deleted, and the freed name becomes the
    /// alias of the copy. Returns the copy's name.
    pub async fn transfer_old_index_name_to_alias(&self, alias: &str) -> RevalResult<String> {
        let indices = self.backend.get_indices(alias).await?;
        let mapping = indices
            .iter()
            .find(|info| info.name == alias)
            .and_then(|info| info.mapping.clone())
            .ok_or_else(|| {
                reval_error!(
                    ErrorKind::MappingNotFound,
                    "Mapping not found",
                    format!("no mapping for old index '{alias}'")
                )
            })?;

        let backup_name = Self::timestamped_name(alias);
        self.backend.create_index(&backup_name, &mapping).await?;
        self.backend.reindex(alias, &backup_name).await?;
        self.backend
            .add_alias(&backup_name, &Self::backup_alias(alias))
            .await?;
        self.backend.delete_index(alias).await?;
        self.backend.add_alias(&backup_name, alias).await?;

        Ok(backup_name)
    }

    /// Steady-state path: tags the single index behind `alias` with the backup
    /// alias and returns its name.
    ///
    /// Fails when no index carries the alias, or when more than one does, since the
    /// alias must stay unambiguous for readers.
    pub async fn mark_current_index_as_backup(&self, alias: &str) -> RevalResult<String> {
        let indices = self.backend.get_indices(alias).await?;
        let mut aliased: Vec<_> = indices
            .into_iter()
            .filter(|info| info.aliases.iter().any(|name| name == alias))
            .collect();

        let current = match aliased.len() {
            0 => bail!(
                ErrorKind::IndexNotFound,
                "Aliased index not found",
                format!("no index carries alias '{alias}'")
            ),
            1 => aliased.remove(0),
            count => bail!(
                ErrorKind::InvalidAliasState,
                "Ambiguous alias",
                format!("{count} indices carry alias '{alias}'")
            ),
        };

        self.backend
            .add_alias(&current.name, &Self::backup_alias(alias))
            .await?;

        Ok(current.name)
    }

    /// Deletes every index behind `backup_alias` except the most recently created
    /// one.
    pub async fn delete_backup_indices_except_latest(
        &self,
        backup_alias: &str,
    ) -> RevalResult<()> {
        info!(alias = backup_alias, "pruning old backup indices");
        let indices = self.backend.get_indices(backup_alias).await?;
        if indices.len() <= 1 {
            return Ok(());
        }

        let latest = indices
            .iter()
            .filter(|info| info.creation_date_millis.is_some())
            .max_by_key(|info| info.creation_date_millis)
            .map(|info| info.name.clone());

        if let Some(latest) = latest {
            for info in indices {
                if info.name != latest {
                    self.backend.delete_index(&info.name).await?;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};

    use super::*;
    use crate::index::memory::MemoryBackend;
    use crate::index::{DocumentHit, IndexInfo, WriteToken};

    fn mapping() -> serde_json::Value {
        json!({ "properties": { "gmcReferenceNumber": { "type": "keyword" } } })
    }

    #[tokio::test]
    async fn bootstrap_resync_turns_index_name_into_alias() {
        let backend = MemoryBackend::new();
        backend.create_index("source", &mapping()).await.unwrap();
        backend.seed_document("source", "a", json!({"admin": "one"})).await;
        backend.create_index("masterdoctorindex", &mapping()).await.unwrap();
        backend
            .seed_document("masterdoctorindex", "old", json!({"admin": "stale"}))
            .await;

        let manager = IndexLifecycleManager::new(backend.clone());
        manager.resync("source", "masterdoctorindex").await.unwrap();

        assert!(backend.alias_exists("masterdoctorindex").await.unwrap());
        assert!(backend.alias_exists("masterdoctorindex_backup").await.unwrap());
        // Reads through the alias now see the resynced documents.
        let docs = backend
            .get_indices("masterdoctorindex")
            .await
            .unwrap();
        assert_eq!(docs.len(), 1);
        let live = backend.documents(&docs[0].name).await;
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].0, "a");
    }

    #[tokio::test]
    async fn steady_state_resync_marks_old_index_as_backup() {
        let backend = MemoryBackend::new();
        backend.create_index("source", &mapping()).await.unwrap();
        backend.seed_document("source", "a", json!({"admin": "one"})).await;
        backend.create_index("masterdoctorindex_old", &mapping()).await.unwrap();
        backend
            .add_alias("masterdoctorindex_old", "masterdoctorindex")
            .await
            .unwrap();

        let manager = IndexLifecycleManager::new(backend.clone());
        manager.resync("source", "masterdoctorindex").await.unwrap();

        let backups = backend.get_indices("masterdoctorindex_backup").await.unwrap();
        assert_eq!(backups.len(), 1);
        assert_eq!(backups[0].name, "masterdoctorindex_old");

        let live = backend.get_indices("masterdoctorindex").await.unwrap();
        assert_eq!(live.len(), 1);
        assert_ne!(live[0].name, "masterdoctorindex_old");
    }

    #[tokio::test]
    async fn mark_current_index_rejects_ambiguous_alias() {
        let backend = MemoryBackend::new();
        backend.create_index("one", &mapping()).await.unwrap();
        backend.create_index("two", &mapping()).await.unwrap();
        backend.add_alias("one", "views").await.unwrap();
        backend.add_alias("two", "views").await.unwrap();

        let manager = IndexLifecycleManager::new(backend);
        let err = manager.mark_current_index_as_backup("views").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidAliasState);
    }

    #[tokio::test]
    async fn backup_pruning_keeps_only_the_latest() {
        let backend = MemoryBackend::new();
        backend.create_index("backup_1", &mapping()).await.unwrap();
        backend.create_index("backup_2", &mapping()).await.unwrap();
        backend.create_index("backup_3", &mapping()).await.unwrap();
        for name in ["backup_1", "backup_2", "backup_3"] {
            backend.add_alias(name, "views_backup").await.unwrap();
        }

        let manager = IndexLifecycleManager::new(backend.clone());
        manager
            .delete_backup_indices_except_latest("views_backup")
            .await
            .unwrap();

        assert_eq!(backend.index_names().await, vec!["backup_3".to_owned()]);
    }

    #[tokio::test]
    async fn pruning_failure_does_not_abort_the_resync() {
        let backend = MemoryBackend::new();
        backend.create_index("source", &mapping()).await.unwrap();
        backend.create_index("views_old", &mapping()).await.unwrap();
        backend.add_alias("views_old", "views").await.unwrap();

        // No backup alias exists before the run, so the first resync creates one and
        // pruning finds a single backup. The interesting case is that a missing
        // backup alias on a fresh cluster never fails the resync.
        let manager = IndexLifecycleManager::new(backend.clone());
        manager.resync("source", "views").await.unwrap();
        assert!(backend.alias_exists("views").await.unwrap());
    }

    /// Delegates to [`MemoryBackend`] but reports no mapping for any index.
    #[derive(Clone)]
    struct MappinglessBackend {
        inner: MemoryBackend,
    }

    impl SearchBackend for MappinglessBackend {
        fn alias_exists(&self, alias: &str) -> impl std::future::Future<Output = RevalResult<bool>> + Send {
            self.inner.alias_exists(alias)
        }
        fn get_indices(&self, name_or_alias: &str) -> impl std::future::Future<Output = RevalResult<Vec<IndexInfo>>> + Send {
            self.inner.get_indices(name_or_alias)
        }
        fn get_mapping(&self, _index: &str) -> impl std::future::Future<Output = RevalResult<Option<Value>>> + Send {
            async move { Ok(None) }
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
            token: Option<WriteToken>,
        ) -> impl std::future::Future<Output = RevalResult<()>> + Send {
            self.inner.index_document(index, id, source, token)
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
    async fn resync_aborts_when_the_old_mapping_is_missing() {
        let inner = MemoryBackend::new();
        inner.create_index("source", &mapping()).await.unwrap();
        inner.create_index("views_old", &mapping()).await.unwrap();
        inner.add_alias("views_old", "views").await.unwrap();

        let manager = IndexLifecycleManager::new(MappinglessBackend { inner: inner.clone() });
        let err = manager.resync("source", "views").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MappingNotFound);

        // The alias still serves the old index and no rebuild index was created.
        let live = inner.get_indices("views").await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].name, "views_old");
        assert_eq!(
            inner.index_names().await,
            vec!["source".to_owned(), "views_old".to_owned()]
        );
    }
}
