//! The shared, persisted working set: rows, studio config and the artifact
//! library.
//!
//! In-memory state is authoritative. Every mutation is applied first and
//! then persisted; a failed write is logged and counted but never undoes the
//! mutation.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::artifacts::{ArtifactLibrary, StructuredVector};
use super::persistence::KeyValueStore;
use super::rows::{ListQuery, RowStore};
use crate::error::{ImportError, PersistenceError};
use crate::model::{GlobalConfig, Row, RowId};
use crate::observability::{ActivityLog, Metrics};

pub const ROWS_KEY: &str = "picto.rows";
pub const CONFIG_KEY: &str = "picto.config";
pub const VECTOR_LIBRARY_KEY: &str = "picto.vector_library";

pub struct Workspace {
    rows: Mutex<RowStore>,
    config: RwLock<GlobalConfig>,
    artifacts: Mutex<ArtifactLibrary>,
    storage: Arc<dyn KeyValueStore>,
    activity: Arc<ActivityLog>,
    metrics: Arc<Metrics>,
    // 書き込みを直列化する。各書き込みは取得時点の最新状態を保存する。
    write_gate: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("rows", &self.rows_guard().len())
            .field("artifacts", &self.artifacts_guard().len())
            .finish_non_exhaustive()
    }
}

impl Workspace {
    /// Restores the last persisted state.
    ///
    /// Missing or unreadable entries start empty (or default) with a
    /// warning; stages left `processing` by an interrupted session go back
    /// to `idle`.
    pub async fn load(
        storage: Arc<dyn KeyValueStore>,
        activity: Arc<ActivityLog>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let workspace = Self {
            rows: Mutex::default(),
            config: RwLock::default(),
            artifacts: Mutex::default(),
            storage,
            activity,
            metrics,
            write_gate: tokio::sync::Mutex::new(()),
        };

        let mut rows: Vec<Row> = workspace.restore(ROWS_KEY).await.unwrap_or_default();
        let mut settled = 0_usize;
        for row in &mut rows {
            if row.statuses.settle_interrupted() {
                settled += 1;
            }
        }
        if let Err(error) = workspace.rows_guard().replace_all(rows) {
            workspace.warn(format!("discarding stored rows: {error}"));
        }
        if settled > 0 {
            workspace
                .activity
                .info(format!("{settled} interrupted row(s) reset to idle"));
        }

        if let Some(config) = workspace.restore::<GlobalConfig>(CONFIG_KEY).await {
            *workspace.config_write() = config;
        }
        if let Some(library) = workspace.restore::<ArtifactLibrary>(VECTOR_LIBRARY_KEY).await {
            *workspace.artifacts_guard() = library;
        }

        debug!(rows = workspace.rows_guard().len(), "workspace loaded");
        workspace
    }

    async fn restore<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let text = match self.storage.get(key).await {
            Ok(text) => text?,
            Err(error) => {
                self.warn(format!("failed to read {key}: {error}"));
                return None;
            }
        };
        match serde_json::from_str(&text) {
            Ok(value) => Some(value),
            Err(error) => {
                self.warn(format!("ignoring malformed {key}: {error}"));
                None
            }
        }
    }

    fn rows_guard(&self) -> MutexGuard<'_, RowStore> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn artifacts_guard(&self) -> MutexGuard<'_, ArtifactLibrary> {
        self.artifacts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn config_write(&self) -> std::sync::RwLockWriteGuard<'_, GlobalConfig> {
        self.config.write().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn activity(&self) -> &Arc<ActivityLog> {
        &self.activity
    }

    #[must_use]
    pub fn row(&self, id: &RowId) -> Option<Row> {
        self.rows_guard().get(id).cloned()
    }

    #[must_use]
    pub fn contains(&self, id: &RowId) -> bool {
        self.rows_guard().contains(id)
    }

    /// Snapshot of the filtered, ordered projection.
    #[must_use]
    pub fn rows(&self, query: &ListQuery) -> Vec<Row> {
        self.rows_guard()
            .list(query)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn read<R>(&self, f: impl FnOnce(&RowStore) -> R) -> R {
        f(&self.rows_guard())
    }

    /// Applies `f` to the row store, then persists the rows.
    pub async fn write<R>(&self, f: impl FnOnce(&mut RowStore) -> R) -> R {
        let result = {
            let mut rows = self.rows_guard();
            f(&mut rows)
        };
        self.persist_rows().await;
        result
    }

    /// Applies `f` to a single row. Unknown ids are a no-op and skip the
    /// write.
    pub async fn mutate<R>(&self, id: &RowId, f: impl FnOnce(&mut Row) -> R) -> Option<R> {
        let result = self.rows_guard().mutate(id, f);
        if result.is_some() {
            self.persist_rows().await;
        }
        result
    }

    /// Removes the row together with its structured vector.
    pub async fn remove_row(&self, id: &RowId) -> Option<Row> {
        let removed = self.rows_guard().delete(id)?;
        let had_artifact = self.artifacts_guard().remove(id).is_some();
        self.persist_rows().await;
        if had_artifact {
            self.persist_artifacts().await;
        }
        Some(removed)
    }

    /// # Errors
    /// Rejects the batch without touching the current working set.
    pub async fn replace_all(
        &self,
        rows: Vec<Row>,
        config: Option<GlobalConfig>,
    ) -> Result<(), ImportError> {
        let pruned = {
            let mut store = self.rows_guard();
            store.replace_all(rows)?;
            let live = store.ids();
            drop(store);
            self.artifacts_guard().retain_rows(&live)
        };
        let has_config = config.is_some();
        if let Some(config) = config {
            *self.config_write() = config;
        }

        self.persist_rows().await;
        if has_config {
            self.persist_config().await;
        }
        if pruned > 0 {
            self.persist_artifacts().await;
        }
        Ok(())
    }

    #[must_use]
    pub fn config(&self) -> GlobalConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub async fn update_config(&self, config: GlobalConfig) {
        *self.config_write() = config;
        self.persist_config().await;
    }

    #[must_use]
    pub fn artifact(&self, id: &RowId) -> Option<StructuredVector> {
        self.artifacts_guard().get(id).cloned()
    }

    pub async fn store_artifact(&self, id: &RowId, svg: impl Into<String>) -> StructuredVector {
        let stored = self.artifacts_guard().insert(id.clone(), svg).clone();
        self.persist_artifacts().await;
        stored
    }

    /// Drops the row's structured vector, if any, and persists the library.
    pub async fn discard_artifact(&self, id: &RowId) -> bool {
        let removed = self.artifacts_guard().remove(id).is_some();
        if removed {
            self.persist_artifacts().await;
            self.activity
                .info(format!("structured vector discarded for {id}"));
        }
        removed
    }

    async fn persist_rows(&self) {
        let _gate = self.write_gate.lock().await;
        let encoded = encode(ROWS_KEY, self.rows_guard().rows());
        self.store(ROWS_KEY, encoded).await;
    }

    async fn persist_config(&self) {
        let _gate = self.write_gate.lock().await;
        let encoded = encode(CONFIG_KEY, &self.config());
        self.store(CONFIG_KEY, encoded).await;
    }

    async fn persist_artifacts(&self) {
        let _gate = self.write_gate.lock().await;
        let encoded = encode(VECTOR_LIBRARY_KEY, &*self.artifacts_guard());
        self.store(VECTOR_LIBRARY_KEY, encoded).await;
    }

    async fn store(&self, key: &str, encoded: Result<String, PersistenceError>) {
        let result = match encoded {
            Ok(text) => self.storage.set(key, &text).await,
            Err(error) => Err(error),
        };
        if let Err(error) = result {
            self.metrics.persistence_failures.inc();
            self.warn(format!("changes kept in memory only: {error}"));
        }
    }

    fn warn(&self, message: String) {
        warn!(target: "picto_studio::store", "{message}");
        self.activity.warn(message);
    }
}

fn encode<T: Serialize + ?Sized>(key: &str, value: &T) -> Result<String, PersistenceError> {
    serde_json::to_string(value).map_err(|source| PersistenceError::Encode {
        key: key.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StageStatus;
    use crate::observability::Severity;
    use crate::pipeline::stage::Stage;
    use crate::store::MemoryStore;

    async fn workspace_over(storage: Arc<dyn KeyValueStore>) -> Workspace {
        Workspace::load(
            storage,
            Arc::new(ActivityLog::default()),
            Arc::new(Metrics::new().expect("metrics")),
        )
        .await
    }

    #[tokio::test]
    async fn mutations_are_persisted_and_restored() {
        let storage: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let workspace = workspace_over(Arc::clone(&storage)).await;
        let id = workspace.write(|rows| rows.create("Quiero agua")).await;
        workspace
            .mutate(&id, |row| row.set_stage_status(Stage::Analysis, StageStatus::Completed))
            .await;

        let restored = workspace_over(storage).await;
        let row = restored.row(&id).expect("row restored");
        assert_eq!(row.utterance, "Quiero agua");
        assert_eq!(row.stage_status(Stage::Analysis), StageStatus::Completed);
    }

    #[tokio::test]
    async fn interrupted_processing_reverts_to_idle_on_load() {
        let storage: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let workspace = workspace_over(Arc::clone(&storage)).await;
        let id = workspace.write(|rows| rows.create("Quiero agua")).await;
        workspace
            .mutate(&id, |row| row.set_stage_status(Stage::Rendering, StageStatus::Processing))
            .await;

        let restored = workspace_over(storage).await;
        let row = restored.row(&id).expect("row restored");
        assert_eq!(row.stage_status(Stage::Rendering), StageStatus::Idle);
        assert_eq!(row.status, StageStatus::Idle);
    }

    #[tokio::test]
    async fn malformed_storage_starts_empty_with_a_warning() {
        let storage = Arc::new(MemoryStore::new());
        storage.set(ROWS_KEY, "{not json").await.expect("seed");
        let workspace = workspace_over(storage).await;

        assert!(workspace.read(RowStore::is_empty));
        let entries = workspace.activity().entries();
        assert!(entries.iter().any(|entry| entry.severity == Severity::Warn
            && entry.message.contains(ROWS_KEY)));
    }

    #[tokio::test]
    async fn failed_writes_keep_the_in_memory_change() {
        let storage: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::with_quota(64));
        let workspace = workspace_over(storage).await;
        let id = workspace.write(|rows| rows.create("x".repeat(200))).await;

        assert!(workspace.row(&id).is_some());
        assert_eq!(workspace.metrics.persistence_failures.get(), 1);
        assert!(
            workspace
                .activity()
                .entries()
                .iter()
                .any(|entry| entry.message.contains("quota exceeded"))
        );
    }

    #[tokio::test]
    async fn removing_a_row_drops_its_artifact() {
        let storage: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let workspace = workspace_over(Arc::clone(&storage)).await;
        let id = workspace.write(|rows| rows.create("Quiero agua")).await;
        workspace.store_artifact(&id, "<svg/>").await;
        assert!(workspace.artifact(&id).is_some());

        workspace.remove_row(&id).await.expect("row removed");
        assert!(workspace.artifact(&id).is_none());

        let restored = workspace_over(storage).await;
        assert!(restored.artifact(&id).is_none());
        assert!(restored.row(&id).is_none());
    }

    #[tokio::test]
    async fn rejected_replace_leaves_state_alone() {
        let workspace = workspace_over(Arc::new(MemoryStore::new())).await;
        let id = workspace.write(|rows| rows.create("keep")).await;
        let duplicate = vec![
            Row::new(RowId::from("a"), "one"),
            Row::new(RowId::from("a"), "two"),
        ];
        assert!(workspace.replace_all(duplicate, None).await.is_err());
        assert!(workspace.row(&id).is_some());
        assert_eq!(workspace.read(RowStore::len), 1);
    }
    #[tokio::test]
    async fn discarded_artifact_stays_gone_after_restart() {
        let storage: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let workspace = workspace_over(Arc::clone(&storage)).await;
        let id = workspace.write(|rows| rows.create("Quiero agua")).await;
        workspace.store_artifact(&id, "<svg/>").await;

        assert!(workspace.discard_artifact(&id).await);
        assert!(!workspace.discard_artifact(&id).await);
        assert!(workspace.row(&id).is_some());

        let restored = workspace_over(storage).await;
        assert!(restored.artifact(&id).is_none());
    }

    #[tokio::test]
    async fn row_and_config_writes_go_to_their_own_keys() {
        let storage: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let workspace = workspace_over(Arc::clone(&storage)).await;

        workspace.write(|rows| rows.create("Quiero agua")).await;
        assert!(storage.get(ROWS_KEY).await.expect("read rows").is_some());
        assert!(storage.get(CONFIG_KEY).await.expect("read config").is_none());

        let config = GlobalConfig {
            author: "ARASAAC".to_string(),
            ..GlobalConfig::default()
        };
        workspace.update_config(config.clone()).await;

        let restored = workspace_over(storage).await;
        assert_eq!(restored.config(), config);
        assert_eq!(restored.read(RowStore::len), 1);
    }
}
