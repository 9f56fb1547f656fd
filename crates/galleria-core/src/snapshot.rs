//! Loading and saving the persisted gallery snapshot.
//!
//! The snapshot is one JSON document under a fixed key, always written as a
//! full overwrite. The in-memory copy is replaced only after a confirmed write.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::models::{SyncState, SNAPSHOT_SCHEMA_VERSION};
use crate::storage::{bounded, ObjectStore};
use crate::Result;

const SNAPSHOT_CONTENT_TYPE: &str = "application/json";

pub struct SnapshotStore {
    store: Arc<dyn ObjectStore>,
    key: String,
    timeout: Duration,
    current: RwLock<Option<SyncState>>,
}

impl SnapshotStore {
    pub fn new(store: Arc<dyn ObjectStore>, key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            store,
            key: key.into(),
            timeout,
            current: RwLock::new(None),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// The in-memory snapshot, if one has been loaded or saved.
    pub async fn cached(&self) -> Option<SyncState> {
        self.current.read().await.clone()
    }

    /// The in-memory snapshot, loading it from the store on first use.
    pub async fn current(&self) -> Result<SyncState> {
        if let Some(state) = self.cached().await {
            return Ok(state);
        }

        let mut current = self.current.write().await;
        if let Some(state) = current.as_ref() {
            return Ok(state.clone());
        }
        let loaded = self.load().await?;
        *current = Some(loaded.clone());
        Ok(loaded)
    }

    /// Read the stored document. A missing document yields an empty state.
    pub async fn load(&self) -> Result<SyncState> {
        let Some(bytes) = bounded(self.timeout, "snapshot load", self.store.get(&self.key)).await?
        else {
            tracing::info!(key = %self.key, "No gallery snapshot stored yet; starting empty");
            return Ok(SyncState::default());
        };

        let upgrade = SyncState::decode(&bytes)?;
        if upgrade.source_version < SNAPSHOT_SCHEMA_VERSION {
            tracing::info!(
                key = %self.key,
                from = upgrade.source_version,
                to = SNAPSHOT_SCHEMA_VERSION,
                "Upgraded legacy gallery snapshot"
            );
        } else if upgrade.source_version > SNAPSHOT_SCHEMA_VERSION {
            tracing::warn!(
                key = %self.key,
                found = upgrade.source_version,
                supported = SNAPSHOT_SCHEMA_VERSION,
                "Gallery snapshot written by a newer schema; loading known fields"
            );
        }
        if upgrade.dropped_items > 0 {
            tracing::warn!(
                key = %self.key,
                dropped = upgrade.dropped_items,
                "Dropped malformed gallery items while loading snapshot"
            );
        }
        Ok(upgrade.state)
    }

    /// Persist `state` as a full overwrite and adopt it as the in-memory copy.
    ///
    /// Items missing identity or location are filtered out first. On failure
    /// the in-memory copy is left as it was.
    pub async fn save(&self, mut state: SyncState) -> Result<SyncState> {
        let dropped = state.retain_valid_items();
        if dropped > 0 {
            tracing::warn!(dropped, "Refusing to persist incomplete gallery items");
        }
        state.version = SNAPSHOT_SCHEMA_VERSION;
        state.sort_images();

        let payload = serde_json::to_vec_pretty(&state)?;
        bounded(
            self.timeout,
            "snapshot save",
            self.store.put(&self.key, payload, SNAPSHOT_CONTENT_TYPE),
        )
        .await?;

        *self.current.write().await = Some(state.clone());
        tracing::debug!(key = %self.key, items = state.images.len(), "Gallery snapshot saved");
        Ok(state)
    }

    /// Forget the in-memory copy so the next access reloads from the store.
    pub async fn invalidate(&self) {
        *self.current.write().await = None;
    }
}
