//! The gallery synchronizer.
//!
//! One call to [`GallerySynchronizer::sync`] picks a path from the staleness
//! clocks, talks to the remote source only as much as that path needs,
//! reconciles the snapshot, and persists it. Every outcome, including remote
//! outages and storage failures, is folded into a [`GalleryResponse`].

mod freshness;
mod reconcile;
mod webhook;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::approval::{resolve_message_approval, Approval, RoleApprovalCache};
use crate::assets::AssetManager;
use crate::config::SyncConfig;
use crate::discord::{RemoteMessage, RemoteSource};
use crate::lock::ProcessingLock;
use crate::models::{GalleryItem, SyncState};
use crate::snapshot::SnapshotStore;
use crate::storage::ObjectStore;
use crate::util::{sanitize, unix_millis_now};
use crate::worker::WorkerPool;
use crate::Error;

pub use freshness::{Decision, FreshnessPolicy, Plan};
pub use reconcile::{reconcile, ImportJob, ReconcilePlan};
pub use webhook::{MessageEvent, ReactionEvent, WebhookEvent};

/// Caller flags for one sync call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncRequest {
    /// Bypass the poll clocks. Never bypasses the processing lock.
    pub force: bool,
    /// Force a stored-asset audit.
    pub validate: bool,
}

/// Path a sync call took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncPath {
    Skip,
    QuickCheck,
    FullSync,
    Audit,
    /// Another run held the lock; cached data was served.
    Locked,
    /// The run failed and cached data was served.
    Degraded,
}

impl SyncPath {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Skip => "skip",
            Self::QuickCheck => "quick-check",
            Self::FullSync => "full-sync",
            Self::Audit => "audit",
            Self::Locked => "locked",
            Self::Degraded => "degraded",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStats {
    pub path: SyncPath,
    pub added: usize,
    pub removed: usize,
    pub repaired: usize,
    /// Items dropped because their asset was missing and could not be repaired.
    pub dropped: usize,
    pub orphans_deleted: usize,
    pub failed_attachments: usize,
    pub duration_ms: u64,
}

impl SyncStats {
    const fn new(path: SyncPath) -> Self {
        Self {
            path,
            added: 0,
            removed: 0,
            repaired: 0,
            dropped: 0,
            orphans_deleted: 0,
            failed_attachments: 0,
            duration_ms: 0,
        }
    }

    fn finished(mut self, started: Instant) -> Self {
        self.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self
    }
}

/// Result of a sync call as served to gallery clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryResponse {
    pub success: bool,
    pub images: Vec<GalleryItem>,
    pub total_count: usize,
    /// Whether the images are the previously stored snapshot unchanged.
    pub from_cache: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<SyncStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GalleryResponse {
    fn served(images: Vec<GalleryItem>, from_cache: bool, stats: SyncStats) -> Self {
        Self {
            success: true,
            total_count: images.len(),
            images,
            from_cache,
            stats: Some(stats),
            error: None,
        }
    }

    fn failed(
        images: Vec<GalleryItem>,
        from_cache: bool,
        stats: SyncStats,
        error: String,
    ) -> Self {
        Self {
            success: false,
            total_count: images.len(),
            images,
            from_cache,
            stats: Some(stats),
            error: Some(error),
        }
    }
}

/// Owns the snapshot, role cache, lock, and worker pool of one process.
///
/// At most one sync runs per instance; there is no exclusion across
/// instances sharing the same store.
pub struct GallerySynchronizer {
    config: SyncConfig,
    freshness: FreshnessPolicy,
    snapshot: SnapshotStore,
    source: Option<Arc<dyn RemoteSource>>,
    assets: AssetManager,
    roles: RoleApprovalCache,
    lock: ProcessingLock,
    pool: WorkerPool,
    force_next: AtomicBool,
}

impl GallerySynchronizer {
    /// Build a synchronizer over `store`.
    ///
    /// Without a source, calls that need remote data serve the snapshot with
    /// an error annotation.
    pub fn new(
        config: SyncConfig,
        store: Arc<dyn ObjectStore>,
        source: Option<Arc<dyn RemoteSource>>,
    ) -> Self {
        let freshness = FreshnessPolicy {
            quick_check_ttl: config.quick_check_ttl,
            full_sync_ttl: config.full_sync_ttl,
            asset_audit_ttl: config.asset_audit_ttl,
        };
        let snapshot = SnapshotStore::new(
            Arc::clone(&store),
            config.cache_key.clone(),
            config.storage_timeout,
        );
        let assets = AssetManager::new(
            store,
            config.download_retry,
            config.object_prefix.clone(),
            config.storage_timeout,
            config.labels.clone(),
        );

        Self {
            freshness,
            snapshot,
            source,
            assets,
            roles: RoleApprovalCache::new(config.role_cache_ttl),
            lock: ProcessingLock::new(config.lock_max_duration),
            pool: WorkerPool::new(config.batch_size, config.batch_pause),
            force_next: AtomicBool::new(false),
            config,
        }
    }

    pub fn lock_held(&self) -> bool {
        self.lock.is_held()
    }

    /// Items in the in-memory snapshot, zero before the first load.
    pub async fn cached_item_count(&self) -> usize {
        self.snapshot
            .cached()
            .await
            .map_or(0, |state| state.images.len())
    }

    /// Whether a webhook has requested that the next sync be forced.
    pub fn force_pending(&self) -> bool {
        self.force_next.load(Ordering::Acquire)
    }

    /// Apply a webhook event to in-process state.
    ///
    /// Marker-emoji reactions evict the reacting user's role lookups. Those
    /// and message create/delete events in the gallery channel force the next
    /// sync. Returns whether the event was relevant.
    pub fn invalidate(&self, event: &WebhookEvent) -> bool {
        let Some(source) = self.source.as_deref() else {
            return false;
        };
        if event.channel_id() != Some(source.channel_id()) {
            tracing::debug!(event = event.kind(), "Ignoring webhook event for another channel");
            return false;
        }

        match event {
            WebhookEvent::ReactionAdded(reaction) | WebhookEvent::ReactionRemoved(reaction) => {
                if !reaction.emoji.matches(&self.config.approval_emoji) {
                    return false;
                }
                self.roles.evict_user(&reaction.user_id);
            }
            WebhookEvent::MessageCreated(_) | WebhookEvent::MessageDeleted(_) => {}
            WebhookEvent::Other(_) => return false,
        }

        self.force_next.store(true, Ordering::Release);
        tracing::info!(event = event.kind(), "Gallery invalidated by webhook");
        true
    }

    /// Drop every in-process cache; the next sync reloads and runs in full.
    pub async fn reset(&self) {
        self.roles.clear();
        self.snapshot.invalidate().await;
        self.force_next.store(true, Ordering::Release);
    }

    /// Run one sync call. Never fails; errors are reported in the response.
    pub async fn sync(&self, request: SyncRequest) -> GalleryResponse {
        let started = Instant::now();
        let state = match self.snapshot.current().await {
            Ok(state) => state,
            Err(error) => return load_failure(&error, started),
        };

        let force = request.force || self.force_pending();
        let decision = self
            .freshness
            .decide(&state, force, request.validate, unix_millis_now());
        if decision.is_noop() {
            return GalleryResponse::served(
                state.images,
                true,
                SyncStats::new(SyncPath::Skip).finished(started),
            );
        }

        let Some(source) = self.source.clone() else {
            let error = Error::Config("Discord source is not configured".to_string());
            return degraded(state.images, &error, started);
        };

        let Some(_guard) = self.lock.try_acquire() else {
            tracing::info!("Gallery sync already running; serving cached snapshot");
            return GalleryResponse::served(
                state.images,
                true,
                SyncStats::new(SyncPath::Locked).finished(started),
            );
        };

        // Re-read under the lock: a run that just finished may have saved.
        let pending = self.force_next.swap(false, Ordering::AcqRel);
        let state = match self.snapshot.current().await {
            Ok(state) => state,
            Err(error) => return load_failure(&error, started),
        };
        let decision = self.freshness.decide(
            &state,
            request.force || pending,
            request.validate,
            unix_millis_now(),
        );
        if decision.is_noop() {
            return GalleryResponse::served(
                state.images,
                true,
                SyncStats::new(SyncPath::Skip).finished(started),
            );
        }

        let response = self.run(source.as_ref(), state, decision, started).await;
        if pending && !response.success {
            self.force_next.store(true, Ordering::Release);
        }
        response
    }

    async fn run(
        &self,
        source: &dyn RemoteSource,
        mut state: SyncState,
        decision: Decision,
        started: Instant,
    ) -> GalleryResponse {
        let now = unix_millis_now();
        let previous = state.images.clone();
        let mut stats = SyncStats::new(SyncPath::Audit);
        let mut changed = false;
        let mut removed = Vec::new();

        let mut full = decision.plan == Plan::Full;
        if decision.plan == Plan::QuickCheck {
            match source.list_message_ids().await {
                Ok(ids) if ids.is_empty() && state.has_images() => {
                    return outage(state.images, started);
                }
                Ok(ids) if ids == state.message_ids => {
                    stats.path = SyncPath::QuickCheck;
                    state.last_quick_check = now;
                }
                Ok(ids) => {
                    tracing::info!(
                        known = state.message_ids.len(),
                        current = ids.len(),
                        "Gallery channel changed; running full sync"
                    );
                    full = true;
                }
                Err(error) => return degraded(state.images, &error, started),
            }
        }

        if full {
            let messages = match source.list_messages().await {
                Ok(messages) if messages.is_empty() && state.has_images() => {
                    return outage(state.images, started);
                }
                Ok(messages) => messages,
                Err(error) => return degraded(state.images, &error, started),
            };

            stats.path = SyncPath::FullSync;
            let approvals = self.resolve_approvals(source, &messages).await;
            let plan = reconcile(std::mem::take(&mut state.images), &messages, &approvals);
            let (added, failed) = self.import_all(source, plan.imports).await;

            stats.added = added.len();
            stats.failed_attachments = failed;
            stats.removed = plan.remove.len();
            changed |= stats.added > 0 || stats.removed > 0;

            state.images = plan.keep;
            state.images.extend(added);
            removed = plan.remove;
            state.message_ids = messages.into_iter().map(|message| message.id).collect();
            state.last_full_sync = now;
            state.last_quick_check = now;
        }

        if decision.audit {
            let report = self
                .assets
                .audit(&self.pool, std::mem::take(&mut state.images))
                .await;
            state.images = report.present;
            if !report.missing.is_empty() {
                changed = true;
                let outcomes = self
                    .pool
                    .run(report.missing, |item| async move {
                        let outcome = self.assets.repair(source, &item).await;
                        (item, outcome)
                    })
                    .await;
                for (item, outcome) in outcomes {
                    match outcome {
                        Ok(repaired) => {
                            stats.repaired += 1;
                            state.images.push(repaired);
                        }
                        Err(error) => {
                            tracing::warn!(
                                item_id = %item.id,
                                error = %error,
                                "Dropping gallery item with unrepairable asset"
                            );
                            stats.dropped += 1;
                        }
                    }
                }
            }
            state.last_asset_audit = now;
        }

        state.sort_images();
        let saved = match self.snapshot.save(state).await {
            Ok(saved) => saved,
            Err(error) => {
                // Nothing was persisted, so removed assets stay and the last
                // good list is what callers see.
                tracing::error!(error = %error, "Failed to persist gallery snapshot");
                return GalleryResponse::failed(
                    previous,
                    true,
                    stats.finished(started),
                    format!("failed to persist gallery snapshot: {}", sanitize(&error)),
                );
            }
        };

        let removable = unreferenced(removed, &saved.images);
        if !removable.is_empty() {
            self.assets.delete_assets(&self.pool, removable).await;
        }
        if decision.audit {
            match self
                .assets
                .sweep_orphans(
                    &self.pool,
                    &saved.images,
                    self.snapshot.key(),
                    self.config.orphan_list_limit,
                )
                .await
            {
                Ok(deleted) => stats.orphans_deleted = deleted,
                Err(error) => tracing::warn!(error = %error, "Orphan sweep failed"),
            }
        }

        let stats = stats.finished(started);
        tracing::info!(
            path = stats.path.as_str(),
            items = saved.images.len(),
            added = stats.added,
            removed = stats.removed,
            repaired = stats.repaired,
            dropped = stats.dropped,
            orphans_deleted = stats.orphans_deleted,
            failed_attachments = stats.failed_attachments,
            duration_ms = stats.duration_ms,
            "Gallery sync finished"
        );
        GalleryResponse::served(saved.images, !changed, stats)
    }

    /// Decide approval for every message. Messages without images or marker
    /// reactions are rejected without entering the worker pool.
    async fn resolve_approvals(
        &self,
        source: &dyn RemoteSource,
        messages: &[RemoteMessage],
    ) -> HashMap<String, Approval> {
        let emoji = self.config.approval_emoji.as_str();
        let approved_roles = &self.config.approved_role_ids;
        let (candidates, rejected): (Vec<&RemoteMessage>, Vec<&RemoteMessage>) = messages
            .iter()
            .partition(|message| message.has_image_attachment() && message.reaction_count(emoji) > 0);

        let mut approvals: HashMap<String, Approval> = rejected
            .into_iter()
            .map(|message| (message.id.clone(), Approval::Rejected))
            .collect();
        let decided = self
            .pool
            .run(candidates, |message| async move {
                let approval =
                    resolve_message_approval(source, &self.roles, message, emoji, approved_roles)
                        .await;
                (message.id.clone(), approval)
            })
            .await;
        approvals.extend(decided);
        approvals
    }

    async fn import_all(
        &self,
        source: &dyn RemoteSource,
        jobs: Vec<ImportJob<'_>>,
    ) -> (Vec<GalleryItem>, usize) {
        let outcomes = self
            .pool
            .run(jobs, |job| async move {
                let outcome = self
                    .assets
                    .import_attachment(source, job.message, job.attachment)
                    .await;
                (job, outcome)
            })
            .await;

        let mut added = Vec::new();
        let mut failed = 0;
        for (job, outcome) in outcomes {
            match outcome {
                Ok(item) => added.push(item),
                Err(error) => {
                    tracing::warn!(
                        message_id = %job.message.id,
                        attachment_id = %job.attachment.id,
                        error = %error,
                        "Attachment import failed"
                    );
                    failed += 1;
                }
            }
        }
        (added, failed)
    }
}

/// Removed items whose asset is not also used by a kept item.
fn unreferenced(removed: Vec<GalleryItem>, kept: &[GalleryItem]) -> Vec<GalleryItem> {
    let in_use: HashSet<&str> = kept.iter().map(|item| item.src.as_str()).collect();
    let mut seen = HashSet::new();
    removed
        .into_iter()
        .filter(|item| !in_use.contains(item.src.as_str()) && seen.insert(item.src.clone()))
        .collect()
}

fn degraded(images: Vec<GalleryItem>, error: &Error, started: Instant) -> GalleryResponse {
    tracing::warn!(error = %error, "Gallery sync failed; serving cached snapshot");
    GalleryResponse::failed(
        images,
        true,
        SyncStats::new(SyncPath::Degraded).finished(started),
        sanitize(error),
    )
}

fn outage(images: Vec<GalleryItem>, started: Instant) -> GalleryResponse {
    let error = Error::remote(
        None,
        "remote source returned no messages while the gallery is not empty",
    );
    degraded(images, &error, started)
}

fn load_failure(error: &Error, started: Instant) -> GalleryResponse {
    tracing::error!(error = %error, "Failed to load gallery snapshot");
    GalleryResponse::failed(
        Vec::new(),
        true,
        SyncStats::new(SyncPath::Degraded).finished(started),
        format!("failed to load gallery snapshot: {}", sanitize(error)),
    )
}
