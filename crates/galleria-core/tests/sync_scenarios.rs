//! End-to-end synchronizer scenarios against an in-process Discord fake and
//! the in-memory object store.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use galleria_core::discord::{
    DownloadedAsset, ReactionEmoji, RemoteAttachment, RemoteAuthor, RemoteMessage,
    RemoteReaction, RemoteSource,
};
use galleria_core::retry::RetryPolicy;
use galleria_core::storage::{MemoryObjectStore, ObjectStore, StoredObject};
use galleria_core::sync::{MessageEvent, ReactionEvent, SyncPath};
use galleria_core::{
    Error, GalleryResponse, GallerySynchronizer, Result, SyncConfig, SyncRequest, SyncState,
    WebhookEvent,
};
use pretty_assertions::assert_eq;
use tokio::sync::Notify;

const CROWN: &str = "\u{1F451}";
const CHANNEL: &str = "55";
const APPROVER: &str = "7";
const BYSTANDER: &str = "8";
const APPROVED_ROLE: &str = "900";

#[derive(Default)]
struct FakeDiscord {
    messages: Mutex<Vec<RemoteMessage>>,
    reactors: Mutex<HashMap<String, Vec<String>>>,
    failing_downloads: Mutex<HashSet<String>>,
    downloads: AtomicUsize,
    listing_fails: AtomicBool,
    gate: Option<Arc<Notify>>,
}

impl FakeDiscord {
    fn with_gate(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    /// Post a message; `reactor` adds a crown reaction from that user.
    fn post(&self, id: &str, day: u32, attachments: &[&str], reactor: Option<&str>) {
        let message = RemoteMessage {
            id: id.to_string(),
            channel_id: CHANNEL.to_string(),
            content: format!("Photo {id}"),
            author: RemoteAuthor {
                id: "42".to_string(),
                username: "jana".to_string(),
                global_name: Some("Jana".to_string()),
            },
            attachments: attachments
                .iter()
                .enumerate()
                .map(|(index, filename)| RemoteAttachment {
                    id: format!("{id}{index}"),
                    filename: (*filename).to_string(),
                    url: format!("https://cdn.test/{id}/{index}/{filename}"),
                    content_type: Some("image/png".to_string()),
                    ..RemoteAttachment::default()
                })
                .collect(),
            reactions: reactor
                .map(|_| RemoteReaction {
                    emoji: ReactionEmoji {
                        id: None,
                        name: Some(CROWN.to_string()),
                    },
                    count: 1,
                })
                .into_iter()
                .collect(),
            timestamp: format!("2024-01-{day:02}T12:00:00Z")
                .parse::<DateTime<Utc>>()
                .unwrap(),
        };

        if let Some(user) = reactor {
            self.reactors
                .lock()
                .unwrap()
                .insert(id.to_string(), vec![user.to_string()]);
        }
        self.messages.lock().unwrap().push(message);
    }

    fn delete_all(&self) {
        self.messages.lock().unwrap().clear();
    }

    fn fail_download(&self, url: &str) {
        self.failing_downloads.lock().unwrap().insert(url.to_string());
    }

    fn attachment_url(&self, message_id: &str, index: usize) -> String {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .find(|message| message.id == message_id)
            .map(|message| message.attachments[index].url.clone())
            .unwrap()
    }
}

#[async_trait]
impl RemoteSource for FakeDiscord {
    fn guild_id(&self) -> &str {
        "1"
    }

    fn channel_id(&self) -> &str {
        CHANNEL
    }

    async fn list_messages(&self) -> Result<Vec<RemoteMessage>> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.listing_fails.load(Ordering::SeqCst) {
            return Err(Error::remote(Some(503), "service unavailable"));
        }
        Ok(self.messages.lock().unwrap().clone())
    }

    async fn reaction_users(&self, message_id: &str, _: &str) -> Result<Vec<String>> {
        self.reactors
            .lock()
            .unwrap()
            .get(message_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("reactions of {message_id}")))
    }

    async fn member_roles(&self, user_id: &str) -> Result<Vec<String>> {
        match user_id {
            APPROVER => Ok(vec![APPROVED_ROLE.to_string()]),
            BYSTANDER => Ok(vec!["1000".to_string()]),
            _ => Err(Error::NotFound(format!("member {user_id}"))),
        }
    }

    async fn fetch_message(&self, message_id: &str) -> Result<RemoteMessage> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .find(|message| message.id == message_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("message {message_id}")))
    }

    async fn download(&self, url: &str) -> Result<DownloadedAsset> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        if self.failing_downloads.lock().unwrap().contains(url) {
            return Err(Error::NotFound(format!("attachment {url}")));
        }
        Ok(DownloadedAsset {
            bytes: url.as_bytes().to_vec(),
            content_type: Some("image/png".to_string()),
        })
    }
}

/// Memory store whose snapshot writes fail while `reject_snapshot` is set.
#[derive(Default)]
struct FlakySnapshotStore {
    inner: MemoryObjectStore,
    reject_snapshot: AtomicBool,
}

#[async_trait]
impl ObjectStore for FlakySnapshotStore {
    fn backend_name(&self) -> &str {
        "flaky"
    }

    async fn put(
        &self,
        object_key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<StoredObject> {
        if object_key == "gallery.json" && self.reject_snapshot.load(Ordering::SeqCst) {
            return Err(Error::Storage("bucket is read-only".to_string()));
        }
        self.inner.put(object_key, bytes, content_type).await
    }

    async fn get(&self, object_key: &str) -> Result<Option<Vec<u8>>> {
        self.inner.get(object_key).await
    }

    async fn exists(&self, object_key: &str) -> Result<bool> {
        self.inner.exists(object_key).await
    }

    async fn delete_by_url(&self, url: &str) -> Result<()> {
        self.inner.delete_by_url(url).await
    }

    async fn list(&self, prefix: &str, limit: usize) -> Result<Vec<StoredObject>> {
        self.inner.list(prefix, limit).await
    }

    fn public_url(&self, object_key: &str) -> String {
        self.inner.public_url(object_key)
    }

    fn object_key_for_url(&self, url: &str) -> Option<String> {
        self.inner.object_key_for_url(url)
    }
}

fn config() -> SyncConfig {
    SyncConfig {
        batch_pause: Duration::ZERO,
        approved_role_ids: BTreeSet::from([APPROVED_ROLE.to_string()]),
        download_retry: RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        },
        ..SyncConfig::default()
    }
}

struct Harness {
    discord: Arc<FakeDiscord>,
    store: Arc<MemoryObjectStore>,
    sync: Arc<GallerySynchronizer>,
}

impl Harness {
    fn new() -> Self {
        Self::build(FakeDiscord::default(), config())
    }

    fn build(discord: FakeDiscord, config: SyncConfig) -> Self {
        let discord = Arc::new(discord);
        let store = Arc::new(MemoryObjectStore::default());
        let sync = Arc::new(GallerySynchronizer::new(
            config,
            Arc::clone(&store) as Arc<dyn ObjectStore>,
            Some(Arc::clone(&discord) as Arc<dyn RemoteSource>),
        ));
        Self {
            discord,
            store,
            sync,
        }
    }

    async fn forced(&self) -> GalleryResponse {
        self.sync
            .sync(SyncRequest {
                force: true,
                validate: false,
            })
            .await
    }

    async fn persisted(&self) -> SyncState {
        let bytes = self.store.get("gallery.json").await.unwrap().unwrap();
        SyncState::decode(&bytes).unwrap().state
    }

    async fn asset_keys(&self) -> Vec<String> {
        self.store
            .keys()
            .await
            .into_iter()
            .filter(|key| key.starts_with("gallery/"))
            .collect()
    }
}

fn ids(response: &GalleryResponse) -> Vec<&str> {
    response.images.iter().map(|item| item.id.as_str()).collect()
}

fn path(response: &GalleryResponse) -> SyncPath {
    response.stats.as_ref().unwrap().path
}

#[tokio::test]
async fn first_sync_mirrors_exactly_the_approved_messages() {
    let harness = Harness::new();
    harness.discord.post("100", 1, &["a.png", "b.png"], Some(APPROVER));
    harness.discord.post("200", 2, &["c.png"], None);
    harness.discord.post("300", 3, &["d.png"], Some(BYSTANDER));
    harness.discord.post("400", 4, &["e.png"], Some("404"));

    let response = harness.sync.sync(SyncRequest::default()).await;

    assert!(response.success);
    assert!(!response.from_cache);
    assert_eq!(path(&response), SyncPath::FullSync);
    assert_eq!(ids(&response), vec!["100_1000", "100_1001"]);
    assert_eq!(response.total_count, 2);

    let owners: BTreeSet<&str> = response
        .images
        .iter()
        .map(|item| item.message_id.as_str())
        .collect();
    assert_eq!(owners, BTreeSet::from(["100"]));

    let first = &response.images[0];
    assert_eq!(first.alt, "Fotka od Jana");
    assert_eq!(first.title, "Photo 100");
    assert_eq!(first.attachment_id.as_deref(), Some("1000"));
    assert_eq!(harness.asset_keys().await.len(), 2);

    let persisted = harness.persisted().await;
    assert_eq!(persisted.images, response.images);
    assert_eq!(
        persisted.message_ids,
        BTreeSet::from(["100", "200", "300", "400"].map(String::from))
    );
}

#[tokio::test]
async fn repeated_full_sync_without_remote_change_is_idempotent() {
    let harness = Harness::new();
    harness.discord.post("100", 1, &["a.png"], Some(APPROVER));
    harness.discord.post("200", 2, &["b.png"], Some(APPROVER));

    let first = harness.forced().await;
    let before = harness.persisted().await;
    let second = harness.forced().await;
    let after = harness.persisted().await;

    assert!(second.success);
    assert!(second.from_cache);
    assert_eq!(second.stats.as_ref().unwrap().added, 0);
    assert_eq!(second.images, first.images);
    assert_eq!(after.images, before.images);
    assert_eq!(after.message_ids, before.message_ids);
    assert_eq!(harness.asset_keys().await.len(), 2);
}

#[tokio::test]
async fn new_approved_message_is_added_newest_first() {
    let harness = Harness::new();
    harness.discord.post("100", 1, &["a.png"], Some(APPROVER));
    let first = harness.forced().await;
    let original = first.images[0].clone();

    harness.discord.post("200", 2, &["b.png"], Some(APPROVER));
    let second = harness.forced().await;

    assert_eq!(ids(&second), vec!["200_2000", "100_1000"]);
    assert_eq!(second.images[1], original);
    assert_eq!(second.stats.as_ref().unwrap().added, 1);
}

#[tokio::test]
async fn vanished_message_is_removed_with_its_asset() {
    let harness = Harness::new();
    harness.discord.post("100", 1, &["a.png"], Some(APPROVER));
    harness.forced().await;
    let old_keys = harness.asset_keys().await;

    harness.discord.delete_all();
    harness.discord.post("200", 2, &["b.png"], Some(APPROVER));
    let response = harness.forced().await;

    assert_eq!(ids(&response), vec!["200_2000"]);
    assert_eq!(response.stats.as_ref().unwrap().removed, 1);
    let keys = harness.asset_keys().await;
    assert!(old_keys.iter().all(|key| !keys.contains(key)));
    assert_eq!(keys.len(), 1);
}

#[tokio::test]
async fn failed_attachment_does_not_block_the_rest() {
    let harness = Harness::new();
    harness
        .discord
        .post("100", 1, &["a.png", "b.png", "c.png"], Some(APPROVER));
    harness.discord.fail_download(&harness.discord.attachment_url("100", 1));

    let response = harness.forced().await;

    assert!(response.success);
    assert_eq!(ids(&response), vec!["100_1000", "100_1002"]);
    assert_eq!(response.stats.as_ref().unwrap().failed_attachments, 1);
    assert_eq!(harness.persisted().await.images.len(), 2);
}

#[tokio::test]
async fn represented_message_is_not_downloaded_again() {
    let harness = Harness::new();
    harness.discord.post("100", 1, &["a.png", "b.png"], Some(APPROVER));
    harness.discord.fail_download(&harness.discord.attachment_url("100", 1));

    let first = harness.forced().await;
    assert_eq!(first.stats.as_ref().unwrap().failed_attachments, 1);
    assert_eq!(harness.discord.downloads.load(Ordering::SeqCst), 2);

    for _ in 0..2 {
        let again = harness.forced().await;
        let stats = again.stats.as_ref().unwrap();
        assert_eq!(stats.failed_attachments, 0);
        assert_eq!(stats.added, 0);
        assert_eq!(ids(&again), vec!["100_1000"]);
    }
    assert_eq!(harness.discord.downloads.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn failed_snapshot_write_serves_last_good_list() {
    let discord = Arc::new(FakeDiscord::default());
    let store = Arc::new(FlakySnapshotStore::default());
    let sync = GallerySynchronizer::new(
        config(),
        Arc::clone(&store) as Arc<dyn ObjectStore>,
        Some(Arc::clone(&discord) as Arc<dyn RemoteSource>),
    );
    let forced = SyncRequest {
        force: true,
        validate: false,
    };

    discord.post("100", 1, &["a.png"], Some(APPROVER));
    let first = sync.sync(forced).await;
    assert!(first.success);
    let kept_key = store.object_key_for_url(&first.images[0].src).unwrap();

    discord.delete_all();
    discord.post("200", 2, &["b.png"], Some(APPROVER));
    store.reject_snapshot.store(true, Ordering::SeqCst);
    let failed = sync.sync(forced).await;

    assert!(!failed.success);
    assert!(failed.from_cache);
    assert!(failed
        .error
        .as_deref()
        .is_some_and(|error| error.contains("persist")));
    assert_eq!(failed.images, first.images);
    assert!(store.inner.keys().await.contains(&kept_key));

    store.reject_snapshot.store(false, Ordering::SeqCst);
    let recovered = sync.sync(forced).await;
    assert!(recovered.success);
    assert_eq!(ids(&recovered), vec!["200_2000"]);
    assert!(!store.inner.keys().await.contains(&kept_key));
}

#[tokio::test]
async fn same_file_names_get_distinct_objects() {
    let harness = Harness::new();
    harness
        .discord
        .post("100", 1, &["photo.png", "photo.png", "photo.png"], Some(APPROVER));

    let response = harness.forced().await;

    let sources: HashSet<&str> = response.images.iter().map(|item| item.src.as_str()).collect();
    assert_eq!(sources.len(), 3);
    assert_eq!(harness.asset_keys().await.len(), 3);
    assert!(harness
        .asset_keys()
        .await
        .iter()
        .all(|key| key.starts_with("gallery/100/") && key.ends_with("-photo.png")));
}

#[tokio::test]
async fn remote_outage_serves_cache_without_deleting() {
    let harness = Harness::new();
    harness.discord.post("100", 1, &["a.png"], Some(APPROVER));
    let first = harness.forced().await;

    harness.discord.listing_fails.store(true, Ordering::SeqCst);
    let failed = harness.forced().await;
    assert!(!failed.success);
    assert!(failed.from_cache);
    assert!(failed.error.is_some());
    assert_eq!(path(&failed), SyncPath::Degraded);
    assert_eq!(failed.images, first.images);

    harness.discord.listing_fails.store(false, Ordering::SeqCst);
    harness.discord.delete_all();
    let empty = harness.forced().await;
    assert!(empty.from_cache);
    assert_eq!(empty.images, first.images);

    assert_eq!(harness.asset_keys().await.len(), 1);
    assert_eq!(harness.persisted().await.images, first.images);
}

#[tokio::test]
async fn orphan_sweep_spares_cache_document_and_referenced_assets() {
    let harness = Harness::new();
    harness.discord.post("100", 1, &["a.png"], Some(APPROVER));
    harness.forced().await;
    let referenced = harness.asset_keys().await;

    harness
        .store
        .put("gallery/999/stray.png", vec![1], "image/png")
        .await
        .unwrap();
    harness
        .store
        .put("unrelated/keep.png", vec![1], "image/png")
        .await
        .unwrap();

    let response = harness
        .sync
        .sync(SyncRequest {
            force: false,
            validate: true,
        })
        .await;

    assert!(response.success);
    assert_eq!(response.stats.as_ref().unwrap().orphans_deleted, 1);
    let keys = harness.store.keys().await;
    assert!(keys.contains(&"gallery.json".to_string()));
    assert!(keys.contains(&"unrelated/keep.png".to_string()));
    assert!(!keys.contains(&"gallery/999/stray.png".to_string()));
    assert!(referenced.iter().all(|key| keys.contains(key)));
}

#[tokio::test]
async fn audit_repairs_missing_assets_and_drops_unrepairable_ones() {
    let harness = Harness::new();
    harness.discord.post("100", 1, &["a.png"], Some(APPROVER));
    harness.discord.post("200", 2, &["b.png"], Some(APPROVER));
    let first = harness.forced().await;

    for key in harness.asset_keys().await {
        harness.store.remove(&key).await;
    }
    harness.discord.fail_download(&harness.discord.attachment_url("200", 0));

    let response = harness
        .sync
        .sync(SyncRequest {
            force: false,
            validate: true,
        })
        .await;

    let stats = response.stats.as_ref().unwrap();
    assert_eq!(stats.path, SyncPath::Audit);
    assert_eq!(stats.repaired, 1);
    assert_eq!(stats.dropped, 1);
    assert_eq!(ids(&response), vec!["100_1000"]);
    assert_ne!(response.images[0].src, first.images[1].src);
    assert_eq!(harness.asset_keys().await.len(), 1);
}

#[tokio::test]
async fn legacy_snapshot_is_upgraded_on_first_sync() {
    let harness = Harness::new();
    harness.discord.post("100", 1, &["a.png"], Some(APPROVER));
    harness
        .store
        .put("gallery/100/legacy-a.png", vec![1], "image/png")
        .await
        .unwrap();
    let legacy = br#"[
        {
            "id": "100_1000",
            "messageId": "100",
            "src": "memory://galleria/gallery/100/legacy-a.png",
            "alt": "Fotka od Jana",
            "title": "Old title",
            "author": "Jana",
            "timestamp": "2024-01-01T12:00:00.000Z",
            "filename": "a.png"
        },
        { "id": "broken" }
    ]"#;
    harness
        .store
        .put("gallery.json", legacy.to_vec(), "application/json")
        .await
        .unwrap();

    let response = harness.sync.sync(SyncRequest::default()).await;

    assert!(response.success);
    assert_eq!(path(&response), SyncPath::FullSync);
    assert_eq!(ids(&response), vec!["100_1000"]);
    assert_eq!(response.images[0].title, "Old title");
    assert_eq!(
        response.images[0].src,
        "memory://galleria/gallery/100/legacy-a.png"
    );

    let persisted = harness.persisted().await;
    assert_eq!(persisted.version, 2);
    assert_eq!(persisted.message_ids, BTreeSet::from(["100".to_string()]));
    assert!(persisted.last_full_sync > 0);
}

#[tokio::test]
async fn concurrent_sync_serves_cache_while_locked() {
    let gate = Arc::new(Notify::new());
    let harness = Harness::build(FakeDiscord::with_gate(Arc::clone(&gate)), config());
    harness.discord.post("100", 1, &["a.png"], Some(APPROVER));

    let running = {
        let sync = Arc::clone(&harness.sync);
        tokio::spawn(async move { sync.sync(SyncRequest::default()).await })
    };
    while !harness.sync.lock_held() {
        tokio::task::yield_now().await;
    }

    let blocked = harness.forced().await;
    assert!(blocked.success);
    assert!(blocked.from_cache);
    assert_eq!(path(&blocked), SyncPath::Locked);
    assert!(blocked.images.is_empty());

    gate.notify_one();
    let finished = running.await.unwrap();
    assert_eq!(path(&finished), SyncPath::FullSync);
    assert_eq!(finished.total_count, 1);
    assert!(!harness.sync.lock_held());
}

#[tokio::test]
async fn quick_check_escalates_only_when_ids_change() {
    let config = SyncConfig {
        quick_check_ttl: Duration::ZERO,
        ..config()
    };
    let harness = Harness::build(FakeDiscord::default(), config);
    harness.discord.post("100", 1, &["a.png"], Some(APPROVER));
    harness.sync.sync(SyncRequest::default()).await;

    let unchanged = harness.sync.sync(SyncRequest::default()).await;
    assert_eq!(path(&unchanged), SyncPath::QuickCheck);
    assert!(unchanged.from_cache);

    harness.discord.post("200", 2, &["b.png"], Some(APPROVER));
    let changed = harness.sync.sync(SyncRequest::default()).await;
    assert_eq!(path(&changed), SyncPath::FullSync);
    assert_eq!(changed.total_count, 2);
}

#[tokio::test]
async fn fresh_snapshot_skips_remote_work() {
    let harness = Harness::new();
    harness.discord.post("100", 1, &["a.png"], Some(APPROVER));
    harness.sync.sync(SyncRequest::default()).await;

    harness.discord.listing_fails.store(true, Ordering::SeqCst);
    let response = harness.sync.sync(SyncRequest::default()).await;

    assert!(response.success);
    assert!(response.from_cache);
    assert_eq!(path(&response), SyncPath::Skip);
    assert_eq!(response.total_count, 1);
}

#[tokio::test]
async fn webhook_reaction_forces_next_sync() {
    let harness = Harness::new();
    harness.discord.post("100", 1, &["a.png"], None);
    let first = harness.sync.sync(SyncRequest::default()).await;
    assert_eq!(first.total_count, 0);

    harness.discord.delete_all();
    harness.discord.post("100", 1, &["a.png"], Some(APPROVER));

    let ignored = WebhookEvent::ReactionAdded(ReactionEvent {
        channel_id: "other".to_string(),
        message_id: "100".to_string(),
        user_id: APPROVER.to_string(),
        emoji: ReactionEmoji {
            id: None,
            name: Some(CROWN.to_string()),
        },
    });
    assert!(!harness.sync.invalidate(&ignored));
    let wrong_emoji = WebhookEvent::ReactionAdded(ReactionEvent {
        channel_id: CHANNEL.to_string(),
        message_id: "100".to_string(),
        user_id: APPROVER.to_string(),
        emoji: ReactionEmoji {
            id: None,
            name: Some("\u{2764}".to_string()),
        },
    });
    assert!(!harness.sync.invalidate(&wrong_emoji));
    assert!(!harness.sync.force_pending());

    let crown = WebhookEvent::ReactionAdded(ReactionEvent {
        channel_id: CHANNEL.to_string(),
        message_id: "100".to_string(),
        user_id: APPROVER.to_string(),
        emoji: ReactionEmoji {
            id: None,
            name: Some(CROWN.to_string()),
        },
    });
    assert!(harness.sync.invalidate(&crown));
    assert!(harness.sync.force_pending());

    let second = harness.sync.sync(SyncRequest::default()).await;
    assert_eq!(path(&second), SyncPath::FullSync);
    assert_eq!(ids(&second), vec!["100_1000"]);
    assert!(!harness.sync.force_pending());
}

#[tokio::test]
async fn message_delete_webhook_forces_next_sync() {
    let harness = Harness::new();
    harness.discord.post("100", 1, &["a.png"], Some(APPROVER));
    harness.sync.sync(SyncRequest::default()).await;

    let event = WebhookEvent::MessageDeleted(MessageEvent {
        channel_id: CHANNEL.to_string(),
        message_id: "100".to_string(),
    });
    assert!(harness.sync.invalidate(&event));
    assert!(!harness.sync.invalidate(&WebhookEvent::Other("TYPING_START".to_string())));

    harness.discord.delete_all();
    harness.discord.post("200", 2, &["b.png"], None);
    let response = harness.sync.sync(SyncRequest::default()).await;
    assert_eq!(path(&response), SyncPath::FullSync);
    assert_eq!(response.total_count, 0);
    assert!(harness.asset_keys().await.is_empty());
}

#[tokio::test]
async fn missing_source_serves_snapshot_with_error() {
    let store = Arc::new(MemoryObjectStore::default());
    let sync = GallerySynchronizer::new(config(), store as Arc<dyn ObjectStore>, None);

    let response = sync.sync(SyncRequest::default()).await;

    assert!(!response.success);
    assert!(response.from_cache);
    assert!(response.images.is_empty());
    assert!(response
        .error
        .as_deref()
        .is_some_and(|error| error.contains("not configured")));
}

#[tokio::test]
async fn reset_reloads_snapshot_and_forces_next_sync() {
    let harness = Harness::new();
    harness.discord.post("100", 1, &["a.png"], Some(APPROVER));
    harness.sync.sync(SyncRequest::default()).await;
    assert_eq!(harness.sync.cached_item_count().await, 1);

    harness.sync.reset().await;
    assert_eq!(harness.sync.cached_item_count().await, 0);
    assert!(harness.sync.force_pending());

    let response = harness.sync.sync(SyncRequest::default()).await;
    assert_eq!(path(&response), SyncPath::FullSync);
    assert_eq!(response.total_count, 1);
}
