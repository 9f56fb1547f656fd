//! Approval resolution: marker reactions plus reactor role membership.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::discord::{RemoteMessage, RemoteSource};
use crate::{Error, Result};

/// Approval decision for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Approval {
    Approved,
    Rejected,
    /// The remote source failed before a decision could be made.
    Unknown,
}

#[derive(Debug, Clone, Copy)]
struct CachedApproval {
    approved: bool,
    checked_at: Instant,
}

enum CacheLookup {
    Fresh(bool),
    Stale(bool),
    Miss,
}

/// Process-lifetime cache of (user, guild) role-approval lookups.
#[derive(Debug)]
pub struct RoleApprovalCache {
    entries: Mutex<HashMap<(String, String), CachedApproval>>,
    ttl: Duration,
}

impl RoleApprovalCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Whether `user_id` holds any of `approved_roles` in the source's guild.
    ///
    /// Fresh cache entries answer directly. A missing member is a definitive
    /// "no". When the lookup fails, an expired entry is used as a fallback.
    pub async fn is_approved(
        &self,
        source: &dyn RemoteSource,
        user_id: &str,
        approved_roles: &BTreeSet<String>,
    ) -> Result<bool> {
        let key = (user_id.to_string(), source.guild_id().to_string());
        let fallback = match self.lookup(&key) {
            CacheLookup::Fresh(approved) => return Ok(approved),
            CacheLookup::Stale(approved) => Some(approved),
            CacheLookup::Miss => None,
        };

        match source.member_roles(user_id).await {
            Ok(roles) => {
                let approved = roles.iter().any(|role| approved_roles.contains(role));
                self.store(key, approved);
                Ok(approved)
            }
            Err(Error::NotFound(_)) => {
                self.store(key, false);
                Ok(false)
            }
            Err(error) => match fallback {
                Some(approved) => {
                    tracing::warn!(
                        user_id,
                        approved,
                        error = %error,
                        "Role lookup failed; using expired cache entry"
                    );
                    Ok(approved)
                }
                None => Err(error),
            },
        }
    }

    /// Drop cached lookups for one user.
    pub fn evict_user(&self, user_id: &str) {
        self.entries_guard().retain(|(user, _), _| user != user_id);
    }

    pub fn clear(&self) {
        self.entries_guard().clear();
    }

    pub fn len(&self) -> usize {
        self.entries_guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, key: &(String, String)) -> CacheLookup {
        match self.entries_guard().get(key) {
            Some(entry) if entry.checked_at.elapsed() < self.ttl => {
                CacheLookup::Fresh(entry.approved)
            }
            Some(entry) => CacheLookup::Stale(entry.approved),
            None => CacheLookup::Miss,
        }
    }

    fn store(&self, key: (String, String), approved: bool) {
        self.entries_guard().insert(
            key,
            CachedApproval {
                approved,
                checked_at: Instant::now(),
            },
        );
    }

    fn entries_guard(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<(String, String), CachedApproval>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Decide whether a message is approved.
///
/// Messages without images or without any marker reaction are rejected
/// without remote calls. Otherwise reactors are checked in order and the
/// first approved one wins.
pub async fn resolve_message_approval(
    source: &dyn RemoteSource,
    roles: &RoleApprovalCache,
    message: &RemoteMessage,
    emoji: &str,
    approved_roles: &BTreeSet<String>,
) -> Approval {
    if !message.has_image_attachment() || message.reaction_count(emoji) == 0 {
        return Approval::Rejected;
    }

    let reactors = match source.reaction_users(&message.id, emoji).await {
        Ok(users) => users,
        Err(Error::NotFound(_)) => return Approval::Rejected,
        Err(error) => {
            tracing::warn!(message_id = %message.id, error = %error, "Reaction lookup failed");
            return Approval::Unknown;
        }
    };

    let mut undecided = false;
    for user_id in &reactors {
        match roles.is_approved(source, user_id, approved_roles).await {
            Ok(true) => return Approval::Approved,
            Ok(false) => {}
            Err(error) => {
                tracing::warn!(
                    message_id = %message.id,
                    user_id = %user_id,
                    error = %error,
                    "Member lookup failed"
                );
                undecided = true;
            }
        }
    }

    if undecided {
        Approval::Unknown
    } else {
        Approval::Rejected
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::discord::{
        DownloadedAsset, ReactionEmoji, RemoteAttachment, RemoteReaction,
    };

    #[derive(Default)]
    struct RoleSource {
        roles: HashMap<String, Vec<String>>,
        reactors: Vec<String>,
        failing: bool,
        member_calls: AtomicUsize,
        reaction_calls: AtomicUsize,
    }

    #[async_trait]
    impl RemoteSource for RoleSource {
        fn guild_id(&self) -> &str {
            "guild"
        }

        fn channel_id(&self) -> &str {
            "channel"
        }

        async fn list_messages(&self) -> Result<Vec<RemoteMessage>> {
            Ok(Vec::new())
        }

        async fn reaction_users(&self, _: &str, _: &str) -> Result<Vec<String>> {
            self.reaction_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.reactors.clone())
        }

        async fn member_roles(&self, user_id: &str) -> Result<Vec<String>> {
            self.member_calls.fetch_add(1, Ordering::SeqCst);
            if self.failing {
                return Err(Error::remote(Some(500), "boom"));
            }
            self.roles
                .get(user_id)
                .cloned()
                .ok_or_else(|| Error::NotFound("guild member".to_string()))
        }

        async fn fetch_message(&self, _: &str) -> Result<RemoteMessage> {
            Err(Error::NotFound("message".to_string()))
        }

        async fn download(&self, _: &str) -> Result<DownloadedAsset> {
            Err(Error::NotFound("attachment".to_string()))
        }
    }

    fn approved_roles() -> BTreeSet<String> {
        ["owner".to_string()].into_iter().collect()
    }

    fn image_message(crowns: u32) -> RemoteMessage {
        RemoteMessage {
            id: "100".to_string(),
            attachments: vec![RemoteAttachment {
                id: "1".to_string(),
                filename: "a.png".to_string(),
                content_type: Some("image/png".to_string()),
                ..RemoteAttachment::default()
            }],
            reactions: vec![RemoteReaction {
                emoji: ReactionEmoji {
                    id: None,
                    name: Some("👑".to_string()),
                },
                count: crowns,
            }],
            ..RemoteMessage::default()
        }
    }

    #[tokio::test]
    async fn cache_answers_repeat_lookups() {
        let mut source = RoleSource::default();
        source.roles.insert("u1".to_string(), vec!["owner".to_string()]);
        let cache = RoleApprovalCache::new(Duration::from_secs(60));

        assert!(cache.is_approved(&source, "u1", &approved_roles()).await.unwrap());
        assert!(cache.is_approved(&source, "u1", &approved_roles()).await.unwrap());
        assert_eq!(source.member_calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn missing_member_is_cached_negative() {
        let source = RoleSource::default();
        let cache = RoleApprovalCache::new(Duration::from_secs(60));
        assert!(!cache.is_approved(&source, "ghost", &approved_roles()).await.unwrap());
        assert!(!cache.is_approved(&source, "ghost", &approved_roles()).await.unwrap());
        assert_eq!(source.member_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_entry_is_fallback_on_failure() {
        let mut source = RoleSource::default();
        source.roles.insert("u1".to_string(), vec!["owner".to_string()]);
        let cache = RoleApprovalCache::new(Duration::ZERO);
        assert!(cache.is_approved(&source, "u1", &approved_roles()).await.unwrap());

        source.failing = true;
        assert!(cache.is_approved(&source, "u1", &approved_roles()).await.unwrap());
        assert!(cache.is_approved(&source, "u2", &approved_roles()).await.is_err());
    }

    #[tokio::test]
    async fn evict_user_forces_fresh_lookup() {
        let mut source = RoleSource::default();
        source.roles.insert("u1".to_string(), vec!["owner".to_string()]);
        let cache = RoleApprovalCache::new(Duration::from_secs(60));
        cache.is_approved(&source, "u1", &approved_roles()).await.unwrap();
        cache.evict_user("u1");
        assert!(cache.is_empty());
        cache.is_approved(&source, "u1", &approved_roles()).await.unwrap();
        assert_eq!(source.member_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn message_without_marker_skips_remote_calls() {
        let source = RoleSource::default();
        let cache = RoleApprovalCache::new(Duration::from_secs(60));
        let approval =
            resolve_message_approval(&source, &cache, &image_message(0), "👑", &approved_roles())
                .await;
        assert_eq!(approval, Approval::Rejected);
        assert_eq!(source.reaction_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn first_approved_reactor_short_circuits() {
        let mut source = RoleSource::default();
        source.reactors = vec!["admin".to_string(), "other".to_string()];
        source.roles.insert("admin".to_string(), vec!["owner".to_string()]);
        let cache = RoleApprovalCache::new(Duration::from_secs(60));

        let approval =
            resolve_message_approval(&source, &cache, &image_message(2), "👑", &approved_roles())
                .await;
        assert_eq!(approval, Approval::Approved);
        assert_eq!(source.member_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_lookups_leave_approval_unknown() {
        let source = RoleSource {
            reactors: vec!["someone".to_string()],
            failing: true,
            ..RoleSource::default()
        };
        let cache = RoleApprovalCache::new(Duration::from_secs(60));
        let approval =
            resolve_message_approval(&source, &cache, &image_message(1), "👑", &approved_roles())
                .await;
        assert_eq!(approval, Approval::Unknown);
    }
}
