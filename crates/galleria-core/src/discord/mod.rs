//! Remote message source: trait seam plus the Discord REST implementation.

mod client;

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::Result;

pub use client::DiscordClient;

/// Read-only view of the gallery channel and its guild.
///
/// `NotFound` errors are definitive answers (no such member, no reactions);
/// every other error is a failure of the source itself.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Guild whose roles decide approval.
    fn guild_id(&self) -> &str;

    /// Channel mirrored into the gallery.
    fn channel_id(&self) -> &str;

    /// Most recent messages of the gallery channel.
    async fn list_messages(&self) -> Result<Vec<RemoteMessage>>;

    /// Ids of the most recent messages; the cheap change-detection probe.
    async fn list_message_ids(&self) -> Result<BTreeSet<String>> {
        Ok(self
            .list_messages()
            .await?
            .into_iter()
            .map(|message| message.id)
            .collect())
    }

    /// Ids of users who reacted to a message with `emoji`.
    async fn reaction_users(&self, message_id: &str, emoji: &str) -> Result<Vec<String>>;

    /// Role ids held by a guild member.
    async fn member_roles(&self, user_id: &str) -> Result<Vec<String>>;

    /// A single message of the gallery channel.
    async fn fetch_message(&self, message_id: &str) -> Result<RemoteMessage>;

    /// Raw attachment bytes and the declared content type.
    async fn download(&self, url: &str) -> Result<DownloadedAsset>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RemoteMessage {
    pub id: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub content: String,
    pub author: RemoteAuthor,
    #[serde(default)]
    pub attachments: Vec<RemoteAttachment>,
    #[serde(default)]
    pub reactions: Vec<RemoteReaction>,
    pub timestamp: DateTime<Utc>,
}

impl RemoteMessage {
    pub fn image_attachments(&self) -> impl Iterator<Item = &RemoteAttachment> {
        self.attachments.iter().filter(|attachment| attachment.is_image())
    }

    pub fn has_image_attachment(&self) -> bool {
        self.image_attachments().next().is_some()
    }

    /// Reaction count for `emoji` from the summary embedded in the message.
    pub fn reaction_count(&self, emoji: &str) -> u32 {
        self.reactions
            .iter()
            .filter(|reaction| reaction.emoji.matches(emoji))
            .map(|reaction| reaction.count)
            .sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RemoteAuthor {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub global_name: Option<String>,
}

impl RemoteAuthor {
    /// Global display name, falling back to the username.
    pub fn display_name(&self) -> &str {
        self.global_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.username)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RemoteAttachment {
    pub id: String,
    pub filename: String,
    #[serde(default)]
    pub size: u64,
    pub url: String,
    #[serde(default)]
    pub proxy_url: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub content_type: Option<String>,
}

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "avif", "bmp"];

impl RemoteAttachment {
    /// Whether the attachment is an image, by declared type or extension.
    pub fn is_image(&self) -> bool {
        if let Some(content_type) = self.content_type.as_deref() {
            return content_type.trim().to_ascii_lowercase().starts_with("image/");
        }
        self.filename
            .rsplit_once('.')
            .is_some_and(|(_, ext)| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RemoteReaction {
    pub emoji: ReactionEmoji,
    #[serde(default)]
    pub count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ReactionEmoji {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl ReactionEmoji {
    /// Matches a unicode emoji by name or a custom emoji by `name:id`.
    pub fn matches(&self, emoji: &str) -> bool {
        let Some(name) = self.name.as_deref() else {
            return false;
        };
        match self.id.as_deref() {
            Some(id) => emoji == format!("{name}:{id}") || emoji == name,
            None => emoji == name,
        }
    }
}

/// Attachment payload as served by the CDN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedAsset {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const MESSAGE: &str = r#"{
        "id": "1200",
        "channel_id": "42",
        "content": "look",
        "author": {"id": "9", "username": "pepa", "discriminator": "0", "avatar": null, "global_name": null},
        "attachments": [
            {"id": "1", "filename": "a.png", "size": 10, "url": "https://cdn/a.png", "proxy_url": "https://media/a.png", "width": 4, "height": 3, "content_type": "image/png"},
            {"id": "2", "filename": "notes.txt", "size": 10, "url": "https://cdn/notes.txt", "proxy_url": "https://media/notes.txt", "content_type": "text/plain"}
        ],
        "reactions": [
            {"emoji": {"id": null, "name": "👑"}, "count": 2, "me": false},
            {"emoji": {"id": "77", "name": "pog"}, "count": 5, "me": false}
        ],
        "timestamp": "2024-06-01T12:30:00.123000+00:00"
    }"#;

    #[test]
    fn message_payload_deserializes() {
        let message: RemoteMessage = serde_json::from_str(MESSAGE).unwrap();
        assert_eq!(message.author.display_name(), "pepa");
        assert_eq!(message.image_attachments().count(), 1);
        assert_eq!(message.reaction_count("👑"), 2);
        assert_eq!(message.reaction_count("pog:77"), 5);
        assert_eq!(message.reaction_count("🔥"), 0);
    }

    #[test]
    fn message_without_reactions_field_has_zero_count() {
        let message: RemoteMessage = serde_json::from_str(
            r#"{"id":"1","author":{"id":"2","username":"u"},"timestamp":"2024-06-01T12:30:00Z"}"#,
        )
        .unwrap();
        assert_eq!(message.reaction_count("👑"), 0);
        assert!(!message.has_image_attachment());
    }

    #[test]
    fn attachment_without_content_type_uses_extension() {
        let attachment = RemoteAttachment {
            filename: "PHOTO.JPEG".to_string(),
            ..RemoteAttachment::default()
        };
        assert!(attachment.is_image());
        let attachment = RemoteAttachment {
            filename: "clip.mp4".to_string(),
            ..RemoteAttachment::default()
        };
        assert!(!attachment.is_image());
    }
}
