//! Gallery item model

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::discord::{RemoteAttachment, RemoteMessage};

const MAX_TITLE_CHARS: usize = 100;

/// One approved image as served to gallery clients.
///
/// Identity is `"{message_id}_{attachment_id}"`, so a (message, attachment)
/// pair maps to at most one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryItem {
    pub id: String,
    pub message_id: String,
    /// Source attachment id. Absent on items upgraded from the legacy layout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_id: Option<String>,
    /// Public URL of the stored asset.
    pub src: String,
    #[serde(default)]
    pub alt: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

/// Display strings used when deriving item text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemLabels {
    /// Prefix for alt text, followed by the author name.
    pub alt_prefix: String,
    /// Title used when neither content nor filename yield one.
    pub untitled: String,
}

impl Default for ItemLabels {
    fn default() -> Self {
        Self {
            alt_prefix: "Fotka od".to_string(),
            untitled: "Bez názvu".to_string(),
        }
    }
}

impl GalleryItem {
    pub fn compose_id(message_id: &str, attachment_id: &str) -> String {
        format!("{message_id}_{attachment_id}")
    }

    /// Build an item for an attachment that has been stored at `src`.
    pub fn from_attachment(
        message: &RemoteMessage,
        attachment: &RemoteAttachment,
        src: String,
        labels: &ItemLabels,
    ) -> Self {
        let author = message.author.display_name().to_string();
        Self {
            id: Self::compose_id(&message.id, &attachment.id),
            message_id: message.id.clone(),
            attachment_id: Some(attachment.id.clone()),
            src,
            alt: format!("{} {author}", labels.alt_prefix),
            title: derive_title(&message.content, &attachment.filename, &labels.untitled),
            author,
            timestamp: message.timestamp,
            filename: attachment.filename.clone(),
            width: attachment.width,
            height: attachment.height,
        }
    }

    /// Whether the identity and location fields needed to persist are present.
    pub fn has_required_fields(&self) -> bool {
        !self.id.trim().is_empty()
            && !self.message_id.trim().is_empty()
            && !self.src.trim().is_empty()
    }

    /// Source attachment id, recovered from the composite id for legacy items.
    pub fn source_attachment_id(&self) -> Option<&str> {
        if let Some(id) = self.attachment_id.as_deref() {
            return Some(id);
        }
        self.id
            .strip_prefix(self.message_id.as_str())
            .and_then(|rest| rest.strip_prefix('_'))
            .filter(|rest| !rest.is_empty())
    }
}

/// Derive a display title from message content, falling back to the filename.
///
/// URLs, user/role/channel mentions, and `:emoji:` shortcodes are stripped and
/// whitespace is collapsed. Content longer than 100 characters is not used.
pub fn derive_title(content: &str, filename: &str, untitled: &str) -> String {
    let cleaned = title_noise().replace_all(content, " ");
    let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");

    if !cleaned.is_empty() && cleaned.chars().count() <= MAX_TITLE_CHARS {
        return cleaned;
    }

    let stem = filename.split('.').next().unwrap_or_default().trim();
    if stem.is_empty() {
        untitled.to_string()
    } else {
        stem.to_string()
    }
}

fn title_noise() -> &'static Regex {
    static NOISE: OnceLock<Regex> = OnceLock::new();
    NOISE.get_or_init(|| {
        Regex::new(r"https?://\S+|<@[!&]?\d+>|<#\d+>|:\w+:").expect("Invalid regex")
    })
}
