//! Persisted synchronization snapshot and its versioned loading.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::GalleryItem;
use crate::{Error, Result};

/// Current schema version of the persisted snapshot document.
///
/// Version 1 is the legacy layout: a bare JSON array of items.
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 2;

/// The persisted gallery document.
///
/// Timestamps are Unix milliseconds; zero means "never".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub version: u32,
    /// Items ordered newest first by source timestamp.
    pub images: Vec<GalleryItem>,
    pub last_full_sync: i64,
    pub last_quick_check: i64,
    pub last_asset_audit: i64,
    /// Message ids seen in the most recent remote poll.
    pub message_ids: BTreeSet<String>,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_SCHEMA_VERSION,
            images: Vec::new(),
            last_full_sync: 0,
            last_quick_check: 0,
            last_asset_audit: 0,
            message_ids: BTreeSet::new(),
        }
    }
}

/// Result of decoding a stored document into the current shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotUpgrade {
    pub state: SyncState,
    /// Schema version found in the stored document.
    pub source_version: u32,
    /// Items that could not be decoded and were left out.
    pub dropped_items: usize,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredSnapshot {
    Legacy(Vec<Value>),
    Versioned(VersionedSnapshot),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionedSnapshot {
    #[serde(default)]
    version: Option<u32>,
    #[serde(default)]
    images: Vec<Value>,
    #[serde(default)]
    last_full_sync: i64,
    #[serde(default)]
    last_quick_check: i64,
    #[serde(default)]
    last_asset_audit: i64,
    #[serde(default)]
    message_ids: BTreeSet<String>,
}

impl SyncState {
    /// Decode a stored document, upgrading older layouts in memory.
    ///
    /// Legacy documents keep their items but start with zeroed clocks and no
    /// known message ids, so the next poll always takes the full path.
    pub fn decode(bytes: &[u8]) -> Result<SnapshotUpgrade> {
        let stored: StoredSnapshot = serde_json::from_slice(bytes).map_err(|error| {
            Error::Validation(format!("snapshot is not a gallery document: {error}"))
        })?;

        let mut upgrade = match stored {
            StoredSnapshot::Legacy(raw_items) => {
                let (images, dropped_items) = decode_items(raw_items);
                SnapshotUpgrade {
                    state: Self {
                        images,
                        ..Self::default()
                    },
                    source_version: 1,
                    dropped_items,
                }
            }
            StoredSnapshot::Versioned(document) => {
                let (images, dropped_items) = decode_items(document.images);
                SnapshotUpgrade {
                    state: Self {
                        version: SNAPSHOT_SCHEMA_VERSION,
                        images,
                        last_full_sync: document.last_full_sync,
                        last_quick_check: document.last_quick_check,
                        last_asset_audit: document.last_asset_audit,
                        message_ids: document.message_ids,
                    },
                    source_version: document.version.unwrap_or(SNAPSHOT_SCHEMA_VERSION),
                    dropped_items,
                }
            }
        };

        upgrade.state.sort_images();
        Ok(upgrade)
    }

    /// Sort items newest first; ties are broken by id for stable output.
    pub fn sort_images(&mut self) {
        sort_newest_first(&mut self.images);
    }

    /// Drop items missing identity or location fields, returning how many went.
    pub fn retain_valid_items(&mut self) -> usize {
        let before = self.images.len();
        self.images.retain(GalleryItem::has_required_fields);
        before - self.images.len()
    }

    pub fn has_images(&self) -> bool {
        !self.images.is_empty()
    }
}

/// Order items by source timestamp descending, then by id.
pub(crate) fn sort_newest_first(items: &mut [GalleryItem]) {
    items.sort_by(|left, right| match right.timestamp.cmp(&left.timestamp) {
        Ordering::Equal => left.id.cmp(&right.id),
        other => other,
    });
}

fn decode_items(raw_items: Vec<Value>) -> (Vec<GalleryItem>, usize) {
    let total = raw_items.len();
    let images: Vec<GalleryItem> = raw_items
        .into_iter()
        .filter_map(|raw| serde_json::from_value::<GalleryItem>(raw).ok())
        .filter(GalleryItem::has_required_fields)
        .collect();
    let dropped = total - images.len();
    (images, dropped)
}
