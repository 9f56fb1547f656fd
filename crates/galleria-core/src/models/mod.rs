//! Data models for Galleria

mod gallery_item;
mod sync_state;

pub use gallery_item::{derive_title, GalleryItem, ItemLabels};
pub use sync_state::{SnapshotUpgrade, SyncState, SNAPSHOT_SCHEMA_VERSION};
