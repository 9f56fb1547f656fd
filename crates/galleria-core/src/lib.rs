//! galleria-core - Core library for Galleria
//!
//! Mirrors approved image attachments of a Discord channel into object
//! storage and keeps a persisted gallery snapshot in sync with the channel.
//! The HTTP surface lives in `galleria-api`; everything it needs is here.

pub mod approval;
pub mod assets;
pub mod config;
pub mod discord;
pub mod error;
pub mod lock;
pub mod models;
pub mod retry;
pub mod snapshot;
pub mod storage;
pub mod sync;
pub mod util;
pub mod worker;

pub use config::SyncConfig;
pub use error::{Error, Result};
pub use models::{GalleryItem, SyncState};
pub use sync::{GalleryResponse, GallerySynchronizer, SyncRequest, SyncStats, WebhookEvent};
