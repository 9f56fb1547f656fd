//! Object storage abstraction for gallery assets and the snapshot document.

mod memory;
mod r2;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::util::sanitize;
use crate::{Error, Result};

pub use memory::MemoryObjectStore;
pub use r2::{R2Config, R2ObjectStore};

/// An object as addressed in the store and by public clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub url: String,
}

/// Blob store operations the synchronizer depends on.
///
/// Objects are written under caller-chosen keys and served at public URLs;
/// `object_key_for_url` maps a URL back to a key of this store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Human-readable backend name (e.g., "r2", "memory").
    fn backend_name(&self) -> &str;

    /// Write `bytes` under `object_key`, overwriting any existing object.
    async fn put(&self, object_key: &str, bytes: Vec<u8>, content_type: &str)
        -> Result<StoredObject>;

    /// Read an object. Returns `None` when it does not exist.
    async fn get(&self, object_key: &str) -> Result<Option<Vec<u8>>>;

    async fn exists(&self, object_key: &str) -> Result<bool>;

    /// Delete the object served at `url`.
    async fn delete_by_url(&self, url: &str) -> Result<()>;

    /// List up to `limit` objects whose key starts with `prefix`.
    async fn list(&self, prefix: &str, limit: usize) -> Result<Vec<StoredObject>>;

    /// Public URL for a key of this store.
    fn public_url(&self, object_key: &str) -> String;

    /// Key for a URL served by this store, `None` for foreign URLs.
    fn object_key_for_url(&self, url: &str) -> Option<String>;
}

/// Bound a storage call by `timeout`, mapping expiry to a storage error.
pub async fn bounded<T>(
    timeout: Duration,
    operation: &str,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(timeout, call).await.map_err(|elapsed| {
        Error::Storage(format!("{operation} timed out: {}", sanitize(&elapsed)))
    })?
}

pub(crate) fn normalize_object_key(object_key: &str) -> Result<String> {
    let object_key = object_key.trim().trim_matches('/').to_string();
    if object_key.is_empty() {
        return Err(Error::Validation("object_key cannot be empty".to_string()));
    }
    if object_key.split('/').any(|segment| segment == "..") {
        return Err(Error::Validation(
            "object_key must not contain path traversal segments".to_string(),
        ));
    }
    Ok(object_key)
}

/// Strip `base` from `url` and return the remaining key, if any.
pub(crate) fn key_under_base(base: &str, url: &str) -> Option<String> {
    let rest = url.strip_prefix(base)?.strip_prefix('/')?;
    let key = rest.split(['?', '#']).next().unwrap_or_default();
    normalize_object_key(key).ok()
}
