//! In-process object store for local development and tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{key_under_base, normalize_object_key, ObjectStore, StoredObject};
use crate::Result;

#[derive(Debug, Clone)]
struct MemoryObject {
    bytes: Vec<u8>,
    content_type: String,
}

/// Object store kept entirely in memory. Contents vanish with the process.
#[derive(Debug)]
pub struct MemoryObjectStore {
    base_url: String,
    objects: RwLock<BTreeMap<String, MemoryObject>>,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new("memory://galleria")
    }
}

impl MemoryObjectStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            objects: RwLock::new(BTreeMap::new()),
        }
    }

    /// Keys currently stored, in lexical order.
    pub async fn keys(&self) -> Vec<String> {
        self.objects.read().await.keys().cloned().collect()
    }

    pub async fn content_type(&self, object_key: &str) -> Option<String> {
        self.objects
            .read()
            .await
            .get(object_key)
            .map(|object| object.content_type.clone())
    }

    /// Remove an object without going through its URL, simulating loss.
    pub async fn remove(&self, object_key: &str) -> bool {
        self.objects.write().await.remove(object_key).is_some()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn backend_name(&self) -> &str {
        "memory"
    }

    async fn put(
        &self,
        object_key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<StoredObject> {
        let object_key = normalize_object_key(object_key)?;
        self.objects.write().await.insert(
            object_key.clone(),
            MemoryObject {
                bytes,
                content_type: content_type.trim().to_string(),
            },
        );
        Ok(StoredObject {
            url: self.public_url(&object_key),
            key: object_key,
        })
    }

    async fn get(&self, object_key: &str) -> Result<Option<Vec<u8>>> {
        let object_key = normalize_object_key(object_key)?;
        Ok(self
            .objects
            .read()
            .await
            .get(&object_key)
            .map(|object| object.bytes.clone()))
    }

    async fn exists(&self, object_key: &str) -> Result<bool> {
        let object_key = normalize_object_key(object_key)?;
        Ok(self.objects.read().await.contains_key(&object_key))
    }

    async fn delete_by_url(&self, url: &str) -> Result<()> {
        if let Some(object_key) = self.object_key_for_url(url) {
            self.objects.write().await.remove(&object_key);
        }
        Ok(())
    }

    async fn list(&self, prefix: &str, limit: usize) -> Result<Vec<StoredObject>> {
        let prefix = prefix.trim().trim_start_matches('/');
        Ok(self
            .objects
            .read()
            .await
            .keys()
            .filter(|key| key.starts_with(prefix))
            .take(limit)
            .map(|key| StoredObject {
                key: key.clone(),
                url: self.public_url(key),
            })
            .collect())
    }

    fn public_url(&self, object_key: &str) -> String {
        format!("{}/{}", self.base_url, object_key.trim_matches('/'))
    }

    fn object_key_for_url(&self, url: &str) -> Option<String> {
        key_under_base(&self.base_url, url)
    }
}
