//! Asset lifecycle: import, delete, audit, repair, and orphan sweep.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::discord::{RemoteAttachment, RemoteMessage, RemoteSource};
use crate::models::{GalleryItem, ItemLabels};
use crate::retry::RetryPolicy;
use crate::storage::{bounded, ObjectStore, StoredObject};
use crate::worker::WorkerPool;
use crate::{Error, Result};

/// Stores downloaded attachments and keeps stored assets in line with items.
pub struct AssetManager {
    store: Arc<dyn ObjectStore>,
    retry: RetryPolicy,
    object_prefix: String,
    timeout: Duration,
    labels: ItemLabels,
}

/// Outcome of checking stored assets for existence.
#[derive(Debug, Default)]
pub struct AuditReport {
    /// Items whose asset exists, or whose check failed and were kept as-is.
    pub present: Vec<GalleryItem>,
    pub missing: Vec<GalleryItem>,
}

impl AssetManager {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        retry: RetryPolicy,
        object_prefix: impl Into<String>,
        timeout: Duration,
        labels: ItemLabels,
    ) -> Self {
        Self {
            store,
            retry,
            object_prefix: object_prefix.into(),
            timeout,
            labels,
        }
    }

    /// Download an attachment, store it, and build its gallery item.
    ///
    /// The download is retried on transient failures. The stored object must
    /// be observable before its URL is trusted.
    pub async fn import_attachment(
        &self,
        source: &dyn RemoteSource,
        message: &RemoteMessage,
        attachment: &RemoteAttachment,
    ) -> Result<GalleryItem> {
        let (bytes, content_type) = self
            .retry
            .run("attachment download", move |_| async move {
                let asset = source.download(&attachment.url).await?;
                validate_image(asset.bytes, asset.content_type, attachment)
            })
            .await?;

        let object_key = build_object_key(&self.object_prefix, &message.id, &attachment.filename);
        let stored = bounded(
            self.timeout,
            "asset upload",
            self.store.put(&object_key, bytes, &content_type),
        )
        .await?;
        self.confirm_stored(&stored).await?;

        tracing::info!(
            message_id = %message.id,
            attachment_id = %attachment.id,
            object_key = %stored.key,
            "Stored gallery asset"
        );
        Ok(GalleryItem::from_attachment(
            message,
            attachment,
            stored.url,
            &self.labels,
        ))
    }

    /// Delete the stored assets of `items`, best effort. Returns how many went.
    pub async fn delete_assets(&self, pool: &WorkerPool, items: Vec<GalleryItem>) -> usize {
        let outcomes = pool
            .run(items, |item| async move {
                let result = bounded(
                    self.timeout,
                    "asset delete",
                    self.store.delete_by_url(&item.src),
                )
                .await;
                if let Err(error) = &result {
                    tracing::warn!(item_id = %item.id, error = %error, "Asset delete failed");
                }
                result.is_ok()
            })
            .await;
        outcomes.into_iter().filter(|deleted| *deleted).count()
    }

    /// Check every item's asset for existence.
    ///
    /// Items whose URL is not served by this store count as missing so they
    /// get re-imported. A failed check keeps the item.
    pub async fn audit(&self, pool: &WorkerPool, items: Vec<GalleryItem>) -> AuditReport {
        let checks = pool
            .run(items, |item| async move {
                let exists = match self.store.object_key_for_url(&item.src) {
                    Some(key) => {
                        bounded(self.timeout, "asset audit", self.store.exists(&key)).await
                    }
                    None => Ok(false),
                };
                (item, exists)
            })
            .await;

        let mut report = AuditReport::default();
        for (item, exists) in checks {
            match exists {
                Ok(true) => report.present.push(item),
                Ok(false) => report.missing.push(item),
                Err(error) => {
                    tracing::warn!(item_id = %item.id, error = %error, "Asset audit check failed");
                    report.present.push(item);
                }
            }
        }
        report
    }

    /// Re-import a missing asset from its source message.
    ///
    /// The attachment is located by its recorded id; filename matching is
    /// only used for items without one.
    pub async fn repair(&self, source: &dyn RemoteSource, item: &GalleryItem) -> Result<GalleryItem> {
        let message = source.fetch_message(&item.message_id).await?;
        let attachment = match item.source_attachment_id() {
            Some(attachment_id) => message
                .attachments
                .iter()
                .find(|attachment| attachment.id == attachment_id),
            None => message
                .attachments
                .iter()
                .find(|attachment| !item.filename.is_empty() && attachment.filename == item.filename),
        }
        .ok_or_else(|| {
            Error::NotFound(format!("source attachment for gallery item {}", item.id))
        })?;

        let repaired = self.import_attachment(source, &message, attachment).await?;
        tracing::info!(item_id = %item.id, src = %repaired.src, "Repaired missing gallery asset");
        Ok(repaired)
    }

    /// Delete stored gallery objects not referenced by `items`.
    ///
    /// Only keys under the asset prefix are considered and the snapshot
    /// document is never touched.
    pub async fn sweep_orphans(
        &self,
        pool: &WorkerPool,
        items: &[GalleryItem],
        cache_key: &str,
        list_limit: usize,
    ) -> Result<usize> {
        let referenced: HashSet<String> = items
            .iter()
            .filter_map(|item| self.store.object_key_for_url(&item.src))
            .collect();

        let listed = bounded(
            self.timeout,
            "orphan listing",
            self.store.list(&format!("{}/", self.object_prefix), list_limit),
        )
        .await?;
        let orphans = select_orphans(listed, &referenced, cache_key);
        if orphans.is_empty() {
            return Ok(0);
        }

        let outcomes = pool
            .run(orphans, |orphan| async move {
                let result = bounded(
                    self.timeout,
                    "orphan delete",
                    self.store.delete_by_url(&orphan.url),
                )
                .await;
                match result {
                    Ok(()) => {
                        tracing::info!(object_key = %orphan.key, "Deleted orphaned asset");
                        true
                    }
                    Err(error) => {
                        tracing::warn!(object_key = %orphan.key, error = %error, "Orphan delete failed");
                        false
                    }
                }
            })
            .await;
        Ok(outcomes.into_iter().filter(|deleted| *deleted).count())
    }

    async fn confirm_stored(&self, stored: &StoredObject) -> Result<()> {
        let exists = bounded(self.timeout, "upload check", self.store.exists(&stored.key)).await?;
        if exists {
            Ok(())
        } else {
            Err(Error::Storage(format!(
                "uploaded object {} is not visible in {} storage",
                stored.key,
                self.store.backend_name()
            )))
        }
    }
}

fn select_orphans(
    listed: Vec<StoredObject>,
    referenced: &HashSet<String>,
    cache_key: &str,
) -> Vec<StoredObject> {
    listed
        .into_iter()
        .filter(|object| object.key != cache_key && !referenced.contains(&object.key))
        .collect()
}

/// Require an image content type and a non-empty body.
fn validate_image(
    bytes: Vec<u8>,
    served_type: Option<String>,
    attachment: &RemoteAttachment,
) -> Result<(Vec<u8>, String)> {
    let content_type = served_type
        .or_else(|| attachment.content_type.clone())
        .map(|value| {
            value
                .split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            Error::Validation(format!("attachment {} has no content type", attachment.id))
        })?;

    if !content_type.starts_with("image/") {
        return Err(Error::Validation(format!(
            "attachment {} is {content_type}, not an image",
            attachment.id
        )));
    }
    if bytes.is_empty() {
        return Err(Error::Validation(format!(
            "attachment {} downloaded empty",
            attachment.id
        )));
    }
    Ok((bytes, content_type))
}

/// Collision-resistant object key: `{prefix}/{message}/{millis}-{uuid}-{file}`.
pub fn build_object_key(prefix: &str, message_id: &str, file_name: &str) -> String {
    let message = sanitize_token(message_id);
    let message = if message.is_empty() {
        "message".to_string()
    } else {
        message
    };
    let ts = Utc::now().timestamp_millis();
    let id = Uuid::now_v7();
    format!(
        "{}/{message}/{ts}-{id}-{}",
        prefix.trim_matches('/'),
        sanitize_file_name(file_name)
    )
}

fn sanitize_file_name(file_name: &str) -> String {
    let trimmed = file_name
        .trim()
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    if trimmed.is_empty() {
        return "file".to_string();
    }

    let (stem, ext) = trimmed
        .rsplit_once('.')
        .map_or((trimmed, ""), |parts| parts);
    let stem = sanitize_token(stem);
    let stem = if stem.is_empty() {
        "file".to_string()
    } else {
        stem
    };
    let ext = sanitize_token(ext);

    if ext.is_empty() {
        stem
    } else {
        format!("{stem}.{ext}")
    }
}

fn sanitize_token(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_dash = false;

    for ch in input.chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }

    out.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn attachment(content_type: Option<&str>) -> RemoteAttachment {
        RemoteAttachment {
            id: "9".to_string(),
            filename: "x.png".to_string(),
            content_type: content_type.map(ToOwned::to_owned),
            ..RemoteAttachment::default()
        }
    }

    #[test]
    fn object_keys_are_sanitized_and_unique() {
        let first = build_object_key("gallery", " 100 ", "My Photo (1).PNG");
        let second = build_object_key("gallery", " 100 ", "My Photo (1).PNG");
        assert!(first.starts_with("gallery/100/"));
        assert!(first.ends_with("-my-photo-1.png"));
        assert_ne!(first, second);
    }

    #[test]
    fn sanitize_file_name_handles_odd_names() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("   "), "file");
        assert_eq!(sanitize_file_name("čau.JPG"), "au.jpg");
        assert_eq!(sanitize_file_name("???.png"), "file.png");
    }

    #[test]
    fn validate_image_prefers_served_content_type() {
        let (bytes, content_type) = validate_image(
            vec![1, 2, 3],
            Some("Image/WebP; charset=binary".to_string()),
            &attachment(Some("image/png")),
        )
        .unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);
        assert_eq!(content_type, "image/webp");
    }

    #[test]
    fn validate_image_rejects_non_images_and_empty_bodies() {
        assert!(matches!(
            validate_image(vec![1], Some("text/html".to_string()), &attachment(None)),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            validate_image(Vec::new(), None, &attachment(Some("image/png"))),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            validate_image(vec![1], None, &attachment(None)),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn select_orphans_spares_cache_and_referenced_keys() {
        let object = |key: &str| StoredObject {
            key: key.to_string(),
            url: format!("memory://galleria/{key}"),
        };
        let referenced: HashSet<String> = ["gallery/1/a.png".to_string()].into_iter().collect();
        let orphans = select_orphans(
            vec![
                object("gallery/1/a.png"),
                object("gallery/2/b.png"),
                object("gallery.json"),
            ],
            &referenced,
            "gallery.json",
        );
        assert_eq!(orphans, vec![object("gallery/2/b.png")]);
    }
}
