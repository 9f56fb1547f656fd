//! Cloudflare R2 object store for gallery assets.

use std::env;
use std::fmt;

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::{primitives::ByteStream, Client};
use aws_types::region::Region;

use super::{key_under_base, normalize_object_key, ObjectStore, StoredObject};
use crate::{Error, Result};

const ENV_ACCOUNT_ID: &str = "R2_ACCOUNT_ID";
const ENV_BUCKET: &str = "R2_BUCKET";
const ENV_ACCESS_KEY_ID: &str = "R2_ACCESS_KEY_ID";
const ENV_SECRET_ACCESS_KEY: &str = "R2_SECRET_ACCESS_KEY";
const ENV_PUBLIC_BASE_URL: &str = "R2_PUBLIC_BASE_URL";

const LIST_PAGE_SIZE: usize = 1_000;

/// Cloudflare R2 configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct R2Config {
    /// Cloudflare account identifier.
    pub account_id: String,
    /// R2 bucket name.
    pub bucket: String,
    /// Access key id for S3-compatible auth.
    pub access_key_id: String,
    /// Secret access key for S3-compatible auth.
    pub secret_access_key: String,
    /// Public URL base the bucket is served from.
    pub public_base_url: String,
}

impl fmt::Debug for R2Config {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("R2Config")
            .field("account_id", &self.account_id)
            .field("bucket", &self.bucket)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .field("public_base_url", &self.public_base_url)
            .finish()
    }
}

impl R2Config {
    /// Load R2 configuration from environment variables.
    ///
    /// Returns `Ok(None)` when no R2 variables are set.
    /// Returns an error when only a partial configuration is provided.
    pub fn from_env() -> Result<Option<Self>> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Option<Self>> {
        parse_config(lookup)
    }

    /// Cloudflare R2 S3-compatible endpoint URL.
    #[must_use]
    pub fn endpoint_url(&self) -> String {
        format!("https://{}.r2.cloudflarestorage.com", self.account_id)
    }
}

/// R2-backed object store.
#[derive(Clone, Debug)]
pub struct R2ObjectStore {
    config: R2Config,
    client: Client,
}

impl R2ObjectStore {
    pub fn new(config: R2Config) -> Self {
        let client = build_s3_client(&config);
        Self { config, client }
    }

    /// Check that the configured bucket is reachable with current credentials.
    pub async fn bucket_is_reachable(&self) -> Result<()> {
        self.client
            .head_bucket()
            .bucket(&self.config.bucket)
            .send()
            .await
            .map_err(|error| storage_error("head_bucket", &self.config.bucket, None, error))?;
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for R2ObjectStore {
    fn backend_name(&self) -> &str {
        "r2"
    }

    async fn put(
        &self,
        object_key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<StoredObject> {
        let object_key = normalize_object_key(object_key)?;
        let mut request = self
            .client
            .put_object()
            .bucket(&self.config.bucket)
            .key(&object_key)
            .body(ByteStream::from(bytes));

        let content_type = content_type.trim();
        if !content_type.is_empty() {
            request = request.content_type(content_type);
        }

        request.send().await.map_err(|error| {
            storage_error("put_object", &self.config.bucket, Some(&object_key), error)
        })?;

        Ok(StoredObject {
            url: self.public_url(&object_key),
            key: object_key,
        })
    }

    async fn get(&self, object_key: &str) -> Result<Option<Vec<u8>>> {
        let object_key = normalize_object_key(object_key)?;
        if !self.exists(&object_key).await? {
            return Ok(None);
        }

        let response = self
            .client
            .get_object()
            .bucket(&self.config.bucket)
            .key(&object_key)
            .send()
            .await
            .map_err(|error| {
                storage_error("get_object", &self.config.bucket, Some(&object_key), error)
            })?;

        let payload = response.body.collect().await.map_err(|error| {
            storage_error(
                "get_object_body",
                &self.config.bucket,
                Some(&object_key),
                error,
            )
        })?;

        Ok(Some(payload.into_bytes().to_vec()))
    }

    async fn exists(&self, object_key: &str) -> Result<bool> {
        let object_key = normalize_object_key(object_key)?;
        let response = self
            .client
            .list_objects_v2()
            .bucket(&self.config.bucket)
            .prefix(&object_key)
            .max_keys(1)
            .send()
            .await
            .map_err(|error| {
                storage_error(
                    "list_objects_v2",
                    &self.config.bucket,
                    Some(&object_key),
                    error,
                )
            })?;

        Ok(response
            .contents()
            .iter()
            .filter_map(|object| object.key())
            .any(|candidate| candidate == object_key))
    }

    async fn delete_by_url(&self, url: &str) -> Result<()> {
        let object_key = self.object_key_for_url(url).ok_or_else(|| {
            Error::Validation(format!("URL is not served by bucket {}", self.config.bucket))
        })?;

        self.client
            .delete_object()
            .bucket(&self.config.bucket)
            .key(&object_key)
            .send()
            .await
            .map_err(|error| {
                storage_error(
                    "delete_object",
                    &self.config.bucket,
                    Some(&object_key),
                    error,
                )
            })?;

        Ok(())
    }

    async fn list(&self, prefix: &str, limit: usize) -> Result<Vec<StoredObject>> {
        let prefix = prefix.trim().trim_start_matches('/');
        let mut objects = Vec::new();
        let mut continuation: Option<String> = None;

        while objects.len() < limit {
            let page_size = i32::try_from((limit - objects.len()).min(LIST_PAGE_SIZE))
                .unwrap_or(i32::MAX);
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.config.bucket)
                .prefix(prefix)
                .max_keys(page_size)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|error| {
                    storage_error("list_objects_v2", &self.config.bucket, Some(prefix), error)
                })?;

            objects.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|object| object.key())
                    .map(|key| StoredObject {
                        key: key.to_string(),
                        url: self.public_url(key),
                    }),
            );

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        objects.truncate(limit);
        Ok(objects)
    }

    fn public_url(&self, object_key: &str) -> String {
        format!(
            "{}/{}",
            self.config.public_base_url,
            object_key.trim_matches('/')
        )
    }

    fn object_key_for_url(&self, url: &str) -> Option<String> {
        key_under_base(&self.config.public_base_url, url)
    }
}

fn parse_config(lookup: impl Fn(&str) -> Option<String>) -> Result<Option<R2Config>> {
    let account_id = lookup(ENV_ACCOUNT_ID).map(|value| value.trim().to_string());
    let bucket = lookup(ENV_BUCKET).map(|value| value.trim().to_string());
    let access_key_id = lookup(ENV_ACCESS_KEY_ID).map(|value| value.trim().to_string());
    let secret_access_key = lookup(ENV_SECRET_ACCESS_KEY).map(|value| value.trim().to_string());
    let public_base_url = lookup(ENV_PUBLIC_BASE_URL).map(|value| value.trim().to_string());

    let any_present = account_id.is_some()
        || bucket.is_some()
        || access_key_id.is_some()
        || secret_access_key.is_some()
        || public_base_url.is_some();

    if !any_present {
        return Ok(None);
    }

    let present = |value: Option<String>| value.filter(|value| !value.is_empty());
    let account_id = present(account_id);
    let bucket = present(bucket);
    let access_key_id = present(access_key_id);
    let secret_access_key = present(secret_access_key);
    let public_base_url = present(public_base_url);

    let mut missing = Vec::new();
    if account_id.is_none() {
        missing.push(ENV_ACCOUNT_ID);
    }
    if bucket.is_none() {
        missing.push(ENV_BUCKET);
    }
    if access_key_id.is_none() {
        missing.push(ENV_ACCESS_KEY_ID);
    }
    if secret_access_key.is_none() {
        missing.push(ENV_SECRET_ACCESS_KEY);
    }
    if public_base_url.is_none() {
        missing.push(ENV_PUBLIC_BASE_URL);
    }

    let (
        Some(account_id),
        Some(bucket),
        Some(access_key_id),
        Some(secret_access_key),
        Some(public_base_url),
    ) = (
        account_id,
        bucket,
        access_key_id,
        secret_access_key,
        public_base_url,
    )
    else {
        return Err(Error::Config(format!(
            "R2 configuration is incomplete. Missing: {}",
            missing.join(", ")
        )));
    };

    if !public_base_url.starts_with("https://") && !public_base_url.starts_with("http://") {
        return Err(Error::Config(
            "R2_PUBLIC_BASE_URL must start with http:// or https://".to_string(),
        ));
    }

    Ok(Some(R2Config {
        account_id,
        bucket,
        access_key_id,
        secret_access_key,
        public_base_url: public_base_url.trim_end_matches('/').to_string(),
    }))
}

fn build_s3_client(config: &R2Config) -> Client {
    let credentials = Credentials::new(
        config.access_key_id.clone(),
        config.secret_access_key.clone(),
        None,
        None,
        "galleria-r2-storage",
    );

    let sdk_config = aws_sdk_s3::config::Builder::new()
        .region(Region::new("auto"))
        .credentials_provider(credentials)
        .endpoint_url(config.endpoint_url())
        .force_path_style(true)
        .build();

    Client::from_conf(sdk_config)
}

fn storage_error(
    operation: &str,
    bucket: &str,
    object_key: Option<&str>,
    error: impl fmt::Display,
) -> Error {
    let target = object_key.map_or_else(|| bucket.to_string(), |key| format!("{bucket}/{key}"));
    Error::Storage(format!("R2 {operation} failed for {target}: {error}"))
}
