use std::future::Future;

use async_trait::async_trait;
use reqwest::{header, Response, StatusCode};
use serde::Deserialize;

use super::{DownloadedAsset, RemoteMessage, RemoteSource};
use crate::config::DiscordConfig;
use crate::util::{compact_text, sanitize};
use crate::{Error, Result};

const REACTION_PAGE_LIMIT: usize = 100;

/// Discord REST API v10 client scoped to one guild and channel.
#[derive(Debug, Clone)]
pub struct DiscordClient {
    client: reqwest::Client,
    config: DiscordConfig,
}

#[derive(Debug, Deserialize)]
struct ReactionUser {
    id: String,
}

#[derive(Debug, Deserialize)]
struct GuildMember {
    #[serde(default)]
    roles: Vec<String>,
}

impl DiscordClient {
    pub fn new(config: DiscordConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("galleria/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|error| Error::Config(format!("HTTP client setup failed: {}", sanitize(&error))))?;
        Ok(Self { client, config })
    }

    fn channel_url(&self, path: &str) -> String {
        format!(
            "{}/channels/{}{path}",
            self.config.api_url, self.config.channel_id
        )
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        what: &str,
    ) -> Result<T> {
        let response = self
            .client
            .get(url)
            .header(header::AUTHORIZATION, format!("Bot {}", self.config.bot_token))
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|error| transport_error(what, &error))?;
        let response = check_status(response, what).await?;
        response.json::<T>().await.map_err(|error| {
            Error::Validation(format!("{what} parse failed: {}", sanitize(&error)))
        })
    }
}

#[async_trait]
impl RemoteSource for DiscordClient {
    fn guild_id(&self) -> &str {
        &self.config.guild_id
    }

    fn channel_id(&self) -> &str {
        &self.config.channel_id
    }

    async fn list_messages(&self) -> Result<Vec<RemoteMessage>> {
        let url = self.channel_url(&format!("/messages?limit={}", self.config.message_limit));
        self.get_json(&url, "message list").await
    }

    async fn reaction_users(&self, message_id: &str, emoji: &str) -> Result<Vec<String>> {
        let path = format!(
            "/messages/{message_id}/reactions/{}",
            urlencoding::encode(emoji)
        );
        collect_pages(REACTION_PAGE_LIMIT, |after| {
            let url = self.channel_url(&page_query(&path, REACTION_PAGE_LIMIT, after.as_deref()));
            async move {
                let users: Vec<ReactionUser> = self.get_json(&url, "reaction list").await?;
                Ok(users.into_iter().map(|user| user.id).collect())
            }
        })
        .await
    }

    async fn member_roles(&self, user_id: &str) -> Result<Vec<String>> {
        let url = format!(
            "{}/guilds/{}/members/{user_id}",
            self.config.api_url, self.config.guild_id
        );
        let member: GuildMember = self.get_json(&url, "guild member").await?;
        Ok(member.roles)
    }

    async fn fetch_message(&self, message_id: &str) -> Result<RemoteMessage> {
        let url = self.channel_url(&format!("/messages/{message_id}"));
        self.get_json(&url, "message").await
    }

    async fn download(&self, url: &str) -> Result<DownloadedAsset> {
        let response = self
            .client
            .get(url)
            .timeout(self.config.download_timeout)
            .send()
            .await
            .map_err(|error| transport_error("attachment download", &error))?;
        let response = check_status(response, "attachment download").await?;

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToOwned::to_owned);
        let bytes = response
            .bytes()
            .await
            .map_err(|error| transport_error("attachment body", &error))?;

        Ok(DownloadedAsset {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}

async fn check_status(response: Response, what: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, what, &body))
}

fn status_error(status: StatusCode, what: &str, body: &str) -> Error {
    if status == StatusCode::NOT_FOUND {
        return Error::NotFound(what.to_string());
    }
    let detail = compact_text(body);
    let message = if detail.is_empty() {
        format!("{what} request failed")
    } else {
        format!("{what} request failed: {detail}")
    };
    Error::remote(Some(status.as_u16()), message)
}

fn page_query(path: &str, limit: usize, after: Option<&str>) -> String {
    match after {
        Some(after) => format!("{path}?limit={limit}&after={after}"),
        None => format!("{path}?limit={limit}"),
    }
}

/// Follow `after` cursors (the last id of each page) until a short page.
async fn collect_pages<F, Fut>(page_limit: usize, mut fetch_page: F) -> Result<Vec<String>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Vec<String>>>,
{
    let mut ids = Vec::new();
    let mut after = None;
    loop {
        let page = fetch_page(after.take()).await?;
        let exhausted = page.len() < page_limit;
        after = page.last().cloned();
        ids.extend(page);
        if exhausted || after.is_none() {
            return Ok(ids);
        }
    }
}

fn transport_error(what: &str, error: &reqwest::Error) -> Error {
    let kind = if error.is_timeout() { "timed out" } else { "failed" };
    Error::remote(None, format!("{what} {kind}: {}", sanitize(error)))
}
