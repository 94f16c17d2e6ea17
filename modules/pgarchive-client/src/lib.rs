pub mod error;
pub mod parse;
pub mod types;

pub use error::{ArchiveError, Result};
pub use types::{AttachmentLink, ListingRow, MessagePage, ThreadOption};

use std::time::{Duration, Instant};

use chrono::NaiveDateTime;
use tracing::debug;

const USER_AGENT: &str = concat!("threadmark/", env!("CARGO_PKG_VERSION"));

/// Client for one list of the PostgreSQL mailing-list archive.
pub struct ArchiveClient {
    client: reqwest::Client,
    base_url: String,
    list: String,
}

impl ArchiveClient {
    pub fn new(base_url: &str, list: &str, timeout: Duration) -> Result<Self> {
        let parsed =
            url::Url::parse(base_url).map_err(|e| ArchiveError::InvalidUrl(format!("{base_url}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.cannot_be_a_base() {
            return Err(ArchiveError::InvalidUrl(base_url.to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            list: list.to_string(),
        })
    }

    pub fn list(&self) -> &str {
        &self.list
    }

    /// Listing page of every message posted at or after `since` (minute precision).
    pub fn listing_url(&self, since: NaiveDateTime) -> String {
        format!(
            "{}/list/{}/since/{}",
            self.base_url,
            self.list,
            since.format("%Y%m%d%H%M")
        )
    }

    pub fn message_url(&self, message_id: &str) -> String {
        format!("{}/message-id/{}", self.base_url, message_id)
    }

    /// Fetch one listing page starting at `since`.
    pub async fn listing_since(&self, since: NaiveDateTime) -> Result<Vec<ListingRow>> {
        let url = self.listing_url(since);
        let html = self.get_document(&url).await?;
        parse::parse_listing(&url, &html)
    }

    /// Fetch a message page: its headers, body, attachments and thread selector.
    pub async fn message(&self, message_id: &str) -> Result<MessagePage> {
        let url = self.message_url(message_id);
        let html = self.get_document(&url).await?;
        parse::parse_message(&url, message_id, &html)
    }

    async fn get_document(&self, url: &str) -> Result<String> {
        let started = Instant::now();
        let resp = self.client.get(url).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ArchiveError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body = resp.text().await?;
        debug!(
            url,
            bytes = body.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Fetched archive page"
        );
        Ok(body)
    }
}
