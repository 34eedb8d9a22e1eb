//! Bounded feed retrieval over HTTP.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::error::{IcalSyncError, IcalSyncResult};

const USER_AGENT: &str = concat!("icalsync/", env!("CARGO_PKG_VERSION"));

/// Default cap on a feed body.
pub const DEFAULT_MAX_FEED_BYTES: u64 = 10 * 1024 * 1024;

/// Downloads calendar feeds with a request timeout and a body size cap.
#[derive(Clone)]
pub struct FeedFetcher {
    client: reqwest::Client,
    max_bytes: u64,
}

impl FeedFetcher {
    pub fn new(timeout: Duration, max_bytes: u64) -> IcalSyncResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;

        Ok(FeedFetcher { client, max_bytes })
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Fetch the raw feed body, or fail without returning a partial body.
    pub async fn fetch(&self, feed_url: &str, cancel: &CancellationToken) -> IcalSyncResult<Vec<u8>> {
        let url = feed_request_url(feed_url)?;

        tokio::select! {
            _ = cancel.cancelled() => Err(IcalSyncError::FetchFailed("request cancelled".to_string())),
            result = self.fetch_inner(&url) => result,
        }
    }

    async fn fetch_inner(&self, url: &Url) -> IcalSyncResult<Vec<u8>> {
        let mut response = self.client.get(url.clone()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(IcalSyncError::UnexpectedStatusCode(status.as_u16()));
        }

        let limit = self.max_bytes;
        if response.content_length().is_some_and(|len| len > limit) {
            return Err(IcalSyncError::IcalSizeExceeded { limit });
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if body.len() as u64 + chunk.len() as u64 > limit {
                return Err(IcalSyncError::IcalSizeExceeded { limit });
            }
            body.extend_from_slice(&chunk);
        }

        debug!(url = %url, bytes = body.len(), "Fetched feed");
        Ok(body)
    }
}

/// The URL a feed is actually requested from.
///
/// Subscription links often use `webcal://` (plain HTTP underneath) or
/// `webcals://` (HTTPS). Anything else that is not HTTP(S) is refused.
pub fn feed_request_url(feed_url: &str) -> IcalSyncResult<Url> {
    let trimmed = feed_url.trim();
    let rewritten = match trimmed.split_once("://") {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("webcal") => format!("http://{rest}"),
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("webcals") => format!("https://{rest}"),
        _ => trimmed.to_string(),
    };

    let url = Url::parse(&rewritten)
        .map_err(|e| IcalSyncError::FetchFailed(format!("invalid feed URL '{feed_url}': {e}")))?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(IcalSyncError::FetchFailed(format!(
            "unsupported feed URL scheme '{other}'"
        ))),
    }
}
