use super::types::*;
use super::FeedSource;
use crate::config::{NeynarConfig, MAX_LAST_N};
use crate::retry::RetryPolicy;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

const CASTS_PATH: &str = "/v2/farcaster/feed/user/casts";

/// Longest response body excerpt carried in an error message.
const ERROR_BODY_LIMIT: usize = 200;

pub struct NeynarFeed {
    client: Client,
    api_key: String,
    base_url: String,
    retry: RetryPolicy,
}

impl NeynarFeed {
    pub fn new(api_key: String, config: &NeynarConfig, retry: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .context("failed to build Neynar HTTP client")?;
        Ok(Self {
            client,
            api_key,
            base_url: config.api_base.trim_end_matches('/').to_string(),
            retry,
        })
    }

    async fn fetch_once(&self, fid: u64, limit: u32) -> Result<Vec<Post>, FeedError> {
        let url = format!("{}{}", self.base_url, CASTS_PATH);
        tracing::debug!(fid, limit, "fetching casts");

        let resp = self
            .client
            .get(&url)
            .header("accept", "application/json")
            .header("x-api-key", &self.api_key)
            .query(&[("fid", fid.to_string()), ("limit", limit.to_string())])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let excerpt: String = body.chars().take(ERROR_BODY_LIMIT).collect();
            return Err(FeedError::Protocol(format!(
                "Neynar HTTP {} for fid {}: {}",
                status, fid, excerpt
            )));
        }

        let body: serde_json::Value = resp.json().await?;
        let posts = decode_casts(body);
        tracing::debug!(fid, count = posts.len(), "received casts");
        Ok(posts)
    }
}

#[async_trait]
impl FeedSource for NeynarFeed {
    async fn fetch_latest(&mut self, fid: u64, limit: u32) -> Result<Vec<Post>, FeedError> {
        let limit = if (1..=MAX_LAST_N).contains(&limit) {
            limit
        } else {
            let clamped = limit.clamp(1, MAX_LAST_N);
            tracing::warn!(limit, clamped, "cast limit out of bounds");
            clamped
        };

        let result = self
            .retry
            .run("neynar", || self.fetch_once(fid, limit), FeedError::is_transient)
            .await;
        if let Err(ref e) = result {
            tracing::error!(fid, error = %e, "failed to fetch casts");
        }
        result
    }
}

/// Pull posts out of a casts response body.
/// A missing or non-list `casts` field yields no posts rather than an error.
pub fn decode_casts(body: serde_json::Value) -> Vec<Post> {
    let casts = match body {
        serde_json::Value::Object(mut map) => map.remove("casts"),
        _ => None,
    };
    let items = match casts {
        Some(serde_json::Value::Array(items)) => items,
        Some(_) => {
            tracing::warn!("'casts' field is not a list in response");
            return Vec::new();
        }
        None => {
            tracing::warn!("response has no 'casts' field");
            return Vec::new();
        }
    };

    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<NeynarCast>(item) {
            Ok(cast) => {
                let post = cast.into_post();
                if post.is_none() {
                    tracing::debug!("skipping cast without hash");
                }
                post
            }
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed cast");
                None
            }
        })
        .collect()
}
