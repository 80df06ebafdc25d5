// src/crawler.rs
//! Hot-list crawler boundary plus the HTTP fetcher for NewsNow-style aggregation APIs.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use metrics::counter;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// One platform to crawl.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl Platform {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// Raw listing metadata for one title as returned by a platform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawItem {
    pub ranks: Vec<u32>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub mobile_url: String,
}

/// Everything one crawl cycle produced.
#[derive(Debug, Clone, Default)]
pub struct CrawlOutcome {
    /// platform id -> raw title -> item
    pub results: BTreeMap<String, BTreeMap<String, RawItem>>,
    pub id_to_name: BTreeMap<String, String>,
    pub failed_ids: Vec<String>,
}

#[async_trait]
pub trait Crawler: Send + Sync {
    /// Fetch every platform. Never fails as a whole: unreachable platforms end up in
    /// `failed_ids`.
    async fn crawl(&self, platforms: &[Platform], interval_ms: u64) -> CrawlOutcome;
}

pub const DEFAULT_API_URL: &str = "https://newsnow.busiyi.world/api/s";

#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: String,
    #[serde(default)]
    items: Vec<ApiItem>,
}

#[derive(Debug, Deserialize)]
struct ApiItem {
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default, rename = "mobileUrl")]
    mobile_url: Option<String>,
}

/// Fetches `{api_url}?id=<platform>&latest` for each platform.
pub struct NewsNowFetcher {
    client: Client,
    api_url: String,
    max_retries: u8,
}

impl NewsNowFetcher {
    pub fn new(api_url: impl Into<String>, timeout: Duration, proxy: Option<&str>) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(timeout)
            .user_agent("Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko)");
        if let Some(p) = proxy.filter(|p| !p.is_empty()) {
            builder = builder.proxy(reqwest::Proxy::all(p).context("invalid crawler proxy url")?);
        }
        Ok(Self {
            client: builder.build().context("build crawler http client")?,
            api_url: api_url.into(),
            max_retries: 2,
        })
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries;
        self
    }

    async fn fetch_platform(&self, platform_id: &str) -> Result<BTreeMap<String, RawItem>> {
        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            match self.fetch_once(platform_id).await {
                Ok(items) => return Ok(items),
                Err(e) if attempt <= self.max_retries => {
                    tracing::debug!(platform = platform_id, attempt, error = %e, "crawl retry");
                    tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_once(&self, platform_id: &str) -> Result<BTreeMap<String, RawItem>> {
        let body = self
            .client
            .get(&self.api_url)
            .query(&[("id", platform_id), ("latest", "")])
            .send()
            .await
            .context("hot-list request")?
            .error_for_status()
            .context("hot-list non-2xx")?
            .text()
            .await
            .context("hot-list body")?;
        parse_listing(&body)
    }
}

/// Parse one API response into title -> item. Ranks are 1-based list positions; a
/// title listed twice collects both ranks.
pub fn parse_listing(body: &str) -> Result<BTreeMap<String, RawItem>> {
    let rsp: ApiResponse = serde_json::from_str(body).context("parse hot-list json")?;
    if rsp.status != "success" && rsp.status != "cache" {
        return Err(anyhow!("hot-list status `{}`", rsp.status));
    }

    let mut out: BTreeMap<String, RawItem> = BTreeMap::new();
    for (idx, item) in rsp.items.into_iter().enumerate() {
        let Some(title) = item.title.map(|t| t.trim().to_string()) else {
            continue;
        };
        if title.is_empty() {
            continue;
        }
        let rank = idx as u32 + 1;
        let entry = out.entry(title).or_default();
        entry.ranks.push(rank);
        if entry.url.is_empty() {
            entry.url = item.url.unwrap_or_default();
        }
        if entry.mobile_url.is_empty() {
            entry.mobile_url = item.mobile_url.unwrap_or_default();
        }
    }
    Ok(out)
}

#[async_trait]
impl Crawler for NewsNowFetcher {
    async fn crawl(&self, platforms: &[Platform], interval_ms: u64) -> CrawlOutcome {
        let mut outcome = CrawlOutcome::default();

        for (i, p) in platforms.iter().enumerate() {
            if i > 0 && interval_ms > 0 {
                tokio::time::sleep(Duration::from_millis(interval_ms)).await;
            }
            outcome
                .id_to_name
                .insert(p.id.clone(), p.display_name().to_string());

            match self.fetch_platform(&p.id).await {
                Ok(items) => {
                    tracing::info!(platform = %p.id, titles = items.len(), "crawled");
                    outcome.results.insert(p.id.clone(), items);
                }
                Err(e) => {
                    tracing::warn!(platform = %p.id, error = ?e, "crawl failed");
                    counter!("crawl_failed_platforms_total").increment(1);
                    outcome.failed_ids.push(p.id.clone());
                }
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_listing_assigns_positions_as_ranks() {
        let body = r#"{"status":"success","items":[
            {"title":"A","url":"u1","mobileUrl":"m1"},
            {"title":"  "},
            {"title":"B","url":"u3"},
            {"title":"A","url":"u4"}
        ]}"#;
        let out = parse_listing(body).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out["A"].ranks, vec![1, 4]);
        assert_eq!(out["A"].url, "u1");
        assert_eq!(out["A"].mobile_url, "m1");
        assert_eq!(out["B"].ranks, vec![3]);
    }

    #[test]
    fn parse_listing_accepts_cache_and_rejects_errors() {
        assert!(parse_listing(r#"{"status":"cache","items":[]}"#).is_ok());
        assert!(parse_listing(r#"{"status":"error"}"#).is_err());
        assert!(parse_listing("<html>").is_err());
    }

    #[test]
    fn display_name_falls_back_to_id() {
        let p = Platform {
            id: "zhihu".into(),
            name: None,
        };
        assert_eq!(p.display_name(), "zhihu");
    }
}
