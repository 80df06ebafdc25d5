// src/notify/ntfy.rs
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use super::format::render_batches;
use super::webhook::{post_with_retry, BATCH_INTERVAL};
use super::{ChannelKind, Notifier, ReportPayload};

pub const DEFAULT_SERVER: &str = "https://ntfy.sh";

#[derive(Clone)]
pub struct NtfyNotifier {
    url: String,
    token: Option<String>,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

impl NtfyNotifier {
    pub fn new(server: &str, topic: &str, token: Option<&str>, timeout: Duration) -> Result<Self> {
        let topic = topic.trim().trim_matches('/');
        if topic.is_empty() {
            bail!("ntfy topic is empty");
        }
        let server = server.trim();
        let server = if server.is_empty() { DEFAULT_SERVER } else { server };
        let server = if server.starts_with("http://") || server.starts_with("https://") {
            server.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", server.trim_end_matches('/'))
        };
        let url = format!("{server}/{}", urlencoding::encode(topic));
        reqwest::Url::parse(&url).context("invalid ntfy server url")?;
        Ok(Self {
            url,
            token: token.map(str::trim).filter(|t| !t.is_empty()).map(str::to_string),
            client: Client::new(),
            timeout,
            max_retries: 2,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Header values must be visible ASCII.
fn header_safe(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_graphic() || c == ' ' { c } else { '?' })
        .collect()
}

#[async_trait]
impl Notifier for NtfyNotifier {
    fn channel(&self) -> ChannelKind {
        ChannelKind::Ntfy
    }

    async fn send(&self, report: &ReportPayload) -> Result<()> {
        let title = header_safe(&report.report_type);
        for (i, batch) in render_batches(report, ChannelKind::Ntfy).into_iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(BATCH_INTERVAL).await;
            }
            post_with_retry("ntfy", self.max_retries, || {
                let mut req = self
                    .client
                    .post(&self.url)
                    .timeout(self.timeout)
                    .header("Title", title.as_str())
                    .header("Markdown", "yes")
                    .body(batch.clone());
                if let Some(token) = &self.token {
                    req = req.bearer_auth(token);
                }
                req
            })
            .await?;
        }
        Ok(())
    }
}
