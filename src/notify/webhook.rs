// src/notify/webhook.rs
//! JSON webhook channels: Feishu, DingTalk, WeWork, Slack and Bark.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use super::format::render_batches;
use super::{ChannelKind, Notifier, ReportPayload};

/// Pause between consecutive batches of one report.
pub(crate) const BATCH_INTERVAL: Duration = Duration::from_secs(1);

const DEFAULT_RETRIES: u8 = 2;

/// POST with exponential backoff on transport errors and non-2xx replies.
/// Returns the final status and body text.
pub(crate) async fn post_with_retry<F>(
    label: &str,
    max_retries: u8,
    build: F,
) -> Result<(StatusCode, String)>
where
    F: Fn() -> RequestBuilder,
{
    let max_retries = max_retries.max(1);
    let mut attempt: u8 = 0;
    loop {
        attempt += 1;
        let err = match build().send().await {
            Ok(rsp) => {
                let status = rsp.status();
                if status.is_success() {
                    let body = rsp.text().await.unwrap_or_default();
                    return Ok((status, body));
                }
                anyhow!("{label} HTTP error: {status}")
            }
            Err(e) => anyhow!("{label} request failed: {e}"),
        };
        if attempt >= max_retries {
            return Err(err);
        }
        debug!(channel = label, attempt, error = %err, "retrying");
        tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
    }
}

#[derive(Clone)]
pub struct WebhookNotifier {
    kind: ChannelKind,
    url: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

impl WebhookNotifier {
    pub fn new(kind: ChannelKind, url: String, timeout: Duration) -> Result<Self> {
        if !matches!(
            kind,
            ChannelKind::Feishu
                | ChannelKind::DingTalk
                | ChannelKind::WeWork
                | ChannelKind::Slack
                | ChannelKind::Bark
        ) {
            bail!("{kind} is not a webhook channel");
        }
        let parsed = reqwest::Url::parse(url.trim()).with_context(|| format!("invalid {kind} url"))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            bail!("{kind} url must be http(s)");
        }
        Ok(Self {
            kind,
            url: url.trim().to_string(),
            client: Client::new(),
            timeout,
            max_retries: DEFAULT_RETRIES,
        })
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries;
        self
    }

    async fn post(&self, body: &Value) -> Result<()> {
        let (status, text) = post_with_retry(self.kind.as_str(), self.max_retries, || {
            self.client.post(&self.url).timeout(self.timeout).json(body)
        })
        .await?;
        check_reply(self.kind, status, &text)
    }
}

/// Request body for one batch.
pub(crate) fn webhook_body(kind: ChannelKind, title: &str, text: &str) -> Value {
    match kind {
        ChannelKind::Feishu => json!({
            "msg_type": "text",
            "content": { "text": text },
        }),
        ChannelKind::DingTalk => json!({
            "msgtype": "markdown",
            "markdown": { "title": title, "text": text },
        }),
        ChannelKind::WeWork => json!({
            "msgtype": "markdown",
            "markdown": { "content": text },
        }),
        ChannelKind::Bark => json!({
            "title": title,
            "body": text,
            "group": "trend-radar",
        }),
        _ => json!({ "text": text }),
    }
}

/// Some vendors answer 200 with an error code in the body.
pub(crate) fn check_reply(kind: ChannelKind, status: StatusCode, body: &str) -> Result<()> {
    if !status.is_success() {
        bail!("{kind} HTTP error: {status}");
    }
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let code = |field: &str| parsed.as_ref().and_then(|v| v.get(field)).and_then(Value::as_i64);
    let ok = match kind {
        ChannelKind::Feishu => code("code").or_else(|| code("StatusCode")).unwrap_or(0) == 0,
        ChannelKind::DingTalk | ChannelKind::WeWork => code("errcode").unwrap_or(0) == 0,
        ChannelKind::Bark => code("code").unwrap_or(200) == 200,
        _ => true,
    };
    if ok {
        Ok(())
    } else {
        bail!("{kind} rejected the message: {body}")
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn channel(&self) -> ChannelKind {
        self.kind
    }

    async fn send(&self, report: &ReportPayload) -> Result<()> {
        let batches = render_batches(report, self.kind);
        let n = batches.len();
        for (i, batch) in batches.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(BATCH_INTERVAL).await;
            }
            let body = webhook_body(self.kind, &report.report_type, batch);
            self.post(&body)
                .await
                .with_context(|| format!("batch {}/{n}", i + 1))?;
        }
        Ok(())
    }
}
