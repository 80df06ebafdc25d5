// src/notify/telegram.rs
use anyhow::{bail, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use super::format::render_batches;
use super::webhook::{post_with_retry, BATCH_INTERVAL};
use super::{ChannelKind, Notifier, ReportPayload};

const API_BASE: &str = "https://api.telegram.org";

#[derive(Clone)]
pub struct TelegramNotifier {
    token: String,
    chat_id: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

impl TelegramNotifier {
    pub fn new(token: &str, chat_id: &str, timeout: Duration) -> Result<Self> {
        let token = token.trim();
        let chat_id = chat_id.trim();
        if token.is_empty() || chat_id.is_empty() {
            bail!("telegram needs both bot token and chat id");
        }
        if token.contains('/') {
            bail!("telegram bot token must not contain '/'");
        }
        Ok(Self {
            token: token.to_string(),
            chat_id: chat_id.to_string(),
            client: Client::new(),
            timeout,
            max_retries: 2,
        })
    }

    fn endpoint(&self) -> String {
        format!("{API_BASE}/bot{}/sendMessage", self.token)
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn channel(&self) -> ChannelKind {
        ChannelKind::Telegram
    }

    async fn send(&self, report: &ReportPayload) -> Result<()> {
        let url = self.endpoint();
        for (i, batch) in render_batches(report, ChannelKind::Telegram).iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(BATCH_INTERVAL).await;
            }
            let msg = SendMessage {
                chat_id: &self.chat_id,
                text: batch,
                parse_mode: "HTML",
                disable_web_page_preview: true,
            };
            let (_, body) = post_with_retry("telegram", self.max_retries, || {
                self.client.post(&url).timeout(self.timeout).json(&msg)
            })
            .await?;
            let ok = serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| v.get("ok").and_then(serde_json::Value::as_bool))
                .unwrap_or(false);
            if !ok {
                bail!("telegram rejected the message: {body}");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_embeds_the_token() {
        let n = TelegramNotifier::new(" 123:abc ", "-100", Duration::from_secs(1)).unwrap();
        assert_eq!(n.endpoint(), "https://api.telegram.org/bot123:abc/sendMessage");
    }

    #[test]
    fn message_body_uses_html_mode() {
        let msg = SendMessage {
            chat_id: "42",
            text: "<b>hi</b>",
            parse_mode: "HTML",
            disable_web_page_preview: true,
        };
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["chat_id"], "42");
        assert_eq!(v["parse_mode"], "HTML");
        assert_eq!(v["disable_web_page_preview"], true);
    }

    #[test]
    fn incomplete_accounts_are_rejected() {
        assert!(TelegramNotifier::new("", "1", Duration::from_secs(1)).is_err());
        assert!(TelegramNotifier::new("tok", " ", Duration::from_secs(1)).is_err());
        assert!(TelegramNotifier::new("a/b", "1", Duration::from_secs(1)).is_err());
    }
}
