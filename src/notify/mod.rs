// src/notify/mod.rs
//! Report delivery: one [`Notifier`] per configured account, fanned out by
//! [`NotifierMux`].

pub mod email;
pub mod format;
pub mod ntfy;
pub mod telegram;
pub mod webhook;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::accounts::{
    get_account_at_index, limit_accounts, parse_multi_account_config, validate_paired_configs,
};
use crate::config::app::NotificationConfig;
use crate::frequency::Stat;
use crate::mode::ReportMode;

pub use email::EmailNotifier;
pub use ntfy::NtfyNotifier;
pub use telegram::TelegramNotifier;
pub use webhook::WebhookNotifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Feishu,
    DingTalk,
    WeWork,
    Telegram,
    Email,
    Ntfy,
    Bark,
    Slack,
}

impl ChannelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelKind::Feishu => "feishu",
            ChannelKind::DingTalk => "dingtalk",
            ChannelKind::WeWork => "wework",
            ChannelKind::Telegram => "telegram",
            ChannelKind::Email => "email",
            ChannelKind::Ntfy => "ntfy",
            ChannelKind::Bark => "bark",
            ChannelKind::Slack => "slack",
        }
    }

    /// Largest message body, in bytes, one send may carry. `None` = unbatched.
    pub fn batch_limit(self) -> Option<usize> {
        match self {
            ChannelKind::Feishu => Some(29_000),
            ChannelKind::DingTalk => Some(20_000),
            ChannelKind::WeWork | ChannelKind::Telegram | ChannelKind::Slack => Some(4_000),
            ChannelKind::Ntfy => Some(3_800),
            ChannelKind::Bark => Some(3_600),
            ChannelKind::Email => None,
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Titles first seen in this run, per platform.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewTitleGroup {
    pub platform_id: String,
    pub platform_name: String,
    pub titles: Vec<String>,
}

/// Everything a channel needs to render one report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportPayload {
    pub report_type: String,
    pub mode: ReportMode,
    pub generated_at: DateTime<FixedOffset>,
    pub stats: Vec<Stat>,
    pub total_titles: usize,
    pub new_titles: Vec<NewTitleGroup>,
    /// Display names of platforms that could not be crawled.
    pub failed_platforms: Vec<String>,
    pub rank_threshold: u32,
    /// Rendered HTML report, attached by channels that can carry it.
    #[serde(skip)]
    pub html_body: Option<String>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    fn channel(&self) -> ChannelKind;
    async fn send(&self, report: &ReportPayload) -> Result<()>;
}

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("notify_sent_total", "Reports delivered, per channel account.");
        describe_counter!("notify_failed_total", "Report deliveries that failed.");
    });
}

/// Ordered set of account-level notifiers.
#[derive(Default)]
pub struct NotifierMux {
    notifiers: Vec<Box<dyn Notifier>>,
}

impl NotifierMux {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, notifier: Box<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    /// Distinct channels, in configuration order.
    pub fn channels(&self) -> Vec<ChannelKind> {
        let mut out: Vec<ChannelKind> = Vec::new();
        for n in &self.notifiers {
            if !out.contains(&n.channel()) {
                out.push(n.channel());
            }
        }
        out
    }

    /// Build every account of every configured channel. Misconfigured channels
    /// are logged and skipped.
    pub fn from_config(cfg: &NotificationConfig) -> Self {
        let ch = &cfg.channels;
        let sep = cfg.separator.as_str();
        let max = cfg.max_accounts_per_channel;
        let timeout = Duration::from_secs(cfg.request_timeout_secs.max(1));
        let accounts = |value: &str, channel: ChannelKind| {
            limit_accounts(parse_multi_account_config(value, sep), max, channel.as_str())
        };

        let mut mux = Self::new();

        for (kind, value) in [
            (ChannelKind::Feishu, &ch.feishu_webhook_url),
            (ChannelKind::DingTalk, &ch.dingtalk_webhook_url),
            (ChannelKind::WeWork, &ch.wework_webhook_url),
            (ChannelKind::Bark, &ch.bark_url),
            (ChannelKind::Slack, &ch.slack_webhook_url),
        ] {
            for url in accounts(value, kind).into_iter().filter(|u| !u.is_empty()) {
                match WebhookNotifier::new(kind, url, timeout) {
                    Ok(n) => mux = mux.with(Box::new(n)),
                    Err(e) => warn!(channel = %kind, error = ?e, "webhook account skipped"),
                }
            }
        }

        let tokens = accounts(&ch.telegram_bot_token, ChannelKind::Telegram);
        let chats = accounts(&ch.telegram_chat_id, ChannelKind::Telegram);
        match validate_paired_configs(
            "telegram",
            &[("bot_token", tokens.as_slice()), ("chat_id", chats.as_slice())],
            &["bot_token", "chat_id"],
        ) {
            Ok(n) => {
                for i in 0..n {
                    let token = get_account_at_index(&tokens, i, "");
                    let chat = get_account_at_index(&chats, i, "");
                    if token.is_empty() || chat.is_empty() {
                        warn!(channel = "telegram", account = i + 1, "incomplete account skipped");
                        continue;
                    }
                    match TelegramNotifier::new(token, chat, timeout) {
                        Ok(n) => mux = mux.with(Box::new(n)),
                        Err(e) => warn!(channel = "telegram", error = ?e, "account skipped"),
                    }
                }
            }
            Err(e) => warn!(error = %e, "telegram disabled for this run"),
        }

        let servers = accounts(&ch.ntfy_server_url, ChannelKind::Ntfy);
        let topics = accounts(&ch.ntfy_topic, ChannelKind::Ntfy);
        let ntfy_tokens = accounts(&ch.ntfy_token, ChannelKind::Ntfy);
        match validate_paired_configs(
            "ntfy",
            &[
                ("server_url", servers.as_slice()),
                ("topic", topics.as_slice()),
                ("token", ntfy_tokens.as_slice()),
            ],
            &["server_url", "topic"],
        ) {
            Ok(n) => {
                for i in 0..n {
                    let server = get_account_at_index(&servers, i, ntfy::DEFAULT_SERVER);
                    let topic = get_account_at_index(&topics, i, "");
                    if topic.is_empty() {
                        warn!(channel = "ntfy", account = i + 1, "account without topic skipped");
                        continue;
                    }
                    let token = Some(get_account_at_index(&ntfy_tokens, i, "")).filter(|t| !t.is_empty());
                    match NtfyNotifier::new(server, topic, token, timeout) {
                        Ok(n) => mux = mux.with(Box::new(n)),
                        Err(e) => warn!(channel = "ntfy", error = ?e, "account skipped"),
                    }
                }
            }
            Err(e) => warn!(error = %e, "ntfy disabled for this run"),
        }

        // Email is single-account.
        if !ch.email_from.trim().is_empty()
            && !ch.email_password.is_empty()
            && !ch.email_to.trim().is_empty()
        {
            match EmailNotifier::from_settings(ch) {
                Ok(n) => mux = mux.with(Box::new(n)),
                Err(e) => warn!(channel = "email", error = ?e, "email disabled for this run"),
            }
        }

        info!(accounts = mux.len(), channels = ?mux.channels(), "notifiers configured");
        mux
    }

    /// Send `report` through every account. Returns, per channel, whether at
    /// least one of its accounts succeeded. Failures never propagate.
    pub async fn dispatch_all(&self, report: &ReportPayload) -> BTreeMap<ChannelKind, bool> {
        ensure_metrics_described();
        let mut results: BTreeMap<ChannelKind, bool> = BTreeMap::new();

        let mut account_idx: BTreeMap<ChannelKind, usize> = BTreeMap::new();
        for n in &self.notifiers {
            let kind = n.channel();
            let idx = account_idx.entry(kind).or_insert(0);
            *idx += 1;

            let ok = match n.send(report).await {
                Ok(()) => {
                    counter!("notify_sent_total", "channel" => kind.as_str()).increment(1);
                    info!(channel = %kind, account = *idx, report_type = %report.report_type, "report sent");
                    true
                }
                Err(e) => {
                    counter!("notify_failed_total", "channel" => kind.as_str()).increment(1);
                    warn!(channel = %kind, account = *idx, error = ?e, "report not sent");
                    false
                }
            };
            let entry = results.entry(kind).or_insert(false);
            *entry |= ok;
        }
        results
    }
}
