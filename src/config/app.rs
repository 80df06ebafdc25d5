// src/config/app.rs
//! `config/config.toml` loading.
//!
//! Every section is optional and falls back to defaults. Credentials and
//! retention may also come from environment variables, which are consulted only
//! when the file leaves the value empty.

use chrono_tz::Tz;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::crawler::{Platform, DEFAULT_API_URL};
use crate::mode::ReportMode;
use crate::storage::BackendKind;

pub const CONFIG_PATH_ENV: &str = "TREND_RADAR_CONFIG";
pub const FREQUENCY_WORDS_PATH_ENV: &str = "TREND_RADAR_FREQUENCY_WORDS";
const DEFAULT_CONFIG_PATH: &str = "config/config.toml";
const DEFAULT_FREQUENCY_WORDS_PATH: &str = "config/frequency_words.txt";
pub const DEFAULT_TIMEZONE: &str = "America/New_York";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {}", .0.display())]
    Missing(PathBuf),
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("unknown timezone `{0}`")]
    Timezone(String),
    #[error("invalid time `{0}`, expected HH:MM")]
    TimeFormat(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub crawler: CrawlerConfig,
    pub report: ReportConfig,
    pub notification: NotificationConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub timezone: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            timezone: DEFAULT_TIMEZONE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    pub enabled: bool,
    pub request_interval_ms: u64,
    pub api_url: String,
    pub timeout_secs: u64,
    pub max_retries: u8,
    pub proxy_url: Option<String>,
    pub platforms: Vec<Platform>,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            request_interval_ms: 1000,
            api_url: DEFAULT_API_URL.to_string(),
            timeout_secs: 10,
            max_retries: 2,
            proxy_url: None,
            platforms: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub mode: ReportMode,
    /// Titles ranked at or above this are highlighted.
    pub rank_threshold: u32,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            mode: ReportMode::default(),
            rank_threshold: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub enabled: bool,
    pub max_accounts_per_channel: usize,
    pub request_timeout_secs: u64,
    /// Separator for multi-account values.
    pub separator: String,
    pub push_window: PushWindowConfig,
    pub channels: ChannelsConfig,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_accounts_per_channel: 3,
            request_timeout_secs: 15,
            separator: super::accounts::DEFAULT_SEPARATOR.to_string(),
            push_window: PushWindowConfig::default(),
            channels: ChannelsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PushWindowConfig {
    pub enabled: bool,
    /// `HH:MM`, inclusive
    pub start: String,
    /// `HH:MM`, inclusive
    pub end: String,
    pub once_per_day: bool,
}

impl Default for PushWindowConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            start: "20:00".to_string(),
            end: "22:00".to_string(),
            once_per_day: true,
        }
    }
}

/// Raw, possibly multi-account channel credentials.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    pub feishu_webhook_url: String,
    pub dingtalk_webhook_url: String,
    pub wework_webhook_url: String,
    pub telegram_bot_token: String,
    pub telegram_chat_id: String,
    pub email_from: String,
    pub email_password: String,
    pub email_to: String,
    pub email_smtp_server: String,
    pub email_smtp_port: String,
    pub ntfy_server_url: String,
    pub ntfy_topic: String,
    pub ntfy_token: String,
    pub bark_url: String,
    pub slack_webhook_url: String,
}

impl ChannelsConfig {
    fn apply_env_fallback(&mut self, lookup: &dyn Fn(&str) -> Option<String>) {
        let fields: [(&mut String, &str); 15] = [
            (&mut self.feishu_webhook_url, "FEISHU_WEBHOOK_URL"),
            (&mut self.dingtalk_webhook_url, "DINGTALK_WEBHOOK_URL"),
            (&mut self.wework_webhook_url, "WEWORK_WEBHOOK_URL"),
            (&mut self.telegram_bot_token, "TELEGRAM_BOT_TOKEN"),
            (&mut self.telegram_chat_id, "TELEGRAM_CHAT_ID"),
            (&mut self.email_from, "EMAIL_FROM"),
            (&mut self.email_password, "EMAIL_PASSWORD"),
            (&mut self.email_to, "EMAIL_TO"),
            (&mut self.email_smtp_server, "EMAIL_SMTP_SERVER"),
            (&mut self.email_smtp_port, "EMAIL_SMTP_PORT"),
            (&mut self.ntfy_server_url, "NTFY_SERVER_URL"),
            (&mut self.ntfy_topic, "NTFY_TOPIC"),
            (&mut self.ntfy_token, "NTFY_TOKEN"),
            (&mut self.bark_url, "BARK_URL"),
            (&mut self.slack_webhook_url, "SLACK_WEBHOOK_URL"),
        ];
        for (field, var) in fields {
            fill_if_empty(field, lookup(var));
        }
    }

    /// Any channel has enough credentials to attempt a send.
    pub fn any_configured(&self) -> bool {
        let set = |s: &String| !s.trim().is_empty();
        set(&self.feishu_webhook_url)
            || set(&self.dingtalk_webhook_url)
            || set(&self.wework_webhook_url)
            || (set(&self.telegram_bot_token) && set(&self.telegram_chat_id))
            || (set(&self.email_from) && set(&self.email_password) && set(&self.email_to))
            || (set(&self.ntfy_server_url) && set(&self.ntfy_topic))
            || set(&self.bark_url)
            || set(&self.slack_webhook_url)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: BackendKind,
    pub data_dir: PathBuf,
    pub formats: FormatsConfig,
    pub local: LocalStorageConfig,
    pub remote: RemoteStorageConfig,
    pub pull: PullConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Auto,
            data_dir: PathBuf::from("output"),
            formats: FormatsConfig::default(),
            local: LocalStorageConfig::default(),
            remote: RemoteStorageConfig::default(),
            pull: PullConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FormatsConfig {
    pub txt: bool,
    pub html: bool,
}

impl Default for FormatsConfig {
    fn default() -> Self {
        Self {
            txt: true,
            html: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LocalStorageConfig {
    /// `None` or `0` keeps everything.
    pub retention_days: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RemoteStorageConfig {
    pub bucket_name: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub endpoint_url: String,
    pub region: String,
    pub retention_days: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PullConfig {
    pub enabled: bool,
    pub days: u32,
}

impl Default for PullConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            days: 7,
        }
    }
}

fn fill_if_empty(field: &mut String, value: Option<String>) {
    if field.trim().is_empty() {
        if let Some(v) = value {
            *field = v;
        }
    }
}

/// `std::env::var`, with empty values treated as unset.
pub fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl AppConfig {
    /// `$TREND_RADAR_CONFIG`, else `config/config.toml`.
    pub fn default_path() -> PathBuf {
        env_lookup(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// `$TREND_RADAR_FREQUENCY_WORDS`, else `config/frequency_words.txt`.
    pub fn frequency_words_path() -> PathBuf {
        env_lookup(FREQUENCY_WORDS_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_FREQUENCY_WORDS_PATH))
    }

    /// Read, parse and apply environment fallbacks from the process environment.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut cfg = Self::load_file(path)?;
        cfg.apply_env_fallback(&env_lookup);
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::Missing(path.to_path_buf()))
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Fill values the file left empty from `lookup`.
    pub fn apply_env_fallback(&mut self, lookup: &dyn Fn(&str) -> Option<String>) {
        self.notification.channels.apply_env_fallback(lookup);

        if let Some(days) = lookup("STORAGE_RETENTION_DAYS").and_then(|v| v.trim().parse().ok()) {
            self.storage.local.retention_days.get_or_insert(days);
            self.storage.remote.retention_days.get_or_insert(days);
        }

        let remote = &mut self.storage.remote;
        fill_if_empty(&mut remote.bucket_name, lookup("S3_BUCKET_NAME"));
        fill_if_empty(&mut remote.access_key_id, lookup("S3_ACCESS_KEY_ID"));
        fill_if_empty(&mut remote.secret_access_key, lookup("S3_SECRET_ACCESS_KEY"));
        fill_if_empty(&mut remote.endpoint_url, lookup("S3_ENDPOINT_URL"));
        fill_if_empty(&mut remote.region, lookup("S3_REGION"));
    }

    /// Catches values that would otherwise fail later in the run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.timezone()?;
        if self.notification.push_window.enabled {
            crate::push_window::parse_hhmm(&self.notification.push_window.start)?;
            crate::push_window::parse_hhmm(&self.notification.push_window.end)?;
        }
        Ok(())
    }

    pub fn timezone(&self) -> Result<Tz, ConfigError> {
        self.app
            .timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::Timezone(self.app.timezone.clone()))
    }

    pub fn platform_ids(&self) -> Vec<String> {
        self.crawler.platforms.iter().map(|p| p.id.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn empty_file_yields_defaults() {
        let cfg: AppConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.app.timezone, DEFAULT_TIMEZONE);
        assert!(cfg.crawler.enabled);
        assert_eq!(cfg.report.mode, ReportMode::Daily);
        assert_eq!(cfg.notification.max_accounts_per_channel, 3);
        assert_eq!(cfg.storage.backend, BackendKind::Auto);
        assert!(cfg.storage.formats.html);
        assert!(cfg.storage.local.retention_days.is_none());
    }

    #[test]
    fn parses_sections() {
        let cfg: AppConfig = toml::from_str(
            r#"
[app]
timezone = "Asia/Shanghai"

[crawler]
request_interval_ms = 500
platforms = [{ id = "zhihu", name = "Zhihu" }, { id = "weibo" }]

[report]
mode = "incremental"

[notification.push_window]
enabled = true
start = "08:00"
end = "09:30"

[notification.channels]
telegram_bot_token = "t1;t2"

[storage]
backend = "remote"

[storage.remote]
bucket_name = "news"
retention_days = 30
"#,
        )
        .unwrap();
        assert_eq!(cfg.report.mode, ReportMode::Incremental);
        assert_eq!(cfg.crawler.platforms.len(), 2);
        assert_eq!(cfg.crawler.platforms[1].display_name(), "weibo");
        assert_eq!(cfg.platform_ids(), vec!["zhihu", "weibo"]);
        assert_eq!(cfg.storage.backend, BackendKind::Remote);
        assert_eq!(cfg.storage.remote.retention_days, Some(30));
        assert_eq!(cfg.timezone().unwrap(), chrono_tz::Asia::Shanghai);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn env_fills_only_absent_values() {
        let mut cfg: AppConfig = toml::from_str(
            r#"
[notification.channels]
feishu_webhook_url = "https://from-file"

[storage.local]
retention_days = 3
"#,
        )
        .unwrap();
        cfg.apply_env_fallback(&lookup_from(&[
            ("FEISHU_WEBHOOK_URL", "https://from-env"),
            ("BARK_URL", "https://bark"),
            ("STORAGE_RETENTION_DAYS", "10"),
            ("S3_BUCKET_NAME", "env-bucket"),
        ]));
        assert_eq!(cfg.notification.channels.feishu_webhook_url, "https://from-file");
        assert_eq!(cfg.notification.channels.bark_url, "https://bark");
        assert_eq!(cfg.storage.local.retention_days, Some(3));
        assert_eq!(cfg.storage.remote.retention_days, Some(10));
        assert_eq!(cfg.storage.remote.bucket_name, "env-bucket");
    }

    #[test]
    fn any_configured_requires_complete_pairs() {
        let mut ch = ChannelsConfig::default();
        assert!(!ch.any_configured());
        ch.telegram_bot_token = "t".into();
        assert!(!ch.any_configured());
        ch.telegram_chat_id = "c".into();
        assert!(ch.any_configured());
    }

    #[test]
    fn bad_timezone_and_window_are_rejected() {
        let mut cfg = AppConfig::default();
        cfg.app.timezone = "Mars/Olympus".into();
        assert!(matches!(cfg.validate(), Err(ConfigError::Timezone(_))));

        let mut cfg = AppConfig::default();
        cfg.notification.push_window.enabled = true;
        cfg.notification.push_window.start = "25:99".into();
        assert!(matches!(cfg.validate(), Err(ConfigError::TimeFormat(_))));
    }

    #[test]
    fn missing_file_is_reported_as_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let err = AppConfig::load_file(&tmp.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(_)));
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let tmp = tempfile::tempdir().unwrap();
        let p = tmp.path().join("config.toml");
        std::fs::write(&p, "[app\ntimezone=").unwrap();
        assert!(matches!(
            AppConfig::load_file(&p),
            Err(ConfigError::Parse { .. })
        ));
    }
}
