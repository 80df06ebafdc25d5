// src/storage/manager.rs
//! Backend selection, lazy construction and Local fallback.

use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
#[cfg(feature = "remote")]
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::local::LocalBackend;
use super::StorageBackend;
use crate::config::app::{env_lookup, RemoteStorageConfig, StorageConfig};
use crate::news::{NewTitles, NewsData};

#[cfg(feature = "remote")]
const REMOTE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Local,
    Remote,
    /// Remote in CI when fully configured, Local otherwise.
    #[default]
    Auto,
}

/// Effective remote credentials: config value first, environment second.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct RemoteSettings {
    pub bucket_name: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub endpoint_url: String,
    pub region: String,
}

impl std::fmt::Debug for RemoteSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSettings")
            .field("bucket_name", &self.bucket_name)
            .field("endpoint_url", &self.endpoint_url)
            .field("region", &self.region)
            .field("access_key_id", &!self.access_key_id.is_empty())
            .field("secret_access_key", &!self.secret_access_key.is_empty())
            .finish()
    }
}

impl RemoteSettings {
    pub fn resolve_with(cfg: &RemoteStorageConfig, lookup: &dyn Fn(&str) -> Option<String>) -> Self {
        let pick = |value: &str, var: &str| {
            let v = value.trim();
            if v.is_empty() {
                lookup(var).unwrap_or_default()
            } else {
                v.to_string()
            }
        };
        Self {
            bucket_name: pick(&cfg.bucket_name, "S3_BUCKET_NAME"),
            access_key_id: pick(&cfg.access_key_id, "S3_ACCESS_KEY_ID"),
            secret_access_key: pick(&cfg.secret_access_key, "S3_SECRET_ACCESS_KEY"),
            endpoint_url: pick(&cfg.endpoint_url, "S3_ENDPOINT_URL"),
            region: pick(&cfg.region, "S3_REGION"),
        }
    }

    /// Bucket, both keys and endpoint are set. Region is optional.
    pub fn is_complete(&self) -> bool {
        !self.bucket_name.is_empty()
            && !self.access_key_id.is_empty()
            && !self.secret_access_key.is_empty()
            && !self.endpoint_url.is_empty()
    }
}

/// `GITHUB_ACTIONS=true` or `CI=true`.
pub fn detect_ci(lookup: &dyn Fn(&str) -> Option<String>) -> bool {
    ["GITHUB_ACTIONS", "CI"]
        .iter()
        .any(|var| lookup(var).is_some_and(|v| v.eq_ignore_ascii_case("true")))
}

pub struct StorageManager {
    kind: BackendKind,
    data_dir: PathBuf,
    #[cfg_attr(not(feature = "remote"), allow(dead_code))]
    enable_html: bool,
    tz: Tz,
    remote: RemoteSettings,
    local_retention_days: u32,
    remote_retention_days: u32,
    pull_enabled: bool,
    pull_days: u32,
    in_ci: bool,
    local: Arc<LocalBackend>,
    active: OnceCell<Arc<dyn StorageBackend>>,
    remote_backend: OnceCell<Option<Arc<dyn StorageBackend>>>,
}

impl StorageManager {
    /// Reads remote credentials and CI markers from the process environment.
    pub fn new(cfg: &StorageConfig, tz: Tz) -> Self {
        Self::with_env(cfg, tz, &env_lookup)
    }

    pub fn with_env(cfg: &StorageConfig, tz: Tz, lookup: &dyn Fn(&str) -> Option<String>) -> Self {
        Self {
            kind: cfg.backend,
            data_dir: cfg.data_dir.clone(),
            enable_html: cfg.formats.html,
            tz,
            remote: RemoteSettings::resolve_with(&cfg.remote, lookup),
            local_retention_days: cfg.local.retention_days.unwrap_or(0),
            remote_retention_days: cfg.remote.retention_days.unwrap_or(0),
            pull_enabled: cfg.pull.enabled,
            pull_days: cfg.pull.days,
            in_ci: detect_ci(lookup),
            local: Arc::new(LocalBackend::new(
                cfg.data_dir.clone(),
                cfg.formats.txt,
                cfg.formats.html,
                tz,
            )),
            active: OnceCell::new(),
            remote_backend: OnceCell::new(),
        }
    }

    /// Use `backend` as the active backend instead of resolving one.
    pub fn with_backend(mut self, backend: Arc<dyn StorageBackend>) -> Self {
        self.active = OnceCell::new_with(Some(backend));
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// The backend type this manager will try to construct.
    pub fn resolve_kind(&self) -> BackendKind {
        match self.kind {
            BackendKind::Auto if self.in_ci && self.remote.is_complete() => BackendKind::Remote,
            BackendKind::Auto => {
                if self.in_ci {
                    info!("CI detected but remote storage is not fully configured; using local");
                }
                BackendKind::Local
            }
            explicit => explicit,
        }
    }

    /// Active backend, constructed on first use.
    pub async fn backend(&self) -> Arc<dyn StorageBackend> {
        self.active
            .get_or_init(|| async { self.construct().await })
            .await
            .clone()
    }

    /// Drop memoized backends so the next call re-resolves.
    pub fn force_new(&mut self) {
        self.active = OnceCell::new();
        self.remote_backend = OnceCell::new();
    }

    async fn construct(&self) -> Arc<dyn StorageBackend> {
        if self.resolve_kind() == BackendKind::Remote {
            if let Some(remote) = self.remote_backend().await {
                info!(backend = remote.backend_name(), "using remote storage");
                return remote;
            }
            warn!("remote storage unavailable; falling back to local");
        }
        info!(dir = %self.data_dir.display(), "using local storage");
        self.local.clone()
    }

    async fn remote_backend(&self) -> Option<Arc<dyn StorageBackend>> {
        self.remote_backend
            .get_or_init(|| async {
                match self.build_remote().await {
                    Ok(b) => Some(b),
                    Err(e) => {
                        warn!(error = ?e, settings = ?self.remote, "remote storage could not be built");
                        None
                    }
                }
            })
            .await
            .clone()
    }

    #[cfg(feature = "remote")]
    async fn build_remote(&self) -> anyhow::Result<Arc<dyn StorageBackend>> {
        use super::remote::RemoteBackend;
        use super::s3::S3Client;

        if !self.remote.is_complete() {
            anyhow::bail!("remote storage credentials are incomplete");
        }
        let client = S3Client::new(
            &self.remote.endpoint_url,
            &self.remote.bucket_name,
            &self.remote.region,
            &self.remote.access_key_id,
            &self.remote.secret_access_key,
            REMOTE_TIMEOUT,
        )?;
        let backend = RemoteBackend::connect(Box::new(client), self.enable_html, self.tz).await?;
        Ok(Arc::new(backend))
    }

    #[cfg(not(feature = "remote"))]
    async fn build_remote(&self) -> anyhow::Result<Arc<dyn StorageBackend>> {
        anyhow::bail!("built without the `remote` feature")
    }

    /// Hydrate the local data dir from remote. Returns the number of objects written.
    pub async fn pull_from_remote(&self) -> usize {
        if !self.pull_enabled || self.pull_days == 0 {
            return 0;
        }
        if !self.remote.is_complete() {
            info!("remote storage not configured; nothing to pull");
            return 0;
        }
        match self.remote_backend().await {
            Some(remote) => remote.pull_recent_days(self.pull_days, &self.data_dir).await,
            None => 0,
        }
    }

    /// Local and remote retention run independently; counts are summed.
    pub async fn cleanup_old_data(&self) -> usize {
        let mut removed = 0;
        if self.local_retention_days > 0 {
            removed += self.local.cleanup_old_data(self.local_retention_days).await;
        }
        if self.remote_retention_days > 0 && self.remote.is_complete() {
            if let Some(remote) = self.remote_backend().await {
                removed += remote.cleanup_old_data(self.remote_retention_days).await;
            }
        }
        removed
    }

    /// Release every backend that was constructed.
    pub async fn cleanup(&self) {
        let active = self.active.get();
        if let Some(b) = active {
            b.cleanup().await;
        }
        if let Some(Some(remote)) = self.remote_backend.get() {
            if !active.is_some_and(|a| Arc::ptr_eq(a, remote)) {
                remote.cleanup().await;
            }
        }
        debug!("storage released");
    }

    pub async fn backend_name(&self) -> &'static str {
        self.backend().await.backend_name()
    }

    pub async fn supports_txt(&self) -> bool {
        self.backend().await.supports_txt()
    }

    pub async fn save_news_data(&self, data: &NewsData) -> bool {
        self.backend().await.save_news_data(data).await
    }

    pub async fn get_today_all_data(&self, date: Option<NaiveDate>) -> Option<NewsData> {
        self.backend().await.get_today_all_data(date).await
    }

    pub async fn get_latest_crawl_data(&self, date: Option<NaiveDate>) -> Option<NewsData> {
        self.backend().await.get_latest_crawl_data(date).await
    }

    pub async fn detect_new_titles(&self, current: &NewsData) -> NewTitles {
        self.backend().await.detect_new_titles(current).await
    }

    pub async fn is_first_crawl_today(&self, date: Option<NaiveDate>) -> bool {
        self.backend().await.is_first_crawl_today(date).await
    }

    pub async fn save_txt_snapshot(&self, data: &NewsData) -> Option<String> {
        self.backend().await.save_txt_snapshot(data).await
    }

    pub async fn save_html_report(
        &self,
        html: &str,
        filename: &str,
        is_summary: bool,
        date: Option<NaiveDate>,
    ) -> Option<String> {
        self.backend()
            .await
            .save_html_report(html, filename, is_summary, date)
            .await
    }

    pub async fn has_pushed_today(&self, date: Option<NaiveDate>) -> bool {
        self.backend().await.has_pushed_today(date).await
    }

    pub async fn record_push(&self, report_type: &str, date: Option<NaiveDate>) -> bool {
        self.backend().await.record_push(report_type, date).await
    }
}
