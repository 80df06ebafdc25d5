// src/storage/mod.rs
//! Pluggable persistence for crawl snapshots, rendered reports and push records.
//!
//! Two backends implement [`StorageBackend`]: [`local::LocalBackend`] (a directory
//! per day) and, with the `remote` feature, `remote::RemoteBackend` (an
//! S3-compatible bucket with the same day-prefixed layout). [`manager::StorageManager`]
//! picks one, falls back to Local when Remote cannot be built, and runs retention
//! cleanup on both.
//!
//! Contract shared by both backends: transient I/O failures never surface as
//! errors. They are logged and reported as `false`, `None` or `0`.

pub mod local;
pub mod manager;
pub mod record;
#[cfg(feature = "remote")]
pub mod remote;
#[cfg(feature = "remote")]
pub mod s3;

use async_trait::async_trait;
use chrono::{Days, NaiveDate};
use std::path::Path;

use crate::news::{NewTitles, NewsData};

pub use manager::{BackendKind, RemoteSettings, StorageManager};

#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn backend_name(&self) -> &'static str;

    fn supports_txt(&self) -> bool;

    /// Merge-append one crawl into its day's Title History.
    async fn save_news_data(&self, data: &NewsData) -> bool;

    /// Accumulated Title History for `date` (today when `None`).
    async fn get_today_all_data(&self, date: Option<NaiveDate>) -> Option<NewsData>;

    /// Only the most recent crawl of `date`.
    async fn get_latest_crawl_data(&self, date: Option<NaiveDate>) -> Option<NewsData>;

    /// Titles in `current` absent from every crawl persisted before it on the same day.
    async fn detect_new_titles(&self, current: &NewsData) -> NewTitles;

    async fn is_first_crawl_today(&self, date: Option<NaiveDate>) -> bool;

    /// Returns where the snapshot was written.
    async fn save_txt_snapshot(&self, data: &NewsData) -> Option<String>;

    /// Files the report under `date` (today when `None`). Returns where it was written.
    async fn save_html_report(
        &self,
        html: &str,
        filename: &str,
        is_summary: bool,
        date: Option<NaiveDate>,
    ) -> Option<String>;

    /// Remove day-buckets older than `retention_days`; `0` keeps everything.
    /// Returns the number of removed days.
    async fn cleanup_old_data(&self, retention_days: u32) -> usize;

    async fn has_pushed_today(&self, date: Option<NaiveDate>) -> bool;

    async fn record_push(&self, report_type: &str, date: Option<NaiveDate>) -> bool;

    /// Copy the last `days` day-buckets into a local data directory. Backends that
    /// are already local have nothing to pull.
    async fn pull_recent_days(&self, _days: u32, _data_dir: &Path) -> usize {
        0
    }

    /// Release held resources. Called once at the end of a run.
    async fn cleanup(&self) {}
}

/// Today's date in `tz`.
pub(crate) fn today_in(tz: chrono_tz::Tz) -> NaiveDate {
    chrono::Utc::now().with_timezone(&tz).date_naive()
}

/// Retention cut-off: buckets dated strictly before it are expired. `None` when
/// the window reaches past the earliest representable date, so nothing expires.
pub(crate) fn retention_cutoff(today: NaiveDate, retention_days: u32) -> Option<NaiveDate> {
    today.checked_sub_days(Days::new(u64::from(retention_days)))
}
