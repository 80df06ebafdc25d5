// src/storage/local.rs
//! Filesystem backend: one directory per day under `data_dir`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use chrono_tz::Tz;
use std::path::{Path, PathBuf};
use tokio::{fs, sync::Mutex};
use tracing::{debug, info, warn};

use super::record::{self, DayRecord, PushLog};
use super::{retention_cutoff, today_in, StorageBackend};
use crate::news::{NewTitles, NewsData};
use crate::novelty;

pub struct LocalBackend {
    data_dir: PathBuf,
    enable_txt: bool,
    enable_html: bool,
    tz: Tz,
    // Single writer per day-bucket.
    write_lock: Mutex<()>,
}

impl LocalBackend {
    pub fn new(data_dir: impl Into<PathBuf>, enable_txt: bool, enable_html: bool, tz: Tz) -> Self {
        Self {
            data_dir: data_dir.into(),
            enable_txt,
            enable_html,
            tz,
            write_lock: Mutex::new(()),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn day_dir(&self, date: NaiveDate) -> PathBuf {
        self.data_dir.join(record::day_key(date))
    }

    fn resolve(&self, date: Option<NaiveDate>) -> NaiveDate {
        date.unwrap_or_else(|| today_in(self.tz))
    }

    async fn read_day(&self, date: NaiveDate) -> Result<Option<DayRecord>> {
        let path = self.day_dir(date).join(record::NEWS_FILE);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(DayRecord::from_json(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("read {}", path.display())),
        }
    }

    async fn read_push_log(&self, date: NaiveDate) -> Result<PushLog> {
        let path = self.day_dir(date).join(record::PUSH_FILE);
        match fs::read(&path).await {
            Ok(bytes) => PushLog::from_json(&bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PushLog::default()),
            Err(e) => Err(e).with_context(|| format!("read {}", path.display())),
        }
    }

    async fn try_save(&self, data: &NewsData) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut day = self
            .read_day(data.crawl_date)
            .await?
            .unwrap_or_else(|| DayRecord::new(data.crawl_date));
        day.merge(data);
        let path = self.day_dir(data.crawl_date).join(record::NEWS_FILE);
        write_atomic(&path, &day.to_json()?).await
    }

    async fn try_record_push(&self, report_type: &str, date: NaiveDate) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut log = self.read_push_log(date).await?;
        log.record(report_type, chrono::Utc::now().with_timezone(&self.tz).fixed_offset());
        let path = self.day_dir(date).join(record::PUSH_FILE);
        write_atomic(&path, &log.to_json()?).await
    }

    async fn try_cleanup(&self, retention_days: u32) -> Result<usize> {
        let Some(cutoff) = retention_cutoff(today_in(self.tz), retention_days) else {
            return Ok(0);
        };
        let mut entries = match fs::read_dir(&self.data_dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e).context("list data dir"),
        };

        let mut removed = 0usize;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(date) = name.to_str().and_then(record::parse_day_key) else {
                continue;
            };
            if date >= cutoff || !entry.file_type().await?.is_dir() {
                continue;
            }
            match fs::remove_dir_all(entry.path()).await {
                Ok(()) => {
                    debug!(day = %date, "removed expired local day");
                    removed += 1;
                }
                Err(e) => warn!(day = %date, error = %e, "failed to remove expired day"),
            }
        }
        Ok(removed)
    }
}

/// Write via a sibling temp file + rename so readers never see half a file.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("create {}", parent.display()))?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)
        .await
        .with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .await
        .with_context(|| format!("rename into {}", path.display()))?;
    Ok(())
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn backend_name(&self) -> &'static str {
        "local"
    }

    fn supports_txt(&self) -> bool {
        self.enable_txt
    }

    async fn save_news_data(&self, data: &NewsData) -> bool {
        match self.try_save(data).await {
            Ok(()) => {
                debug!(date = %data.crawl_date, titles = data.title_count(), "saved crawl");
                true
            }
            Err(e) => {
                warn!(error = ?e, "local save failed");
                false
            }
        }
    }

    async fn get_today_all_data(&self, date: Option<NaiveDate>) -> Option<NewsData> {
        let date = self.resolve(date);
        match self.read_day(date).await {
            Ok(day) => day.and_then(|d| d.history()),
            Err(e) => {
                warn!(day = %date, error = ?e, "local read failed");
                None
            }
        }
    }

    async fn get_latest_crawl_data(&self, date: Option<NaiveDate>) -> Option<NewsData> {
        let date = self.resolve(date);
        match self.read_day(date).await {
            Ok(day) => day.and_then(|d| d.latest()),
            Err(e) => {
                warn!(day = %date, error = ?e, "local read failed");
                None
            }
        }
    }

    async fn detect_new_titles(&self, current: &NewsData) -> NewTitles {
        let prior = match self.read_day(current.crawl_date).await {
            Ok(day) => day.and_then(|d| d.history_before(current.crawl_time)),
            Err(e) => {
                warn!(error = ?e, "local read failed; treating crawl as first of day");
                None
            }
        };
        novelty::detect_new_titles(current, prior.as_ref())
    }

    async fn is_first_crawl_today(&self, date: Option<NaiveDate>) -> bool {
        let date = self.resolve(date);
        match self.read_day(date).await {
            Ok(Some(day)) => day.crawl_count() <= 1,
            _ => true,
        }
    }

    async fn save_txt_snapshot(&self, data: &NewsData) -> Option<String> {
        if !self.enable_txt {
            return None;
        }
        let path = self
            .day_dir(data.crawl_date)
            .join(record::TXT_DIR)
            .join(format!("{}.txt", record::time_stem(data.crawl_time)));
        match write_atomic(&path, record::render_txt_snapshot(data).as_bytes()).await {
            Ok(()) => Some(path.display().to_string()),
            Err(e) => {
                warn!(error = ?e, "txt snapshot not written");
                None
            }
        }
    }

    async fn save_html_report(
        &self,
        html: &str,
        filename: &str,
        is_summary: bool,
        date: Option<NaiveDate>,
    ) -> Option<String> {
        if !self.enable_html {
            return None;
        }
        let path = self
            .day_dir(self.resolve(date))
            .join(record::HTML_DIR)
            .join(filename);
        if let Err(e) = write_atomic(&path, html.as_bytes()).await {
            warn!(error = ?e, "html report not written");
            return None;
        }
        if is_summary {
            // Latest summary is also served from the data root.
            let index = self.data_dir.join("index.html");
            if let Err(e) = write_atomic(&index, html.as_bytes()).await {
                warn!(error = ?e, "index.html not updated");
            }
        }
        Some(path.display().to_string())
    }

    async fn cleanup_old_data(&self, retention_days: u32) -> usize {
        if retention_days == 0 {
            return 0;
        }
        match self.try_cleanup(retention_days).await {
            Ok(n) => {
                if n > 0 {
                    info!(removed = n, retention_days, "local retention cleanup");
                }
                n
            }
            Err(e) => {
                warn!(error = ?e, "local retention cleanup failed");
                0
            }
        }
    }

    async fn has_pushed_today(&self, date: Option<NaiveDate>) -> bool {
        let date = self.resolve(date);
        match self.read_push_log(date).await {
            Ok(log) => log.any(),
            Err(e) => {
                warn!(error = ?e, "push records unreadable");
                false
            }
        }
    }

    async fn record_push(&self, report_type: &str, date: Option<NaiveDate>) -> bool {
        let date = self.resolve(date);
        match self.try_record_push(report_type, date).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = ?e, report_type, "push record not written");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::crawl;

    fn backend(dir: &Path) -> LocalBackend {
        LocalBackend::new(dir, true, true, chrono_tz::UTC)
    }

    #[tokio::test]
    async fn save_then_read_back_accumulates() {
        let tmp = tempfile::tempdir().unwrap();
        let b = backend(tmp.path());
        let day = NaiveDate::from_ymd_opt(2025, 4, 1).unwrap();

        assert!(b.save_news_data(&crawl(day, 8, &["A", "B"])).await);
        assert!(b.save_news_data(&crawl(day, 9, &["B", "C"])).await);

        let all = b.get_today_all_data(Some(day)).await.unwrap();
        assert_eq!(all.title_count(), 3);
        assert_eq!(all.platforms["p1"]["B"].count, 2);

        let latest = b.get_latest_crawl_data(Some(day)).await.unwrap();
        assert!(!latest.contains("p1", "A"));
        assert!(latest.contains("p1", "C"));
        assert!(!b.is_first_crawl_today(Some(day)).await);
    }

    #[tokio::test]
    async fn detect_new_titles_excludes_the_saved_current_crawl() {
        let tmp = tempfile::tempdir().unwrap();
        let b = backend(tmp.path());
        let day = NaiveDate::from_ymd_opt(2025, 4, 1).unwrap();

        let first = crawl(day, 8, &["A"]);
        b.save_news_data(&first).await;
        assert!(b.detect_new_titles(&first).await.contains("p1", "A"));

        let second = crawl(day, 9, &["A", "B"]);
        b.save_news_data(&second).await;
        let nt = b.detect_new_titles(&second).await;
        assert!(!nt.contains("p1", "A"));
        assert!(nt.contains("p1", "B"));
    }

    #[tokio::test]
    async fn missing_day_reads_as_none() {
        let tmp = tempfile::tempdir().unwrap();
        let b = backend(tmp.path());
        let day = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        assert!(b.get_today_all_data(Some(day)).await.is_none());
        assert!(b.is_first_crawl_today(Some(day)).await);
        assert!(!b.has_pushed_today(Some(day)).await);
    }

    #[tokio::test]
    async fn push_records_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let b = backend(tmp.path());
        let day = NaiveDate::from_ymd_opt(2025, 4, 1).unwrap();
        assert!(b.record_push("Daily Summary", Some(day)).await);
        assert!(b.has_pushed_today(Some(day)).await);
        assert!(!b
            .has_pushed_today(Some(day.succ_opt().unwrap()))
            .await);
    }

    #[tokio::test]
    async fn retention_removes_only_expired_day_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let b = backend(tmp.path());
        let today = today_in(chrono_tz::UTC);
        let old = today - chrono::Duration::days(10);
        let recent = today - chrono::Duration::days(2);

        b.save_news_data(&crawl(old, 8, &["A"])).await;
        b.save_news_data(&crawl(recent, 8, &["A"])).await;
        std::fs::create_dir_all(tmp.path().join("not-a-day")).unwrap();

        assert_eq!(b.cleanup_old_data(0).await, 0);
        assert_eq!(b.cleanup_old_data(u32::MAX).await, 0);
        assert!(tmp.path().join(record::day_key(old)).exists());
        assert_eq!(b.cleanup_old_data(5).await, 1);
        assert!(!tmp.path().join(record::day_key(old)).exists());
        assert!(tmp.path().join(record::day_key(recent)).exists());
        assert!(tmp.path().join("not-a-day").exists());
    }

    #[tokio::test]
    async fn artifacts_respect_format_switches() {
        let tmp = tempfile::tempdir().unwrap();
        let off = LocalBackend::new(tmp.path(), false, false, chrono_tz::UTC);
        let day = NaiveDate::from_ymd_opt(2025, 4, 1).unwrap();
        assert!(off.save_txt_snapshot(&crawl(day, 8, &["A"])).await.is_none());
        assert!(off
            .save_html_report("<p/>", "r.html", true, Some(day))
            .await
            .is_none());

        let on = backend(tmp.path());
        let txt = on.save_txt_snapshot(&crawl(day, 8, &["A"])).await.unwrap();
        assert!(txt.ends_with("08-00-00.txt"));
        let html = on
            .save_html_report("<p/>", "r.html", true, Some(day))
            .await
            .unwrap();
        assert_eq!(
            Path::new(&html),
            tmp.path().join("2025-04-01").join(record::HTML_DIR).join("r.html")
        );
        assert!(Path::new(&html).exists());
        assert!(tmp.path().join("index.html").exists());
    }
}
