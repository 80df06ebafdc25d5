// src/storage/remote.rs
//! S3-compatible backend. Object keys mirror the local layout:
//! `<YYYY-MM-DD>/news.json`, `<YYYY-MM-DD>/push_records.json`,
//! `<YYYY-MM-DD>/html/<file>`. TXT snapshots are not kept remotely.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use chrono_tz::Tz;
use std::path::Path;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::local::write_atomic;
use super::record::{self, DayRecord, PushLog};
use super::s3::ObjectStore;
use super::{retention_cutoff, today_in, StorageBackend};
use crate::news::{NewTitles, NewsData};
use crate::novelty;

const JSON: &str = "application/json";
const HTML: &str = "text/html; charset=utf-8";

pub struct RemoteBackend {
    store: Box<dyn ObjectStore>,
    enable_html: bool,
    tz: Tz,
    write_lock: Mutex<()>,
}

impl RemoteBackend {
    /// Builds the backend and probes the bucket. Any failure here makes the
    /// manager fall back to Local.
    pub async fn connect(store: Box<dyn ObjectStore>, enable_html: bool, tz: Tz) -> Result<Self> {
        store
            .head_bucket()
            .await
            .with_context(|| format!("bucket `{}` not reachable", store.bucket()))?;
        info!(bucket = store.bucket(), "remote storage connected");
        Ok(Self {
            store,
            enable_html,
            tz,
            write_lock: Mutex::new(()),
        })
    }

    fn resolve(&self, date: Option<NaiveDate>) -> NaiveDate {
        date.unwrap_or_else(|| today_in(self.tz))
    }

    fn key(date: NaiveDate, name: &str) -> String {
        format!("{}/{name}", record::day_key(date))
    }

    async fn read_day(&self, date: NaiveDate) -> Result<Option<DayRecord>> {
        match self.store.get_object(&Self::key(date, record::NEWS_FILE)).await? {
            Some(bytes) => Ok(Some(DayRecord::from_json(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn read_push_log(&self, date: NaiveDate) -> Result<PushLog> {
        match self.store.get_object(&Self::key(date, record::PUSH_FILE)).await? {
            Some(bytes) => PushLog::from_json(&bytes),
            None => Ok(PushLog::default()),
        }
    }

    async fn try_save(&self, data: &NewsData) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut day = self
            .read_day(data.crawl_date)
            .await?
            .unwrap_or_else(|| DayRecord::new(data.crawl_date));
        day.merge(data);
        self.store
            .put_object(&Self::key(data.crawl_date, record::NEWS_FILE), day.to_json()?, JSON)
            .await
    }

    async fn try_record_push(&self, report_type: &str, date: NaiveDate) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut log = self.read_push_log(date).await?;
        log.record(report_type, chrono::Utc::now().with_timezone(&self.tz).fixed_offset());
        self.store
            .put_object(&Self::key(date, record::PUSH_FILE), log.to_json()?, JSON)
            .await
    }

    async fn try_cleanup(&self, retention_days: u32) -> Result<usize> {
        let Some(cutoff) = retention_cutoff(today_in(self.tz), retention_days) else {
            return Ok(0);
        };
        let days = self.store.list("", Some("/")).await?;

        let mut removed = 0usize;
        for prefix in days.prefixes {
            let Some(date) = record::parse_day_key(&prefix) else {
                continue;
            };
            if date >= cutoff {
                continue;
            }
            let objects = self.store.list(&prefix, None).await?;
            let mut ok = true;
            for key in &objects.keys {
                if let Err(e) = self.store.delete_object(key).await {
                    warn!(key = %key, error = ?e, "failed to delete expired object");
                    ok = false;
                }
            }
            if ok {
                debug!(day = %date, objects = objects.keys.len(), "removed expired remote day");
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Copies the news and push records of every remote day within the last
    /// `days` days. A failing object is logged and skipped.
    async fn try_pull(&self, days: u32, data_dir: &Path) -> Result<usize> {
        if days == 0 {
            return Ok(0);
        }
        let today = today_in(self.tz);
        let oldest = retention_cutoff(today, days - 1);
        let listing = self.store.list("", Some("/")).await?;

        let mut pulled = 0usize;
        for prefix in listing.prefixes {
            let Some(date) = record::parse_day_key(&prefix) else {
                continue;
            };
            if date > today || oldest.is_some_and(|o| date < o) {
                continue;
            }
            let day_dir = data_dir.join(record::day_key(date));
            for name in [record::NEWS_FILE, record::PUSH_FILE] {
                let key = Self::key(date, name);
                let bytes = match self.store.get_object(&key).await {
                    Ok(Some(bytes)) => bytes,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(key = %key, error = ?e, "remote object not pulled");
                        continue;
                    }
                };
                match write_atomic(&day_dir.join(name), &bytes).await {
                    Ok(()) => pulled += 1,
                    Err(e) => warn!(key = %key, error = ?e, "pulled object not written locally"),
                }
            }
        }
        Ok(pulled)
    }
}

#[async_trait]
impl StorageBackend for RemoteBackend {
    fn backend_name(&self) -> &'static str {
        "remote"
    }

    fn supports_txt(&self) -> bool {
        false
    }

    async fn save_news_data(&self, data: &NewsData) -> bool {
        match self.try_save(data).await {
            Ok(()) => {
                debug!(date = %data.crawl_date, titles = data.title_count(), "saved crawl remotely");
                true
            }
            Err(e) => {
                warn!(error = ?e, "remote save failed");
                false
            }
        }
    }

    async fn get_today_all_data(&self, date: Option<NaiveDate>) -> Option<NewsData> {
        let date = self.resolve(date);
        match self.read_day(date).await {
            Ok(day) => day.and_then(|d| d.history()),
            Err(e) => {
                warn!(day = %date, error = ?e, "remote read failed");
                None
            }
        }
    }

    async fn get_latest_crawl_data(&self, date: Option<NaiveDate>) -> Option<NewsData> {
        let date = self.resolve(date);
        match self.read_day(date).await {
            Ok(day) => day.and_then(|d| d.latest()),
            Err(e) => {
                warn!(day = %date, error = ?e, "remote read failed");
                None
            }
        }
    }

    async fn detect_new_titles(&self, current: &NewsData) -> NewTitles {
        let prior = match self.read_day(current.crawl_date).await {
            Ok(day) => day.and_then(|d| d.history_before(current.crawl_time)),
            Err(e) => {
                warn!(error = ?e, "remote read failed; treating crawl as first of day");
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

    async fn save_txt_snapshot(&self, _data: &NewsData) -> Option<String> {
        None
    }

    async fn save_html_report(
        &self,
        html: &str,
        filename: &str,
        _is_summary: bool,
        date: Option<NaiveDate>,
    ) -> Option<String> {
        if !self.enable_html {
            return None;
        }
        let key = format!(
            "{}/{}/{filename}",
            record::day_key(self.resolve(date)),
            record::HTML_DIR
        );
        match self
            .store
            .put_object(&key, html.as_bytes().to_vec(), HTML)
            .await
        {
            Ok(()) => Some(format!("s3://{}/{key}", self.store.bucket())),
            Err(e) => {
                warn!(error = ?e, "remote html report not written");
                None
            }
        }
    }

    async fn cleanup_old_data(&self, retention_days: u32) -> usize {
        if retention_days == 0 {
            return 0;
        }
        match self.try_cleanup(retention_days).await {
            Ok(n) => {
                if n > 0 {
                    info!(removed = n, retention_days, "remote retention cleanup");
                }
                n
            }
            Err(e) => {
                warn!(error = ?e, "remote retention cleanup failed");
                0
            }
        }
    }

    async fn has_pushed_today(&self, date: Option<NaiveDate>) -> bool {
        let date = self.resolve(date);
        match self.read_push_log(date).await {
            Ok(log) => log.any(),
            Err(e) => {
                warn!(error = ?e, "remote push records unreadable");
                false
            }
        }
    }

    async fn record_push(&self, report_type: &str, date: Option<NaiveDate>) -> bool {
        let date = self.resolve(date);
        match self.try_record_push(report_type, date).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = ?e, report_type, "remote push record not written");
                false
            }
        }
    }

    async fn pull_recent_days(&self, days: u32, data_dir: &Path) -> usize {
        match self.try_pull(days, data_dir).await {
            Ok(n) => {
                info!(objects = n, dir = %data_dir.display(), "pulled remote objects");
                n
            }
            Err(e) => {
                warn!(error = ?e, "pull from remote failed");
                0
            }
        }
    }

    async fn cleanup(&self) {
        debug!("remote backend released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::local::LocalBackend;
    use crate::storage::s3::Listing;
    use crate::storage::tests::crawl;
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::{Arc, Mutex};

    /// Bucket kept in memory. Clones share the same objects.
    #[derive(Clone, Default)]
    struct MemoryStore {
        objects: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
        broken: Arc<Mutex<BTreeSet<String>>>,
        down: bool,
    }

    impl MemoryStore {
        fn keys(&self) -> Vec<String> {
            self.objects.lock().unwrap().keys().cloned().collect()
        }

        fn break_key(&self, key: &str) {
            self.broken.lock().unwrap().insert(key.to_string());
        }
    }

    #[async_trait]
    impl ObjectStore for MemoryStore {
        fn bucket(&self) -> &str {
            "news"
        }

        async fn head_bucket(&self) -> Result<()> {
            if self.down {
                anyhow::bail!("connection refused");
            }
            Ok(())
        }

        async fn get_object(&self, key: &str) -> Result<Option<Vec<u8>>> {
            if self.broken.lock().unwrap().contains(key) {
                anyhow::bail!("GET {key}: 500");
            }
            Ok(self.objects.lock().unwrap().get(key).cloned())
        }

        async fn put_object(&self, key: &str, body: Vec<u8>, _content_type: &str) -> Result<()> {
            self.objects.lock().unwrap().insert(key.to_string(), body);
            Ok(())
        }

        async fn delete_object(&self, key: &str) -> Result<()> {
            self.objects.lock().unwrap().remove(key);
            Ok(())
        }

        async fn list(&self, prefix: &str, delimiter: Option<&str>) -> Result<Listing> {
            let objects = self.objects.lock().unwrap();
            let mut out = Listing::default();
            for key in objects.keys().filter(|k| k.starts_with(prefix)) {
                let rest = &key[prefix.len()..];
                match delimiter.and_then(|d| rest.find(d).map(|i| i + d.len())) {
                    Some(end) => {
                        let common = format!("{prefix}{}", &rest[..end]);
                        if !out.prefixes.contains(&common) {
                            out.prefixes.push(common);
                        }
                    }
                    None => out.keys.push(key.clone()),
                }
            }
            Ok(out)
        }
    }

    async fn backend(store: &MemoryStore) -> RemoteBackend {
        RemoteBackend::connect(Box::new(store.clone()), true, chrono_tz::UTC)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn connect_fails_when_the_bucket_is_unreachable() {
        let store = MemoryStore {
            down: true,
            ..MemoryStore::default()
        };
        assert!(RemoteBackend::connect(Box::new(store), true, chrono_tz::UTC)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn save_then_read_back_accumulates() {
        let store = MemoryStore::default();
        let b = backend(&store).await;
        let day = NaiveDate::from_ymd_opt(2025, 4, 1).unwrap();

        assert!(b.is_first_crawl_today(Some(day)).await);
        assert!(b.save_news_data(&crawl(day, 8, &["A", "B"])).await);
        assert!(b.is_first_crawl_today(Some(day)).await);
        assert!(b.save_news_data(&crawl(day, 9, &["B", "C"])).await);
        assert_eq!(store.keys(), vec!["2025-04-01/news.json".to_string()]);

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
        let store = MemoryStore::default();
        let b = backend(&store).await;
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
    async fn unreadable_day_degrades_to_first_crawl() {
        let store = MemoryStore::default();
        let b = backend(&store).await;
        let day = NaiveDate::from_ymd_opt(2025, 4, 1).unwrap();
        b.save_news_data(&crawl(day, 8, &["A"])).await;
        store.break_key("2025-04-01/news.json");

        assert!(b.get_today_all_data(Some(day)).await.is_none());
        assert!(b.is_first_crawl_today(Some(day)).await);
        assert!(b
            .detect_new_titles(&crawl(day, 9, &["A"]))
            .await
            .contains("p1", "A"));
        assert!(!b.save_news_data(&crawl(day, 9, &["B"])).await);
    }

    #[tokio::test]
    async fn push_records_are_per_day() {
        let store = MemoryStore::default();
        let b = backend(&store).await;
        let day = NaiveDate::from_ymd_opt(2025, 4, 1).unwrap();

        assert!(!b.has_pushed_today(Some(day)).await);
        assert!(b.record_push("Daily Summary", Some(day)).await);
        assert!(b.has_pushed_today(Some(day)).await);
        assert!(!b.has_pushed_today(day.succ_opt()).await);
        assert!(store.keys().contains(&"2025-04-01/push_records.json".to_string()));
    }

    #[tokio::test]
    async fn html_reports_are_filed_under_the_given_day() {
        let store = MemoryStore::default();
        let b = backend(&store).await;
        let day = NaiveDate::from_ymd_opt(2025, 4, 1).unwrap();

        assert!(!b.supports_txt());
        assert!(b.save_txt_snapshot(&crawl(day, 8, &["A"])).await.is_none());
        let url = b
            .save_html_report("<p/>", "r.html", false, Some(day))
            .await
            .unwrap();
        assert_eq!(url, "s3://news/2025-04-01/html/r.html");

        let no_html = RemoteBackend::connect(Box::new(store.clone()), false, chrono_tz::UTC)
            .await
            .unwrap();
        assert!(no_html
            .save_html_report("<p/>", "s.html", true, Some(day))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn retention_removes_every_object_of_expired_days() {
        let store = MemoryStore::default();
        let b = backend(&store).await;
        let today = today_in(chrono_tz::UTC);
        let old = today - chrono::Duration::days(10);
        let recent = today - chrono::Duration::days(2);

        b.save_news_data(&crawl(old, 8, &["A"])).await;
        b.record_push("Daily Summary", Some(old)).await;
        b.save_html_report("<p/>", "r.html", true, Some(old)).await;
        b.save_news_data(&crawl(recent, 8, &["A"])).await;
        store
            .put_object("not-a-day/x", Vec::new(), JSON)
            .await
            .unwrap();

        assert_eq!(b.cleanup_old_data(0).await, 0);
        assert_eq!(b.cleanup_old_data(u32::MAX).await, 0);
        assert_eq!(b.cleanup_old_data(5).await, 1);

        let old_prefix = format!("{}/", record::day_key(old));
        let keys = store.keys();
        assert!(keys.iter().all(|k| !k.starts_with(&old_prefix)));
        assert!(keys.contains(&format!("{}/news.json", record::day_key(recent))));
        assert!(keys.contains(&"not-a-day/x".to_string()));
    }

    #[tokio::test]
    async fn pull_hydrates_a_local_dir_and_skips_failing_objects() {
        let store = MemoryStore::default();
        let b = backend(&store).await;
        let today = today_in(chrono_tz::UTC);
        let yesterday = today - chrono::Duration::days(1);
        let stale = today - chrono::Duration::days(10);

        b.save_news_data(&crawl(today, 8, &["A"])).await;
        b.record_push("Daily Summary", Some(today)).await;
        b.save_news_data(&crawl(yesterday, 8, &["B"])).await;
        b.save_news_data(&crawl(stale, 8, &["C"])).await;
        store.break_key(&format!("{}/news.json", record::day_key(yesterday)));

        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(b.pull_recent_days(0, tmp.path()).await, 0);
        assert_eq!(b.pull_recent_days(3, tmp.path()).await, 2);

        let local = LocalBackend::new(tmp.path(), false, false, chrono_tz::UTC);
        assert!(local
            .get_today_all_data(Some(today))
            .await
            .unwrap()
            .contains("p1", "A"));
        assert!(local.has_pushed_today(Some(today)).await);
        assert!(local.get_today_all_data(Some(yesterday)).await.is_none());
        assert!(!tmp.path().join(record::day_key(stale)).exists());
    }
}
