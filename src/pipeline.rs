// src/pipeline.rs
//! One analysis run: crawl, persist, detect new titles, score, report, notify.
//!
//! [`AppContext`] is built once per process and owns every collaborator the run
//! needs. [`NewsAnalyzer::run`] drives the stages in order and always releases
//! storage at the end, whether the run succeeded or not.

use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{AppConfig, ConfigError};
use crate::crawler::{Crawler, NewsNowFetcher};
use crate::frequency::{count_frequency, FrequencyWords};
use crate::mode::{DataWindow, ModeStrategy, ReportMode};
use crate::news::{NewTitles, NewsData};
use crate::notify::{NotifierMux, ReportPayload};
use crate::push_window::{Admission, PushWindow};
use crate::report::{html_filename, prepare_report, render_html, ReportInput};
use crate::storage::StorageManager;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Data that was saved successfully cannot be read back.
    #[error("data consistency check failed: {0}")]
    Consistency(String),
}

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("crawl_failed_platforms_total", "Platforms that could not be crawled.");
        describe_counter!("titles_saved_total", "Titles persisted across all crawls.");
        describe_gauge!("new_titles_last_run", "New titles detected by the latest crawl.");
    });
}

/// Everything a run needs, constructed once at startup.
pub struct AppContext {
    pub config: AppConfig,
    pub tz: Tz,
    pub words: FrequencyWords,
    pub storage: StorageManager,
    pub crawler: Box<dyn Crawler>,
    pub notifiers: NotifierMux,
    pub push_window: PushWindow,
}

impl AppContext {
    pub fn new(
        config: AppConfig,
        words: FrequencyWords,
        storage: StorageManager,
        crawler: Box<dyn Crawler>,
        notifiers: NotifierMux,
    ) -> Result<Self, ConfigError> {
        let tz = config.timezone()?;
        let push_window = PushWindow::from_config(&config.notification.push_window)?;
        Ok(Self {
            config,
            tz,
            words,
            storage,
            crawler,
            notifiers,
            push_window,
        })
    }

    /// Production wiring: HTTP crawler, storage from config and environment,
    /// notifiers for every configured account.
    pub fn from_config(config: AppConfig, words: FrequencyWords) -> anyhow::Result<Self> {
        let tz = config.timezone()?;
        let c = &config.crawler;
        let crawler = NewsNowFetcher::new(
            c.api_url.clone(),
            Duration::from_secs(c.timeout_secs.max(1)),
            c.proxy_url.as_deref(),
        )
        .context("build crawler")?
        .with_retries(c.max_retries);
        let storage = StorageManager::new(&config.storage, tz);
        let notifiers = NotifierMux::from_config(&config.notification);
        Ok(Self::new(config, words, storage, Box::new(crawler), notifiers)?)
    }

    pub fn now(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&self.tz)
    }
}

/// What a run produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub realtime_sent: bool,
    pub summary_sent: bool,
    pub html_file: Option<String>,
    pub summary_html: Option<String>,
}

pub struct NewsAnalyzer {
    ctx: AppContext,
}

impl NewsAnalyzer {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &AppContext {
        &self.ctx
    }

    pub async fn run(&self) -> Result<RunSummary, PipelineError> {
        self.run_at(self.ctx.now()).await
    }

    /// Run with an explicit clock. Storage is released on every path.
    pub async fn run_at(&self, now: DateTime<Tz>) -> Result<RunSummary, PipelineError> {
        ensure_metrics_described();
        let result = self.run_stages(now).await;

        let removed = self.ctx.storage.cleanup_old_data().await;
        if removed > 0 {
            info!(removed, "expired day-buckets removed");
        }
        self.ctx.storage.cleanup().await;
        result
    }

    fn log_startup(&self, now: DateTime<Tz>, strategy: &ModeStrategy) {
        let cfg = &self.ctx.config;
        info!(time = %now.format("%Y-%m-%d %H:%M:%S"), tz = %self.ctx.tz, "run started");
        if !cfg.notification.enabled {
            info!("notifications disabled; crawling only");
        } else if !cfg.notification.channels.any_configured() && self.ctx.notifiers.is_empty() {
            info!("no notification channel configured; crawling only");
        } else {
            info!(accounts = self.ctx.notifiers.len(), "notifications enabled");
        }
        info!(mode = %strategy.mode, description = strategy.description, "report mode");
    }

    async fn run_stages(&self, now: DateTime<Tz>) -> Result<RunSummary, PipelineError> {
        let cfg = &self.ctx.config;
        let storage = &self.ctx.storage;
        let strategy = cfg.report.mode.strategy();
        let mut summary = RunSummary::default();

        if !cfg.crawler.enabled {
            info!("crawler disabled; nothing to do");
            return Ok(summary);
        }
        self.log_startup(now, &strategy);

        let pulled = storage.pull_from_remote().await;
        if pulled > 0 {
            info!(objects = pulled, "pulled remote history");
        }

        let platform_ids = cfg.platform_ids();
        info!(platforms = ?platform_ids, interval_ms = cfg.crawler.request_interval_ms, "crawl started");
        let outcome = self
            .ctx
            .crawler
            .crawl(&cfg.crawler.platforms, cfg.crawler.request_interval_ms)
            .await;
        let mut current = NewsData::from_crawl(&outcome, now);
        current.retain_platforms(&platform_ids);
        let date = current.crawl_date;

        let saved = storage.save_news_data(&current).await;
        if saved {
            counter!("titles_saved_total").increment(current.title_count() as u64);
            let backend = storage.backend_name().await;
            info!(
                backend,
                titles = current.title_count(),
                failed = current.failed_ids.len(),
                "crawl saved"
            );
        } else {
            warn!("crawl could not be saved");
        }
        if let Some(path) = storage.save_txt_snapshot(&current).await {
            debug!(path = %path, "txt snapshot saved");
        }

        let new_titles = storage.detect_new_titles(&current).await;
        gauge!("new_titles_last_run").set(new_titles.total() as f64);
        if storage.is_first_crawl_today(Some(date)).await {
            info!("first crawl of the day; every title is new");
        }
        info!(new = new_titles.total(), "novelty detected");

        // Real-time analysis over the mode's data window.
        let day_data;
        let data: &NewsData = match strategy.window {
            DataWindow::ThisCrawl => &current,
            DataWindow::WholeDay => match storage.get_today_all_data(Some(date)).await {
                Some(mut day) => {
                    day.retain_platforms(&platform_ids);
                    day_data = day;
                    &day_data
                }
                None if saved => {
                    return Err(PipelineError::Consistency(format!(
                        "no data for {date} right after saving it"
                    )));
                }
                None => {
                    warn!("day history unavailable; scoring this crawl only");
                    &current
                }
            },
        };
        let only_new = strategy.mode == ReportMode::Incremental;
        let result = count_frequency(data, &self.ctx.words, &new_titles, only_new);
        let report_type = strategy
            .realtime_report_type
            .unwrap_or(strategy.summary_report_type);
        let mut payload = prepare_report(ReportInput {
            report_type,
            mode: strategy.mode,
            generated_at: now.fixed_offset(),
            result: &result,
            new_titles: &new_titles,
            data,
            failed_ids: &current.failed_ids,
            rank_threshold: cfg.report.rank_threshold,
        });
        summary.html_file = self
            .store_html(&mut payload, html_filename(strategy.mode, false, now.time()), false, date)
            .await;

        if strategy.should_send_realtime() {
            summary.realtime_sent = self.send_if_needed(&payload, &new_titles, now).await;
        }

        if strategy.should_generate_summary() {
            let (html, sent) = self
                .summary(&strategy, &new_titles, &platform_ids, now)
                .await;
            summary.summary_html = html;
            summary.summary_sent = sent;
        }

        info!(
            realtime_sent = summary.realtime_sent,
            summary_sent = summary.summary_sent,
            "run finished"
        );
        Ok(summary)
    }

    /// Day summary. Only rendered when real-time already fired for this run,
    /// otherwise also pushed.
    async fn summary(
        &self,
        strategy: &ModeStrategy,
        new_titles: &NewTitles,
        platform_ids: &[String],
        now: DateTime<Tz>,
    ) -> (Option<String>, bool) {
        let Some(mut day) = self
            .ctx
            .storage
            .get_today_all_data(Some(now.date_naive()))
            .await
        else {
            warn!(report_type = strategy.summary_report_type, "no data for summary");
            return (None, false);
        };
        day.retain_platforms(platform_ids);

        let result = count_frequency(&day, &self.ctx.words, new_titles, false);
        let mut payload = prepare_report(ReportInput {
            report_type: strategy.summary_report_type,
            mode: strategy.summary_mode,
            generated_at: now.fixed_offset(),
            result: &result,
            new_titles,
            data: &day,
            failed_ids: &[],
            rank_threshold: self.ctx.config.report.rank_threshold,
        });
        let html = self
            .store_html(
                &mut payload,
                html_filename(strategy.summary_mode, true, now.time()),
                true,
                now.date_naive(),
            )
            .await;
        if let Some(path) = &html {
            info!(report_type = strategy.summary_report_type, path = %path, "summary report written");
        }

        if strategy.should_send_realtime() {
            return (html, false);
        }
        let sent = self.send_if_needed(&payload, new_titles, now).await;
        (html, sent)
    }

    /// Render and store the HTML page; the body rides along for email.
    async fn store_html(
        &self,
        payload: &mut ReportPayload,
        filename: String,
        is_summary: bool,
        date: NaiveDate,
    ) -> Option<String> {
        if !self.ctx.config.storage.formats.html {
            return None;
        }
        let html = render_html(payload);
        let path = self
            .ctx
            .storage
            .save_html_report(&html, &filename, is_summary, Some(date))
            .await;
        payload.html_body = Some(html);
        path
    }

    /// Apply every notification gate, then dispatch. Returns whether at least
    /// one channel delivered the report.
    async fn send_if_needed(
        &self,
        payload: &ReportPayload,
        new_titles: &NewTitles,
        now: DateTime<Tz>,
    ) -> bool {
        let report_type = payload.report_type.as_str();
        if !self.ctx.config.notification.enabled {
            info!(report_type, "notifications disabled; not sending");
            return false;
        }
        if self.ctx.notifiers.is_empty() {
            warn!(report_type, "notifications enabled but no channel is configured");
            return false;
        }
        if !payload.mode.has_valid_content(&payload.stats, new_titles) {
            if payload.mode == ReportMode::Incremental && new_titles.is_empty() {
                info!(report_type, "no new titles; not sending");
            } else {
                info!(report_type, mode = %payload.mode, "no matching titles; not sending");
            }
            return false;
        }

        let window = &self.ctx.push_window;
        let date = now.date_naive();
        let pushed_today = window.enabled
            && window.once_per_day
            && self.ctx.storage.has_pushed_today(Some(date)).await;
        match window.admit(now.time(), pushed_today) {
            Admission::Admit => {}
            Admission::OutsideWindow => {
                info!(
                    report_type,
                    now = %now.format("%H:%M"),
                    start = %window.start.format("%H:%M"),
                    end = %window.end.format("%H:%M"),
                    "outside push window; not sending"
                );
                return false;
            }
            Admission::AlreadyPushedToday => {
                info!(report_type, "already pushed today; not sending");
                return false;
            }
        }

        let results = self.ctx.notifiers.dispatch_all(payload).await;
        let delivered = results.values().any(|ok| *ok);
        if delivered {
            if !self.ctx.storage.record_push(report_type, Some(date)).await {
                warn!(report_type, "push succeeded but could not be recorded");
            }
        } else {
            warn!(report_type, channels = ?results, "no channel delivered the report");
        }
        delivered
    }
}
