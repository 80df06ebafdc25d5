//! Day-bucket serialization shared by the Local and Remote backends.
//!
//! A day record is an ordered crawl log. The Title History of the day is never
//! stored; it is folded from the log on read so that "history before crawl N" is
//! always available for novelty detection.

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::news::{NewsData, TitleEntry};

pub const NEWS_FILE: &str = "news.json";
pub const PUSH_FILE: &str = "push_records.json";
pub const TXT_DIR: &str = "txt";
pub const HTML_DIR: &str = "html";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceItem {
    pub ranks: Vec<u32>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub mobile_url: String,
}

/// One crawl, as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlSlice {
    pub crawl_time: NaiveTime,
    pub platforms: BTreeMap<String, BTreeMap<String, SliceItem>>,
    #[serde(default)]
    pub failed_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayRecord {
    pub date: NaiveDate,
    #[serde(default)]
    pub id_to_name: BTreeMap<String, String>,
    /// Sorted by `crawl_time`, unique per time.
    #[serde(default)]
    pub crawls: Vec<CrawlSlice>,
}

impl DayRecord {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            id_to_name: BTreeMap::new(),
            crawls: Vec::new(),
        }
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).context("parse day record")
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).context("serialize day record")
    }

    /// Merge-append one crawl. Re-saving a crawl with the same `crawl_time` replaces
    /// that slice, so repeated saves of the same data are idempotent.
    pub fn merge(&mut self, data: &NewsData) {
        for (id, name) in &data.id_to_name {
            self.id_to_name.insert(id.clone(), name.clone());
        }

        let slice = CrawlSlice {
            crawl_time: data.crawl_time,
            platforms: data
                .platforms
                .iter()
                .map(|(pid, titles)| {
                    let items = titles
                        .iter()
                        .map(|(t, e)| {
                            (
                                t.clone(),
                                SliceItem {
                                    ranks: e.ranks.clone(),
                                    url: e.url.clone(),
                                    mobile_url: e.mobile_url.clone(),
                                },
                            )
                        })
                        .collect();
                    (pid.clone(), items)
                })
                .collect(),
            failed_ids: data.failed_ids.clone(),
        };

        match self
            .crawls
            .binary_search_by(|c| c.crawl_time.cmp(&slice.crawl_time))
        {
            Ok(idx) => self.crawls[idx] = slice,
            Err(idx) => self.crawls.insert(idx, slice),
        }
    }

    /// Accumulated Title History over every crawl of the day.
    pub fn history(&self) -> Option<NewsData> {
        self.fold(self.crawls.iter())
    }

    /// Title History over crawls strictly earlier than `crawl_time`.
    pub fn history_before(&self, crawl_time: NaiveTime) -> Option<NewsData> {
        self.fold(self.crawls.iter().filter(|c| c.crawl_time < crawl_time))
    }

    /// Only the most recent crawl.
    pub fn latest(&self) -> Option<NewsData> {
        self.fold(self.crawls.last().into_iter())
    }

    pub fn crawl_count(&self) -> usize {
        self.crawls.len()
    }

    fn fold<'a>(&self, crawls: impl Iterator<Item = &'a CrawlSlice>) -> Option<NewsData> {
        let mut out: Option<NewsData> = None;

        for c in crawls {
            let data = out.get_or_insert_with(|| {
                let mut d = NewsData::empty(self.date, c.crawl_time);
                d.id_to_name = self.id_to_name.clone();
                d
            });
            data.crawl_time = c.crawl_time;
            data.failed_ids = c.failed_ids.clone();

            for (pid, items) in &c.platforms {
                let titles = data.platforms.entry(pid.clone()).or_default();
                for (title, item) in items {
                    match titles.get_mut(title) {
                        Some(e) => {
                            e.last_time = c.crawl_time;
                            e.count += 1;
                            for r in &item.ranks {
                                if !e.ranks.contains(r) {
                                    e.ranks.push(*r);
                                }
                            }
                            if !item.url.is_empty() {
                                e.url = item.url.clone();
                            }
                            if !item.mobile_url.is_empty() {
                                e.mobile_url = item.mobile_url.clone();
                            }
                        }
                        None => {
                            titles.insert(
                                title.clone(),
                                TitleEntry {
                                    ranks: item.ranks.clone(),
                                    url: item.url.clone(),
                                    mobile_url: item.mobile_url.clone(),
                                    first_time: c.crawl_time,
                                    last_time: c.crawl_time,
                                    count: 1,
                                },
                            );
                        }
                    }
                }
            }
        }

        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushEntry {
    pub pushed_at: DateTime<FixedOffset>,
}

/// report type -> first successful push of the day
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushLog {
    #[serde(default)]
    pub records: BTreeMap<String, PushEntry>,
}

impl PushLog {
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).context("parse push records")
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).context("serialize push records")
    }

    /// Keeps the first push per report type; later records are ignored.
    pub fn record(&mut self, report_type: &str, at: DateTime<FixedOffset>) {
        self.records
            .entry(report_type.to_string())
            .or_insert(PushEntry { pushed_at: at });
    }

    pub fn any(&self) -> bool {
        !self.records.is_empty()
    }
}

/// Raw TXT snapshot of one crawl.
pub fn render_txt_snapshot(data: &NewsData) -> String {
    let mut out = String::new();
    for (pid, titles) in &data.platforms {
        let name = data.platform_name(pid);
        if name == pid {
            out.push_str(&format!("{pid}\n"));
        } else {
            out.push_str(&format!("{pid} | {name}\n"));
        }

        let mut rows: Vec<_> = titles.iter().collect();
        rows.sort_by_key(|(_, e)| e.best_rank());
        for (title, e) in rows {
            let rank = e.ranks.first().copied().unwrap_or(0);
            let mut line = format!("{rank}. {title}");
            if !e.url.is_empty() {
                line.push_str(&format!(" [URL:{}]", e.url));
            }
            if !e.mobile_url.is_empty() {
                line.push_str(&format!(" [MOBILE:{}]", e.mobile_url));
            }
            out.push_str(&line);
            out.push('\n');
        }
        out.push('\n');
    }

    if !data.failed_ids.is_empty() {
        out.push_str("==== Failed platforms ====\n");
        for id in &data.failed_ids {
            out.push_str(id);
            out.push('\n');
        }
    }
    out
}

/// `HH-MM-SS`, safe for file names and object keys.
pub fn time_stem(t: NaiveTime) -> String {
    t.format("%H-%M-%S").to_string()
}

/// Day-bucket key, `YYYY-MM-DD`.
pub fn day_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn parse_day_key(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim_end_matches('/'), "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crawl(h: u32, titles: &[(&str, &str, u32)]) -> NewsData {
        let t = NaiveTime::from_hms_opt(h, 0, 0).unwrap();
        let mut d = NewsData::empty(NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(), t);
        for (p, title, rank) in titles {
            d.platforms.entry(p.to_string()).or_default().insert(
                title.to_string(),
                TitleEntry {
                    ranks: vec![*rank],
                    url: format!("https://x/{title}"),
                    mobile_url: String::new(),
                    first_time: t,
                    last_time: t,
                    count: 1,
                },
            );
        }
        d.id_to_name.insert("p1".into(), "Platform One".into());
        d
    }

    #[test]
    fn history_accumulates_counts_and_times() {
        let mut rec = DayRecord::new(NaiveDate::from_ymd_opt(2025, 6, 2).unwrap());
        rec.merge(&crawl(8, &[("p1", "X", 3), ("p1", "Y", 1)]));
        rec.merge(&crawl(9, &[("p1", "X", 1)]));

        let h = rec.history().unwrap();
        let x = &h.platforms["p1"]["X"];
        assert_eq!(x.count, 2);
        assert_eq!(x.ranks, vec![3, 1]);
        assert_eq!(x.first_time, NaiveTime::from_hms_opt(8, 0, 0).unwrap());
        assert_eq!(x.last_time, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
        assert_eq!(h.platforms["p1"]["Y"].count, 1);
        assert_eq!(h.platform_name("p1"), "Platform One");
    }

    #[test]
    fn merge_same_crawl_time_is_idempotent() {
        let mut rec = DayRecord::new(NaiveDate::from_ymd_opt(2025, 6, 2).unwrap());
        let c = crawl(8, &[("p1", "X", 1)]);
        rec.merge(&c);
        rec.merge(&c);
        assert_eq!(rec.crawl_count(), 1);
        assert_eq!(rec.history().unwrap().platforms["p1"]["X"].count, 1);
    }

    #[test]
    fn out_of_order_saves_stay_sorted() {
        let mut rec = DayRecord::new(NaiveDate::from_ymd_opt(2025, 6, 2).unwrap());
        rec.merge(&crawl(10, &[("p1", "B", 1)]));
        rec.merge(&crawl(8, &[("p1", "A", 1)]));
        let latest = rec.latest().unwrap();
        assert!(latest.contains("p1", "B"));
        assert!(!latest.contains("p1", "A"));
    }

    #[test]
    fn history_before_excludes_current_and_later() {
        let mut rec = DayRecord::new(NaiveDate::from_ymd_opt(2025, 6, 2).unwrap());
        rec.merge(&crawl(8, &[("p1", "A", 1)]));
        rec.merge(&crawl(9, &[("p1", "B", 1)]));
        let before = rec
            .history_before(NaiveTime::from_hms_opt(9, 0, 0).unwrap())
            .unwrap();
        assert!(before.contains("p1", "A"));
        assert!(!before.contains("p1", "B"));
        assert!(rec
            .history_before(NaiveTime::from_hms_opt(8, 0, 0).unwrap())
            .is_none());
    }

    #[test]
    fn push_log_keeps_first_record() {
        let mut log = PushLog::default();
        let t0 = DateTime::parse_from_rfc3339("2025-06-02T20:00:00+08:00").unwrap();
        let t1 = DateTime::parse_from_rfc3339("2025-06-02T21:00:00+08:00").unwrap();
        log.record("Daily Summary", t0);
        log.record("Daily Summary", t1);
        assert_eq!(log.records["Daily Summary"].pushed_at, t0);
        assert!(log.any());
    }

    #[test]
    fn txt_snapshot_lists_titles_by_rank() {
        let mut d = crawl(8, &[("p1", "Second", 2), ("p1", "First", 1)]);
        d.failed_ids.push("p9".into());
        let txt = render_txt_snapshot(&d);
        let first = txt.find("1. First").unwrap();
        let second = txt.find("2. Second").unwrap();
        assert!(first < second);
        assert!(txt.starts_with("p1 | Platform One"));
        assert!(txt.contains("==== Failed platforms ====\np9"));
    }

    #[test]
    fn day_keys_round_trip() {
        let d = NaiveDate::from_ymd_opt(2025, 1, 9).unwrap();
        assert_eq!(day_key(d), "2025-01-09");
        assert_eq!(parse_day_key("2025-01-09/"), Some(d));
        assert_eq!(parse_day_key("html"), None);
    }
}
