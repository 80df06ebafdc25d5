//! Crawl observations (`NewsData`) and the new-title map produced by novelty detection.
//!
//! A `NewsData` is either one crawl's slice (every `count` is 1) or the merged
//! Title History of a whole day, depending on which storage call produced it.

use chrono::{DateTime, NaiveDate, NaiveTime, Timelike};
use chrono_tz::Tz;
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::crawler::CrawlOutcome;

/// Metadata kept for one (platform, title) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleEntry {
    /// Ranks observed, de-duplicated, in first-seen order.
    pub ranks: Vec<u32>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub mobile_url: String,
    pub first_time: NaiveTime,
    pub last_time: NaiveTime,
    /// Number of crawls the title appeared in.
    pub count: u32,
}

impl TitleEntry {
    pub fn best_rank(&self) -> u32 {
        self.ranks.iter().copied().min().unwrap_or(u32::MAX)
    }
}

/// platform id -> normalized title -> entry
pub type PlatformTitles = BTreeMap<String, TitleEntry>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsData {
    pub crawl_date: NaiveDate,
    pub crawl_time: NaiveTime,
    pub platforms: BTreeMap<String, PlatformTitles>,
    #[serde(default)]
    pub id_to_name: BTreeMap<String, String>,
    #[serde(default)]
    pub failed_ids: Vec<String>,
}

impl NewsData {
    pub fn empty(crawl_date: NaiveDate, crawl_time: NaiveTime) -> Self {
        Self {
            crawl_date,
            crawl_time,
            platforms: BTreeMap::new(),
            id_to_name: BTreeMap::new(),
            failed_ids: Vec::new(),
        }
    }

    /// Build one crawl's slice from raw fetch results.
    ///
    /// Titles are normalized into storage keys; two raw titles that collapse to the
    /// same key share one entry and their ranks are merged.
    pub fn from_crawl(outcome: &CrawlOutcome, crawl_at: DateTime<Tz>) -> Self {
        let crawl_time = truncate_to_seconds(crawl_at.time());
        let mut data = Self::empty(crawl_at.date_naive(), crawl_time);

        for (platform_id, items) in &outcome.results {
            let titles = data.platforms.entry(platform_id.clone()).or_default();
            for (raw_title, item) in items {
                let key = normalize_title(raw_title);
                if key.is_empty() {
                    continue;
                }
                let entry = titles.entry(key).or_insert_with(|| TitleEntry {
                    ranks: Vec::new(),
                    url: String::new(),
                    mobile_url: String::new(),
                    first_time: crawl_time,
                    last_time: crawl_time,
                    count: 1,
                });
                for r in &item.ranks {
                    if !entry.ranks.contains(r) {
                        entry.ranks.push(*r);
                    }
                }
                if entry.url.is_empty() {
                    entry.url = item.url.clone();
                }
                if entry.mobile_url.is_empty() {
                    entry.mobile_url = item.mobile_url.clone();
                }
            }
        }

        data.id_to_name = outcome.id_to_name.clone();
        data.failed_ids = outcome.failed_ids.clone();
        data
    }

    /// Number of (platform, title) pairs.
    pub fn title_count(&self) -> usize {
        self.platforms.values().map(|t| t.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.title_count() == 0
    }

    pub fn contains(&self, platform_id: &str, title: &str) -> bool {
        self.platforms
            .get(platform_id)
            .is_some_and(|t| t.contains_key(title))
    }

    /// Display name for a platform, falling back to its id.
    pub fn platform_name<'a>(&'a self, platform_id: &'a str) -> &'a str {
        self.id_to_name
            .get(platform_id)
            .map(|s| s.as_str())
            .unwrap_or(platform_id)
    }

    /// Drop platforms that are no longer configured.
    pub fn retain_platforms(&mut self, platform_ids: &[String]) {
        self.platforms.retain(|id, _| platform_ids.contains(id));
    }
}

/// Titles never seen before today, per platform. Title lists are sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NewTitles(BTreeMap<String, Vec<String>>);

impl NewTitles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `titles` for `platform_id`. Empty lists are not stored.
    pub fn insert(&mut self, platform_id: impl Into<String>, mut titles: Vec<String>) {
        if titles.is_empty() {
            return;
        }
        titles.sort();
        titles.dedup();
        self.0.insert(platform_id.into(), titles);
    }

    pub fn get(&self, platform_id: &str) -> Option<&[String]> {
        self.0.get(platform_id).map(|v| v.as_slice())
    }

    pub fn contains(&self, platform_id: &str, title: &str) -> bool {
        self.0
            .get(platform_id)
            .is_some_and(|v| v.binary_search_by(|t| t.as_str().cmp(title)).is_ok())
    }

    /// True when no platform has a new title.
    pub fn is_empty(&self) -> bool {
        self.0.values().all(|v| v.is_empty())
    }

    pub fn total(&self) -> usize {
        self.0.values().map(|v| v.len()).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.0.iter()
    }
}

/// Storage-key form of a title: HTML entities decoded, whitespace collapsed, trimmed.
/// Novelty detection compares these keys by exact equality.
pub fn normalize_title(raw: &str) -> String {
    let decoded = html_escape::decode_html_entities(raw);
    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").expect("whitespace regex"));
    re_ws.replace_all(&decoded, " ").trim().to_string()
}

pub(crate) fn truncate_to_seconds(t: NaiveTime) -> NaiveTime {
    t.with_nanosecond(0).unwrap_or(t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::RawItem;
    use chrono::TimeZone;

    fn outcome() -> CrawlOutcome {
        let mut out = CrawlOutcome::default();
        let mut items = BTreeMap::new();
        items.insert(
            "Rust  1.90 released".to_string(),
            RawItem {
                ranks: vec![1],
                url: "https://a/1".into(),
                mobile_url: String::new(),
            },
        );
        items.insert(
            " Rust 1.90 released ".to_string(),
            RawItem {
                ranks: vec![4],
                url: "https://a/4".into(),
                mobile_url: "https://m/4".into(),
            },
        );
        out.results.insert("hn".into(), items);
        out.id_to_name.insert("hn".into(), "Hacker News".into());
        out.failed_ids.push("weibo".into());
        out
    }

    #[test]
    fn normalize_collapses_whitespace_and_entities() {
        assert_eq!(normalize_title("  A&amp;B \n  rises "), "A&B rises");
    }

    #[test]
    fn from_crawl_merges_titles_with_same_key() {
        let at = chrono_tz::America::New_York
            .with_ymd_and_hms(2025, 3, 1, 9, 30, 15)
            .unwrap();
        let data = NewsData::from_crawl(&outcome(), at);

        assert_eq!(data.crawl_date, NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());
        assert_eq!(data.title_count(), 1);
        let e = &data.platforms["hn"]["Rust 1.90 released"];
        assert_eq!(e.count, 1);
        assert_eq!(e.ranks.len(), 2);
        assert_eq!(e.best_rank(), 1);
        assert_eq!(e.mobile_url, "https://m/4");
        assert_eq!(data.platform_name("hn"), "Hacker News");
        assert_eq!(data.platform_name("zhihu"), "zhihu");
        assert_eq!(data.failed_ids, vec!["weibo".to_string()]);
    }

    #[test]
    fn new_titles_ignores_empty_lists() {
        let mut nt = NewTitles::new();
        nt.insert("a", vec![]);
        assert!(nt.is_empty());
        nt.insert("b", vec!["y".into(), "x".into(), "x".into()]);
        assert!(!nt.is_empty());
        assert_eq!(nt.total(), 2);
        assert!(nt.contains("b", "x"));
        assert!(!nt.contains("a", "x"));
    }
}
