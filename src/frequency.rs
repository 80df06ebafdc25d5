// src/frequency.rs
//! Keyword groups and per-group title statistics.
//!
//! Groups come from a plain-text file: blank lines separate groups, `#` starts a
//! comment, `+word` must appear, `!word` must not appear, any other word is one of
//! the alternatives. `[GLOBAL_FILTER]` and `[FILTER]` switch to collecting filter
//! words; `[WORD_GROUPS]` switches back.
//!
//! A title may satisfy several groups and then counts once in each of them, so
//! the sum of group counts can exceed `total_titles`.

use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;

use crate::config::ConfigError;
use crate::news::{NewTitles, NewsData};

pub const ALL_NEWS_LABEL: &str = "All news";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WordGroup {
    /// Any one of these must appear (ignored when empty).
    pub required: Vec<String>,
    /// All of these must appear.
    pub must: Vec<String>,
    /// None of these may appear.
    pub exclude: Vec<String>,
}

impl WordGroup {
    pub fn label(&self) -> String {
        self.required
            .iter()
            .chain(self.must.iter())
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// `title` must already be lower-cased.
    fn matches(&self, title: &str) -> bool {
        (self.required.is_empty() || self.required.iter().any(|w| title.contains(w.as_str())))
            && self.must.iter().all(|w| title.contains(w.as_str()))
            && !self.exclude.iter().any(|w| title.contains(w.as_str()))
    }

    fn is_empty(&self) -> bool {
        self.required.is_empty() && self.must.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrequencyWords {
    pub groups: Vec<WordGroup>,
    /// Per-call filter, applied first.
    pub filter_words: Vec<String>,
    /// Applied after the per-call filter.
    pub global_filters: Vec<String>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Groups,
    Filter,
    GlobalFilter,
}

impl FrequencyWords {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(Self::parse(&text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ConfigError::Missing(path.to_path_buf()))
            }
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn parse(text: &str) -> Self {
        let mut out = Self::default();
        let mut section = Section::Groups;
        let mut current = WordGroup::default();

        for raw in text.lines() {
            let line = raw.trim();
            if line.starts_with('#') {
                continue;
            }
            if line.is_empty() {
                flush(&mut current, &mut out.groups);
                continue;
            }
            if line.starts_with('[') && line.ends_with(']') {
                flush(&mut current, &mut out.groups);
                section = match line[1..line.len() - 1].trim().to_ascii_uppercase().as_str() {
                    "GLOBAL_FILTER" => Section::GlobalFilter,
                    "FILTER" => Section::Filter,
                    _ => Section::Groups,
                };
                continue;
            }

            let word = line.to_lowercase();
            match section {
                Section::GlobalFilter => push_word(&mut out.global_filters, &word),
                Section::Filter => push_word(&mut out.filter_words, &word),
                Section::Groups => {
                    if let Some(w) = word.strip_prefix('+') {
                        push_word(&mut current.must, w);
                    } else if let Some(w) = word.strip_prefix('!') {
                        push_word(&mut current.exclude, w);
                    } else {
                        push_word(&mut current.required, &word);
                    }
                }
            }
        }
        flush(&mut current, &mut out.groups);
        out
    }
}

fn flush(group: &mut WordGroup, groups: &mut Vec<WordGroup>) {
    let g = std::mem::take(group);
    if !g.is_empty() {
        groups.push(g);
    }
}

fn push_word(list: &mut Vec<String>, word: &str) {
    let w = word.trim();
    if !w.is_empty() && !list.iter().any(|x| x == w) {
        list.push(w.to_string());
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchedTitle {
    pub platform_id: String,
    pub platform_name: String,
    pub title: String,
    pub ranks: Vec<u32>,
    pub url: String,
    pub mobile_url: String,
    pub first_time: chrono::NaiveTime,
    pub last_time: chrono::NaiveTime,
    /// Crawls of the day the title appeared in.
    pub count: u32,
    pub is_new: bool,
}

impl MatchedTitle {
    pub fn best_rank(&self) -> u32 {
        self.ranks.iter().copied().min().unwrap_or(u32::MAX)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stat {
    pub label: String,
    pub count: usize,
    /// Share of `total_titles`, in percent.
    pub percentage: f64,
    pub titles: Vec<MatchedTitle>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FrequencyResult {
    pub stats: Vec<Stat>,
    /// Distinct titles that survived filtering.
    pub total_titles: usize,
}

impl FrequencyResult {
    pub fn has_matches(&self) -> bool {
        self.stats.iter().any(|s| s.count > 0)
    }
}

fn filtered(title: &str, words: &[String]) -> bool {
    words.iter().any(|w| title.contains(w.as_str()))
}

/// Score every title of `data` against `words`.
///
/// With `only_new` set, only titles listed in `new_titles` are considered.
pub fn count_frequency(
    data: &NewsData,
    words: &FrequencyWords,
    new_titles: &NewTitles,
    only_new: bool,
) -> FrequencyResult {
    let fallback;
    let groups: &[WordGroup] = if words.groups.is_empty() {
        fallback = [WordGroup::default()];
        &fallback
    } else {
        &words.groups
    };

    let mut buckets: Vec<Vec<MatchedTitle>> = vec![Vec::new(); groups.len()];
    let mut considered: BTreeSet<(&str, &str)> = BTreeSet::new();

    for (pid, titles) in &data.platforms {
        for (title, entry) in titles {
            let is_new = new_titles.contains(pid, title);
            if only_new && !is_new {
                continue;
            }
            let lower = title.to_lowercase();
            if filtered(&lower, &words.filter_words) || filtered(&lower, &words.global_filters) {
                continue;
            }
            considered.insert((pid.as_str(), title.as_str()));

            for (idx, group) in groups.iter().enumerate() {
                if group.matches(&lower) {
                    buckets[idx].push(MatchedTitle {
                        platform_id: pid.clone(),
                        platform_name: data.platform_name(pid).to_string(),
                        title: title.clone(),
                        ranks: entry.ranks.clone(),
                        url: entry.url.clone(),
                        mobile_url: entry.mobile_url.clone(),
                        first_time: entry.first_time,
                        last_time: entry.last_time,
                        count: entry.count,
                        is_new,
                    });
                }
            }
        }
    }

    let total_titles = considered.len();
    let mut stats: Vec<Stat> = groups
        .iter()
        .zip(buckets)
        .map(|(group, mut titles)| {
            titles.sort_by(|a, b| {
                a.best_rank()
                    .cmp(&b.best_rank())
                    .then(b.count.cmp(&a.count))
            });
            let count = titles.len();
            Stat {
                label: if words.groups.is_empty() {
                    ALL_NEWS_LABEL.to_string()
                } else {
                    group.label()
                },
                count,
                percentage: percentage(count, total_titles),
                titles,
            }
        })
        .collect();

    // Stable: equal counts keep declaration order.
    stats.sort_by(|a, b| b.count.cmp(&a.count));

    tracing::debug!(
        groups = stats.len(),
        total_titles,
        only_new,
        "frequency stats computed"
    );
    FrequencyResult {
        stats,
        total_titles,
    }
}

fn percentage(count: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (count as f64 / total as f64 * 10000.0).round() / 100.0
}
