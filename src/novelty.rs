//! Novelty detection: which titles of the current crawl were never seen earlier today.
//!
//! `prior` must be the day's Title History built from crawls persisted strictly
//! before `current` (see `storage::record::DayRecord::history_before`). When there
//! is no prior history the crawl is the first of the day and every title is new.

use crate::news::{NewTitles, NewsData};

pub fn detect_new_titles(current: &NewsData, prior: Option<&NewsData>) -> NewTitles {
    let mut out = NewTitles::new();

    for (platform_id, titles) in &current.platforms {
        let fresh: Vec<String> = titles
            .keys()
            .filter(|title| !prior.is_some_and(|p| p.contains(platform_id, title)))
            .cloned()
            .collect();
        out.insert(platform_id.clone(), fresh);
    }

    if !out.is_empty() {
        tracing::debug!(
            new = out.total(),
            first_crawl = prior.is_none(),
            "novelty detected"
        );
    }
    out
}
