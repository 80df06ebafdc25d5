// tests/frequency_engine.rs
use chrono::TimeZone;
use std::collections::BTreeMap;

use trend_radar::crawler::{CrawlOutcome, RawItem};
use trend_radar::frequency::{count_frequency, FrequencyWords};
use trend_radar::news::{NewTitles, NewsData};

fn data(titles: &[&str]) -> NewsData {
    let mut outcome = CrawlOutcome::default();
    let items: BTreeMap<String, RawItem> = titles
        .iter()
        .enumerate()
        .map(|(i, t)| {
            (
                t.to_string(),
                RawItem {
                    ranks: vec![i as u32 + 1],
                    ..RawItem::default()
                },
            )
        })
        .collect();
    outcome.results.insert("p1".into(), items);
    let at = chrono_tz::UTC.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap();
    NewsData::from_crawl(&outcome, at)
}

const WORDS: &str = "rust\n\nrust\ncompiler\n\n[FILTER]\nspam\n";

#[test]
fn a_title_can_count_for_several_groups() {
    let words = FrequencyWords::parse(WORDS);
    let r = count_frequency(
        &data(&["Rust compiler news", "Other"]),
        &words,
        &NewTitles::new(),
        false,
    );
    assert_eq!(r.total_titles, 2);
    assert_eq!(r.stats.iter().map(|s| s.count).sum::<usize>(), 2);
    assert!(r.stats.iter().all(|s| s.count == 1));
}

#[test]
fn filtering_twice_changes_nothing() {
    let once = FrequencyWords::parse(WORDS);
    let twice = FrequencyWords::parse(&format!("{WORDS}spam\n"));
    let d = data(&["Rust spam", "Rust ok"]);
    let a = count_frequency(&d, &once, &NewTitles::new(), false);
    let b = count_frequency(&d, &twice, &NewTitles::new(), false);
    assert_eq!(a, b);
    assert!(a
        .stats
        .iter()
        .flat_map(|s| &s.titles)
        .all(|t| !t.title.contains("spam")));
    assert_eq!(a.total_titles, 1);
}

#[test]
fn only_new_restricts_to_new_titles() {
    let words = FrequencyWords::parse("rust");
    let mut nt = NewTitles::new();
    nt.insert("p1", vec!["Rust two".into()]);
    let r = count_frequency(&data(&["Rust one", "Rust two"]), &words, &nt, true);
    assert_eq!(r.stats[0].count, 1);
    assert_eq!(r.stats[0].titles[0].title, "Rust two");
    assert!(r.stats[0].titles[0].is_new);
}
