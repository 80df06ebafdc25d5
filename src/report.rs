// src/report.rs
//! Report assembly: turns frequency stats into a [`ReportPayload`] and renders
//! the standalone HTML page stored alongside each run.

use chrono::{DateTime, FixedOffset, NaiveTime};
use html_escape::{encode_double_quoted_attribute, encode_text};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use crate::frequency::{FrequencyResult, MatchedTitle};
use crate::mode::ReportMode;
use crate::news::{NewTitles, NewsData};
use crate::notify::{NewTitleGroup, ReportPayload};
use crate::storage::record::time_stem;

/// Inputs for one report.
pub struct ReportInput<'a> {
    pub report_type: &'a str,
    pub mode: ReportMode,
    pub generated_at: DateTime<FixedOffset>,
    pub result: &'a FrequencyResult,
    pub new_titles: &'a NewTitles,
    /// Source of platform display names.
    pub data: &'a NewsData,
    pub failed_ids: &'a [String],
    pub rank_threshold: u32,
}

/// Build the payload every channel renders from.
///
/// The new-titles section lists only new titles that matched a keyword group.
/// It is left empty in incremental mode, where every reported title is new.
pub fn prepare_report(input: ReportInput<'_>) -> ReportPayload {
    let new_titles = if input.mode == ReportMode::Incremental {
        Vec::new()
    } else {
        matched_new_titles(&input)
    };

    let failed_platforms = input
        .failed_ids
        .iter()
        .map(|id| input.data.platform_name(id).to_string())
        .collect();

    ReportPayload {
        report_type: input.report_type.to_string(),
        mode: input.mode,
        generated_at: input.generated_at,
        stats: input.result.stats.clone(),
        total_titles: input.result.total_titles,
        new_titles,
        failed_platforms,
        rank_threshold: input.rank_threshold,
        html_body: None,
    }
}

fn matched_new_titles(input: &ReportInput<'_>) -> Vec<NewTitleGroup> {
    let mut per_platform: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for t in input.result.stats.iter().flat_map(|s| &s.titles) {
        if t.is_new && input.new_titles.contains(&t.platform_id, &t.title) {
            per_platform
                .entry(t.platform_id.as_str())
                .or_default()
                .insert(t.title.as_str());
        }
    }
    per_platform
        .into_iter()
        .map(|(pid, titles)| NewTitleGroup {
            platform_id: pid.to_string(),
            platform_name: input.data.platform_name(pid).to_string(),
            titles: titles.into_iter().map(str::to_string).collect(),
        })
        .collect()
}

/// File name for a stored report: the crawl time for real-time reports, a
/// fixed per-mode name for summaries so later runs overwrite it.
pub fn html_filename(mode: ReportMode, is_summary: bool, at: NaiveTime) -> String {
    if !is_summary {
        return format!("{}.html", time_stem(at));
    }
    match mode {
        ReportMode::Current => "current_summary.html".to_string(),
        ReportMode::Incremental => "incremental_summary.html".to_string(),
        ReportMode::Daily => "daily_summary.html".to_string(),
    }
}

const STYLE: &str = "body{font-family:-apple-system,Segoe UI,Helvetica,Arial,sans-serif;max-width:860px;margin:24px auto;padding:0 16px;color:#1f2328}\
h1{font-size:22px;margin-bottom:4px}.meta{color:#59636e;font-size:13px;margin-bottom:20px}\
.group{border:1px solid #d1d9e0;border-radius:8px;padding:12px 16px;margin-bottom:16px}\
.group h2{font-size:16px;margin:0 0 8px}.count{color:#59636e;font-weight:normal;font-size:13px}\
ol{margin:0;padding-left:22px}li{margin:4px 0}.src{color:#59636e;font-size:12px}\
.rank{font-size:12px;color:#59636e}.rank.top{color:#cf222e;font-weight:bold}\
.time{font-size:12px;color:#8c959f}.new{color:#1a7f37;font-weight:bold;font-size:11px;margin-left:4px}\
.failed{color:#cf222e;font-size:13px}";

fn rank_html(t: &MatchedTitle, threshold: u32) -> String {
    let best = t.best_rank();
    if best == u32::MAX {
        return String::new();
    }
    let worst = t.ranks.iter().copied().max().unwrap_or(best);
    let label = if worst == best {
        format!("[{best}]")
    } else {
        format!("[{best}-{worst}]")
    };
    let class = if best <= threshold { "rank top" } else { "rank" };
    format!(" <span class=\"{class}\">{label}</span>")
}

fn title_html(t: &MatchedTitle, threshold: u32) -> String {
    let title = encode_text(&t.title);
    let link = if t.url.is_empty() {
        title.into_owned()
    } else {
        format!(
            "<a href=\"{}\" target=\"_blank\">{title}</a>",
            encode_double_quoted_attribute(&t.url)
        )
    };
    let time = if t.first_time == t.last_time {
        t.first_time.format("%H:%M").to_string()
    } else {
        format!("{}~{}", t.first_time.format("%H:%M"), t.last_time.format("%H:%M"))
    };
    let mut li = format!(
        "<li><span class=\"src\">[{}]</span> {link}{} <span class=\"time\">{time}</span>",
        encode_text(&t.platform_name),
        rank_html(t, threshold)
    );
    if t.count > 1 {
        let _ = write!(li, " <span class=\"time\">({}x)</span>", t.count);
    }
    if t.is_new {
        li.push_str("<span class=\"new\">NEW</span>");
    }
    li.push_str("</li>");
    li
}

/// Standalone HTML page for `report`.
pub fn render_html(report: &ReportPayload) -> String {
    let mut out = String::with_capacity(4096);
    let title = encode_text(&report.report_type);
    let _ = write!(
        out,
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
         <title>{title}</title>\n<style>{STYLE}</style>\n</head>\n<body>\n"
    );
    let _ = writeln!(out, "<h1>{title}</h1>");
    let _ = writeln!(
        out,
        "<div class=\"meta\">Mode: {} &middot; Titles: {} &middot; Generated: {}</div>",
        report.mode,
        report.total_titles,
        report.generated_at.format("%Y-%m-%d %H:%M:%S")
    );

    if !report.failed_platforms.is_empty() {
        let names: Vec<String> = report
            .failed_platforms
            .iter()
            .map(|n| encode_text(n).into_owned())
            .collect();
        let _ = writeln!(
            out,
            "<p class=\"failed\">Failed platforms: {}</p>",
            names.join(", ")
        );
    }

    let matched: Vec<_> = report.stats.iter().filter(|s| s.count > 0).collect();
    if matched.is_empty() {
        out.push_str("<p>No matching titles.</p>\n");
    }
    for (i, stat) in matched.iter().enumerate() {
        let _ = writeln!(
            out,
            "<section class=\"group\">\n<h2>{}/{} {} <span class=\"count\">{} titles &middot; {:.1}%</span></h2>\n<ol>",
            i + 1,
            matched.len(),
            encode_text(&stat.label),
            stat.count,
            stat.percentage
        );
        for t in &stat.titles {
            out.push_str(&title_html(t, report.rank_threshold));
            out.push('\n');
        }
        out.push_str("</ol>\n</section>\n");
    }

    if !report.new_titles.is_empty() {
        let total: usize = report.new_titles.iter().map(|g| g.titles.len()).sum();
        let _ = writeln!(out, "<section class=\"group\">\n<h2>New titles <span class=\"count\">{total}</span></h2>");
        for group in &report.new_titles {
            let _ = writeln!(out, "<h3>{}</h3>\n<ol>", encode_text(&group.platform_name));
            for t in &group.titles {
                let _ = writeln!(out, "<li>{}</li>", encode_text(t));
            }
            out.push_str("</ol>\n");
        }
        out.push_str("</section>\n");
    }

    out.push_str("</body>\n</html>\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frequency::Stat;
    use chrono::NaiveDate;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn matched(pid: &str, title: &str, is_new: bool) -> MatchedTitle {
        MatchedTitle {
            platform_id: pid.into(),
            platform_name: pid.to_uppercase(),
            title: title.into(),
            ranks: vec![2, 6],
            url: "https://example.com/?a=1&b=\"2\"".into(),
            mobile_url: String::new(),
            first_time: t(8, 0),
            last_time: t(9, 30),
            count: 3,
            is_new,
        }
    }

    fn fixture() -> (FrequencyResult, NewTitles, NewsData) {
        let result = FrequencyResult {
            stats: vec![Stat {
                label: "rust".into(),
                count: 2,
                percentage: 50.0,
                titles: vec![matched("hn", "Rust <1.90>", true), matched("hn", "Rust old", false)],
            }],
            total_titles: 4,
        };
        let mut new_titles = NewTitles::new();
        new_titles.insert("hn", vec!["Rust <1.90>".into(), "Unmatched new".into()]);
        let mut data = NewsData::empty(NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(), t(9, 30));
        data.id_to_name.insert("hn".into(), "Hacker News".into());
        data.id_to_name.insert("down".into(), "Down Site".into());
        (result, new_titles, data)
    }

    fn input<'a>(
        mode: ReportMode,
        result: &'a FrequencyResult,
        new_titles: &'a NewTitles,
        data: &'a NewsData,
        failed: &'a [String],
    ) -> ReportInput<'a> {
        ReportInput {
            report_type: "Daily Summary",
            mode,
            generated_at: DateTime::parse_from_rfc3339("2025-03-01T09:30:00-05:00").unwrap(),
            result,
            new_titles,
            data,
            failed_ids: failed,
            rank_threshold: 5,
        }
    }

    #[test]
    fn new_titles_section_keeps_only_matched_ones() {
        let (result, new_titles, data) = fixture();
        let failed = vec!["down".to_string()];
        let r = prepare_report(input(ReportMode::Daily, &result, &new_titles, &data, &failed));
        assert_eq!(r.new_titles.len(), 1);
        assert_eq!(r.new_titles[0].platform_name, "Hacker News");
        assert_eq!(r.new_titles[0].titles, vec!["Rust <1.90>".to_string()]);
        assert_eq!(r.failed_platforms, vec!["Down Site".to_string()]);
        assert_eq!(r.total_titles, 4);
    }

    #[test]
    fn incremental_reports_hide_the_new_titles_section() {
        let (result, new_titles, data) = fixture();
        let r = prepare_report(input(ReportMode::Incremental, &result, &new_titles, &data, &[]));
        assert!(r.new_titles.is_empty());
        assert_eq!(r.stats.len(), 1);
    }

    #[test]
    fn html_is_escaped_and_marks_top_ranks() {
        let (result, new_titles, data) = fixture();
        let failed = vec!["down".to_string()];
        let r = prepare_report(input(ReportMode::Daily, &result, &new_titles, &data, &failed));
        let html = render_html(&r);
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("Rust &lt;1.90&gt;"));
        assert!(!html.contains("Rust <1.90>"));
        assert!(html.contains("href=\"https://example.com/?a=1&amp;b=&quot;2&quot;\""));
        assert!(html.contains("<span class=\"rank top\">[2-6]</span>"));
        assert!(html.contains("08:00~09:30"));
        assert!(html.contains("Failed platforms: Down Site"));
        assert!(html.contains("New titles"));
    }

    #[test]
    fn empty_report_renders_placeholder() {
        let (_, new_titles, data) = fixture();
        let empty = FrequencyResult::default();
        let r = prepare_report(input(ReportMode::Current, &empty, &new_titles, &data, &[]));
        assert!(render_html(&r).contains("No matching titles."));
    }

    #[test]
    fn filenames_depend_on_kind() {
        assert_eq!(html_filename(ReportMode::Daily, true, t(9, 30)), "daily_summary.html");
        assert_eq!(html_filename(ReportMode::Current, true, t(9, 30)), "current_summary.html");
        assert_eq!(
            html_filename(ReportMode::Incremental, false, t(9, 30)),
            format!("{}.html", time_stem(t(9, 30)))
        );
    }
}
