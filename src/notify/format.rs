// src/notify/format.rs
//! Text rendering shared by the chat channels, plus size-bounded batching.

use super::{ChannelKind, ReportPayload};
use crate::frequency::MatchedTitle;

/// Markup dialect a channel understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    Markdown,
    /// Slack mrkdwn: `*bold*`, `<url|text>`.
    Slack,
    /// Telegram `parse_mode=HTML`.
    Html,
    Plain,
}

impl Flavor {
    pub fn for_channel(kind: ChannelKind) -> Self {
        match kind {
            ChannelKind::DingTalk | ChannelKind::WeWork | ChannelKind::Ntfy | ChannelKind::Feishu => {
                Flavor::Markdown
            }
            ChannelKind::Slack => Flavor::Slack,
            ChannelKind::Telegram => Flavor::Html,
            ChannelKind::Bark | ChannelKind::Email => Flavor::Plain,
        }
    }

    fn bold(self, s: &str) -> String {
        match self {
            Flavor::Markdown => format!("**{s}**"),
            Flavor::Slack => format!("*{s}*"),
            Flavor::Html => format!("<b>{s}</b>"),
            Flavor::Plain => s.to_string(),
        }
    }

    fn link(self, text: &str, url: &str) -> String {
        if url.is_empty() {
            return text.to_string();
        }
        match self {
            Flavor::Markdown => format!("[{text}]({url})"),
            Flavor::Slack => format!("<{}|{text}>", html_escape::encode_text(url)),
            Flavor::Html => format!(
                "<a href=\"{}\">{text}</a>",
                html_escape::encode_double_quoted_attribute(url)
            ),
            Flavor::Plain => text.to_string(),
        }
    }

    fn escape(self, s: &str) -> String {
        match self {
            Flavor::Html | Flavor::Slack => html_escape::encode_text(s).into_owned(),
            Flavor::Markdown | Flavor::Plain => s.to_string(),
        }
    }
}

fn title_line(t: &MatchedTitle, threshold: u32, flavor: Flavor, idx: usize) -> String {
    let mut line = format!("  {idx}. [{}] ", flavor.escape(&t.platform_name));
    line.push_str(&flavor.link(&flavor.escape(&t.title), &t.url));

    let best = t.best_rank();
    if best != u32::MAX {
        let worst = t.ranks.iter().copied().max().unwrap_or(best);
        let rank = if worst == best {
            format!("[{best}]")
        } else {
            format!("[{best}-{worst}]")
        };
        if best <= threshold {
            line.push(' ');
            line.push_str(&flavor.bold(&rank));
        } else {
            line.push(' ');
            line.push_str(&rank);
        }
    }

    if t.first_time == t.last_time {
        line.push_str(&format!(" - {}", t.first_time.format("%H:%M")));
    } else {
        line.push_str(&format!(
            " - {}~{}",
            t.first_time.format("%H:%M"),
            t.last_time.format("%H:%M")
        ));
    }
    if t.count > 1 {
        line.push_str(&format!(" ({}x)", t.count));
    }
    if t.is_new {
        line.push_str(" NEW");
    }
    line
}

/// Render `report` as lines of text. Each element is one logical line.
pub fn render_lines(report: &ReportPayload, flavor: Flavor) -> Vec<String> {
    let mut out = Vec::new();
    out.push(flavor.bold(&flavor.escape(&report.report_type)));
    out.push(format!(
        "Titles: {} | Generated: {}",
        report.total_titles,
        report.generated_at.format("%Y-%m-%d %H:%M")
    ));
    out.push(String::new());

    let matched: Vec<_> = report.stats.iter().filter(|s| s.count > 0).collect();
    if matched.is_empty() {
        out.push("No matching titles.".to_string());
    }
    for (i, stat) in matched.iter().enumerate() {
        out.push(format!(
            "[{}/{}] {} : {} ({:.1}%)",
            i + 1,
            matched.len(),
            flavor.bold(&flavor.escape(&stat.label)),
            stat.count,
            stat.percentage
        ));
        for (j, t) in stat.titles.iter().enumerate() {
            out.push(title_line(t, report.rank_threshold, flavor, j + 1));
        }
        out.push(String::new());
    }

    if !report.new_titles.is_empty() {
        let total: usize = report.new_titles.iter().map(|g| g.titles.len()).sum();
        out.push(flavor.bold(&format!("New titles ({total})")));
        for group in &report.new_titles {
            out.push(format!("{}:", flavor.escape(&group.platform_name)));
            for (j, title) in group.titles.iter().enumerate() {
                out.push(format!("  {}. {}", j + 1, flavor.escape(title)));
            }
        }
        out.push(String::new());
    }

    if !report.failed_platforms.is_empty() {
        out.push(format!(
            "Failed platforms: {}",
            flavor.escape(&report.failed_platforms.join(", "))
        ));
    }
    out
}

// Room left in each batch for the "(i/n)" marker.
const BATCH_MARKER_RESERVE: usize = 24;

/// Render the whole report for `kind` and split it into sendable batches.
/// Batches are numbered when there is more than one.
pub fn render_batches(report: &ReportPayload, kind: ChannelKind) -> Vec<String> {
    let lines = render_lines(report, Flavor::for_channel(kind));
    let Some(limit) = kind.batch_limit() else {
        return vec![lines.join("\n")];
    };
    let batches = split_batches(&lines, limit.saturating_sub(BATCH_MARKER_RESERVE));
    let n = batches.len();
    if n <= 1 {
        return batches;
    }
    batches
        .into_iter()
        .enumerate()
        .map(|(i, b)| format!("({}/{n})\n{b}", i + 1))
        .collect()
}

/// Pack lines into batches of at most `max_bytes` (joined with `\n`). A single
/// line longer than `max_bytes` is cut at character boundaries.
pub fn split_batches(lines: &[String], max_bytes: usize) -> Vec<String> {
    let max_bytes = max_bytes.max(1);
    let mut batches = Vec::new();
    let mut current = String::new();

    let push_piece = |piece: &str, current: &mut String, batches: &mut Vec<String>| {
        let extra = if current.is_empty() { 0 } else { 1 };
        if !current.is_empty() && current.len() + extra + piece.len() > max_bytes {
            batches.push(std::mem::take(current));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(piece);
    };

    for line in lines {
        if line.len() <= max_bytes {
            push_piece(line, &mut current, &mut batches);
            continue;
        }
        let mut rest = line.as_str();
        while !rest.is_empty() {
            let mut cut = rest.len().min(max_bytes);
            while !rest.is_char_boundary(cut) {
                cut -= 1;
            }
            if cut == 0 {
                // A single char wider than the limit.
                cut = rest.chars().next().map(char::len_utf8).unwrap_or(rest.len());
            }
            push_piece(&rest[..cut], &mut current, &mut batches);
            rest = &rest[cut..];
        }
    }
    if !current.trim().is_empty() {
        batches.push(current);
    }
    batches
}
