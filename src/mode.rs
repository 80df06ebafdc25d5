// src/mode.rs
//! Report modes and the fixed policy each one carries.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::frequency::Stat;
use crate::news::NewTitles;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportMode {
    /// Only titles new since the previous crawl; silent when nothing is new.
    Incremental,
    /// Current rankings over the whole day so far.
    Current,
    /// One summary of the day; no real-time pushes.
    #[default]
    Daily,
}

impl ReportMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ReportMode::Incremental => "incremental",
            ReportMode::Current => "current",
            ReportMode::Daily => "daily",
        }
    }

    pub fn strategy(self) -> ModeStrategy {
        match self {
            ReportMode::Incremental => ModeStrategy {
                mode: self,
                description: "only new titles; no push when nothing is new",
                realtime_report_type: Some("Real-time Incremental"),
                summary_report_type: "Daily Summary",
                summary_mode: ReportMode::Daily,
                window: DataWindow::ThisCrawl,
            },
            ReportMode::Current => ModeStrategy {
                mode: self,
                description: "current matches over the accumulated day",
                realtime_report_type: Some("Real-time Current Rankings"),
                summary_report_type: "Current Rankings Summary",
                summary_mode: ReportMode::Current,
                window: DataWindow::WholeDay,
            },
            ReportMode::Daily => ModeStrategy {
                mode: self,
                description: "daily summary of all matches",
                realtime_report_type: None,
                summary_report_type: "Daily Summary",
                summary_mode: ReportMode::Daily,
                window: DataWindow::ThisCrawl,
            },
        }
    }

    /// Whether a report is worth pushing.
    pub fn has_valid_content(self, stats: &[Stat], new_titles: &NewTitles) -> bool {
        let matched = stats.iter().any(|s| s.count > 0);
        let has_new = !new_titles.is_empty();
        match self {
            ReportMode::Incremental => has_new && matched,
            ReportMode::Current => matched,
            ReportMode::Daily => matched || has_new,
        }
    }
}

impl fmt::Display for ReportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which titles feed the frequency engine for the real-time report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataWindow {
    ThisCrawl,
    WholeDay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeStrategy {
    pub mode: ReportMode,
    pub description: &'static str,
    /// `None` when the mode never pushes in real time.
    pub realtime_report_type: Option<&'static str>,
    pub summary_report_type: &'static str,
    /// Mode the summary is computed in.
    pub summary_mode: ReportMode,
    pub window: DataWindow,
}

impl ModeStrategy {
    pub fn should_send_realtime(&self) -> bool {
        self.realtime_report_type.is_some()
    }

    /// Every mode produces a summary.
    pub fn should_generate_summary(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stat(count: usize) -> Stat {
        Stat {
            label: "g".into(),
            count,
            percentage: 0.0,
            titles: Vec::new(),
        }
    }

    fn new_titles(n: usize) -> NewTitles {
        let mut nt = NewTitles::new();
        nt.insert("p1", (0..n).map(|i| format!("t{i}")).collect());
        nt
    }

    #[test]
    fn incremental_without_new_titles_never_qualifies() {
        let m = ReportMode::Incremental;
        assert!(!m.has_valid_content(&[stat(5)], &new_titles(0)));
        assert!(!m.has_valid_content(&[stat(0)], &new_titles(2)));
        assert!(m.has_valid_content(&[stat(1)], &new_titles(1)));
    }

    #[test]
    fn current_needs_a_match() {
        let m = ReportMode::Current;
        assert!(m.has_valid_content(&[stat(1)], &new_titles(0)));
        assert!(!m.has_valid_content(&[stat(0)], &new_titles(3)));
    }

    #[test]
    fn daily_accepts_match_or_new() {
        let m = ReportMode::Daily;
        assert!(m.has_valid_content(&[stat(1)], &new_titles(0)));
        assert!(m.has_valid_content(&[], &new_titles(1)));
        assert!(!m.has_valid_content(&[stat(0)], &new_titles(0)));
    }

    #[test]
    fn strategies_are_fixed_per_mode() {
        let inc = ReportMode::Incremental.strategy();
        assert!(inc.should_send_realtime());
        assert_eq!(inc.summary_mode, ReportMode::Daily);
        assert_eq!(inc.window, DataWindow::ThisCrawl);

        let cur = ReportMode::Current.strategy();
        assert_eq!(cur.window, DataWindow::WholeDay);
        assert_eq!(cur.summary_report_type, "Current Rankings Summary");

        let daily = ReportMode::Daily.strategy();
        assert!(!daily.should_send_realtime());
        assert!(daily.should_generate_summary());
    }

    #[test]
    fn deserializes_lowercase() {
        #[derive(Deserialize)]
        struct W {
            mode: ReportMode,
        }
        let w: W = toml::from_str(r#"mode = "current""#).unwrap();
        assert_eq!(w.mode, ReportMode::Current);
        assert!(toml::from_str::<W>(r#"mode = "weekly""#).is_err());
    }
}
