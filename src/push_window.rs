// src/push_window.rs
//! Time-of-day and once-per-day admission in front of notification dispatch.

use chrono::{NaiveTime, Timelike};

use crate::config::app::PushWindowConfig;
use crate::config::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admit,
    OutsideWindow,
    AlreadyPushedToday,
}

impl Admission {
    pub fn is_admitted(self) -> bool {
        matches!(self, Admission::Admit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushWindow {
    pub enabled: bool,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub once_per_day: bool,
}

impl PushWindow {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            start: NaiveTime::MIN,
            end: NaiveTime::MIN,
            once_per_day: false,
        }
    }

    pub fn from_config(cfg: &PushWindowConfig) -> Result<Self, ConfigError> {
        if !cfg.enabled {
            return Ok(Self::disabled());
        }
        Ok(Self {
            enabled: true,
            start: parse_hhmm(&cfg.start)?,
            end: parse_hhmm(&cfg.end)?,
            once_per_day: cfg.once_per_day,
        })
    }

    /// `[start, end]` inclusive at minute precision. A window ending before it
    /// starts never matches.
    pub fn in_window(&self, now: NaiveTime) -> bool {
        let minute = |t: NaiveTime| t.hour() * 60 + t.minute();
        (minute(self.start)..=minute(self.end)).contains(&minute(now))
    }

    /// `pushed_today` is only consulted when once-per-day is on.
    pub fn admit(&self, now: NaiveTime, pushed_today: bool) -> Admission {
        if !self.enabled {
            return Admission::Admit;
        }
        if !self.in_window(now) {
            return Admission::OutsideWindow;
        }
        if self.once_per_day && pushed_today {
            return Admission::AlreadyPushedToday;
        }
        Admission::Admit
    }
}

/// `HH:MM`
pub fn parse_hhmm(s: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M").map_err(|_| ConfigError::TimeFormat(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn window(start: &str, end: &str, once: bool) -> PushWindow {
        PushWindow::from_config(&PushWindowConfig {
            enabled: true,
            start: start.into(),
            end: end.into(),
            once_per_day: once,
        })
        .unwrap()
    }

    #[test]
    fn disabled_gate_admits_everything() {
        let w = PushWindow::disabled();
        assert_eq!(w.admit(t(3, 0), true), Admission::Admit);
    }

    #[test]
    fn bounds_are_inclusive() {
        let w = window("20:00", "22:00", false);
        assert!(w.admit(t(20, 0), false).is_admitted());
        assert!(w.admit(t(22, 0), false).is_admitted());
        assert!(w
            .admit(NaiveTime::from_hms_opt(22, 0, 45).unwrap(), false)
            .is_admitted());
        assert_eq!(w.admit(t(22, 1), false), Admission::OutsideWindow);
        assert_eq!(w.admit(t(19, 59), false), Admission::OutsideWindow);
    }

    #[test]
    fn inverted_window_never_matches() {
        let w = window("22:00", "06:00", false);
        assert_eq!(w.admit(t(23, 0), false), Admission::OutsideWindow);
        assert_eq!(w.admit(t(5, 0), false), Admission::OutsideWindow);
    }

    #[test]
    fn once_per_day_denies_after_a_recorded_push() {
        let w = window("00:00", "23:59", true);
        assert_eq!(w.admit(t(12, 0), true), Admission::AlreadyPushedToday);
        assert!(w.admit(t(12, 0), false).is_admitted());

        let repeatable = window("00:00", "23:59", false);
        assert!(repeatable.admit(t(12, 0), true).is_admitted());
    }

    #[test]
    fn rejects_malformed_times() {
        assert!(parse_hhmm("08:05").is_ok());
        assert!(parse_hhmm("24:00").is_err());
        assert!(parse_hhmm("noon").is_err());
    }
}
