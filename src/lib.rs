// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod config;
pub mod crawler;
pub mod frequency;
pub mod mode;
pub mod news;
pub mod notify;
pub mod novelty;
pub mod pipeline;
pub mod push_window;
pub mod report;
pub mod storage;

// ---- Re-exports for stable public API ----
pub use crate::config::{AppConfig, ConfigError};
pub use crate::mode::ReportMode;
pub use crate::notify::{Notifier, NotifierMux, ReportPayload};
pub use crate::pipeline::{AppContext, NewsAnalyzer, PipelineError, RunSummary};
pub use crate::storage::StorageManager;
