//! trend-radar: one crawl-and-report run per invocation.
//!
//! Exit status is non-zero only when the run hits a storage consistency error
//! or the process cannot be wired up at all.

use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use trend_radar::frequency::FrequencyWords;
use trend_radar::{AppConfig, AppContext, ConfigError, NewsAnalyzer};

/// Compact logs by default, JSON when `LOG_FORMAT=json`.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("trend_radar=info,warn"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // No-op when there is no .env file.
    let _ = dotenvy::dotenv();
    init_tracing();

    let config_path = AppConfig::default_path();
    let config = match AppConfig::load(&config_path) {
        Ok(c) => c,
        Err(ConfigError::Missing(path)) => {
            warn!(
                path = %path.display(),
                "config file not found; copy config/config.toml and fill in platforms and channels"
            );
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            error!(error = %e, "configuration rejected");
            return ExitCode::SUCCESS;
        }
    };

    let words_path = AppConfig::frequency_words_path();
    let words = match FrequencyWords::load(&words_path) {
        Ok(w) => w,
        Err(e) => {
            error!(error = %e, "keyword groups could not be loaded");
            return ExitCode::SUCCESS;
        }
    };
    info!(
        config = %config_path.display(),
        groups = words.groups.len(),
        "configuration loaded"
    );

    let ctx = match AppContext::from_config(config, words) {
        Ok(ctx) => ctx,
        Err(e) => {
            error!(error = ?e, "startup failed");
            return ExitCode::FAILURE;
        }
    };

    match NewsAnalyzer::new(ctx).run().await {
        Ok(summary) => {
            info!(
                realtime_sent = summary.realtime_sent,
                summary_sent = summary.summary_sent,
                html = summary.html_file.as_deref().unwrap_or("-"),
                summary_html = summary.summary_html.as_deref().unwrap_or("-"),
                "done"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "run aborted");
            ExitCode::FAILURE
        }
    }
}
