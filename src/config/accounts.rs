// src/config/accounts.rs
//! Multi-account channel values: `"url1;url2"` style strings.

use thiserror::Error;
use tracing::warn;

pub const DEFAULT_SEPARATOR: &str = ";";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccountConfigError {
    #[error("{channel}: paired settings have different account counts ({detail})")]
    LengthMismatch { channel: String, detail: String },
}

/// Split a delimited value into positional accounts.
///
/// An empty or all-blank value disables the channel (`[]`). Blank elements in an
/// otherwise populated list are kept as `""` placeholders so positions line up
/// across paired settings: `"a;;c"` -> `["a", "", "c"]`.
pub fn parse_multi_account_config(value: &str, separator: &str) -> Vec<String> {
    if value.is_empty() {
        return Vec::new();
    }
    let accounts: Vec<String> = value
        .split(separator)
        .map(|s| s.trim().to_string())
        .collect();
    if accounts.iter().all(String::is_empty) {
        return Vec::new();
    }
    accounts
}

/// Check that paired settings (e.g. bot token + chat id) line up.
///
/// Returns the number of usable accounts. `Ok(0)` when a `required` key has no
/// value: the channel is simply not configured.
pub fn validate_paired_configs(
    channel: &str,
    configs: &[(&str, &[String])],
    required: &[&str],
) -> Result<usize, AccountConfigError> {
    let non_empty: Vec<(&str, usize)> = configs
        .iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| (*k, v.len()))
        .collect();

    if non_empty.is_empty() {
        return Ok(0);
    }
    if required
        .iter()
        .any(|key| !non_empty.iter().any(|(k, _)| k == key))
    {
        return Ok(0);
    }

    let first = non_empty[0].1;
    if non_empty.iter().any(|(_, n)| *n != first) {
        let detail = non_empty
            .iter()
            .map(|(k, n)| format!("{k}={n}"))
            .collect::<Vec<_>>()
            .join(", ");
        return Err(AccountConfigError::LengthMismatch {
            channel: channel.to_string(),
            detail,
        });
    }
    Ok(first)
}

/// Keep the first `max` accounts.
pub fn limit_accounts(mut accounts: Vec<String>, max: usize, channel: &str) -> Vec<String> {
    if accounts.len() > max {
        warn!(
            channel,
            configured = accounts.len(),
            max,
            "too many accounts configured; using the first ones only"
        );
        accounts.truncate(max);
    }
    accounts
}

/// Value at `idx`, or `default` when out of range or a blank placeholder.
pub fn get_account_at_index<'a>(accounts: &'a [String], idx: usize, default: &'a str) -> &'a str {
    match accounts.get(idx) {
        Some(v) if !v.is_empty() => v,
        _ => default,
    }
}
