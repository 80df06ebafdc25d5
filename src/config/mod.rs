// src/config/mod.rs
pub mod accounts;
pub mod app;

pub use accounts::{
    get_account_at_index, limit_accounts, parse_multi_account_config, validate_paired_configs,
    AccountConfigError,
};
pub use app::{AppConfig, ConfigError};
