use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;
use tracing::Level;
use url::Url;

pub mod authority;
pub mod clock;
pub mod command;
pub mod gate;
pub mod history;
pub mod lane;
pub mod metrics;
pub mod notify;
pub mod scheduler;
pub mod settle;
pub mod submit;
pub mod sync;
pub mod wallet;

pub use authority::{AuthorityError, RoundAuthority};
pub use notify::{Action, Notification};
pub use scheduler::Scheduler;
pub use settle::Settlement;
pub use submit::{Rejection, StakeLimits};

/// Configuration for the [scheduler::Scheduler].
#[derive(Deserialize, Serialize)]
pub struct Config {
    pub authority: String,
    pub user_id: String,
    pub currency: String,
    pub initial_balance: i64,

    #[serde(default = "default_min_stake")]
    pub min_stake: u64,
    #[serde(default = "default_max_stake")]
    pub max_stake: u64,
    #[serde(default = "default_grace_window_secs")]
    pub grace_window_secs: u64,

    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    #[serde(default = "default_history_page_size")]
    pub history_page_size: usize,
    #[serde(default = "default_mailbox_size")]
    pub mailbox_size: usize,

    pub log_level: String,
    #[serde(default)]
    pub log_json: bool,
    #[serde(default)]
    pub metrics_port: Option<u16>,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: usize,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid log level: {value}")]
    InvalidLogLevel { value: String },
    #[error("{field} must be > 0 (got {value})")]
    InvalidNonZero { field: &'static str, value: usize },
    #[error("min_stake ({min}) must not exceed max_stake ({max})")]
    InvalidStakeRange { min: u64, max: u64 },
    #[error("authority is not a valid URL: {value}")]
    InvalidAuthority {
        value: String,
        #[source]
        source: url::ParseError,
    },
    #[error("{field} must not be empty")]
    Empty { field: &'static str },
}

pub struct ValidatedConfig {
    pub authority: Url,
    pub user_id: String,
    pub currency: String,
    pub initial_balance: i64,

    pub stake_limits: StakeLimits,
    pub grace_window: u64,

    pub history_capacity: usize,
    pub history_page_size: usize,
    pub mailbox_size: usize,

    pub log_level: Level,
    pub log_json: bool,
    pub metrics_port: Option<u16>,
    pub retry_attempts: usize,
}

fn default_min_stake() -> u64 {
    roundplay_types::MIN_STAKE
}

fn default_max_stake() -> u64 {
    roundplay_types::MAX_STAKE
}

fn default_grace_window_secs() -> u64 {
    roundplay_types::GRACE_WINDOW_SECS
}

fn default_history_capacity() -> usize {
    roundplay_types::HISTORY_CAPACITY
}

fn default_history_page_size() -> usize {
    roundplay_types::HISTORY_PAGE_SIZE
}

fn default_mailbox_size() -> usize {
    64
}

fn default_retry_attempts() -> usize {
    3
}

fn non_zero(field: &'static str, value: usize) -> Result<usize, ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidNonZero { field, value });
    }
    Ok(value)
}

impl Config {
    pub fn validate(self) -> Result<ValidatedConfig, ConfigError> {
        let authority =
            Url::parse(&self.authority).map_err(|source| ConfigError::InvalidAuthority {
                value: self.authority.clone(),
                source,
            })?;
        if self.user_id.trim().is_empty() {
            return Err(ConfigError::Empty { field: "user_id" });
        }
        if self.currency.trim().is_empty() {
            return Err(ConfigError::Empty { field: "currency" });
        }
        if self.min_stake > self.max_stake {
            return Err(ConfigError::InvalidStakeRange {
                min: self.min_stake,
                max: self.max_stake,
            });
        }
        let history_capacity = non_zero("history_capacity", self.history_capacity)?;
        let history_page_size = non_zero("history_page_size", self.history_page_size)?;
        let mailbox_size = non_zero("mailbox_size", self.mailbox_size)?;
        let retry_attempts = non_zero("retry_attempts", self.retry_attempts)?;

        let log_level =
            Level::from_str(&self.log_level).map_err(|_| ConfigError::InvalidLogLevel {
                value: self.log_level.clone(),
            })?;

        Ok(ValidatedConfig {
            authority,
            user_id: self.user_id,
            currency: self.currency,
            initial_balance: self.initial_balance,
            stake_limits: StakeLimits {
                min: self.min_stake,
                max: self.max_stake,
            },
            grace_window: self.grace_window_secs,
            history_capacity,
            history_page_size,
            mailbox_size,
            log_level,
            log_json: self.log_json,
            metrics_port: self.metrics_port,
            retry_attempts,
        })
    }
}

#[cfg(test)]
mod tests;
