pub mod client;

pub use client::Client;
pub use client::RetryPolicy;
use thiserror::Error;

/// Error type for client operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("failed: {0}")]
    Failed(reqwest::StatusCode),
    #[error("malformed response: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),
    #[error("invalid URL scheme: {0} (expected http or https)")]
    InvalidScheme(String),
}

impl Error {
    /// Whether a later attempt may succeed (timeouts, connection failures and
    /// server-side errors).
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Reqwest(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            Error::Failed(status) => client::is_retryable_status(*status),
            Error::Malformed(_) => true,
            Error::Url(_) | Error::InvalidScheme(_) => false,
        }
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;
