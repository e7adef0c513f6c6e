use thiserror::Error;

/// Errors from the REST bootstrap endpoints.
#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("Invalid API base URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("API base URL does not accept path segments")]
    InvalidBase,

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server responded with status {0}")]
    UnexpectedStatus(reqwest::StatusCode),
}
