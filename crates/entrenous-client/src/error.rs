use thiserror::Error;

use entrenous_net::BootstrapError;

/// Errors surfaced by the session engine API.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Identity must not be empty")]
    EmptyIdentity,

    #[error("Room id must not be empty")]
    EmptyRoom,

    #[error("Invalid endpoint URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Bootstrap request failed: {0}")]
    Bootstrap(#[from] BootstrapError),

    #[error("Session state lock poisoned")]
    LockPoisoned,
}
