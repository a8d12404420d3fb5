use thiserror::Error;

/// Errors shared across the clipwire crates.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("request {0} timed out waiting for a response")]
    Timeout(String),

    #[error("no calibrated click target")]
    NotCalibrated,

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("Actuator Error: {0}")]
    Actuator(String),

    #[error("Upstream Error: {0}")]
    Upstream(String),

    #[error("Codec Error: {0}")]
    Codec(String),

    #[error("Correlation Error: {0}")]
    Correlation(String),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Result type for clipwire operations
pub type RelayResult<T> = Result<T, RelayError>;
