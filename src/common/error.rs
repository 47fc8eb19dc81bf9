use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExporterError {
    #[error("missing required environment variable: {0}")]
    MissingVar(String),

    #[error("invalid value for {var}: {reason}")]
    InvalidVar { var: String, reason: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("transient upstream failure: {0}")]
    Transient(String),

    #[error("rate limit exhausted, required wait of {wait_secs}s exceeds the configured cap")]
    RateLimited { wait_secs: u64 },

    #[error("authentication rejected by the GitHub API (status {status})")]
    Auth { status: u16 },

    #[error("GitHub API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("publish to metrics backend failed: {0}")]
    Publish(String),
}

impl ExporterError {
    /// True for failures worth retrying on the next page or cycle.
    pub fn is_transient(&self) -> bool {
        matches!(self, ExporterError::Http(_) | ExporterError::Transient(_))
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, ExporterError::Auth { .. })
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, ExporterError::RateLimited { .. })
    }
}

pub type Result<T> = std::result::Result<T, ExporterError>;
