use thiserror::Error;

/// Message used when the backend answers with an error body we cannot read.
pub const GENERIC_FAILURE: &str = "An error occurred";

/// Failure of a read against the remote summary service.
///
/// Cloneable so that every caller coalesced onto the same in-flight request
/// receives the very same error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("network error: {0}")]
    Transport(String),
    #[error("{detail}")]
    Status { status: u16, detail: String },
    #[error("invalid response body: {0}")]
    Decode(String),
    #[error("request timed out")]
    Timeout,
    #[error("fetch task failed: {0}")]
    Task(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else if err.is_decode() {
            FetchError::Decode(err.to_string())
        } else {
            FetchError::Transport(err.to_string())
        }
    }
}

impl From<tokio::task::JoinError> for FetchError {
    fn from(err: tokio::task::JoinError) -> Self {
        FetchError::Task(err.to_string())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("no item at index {index} (queue holds {len})")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("invalid audio path {path:?}: {reason}")]
    InvalidAssetPath { path: String, reason: String },
    #[error("failed to play audio {path}: {message}")]
    Asset { path: String, message: String },
}

impl PlaybackError {
    /// Rejected before touching the audio device; state is untouched.
    pub fn is_validation(&self) -> bool {
        matches!(self, PlaybackError::IndexOutOfRange { .. })
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to locate the configuration directory")]
    MissingConfigDir,
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("http client error: {0}")]
    Http(reqwest::Error),
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error("poller task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Failure reported by the audio device.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct AudioError(pub String);

impl AudioError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
