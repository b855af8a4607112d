use livewatch_common::CameraId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LiveViewError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Backend error ({status}): {}", .detail.as_deref().unwrap_or("no detail"))]
    Backend { status: u16, detail: Option<String> },

    #[error("Camera {0} already exists")]
    DuplicateCamera(CameraId),

    #[error("Camera source {0} is not reachable")]
    Unreachable(String),

    #[error("Unknown camera: {0}")]
    UnknownCamera(CameraId),

    #[error("Invalid camera: {0}")]
    InvalidCamera(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LiveViewError {
    /// Errors worth retrying on the next tick or reconnect attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            LiveViewError::Network(_) | LiveViewError::Stream(_) => true,
            LiveViewError::Backend { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for LiveViewError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            return LiveViewError::MalformedPayload(error.to_string());
        }
        match error.status() {
            Some(status) => LiveViewError::Backend {
                status: status.as_u16(),
                detail: Some(error.to_string()),
            },
            None => LiveViewError::Network(error.to_string()),
        }
    }
}

impl From<serde_json::Error> for LiveViewError {
    fn from(error: serde_json::Error) -> Self {
        LiveViewError::MalformedPayload(error.to_string())
    }
}

impl From<config::ConfigError> for LiveViewError {
    fn from(error: config::ConfigError) -> Self {
        LiveViewError::Config(error.to_string())
    }
}

impl From<validator::ValidationErrors> for LiveViewError {
    fn from(error: validator::ValidationErrors) -> Self {
        LiveViewError::InvalidCamera(error.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for LiveViewError {
    fn from(error: tokio::time::error::Elapsed) -> Self {
        LiveViewError::Network(format!("request timed out: {}", error))
    }
}

pub type Result<T> = std::result::Result<T, LiveViewError>;
