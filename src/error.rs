//! Error handling for the Bucle scanner engine

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Camera permission denied or no device present
    #[error("Camera unavailable: {0}")]
    DeviceUnavailable(String),

    /// Capture source is running but has not produced a frame yet
    #[error("No frame available yet")]
    NoFrameYet,

    /// Classifier called before its model artifacts finished loading
    #[error("Model not ready")]
    ModelNotReady,

    /// Classification failed (malformed input, scoring endpoint rejected the frame)
    #[error("Classification error: {0}")]
    Classification(String),

    /// Authentication failure (bad credentials, registration conflict)
    #[error("Auth error: {0}")]
    Auth(String),

    /// Submission rejected by the backend (validation, server error)
    #[error("Submission error: {0}")]
    Submission(String),

    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Config error
    #[error("Config error: {0}")]
    Config(String),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Network error
    #[error("Network error: {0}")]
    Network(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// SQLx database error
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this failure belongs to the model taxonomy. The analyzing
    /// phase ends with "no detection" for these instead of surfacing them.
    pub fn is_model_error(&self) -> bool {
        matches!(self, Error::ModelNotReady | Error::Classification(_))
    }
}
