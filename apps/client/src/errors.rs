use thiserror::Error;

/// Fallback shown when the service gives no usable message of its own.
pub const GENERIC_FAILURE_MESSAGE: &str = "An error occurred during prediction";

/// Input rejected on the client before any network call is made.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("Unsupported file '{name}': expected one of {}", allowed.join(", "))]
    UnsupportedExtension { name: String, allowed: Vec<String> },

    #[error("Please select at least one file ({})", slots.join(", "))]
    InsufficientInput { slots: Vec<String> },

    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: f64, max: f64 },

    #[error("Message cannot be empty")]
    EmptyMessage,
}

/// Client-level error type.
///
/// Transport and application failures share one channel: both end up as a
/// `Failed` request state carrying `user_message()`.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Service error: {0}")]
    Application(String),

    /// A response or request body did not have the expected shape.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The encoded result file could not be turned back into bytes.
    #[error("File decode error: {0}")]
    FileDecode(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    pub fn code(&self) -> &'static str {
        match self {
            ClientError::Validation(ValidationError::UnsupportedExtension { .. }) => {
                "UNSUPPORTED_EXTENSION"
            }
            ClientError::Validation(ValidationError::InsufficientInput { .. }) => {
                "INSUFFICIENT_INPUT"
            }
            ClientError::Validation(_) => "VALIDATION_ERROR",
            ClientError::Transport(_) => "TRANSPORT_ERROR",
            ClientError::Application(_) => "APPLICATION_ERROR",
            ClientError::Decode(_) => "DECODE_ERROR",
            ClientError::FileDecode(_) => "FILE_DECODE_ERROR",
            ClientError::Io(_) => "IO_ERROR",
        }
    }

    /// The inline, dismissible message for this error.
    pub fn user_message(&self) -> String {
        match self {
            ClientError::Validation(e) => e.to_string(),
            ClientError::Transport(detail) => {
                tracing::error!("Transport error: {detail}");
                GENERIC_FAILURE_MESSAGE.to_string()
            }
            ClientError::Application(msg) if msg.trim().is_empty() => {
                GENERIC_FAILURE_MESSAGE.to_string()
            }
            ClientError::Application(msg) => msg.clone(),
            ClientError::Decode(detail) => {
                tracing::error!("Decode error: {detail}");
                GENERIC_FAILURE_MESSAGE.to_string()
            }
            ClientError::FileDecode(detail) => {
                tracing::error!("File decode error: {detail}");
                "The result file could not be decoded".to_string()
            }
            ClientError::Io(e) => {
                tracing::error!("I/O error: {e}");
                "The file could not be read or saved".to_string()
            }
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        ClientError::Transport(e.to_string())
    }
}
