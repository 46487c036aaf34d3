use thiserror::Error;

#[derive(Error, Debug)]
pub enum TablelogError {
    #[error("Invalid {field}: {message}")]
    Validation { field: &'static str, message: String },

    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Sink delivery failed: {0}")]
    SinkDelivery(String),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(String),
}

impl TablelogError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    /// Caller-correctable errors: the request itself was wrong.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation { .. } | Self::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, TablelogError>;
