use thiserror::Error;

#[derive(Error, Debug)]
pub enum EventBusError {
    #[error("Event serialization failed: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Invalid subject: {0}")]
    InvalidSubject(String),

    #[error("Invalid subject pattern: {0}")]
    InvalidPattern(String),

    #[error("Event bus is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, EventBusError>;
