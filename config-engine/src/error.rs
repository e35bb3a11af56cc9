use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration source not found: {0}")]
    SourceNotFound(String),

    #[error("Configuration parsing failed: {0}")]
    ParseError(#[from] config::ConfigError),

    #[error("Configuration defaults could not be serialized: {0}")]
    DefaultsError(#[from] serde_json::Error),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
