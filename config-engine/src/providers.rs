// Configuration sources (defaults, files, inline strings, environment)
use crate::error::Result;
use serde::Serialize;
use std::path::PathBuf;

/// Serialization format of a file or inline source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Toml,
    Json,
}

impl ConfigFormat {
    pub(crate) fn as_file_format(self) -> config::FileFormat {
        match self {
            ConfigFormat::Yaml => config::FileFormat::Yaml,
            ConfigFormat::Toml => config::FileFormat::Toml,
            ConfigFormat::Json => config::FileFormat::Json,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// Serialized default values, always the lowest layer in practice
    Defaults(String),
    File { path: PathBuf, required: bool },
    Inline { content: String, format: ConfigFormat },
    /// `PREFIX__SECTION__KEY` variables
    Env { prefix: String },
}

impl ConfigSource {
    pub fn defaults<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Self::Defaults(serde_json::to_string(value)?))
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File { path: path.into(), required: true }
    }

    pub fn optional_file(path: impl Into<PathBuf>) -> Self {
        Self::File { path: path.into(), required: false }
    }

    pub fn inline(content: impl Into<String>, format: ConfigFormat) -> Self {
        Self::Inline { content: content.into(), format }
    }

    pub fn env(prefix: &str) -> Self {
        Self::Env { prefix: prefix.to_string() }
    }

    pub fn describe(&self) -> String {
        match self {
            ConfigSource::Defaults(_) => "defaults".to_string(),
            ConfigSource::File { path, .. } => format!("file:{}", path.display()),
            ConfigSource::Inline { format, .. } => format!("inline:{:?}", format),
            ConfigSource::Env { prefix } => format!("env:{}", prefix),
        }
    }
}
