// CLI configuration: defaults, then a config file, then APPROVALS__* variables
use config_engine::{ConfigEngine, ConfigError, ConfigSource, ConfigValidator};
use serde::{Deserialize, Serialize};
use std::path::Path;
use workflow_engine::EngineConfig;

pub const DEFAULT_CONFIG_FILE: &str = "approvals.yaml";
pub const ENV_PREFIX: &str = "APPROVALS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalsConfig {
    pub engine: EngineConfig,
    pub database_url: Option<String>,
    pub log_level: String,
}

impl Default for ApprovalsConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            database_url: None,
            log_level: "info".to_string(),
        }
    }
}

impl ConfigValidator for ApprovalsConfig {
    fn validate(&self) -> config_engine::Result<()> {
        self.engine.validate()?;
        if let Some(url) = &self.database_url {
            if !url.starts_with("postgres://") && !url.starts_with("postgresql://") {
                return Err(ConfigError::ValidationError(
                    "database_url must be a postgres:// connection string".into(),
                ));
            }
        }
        Ok(())
    }
}

impl ApprovalsConfig {
    /// An explicit `path` must exist; otherwise `approvals.yaml` is used if present
    pub fn load(path: Option<&Path>) -> config_engine::Result<Self> {
        let file = match path {
            Some(path) => ConfigSource::file(path),
            None => ConfigSource::optional_file(DEFAULT_CONFIG_FILE),
        };
        ConfigEngine::new()
            .add_source(ConfigSource::defaults(&Self::default())?)
            .add_source(file)
            .add_source(ConfigSource::env(ENV_PREFIX))
            .load()
    }

    /// Configured URL, falling back to the conventional `DATABASE_URL`
    pub fn database_url(&self) -> Option<String> {
        self.database_url
            .clone()
            .or_else(|| std::env::var("DATABASE_URL").ok())
    }
}
