use crate::error::{ConfigError, Result};
use crate::providers::{ConfigFormat, ConfigSource};
use crate::validation::ConfigValidator;
use serde::de::DeserializeOwned;
use tracing::debug;

/// Builder that merges configuration sources in insertion order
#[derive(Debug, Default)]
pub struct ConfigEngine {
    sources: Vec<ConfigSource>,
}

impl ConfigEngine {
    pub fn new() -> Self {
        Self { sources: Vec::new() }
    }

    pub fn add_source(mut self, source: ConfigSource) -> Self {
        self.sources.push(source);
        self
    }

    pub fn sources(&self) -> &[ConfigSource] {
        &self.sources
    }

    /// Merge all sources, deserialize into `T` and validate it
    pub fn load<T>(&self) -> Result<T>
    where
        T: DeserializeOwned + ConfigValidator,
    {
        let value: T = self.build()?.try_deserialize()?;
        value.validate()?;
        Ok(value)
    }

    fn build(&self) -> Result<config::Config> {
        let mut builder = config::Config::builder();

        for source in &self.sources {
            debug!(source = %source.describe(), "Adding configuration source");
            builder = match source {
                ConfigSource::Defaults(json) => builder.add_source(config::File::from_str(
                    json,
                    ConfigFormat::Json.as_file_format(),
                )),
                ConfigSource::File { path, required } => {
                    if *required && !path.exists() {
                        return Err(ConfigError::SourceNotFound(path.display().to_string()));
                    }
                    builder.add_source(config::File::from(path.as_path()).required(*required))
                }
                ConfigSource::Inline { content, format } => {
                    builder.add_source(config::File::from_str(content, format.as_file_format()))
                }
                ConfigSource::Env { prefix } => builder.add_source(
                    config::Environment::with_prefix(prefix)
                        .separator("__")
                        .try_parsing(true),
                ),
            };
        }

        Ok(builder.build()?)
    }
}
