//! Layered configuration loading for the approvals platform
//!
//! Sources are merged in the order they are added, later sources overriding
//! earlier ones:
//! - **Defaults**: any `Serialize` value, usually the config type's `Default`
//! - **Files**: YAML, TOML or JSON, chosen by extension
//! - **Inline**: a string in a given format (handy in tests)
//! - **Environment**: `PREFIX__SECTION__KEY=value`
//!
//! The merged result is deserialized into the caller's type and then passed
//! through its [`ConfigValidator`] implementation.
//!
//! # Example
//!
//! ```rust,no_run
//! use config_engine::{ConfigEngine, ConfigSource, ConfigValidator};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Default, Serialize, Deserialize)]
//! struct AppConfig {
//!     database_url: String,
//!     log_level: String,
//! }
//!
//! impl ConfigValidator for AppConfig {}
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config: AppConfig = ConfigEngine::new()
//!         .add_source(ConfigSource::defaults(&AppConfig::default())?)
//!         .add_source(ConfigSource::optional_file("approvals.yaml"))
//!         .add_source(ConfigSource::env("APPROVALS"))
//!         .load()?;
//!
//!     println!("Loaded configuration: {:?}", config);
//!     Ok(())
//! }
//! ```

pub mod engine;
pub mod providers;
pub mod validation;
pub mod error;

pub use engine::*;
pub use providers::*;
pub use validation::*;
pub use error::*;
