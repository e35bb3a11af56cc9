// Engine tuning knobs, loaded through config-engine
use config_engine::{ConfigError, ConfigValidator};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Additional attempts after a version conflict before giving up
    pub max_retries: u32,
    /// Due date offset applied when a submission carries none
    pub default_due_days: u32,
    pub escalation_interval_secs: u64,
    /// Tell the requester each time their request moves to a new step
    pub notify_on_step_advance: bool,
}

impl EngineConfig {
    pub fn escalation_interval(&self) -> Duration {
        Duration::from_secs(self.escalation_interval_secs)
    }

    pub fn default_due(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.default_due_days))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            default_due_days: 7,
            escalation_interval_secs: 300,
            notify_on_step_advance: false,
        }
    }
}

impl ConfigValidator for EngineConfig {
    fn validate(&self) -> config_engine::Result<()> {
        if self.default_due_days == 0 {
            return Err(ConfigError::ValidationError(
                "engine.default_due_days must be at least 1".into(),
            ));
        }
        if self.escalation_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "engine.escalation_interval_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config_engine::{ConfigEngine, ConfigFormat, ConfigSource};

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.default_due(), chrono::Duration::days(7));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_override_through_config_engine() {
        let config: EngineConfig = ConfigEngine::new()
            .add_source(ConfigSource::inline("max_retries: 2\nnotify_on_step_advance: true", ConfigFormat::Yaml))
            .load()
            .unwrap();

        assert_eq!(config.max_retries, 2);
        assert!(config.notify_on_step_advance);
        assert_eq!(config.default_due_days, 7);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let err = ConfigEngine::new()
            .add_source(ConfigSource::inline("escalation_interval_secs: 0", ConfigFormat::Yaml))
            .load::<EngineConfig>()
            .unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }
}
