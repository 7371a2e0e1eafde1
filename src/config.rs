//! Saga audit configuration

use crate::error::{AuditError, Result};
use crate::guard;
use crate::logging::{LogLevel, AUDIT_TARGET};
use serde::{Deserialize, Serialize};

/// Default logger name for audit events, the `tracing` target they use
pub const DEFAULT_LOGGER_NAME: &str = AUDIT_TARGET;

/// Configuration for `SagaAuditBehavior`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SagaAuditConfig {
    /// Master switch; when false the behavior passes every invocation through
    pub enabled: bool,

    /// Name requested from the logger provider
    pub logger_name: String,

    /// Level audit events are written at
    pub level: LogLevel,
}

impl Default for SagaAuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            logger_name: DEFAULT_LOGGER_NAME.to_string(),
            level: LogLevel::Info,
        }
    }
}

impl SagaAuditConfig {
    /// Load configuration from environment variables
    ///
    /// - `SAGA_AUDIT_ENABLED`: `true` / `false`
    /// - `SAGA_AUDIT_LOGGER`: logger name
    /// - `SAGA_AUDIT_LEVEL`: trace, debug, info, warn, error
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(raw) = lookup("SAGA_AUDIT_ENABLED") {
            config.enabled = raw.trim().parse::<bool>().map_err(|_| {
                AuditError::Config(format!("SAGA_AUDIT_ENABLED must be true or false, got '{}'", raw))
            })?;
        }
        if let Some(name) = lookup("SAGA_AUDIT_LOGGER") {
            config.logger_name = name;
        }
        if let Some(raw) = lookup("SAGA_AUDIT_LEVEL") {
            config.level = raw.parse::<LogLevel>().map_err(AuditError::Config)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check invariants
    pub fn validate(&self) -> Result<()> {
        guard::against_empty(&self.logger_name, "logger_name")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = SagaAuditConfig::default();
        assert!(config.enabled);
        assert_eq!(config.logger_name, DEFAULT_LOGGER_NAME);
        assert_eq!(config.level, LogLevel::Info);
        config.validate().unwrap();
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = SagaAuditConfig::from_lookup(lookup(&[
            ("SAGA_AUDIT_ENABLED", "false"),
            ("SAGA_AUDIT_LOGGER", "billing.sagas"),
            ("SAGA_AUDIT_LEVEL", "debug"),
        ]))
        .unwrap();

        assert!(!config.enabled);
        assert_eq!(config.logger_name, "billing.sagas");
        assert_eq!(config.level, LogLevel::Debug);
    }

    #[test]
    fn test_from_lookup_empty_uses_defaults() {
        let config = SagaAuditConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, SagaAuditConfig::default());
    }

    #[test]
    fn test_from_lookup_rejects_bad_values() {
        let bad_flag = SagaAuditConfig::from_lookup(lookup(&[("SAGA_AUDIT_ENABLED", "maybe")]));
        assert!(matches!(bad_flag, Err(AuditError::Config(_))));

        let bad_level = SagaAuditConfig::from_lookup(lookup(&[("SAGA_AUDIT_LEVEL", "loud")]));
        assert!(matches!(bad_level, Err(AuditError::Config(_))));

        let blank_logger = SagaAuditConfig::from_lookup(lookup(&[("SAGA_AUDIT_LOGGER", " ")]));
        assert!(matches!(blank_logger, Err(AuditError::InvalidArgument { .. })));
    }

    #[test]
    fn test_deserialize_partial() {
        let config: SagaAuditConfig = serde_json::from_str(r#"{"level":"warn"}"#).unwrap();
        assert_eq!(config.level, LogLevel::Warn);
        assert!(config.enabled);
        assert_eq!(config.logger_name, DEFAULT_LOGGER_NAME);
    }
}
