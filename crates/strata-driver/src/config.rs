//! Pipeline configuration

use crate::diagnostics::Severity;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use strata_repo::Version;
use thiserror::Error;

/// Default bound on passes per fixed-point stage
pub const DEFAULT_MAX_TRIES: usize = 0x3F;

/// Errors loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Settings for one pipeline run
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct PipelineConfig {
    /// Passes allowed per fixed-point stage before giving up
    pub max_tries: usize,
    /// Severity at which a unit stops advancing
    pub unit_abort_severity: Severity,
    /// Severity at which the whole run stops
    pub run_abort_severity: Severity,
    /// Abort the run once this many errors have been reported
    pub max_errors: Option<usize>,
    /// Build units even when their front-end reports them up to date
    pub force_rebuild: bool,
    /// Version stamped onto every emitted module
    pub version: Option<Version>,
    /// Caller timeout, checked once per pass
    pub pass_timeout_ms: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_tries: DEFAULT_MAX_TRIES,
            unit_abort_severity: Severity::Error,
            run_abort_severity: Severity::Fatal,
            max_errors: None,
            force_rebuild: false,
            version: None,
            pass_timeout_ms: None,
        }
    }
}

impl PipelineConfig {
    /// Parse a `[pipeline]`-style TOML table
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_tries == 0 {
            return Err(ConfigError::Invalid("max-tries must be at least 1".to_string()));
        }
        if self.unit_abort_severity > self.run_abort_severity {
            return Err(ConfigError::Invalid(format!(
                "unit-abort-severity ({}) is above run-abort-severity ({})",
                self.unit_abort_severity, self.run_abort_severity
            )));
        }
        if self.max_errors == Some(0) {
            return Err(ConfigError::Invalid("max-errors must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_tries, 63);
        assert_eq!(config.unit_abort_severity, Severity::Error);
        assert_eq!(config.run_abort_severity, Severity::Fatal);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial() {
        let config = PipelineConfig::from_toml_str(
            r#"
            max-tries = 5
            version = "1.2-beta"
            force-rebuild = true
            "#,
        )
        .unwrap();
        assert_eq!(config.max_tries, 5);
        assert_eq!(config.version, Some(Version::parse("1.2-beta").unwrap()));
        assert!(config.force_rebuild);
        assert_eq!(config.pass_timeout_ms, None);
    }

    #[test]
    fn test_parse_rejects_unknown_keys() {
        assert!(matches!(
            PipelineConfig::from_toml_str("retries = 3"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_validate() {
        assert!(matches!(
            PipelineConfig::from_toml_str("max-tries = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            PipelineConfig::from_toml_str(
                "unit-abort-severity = \"fatal\"\nrun-abort-severity = \"error\""
            ),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("pipeline.toml");
        std::fs::write(&path, "max-errors = 10\npass-timeout-ms = 500\n").unwrap();
        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.max_errors, Some(10));
        assert_eq!(config.pass_timeout_ms, Some(500));
    }
}
