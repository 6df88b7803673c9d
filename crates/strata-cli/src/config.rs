//! `strata.toml` tool configuration
//!
//! ```toml
//! [repository]
//! module-path = ["lib", "vendor/core.xtc"]
//!
//! [log]
//! level = "info"
//! driver = "debug"
//!
//! [pipeline]
//! max-tries = 63
//! ```
//!
//! Command-line flags override values read here.

use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use strata_driver::PipelineConfig;
use tracing::Level;

/// File looked up in the working directory when `--config` is not given
pub const CONFIG_FILE: &str = "strata.toml";

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
struct RawConfig {
    repository: RepositoryConfig,
    log: RawLogConfig,
    pipeline: PipelineConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawLogConfig {
    level: Option<String>,
    repo: Option<String>,
    driver: Option<String>,
}

/// Library paths searched after the build cache
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct RepositoryConfig {
    pub module_path: Vec<PathBuf>,
}

/// Log levels, global and per crate
#[derive(Debug, Clone, PartialEq)]
pub struct LogConfig {
    pub global: Level,
    pub repo: Option<Level>,
    pub driver: Option<Level>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            global: Level::WARN,
            repo: None,
            driver: None,
        }
    }
}

impl LogConfig {
    /// Get log level for a specific target
    pub fn level_for(&self, target: &str) -> Level {
        match target {
            "strata_repo" => self.repo.unwrap_or(self.global),
            "strata_driver" => self.driver.unwrap_or(self.global),
            _ => self.global,
        }
    }

    /// Apply `-v` flags: each one raises every level one step
    pub fn with_verbosity(mut self, verbose: u8) -> Self {
        let raise = |level: Level| (0..verbose).fold(level, |l, _| louder(l));
        self.global = raise(self.global);
        self.repo = self.repo.map(raise);
        self.driver = self.driver.map(raise);
        self
    }
}

fn louder(level: Level) -> Level {
    if level == Level::ERROR {
        Level::WARN
    } else if level == Level::WARN {
        Level::INFO
    } else if level == Level::INFO {
        Level::DEBUG
    } else {
        Level::TRACE
    }
}

fn parse_level(key: &str, value: Option<&str>) -> anyhow::Result<Option<Level>> {
    value
        .map(|v| {
            Level::from_str(v).map_err(|_| anyhow::anyhow!("invalid log level for {}: '{}'", key, v))
        })
        .transpose()
}

/// Everything read from `strata.toml`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolConfig {
    pub repository: RepositoryConfig,
    pub log: LogConfig,
    pub pipeline: PipelineConfig,
}

impl ToolConfig {
    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        let raw: RawConfig = toml::from_str(s)?;
        raw.pipeline.validate()?;

        let mut log = LogConfig::default();
        if let Some(level) = parse_level("log.level", raw.log.level.as_deref())? {
            log.global = level;
        }
        log.repo = parse_level("log.repo", raw.log.repo.as_deref())?;
        log.driver = parse_level("log.driver", raw.log.driver.as_deref())?;

        Ok(Self {
            repository: raw.repository,
            log,
            pipeline: raw.pipeline,
        })
    }

    /// Load `path`, or `strata.toml` in the working directory if present
    ///
    /// A missing default file yields the default configuration; a missing
    /// explicit file is an error.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None if Path::new(CONFIG_FILE).is_file() => PathBuf::from(CONFIG_FILE),
            None => return Ok(Self::default()),
        };
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_toml_str(&text)
            .with_context(|| format!("Invalid configuration in {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_default() {
        let config = ToolConfig::from_toml_str("").unwrap();
        assert_eq!(config, ToolConfig::default());
        assert_eq!(config.log.global, Level::WARN);
    }

    #[test]
    fn test_full_file() {
        let config = ToolConfig::from_toml_str(
            r#"
            [repository]
            module-path = ["lib", "vendor/core.xtc"]

            [log]
            level = "info"
            driver = "trace"

            [pipeline]
            max-tries = 10
            version = "1.0"
            "#,
        )
        .unwrap();
        assert_eq!(
            config.repository.module_path,
            vec![PathBuf::from("lib"), PathBuf::from("vendor/core.xtc")]
        );
        assert_eq!(config.log.level_for("strata_repo"), Level::INFO);
        assert_eq!(config.log.level_for("strata_driver"), Level::TRACE);
        assert_eq!(config.pipeline.max_tries, 10);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(ToolConfig::from_toml_str("[log]\nlevel = \"loud\"").is_err());
        assert!(ToolConfig::from_toml_str("[pipeline]\nmax-tries = 0").is_err());
        assert!(ToolConfig::from_toml_str("[repo]\nmodule-path = []").is_err());
    }

    #[test]
    fn test_verbosity() {
        let log = LogConfig::default().with_verbosity(2);
        assert_eq!(log.global, Level::DEBUG);
        let log = LogConfig::default().with_verbosity(9);
        assert_eq!(log.global, Level::TRACE);
    }

    #[test]
    fn test_load_missing_explicit_file() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(ToolConfig::load(Some(&dir.path().join("nope.toml"))).is_err());
    }
}
