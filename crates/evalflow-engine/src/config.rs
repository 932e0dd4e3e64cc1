//! Engine configuration
//!
//! Loaded from TOML; every field has a default so an empty file is valid.
//! `EVALFLOW_LOG` overrides the log filter.

use evalflow_core::{MeanAbove, MeanAtLeast, ReviewerFloor, RubricPolicy, WorkflowError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Environment variable that overrides [`WorkflowConfig::log_filter`]
pub const LOG_ENV: &str = "EVALFLOW_LOG";

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        /// Config file path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// File is not valid TOML for this schema
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Value out of range
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

impl From<ConfigError> for WorkflowError {
    fn from(err: ConfigError) -> Self {
        WorkflowError::Config(err.to_string())
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

/// Which built-in rubric policy the engine uses
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RubricPolicyConfig {
    /// Pass when the overall mean is strictly above `threshold`
    MeanAbove {
        /// Exclusive lower bound
        threshold: f64,
    },
    /// Pass when the overall mean is at least `threshold`
    MeanAtLeast {
        /// Inclusive lower bound
        threshold: f64,
    },
    /// Fail when any reviewer's mean is below `floor`
    ReviewerFloor {
        /// Lowest acceptable per-reviewer mean
        floor: f64,
    },
}

impl Default for RubricPolicyConfig {
    fn default() -> Self {
        Self::MeanAtLeast { threshold: 3.0 }
    }
}

impl RubricPolicyConfig {
    /// Instantiate the policy
    #[must_use]
    pub fn build(&self) -> Arc<dyn RubricPolicy> {
        match *self {
            Self::MeanAbove { threshold } => Arc::new(MeanAbove { threshold }),
            Self::MeanAtLeast { threshold } => Arc::new(MeanAtLeast { threshold }),
            Self::ReviewerFloor { floor } => Arc::new(ReviewerFloor { floor }),
        }
    }

    fn bound(&self) -> f64 {
        match *self {
            Self::MeanAbove { threshold } | Self::MeanAtLeast { threshold } => threshold,
            Self::ReviewerFloor { floor } => floor,
        }
    }
}

/// Workflow engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Rubric pass/fail policy
    pub rubric_policy: RubricPolicyConfig,
    /// Check the page inheritance invariant before committing page changes
    pub verify_inheritance: bool,
    /// Default `tracing` filter directive
    pub log_filter: String,
    /// Log output format
    pub log_format: LogFormat,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            rubric_policy: RubricPolicyConfig::default(),
            verify_inheritance: true,
            log_filter: "evalflow=info".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

impl WorkflowConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With rubric policy
    #[inline]
    #[must_use]
    pub fn with_rubric_policy(mut self, policy: RubricPolicyConfig) -> Self {
        self.rubric_policy = policy;
        self
    }

    /// With inheritance verification on or off
    #[inline]
    #[must_use]
    pub fn with_verify_inheritance(mut self, verify: bool) -> Self {
        self.verify_inheritance = verify;
        self
    }

    /// With log filter
    #[inline]
    #[must_use]
    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = filter.into();
        self
    }

    /// With log format
    #[inline]
    #[must_use]
    pub fn with_log_format(mut self, format: LogFormat) -> Self {
        self.log_format = format;
        self
    }

    /// Parse from TOML text
    ///
    /// # Errors
    /// `Parse` or `Invalid`
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file, then apply environment overrides
    ///
    /// # Errors
    /// `Io`, `Parse` or `Invalid`
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_toml_str(&raw)?.with_env_overrides())
    }

    /// Apply `EVALFLOW_LOG` if set
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(filter) = std::env::var(LOG_ENV) {
            if !filter.trim().is_empty() {
                self.log_filter = filter;
            }
        }
        self
    }

    /// Check values are usable
    ///
    /// # Errors
    /// `Invalid` when the policy bound is not finite
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.rubric_policy.bound().is_finite() {
            return Err(ConfigError::Invalid {
                field: "rubric_policy",
                reason: "bound must be a finite number".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_toml_is_default() {
        let config = WorkflowConfig::from_toml_str("").unwrap();
        assert_eq!(config, WorkflowConfig::default());
        assert!(config.verify_inheritance);
    }

    #[test]
    fn parses_policy_table() {
        let raw = r#"
            verify_inheritance = false
            log_format = "json"

            [rubric_policy]
            kind = "reviewer_floor"
            floor = 2.5
        "#;
        let config = WorkflowConfig::from_toml_str(raw).unwrap();
        assert_eq!(config.rubric_policy, RubricPolicyConfig::ReviewerFloor { floor: 2.5 });
        assert_eq!(config.log_format, LogFormat::Json);
        assert!(!config.verify_inheritance);
        assert_eq!(config.rubric_policy.build().name(), "reviewer_floor");
    }

    #[test]
    fn unknown_policy_kind_is_rejected() {
        let raw = "[rubric_policy]\nkind = \"median\"\nthreshold = 1.0\n";
        assert!(matches!(
            WorkflowConfig::from_toml_str(raw),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "log_filter = \"evalflow=debug\"").unwrap();
        let config = WorkflowConfig::from_toml_file(file.path()).unwrap();
        assert_eq!(config.rubric_policy, RubricPolicyConfig::default());
        assert!(!config.log_filter.is_empty());
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = WorkflowConfig::from_toml_file("/nonexistent/evalflow.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        let converted: WorkflowError = err.into();
        assert!(matches!(converted, WorkflowError::Config(_)));
    }

    #[test]
    fn builders_override_fields() {
        let config = WorkflowConfig::new()
            .with_rubric_policy(RubricPolicyConfig::MeanAbove { threshold: 7.0 })
            .with_verify_inheritance(false)
            .with_log_filter("warn")
            .with_log_format(LogFormat::Json);
        assert_eq!(config.log_filter, "warn");
        assert!(!config.verify_inheritance);
    }
}
