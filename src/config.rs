// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Checkpoint manager configuration
//!
//! Loaded from the `[checkpoint]` table of a TOML file, then overridden from
//! the environment:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `CHECKPOINT_PATH_PREFIX` | `object_path_prefix` |
//! | `CHECKPOINT_QUEUE_DEPTH` | `command_queue_depth` |
//! | `CHECKPOINT_EVENT_CAPACITY` | `rollback_event_capacity` |
//! | `CHECKPOINT_SHUTDOWN_TIMEOUT_MS` | `shutdown_timeout_ms` |

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default prefix for published checkpoint ids
pub const DEFAULT_PATH_PREFIX: &str = "/org/netcfg/Checkpoint";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Published ids are `<prefix>/<n>`
    pub object_path_prefix: String,

    /// Bound of the service command channel
    pub command_queue_depth: usize,

    /// Rollback events buffered per subscriber before it lags
    pub rollback_event_capacity: usize,

    /// How long `shutdown()` waits for the service loop to acknowledge
    pub shutdown_timeout_ms: u64,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            object_path_prefix: DEFAULT_PATH_PREFIX.to_string(),
            command_queue_depth: 32,
            rollback_event_capacity: 64,
            shutdown_timeout_ms: 5000,
        }
    }
}

impl CheckpointConfig {
    /// Load from the `[checkpoint]` table of a TOML file.
    ///
    /// A missing table yields defaults; missing keys fall back per field.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let toml_value: toml::Value = toml::from_str(content)?;

        let config = match toml_value.get("checkpoint") {
            Some(table) => table.clone().try_into()?,
            None => Self::default(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden from the environment
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply environment overrides; unparsable values are ignored
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("CHECKPOINT_PATH_PREFIX") {
            self.object_path_prefix = val;
        }

        if let Ok(val) = std::env::var("CHECKPOINT_QUEUE_DEPTH") {
            if let Ok(num) = val.parse() {
                self.command_queue_depth = num;
            }
        }

        if let Ok(val) = std::env::var("CHECKPOINT_EVENT_CAPACITY") {
            if let Ok(num) = val.parse() {
                self.rollback_event_capacity = num;
            }
        }

        if let Ok(val) = std::env::var("CHECKPOINT_SHUTDOWN_TIMEOUT_MS") {
            if let Ok(num) = val.parse() {
                self.shutdown_timeout_ms = num;
            }
        }

        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.object_path_prefix.is_empty() || !self.object_path_prefix.starts_with('/') {
            return Err(anyhow!(
                "object_path_prefix must be an absolute path, got '{}'",
                self.object_path_prefix
            ));
        }
        if self.object_path_prefix.ends_with('/') {
            return Err(anyhow!(
                "object_path_prefix must not end with '/', got '{}'",
                self.object_path_prefix
            ));
        }
        if self.command_queue_depth == 0 {
            return Err(anyhow!("command_queue_depth must be greater than zero"));
        }
        if self.rollback_event_capacity == 0 {
            return Err(anyhow!("rollback_event_capacity must be greater than zero"));
        }
        Ok(())
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn with_path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.object_path_prefix = prefix.into();
        self
    }

    pub fn with_command_queue_depth(mut self, depth: usize) -> Self {
        self.command_queue_depth = depth;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_is_valid() {
        let config = CheckpointConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.object_path_prefix, DEFAULT_PATH_PREFIX);
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_from_file_partial_table() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(
            file,
            "[checkpoint]\nobject_path_prefix = \"/net/test/Checkpoint\"\ncommand_queue_depth = 4"
        )?;

        let config = CheckpointConfig::from_file(file.path())?;
        assert_eq!(config.object_path_prefix, "/net/test/Checkpoint");
        assert_eq!(config.command_queue_depth, 4);
        assert_eq!(config.rollback_event_capacity, 64);
        Ok(())
    }

    #[test]
    fn test_missing_table_uses_defaults() -> Result<()> {
        let config = CheckpointConfig::from_toml_str("[other]\nkey = 1")?;
        assert_eq!(config, CheckpointConfig::default());
        Ok(())
    }

    #[test]
    fn test_invalid_prefix_rejected() {
        assert!(CheckpointConfig::from_toml_str("[checkpoint]\nobject_path_prefix = \"relative\"")
            .is_err());
        assert!(CheckpointConfig::from_toml_str("[checkpoint]\nobject_path_prefix = \"/trailing/\"")
            .is_err());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = CheckpointConfig::default().with_command_queue_depth(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_env_overrides_defaults() {
        std::env::set_var("CHECKPOINT_PATH_PREFIX", "/env/Checkpoint");
        std::env::set_var("CHECKPOINT_QUEUE_DEPTH", "8");
        std::env::set_var("CHECKPOINT_EVENT_CAPACITY", "not-a-number");

        let config = CheckpointConfig::from_env();

        std::env::remove_var("CHECKPOINT_PATH_PREFIX");
        std::env::remove_var("CHECKPOINT_QUEUE_DEPTH");
        std::env::remove_var("CHECKPOINT_EVENT_CAPACITY");

        assert_eq!(config.object_path_prefix, "/env/Checkpoint");
        assert_eq!(config.command_queue_depth, 8);
        // Unparsable values keep the default
        assert_eq!(config.rollback_event_capacity, 64);
        assert_eq!(config.shutdown_timeout_ms, 5000);
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(CheckpointConfig::from_file("/nonexistent/netcfg-checkpoint.toml").is_err());
    }
}
