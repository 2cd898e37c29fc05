//! Configuration loading and validation.

mod descriptor;
mod types;
mod validation;

pub use descriptor::{ConnectionDescriptor, DEFAULT_MYSQL_PORT};
pub use types::*;

use crate::error::Result;
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }
}

impl ReplicationConfig {
    /// Load replication settings from a YAML file.
    ///
    /// The file holds either the settings block itself or a full document
    /// with a top-level `replication:` key; connection descriptors and schemas
    /// in a full document are ignored here since they come from the command line.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse replication settings from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let value: serde_yaml::Value = serde_yaml::from_str(yaml)?;
        let settings = match value.get("replication") {
            Some(inner) => serde_yaml::from_value(inner.clone())?,
            None if value.is_null() => ReplicationConfig::default(),
            None => serde_yaml::from_value(value)?,
        };
        validation::validate_replication(&settings)?;
        Ok(settings)
    }

    /// Validate the replication settings.
    pub fn validate(&self) -> Result<()> {
        validation::validate_replication(self)
    }
}
