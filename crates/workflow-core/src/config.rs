//! Configuration management for the approval engine

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Placeholder replaced by the workflow type name in the default title
pub const TYPE_NAME_PLACEHOLDER: &str = "{type_name}";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub database: DatabaseConfig,

    #[serde(default)]
    pub engine: EngineOptions,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// sqlx connection string, e.g. `sqlite://workflow.db?mode=rwc`
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Create missing tables on startup
    #[serde(default = "default_auto_migrate")]
    pub auto_migrate: bool,
}

/// Options consulted by the engine at runtime
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineOptions {
    /// Title used when the initiator supplies none
    #[serde(default = "default_title")]
    pub default_title: String,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            default_title: default_title(),
        }
    }
}

impl EngineOptions {
    pub fn render_title(&self, type_name: &str) -> String {
        self.default_title.replace(TYPE_NAME_PLACEHOLDER, type_name)
    }
}

// Default functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_auto_migrate() -> bool {
    true
}

fn default_title() -> String {
    format!("工作流[{}]审批", TYPE_NAME_PLACEHOLDER)
}

impl EngineConfig {
    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_json_str(&content)
    }

    /// Load configuration from a JSON string
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load a JSON file and apply `WORKFLOW__SECTION__KEY` environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let settings = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Json))
            .add_source(
                config::Environment::with_prefix("WORKFLOW")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| EngineError::Config(format!("Failed to load {}: {}", path.display(), e)))?;

        let config: Self = settings
            .try_deserialize()
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.database.url.trim().is_empty() {
            return Err(EngineError::Config("Database URL is required".to_string()));
        }

        if self.database.max_connections == 0 {
            return Err(EngineError::Config(
                "database.max_connections must be at least 1".to_string(),
            ));
        }

        if !self.engine.default_title.contains(TYPE_NAME_PLACEHOLDER) {
            return Err(EngineError::Config(format!(
                "engine.default_title must contain {}",
                TYPE_NAME_PLACEHOLDER
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_default_title() {
        let options = EngineOptions::default();
        assert_eq!(options.render_title("请假"), "工作流[请假]审批");
    }

    #[test]
    fn test_defaults_applied() {
        let config =
            EngineConfig::from_json_str(r#"{"database": {"url": "sqlite::memory:"}}"#).unwrap();
        assert_eq!(config.database.max_connections, 5);
        assert!(config.database.auto_migrate);
        assert_eq!(config.engine, EngineOptions::default());
        assert_eq!(config.log_level, "info");
    }
}
