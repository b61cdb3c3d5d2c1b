//! Probe configuration.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use strata_gpu::QueryPoolSizes;

/// Settings read from a TOML file. Every field is optional.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub app_name: String,
    pub validation: bool,
    /// Timestamp round trips to measure.
    pub iterations: u32,
    pub query_pool_sizes: QueryPoolSizes,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            app_name: "strata-probe".to_string(),
            validation: cfg!(debug_assertions),
            iterations: 3,
            query_pool_sizes: QueryPoolSizes::default(),
        }
    }
}

impl ProbeConfig {
    /// Load from `path`, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            tracing::debug!("No config file given, using defaults");
            return Ok(Self::default());
        };

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        tracing::info!("Loaded configuration from {}", path.display());
        tracing::debug!("Config: {:?}", config);
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let config = ProbeConfig::parse(
            r#"
            iterations = 10

            [query_pool_sizes]
            timestamp = 32
            pipeline_statistics = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.iterations, 10);
        assert_eq!(config.app_name, "strata-probe");
        assert_eq!(config.query_pool_sizes.timestamp, 32);
        assert_eq!(config.query_pool_sizes.pipeline_statistics, 0);
        assert_eq!(config.query_pool_sizes.duration, 256);
    }

    #[test]
    fn unknown_types_are_rejected() {
        assert!(ProbeConfig::parse("iterations = \"many\"").is_err());
    }

    #[test]
    fn no_path_gives_defaults() {
        let config = ProbeConfig::load(None).unwrap();
        assert_eq!(config.iterations, 3);
    }
}
