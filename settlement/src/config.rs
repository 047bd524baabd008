//! Configuration for the settlement orchestrator

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Settlement configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Ledger configuration
    pub ledger: revenue_ledger::Config,

    /// Orchestrator configuration
    pub orchestrator: OrchestratorConfig,

    /// JSON manifest of orders and split rules
    pub order_manifest: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "revenue-settlement".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            ledger: revenue_ledger::Config::default(),
            orchestrator: OrchestratorConfig::default(),
            order_manifest: None,
        }
    }
}

/// Orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Orders of one event settled concurrently
    pub max_concurrent_orders: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_orders: 16,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Override fields from environment variables
    pub fn apply_env(&mut self) -> crate::Result<()> {
        self.ledger.apply_env()?;

        if let Ok(dir) = std::env::var("SETTLEMENT_LEDGER_DIR") {
            self.ledger.data_dir = PathBuf::from(dir);
        }

        if let Ok(limit) = std::env::var("SETTLEMENT_MAX_CONCURRENCY") {
            self.orchestrator.max_concurrent_orders = limit.parse().map_err(|e| {
                crate::Error::Config(format!("Invalid SETTLEMENT_MAX_CONCURRENCY '{}': {}", limit, e))
            })?;
        }

        if let Ok(path) = std::env::var("SETTLEMENT_ORDER_MANIFEST") {
            self.order_manifest = Some(PathBuf::from(path));
        }

        self.validate()
    }

    /// Reject values the orchestrator cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.orchestrator.max_concurrent_orders == 0 {
            return Err(crate::Error::Config(
                "orchestrator.max_concurrent_orders must be at least 1".to_string(),
            ));
        }
        self.ledger.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service_name, "revenue-settlement");
        assert_eq!(config.orchestrator.max_concurrent_orders, 16);
        assert!(config.order_manifest.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_nested_toml() {
        let config: Config = toml::from_str(
            r#"
            order_manifest = "orders.json"

            [ledger]
            data_dir = "/tmp/ledger"

            [orchestrator]
            max_concurrent_orders = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.ledger.data_dir, PathBuf::from("/tmp/ledger"));
        assert_eq!(config.ledger.writer.mailbox_capacity, 1000);
        assert_eq!(config.orchestrator.max_concurrent_orders, 4);
        assert_eq!(config.order_manifest, Some(PathBuf::from("orders.json")));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut config = Config::default();
        config.orchestrator.max_concurrent_orders = 0;
        assert!(matches!(config.validate(), Err(crate::Error::Config(_))));
    }
}
