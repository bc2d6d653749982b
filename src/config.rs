use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use thiserror::Error;

use crate::catalog::CatalogError;
use crate::referral::ReferralConfig;
use crate::transaction::ReconcileConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config yaml: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    /// PostgreSQL connection URL; the in-memory store is used when absent
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub settlement: SettlementConfig,
    #[serde(default)]
    pub referral: ReferralSection,
    #[serde(default)]
    pub catalog_sync: CatalogSyncConfig,
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub max_connections: u32,
    pub acquire_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_connections: 20,
            acquire_timeout_ms: 5_000,
        }
    }
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SettlementConfig {
    /// Bound on each provider call before the outcome is UNKNOWN
    pub provider_timeout_ms: u64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            provider_timeout_ms: 15_000,
        }
    }
}

impl SettlementConfig {
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ReferralSection {
    pub withdrawal_threshold: Decimal,
}

impl Default for ReferralSection {
    fn default() -> Self {
        Self {
            withdrawal_threshold: Decimal::from(10_000),
        }
    }
}

impl ReferralSection {
    pub fn to_config(&self) -> ReferralConfig {
        ReferralConfig {
            withdrawal_threshold: self.withdrawal_threshold,
            ..Default::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CatalogSyncConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub page_size: u32,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_token: String,
    /// Bound on each catalog page request
    #[serde(default = "default_catalog_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_catalog_timeout_ms() -> u64 {
    30_000
}

impl Default for CatalogSyncConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 6 * 3600,
            page_size: 200,
            base_url: String::new(),
            api_token: String::new(),
            timeout_ms: default_catalog_timeout_ms(),
        }
    }
}

impl CatalogSyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ReconciliationConfig {
    pub scan_interval_secs: u64,
    pub stale_after_secs: u64,
    pub batch_size: usize,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: 60,
            stale_after_secs: 300,
            batch_size: 100,
        }
    }
}

impl ReconciliationConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn to_config(&self) -> ReconcileConfig {
        ReconcileConfig {
            stale_after: Duration::from_secs(self.stale_after_secs),
            batch_size: self.batch_size,
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path).map_err(|source| ConfigError::Read {
            path: config_path.clone(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "database.max_connections must be at least 1".into(),
            ));
        }
        if self.referral.withdrawal_threshold <= Decimal::ZERO {
            return Err(ConfigError::Invalid(
                "referral.withdrawal_threshold must be positive".into(),
            ));
        }
        // A PENDING saga must not be picked up while its provider call may still be in flight
        if Duration::from_secs(self.reconciliation.stale_after_secs)
            <= self.settlement.provider_timeout()
        {
            return Err(ConfigError::Invalid(
                "reconciliation.stale_after_secs must exceed settlement.provider_timeout_ms".into(),
            ));
        }
        if self.catalog_sync.enabled && self.catalog_sync.base_url.is_empty() {
            return Err(ConfigError::Invalid(
                "catalog_sync.base_url is required when catalog sync is enabled".into(),
            ));
        }
        if self.catalog_sync.timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "catalog_sync.timeout_ms must be positive".into(),
            ));
        }
        Ok(())
    }

    /// HTTP catalog source built from `catalog_sync`
    pub fn catalog_source(&self) -> Result<crate::catalog::HttpCatalogSource, CatalogError> {
        crate::catalog::HttpCatalogSource::new(
            &self.catalog_sync.base_url,
            &self.catalog_sync.api_token,
            self.catalog_sync.timeout(),
        )
    }
}
