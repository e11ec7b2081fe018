//! Configuration module for dues-service.

use crate::ledger::{normalize_currency, EligibilityPolicy};
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DuesConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub storage: StorageConfig,
    pub ledger: LedgerConfig,
}

#[derive(Debug, Clone)]
pub enum StorageConfig {
    Postgres(DatabaseConfig),
    Memory,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub base_currency: String,
    pub include_pending_members: bool,
    pub include_prospect_members: bool,
    /// Zero disables the periodic sweep.
    pub sweep_interval_secs: u64,
}

impl LedgerConfig {
    pub fn eligibility(&self) -> EligibilityPolicy {
        EligibilityPolicy {
            include_pending: self.include_pending_members,
            include_prospect: self.include_prospect_members,
        }
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            base_currency: "GHS".to_string(),
            include_pending_members: false,
            include_prospect_members: false,
            sweep_interval_secs: 0,
        }
    }
}

fn env_flag(name: &str) -> bool {
    env::var(name)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

impl DuesConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        let storage = match env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "postgres".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "memory" => StorageConfig::Memory,
            "postgres" => StorageConfig::Postgres(DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
                })?,
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
                min_connections: env::var("DATABASE_MIN_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2),
            }),
            other => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Unknown STORAGE_BACKEND '{}': expected postgres or memory",
                    other
                )))
            }
        };

        let base_currency = env::var("LEDGER_BASE_CURRENCY").unwrap_or_else(|_| "GHS".to_string());
        let base_currency = normalize_currency(&base_currency).map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!("LEDGER_BASE_CURRENCY: {}", e))
        })?;

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME").unwrap_or_else(|_| "dues-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            storage,
            ledger: LedgerConfig {
                base_currency,
                include_pending_members: env_flag("ASSESS_INCLUDE_PENDING_MEMBERS"),
                include_prospect_members: env_flag("ASSESS_INCLUDE_PROSPECT_MEMBERS"),
                sweep_interval_secs: env::var("SWEEP_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0),
            },
        })
    }
}
