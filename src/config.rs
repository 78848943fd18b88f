//! Configuration management for the Ownly core services
//!
//! Precedence, lowest first: built-in defaults, an optional TOML file, then
//! `OWNLY__SECTION__KEY` environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;
use validator::Validate;

use crate::core::{CoreError, CoreResult};
use crate::events::EventKind;

/// Environment variable prefix; nested keys are separated by `__`
pub const ENV_PREFIX: &str = "OWNLY";

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct OwnlyConfig {
    #[validate]
    pub performance: PerformanceConfig,
    #[validate]
    pub listener: ListenerConfig,
    #[validate]
    pub api: ApiConfig,
    #[validate]
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PerformanceConfig {
    pub enabled: bool,
    #[validate(range(min = 0.0, max = 1.0))]
    pub sample_rate: f64,
    #[validate(range(min = 1, max = 365))]
    pub retention_days: u32,
    pub thresholds: ThresholdsConfig,
    #[validate]
    pub storage: MetricStorageConfig,
}

/// Warning and critical levels for one submetric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub warning: f64,
    pub critical: f64,
}

impl Threshold {
    pub const fn new(warning: f64, critical: f64) -> Self {
        Self { warning, critical }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThresholdsConfig {
    pub api: ApiThresholds,
    pub events: EventThresholds,
    pub blockchain: BlockchainThresholds,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiThresholds {
    /// Milliseconds
    pub response_time: Threshold,
    /// Share of responses with status >= 400 over the trailing five minutes
    pub error_rate: Threshold,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventThresholds {
    pub processing_time: Threshold,
    pub queue_size: Threshold,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockchainThresholds {
    pub query_time: Threshold,
    pub transaction_time: Threshold,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct MetricStorageConfig {
    #[validate(range(min = 1, max = 1000000))]
    pub max_memory_entries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ListenerConfig {
    #[validate(url)]
    pub access_node: String,
    /// Account holding the Collectible contract
    pub collectible_address: String,
    /// Account holding NFTStorefrontV2
    pub storefront_address: String,
    #[validate(range(min = 100, max = 60000))]
    pub poll_interval_ms: u64,
    /// Kinds piped into the event queue at startup
    pub events: Vec<EventKind>,
    #[validate]
    pub reconnect: ReconnectSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ReconnectSettings {
    #[validate(range(max = 100))]
    pub max_retries: u32,
    #[validate(range(min = 1, max = 60000))]
    pub base_delay_ms: u64,
    #[validate(range(min = 1, max = 600000))]
    pub max_delay_ms: u64,
    #[validate(range(min = 1.0, max = 10.0))]
    pub multiplier: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ApiConfig {
    pub bind_address: String,
    pub enable_cors: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct MonitoringConfig {
    pub log_level: String,
    pub structured_logging: bool,
    #[validate(range(min = 1, max = 86400))]
    pub cleanup_interval_secs: u64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_rate: 1.0,
            retention_days: 7,
            thresholds: ThresholdsConfig::default(),
            storage: MetricStorageConfig::default(),
        }
    }
}

impl Default for ApiThresholds {
    fn default() -> Self {
        Self {
            response_time: Threshold::new(1000.0, 3000.0),
            error_rate: Threshold::new(0.05, 0.1),
        }
    }
}

impl Default for EventThresholds {
    fn default() -> Self {
        Self {
            processing_time: Threshold::new(500.0, 2000.0),
            queue_size: Threshold::new(100.0, 500.0),
        }
    }
}

impl Default for BlockchainThresholds {
    fn default() -> Self {
        Self {
            query_time: Threshold::new(2000.0, 5000.0),
            transaction_time: Threshold::new(10000.0, 30000.0),
        }
    }
}

impl Default for MetricStorageConfig {
    fn default() -> Self {
        Self {
            max_memory_entries: 10000,
        }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            access_node: "https://rest-testnet.onflow.org".to_string(),
            collectible_address: "0x2d2750f240198f91".to_string(),
            storefront_address: "0x2d55b98eb200daef".to_string(),
            poll_interval_ms: 2000,
            events: EventKind::ALL.to_vec(),
            reconnect: ReconnectSettings::default(),
        }
    }
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 1000,
            max_delay_ms: 30000,
            multiplier: 2.0,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".to_string(),
            enable_cors: true,
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            structured_logging: false,
            cleanup_interval_secs: 3600,
        }
    }
}

impl ThresholdsConfig {
    fn all(&self) -> [(&'static str, Threshold); 6] {
        [
            ("api.response_time", self.api.response_time),
            ("api.error_rate", self.api.error_rate),
            ("events.processing_time", self.events.processing_time),
            ("events.queue_size", self.events.queue_size),
            ("blockchain.query_time", self.blockchain.query_time),
            ("blockchain.transaction_time", self.blockchain.transaction_time),
        ]
    }
}

impl OwnlyConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| CoreError::Configuration(format!("{}: {}", path.as_ref().display(), e)))?;
        let config: Self = toml::from_str(&content).map_err(|e| CoreError::Configuration(e.to_string()))?;

        config.check()?;

        Ok(config)
    }

    /// Layer defaults, an optional TOML file and `OWNLY__*` environment
    /// variables
    pub fn load(path: Option<&Path>) -> CoreResult<Self> {
        let defaults = Self::default();
        let mut builder = config::Config::builder().add_source(config::Config::try_from(&defaults)?);

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .required(true)
                    .format(config::FileFormat::Toml),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.check()?;

        Ok(config)
    }

    /// Field ranges plus the cross-field threshold ordering
    pub fn check(&self) -> CoreResult<()> {
        Validate::validate(self)?;

        for (name, threshold) in self.performance.thresholds.all() {
            if threshold.warning >= threshold.critical {
                return Err(CoreError::Configuration(format!(
                    "threshold {}: warning ({}) must be below critical ({})",
                    name, threshold.warning, threshold.critical
                )));
            }
        }

        if self.listener.reconnect.base_delay_ms > self.listener.reconnect.max_delay_ms {
            return Err(CoreError::Configuration(
                "listener.reconnect: base_delay_ms exceeds max_delay_ms".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = OwnlyConfig::default();
        assert!(config.check().is_ok());
        assert_eq!(config.performance.storage.max_memory_entries, 10000);
        assert_eq!(config.listener.reconnect.max_retries, 5);
        assert_eq!(config.listener.events.len(), 5);
    }

    #[test]
    fn test_from_file_overrides_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let mut config = OwnlyConfig::default();
        config.performance.sample_rate = 0.25;
        config.api.bind_address = "0.0.0.0:9000".to_string();
        write!(file, "{}", toml::to_string(&config).unwrap()).unwrap();

        let loaded = OwnlyConfig::from_file(file.path()).unwrap();
        assert_eq!(loaded.performance.sample_rate, 0.25);
        assert_eq!(loaded.api.bind_address, "0.0.0.0:9000");
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let mut config = OwnlyConfig::default();
        config.performance.thresholds.api.response_time = Threshold::new(5000.0, 3000.0);

        match config.check() {
            Err(CoreError::Configuration(message)) => assert!(message.contains("api.response_time")),
            other => panic!("expected configuration error, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_out_of_range_sample_rate() {
        let mut config = OwnlyConfig::default();
        config.performance.sample_rate = 1.5;
        assert!(config.check().is_err());
    }

    #[test]
    fn test_load_without_file_returns_defaults() {
        let config = OwnlyConfig::load(None).unwrap();
        assert_eq!(config.performance.retention_days, 7);
        assert_eq!(config.monitoring.cleanup_interval_secs, 3600);
    }
}
