//! Configuration management for Quotagate.

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use crate::error::{QuotagateError, Result};
use crate::ratelimit::{CustomRuleConfig, CustomRuleSet, LimitPolicy, TierPolicyTable};

/// Prefix for environment overrides, e.g. `QUOTAGATE__SERVER__HTTP_ADDR`.
pub const ENV_PREFIX: &str = "QUOTAGATE";

/// Main configuration for the Quotagate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuotagateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Admission control configuration
    #[serde(default)]
    pub admission: AdmissionConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, 8080))
}

/// Admission control configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Cool-down applied when a tenant exceeds its tier quota, in seconds
    #[serde(default = "default_block_duration")]
    pub block_duration_secs: u64,

    /// How often the sweeper evicts expired counters, in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Burst protection settings
    #[serde(default)]
    pub burst: BurstConfig,

    /// Replacement for the built-in tier policy table
    #[serde(default)]
    pub tiers: Option<TierPolicyTable>,

    /// Ordered custom rules, checked before tier policies
    #[serde(default)]
    pub custom_rules: Vec<CustomRuleConfig>,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            block_duration_secs: default_block_duration(),
            sweep_interval_secs: default_sweep_interval(),
            burst: BurstConfig::default(),
            tiers: None,
            custom_rules: Vec::new(),
        }
    }
}

impl AdmissionConfig {
    pub fn block_duration(&self) -> Duration {
        Duration::from_secs(self.block_duration_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Check burst settings, tier overrides and custom rules.
    pub fn validate(&self) -> Result<()> {
        if self.burst.enabled {
            LimitPolicy::new(self.burst.max_requests, self.burst.window()).validate("burst")?;
        }
        if let Some(tiers) = &self.tiers {
            tiers.validate()?;
        }
        CustomRuleSet::compile(&self.custom_rules)?;
        Ok(())
    }
}

fn default_block_duration() -> u64 {
    300
}

fn default_sweep_interval() -> u64 {
    300
}

/// Burst protection configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurstConfig {
    /// Whether the burst pre-check runs at all
    #[serde(default = "default_burst_enabled")]
    pub enabled: bool,

    /// Requests allowed inside one burst window
    #[serde(default = "default_burst_max_requests")]
    pub max_requests: u64,

    /// Burst window length in milliseconds
    #[serde(default = "default_burst_window_ms")]
    pub window_ms: u64,

    /// How long a bursting tenant is blocked, in seconds
    #[serde(default = "default_burst_block_secs")]
    pub block_secs: u64,
}

impl Default for BurstConfig {
    fn default() -> Self {
        Self {
            enabled: default_burst_enabled(),
            max_requests: default_burst_max_requests(),
            window_ms: default_burst_window_ms(),
            block_secs: default_burst_block_secs(),
        }
    }
}

impl BurstConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn block_duration(&self) -> Duration {
        Duration::from_secs(self.block_secs)
    }
}

fn default_burst_enabled() -> bool {
    true
}

fn default_burst_max_requests() -> u64 {
    50
}

fn default_burst_window_ms() -> u64 {
    1000
}

fn default_burst_block_secs() -> u64 {
    60
}

impl QuotagateConfig {
    /// Load configuration from a YAML file, without environment overrides.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self =
            serde_yaml::from_str(yaml).map_err(|e| QuotagateError::Config(e.to_string()))?;
        config.admission.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional YAML file layered under environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            if !path.exists() {
                return Err(QuotagateError::Config(format!(
                    "configuration file not found: {}",
                    path.display()
                )));
            }
            builder = builder.add_source(File::from(path).format(FileFormat::Yaml));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.admission.validate()?;
        Ok(config)
    }
}
