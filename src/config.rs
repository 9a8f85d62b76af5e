use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::escrow::fee::DEFAULT_SERVICE_FEE_RATE;
use crate::store::RetryPolicy;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    /// Emit per-write debug events from the record store
    #[serde(default)]
    pub trace_store_io: bool,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub escrow: EscrowConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub verification: VerificationConfig,
}

/// Record store file and I/O tuning
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    /// `list_all` cache lifetime; 0 disables the cache
    pub cache_ttl_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/escrow.json"),
            retry_attempts: 3,
            retry_delay_ms: 500,
            cache_ttl_secs: 30,
        }
    }
}

impl StoreConfig {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retry_attempts,
            delay: Duration::from_millis(self.retry_delay_ms),
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Escrow lifecycle policy
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct EscrowConfig {
    /// Platform fee rate applied once at creation (0.02 = 2%)
    pub service_fee_rate: Decimal,
    /// Limit disputes to FUNDED / DELIVERED transactions
    pub restrict_disputes: bool,
    /// Payment method whose completion triggers a gateway capture
    pub gateway_payment_method: String,
    /// Lifetime recorded on a new authorization
    pub authorization_ttl_hours: i64,
}

impl Default for EscrowConfig {
    fn default() -> Self {
        Self {
            service_fee_rate: DEFAULT_SERVICE_FEE_RATE,
            restrict_disputes: false,
            gateway_payment_method: "mobile_wallet".to_string(),
            authorization_ttl_hours: 24,
        }
    }
}

/// Tokenized checkout gateway credentials
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct GatewayConfig {
    pub base_url: String,
    pub app_key: String,
    pub app_secret: String,
    pub username: String,
    pub password: String,
    pub currency: String,
    pub callback_url: String,
    pub timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:9090/tokenized".to_string(),
            app_key: String::new(),
            app_secret: String::new(),
            username: String::new(),
            password: String::new(),
            currency: "BDT".to_string(),
            callback_url: "http://127.0.0.1:8080/payments/callback".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Phone verification codes
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct VerificationConfig {
    pub code_ttl_secs: i64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self { code_ttl_secs: 300 }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: "./logs".to_string(),
            log_file: "escrow.log".to_string(),
            use_json: false,
            rotation: "daily".to_string(),
            trace_store_io: false,
            store: StoreConfig::default(),
            escrow: EscrowConfig::default(),
            gateway: GatewayConfig::default(),
            verification: VerificationConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load `config/<env>.yaml`
    pub fn load(env: &str) -> Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse {}", config_path))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }
}
