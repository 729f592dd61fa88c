use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, ConfigError, File, FileFormat};
use serde::Deserialize;

use crate::models::{Address, TokenAmount};

pub const DEFAULT_CONTRACT_ADDRESS: &str = "0x6c1b12e35dca8863";

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    pub chain: ChainConfig,
    pub wallet: WalletConfig,
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub transfers: TransfersConfig,
    pub cache: CacheConfig,
}

impl ApiConfig {
    pub fn load() -> Result<Self> {
        let configured_path =
            std::env::var("FLOWTIP_API_CONFIG").unwrap_or_else(|_| "config/api.toml".to_string());
        assert!(
            !configured_path.is_empty(),
            "Configuration path must be non-empty"
        );
        assert!(
            configured_path.len() < 4096,
            "Configuration path length exceeds hard limit"
        );

        let mut builder = Config::builder()
            .add_source(File::new(&configured_path, FileFormat::Toml).required(true));

        if let Ok(env_override) = std::env::var("FLOWTIP_API_ENV") {
            if !env_override.is_empty() {
                let env_file = format!("config/api.{}.toml", env_override);
                if Path::new(&env_file).exists() {
                    builder = builder.add_source(File::new(&env_file, FileFormat::Toml));
                }
            }
        }

        let settings = builder
            .build()
            .map_err(|err| map_config_error(err, &configured_path))?;
        let config: Self = settings
            .try_deserialize()
            .context("Failed to deserialize API configuration")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        assert!(
            self.server.port > 0,
            "Server port must be greater than zero"
        );
        if let Some(database) = &self.database {
            assert!(!database.url.is_empty(), "Database URL must be specified");
            assert!(
                database.max_connections >= database.min_connections.unwrap_or(1),
                "Max connections must be >= min connections"
            );
        }
        self.chain.contract_address()?;
        self.controller.ensure_bounds()?;
        self.transfers.ensure_bounds()?;
        self.cache.ensure_bounds()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: Option<IpAddr>,
    pub port: u16,
}

impl ServerConfig {
    pub fn address(&self) -> SocketAddr {
        let host = self.host.unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert!(self.port != 0, "HTTP port cannot be zero");
        SocketAddr::new(host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub access_url: String,
    #[serde(default = "ChainConfig::default_contract_address")]
    pub contract_address: String,
    pub request_timeout_ms: Option<u64>,
}

impl ChainConfig {
    pub fn request_timeout(&self) -> Duration {
        request_timeout(self.request_timeout_ms)
    }

    pub fn contract_address(&self) -> Result<Address> {
        Address::parse(&self.contract_address)
            .with_context(|| format!("Invalid contract address {}", self.contract_address))
    }

    fn default_contract_address() -> String {
        DEFAULT_CONTRACT_ADDRESS.to_string()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    pub bridge_url: String,
    pub request_timeout_ms: Option<u64>,
    #[serde(default = "WalletConfig::default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl WalletConfig {
    pub fn request_timeout(&self) -> Duration {
        request_timeout(self.request_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        assert!(
            self.poll_interval_ms >= 100,
            "Poll interval must be >= 100ms"
        );
        assert!(
            self.poll_interval_ms <= 60_000,
            "Poll interval must be <= 60 seconds"
        );
        Duration::from_millis(self.poll_interval_ms)
    }

    const fn default_poll_interval_ms() -> u64 {
        2_000
    }
}

fn request_timeout(configured: Option<u64>) -> Duration {
    let millis = configured.unwrap_or(3_000);
    assert!(millis >= 100, "RPC timeout must be at least 100ms");
    assert!(millis <= 60_000, "RPC timeout cannot exceed 60 seconds");
    Duration::from_millis(millis)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub finality_timeout_secs: u64,
    pub finality_poll_interval_ms: u64,
    pub reclassify_attempts: u32,
    pub reclassify_backoff_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            finality_timeout_secs: 60,
            finality_poll_interval_ms: 1_000,
            reclassify_attempts: 3,
            reclassify_backoff_ms: 500,
        }
    }
}

impl ControllerConfig {
    pub fn finality_timeout(&self) -> Duration {
        Duration::from_secs(self.finality_timeout_secs)
    }

    pub fn finality_poll_interval(&self) -> Duration {
        Duration::from_millis(self.finality_poll_interval_ms)
    }

    pub fn reclassify_backoff(&self) -> Duration {
        Duration::from_millis(self.reclassify_backoff_ms)
    }

    fn ensure_bounds(&self) -> Result<()> {
        assert!(
            self.finality_timeout_secs > 0,
            "Finality timeout must be positive"
        );
        assert!(
            self.finality_timeout_secs <= 600,
            "Finality timeout cannot exceed ten minutes"
        );
        assert!(
            self.finality_poll_interval_ms >= 100,
            "Finality poll interval must be >= 100ms"
        );
        assert!(
            (1..=10).contains(&self.reclassify_attempts),
            "Re-classification attempts must be between 1 and 10"
        );
        assert!(
            self.reclassify_backoff_ms <= 10_000,
            "Re-classification backoff cannot exceed 10 seconds"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransfersConfig {
    pub tip_minimum: String,
    pub tip_maximum: String,
    pub withdraw_minimum: String,
    pub max_message_len: usize,
}

impl Default for TransfersConfig {
    fn default() -> Self {
        Self {
            tip_minimum: "0.1".to_string(),
            tip_maximum: "1000.0".to_string(),
            withdraw_minimum: "0.1".to_string(),
            max_message_len: 280,
        }
    }
}

impl TransfersConfig {
    pub fn tip_bounds(&self) -> Result<(TokenAmount, TokenAmount)> {
        let minimum = parse_bound("tip_minimum", &self.tip_minimum)?;
        let maximum = parse_bound("tip_maximum", &self.tip_maximum)?;
        Ok((minimum, maximum))
    }

    pub fn withdraw_minimum(&self) -> Result<TokenAmount> {
        parse_bound("withdraw_minimum", &self.withdraw_minimum)
    }

    fn ensure_bounds(&self) -> Result<()> {
        let (minimum, maximum) = self.tip_bounds()?;
        assert!(!minimum.is_zero(), "Tip minimum must be positive");
        assert!(minimum <= maximum, "Tip minimum must not exceed maximum");
        assert!(
            !self.withdraw_minimum()?.is_zero(),
            "Withdrawal minimum must be positive"
        );
        assert!(
            self.max_message_len <= 1_000,
            "Tip message limit exceeds defensive bound"
        );
        Ok(())
    }
}

fn parse_bound(name: &str, raw: &str) -> Result<TokenAmount> {
    raw.parse::<TokenAmount>()
        .with_context(|| format!("Invalid transfers.{name} value {raw:?}"))
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub creator_records_max_capacity: u64,
    pub creator_records_ttl_seconds: u64,
}

impl CacheConfig {
    fn ensure_bounds(&self) -> Result<()> {
        assert!(
            self.creator_records_max_capacity >= 100,
            "Creator record cache capacity must be at least 100"
        );
        assert!(
            self.creator_records_ttl_seconds <= 86_400,
            "Creator record cache TTL cannot exceed one day"
        );
        Ok(())
    }
}

fn map_config_error(err: ConfigError, path: &str) -> ConfigError {
    match err {
        ConfigError::NotFound(_) => ConfigError::NotFound(path.to_string()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> ApiConfig {
        Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .expect("config builds")
            .try_deserialize()
            .expect("config deserializes")
    }

    const MINIMAL: &str = r#"
        [server]
        port = 8080

        [chain]
        access_url = "http://127.0.0.1:8545"

        [wallet]
        bridge_url = "http://127.0.0.1:8701"

        [cache]
        creator_records_max_capacity = 1000
        creator_records_ttl_seconds = 30
    "#;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = parse(MINIMAL);
        config.validate().expect("defaults are valid");
        assert!(config.database.is_none());
        assert_eq!(config.chain.contract_address().unwrap().as_str(), DEFAULT_CONTRACT_ADDRESS);
        assert_eq!(config.controller.finality_timeout(), Duration::from_secs(60));
        assert_eq!(config.controller.reclassify_attempts, 3);
        let (minimum, maximum) = config.transfers.tip_bounds().unwrap();
        assert_eq!(minimum.to_string(), "0.10000000");
        assert_eq!(maximum.to_string(), "1000.00000000");
        assert_eq!(config.wallet.poll_interval(), Duration::from_secs(2));
        assert_eq!(config.chain.request_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn rejects_unparseable_transfer_bounds() {
        let mut config = parse(MINIMAL);
        config.transfers.tip_minimum = "-1".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    #[should_panic(expected = "Re-classification attempts")]
    fn rejects_zero_reclassify_attempts() {
        let mut config = parse(MINIMAL);
        config.controller.reclassify_attempts = 0;
        let _ = config.validate();
    }
}
