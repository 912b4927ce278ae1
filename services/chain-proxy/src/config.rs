use config::{ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use sync_core::SyncConfig;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub chain: ChainConfig,
    pub gateway: GatewayConfig,
    pub downstream: DownstreamConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    pub run_migrations: bool,
}

/// Where contract events come from
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Poll the chain RPC gateway
    Http,
    /// Scripted source with no records, for local runs
    Mock,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChainConfig {
    pub source: SourceKind,
    pub rpc_url: String,
    /// Chain id stamped on baseline rows
    pub chain_id: String,
    pub page_limit: u32,
    pub poll_interval_ms: u64,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GatewayConfig {
    pub url: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DownstreamConfig {
    pub url: String,
    pub request_timeout_ms: u64,
}

impl ChainConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl GatewayConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl DownstreamConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let mut builder = config::Config::builder()
            // Start with default configuration
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 10086)?
            .set_default("server.workers", 2)?
            .set_default("database.url", "")?
            .set_default("database.max_connections", 10)?
            .set_default("database.acquire_timeout_secs", 5)?
            .set_default("database.run_migrations", true)?
            .set_default("chain.source", "http")?
            .set_default("chain.rpc_url", "http://127.0.0.1:30005")?
            .set_default("chain.chain_id", "carbon_puhui_chain_v1")?
            .set_default("chain.page_limit", 100)?
            .set_default("chain.poll_interval_ms", 3000)?
            .set_default("chain.request_timeout_secs", 30)?
            .set_default("gateway.url", "http://127.0.0.1:30004/carbonIntegral")?
            .set_default("gateway.request_timeout_secs", 120)?
            .set_default("downstream.url", "")?
            .set_default("downstream.request_timeout_ms", 2000)?;

        // Add environment-specific config file if it exists
        if let Ok(config_file) = env::var("CONFIG_FILE") {
            builder = builder.add_source(File::with_name(&config_file).required(false));
        } else {
            builder = builder.add_source(
                File::with_name(&format!("config/{}", environment)).required(false),
            );
        }

        // Override with environment variables
        builder = builder.add_source(
            Environment::with_prefix("CHAIN_PROXY")
                .separator("__")
                .list_separator(","),
        );

        // Special handling for common env vars
        if let Ok(db_url) = env::var("DATABASE_URL") {
            builder = builder.set_override("database.url", db_url)?;
        }

        if let Ok(rpc_url) = env::var("CHAIN_RPC_URL") {
            builder = builder.set_override("chain.rpc_url", rpc_url)?;
        }

        if let Ok(downstream_url) = env::var("DOWNSTREAM_URL") {
            builder = builder.set_override("downstream.url", downstream_url)?;
        }

        if let Ok(gateway_url) = env::var("GATEWAY_URL") {
            builder = builder.set_override("gateway.url", gateway_url)?;
        }

        if let Ok(port) = env::var("CHAIN_PROXY_PORT") {
            builder = builder.set_override("server.port", port)?;
        }

        builder.build()?.try_deserialize()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("Server port cannot be 0".to_string());
        }

        if self.database.url.is_empty() {
            return Err("Database URL is required".to_string());
        }

        if self.chain.source == SourceKind::Http && self.chain.rpc_url.is_empty() {
            return Err("Chain RPC URL is required for the http source".to_string());
        }

        if self.chain.page_limit == 0 {
            return Err("Chain page limit cannot be 0".to_string());
        }

        if self.chain.poll_interval_ms == 0 {
            return Err("Chain poll interval cannot be 0".to_string());
        }

        if self.gateway.url.is_empty() {
            return Err("Gateway URL is required".to_string());
        }

        if self.downstream.url.is_empty() {
            return Err("Downstream URL is required".to_string());
        }

        self.sync.validate().map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Config {
        Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 10086,
                workers: 2,
            },
            database: DatabaseConfig {
                url: "postgres://localhost/chain_proxy".to_string(),
                max_connections: 10,
                acquire_timeout_secs: 5,
                run_migrations: true,
            },
            chain: ChainConfig {
                source: SourceKind::Http,
                rpc_url: "http://127.0.0.1:30005".to_string(),
                chain_id: "chain1".to_string(),
                page_limit: 100,
                poll_interval_ms: 3000,
                request_timeout_secs: 30,
            },
            gateway: GatewayConfig {
                url: "http://127.0.0.1:30004/carbonIntegral".to_string(),
                request_timeout_secs: 120,
            },
            downstream: DownstreamConfig {
                url: "http://127.0.0.1:30006/sync".to_string(),
                request_timeout_ms: 2000,
            },
            sync: SyncConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_missing_downstream_rejected() {
        let mut config = valid();
        config.downstream.url.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mock_source_needs_no_rpc_url() {
        let mut config = valid();
        config.chain.source = SourceKind::Mock;
        config.chain.rpc_url.clear();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_sync_section_rejected() {
        let mut config = valid();
        config.sync.retry.failed_threshold = 9;
        let err = config.validate().unwrap_err();
        assert!(err.contains("failed_threshold"));
    }
}
