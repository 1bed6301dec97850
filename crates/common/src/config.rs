//! Application configuration.

use serde::Deserialize;
use std::path::Path;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Redis configuration.
    pub redis: RedisConfig,
    /// Authentication configuration.
    pub auth: AuthConfig,
    /// Chat configuration.
    #[serde(default)]
    pub chat: ChatConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind to.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Database connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// `PostgreSQL` connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Redis configuration for the group broadcast transport.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL.
    pub url: String,
    /// Key prefix for all broadcast channels.
    #[serde(default = "default_redis_prefix")]
    pub prefix: String,
}

/// Authentication configuration.
///
/// Token issuance lives in the account subsystem; this server only
/// needs the shared secret to verify credentials it is handed.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// HS256 secret shared with the account subsystem.
    pub jwt_secret: String,
}

/// Chat behavior configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    /// Maximum message content length in characters.
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,
    /// History page size for the pull-based message endpoint.
    #[serde(default = "default_history_page_size")]
    pub history_page_size: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_message_length: default_max_message_length(),
            history_page_size: default_history_page_size(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    3000
}

const fn default_max_connections() -> u32 {
    100
}

const fn default_min_connections() -> u32 {
    5
}

fn default_redis_prefix() -> String {
    "kaiwa".to_string()
}

const fn default_max_message_length() -> usize {
    20_000
}

const fn default_history_page_size() -> u64 {
    20
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `config/default.toml`
    /// 2. `config/{environment}.toml` (based on `KAIWA_ENV`)
    /// 3. Environment variables with `KAIWA_` prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let env = std::env::var("KAIWA_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("KAIWA")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("KAIWA")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_config_defaults() {
        let chat = ChatConfig::default();
        assert_eq!(chat.max_message_length, 20_000);
        assert_eq!(chat.history_page_size, 20);
    }
}
