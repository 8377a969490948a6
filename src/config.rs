//! This module holds the configuration for the server

use std::net::IpAddr;

use actix_toolbox::logging::LoggingConfig;
use serde::{Deserialize, Serialize};

/// Configuration regarding the server
#[derive(Deserialize, Serialize, Debug)]
#[serde(rename_all = "PascalCase")]
pub struct ServerConfig {
    /// The address the server should bind to
    pub listen_address: IpAddr,
    /// The port the server should bind to
    pub listen_port: u16,
}

/// Configuration regarding the database
#[derive(Deserialize, Serialize, Debug)]
#[serde(rename_all = "PascalCase")]
pub struct DBConfig {
    /// Host the database is running on
    pub host: String,
    /// Port the database is running on
    pub port: u16,
    /// Name of the database
    pub name: String,
    /// User to connect with
    pub user: String,
    /// Password to connect with
    pub password: String,
}

/// Configuration regarding the relationship cache and message queues
#[derive(Deserialize, Serialize, Debug)]
#[serde(rename_all = "PascalCase")]
pub struct CacheConfig {
    /// Connection url of the redis instance, e.g. `redis://127.0.0.1:6379/0`
    pub url: String,
    /// TTL (in seconds) for cached relationship lists.
    ///
    /// Defaults to 7 days.
    #[serde(default = "default_relation_ttl")]
    pub relation_ttl: u64,
    /// TTL (in seconds) for derived views such as membership sets.
    ///
    /// Defaults to 1 day.
    #[serde(default = "default_derived_ttl")]
    pub derived_ttl: u64,
    /// TTL (in seconds) for presence and routing entries
    #[serde(default = "default_presence_ttl")]
    pub presence_ttl: u64,
}

/// Configuration regarding the message dispatcher
#[derive(Deserialize, Serialize, Debug)]
#[serde(rename_all = "PascalCase")]
pub struct DispatchConfig {
    /// Name of the routing queue this node consumes.
    ///
    /// Connections opened on this node are registered with this address.
    pub node_address: String,
    /// Maximum number of presence polls before a drain gives up
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay between presence polls in milliseconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

/// Configuration regarding pending request retention
#[derive(Deserialize, Serialize, Debug)]
#[serde(rename_all = "PascalCase")]
pub struct RetentionConfig {
    /// Days a pending request stays valid before the sweeper deletes it
    #[serde(default = "default_retention_days")]
    pub window_days: u32,
    /// Seconds between two sweeper runs
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: u64,
}

fn default_relation_ttl() -> u64 {
    7 * 24 * 60 * 60
}

fn default_derived_ttl() -> u64 {
    24 * 60 * 60
}

fn default_presence_ttl() -> u64 {
    24 * 60 * 60
}

fn default_max_retries() -> u32 {
    10
}

fn default_retry_delay() -> u64 {
    100
}

fn default_retention_days() -> u32 {
    7
}

fn default_sweep_interval() -> u64 {
    60 * 60
}

/// This struct can be parsed from the configuration file
#[derive(Deserialize, Serialize, Debug)]
#[serde(rename_all = "PascalCase")]
pub struct Config {
    /// Configuration regarding the server
    pub server: ServerConfig,
    /// Configuration regarding the database
    pub database: DBConfig,
    /// Configuration regarding the cache
    pub cache: CacheConfig,
    /// Configuration regarding the message dispatcher
    pub dispatch: DispatchConfig,
    /// Configuration regarding pending request retention
    pub retention: RetentionConfig,
    /// The logging configuration
    pub logging: LoggingConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_applied() {
        let cache: CacheConfig = toml::from_str(r#"Url = "redis://127.0.0.1:6379/0""#).unwrap();
        assert_eq!(cache.relation_ttl, 7 * 24 * 60 * 60);
        assert_eq!(cache.derived_ttl, 24 * 60 * 60);

        let dispatch: DispatchConfig = toml::from_str(r#"NodeAddress = "node-1""#).unwrap();
        assert_eq!(dispatch.max_retries, 10);
        assert_eq!(dispatch.retry_delay_ms, 100);

        let retention: RetentionConfig = toml::from_str("").unwrap();
        assert_eq!(retention.window_days, 7);
        assert_eq!(retention.sweep_interval, 60 * 60);
    }
}
