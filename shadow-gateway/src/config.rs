// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use thrift_shadow::{ProtocolType, TransportType};

use crate::pool::PoolTimeouts;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment: {0}")]
    Env(#[from] envy::Error),
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Configuration loaded from environment variables.
///
/// All configuration is externalized to support 12-factor app deployment.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Admin server host (default: 0.0.0.0)
    #[serde(default = "default_admin_host")]
    pub admin_host: String,

    /// Admin server port for health and metrics (default: 9901)
    #[serde(default = "default_admin_port")]
    pub admin_port: u16,

    /// Address the tap listens on for downstream Thrift traffic
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Cluster that receives the mirrored requests (default: shadow)
    #[serde(default = "default_shadow_cluster")]
    pub shadow_cluster: String,

    /// YAML file describing the upstream clusters
    #[serde(default = "default_clusters_file")]
    pub clusters_file: String,

    /// Thrift transport: "framed" or "unframed" (default: framed)
    #[serde(default = "default_transport")]
    pub transport: String,

    /// Thrift protocol (default: binary)
    #[serde(default = "default_protocol")]
    pub protocol: String,

    /// Prefix of the shadow counters (default: thrift)
    #[serde(default = "default_stat_prefix")]
    pub stat_prefix: String,

    /// Upstream connect timeout in milliseconds (default: 1000)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Time a leased upstream connection may wait for its response, in
    /// milliseconds (default: 5000)
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,

    /// Log level (default: info)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format: "json" or "pretty" (default: json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_admin_host() -> String {
    "0.0.0.0".to_string()
}

fn default_admin_port() -> u16 {
    9901
}

fn default_listen_addr() -> String {
    "0.0.0.0:9090".to_string()
}

fn default_shadow_cluster() -> String {
    "shadow".to_string()
}

fn default_clusters_file() -> String {
    "clusters.yaml".to_string()
}

fn default_transport() -> String {
    "framed".to_string()
}

fn default_protocol() -> String {
    "binary".to_string()
}

fn default_stat_prefix() -> String {
    "thrift".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    1000
}

fn default_response_timeout_ms() -> u64 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Environment variables are uppercase with underscore separators.
    /// Example: `SHADOW_CLUSTER`, `LOG_LEVEL`, etc.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config: Self = envy::from_env()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.transport_type()?;
        self.protocol_type()?;
        self.listen_addr()?;
        if self.shadow_cluster.is_empty() {
            return Err(ConfigError::Invalid {
                field: "shadow_cluster",
                reason: "must not be empty".to_string(),
            });
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "connect_timeout_ms",
                reason: "must be positive".to_string(),
            });
        }
        if self.response_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "response_timeout_ms",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    pub fn transport_type(&self) -> Result<TransportType, ConfigError> {
        self.transport.parse().map_err(|e| ConfigError::Invalid {
            field: "transport",
            reason: format!("{}", e),
        })
    }

    pub fn protocol_type(&self) -> Result<ProtocolType, ConfigError> {
        self.protocol.parse().map_err(|e| ConfigError::Invalid {
            field: "protocol",
            reason: format!("{}", e),
        })
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listen_addr.parse().map_err(|e| ConfigError::Invalid {
            field: "listen_addr",
            reason: format!("{}", e),
        })
    }

    pub fn admin_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.admin_host, self.admin_port)
            .parse()
            .map_err(|e| ConfigError::Invalid {
                field: "admin_host",
                reason: format!("{}", e),
            })
    }

    pub fn pool_timeouts(&self) -> PoolTimeouts {
        PoolTimeouts {
            connect: Duration::from_millis(self.connect_timeout_ms),
            response: Duration::from_millis(self.response_timeout_ms),
        }
    }
}
