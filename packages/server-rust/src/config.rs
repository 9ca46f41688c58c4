//! Command-line and environment configuration for the `intelgate` binary.

use std::net::SocketAddr;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::bridge::BridgeConfig;
use crate::network::{NetworkConfig, DEFAULT_API_KEYS};
use crate::registry::RegistryConfig;

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// intelgate - investigation gateway and operation tracker
#[derive(Debug, Clone, Parser)]
#[command(name = "intelgate")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "HTTP gateway forwarding investigations to a downstream analysis service")]
pub struct GatewayArgs {
    /// Address to bind the HTTP server to
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// HTTP port
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Downstream service address (`tcp://host:port`)
    #[arg(long, env = "ORCHESTRA_ADDR", default_value = "tcp://127.0.0.1:5558")]
    pub orchestra_addr: String,

    /// Accepted API keys, comma separated; empty disables authentication
    #[arg(long, env = "API_KEYS", value_delimiter = ',', default_values = DEFAULT_API_KEYS)]
    pub api_keys: Vec<String>,

    /// Allowed CORS origins, comma separated
    #[arg(long, env = "CORS_ORIGINS", value_delimiter = ',', default_value = "*")]
    pub cors_origins: Vec<String>,

    /// Deadline for writing one request downstream
    #[arg(long, env = "SEND_TIMEOUT", default_value = "5s", value_parser = humantime::parse_duration)]
    pub send_timeout: Duration,

    /// Deadline for the downstream reply
    #[arg(long, env = "RECV_TIMEOUT", default_value = "30s", value_parser = humantime::parse_duration)]
    pub recv_timeout: Duration,

    /// Maximum duration of one HTTP request
    #[arg(long, env = "REQUEST_TIMEOUT", default_value = "60s", value_parser = humantime::parse_duration)]
    pub request_timeout: Duration,

    /// Age after which finished operations are pruned
    #[arg(long, env = "RETENTION_MAX_AGE", default_value = "720h", value_parser = humantime::parse_duration)]
    pub retention_max_age: Duration,

    /// How often the retention sweep runs; `0s` disables it
    #[arg(long, env = "RETENTION_INTERVAL", default_value = "1h", value_parser = humantime::parse_duration)]
    pub retention_interval: Duration,

    /// Multiplier for simulated stage delays
    #[arg(long, env = "STAGE_DELAY_SCALE", default_value_t = 1.0)]
    pub stage_delay_scale: f64,

    /// Serve Prometheus metrics on this address
    #[arg(long, env = "METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl GatewayArgs {
    #[must_use]
    pub fn network_config(&self) -> NetworkConfig {
        NetworkConfig {
            host: self.host.clone(),
            port: self.port,
            cors_origins: self.cors_origins.clone(),
            request_timeout: self.request_timeout,
            api_keys: self
                .api_keys
                .iter()
                .map(|key| key.trim().to_string())
                .filter(|key| !key.is_empty())
                .collect(),
            ..NetworkConfig::default()
        }
    }

    #[must_use]
    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            endpoint: self.orchestra_addr.clone(),
            send_timeout: self.send_timeout,
            recv_timeout: self.recv_timeout,
            ..BridgeConfig::default()
        }
    }

    #[must_use]
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            stage_delay_scale: self.stage_delay_scale,
            retention_max_age: self.retention_max_age,
            retention_interval: Some(self.retention_interval).filter(|d| !d.is_zero()),
        }
    }
}
