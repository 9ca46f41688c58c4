//! HTTP front configuration.

use std::time::Duration;

/// API keys accepted when none are configured explicitly.
pub const DEFAULT_API_KEYS: [&str; 2] = ["osint-api-key-123", "test-key-456"];

/// Settings for the HTTP listener and its middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    /// Bind address for the server.
    pub host: String,
    /// Port to listen on. 0 means OS-assigned.
    pub port: u16,
    /// Allowed CORS origins; `"*"` allows any.
    pub cors_origins: Vec<String>,
    /// Maximum time a single request may take before a 408.
    pub request_timeout: Duration,
    /// Keys accepted by the auth middleware. Empty disables authentication.
    pub api_keys: Vec<String>,
    /// How long shutdown waits for in-flight requests.
    pub drain_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_origins: vec!["*".to_string()],
            request_timeout: Duration::from_secs(60),
            api_keys: DEFAULT_API_KEYS.iter().map(ToString::to_string).collect(),
            drain_timeout: Duration::from_secs(30),
        }
    }
}

impl NetworkConfig {
    /// `host:port` string handed to the listener.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
