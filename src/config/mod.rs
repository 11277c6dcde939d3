//! Configuration module for the gateway service
//!
//! Settings are loaded from an optional TOML file and then overridden by
//! environment variables (`PORT`, `HOST`, `API_BACKEND_URL`), which are read
//! once at startup.

use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Environment variable overriding the listening port
pub const ENV_PORT: &str = "PORT";
/// Environment variable overriding the bind host
pub const ENV_HOST: &str = "HOST";
/// Environment variable overriding the secret-resolution backend address
pub const ENV_BACKEND_URL: &str = "API_BACKEND_URL";

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind to
    #[serde(default = "default_port")]
    pub port: u16,
    /// Upstream request timeout in seconds. Unset means the transport defaults apply.
    #[serde(default)]
    pub timeout: Option<u64>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout: None,
        }
    }
}

/// Secret-resolution backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base address of the backend
    #[serde(default = "default_backend_url")]
    pub url: String,
    /// Sub-path of the backend's proxy endpoint
    #[serde(default = "default_proxy_path")]
    pub proxy_path: String,
}

fn default_backend_url() -> String {
    "http://homer-api-backend:8001".to_string()
}

fn default_proxy_path() -> String {
    "/api-proxy/".to_string()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: default_backend_url(),
            proxy_path: default_proxy_path(),
        }
    }
}

impl BackendConfig {
    /// Full upstream address of the backend proxy endpoint, without query
    pub fn proxy_endpoint(&self) -> String {
        format!("{}{}", self.url.trim_end_matches('/'), self.proxy_path)
    }
}

/// Relay endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Path the relay is reachable on
    #[serde(default = "default_relay_path")]
    pub path: String,
}

fn default_relay_path() -> String {
    "/server".to_string()
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            path: default_relay_path(),
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether metrics are enabled
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Path to expose metrics
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

fn default_enabled() -> bool {
    true
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_metrics_path(),
        }
    }
}

/// Health check configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Whether health check is enabled
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Path for health check endpoint
    #[serde(default = "default_health_path")]
    pub path: String,
}

fn default_health_path() -> String {
    "/health".to_string()
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_health_path(),
        }
    }
}

/// Main gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub health: HealthConfig,
}

impl GatewayConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Load configuration from a TOML string
    pub fn parse(s: &str) -> anyhow::Result<Self> {
        let config: GatewayConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the file (if any), apply process environment overrides and validate
    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through the given lookup
    pub fn apply_env<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup(ENV_PORT) {
            self.server.port = port
                .trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid {} value '{}': {}", ENV_PORT, port, e))?;
        }
        if let Some(host) = lookup(ENV_HOST) {
            self.server.host = host;
        }
        if let Some(url) = lookup(ENV_BACKEND_URL) {
            self.backend.url = url;
        }
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Err(e) = Url::parse(&self.backend.proxy_endpoint()) {
            anyhow::bail!("Invalid backend address '{}': {}", self.backend.url, e);
        }

        let paths = [
            ("backend.proxy_path", &self.backend.proxy_path),
            ("relay.path", &self.relay.path),
            ("metrics.path", &self.metrics.path),
            ("health.path", &self.health.path),
        ];
        for (name, path) in paths {
            if !path.starts_with('/') {
                anyhow::bail!("{} must start with '/', got '{}'", name, path);
            }
        }

        if self.relay.path == "/" {
            anyhow::bail!("relay.path cannot be the root path");
        }
        let relay = self.relay.path.trim_end_matches('/');
        if (self.metrics.enabled && self.metrics.path.trim_end_matches('/') == relay)
            || (self.health.enabled && self.health.path.trim_end_matches('/') == relay)
        {
            anyhow::bail!("relay.path '{}' collides with another endpoint", self.relay.path);
        }
        if self.metrics.enabled && self.health.enabled && self.metrics.path == self.health.path {
            anyhow::bail!("metrics.path and health.path must differ");
        }

        Ok(())
    }

    /// Get server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
