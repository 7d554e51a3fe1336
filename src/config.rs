use crate::healthcheck::HealthCheckConfig;
use crate::pool::PoolConfig;
use crate::routes::RouteKey;
use crate::selector::SelectorRegistry;
use serde::Deserialize;
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Failure to load or validate the startup configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("configuration errors:\n  - {}", .0.join("\n  - "))]
    Invalid(Vec<String>),
    #[error("algorithm not supported: {0}")]
    AlgorithmNotSupported(String),
}

/// Startup configuration for the load balancer
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Listen port (default: 8080, 0 picks an ephemeral port)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Bind address (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind: String,

    /// Selector name applied to every route
    pub algorithm: String,

    /// Route keys, e.g. `GET /posts`
    pub paths: Vec<String>,

    /// Readiness probing of registered endpoints
    #[serde(default)]
    pub health_check: HealthCheckSettings,

    /// Seconds open connections may drain on shutdown (default: 10)
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,

    /// Upstream connection pool
    #[serde(default)]
    pub pool: PoolSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HealthCheckSettings {
    /// Probe interval in seconds (default: 5)
    #[serde(default = "default_health_interval")]
    pub interval_secs: u64,

    /// Probe deadline in seconds (default: 5)
    #[serde(default = "default_health_timeout")]
    pub timeout_secs: u64,

    /// Readiness path on each origin (default: /readyz)
    #[serde(default = "default_health_path")]
    pub path: String,

    /// Consecutive failures before eviction (default: 1)
    #[serde(default = "default_threshold")]
    pub unhealthy_threshold: u32,

    /// Consecutive successes before admission (default: 1)
    #[serde(default = "default_threshold")]
    pub healthy_threshold: u32,
}

impl Default for HealthCheckSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_health_interval(),
            timeout_secs: default_health_timeout(),
            path: default_health_path(),
            unhealthy_threshold: default_threshold(),
            healthy_threshold: default_threshold(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PoolSettings {
    /// Maximum idle connections per origin (default: 10)
    #[serde(default = "default_pool_max_idle_per_host")]
    pub max_idle_per_host: usize,

    /// Idle connection timeout in seconds (default: 90)
    #[serde(default = "default_pool_idle_timeout")]
    pub idle_timeout_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_idle_per_host: default_pool_max_idle_per_host(),
            idle_timeout_secs: default_pool_idle_timeout(),
        }
    }
}

fn default_port() -> u16 {
    8080
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_shutdown_grace() -> u64 {
    10
}

fn default_health_interval() -> u64 {
    5
}

fn default_health_timeout() -> u64 {
    5
}

fn default_health_path() -> String {
    "/readyz".to_string()
}

fn default_threshold() -> u32 {
    1
}

fn default_pool_max_idle_per_host() -> usize {
    10
}

fn default_pool_idle_timeout() -> u64 {
    90
}

impl Config {
    /// Read, parse and validate a YAML config file
    pub fn load<P: AsRef<Path>>(path: P, registry: &SelectorRegistry) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content, registry)
    }

    pub fn from_yaml_str(content: &str, registry: &SelectorRegistry) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate(registry)?;
        Ok(config)
    }

    /// Validate all configuration; every problem is reported at once
    pub fn validate(&self, registry: &SelectorRegistry) -> Result<(), ConfigError> {
        if !registry.contains(&self.algorithm) {
            return Err(ConfigError::AlgorithmNotSupported(self.algorithm.clone()));
        }

        let mut errors = Vec::new();

        if self.bind.parse::<IpAddr>().is_err() {
            errors.push(format!("bind: '{}' is not an IP address", self.bind));
        }

        if self.paths.is_empty() {
            errors.push("paths: at least one route is required".to_string());
        }
        let mut seen = HashSet::new();
        for path in &self.paths {
            match RouteKey::parse(path) {
                Ok(key) => {
                    if !seen.insert(key) {
                        errors.push(format!("paths: duplicate route '{}'", path));
                    }
                }
                Err(e) => errors.push(format!("paths: {}", e)),
            }
        }

        let health = &self.health_check;
        if health.interval_secs == 0 {
            errors.push("health_check.interval_secs must be greater than 0".to_string());
        }
        if health.timeout_secs == 0 {
            errors.push("health_check.timeout_secs must be greater than 0".to_string());
        }
        if !health.path.starts_with('/') {
            errors.push(format!(
                "health_check.path: '{}' must start with '/'",
                health.path
            ));
        }
        if health.unhealthy_threshold == 0 {
            errors.push("health_check.unhealthy_threshold must be at least 1".to_string());
        }
        if health.healthy_threshold == 0 {
            errors.push("health_check.healthy_threshold must be at least 1".to_string());
        }

        if !errors.is_empty() {
            return Err(ConfigError::Invalid(errors));
        }

        Ok(())
    }

    /// Parsed route keys, in declaration order
    pub fn route_keys(&self) -> Result<Vec<RouteKey>, ConfigError> {
        self.paths
            .iter()
            .map(|path| RouteKey::parse(path).map_err(|e| ConfigError::Invalid(vec![e.to_string()])))
            .collect()
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self.bind.parse().map_err(|_| {
            ConfigError::Invalid(vec![format!("bind: '{}' is not an IP address", self.bind)])
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }

    pub fn health_check_config(&self) -> HealthCheckConfig {
        HealthCheckConfig {
            interval: Duration::from_secs(self.health_check.interval_secs),
            timeout: Duration::from_secs(self.health_check.timeout_secs),
            path: self.health_check.path.clone(),
            unhealthy_threshold: self.health_check.unhealthy_threshold,
            healthy_threshold: self.health_check.healthy_threshold,
        }
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_idle_per_host: self.pool.max_idle_per_host,
            idle_timeout: Duration::from_secs(self.pool.idle_timeout_secs),
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}
