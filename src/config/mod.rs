pub mod types;

#[cfg(test)]
mod tests;

pub use types::*;

use anyhow::Result;
use std::path::Path;

const VALID_STRATEGIES: &[&str] = &[
    "per-request",
    "per-session",
    "time-based",
    "on-block",
    "round-robin",
];

impl Config {
    /// Load configuration from a file (if it exists) and apply environment
    /// variable overrides. When the file does not exist, built-in defaults
    /// are used — allowing the gateway to start with zero configuration.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config: Config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            match path.extension().and_then(|e| e.to_str()) {
                Some("toml") => toml::from_str(&content)?,
                Some("json") => serde_json::from_str(&content)?,
                Some(ext) => anyhow::bail!("unsupported config format: .{ext}, use .toml or .json"),
                None => anyhow::bail!("config file has no extension, use .toml or .json"),
            }
        } else {
            tracing::info!(
                "config file not found at {}, using defaults",
                path.display()
            );
            Config::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        tracing::info!("loaded gengar configuration");
        Ok(config)
    }

    /// Apply environment variable overrides, per SPEC_FULL.md §6.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("REDIS_URL") {
            self.store.redis_url = v;
        }
        if let Ok(v) = std::env::var("STORE_BACKEND") {
            self.store.backend = v;
        }
        if let Ok(v) = std::env::var("API_SECRET") {
            self.admin.api_secret = v;
        }
        if let Ok(v) = std::env::var("LOG_LEVEL") {
            self.log_level = v;
        }
        if let Ok(v) = std::env::var("GATEWAY_LISTEN_ADDR") {
            self.gateway.listen_addr = v;
        }
        if let Ok(v) = std::env::var("ADMIN_LISTEN_ADDR") {
            self.admin.listen_addr = v;
        }
        if let Ok(v) = std::env::var("ROTATION_STRATEGY") {
            self.rotation.strategy = v;
        }
        if let Ok(v) = std::env::var("SESSION_TTL") {
            if let Ok(n) = v.parse() {
                self.rotation.session_ttl = n;
            }
        }
        if let Ok(v) = std::env::var("ROTATION_INTERVAL") {
            if let Ok(n) = v.parse() {
                self.rotation.rotation_interval = n;
            }
        }
        if let Ok(v) = std::env::var("POOL_REFRESH_INTERVAL") {
            if let Ok(n) = v.parse() {
                self.scraper.refresh_interval_secs = n;
            }
        }
        if let Ok(v) = std::env::var("HEALTH_CHECK_INTERVAL") {
            if let Ok(n) = v.parse() {
                self.health_check.interval_secs = n;
            }
        }
        if let Ok(v) = std::env::var("HEALTH_CHECK_TIMEOUT") {
            if let Ok(n) = v.parse() {
                self.health_check.timeout_secs = n;
            }
        }
        if let Ok(v) = std::env::var("MAX_CONCURRENT_CHECKS") {
            if let Ok(n) = v.parse() {
                self.health_check.max_concurrent_checks = n;
            }
        }
        if let Ok(v) = std::env::var("MAX_CONNECTIONS") {
            if let Ok(n) = v.parse() {
                self.gateway.max_connections = n;
            }
        }
        if let Ok(v) = std::env::var("MIN_POOL_SIZE") {
            if let Ok(n) = v.parse() {
                self.pool.min_pool_size = n;
            }
        }
        if let Ok(v) = std::env::var("WEBSHARE_ENABLED") {
            self.scraper.webshare_enabled = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("WEBSHARE_API_KEY") {
            self.scraper.webshare_api_key = Some(v);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.store.backend != "redis" && self.store.backend != "memory" {
            anyhow::bail!(
                "store.backend must be 'redis' or 'memory', got '{}'",
                self.store.backend
            );
        }
        if self.store.backend == "redis" && self.store.redis_url.is_empty() {
            anyhow::bail!("store.redis_url cannot be empty when backend is 'redis'");
        }
        if !VALID_STRATEGIES.contains(&self.rotation.strategy.as_str()) {
            anyhow::bail!(
                "rotation.strategy must be one of {:?}, got '{}'",
                VALID_STRATEGIES,
                self.rotation.strategy
            );
        }
        if self.gateway.max_connections == 0 {
            anyhow::bail!("gateway.max_connections must be greater than zero");
        }
        if self.health_check.max_concurrent_checks == 0 {
            anyhow::bail!("health_check.max_concurrent_checks must be greater than zero");
        }
        if self.pool.min_pool_size == 0 {
            anyhow::bail!("pool.min_pool_size must be greater than zero");
        }
        self.gateway
            .listen_addr
            .parse::<std::net::SocketAddr>()
            .map_err(|e| anyhow::anyhow!("invalid gateway.listen_addr: {}", e))?;
        self.admin
            .listen_addr
            .parse::<std::net::SocketAddr>()
            .map_err(|e| anyhow::anyhow!("invalid admin.listen_addr: {}", e))?;
        Ok(())
    }
}
