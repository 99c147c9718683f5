use serde::{Deserialize, Serialize};

/// Top-level Gengar configuration — the process-wide knobs in SPEC_FULL.md §6.
///
/// Business state (the proxy pool, sessions, rotation cursor, domain
/// overrides) lives exclusively in the shared state store; this struct only
/// carries the settings needed to stand the process up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub gateway: GatewayListenConfig,

    #[serde(default)]
    pub admin: AdminConfig,

    #[serde(default)]
    pub rotation: RotationConfig,

    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub health_check: HealthCheckConfig,

    #[serde(default)]
    pub scraper: ScraperConfig,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            gateway: GatewayListenConfig::default(),
            admin: AdminConfig::default(),
            rotation: RotationConfig::default(),
            pool: PoolConfig::default(),
            health_check: HealthCheckConfig::default(),
            scraper: ScraperConfig::default(),
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// "redis" or "memory".
    #[serde(default = "default_store_backend")]
    pub backend: String,

    #[serde(default = "default_redis_url")]
    pub redis_url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            redis_url: default_redis_url(),
        }
    }
}

fn default_store_backend() -> String {
    "redis".to_string()
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayListenConfig {
    #[serde(default = "default_gateway_listen_addr")]
    pub listen_addr: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for GatewayListenConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_gateway_listen_addr(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_gateway_listen_addr() -> String {
    "0.0.0.0:6969".to_string()
}

fn default_max_connections() -> usize {
    200
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    #[serde(default = "default_admin_listen_addr")]
    pub listen_addr: String,

    #[serde(default = "default_api_secret")]
    pub api_secret: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_admin_listen_addr(),
            api_secret: default_api_secret(),
        }
    }
}

fn default_admin_listen_addr() -> String {
    "0.0.0.0:8088".to_string()
}

fn default_api_secret() -> String {
    "changeme".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationConfig {
    /// "per-request", "per-session", "time-based", "on-block", "round-robin".
    #[serde(default = "default_rotation_strategy")]
    pub strategy: String,

    #[serde(default = "default_session_ttl")]
    pub session_ttl: u64,

    #[serde(default = "default_rotation_interval")]
    pub rotation_interval: u64,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            strategy: default_rotation_strategy(),
            session_ttl: default_session_ttl(),
            rotation_interval: default_rotation_interval(),
        }
    }
}

fn default_rotation_strategy() -> String {
    "per-request".to_string()
}

fn default_session_ttl() -> u64 {
    300
}

fn default_rotation_interval() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_min_pool_size")]
    pub min_pool_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_pool_size: default_min_pool_size(),
        }
    }
}

fn default_min_pool_size() -> usize {
    20
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    #[serde(default = "default_health_check_interval")]
    pub interval_secs: u64,

    #[serde(default = "default_health_check_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_concurrent_checks")]
    pub max_concurrent_checks: usize,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_health_check_interval(),
            timeout_secs: default_health_check_timeout(),
            max_concurrent_checks: default_max_concurrent_checks(),
        }
    }
}

fn default_health_check_interval() -> u64 {
    600
}

fn default_health_check_timeout() -> u64 {
    8
}

fn default_max_concurrent_checks() -> usize {
    200
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    #[serde(default = "default_pool_refresh_interval")]
    pub refresh_interval_secs: u64,

    #[serde(default)]
    pub webshare_enabled: bool,

    #[serde(default)]
    pub webshare_api_key: Option<String>,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_pool_refresh_interval(),
            webshare_enabled: false,
            webshare_api_key: None,
        }
    }
}

fn default_pool_refresh_interval() -> u64 {
    1800
}
