#[cfg(test)]
mod tests;

use crate::error::GengarError;
use crate::store::{StateStore, StoreOp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

pub const PROXY_KEY_PREFIX: &str = "gengar:proxy:";
pub const POOL_INDEX_KEY: &str = "gengar:pool:index";
pub const DEAD_SET_KEY: &str = "gengar:pool:dead";
pub const HEALTHY_SET_KEY: &str = "gengar:pool:healthy";
pub const SESSION_KEY_PREFIX: &str = "gengar:session:";
pub const STATS_KEY: &str = "gengar:stats";
pub const ROUND_ROBIN_KEY: &str = "gengar:rr:index";
pub const REQUEST_LOG_KEY: &str = "gengar:request_log";
pub const CONFIG_KEY_PREFIX: &str = "gengar:config:";
pub const DOMAIN_OVERRIDES_KEY: &str = "gengar:domain_overrides";
pub const LIVE_REQUESTS_TOPIC: &str = "gengar:live_requests";

const CONSECUTIVE_FAILS_THRESHOLD: u64 = 3;
const REQUEST_LOG_CAP: isize = 499; // ltrim(0, 499) keeps 500 entries

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// A single upstream proxy, identified by the `(ip, port)` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proxy {
    pub ip: String,
    pub port: u16,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub latency_ms: f64,
    #[serde(default)]
    pub health_score: f64,
    #[serde(default)]
    pub last_checked: u64,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub fail_count: u64,
    #[serde(default)]
    pub success_count: u64,
    #[serde(default)]
    pub total_checks: u64,
    #[serde(default)]
    pub consecutive_fails: u64,
    #[serde(default)]
    pub created_at: u64,
}

fn default_protocol() -> String {
    "http".to_string()
}

impl Proxy {
    pub fn new(ip: impl Into<String>, port: u16, source: impl Into<String>) -> Self {
        let now = now_secs();
        Self {
            ip: ip.into(),
            port,
            protocol: default_protocol(),
            country: String::new(),
            latency_ms: 0.0,
            health_score: 0.0,
            last_checked: now,
            source: source.into(),
            fail_count: 0,
            success_count: 0,
            total_checks: 0,
            consecutive_fails: 0,
            created_at: now,
        }
    }

    /// Canonical address key, `"<ip>:<port>"`.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    fn storage_key(&self) -> String {
        proxy_key(&self.ip, self.port)
    }

    fn recompute_health_score(&mut self) {
        self.health_score = if self.total_checks == 0 {
            0.0
        } else {
            (self.success_count as f64 / self.total_checks as f64) * 100.0
        };
    }
}

pub fn proxy_key(ip: &str, port: u16) -> String {
    format!("{}{}:{}", PROXY_KEY_PREFIX, ip, port)
}

fn parse_addr(addr: &str) -> Option<(String, u16)> {
    let (ip, port) = addr.rsplit_once(':')?;
    Some((ip.to_string(), port.parse().ok()?))
}

/// Shared, durable catalogue of upstream proxies. The single source of truth
/// every other component reads and mutates (SPEC_FULL.md §4.B).
#[derive(Clone)]
pub struct ProxyPool {
    store: Arc<dyn StateStore>,
}

impl ProxyPool {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Insert-if-absent; existing entries are preserved (stats untouched).
    /// Adds the address to `index` and `healthy`, removes it from `dead`.
    pub async fn add(&self, proxy: Proxy) -> Result<(), GengarError> {
        let key = proxy.storage_key();
        let addr = proxy.addr();
        let json = serde_json::to_string(&proxy)
            .map_err(|e| GengarError::Internal(e.to_string()))?;
        self.store.setnx(&key, &json).await?;
        self.store.sadd(POOL_INDEX_KEY, &addr).await?;
        self.store.sadd(HEALTHY_SET_KEY, &addr).await?;
        self.store.srem(DEAD_SET_KEY, &addr).await?;
        Ok(())
    }

    /// Unconditional write — overwrites any existing record. Used by the
    /// scraper's Webshare fallback, which treats its feed as authoritative.
    pub async fn put(&self, proxy: Proxy) -> Result<(), GengarError> {
        let key = proxy.storage_key();
        let addr = proxy.addr();
        let json = serde_json::to_string(&proxy)
            .map_err(|e| GengarError::Internal(e.to_string()))?;
        self.store.set(&key, &json).await?;
        self.store.sadd(POOL_INDEX_KEY, &addr).await?;
        self.store.sadd(HEALTHY_SET_KEY, &addr).await?;
        self.store.srem(DEAD_SET_KEY, &addr).await?;
        Ok(())
    }

    /// Same as [`add`](Self::add) but pipelined across many proxies.
    pub async fn bulk_add(&self, proxies: &[Proxy]) -> Result<(), GengarError> {
        let mut ops = Vec::with_capacity(proxies.len() * 2);
        for proxy in proxies {
            let json = serde_json::to_string(proxy)
                .map_err(|e| GengarError::Internal(e.to_string()))?;
            ops.push(StoreOp::SetNx(proxy.storage_key(), json));
            ops.push(StoreOp::SAdd(POOL_INDEX_KEY.to_string(), proxy.addr()));
        }
        if ops.is_empty() {
            return Ok(());
        }
        self.store.pipeline(ops).await?;
        Ok(())
    }

    pub async fn get(&self, ip: &str, port: u16) -> Result<Option<Proxy>, GengarError> {
        let key = proxy_key(ip, port);
        self.load(&key).await
    }

    async fn load(&self, key: &str) -> Result<Option<Proxy>, GengarError> {
        let Some(raw) = self.store.get(key).await? else {
            return Ok(None);
        };
        let proxy: Proxy =
            serde_json::from_str(&raw).map_err(|e| GengarError::Internal(e.to_string()))?;
        Ok(Some(proxy))
    }

    pub async fn get_all(&self) -> Result<Vec<Proxy>, GengarError> {
        let addrs = self.store.smembers(POOL_INDEX_KEY).await?;
        let mut proxies = Vec::with_capacity(addrs.len());
        for addr in addrs {
            let Some((ip, port)) = parse_addr(&addr) else {
                continue;
            };
            if let Some(p) = self.get(&ip, port).await? {
                proxies.push(p);
            }
        }
        Ok(proxies)
    }

    /// Excludes dead entries and filters by `health_score >= min_score`,
    /// sorted by `(-health_score, latency_ms)`.
    pub async fn get_healthy(&self, min_score: f64) -> Result<Vec<Proxy>, GengarError> {
        let addrs = self.store.smembers(HEALTHY_SET_KEY).await?;
        let mut proxies = Vec::with_capacity(addrs.len());
        for addr in addrs {
            let Some((ip, port)) = parse_addr(&addr) else {
                continue;
            };
            if let Some(p) = self.get(&ip, port).await? {
                if p.health_score >= min_score {
                    proxies.push(p);
                }
            }
        }
        proxies.sort_by(|a, b| {
            b.health_score
                .partial_cmp(&a.health_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(
                    a.latency_ms
                        .partial_cmp(&b.latency_ms)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
        });
        Ok(proxies)
    }

    pub async fn pool_size(&self) -> Result<usize, GengarError> {
        self.store.scard(POOL_INDEX_KEY).await
    }

    pub async fn healthy_count(&self) -> Result<usize, GengarError> {
        self.store.scard(HEALTHY_SET_KEY).await
    }

    pub async fn dead_count(&self) -> Result<usize, GengarError> {
        self.store.scard(DEAD_SET_KEY).await
    }

    pub async fn is_dead(&self, addr: &str) -> Result<bool, GengarError> {
        self.store.sismember(DEAD_SET_KEY, addr).await
    }

    /// Increments success/total, resets `consecutive_fails`, recomputes
    /// score, sets healthy and clears dead. No-op if the proxy is absent.
    pub async fn record_success(
        &self,
        ip: &str,
        port: u16,
        latency_ms: f64,
    ) -> Result<(), GengarError> {
        let key = proxy_key(ip, port);
        let Some(mut proxy) = self.load(&key).await? else {
            return Ok(());
        };
        proxy.success_count += 1;
        proxy.total_checks += 1;
        proxy.consecutive_fails = 0;
        proxy.latency_ms = latency_ms;
        proxy.last_checked = now_secs();
        proxy.recompute_health_score();

        let json =
            serde_json::to_string(&proxy).map_err(|e| GengarError::Internal(e.to_string()))?;
        self.store.set(&key, &json).await?;
        let addr = proxy.addr();
        self.store.sadd(HEALTHY_SET_KEY, &addr).await?;
        self.store.srem(DEAD_SET_KEY, &addr).await?;
        Ok(())
    }

    /// Increments fail/total/consecutive_fails, recomputes score; transitions
    /// to dead (not removed) once `consecutive_fails >= 3`. No-op if absent.
    pub async fn record_failure(&self, ip: &str, port: u16) -> Result<(), GengarError> {
        let key = proxy_key(ip, port);
        let Some(mut proxy) = self.load(&key).await? else {
            return Ok(());
        };
        proxy.fail_count += 1;
        proxy.total_checks += 1;
        proxy.consecutive_fails += 1;
        proxy.last_checked = now_secs();
        proxy.recompute_health_score();

        let json =
            serde_json::to_string(&proxy).map_err(|e| GengarError::Internal(e.to_string()))?;
        self.store.set(&key, &json).await?;

        if proxy.consecutive_fails >= CONSECUTIVE_FAILS_THRESHOLD {
            self.mark_dead(ip, port).await?;
        }
        Ok(())
    }

    pub async fn mark_dead(&self, ip: &str, port: u16) -> Result<(), GengarError> {
        let addr = format!("{ip}:{port}");
        self.store.sadd(DEAD_SET_KEY, &addr).await?;
        self.store.srem(HEALTHY_SET_KEY, &addr).await?;
        Ok(())
    }

    /// Removes a proxy permanently from every set and deletes its record.
    pub async fn remove(&self, ip: &str, port: u16) -> Result<(), GengarError> {
        let key = proxy_key(ip, port);
        let addr = format!("{ip}:{port}");
        self.store.del(&key).await?;
        self.store.srem(POOL_INDEX_KEY, &addr).await?;
        self.store.srem(HEALTHY_SET_KEY, &addr).await?;
        self.store.srem(DEAD_SET_KEY, &addr).await?;
        Ok(())
    }

    /// Removes every proxy currently in the dead set, returning the count.
    pub async fn flush_dead(&self) -> Result<usize, GengarError> {
        let dead = self.store.smembers(DEAD_SET_KEY).await?;
        let count = dead.len();
        for addr in dead {
            if let Some((ip, port)) = parse_addr(&addr) {
                self.remove(&ip, port).await?;
            }
        }
        Ok(count)
    }

    // --- session pins ---

    pub async fn set_session_proxy(
        &self,
        session_id: &str,
        proxy: &Proxy,
        ttl_secs: u64,
    ) -> Result<(), GengarError> {
        let key = format!("{SESSION_KEY_PREFIX}{session_id}");
        let json =
            serde_json::to_string(proxy).map_err(|e| GengarError::Internal(e.to_string()))?;
        self.store.set_ex(&key, &json, ttl_secs).await
    }

    pub async fn get_session_proxy(&self, session_id: &str) -> Result<Option<Proxy>, GengarError> {
        let key = format!("{SESSION_KEY_PREFIX}{session_id}");
        self.load(&key).await
    }

    // --- round-robin cursor ---

    pub async fn get_rr_index(&self) -> Result<u64, GengarError> {
        Ok(self
            .store
            .get(ROUND_ROBIN_KEY)
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0))
    }

    pub async fn set_rr_index(&self, index: u64) -> Result<(), GengarError> {
        self.store.set(ROUND_ROBIN_KEY, &index.to_string()).await
    }

    // --- stats ---

    pub async fn incr_stat(&self, field: &str, delta: i64) -> Result<i64, GengarError> {
        self.store.hincrby(STATS_KEY, field, delta).await
    }

    pub async fn get_stats(&self) -> Result<HashMap<String, String>, GengarError> {
        self.store.hgetall(STATS_KEY).await
    }

    pub async fn reset_stats(&self) -> Result<(), GengarError> {
        self.store.del(STATS_KEY).await
    }

    // --- request log ---

    pub async fn log_request(&self, entry_json: &str) -> Result<(), GengarError> {
        self.store.lpush(REQUEST_LOG_KEY, entry_json).await?;
        self.store.ltrim(REQUEST_LOG_KEY, 0, REQUEST_LOG_CAP).await?;
        self.store.publish(LIVE_REQUESTS_TOPIC, entry_json).await
    }

    pub async fn get_recent_requests(&self, count: usize) -> Result<Vec<String>, GengarError> {
        let count = count.min(REQUEST_LOG_CAP as usize + 1);
        self.store
            .lrange(REQUEST_LOG_KEY, 0, count as isize - 1)
            .await
    }

    pub async fn subscribe_live(&self) -> Result<tokio::sync::broadcast::Receiver<String>, GengarError> {
        self.store.subscribe(LIVE_REQUESTS_TOPIC).await
    }

    // --- config ---

    pub async fn set_config(&self, key: &str, value: &str) -> Result<(), GengarError> {
        self.store.set(&format!("{CONFIG_KEY_PREFIX}{key}"), value).await
    }

    pub async fn get_config(&self, key: &str) -> Result<Option<String>, GengarError> {
        self.store.get(&format!("{CONFIG_KEY_PREFIX}{key}")).await
    }

    // --- domain overrides ---

    pub async fn set_domain_override(&self, domain: &str, value: &str) -> Result<(), GengarError> {
        self.store.hset(DOMAIN_OVERRIDES_KEY, domain, value).await
    }

    pub async fn get_domain_overrides(&self) -> Result<HashMap<String, String>, GengarError> {
        self.store.hgetall(DOMAIN_OVERRIDES_KEY).await
    }

    pub async fn get_domain_override(&self, domain: &str) -> Result<Option<String>, GengarError> {
        self.store.hget(DOMAIN_OVERRIDES_KEY, domain).await
    }

    pub async fn delete_domain_override(&self, domain: &str) -> Result<(), GengarError> {
        self.store.hdel(DOMAIN_OVERRIDES_KEY, domain).await
    }
}
