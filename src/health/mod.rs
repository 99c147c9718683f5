#[cfg(test)]
mod tests;

use crate::error::GengarError;
use crate::pool::ProxyPool;
use futures_util::stream::{self, StreamExt};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const PROBE_URL: &str = "https://httpbin.org/ip";
const CONSECUTIVE_FAILS_EVICT: u64 = 3;

/// Aggregate outcome of one health-check sweep, per SPEC_FULL.md §4.D.
#[derive(Debug, Clone, Copy, Default)]
pub struct HealthReport {
    pub total: usize,
    pub healthy: usize,
    pub dead: usize,
}

#[derive(Debug, Deserialize)]
struct HttpbinIp {
    #[allow(dead_code)]
    origin: String,
}

/// Bounded-concurrency prober over every address in the pool's index.
///
/// Mirrors the `buffer_unordered`-style fan-out idiom used elsewhere in this
/// codebase's probing code rather than hand-rolled semaphore bookkeeping.
pub struct HealthChecker {
    pool: ProxyPool,
    max_concurrent: usize,
    timeout: Duration,
}

impl HealthChecker {
    pub fn new(pool: ProxyPool, max_concurrent: usize, timeout_secs: u64) -> Self {
        Self {
            pool,
            max_concurrent,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// Run one sweep across every known address, probing with bounded
    /// concurrency. Probe failures are logged and swallowed; they never
    /// propagate — a bad sweep must not take down the background loop.
    pub async fn run_once(&self) -> Result<HealthReport, GengarError> {
        let addrs = self.pool.get_all().await?;
        let total = addrs.len();

        let pool = &self.pool;
        let timeout = self.timeout;

        stream::iter(addrs)
            .map(|proxy| {
                let pool = pool.clone();
                async move {
                    probe_one(&pool, &proxy.ip, proxy.port, timeout).await;
                }
            })
            .buffer_unordered(self.max_concurrent.max(1))
            .collect::<()>()
            .await;

        let healthy = self.pool.healthy_count().await?;
        let dead = self.pool.dead_count().await?;
        debug!(
            "health: sweep complete, total={}, healthy={}, dead={}",
            total, healthy, dead
        );
        Ok(HealthReport { total, healthy, dead })
    }

    /// Sleep `interval_secs` then run a sweep, forever. Exceptions are
    /// logged and swallowed so the loop never exits.
    pub async fn run_periodic(&self, interval_secs: u64, shutdown: &tokio::sync::Notify) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(interval_secs)) => {}
                _ = shutdown.notified() => return,
            }
            match self.run_once().await {
                Ok(report) => {
                    metrics::gauge!("gengar_pool_size", "set" => "healthy").set(report.healthy as f64);
                    metrics::gauge!("gengar_pool_size", "set" => "dead").set(report.dead as f64);
                }
                Err(e) => warn!("health: sweep failed, error={}", e),
            }
        }
    }
}

async fn probe_one(pool: &ProxyPool, ip: &str, port: u16, timeout: Duration) {
    let client = match build_probe_client(ip, port, timeout) {
        Ok(c) => c,
        Err(e) => {
            warn!("health: failed to build probe client, proxy={ip}:{port}, error={e}");
            apply_failure(pool, ip, port).await;
            return;
        }
    };

    let start = Instant::now();
    let result = client.get(PROBE_URL).send().await;

    match result {
        Ok(resp) if resp.status().is_success() => {
            let body: Result<HttpbinIp, _> = resp.json().await;
            if body.is_ok() {
                let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
                let _ = pool.record_success(ip, port, latency_ms).await;
                metrics::counter!("gengar_health_check_total", "result" => "pass").increment(1);
                metrics::histogram!("gengar_health_check_duration_seconds")
                    .record(start.elapsed().as_secs_f64());
            } else {
                debug!("health: probe missing 'origin' field, proxy={ip}:{port}");
                apply_failure(pool, ip, port).await;
            }
        }
        Ok(resp) => {
            debug!(
                "health: probe non-200, proxy={ip}:{port}, status={}",
                resp.status()
            );
            apply_failure(pool, ip, port).await;
        }
        Err(e) => {
            debug!("health: probe transport error, proxy={ip}:{port}, error={e}");
            apply_failure(pool, ip, port).await;
        }
    }
}

async fn apply_failure(pool: &ProxyPool, ip: &str, port: u16) {
    metrics::counter!("gengar_health_check_total", "result" => "fail").increment(1);
    let _ = pool.record_failure(ip, port).await;

    // Stronger than the generic pool rule (mark-dead only): the health
    // checker permanently removes a proxy after three consecutive fails.
    if let Ok(Some(proxy)) = pool.get(ip, port).await {
        if proxy.consecutive_fails >= CONSECUTIVE_FAILS_EVICT {
            let _ = pool.remove(ip, port).await;
        }
    }
}

fn build_probe_client(ip: &str, port: u16, timeout: Duration) -> Result<reqwest::Client, GengarError> {
    let proxy_url = format!("http://{ip}:{port}");
    let proxy = reqwest::Proxy::http(&proxy_url).map_err(|e| GengarError::Transport(e.to_string()))?;
    reqwest::Client::builder()
        .proxy(proxy)
        .timeout(timeout)
        .build()
        .map_err(|e| GengarError::Transport(e.to_string()))
}
