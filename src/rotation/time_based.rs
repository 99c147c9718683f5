use super::SelectionContext;
use crate::error::GengarError;
use crate::pool::{Proxy, ProxyPool};
use rand::seq::SliceRandom;
use std::time::{SystemTime, UNIX_EPOCH};

const CURRENT_PROXY_KEY: &str = "time_based_current_proxy";
const LAST_ROTATION_KEY: &str = "time_based_last_rotation";

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Holds a persisted proxy until `rotation_interval` elapses, then rotates.
pub struct TimeBasedStrategy {
    pool: ProxyPool,
}

impl TimeBasedStrategy {
    pub fn new(pool: ProxyPool) -> Self {
        Self { pool }
    }

    pub async fn select(&self, ctx: &SelectionContext) -> Result<Option<Proxy>, GengarError> {
        let healthy = self.pool.get_healthy(0.0).await?;
        if healthy.is_empty() {
            return Ok(None);
        }

        let now = now_secs();
        if let Some(addr) = self.pool.get_config(CURRENT_PROXY_KEY).await? {
            if !self.pool.is_dead(&addr).await? {
                if let Some((ip, port)) = split_addr(&addr) {
                    if let Some(current) = self.pool.get(&ip, port).await? {
                        let last_rotation = self
                            .pool
                            .get_config(LAST_ROTATION_KEY)
                            .await?
                            .and_then(|v| v.parse::<u64>().ok())
                            .unwrap_or(0);
                        if now.saturating_sub(last_rotation) < ctx.rotation_interval {
                            return Ok(Some(current));
                        }
                    }
                }
            }
        }

        let chosen = healthy
            .choose(&mut rand::thread_rng())
            .cloned()
            .expect("healthy is non-empty");
        self.pool.set_config(CURRENT_PROXY_KEY, &chosen.addr()).await?;
        self.pool
            .set_config(LAST_ROTATION_KEY, &now.to_string())
            .await?;
        Ok(Some(chosen))
    }
}

fn split_addr(addr: &str) -> Option<(String, u16)> {
    let (ip, port) = addr.rsplit_once(':')?;
    Some((ip.to_string(), port.parse().ok()?))
}
