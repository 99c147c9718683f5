use super::SelectionContext;
use crate::error::GengarError;
use crate::pool::{Proxy, ProxyPool};

const CURRENT_PROXY_KEY: &str = "on_block_current_proxy";

/// Sticks with the persisted proxy until it is marked dead, then picks the
/// best-scoring healthy proxy and persists it.
pub struct OnBlockStrategy {
    pool: ProxyPool,
}

impl OnBlockStrategy {
    pub fn new(pool: ProxyPool) -> Self {
        Self { pool }
    }

    pub async fn select(&self, _ctx: &SelectionContext) -> Result<Option<Proxy>, GengarError> {
        let healthy = self.pool.get_healthy(0.0).await?;
        if healthy.is_empty() {
            return Ok(None);
        }

        if let Some(addr) = self.pool.get_config(CURRENT_PROXY_KEY).await? {
            if !self.pool.is_dead(&addr).await? {
                if let Some((ip, port)) = split_addr(&addr) {
                    if let Some(current) = self.pool.get(&ip, port).await? {
                        return Ok(Some(current));
                    }
                }
            }
        }

        // `get_healthy` is already sorted by (-health_score, latency_ms); the
        // first element is the best-scoring candidate.
        let best = healthy[0].clone();
        self.pool.set_config(CURRENT_PROXY_KEY, &best.addr()).await?;
        Ok(Some(best))
    }
}

fn split_addr(addr: &str) -> Option<(String, u16)> {
    let (ip, port) = addr.rsplit_once(':')?;
    Some((ip.to_string(), port.parse().ok()?))
}
