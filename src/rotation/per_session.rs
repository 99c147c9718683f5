use super::SelectionContext;
use crate::error::GengarError;
use crate::pool::{Proxy, ProxyPool};
use rand::seq::SliceRandom;

/// Pins a proxy to a client-supplied session id for `session_ttl` seconds.
pub struct PerSessionStrategy {
    pool: ProxyPool,
}

impl PerSessionStrategy {
    pub fn new(pool: ProxyPool) -> Self {
        Self { pool }
    }

    pub async fn select(&self, ctx: &SelectionContext) -> Result<Option<Proxy>, GengarError> {
        let healthy = self.pool.get_healthy(0.0).await?;
        if healthy.is_empty() {
            return Ok(None);
        }

        let Some(session_id) = &ctx.session_id else {
            return Ok(weighted_any(&healthy));
        };

        if let Some(pinned) = self.pool.get_session_proxy(session_id).await? {
            if !self.pool.is_dead(&pinned.addr()).await? {
                return Ok(Some(pinned));
            }
        }

        let chosen = healthy
            .choose(&mut rand::thread_rng())
            .cloned()
            .expect("healthy is non-empty");
        self.pool
            .set_session_proxy(session_id, &chosen, ctx.session_ttl)
            .await?;
        Ok(Some(chosen))
    }
}

fn weighted_any(healthy: &[Proxy]) -> Option<Proxy> {
    healthy.choose(&mut rand::thread_rng()).cloned()
}
