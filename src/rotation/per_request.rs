use super::SelectionContext;
use crate::error::GengarError;
use crate::pool::{Proxy, ProxyPool};
use rand::Rng;

/// Weighted random over the healthy pool; weight = `max(health_score, 1)`.
pub struct PerRequestStrategy {
    pool: ProxyPool,
}

impl PerRequestStrategy {
    pub fn new(pool: ProxyPool) -> Self {
        Self { pool }
    }

    pub async fn select(&self, _ctx: &SelectionContext) -> Result<Option<Proxy>, GengarError> {
        let healthy = self.pool.get_healthy(0.0).await?;
        Ok(weighted_pick(&healthy))
    }
}

fn weighted_pick(healthy: &[Proxy]) -> Option<Proxy> {
    if healthy.is_empty() {
        return None;
    }
    let weights: Vec<f64> = healthy.iter().map(|p| p.health_score.max(1.0)).collect();
    let total: f64 = weights.iter().sum();

    let mut roll = rand::thread_rng().gen_range(0.0..total);
    for (proxy, weight) in healthy.iter().zip(weights.iter()) {
        if roll < *weight {
            return Some(proxy.clone());
        }
        roll -= weight;
    }
    // Floating point rounding can leave a sliver of roll unconsumed; fall
    // back to the last candidate rather than returning None.
    healthy.last().cloned()
}
