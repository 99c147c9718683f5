use super::SelectionContext;
use crate::error::GengarError;
use crate::pool::{Proxy, ProxyPool};

/// Cycles through the sorted healthy list via a monotone cursor.
pub struct RoundRobinStrategy {
    pool: ProxyPool,
}

impl RoundRobinStrategy {
    pub fn new(pool: ProxyPool) -> Self {
        Self { pool }
    }

    pub async fn select(&self, _ctx: &SelectionContext) -> Result<Option<Proxy>, GengarError> {
        let healthy = self.pool.get_healthy(0.0).await?;
        if healthy.is_empty() {
            return Ok(None);
        }

        let mut index = self.pool.get_rr_index().await?;
        if index as usize >= healthy.len() {
            index = 0;
        }

        let chosen = healthy[index as usize].clone();
        self.pool.set_rr_index(index + 1).await?;
        Ok(Some(chosen))
    }
}
