#[cfg(test)]
mod tests;

use crate::error::GengarError;
use crate::pool::ProxyPool;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// One row of the live request feed, published on every gateway attempt and
/// retained in the bounded request log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveRecord {
    pub ts: String,
    pub method: String,
    pub url: String,
    pub target_domain: String,
    pub proxy_ip: String,
    pub status: Option<u16>,
    pub latency_ms: f64,
    pub blocked: bool,
    pub attempt: u32,
    pub strategy: String,
    pub error: Option<String>,
    pub response_headers: Vec<(String, String)>,
}

impl LiveRecord {
    /// Trims to the first 20 response headers, per the live feed schema.
    pub fn with_headers_capped(mut self) -> Self {
        self.response_headers.truncate(20);
        self
    }
}

/// Wraps the pool's bounded request log and pub/sub topic behind a typed API.
#[derive(Clone)]
pub struct LiveFeed {
    pool: ProxyPool,
}

impl LiveFeed {
    pub fn new(pool: ProxyPool) -> Self {
        Self { pool }
    }

    /// Append a record to the bounded live log and fan it out to subscribers.
    pub async fn publish(&self, record: &LiveRecord) -> Result<(), GengarError> {
        let json = serde_json::to_string(record).map_err(|e| GengarError::Internal(e.to_string()))?;
        self.pool.log_request(&json).await
    }

    /// Fetch the most recent `count` records, newest first.
    pub async fn recent(&self, count: usize) -> Result<Vec<LiveRecord>, GengarError> {
        let raw = self.pool.get_recent_requests(count).await?;
        Ok(raw
            .into_iter()
            .filter_map(|s| serde_json::from_str(&s).ok())
            .collect())
    }

    /// Subscribe to the raw JSON broadcast topic, for streaming to a client.
    pub async fn subscribe(&self) -> Result<broadcast::Receiver<String>, GengarError> {
        self.pool.subscribe_live().await
    }
}
