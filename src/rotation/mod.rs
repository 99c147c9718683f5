pub mod on_block;
pub mod per_request;
pub mod per_session;
pub mod round_robin;
pub mod time_based;

#[cfg(test)]
mod tests;

use crate::error::GengarError;
use crate::pool::{Proxy, ProxyPool};
use on_block::OnBlockStrategy;
use per_request::PerRequestStrategy;
use per_session::PerSessionStrategy;
use round_robin::RoundRobinStrategy;
use serde::Deserialize;
use time_based::TimeBasedStrategy;

/// Inputs a strategy may consult, mirroring the `context` mapping of
/// SPEC_FULL.md §4.C.
#[derive(Debug, Clone, Default)]
pub struct SelectionContext {
    pub session_id: Option<String>,
    pub target_domain: Option<String>,
    pub session_ttl: u64,
    pub rotation_interval: u64,
    #[allow(dead_code)]
    pub country: Option<String>,
}

/// Enum-dispatch rotation strategy — no `dyn Trait`, mirroring this
/// codebase's load-balancer enum-dispatch pattern (static dispatch,
/// exhaustive match, zero extra heap allocation on the selection hot path).
/// Each variant owns only the pool handle it needs.
pub enum RotationStrategy {
    PerRequest(PerRequestStrategy),
    PerSession(PerSessionStrategy),
    TimeBased(TimeBasedStrategy),
    OnBlock(OnBlockStrategy),
    RoundRobin(RoundRobinStrategy),
}

impl RotationStrategy {
    /// Unknown strategy names fall back to per-request.
    pub fn from_name(name: &str, pool: ProxyPool) -> Self {
        match name {
            "per-session" => Self::PerSession(PerSessionStrategy::new(pool)),
            "time-based" => Self::TimeBased(TimeBasedStrategy::new(pool)),
            "on-block" => Self::OnBlock(OnBlockStrategy::new(pool)),
            "round-robin" => Self::RoundRobin(RoundRobinStrategy::new(pool)),
            "per-request" => Self::PerRequest(PerRequestStrategy::new(pool)),
            other => {
                tracing::warn!("rotation: unknown strategy '{}', falling back to per-request", other);
                Self::PerRequest(PerRequestStrategy::new(pool))
            }
        }
    }

    pub async fn select(&self, ctx: &SelectionContext) -> Result<Option<Proxy>, GengarError> {
        match self {
            Self::PerRequest(s) => s.select(ctx).await,
            Self::PerSession(s) => s.select(ctx).await,
            Self::TimeBased(s) => s.select(ctx).await,
            Self::OnBlock(s) => s.select(ctx).await,
            Self::RoundRobin(s) => s.select(ctx).await,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DomainOverride {
    strategy: String,
    #[allow(dead_code)]
    #[serde(default)]
    country: Option<String>,
}

/// Looks up the domain override for `target_domain`; if present, instantiates
/// the named strategy for this single selection (no caching). Otherwise uses
/// the globally configured strategy. Folds `next_proxy`/`mark_block` and the
/// rest of the rotation-engine surface into plain async functions over
/// `ProxyPool`, rather than a second network hop (SPEC_FULL.md §6).
#[derive(Clone)]
pub struct RotationDispatcher {
    pool: ProxyPool,
    default_strategy_name: String,
}

impl RotationDispatcher {
    pub fn new(pool: ProxyPool, default_strategy_name: impl Into<String>) -> Self {
        Self {
            pool,
            default_strategy_name: default_strategy_name.into(),
        }
    }

    pub async fn select(&self, ctx: &SelectionContext) -> Result<Option<Proxy>, GengarError> {
        if let Some(domain) = &ctx.target_domain {
            if let Some(raw) = self.pool.get_domain_override(domain).await? {
                if let Ok(over) = serde_json::from_str::<DomainOverride>(&raw) {
                    let strategy = RotationStrategy::from_name(&over.strategy, self.pool.clone());
                    return strategy.select(ctx).await;
                }
            }
        }
        let current = self
            .pool
            .get_config("rotation_strategy")
            .await?
            .unwrap_or_else(|| self.default_strategy_name.clone());
        let strategy = RotationStrategy::from_name(&current, self.pool.clone());
        strategy.select(ctx).await
    }

    /// Resolves the strategy name that a selection for this context would
    /// actually use — the domain override if one matches, else the live
    /// global config, else the startup default. Used to label live-log
    /// entries with the strategy that produced them.
    pub async fn effective_strategy_name(&self, ctx: &SelectionContext) -> String {
        if let Some(domain) = &ctx.target_domain {
            if let Ok(Some(raw)) = self.pool.get_domain_override(domain).await {
                if let Ok(over) = serde_json::from_str::<DomainOverride>(&raw) {
                    return over.strategy;
                }
            }
        }
        self.pool
            .get_config("rotation_strategy")
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| self.default_strategy_name.clone())
    }

    /// Resolves the live `session_ttl`/`rotation_interval` knobs, preferring
    /// whatever the admin surface last wrote to the pool's config hash over
    /// the process's startup defaults.
    pub async fn context_knobs(&self, default_ttl: u64, default_interval: u64) -> (u64, u64) {
        let ttl = self
            .pool
            .get_config("session_ttl")
            .await
            .ok()
            .flatten()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default_ttl);
        let interval = self
            .pool
            .get_config("rotation_interval")
            .await
            .ok()
            .flatten()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default_interval);
        (ttl, interval)
    }

    /// Records a block against `proxy` — failure accounting plus the
    /// `blocks` stat, folding the old `/mark-block` endpoint in-process.
    pub async fn mark_block(&self, ip: &str, port: u16) -> Result<(), GengarError> {
        self.pool.record_failure(ip, port).await?;
        self.pool.mark_dead(ip, port).await?;
        self.pool.incr_stat("blocks", 1).await?;
        Ok(())
    }
}
