use crate::config::Config;
use crate::health::HealthChecker;
use crate::live::LiveFeed;
use crate::metrics::Metrics;
use crate::pool::ProxyPool;
use crate::rotation::RotationDispatcher;
use crate::scraper::Scraper;
use std::sync::atomic::AtomicI64;
use std::sync::Arc;

/// Shared, cheaply-cloneable state handed to every accepted connection and to
/// the admin surface: the proxy pool, the rotation engine, the live fan-out,
/// the scraper/health-checker handles (for the on-demand refresh endpoint),
/// and the process-wide config. Threaded through `service_fn` the same way
/// on every connection.
#[derive(Clone)]
pub struct GatewayState {
    pub pool: ProxyPool,
    pub dispatcher: RotationDispatcher,
    pub live: LiveFeed,
    pub config: Arc<Config>,
    pub metrics: Metrics,
    pub scraper: Arc<Scraper>,
    pub health_checker: Arc<HealthChecker>,
    pub active_connections: Arc<AtomicI64>,
}

impl GatewayState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: ProxyPool,
        dispatcher: RotationDispatcher,
        live: LiveFeed,
        config: Arc<Config>,
        metrics: Metrics,
        scraper: Arc<Scraper>,
        health_checker: Arc<HealthChecker>,
    ) -> Self {
        Self {
            pool,
            dispatcher,
            live,
            config,
            metrics,
            scraper,
            health_checker,
            active_connections: Arc::new(AtomicI64::new(0)),
        }
    }
}
