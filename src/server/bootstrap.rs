use crate::config::Config;
use crate::health::HealthChecker;
use crate::live::LiveFeed;
use crate::metrics::Metrics;
use crate::pool::ProxyPool;
use crate::rotation::RotationDispatcher;
use crate::scraper::Scraper;
use crate::server::{self, GatewayState};
use crate::store::memory::MemoryStore;
use crate::store::redis_store::RedisStore;
use crate::store::StateStore;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// CLI arguments forwarded from `main()`.
pub struct BootstrapArgs {
    pub config_path: std::path::PathBuf,
    pub listen: String,
    pub admin_listen: String,
}

/// Gateway lifecycle: init → build state → start background loops → serve →
/// shutdown (SPEC_FULL.md §2, §5).
pub async fn run(args: BootstrapArgs) -> Result<()> {
    init_tracing();
    let metrics = Metrics::install();

    let mut config = Config::load(&args.config_path)?;
    config.gateway.listen_addr = args.listen.clone();
    config.admin.listen_addr = args.admin_listen.clone();
    let config = Arc::new(config);

    let store = build_store(&config).await?;
    let pool = ProxyPool::new(store);
    let dispatcher = RotationDispatcher::new(pool.clone(), config.rotation.strategy.clone());
    let live = LiveFeed::new(pool.clone());
    let scraper = Arc::new(Scraper::new(
        pool.clone(),
        config.pool.min_pool_size,
        config.scraper.webshare_enabled,
        config.scraper.webshare_api_key.clone(),
    ));
    let health_checker = Arc::new(HealthChecker::new(
        pool.clone(),
        config.health_check.max_concurrent_checks,
        config.health_check.timeout_secs,
    ));

    let state = GatewayState::new(
        pool,
        dispatcher,
        live,
        config.clone(),
        metrics,
        scraper.clone(),
        health_checker.clone(),
    );

    let shutdown = Arc::new(Notify::new());

    // The scraper's periodic loop runs its first cycle immediately, then
    // every `refresh_interval_secs` — this is the startup scrape of
    // SPEC_FULL.md §4.E. It invokes the health checker once per cycle; the
    // health checker's own loop covers the interval-driven sweeps.
    start_scraper_loop(scraper, health_checker.clone(), config.scraper.refresh_interval_secs, &shutdown);
    start_health_check_loop(health_checker, config.health_check.interval_secs, &shutdown);

    tracing::info!("server: starting gateway, listen={}", config.gateway.listen_addr);
    let admin_handle = tokio::spawn({
        let state = state.clone();
        let listen = config.admin.listen_addr.clone();
        async move {
            if let Err(e) = server::run_admin_server(&listen, state).await {
                tracing::error!("server: admin server failed, error={}", e);
            }
        }
    });

    let proxy_handle = tokio::spawn({
        let listen = config.gateway.listen_addr.clone();
        let state = state.clone();
        let shutdown = shutdown.clone();
        async move { server::run_proxy_server(&listen, state, shutdown).await }
    });

    wait_for_shutdown_signal().await;
    tracing::info!("server: shutdown signal received");
    shutdown.notify_waiters();

    if let Err(e) = proxy_handle.await {
        tracing::error!("server: proxy task join error: {}", e);
    }
    admin_handle.abort();

    tracing::info!("server: shutdown complete");
    Ok(())
}

async fn build_store(config: &Config) -> Result<Arc<dyn StateStore>> {
    match config.store.backend.as_str() {
        "redis" => {
            let store = RedisStore::connect(&config.store.redis_url).await?;
            Ok(Arc::new(store))
        }
        _ => Ok(Arc::new(MemoryStore::new())),
    }
}

fn init_tracing() {
    let (non_blocking, _guard) = tracing_appender::non_blocking::NonBlockingBuilder::default()
        .buffered_lines_limit(128_000)
        .lossy(true)
        .finish(std::io::stdout());

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false)
                .json(),
        )
        .init();

    std::mem::forget(_guard);
}

fn start_scraper_loop(
    scraper: Arc<Scraper>,
    health_checker: Arc<HealthChecker>,
    interval_secs: u64,
    shutdown: &Arc<Notify>,
) {
    let shutdown = shutdown.clone();
    tokio::spawn(async move {
        scraper.run_periodic(interval_secs, &health_checker, &shutdown).await;
    });
}

fn start_health_check_loop(health_checker: Arc<HealthChecker>, interval_secs: u64, shutdown: &Arc<Notify>) {
    let shutdown = shutdown.clone();
    tokio::spawn(async move {
        health_checker.run_periodic(interval_secs, &shutdown).await;
    });
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("server: failed to install SIGTERM handler, error={}", e);
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
