use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

static INSTALLED: OnceLock<Metrics> = OnceLock::new();

/// Histogram bucket boundaries for latency metrics (seconds).
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Thin handle around the global metrics recorder.
///
/// After `Metrics::install()` the `metrics` crate macros (`counter!`, `gauge!`,
/// `histogram!`) can be used anywhere in the codebase. The `PrometheusHandle`
/// is retained solely for rendering the `/metrics` endpoint.
#[derive(Clone)]
pub struct Metrics {
    handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder and register metric descriptions.
    ///
    /// Must be called **once** per process before any `counter!` / `gauge!` /
    /// `histogram!` calls. Panics if a recorder is already installed — use
    /// [`Metrics::install_or_get_handle`] when that's a possibility (e.g. in
    /// tests that build multiple `GatewayState`s in one process).
    pub fn install() -> Self {
        let metrics = Self::install_uncached();
        let _ = INSTALLED.set(metrics.clone());
        metrics
    }

    /// Installs the recorder on first call; every later call in the same
    /// process returns a clone of the handle from the first install instead
    /// of panicking on a duplicate `install_recorder()`.
    pub fn install_or_get_handle() -> Self {
        if let Some(existing) = INSTALLED.get() {
            return existing.clone();
        }
        Self::install()
    }

    fn install_uncached() -> Self {
        let handle = PrometheusBuilder::new()
            .set_buckets_for_metric(
                metrics_exporter_prometheus::Matcher::Suffix("_duration_seconds".to_string()),
                LATENCY_BUCKETS,
            )
            .expect("valid matcher")
            .install_recorder()
            .expect("failed to install metrics recorder");

        // --- Describe all metrics (adds HELP / TYPE lines) ---

        // gateway request path
        describe_counter!(
            "gengar_requests_total",
            Unit::Count,
            "Total forward-proxy requests processed, by outcome"
        );
        describe_histogram!(
            "gengar_request_duration_seconds",
            Unit::Seconds,
            "Total request duration including retries, from client perspective"
        );
        describe_gauge!(
            "gengar_connections_active",
            Unit::Count,
            "Number of active downstream connections"
        );
        describe_counter!(
            "gengar_connections_total",
            Unit::Count,
            "Total connections accepted by the gateway listener"
        );
        describe_counter!(
            "gengar_connect_tunnels_total",
            Unit::Count,
            "Total CONNECT tunnels established, by outcome"
        );

        // rotation / retries
        describe_counter!(
            "gengar_upstream_retries_total",
            Unit::Count,
            "Total rotation retries performed after a blocked or failed attempt"
        );
        describe_counter!(
            "gengar_blocks_total",
            Unit::Count,
            "Total block detections, by reason"
        );
        describe_counter!(
            "gengar_rotation_exhausted_total",
            Unit::Count,
            "Total requests that found no healthy proxy available"
        );

        // pool / health
        describe_gauge!(
            "gengar_pool_size",
            Unit::Count,
            "Number of proxies currently known to the pool, by membership set"
        );
        describe_counter!(
            "gengar_health_check_total",
            Unit::Count,
            "Total health probe attempts, by outcome"
        );
        describe_histogram!(
            "gengar_health_check_duration_seconds",
            Unit::Seconds,
            "Duration of a single health probe"
        );

        // scraper
        describe_counter!(
            "gengar_scrape_total",
            Unit::Count,
            "Total scrape cycles, by outcome"
        );
        describe_gauge!(
            "gengar_scrape_last_yield",
            Unit::Count,
            "Number of new proxies merged by the most recent scrape cycle"
        );

        // admin
        describe_counter!(
            "gengar_admin_auth_failures_total",
            Unit::Count,
            "Total admin requests rejected for missing or invalid bearer token"
        );
        describe_counter!(
            "gengar_admin_requests_total",
            Unit::Count,
            "Total admin API requests, by endpoint and status"
        );

        Self { handle }
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}
