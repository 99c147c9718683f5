pub mod bootstrap;
pub mod runtime;
mod state;

pub use state::GatewayState;

use crate::gateway;
use anyhow::Result;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{Notify, Semaphore};
use tracing::{error, info};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(500);
const DRAIN_POLLS: u32 = 60;

/// Runs the forward-proxy listener with graceful shutdown support.
///
/// Accepts are gated by a semaphore of width `max_connections`
/// (SPEC_FULL.md §5): once the budget is exhausted, the accept loop itself
/// blocks rather than the individual connection handlers. When `shutdown` is
/// notified, the loop stops accepting and waits up to `DRAIN_TIMEOUT` for
/// in-flight connections to finish before returning.
pub async fn run_proxy_server(listen: &str, state: GatewayState, shutdown: Arc<Notify>) -> Result<()> {
    let addr: SocketAddr = listen.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("server: proxy listening, addr={}", addr);

    let max_connections = state.config.gateway.max_connections;
    let gate = Arc::new(Semaphore::new(max_connections));

    loop {
        let permit = tokio::select! {
            p = gate.clone().acquire_owned() => p.expect("semaphore never closed"),
            _ = shutdown.notified() => {
                info!("server: proxy: stop accepting new connections, draining...");
                break;
            }
        };

        let accepted = tokio::select! {
            result = listener.accept() => result,
            _ = shutdown.notified() => {
                drop(permit);
                info!("server: proxy: stop accepting new connections, draining...");
                break;
            }
        };

        let (stream, peer_addr) = match accepted {
            Ok(v) => v,
            Err(e) => {
                error!("server: proxy: accept failed, error={}", e);
                drop(permit);
                continue;
            }
        };

        metrics::counter!("gengar_connections_total", "status" => "accepted").increment(1);
        metrics::gauge!("gengar_connections_active").increment(1.0);
        state.active_connections.fetch_add(1, Ordering::Relaxed);

        let state = state.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let io = TokioIo::new(stream);
            let svc = service_fn(move |req: Request<Incoming>| {
                let state = state.clone();
                async move { gateway::handle_request(req, state).await }
            });

            if let Err(e) = auto::Builder::new(TokioExecutor::new())
                .http1()
                .keep_alive(true)
                .serve_connection_with_upgrades(io, svc)
                .await
            {
                if !e.to_string().contains("connection closed") {
                    error!(
                        "server: proxy: connection error, peer={}, error={}",
                        peer_addr, e
                    );
                }
            }

            metrics::gauge!("gengar_connections_active").decrement(1.0);
            state.active_connections.fetch_sub(1, Ordering::Relaxed);
        });
    }

    drain(&state, max_connections, &gate).await;
    Ok(())
}

/// Waits for in-flight connections to finish by reacquiring every permit of
/// `gate`, up to `DRAIN_TIMEOUT`. Mirrors the 60 x 0.5s poll ladder of
/// SPEC_FULL.md §5 rather than a single long sleep, so draining can observe
/// progress.
async fn drain(state: &GatewayState, max_connections: usize, gate: &Arc<Semaphore>) {
    let active = state.active_connections.load(Ordering::Relaxed);
    if active <= 0 {
        return;
    }
    info!("server: proxy: waiting for {} active connections to drain", active);

    let wait_all = gate.acquire_many(max_connections as u32);
    match tokio::time::timeout(DRAIN_TIMEOUT, wait_all).await {
        Ok(Ok(permits)) => {
            drop(permits);
            info!("server: proxy: all connections drained");
        }
        _ => {
            for _ in 0..DRAIN_POLLS {
                if state.active_connections.load(Ordering::Relaxed) <= 0 {
                    break;
                }
                tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
            }
            let remaining = state.active_connections.load(Ordering::Relaxed);
            if remaining > 0 {
                info!(
                    "server: proxy: drain timeout ({}s), {} connections abandoned",
                    DRAIN_TIMEOUT.as_secs(),
                    remaining
                );
            }
        }
    }
}

/// Runs the administrative REST + WebSocket surface (`crate::admin::router`).
pub async fn run_admin_server(listen: &str, state: GatewayState) -> Result<()> {
    let addr: SocketAddr = listen.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("server: admin listening, addr={}", addr);

    let app = crate::admin::router(state);
    axum::serve(listener, app).await?;
    Ok(())
}
