
use crate::pool::Proxy;
use crate::server::GatewayState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{header, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;

const MAX_REQUESTS_COUNT: usize = 500;
const STATS_WINDOW: usize = 100;
const REQ_PER_SEC_WINDOW_SECS: f64 = 60.0;

/// Builds the administrative REST + WebSocket surface. Every route except
/// `/health` and `/metrics` requires a matching `Authorization: Bearer`
/// token, per SPEC_FULL.md §6.
pub fn router(state: GatewayState) -> Router {
    let protected = Router::new()
        .route("/api/stats", get(get_stats))
        .route("/api/pool", get(get_pool))
        .route("/api/pool/flush", post(post_pool_flush))
        .route("/api/pool/refresh", post(post_pool_refresh))
        .route(
            "/api/rotation-rules",
            get(get_rotation_rules).post(post_rotation_rules),
        )
        .route(
            "/api/domain-overrides",
            get(get_domain_overrides).post(post_domain_overrides),
        )
        .route("/api/domain-overrides/:domain", delete(delete_domain_override))
        .route("/api/requests", get(get_requests))
        .route("/ws/live", get(ws_live))
        .route("/metrics", get(get_metrics))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer_auth));

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .with_state(state)
}

async fn require_bearer_auth(
    State(state): State<GatewayState>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let expected = format!("Bearer {}", state.config.admin.api_secret);
    let provided = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    if provided != Some(expected.as_str()) {
        metrics::counter!("gengar_admin_auth_failures_total").increment(1);
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "unauthorized"}))).into_response();
    }

    next.run(req).await
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn get_metrics(State(state): State<GatewayState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

#[derive(Serialize)]
struct StatsResponse {
    total_proxies: usize,
    healthy: usize,
    dead: usize,
    req_per_sec: f64,
    block_rate: f64,
    avg_latency_ms: f64,
    total_requests: u64,
    total_blocks: u64,
}

async fn get_stats(State(state): State<GatewayState>) -> Response {
    admin_endpoint("stats", async {
        let total_proxies = state.pool.pool_size().await?;
        let healthy = state.pool.healthy_count().await?;
        let dead = state.pool.dead_count().await?;
        let stats = state.pool.get_stats().await?;
        let recent = state.live.recent(STATS_WINDOW).await?;

        let total_requests: u64 = stats
            .get("requests")
            .and_then(|v| v.parse().ok())
            .filter(|&n| n > 0)
            .unwrap_or(recent.len() as u64);
        let total_blocks: u64 = stats.get("blocks").and_then(|v| v.parse().ok()).unwrap_or(0);
        let block_rate = if total_requests == 0 {
            0.0
        } else {
            total_blocks as f64 / total_requests as f64
        };

        let req_per_sec = {
            let in_last_minute = recent
                .iter()
                .filter(|r| {
                    crate::util::seconds_since_rfc3339(&r.ts)
                        .map(|age| age < REQ_PER_SEC_WINDOW_SECS)
                        .unwrap_or(false)
                })
                .count();
            in_last_minute as f64 / REQ_PER_SEC_WINDOW_SECS
        };

        let proxies = state.pool.get_all().await?;
        let avg_latency_ms = if proxies.is_empty() {
            0.0
        } else {
            proxies.iter().map(|p| p.latency_ms).sum::<f64>() / proxies.len() as f64
        };

        Ok(Json(StatsResponse {
            total_proxies,
            healthy,
            dead,
            req_per_sec,
            block_rate,
            avg_latency_ms,
            total_requests,
            total_blocks,
        }))
    })
    .await
}

#[derive(Deserialize)]
struct PoolQuery {
    #[serde(default)]
    page: Option<usize>,
    #[serde(default)]
    per_page: Option<usize>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Serialize)]
struct PoolResponse {
    page: usize,
    per_page: usize,
    total: usize,
    proxies: Vec<Proxy>,
}

async fn get_pool(State(state): State<GatewayState>, Query(q): Query<PoolQuery>) -> Response {
    admin_endpoint("pool list", async {
        let page = q.page.unwrap_or(1).max(1);
        let per_page = q.per_page.unwrap_or(50).clamp(1, 500);
        let status = q.status.unwrap_or_else(|| "all".to_string());

        let mut proxies = state.pool.get_all().await?;
        proxies.sort_by(|a, b| {
            b.health_score
                .partial_cmp(&a.health_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.latency_ms.partial_cmp(&b.latency_ms).unwrap_or(std::cmp::Ordering::Equal))
        });

        let mut filtered = Vec::with_capacity(proxies.len());
        for proxy in proxies.drain(..) {
            let dead = state.pool.is_dead(&proxy.addr()).await?;
            let keep = match status.as_str() {
                "healthy" => !dead,
                "dead" => dead,
                _ => true,
            };
            if keep {
                filtered.push(proxy);
            }
        }

        let total = filtered.len();
        let start = (page - 1) * per_page;
        let page_items = filtered.into_iter().skip(start).take(per_page).collect();

        Ok(Json(PoolResponse {
            page,
            per_page,
            total,
            proxies: page_items,
        }))
    })
    .await
}

async fn post_pool_flush(State(state): State<GatewayState>) -> Response {
    admin_endpoint("pool flush", async {
        let flushed = state.pool.flush_dead().await?;
        Ok(Json(json!({"flushed": flushed})))
    })
    .await
}

async fn post_pool_refresh(State(state): State<GatewayState>) -> Response {
    admin_endpoint("pool refresh", async {
        state
            .scraper
            .run_once(&state.health_checker)
            .await
            .map_err(|e| crate::error::GengarError::AdminUpstreamFailure(e.to_string()))?;
        Ok(Json(json!({"status": "refreshed"})))
    })
    .await
}

#[derive(Deserialize, Serialize)]
struct RotationRules {
    strategy: String,
    #[serde(default)]
    session_ttl: Option<u64>,
    #[serde(default)]
    rotation_interval: Option<u64>,
}

const VALID_STRATEGIES: &[&str] = &["per-request", "per-session", "time-based", "on-block", "round-robin"];

async fn get_rotation_rules(State(state): State<GatewayState>) -> Response {
    admin_endpoint("rotation rules", async {
        let strategy = state
            .pool
            .get_config("rotation_strategy")
            .await?
            .unwrap_or_else(|| state.config.rotation.strategy.clone());
        let session_ttl = state
            .pool
            .get_config("session_ttl")
            .await?
            .and_then(|v| v.parse().ok());
        let rotation_interval = state
            .pool
            .get_config("rotation_interval")
            .await?
            .and_then(|v| v.parse().ok());

        Ok(Json(RotationRules {
            strategy,
            session_ttl,
            rotation_interval,
        }))
    })
    .await
}

async fn post_rotation_rules(State(state): State<GatewayState>, Json(body): Json<RotationRules>) -> Response {
    if !VALID_STRATEGIES.contains(&body.strategy.as_str()) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": format!("unknown rotation strategy '{}'", body.strategy)})),
        )
            .into_response();
    }

    admin_endpoint("rotation rules update", async {
        state.pool.set_config("rotation_strategy", &body.strategy).await?;
        if let Some(ttl) = body.session_ttl {
            state.pool.set_config("session_ttl", &ttl.to_string()).await?;
        }
        if let Some(interval) = body.rotation_interval {
            state.pool.set_config("rotation_interval", &interval.to_string()).await?;
        }
        Ok(Json(json!({"status": "updated"})))
    })
    .await
}

async fn get_domain_overrides(State(state): State<GatewayState>) -> Response {
    admin_endpoint("domain overrides", async {
        let overrides = state.pool.get_domain_overrides().await?;
        let parsed: HashMap<String, Value> = overrides
            .into_iter()
            .filter_map(|(k, v)| serde_json::from_str(&v).ok().map(|parsed| (k, parsed)))
            .collect();
        Ok(Json(parsed))
    })
    .await
}

#[derive(Deserialize)]
struct DomainOverrideUpsert {
    domain: String,
    strategy: String,
    #[serde(default)]
    country: Option<String>,
}

async fn post_domain_overrides(
    State(state): State<GatewayState>,
    Json(body): Json<DomainOverrideUpsert>,
) -> Response {
    if !VALID_STRATEGIES.contains(&body.strategy.as_str()) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": format!("unknown rotation strategy '{}'", body.strategy)})),
        )
            .into_response();
    }

    admin_endpoint("domain override upsert", async {
        let value = json!({"strategy": body.strategy, "country": body.country}).to_string();
        state.pool.set_domain_override(&body.domain, &value).await?;
        Ok(Json(json!({"status": "updated"})))
    })
    .await
}

async fn delete_domain_override(State(state): State<GatewayState>, Path(domain): Path<String>) -> Response {
    admin_endpoint("domain override delete", async {
        state.pool.delete_domain_override(&domain).await?;
        Ok(Json(json!({"status": "deleted"})))
    })
    .await
}

#[derive(Deserialize)]
struct RequestsQuery {
    #[serde(default)]
    count: Option<usize>,
}

async fn get_requests(State(state): State<GatewayState>, Query(q): Query<RequestsQuery>) -> Response {
    admin_endpoint("requests", async {
        let count = q.count.unwrap_or(100).min(MAX_REQUESTS_COUNT);
        let records = state.live.recent(count).await?;
        Ok(Json(records))
    })
    .await
}

async fn ws_live(State(state): State<GatewayState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| stream_live(socket, state))
}

async fn stream_live(mut socket: WebSocket, state: GatewayState) {
    let Ok(mut rx) = state.live.subscribe().await else {
        let _ = socket.close().await;
        return;
    };

    loop {
        tokio::select! {
            msg = rx.recv() => {
                match msg {
                    Ok(text) => {
                        if socket.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
}

/// Runs a fallible admin handler body, converting `GengarError` into the
/// appropriate status code and incrementing the request counter once.
async fn admin_endpoint<F, T>(name: &str, fut: F) -> Response
where
    F: std::future::Future<Output = Result<Json<T>, crate::error::GengarError>>,
    T: Serialize,
{
    let result = fut.await;
    let status = match &result {
        Ok(_) => StatusCode::OK,
        Err(crate::error::GengarError::AdminBadRequest(_)) => StatusCode::BAD_REQUEST,
        Err(crate::error::GengarError::AdminUpstreamFailure(_)) => StatusCode::BAD_GATEWAY,
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    metrics::counter!("gengar_admin_requests_total", "endpoint" => name.to_string(), "status" => status.as_u16().to_string()).increment(1);

    match result {
        Ok(json) => (status, json).into_response(),
        Err(e) => (status, Json(json!({"error": e.to_string()}))).into_response(),
    }
}
