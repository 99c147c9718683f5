pub mod block;
pub mod connect;
mod context;

pub use context::{empty_body, full_body, json_error_body, BoxBody};

use crate::live::LiveRecord;
use crate::pool::Proxy;
use crate::rotation::SelectionContext;
use crate::server::GatewayState;
use bytes::Bytes;
use http::header::{CONNECTION, CONTENT_LENGTH, HOST, LOCATION, TRANSFER_ENCODING};
use http::{HeaderMap, Method, Request, Response, StatusCode, Uri};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tracing::warn;

const MAX_RETRIES: u32 = 3;
const FORWARD_TIMEOUT: Duration = Duration::from_secs(30);
const STRIPPED_REQUEST_HEADERS: &[&str] = &["host", "proxy-authorization", "proxy-connection", "x-session-id"];

/// Top-level entry point wired into the accept loop's `service_fn`: routes
/// CONNECT tunnels, the `/health` probe, and plain forward-proxy requests.
pub async fn handle_request(
    req: Request<Incoming>,
    state: GatewayState,
) -> Result<Response<BoxBody>, hyper::Error> {
    if req.method() == Method::CONNECT {
        return handle_connect_request(req, state).await;
    }

    if req.uri().path().ends_with("/health") {
        return Ok(health_response(&state));
    }

    Ok(handle_forward(req, state).await)
}

fn health_response(state: &GatewayState) -> Response<BoxBody> {
    let active = state.active_connections.load(Ordering::Relaxed);
    let body = format!(
        r#"{{"status":"ok","service":"gateway","active_connections":{active}}}"#
    );
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/json")
        .body(full_body(body))
        .unwrap()
}

async fn handle_connect_request(
    mut req: Request<Incoming>,
    state: GatewayState,
) -> Result<Response<BoxBody>, hyper::Error> {
    let Some((host, port)) = parse_connect_target(req.uri()) else {
        return Ok(Response::builder()
            .status(StatusCode::BAD_REQUEST)
            .body(empty_body())
            .unwrap());
    };

    match connect::establish(
        &host,
        port,
        &state.dispatcher,
        &state.live,
        state.config.rotation.session_ttl,
        state.config.rotation.rotation_interval,
    )
    .await
    {
        Some(upstream) => {
            let on_upgrade = hyper::upgrade::on(&mut req);
            tokio::spawn(async move {
                match on_upgrade.await {
                    Ok(upgraded) => connect::relay(upgraded, upstream).await,
                    Err(e) => warn!("gateway: connect: upgrade failed, error={}", e),
                }
            });
            Ok(Response::builder()
                .status(StatusCode::OK)
                .body(empty_body())
                .unwrap())
        }
        None => Ok(Response::builder()
            .status(StatusCode::BAD_GATEWAY)
            .body(empty_body())
            .unwrap()),
    }
}

fn parse_connect_target(uri: &Uri) -> Option<(String, u16)> {
    let authority = uri.authority()?;
    let host = authority.host().to_string();
    let port = authority.port_u16().unwrap_or(443);
    Some((host, port))
}

async fn handle_forward(req: Request<Incoming>, state: GatewayState) -> Response<BoxBody> {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let mut headers = req.headers().clone();

    let session_id = headers
        .get("x-session-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let target_domain = target_domain_of(&uri, &headers);

    let body_bytes = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => return json_response(StatusCode::BAD_REQUEST, &format!("could not read request body: {e}")),
    };

    let Some(full_url) = build_full_url(&uri, &headers) else {
        return json_response(StatusCode::BAD_REQUEST, "could not determine absolute request URL");
    };

    strip_request_headers(&mut headers);

    let (session_ttl, rotation_interval) = state
        .dispatcher
        .context_knobs(state.config.rotation.session_ttl, state.config.rotation.rotation_interval)
        .await;
    let ctx = SelectionContext {
        session_id,
        target_domain: target_domain.clone(),
        session_ttl,
        rotation_interval,
        country: None,
    };
    let strategy_name = state.dispatcher.effective_strategy_name(&ctx).await;

    let request_start = Instant::now();

    for attempt in 1..=MAX_RETRIES {
        let proxy = match state.dispatcher.select(&ctx).await {
            Ok(Some(p)) => p,
            Ok(None) | Err(_) => {
                metrics::counter!("gengar_rotation_exhausted_total").increment(1);
                metrics::counter!("gengar_requests_total", "outcome" => "no_proxy").increment(1);
                metrics::histogram!("gengar_request_duration_seconds")
                    .record(request_start.elapsed().as_secs_f64());
                return json_response(StatusCode::BAD_GATEWAY, "no healthy proxies available");
            }
        };

        let start = Instant::now();
        match forward_once(&proxy, &method, &full_url, &headers, body_bytes.clone()).await {
            Ok((status, resp_headers, resp_body)) => {
                let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
                let location = resp_headers.get(LOCATION).and_then(|v| v.to_str().ok());
                let body_text = String::from_utf8_lossy(&resp_body);
                let blocked = block::is_blocked(status.as_u16(), &body_text, location);

                publish_log(
                    &state,
                    method.as_str(),
                    &full_url,
                    target_domain.as_deref().unwrap_or(""),
                    &proxy,
                    Some(status.as_u16()),
                    latency_ms,
                    blocked,
                    attempt,
                    None,
                    &resp_headers,
                    &strategy_name,
                )
                .await;

                let framed = frame_response(status, &resp_headers, resp_body);

                if blocked {
                    let _ = state.dispatcher.mark_block(&proxy.ip, proxy.port).await;
                    metrics::counter!("gengar_blocks_total").increment(1);
                    if attempt == MAX_RETRIES {
                        metrics::counter!("gengar_requests_total", "outcome" => "blocked").increment(1);
                        metrics::histogram!("gengar_request_duration_seconds")
                            .record(request_start.elapsed().as_secs_f64());
                        return framed;
                    }
                    continue;
                }

                let _ = state.pool.record_success(&proxy.ip, proxy.port, latency_ms).await;
                metrics::counter!("gengar_requests_total", "outcome" => "ok").increment(1);
                metrics::histogram!("gengar_request_duration_seconds")
                    .record(request_start.elapsed().as_secs_f64());
                return framed;
            }
            Err(e) => {
                let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
                publish_log(
                    &state,
                    method.as_str(),
                    &full_url,
                    target_domain.as_deref().unwrap_or(""),
                    &proxy,
                    None,
                    latency_ms,
                    true,
                    attempt,
                    Some(e),
                    &HeaderMap::new(),
                    &strategy_name,
                )
                .await;
                let _ = state.dispatcher.mark_block(&proxy.ip, proxy.port).await;
                metrics::counter!("gengar_upstream_retries_total").increment(1);
            }
        }
    }

    metrics::counter!("gengar_requests_total", "outcome" => "exhausted").increment(1);
    metrics::histogram!("gengar_request_duration_seconds").record(request_start.elapsed().as_secs_f64());
    json_response(StatusCode::BAD_GATEWAY, "all retries exhausted")
}

async fn forward_once(
    proxy: &Proxy,
    method: &Method,
    url: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, HeaderMap, Bytes), String> {
    let client = build_forward_client(proxy).map_err(|e| e.to_string())?;
    let reqwest_method = reqwest::Method::from_bytes(method.as_str().as_bytes()).map_err(|e| e.to_string())?;

    let mut builder = client.request(reqwest_method, url);
    for (name, value) in headers.iter() {
        builder = builder.header(name.as_str(), value.as_bytes());
    }
    builder = builder.body(body.to_vec());

    let resp = builder.send().await.map_err(|e| e.to_string())?;
    let status = StatusCode::from_u16(resp.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);

    let mut out_headers = HeaderMap::new();
    for (name, value) in resp.headers().iter() {
        out_headers.append(name.clone(), value.clone());
    }

    let body_bytes = resp.bytes().await.map_err(|e| e.to_string())?;
    Ok((status, out_headers, body_bytes))
}

fn build_forward_client(proxy: &Proxy) -> Result<reqwest::Client, reqwest::Error> {
    let proxy_url = format!("http://{}", proxy.addr());
    let upstream = reqwest::Proxy::http(&proxy_url)?;
    reqwest::Client::builder()
        .proxy(upstream)
        .redirect(reqwest::redirect::Policy::none())
        .timeout(FORWARD_TIMEOUT)
        .build()
}

fn frame_response(status: StatusCode, headers: &HeaderMap, body: Bytes) -> Response<BoxBody> {
    let mut builder = Response::builder().status(status);
    for (name, value) in headers.iter() {
        if *name == TRANSFER_ENCODING || *name == CONNECTION || *name == CONTENT_LENGTH {
            continue;
        }
        builder = builder.header(name, value);
    }
    builder = builder.header(CONTENT_LENGTH, body.len());
    builder.body(full_body(body)).unwrap()
}

fn json_response(status: StatusCode, msg: &str) -> Response<BoxBody> {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(json_error_body(msg))
        .unwrap()
}

fn strip_request_headers(headers: &mut HeaderMap) {
    for name in STRIPPED_REQUEST_HEADERS {
        headers.remove(*name);
    }
}

/// Reconstructs the absolute upstream URL from an absolute-form request URI,
/// falling back to the `Host` header for origin-form requests.
fn build_full_url(uri: &Uri, headers: &HeaderMap) -> Option<String> {
    if uri.scheme().is_some() && uri.host().is_some() {
        return Some(uri.to_string());
    }
    let host = headers.get(HOST).and_then(|v| v.to_str().ok())?;
    let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    Some(format!("http://{host}{path}"))
}

fn target_domain_of(uri: &Uri, headers: &HeaderMap) -> Option<String> {
    uri.host()
        .map(str::to_string)
        .or_else(|| headers.get(HOST).and_then(|v| v.to_str().ok()).map(|h| h.split(':').next().unwrap_or(h).to_string()))
}

#[allow(clippy::too_many_arguments)]
async fn publish_log(
    state: &GatewayState,
    method: &str,
    url: &str,
    target_domain: &str,
    proxy: &Proxy,
    status: Option<u16>,
    latency_ms: f64,
    blocked: bool,
    attempt: u32,
    error: Option<String>,
    resp_headers: &HeaderMap,
    strategy_name: &str,
) {
    let response_headers = resp_headers
        .iter()
        .take(20)
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.to_string(), v.to_string())))
        .collect();

    let record = LiveRecord {
        ts: crate::util::now_rfc3339(),
        method: method.to_string(),
        url: url.to_string(),
        target_domain: target_domain.to_string(),
        proxy_ip: proxy.addr(),
        status,
        latency_ms,
        blocked,
        attempt,
        strategy: strategy_name.to_string(),
        error,
        response_headers,
    };
    let _ = state.live.publish(&record).await;
}
