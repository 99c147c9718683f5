use crate::live::{LiveFeed, LiveRecord};
use crate::pool::Proxy;
use crate::rotation::{RotationDispatcher, SelectionContext};
use hyper::upgrade::Upgraded;
use hyper_util::rt::TokioIo;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

const MAX_ATTEMPTS: u32 = 3;
const DIAL_TIMEOUT: Duration = Duration::from_secs(10);
const HANDSHAKE_LINE_TIMEOUT: Duration = Duration::from_secs(10);
const RELAY_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Dial a rotating upstream and perform the CONNECT handshake, retrying up
/// to `MAX_ATTEMPTS` times against a freshly-selected proxy each time.
/// Returns the live upstream socket on success, so the caller can upgrade
/// the client connection only once a tunnel is actually available.
pub async fn establish(
    host: &str,
    port: u16,
    dispatcher: &RotationDispatcher,
    live: &LiveFeed,
    default_session_ttl: u64,
    default_rotation_interval: u64,
) -> Option<TcpStream> {
    let target = format!("{host}:{port}");
    let (session_ttl, rotation_interval) = dispatcher
        .context_knobs(default_session_ttl, default_rotation_interval)
        .await;
    let ctx = SelectionContext {
        target_domain: Some(host.to_string()),
        session_ttl,
        rotation_interval,
        ..Default::default()
    };
    let strategy_name = dispatcher.effective_strategy_name(&ctx).await;

    for attempt in 1..=MAX_ATTEMPTS {
        let proxy = match dispatcher.select(&ctx).await {
            Ok(Some(p)) => p,
            Ok(None) | Err(_) => {
                metrics::counter!("gengar_rotation_exhausted_total").increment(1);
                continue;
            }
        };

        match dial_and_handshake(&proxy, host, port).await {
            Ok(upstream) => {
                publish_connect_log(live, &proxy, &target, attempt, true, None, &strategy_name).await;
                metrics::counter!("gengar_connect_tunnels_total", "outcome" => "ok").increment(1);
                return Some(upstream);
            }
            Err(e) => {
                let _ = dispatcher.mark_block(&proxy.ip, proxy.port).await;
                publish_connect_log(live, &proxy, &target, attempt, false, Some(e), &strategy_name).await;
                metrics::counter!("gengar_connect_tunnels_total", "outcome" => "failed").increment(1);
            }
        }
    }

    metrics::counter!("gengar_connect_tunnels_total", "outcome" => "exhausted").increment(1);
    None
}

/// Bidirectionally relay bytes between the now-upgraded client connection
/// and an already-established upstream tunnel, until either side closes or
/// goes idle past `RELAY_IDLE_TIMEOUT`.
pub async fn relay(client_io: Upgraded, upstream: TcpStream) {
    let client_io = TokioIo::new(client_io);
    let (mut client_rd, mut client_wr) = tokio::io::split(client_io);
    let (mut up_rd, mut up_wr) = upstream.into_split();

    let client_to_up = async {
        let mut buf = [0u8; 8192];
        loop {
            let read = match timeout(RELAY_IDLE_TIMEOUT, client_rd.read(&mut buf)).await {
                Ok(Ok(0)) | Err(_) => break,
                Ok(Ok(n)) => n,
                Ok(Err(_)) => break,
            };
            if up_wr.write_all(&buf[..read]).await.is_err() {
                break;
            }
        }
        let _ = up_wr.shutdown().await;
    };

    let up_to_client = async {
        let mut buf = [0u8; 8192];
        loop {
            let read = match timeout(RELAY_IDLE_TIMEOUT, up_rd.read(&mut buf)).await {
                Ok(Ok(0)) | Err(_) => break,
                Ok(Ok(n)) => n,
                Ok(Err(_)) => break,
            };
            if client_wr.write_all(&buf[..read]).await.is_err() {
                break;
            }
        }
        let _ = client_wr.shutdown().await;
    };

    tokio::join!(client_to_up, up_to_client);
    debug!("gateway: connect: relay finished");
}

async fn dial_and_handshake(proxy: &Proxy, host: &str, port: u16) -> Result<TcpStream, String> {
    let addr = proxy.addr();
    let mut stream = timeout(DIAL_TIMEOUT, TcpStream::connect(&addr))
        .await
        .map_err(|_| "connect timeout".to_string())?
        .map_err(|e| e.to_string())?;

    let request = format!("CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n\r\n");
    timeout(HANDSHAKE_LINE_TIMEOUT, stream.write_all(request.as_bytes()))
        .await
        .map_err(|_| "write timeout".to_string())?
        .map_err(|e| e.to_string())?;

    let status_line = {
        let mut reader = BufReader::new(&mut stream);
        let status_line = read_line(&mut reader).await?;
        loop {
            let line = read_line(&mut reader).await?;
            if line.trim().is_empty() {
                break;
            }
        }
        status_line
    };

    if status_line.contains("200") {
        Ok(stream)
    } else {
        Err(format!("non-200 status line: {}", status_line.trim()))
    }
}

async fn read_line<R: tokio::io::AsyncBufRead + Unpin>(reader: &mut R) -> Result<String, String> {
    use tokio::io::AsyncBufReadExt;
    let mut line = String::new();
    let n = timeout(HANDSHAKE_LINE_TIMEOUT, reader.read_line(&mut line))
        .await
        .map_err(|_| "handshake read timeout".to_string())?
        .map_err(|e| e.to_string())?;
    if n == 0 {
        return Err("upstream closed during handshake".to_string());
    }
    Ok(line)
}

async fn publish_connect_log(
    live: &LiveFeed,
    proxy: &Proxy,
    target: &str,
    attempt: u32,
    ok: bool,
    error: Option<String>,
    strategy_name: &str,
) {
    let record = LiveRecord {
        ts: crate::util::now_rfc3339(),
        method: "CONNECT".to_string(),
        url: target.to_string(),
        target_domain: target.to_string(),
        proxy_ip: proxy.addr(),
        status: if ok { Some(200) } else { None },
        latency_ms: 0.0,
        blocked: !ok,
        attempt,
        strategy: strategy_name.to_string(),
        error,
        response_headers: Vec::new(),
    };
    let _ = live.publish(&record).await;
}
