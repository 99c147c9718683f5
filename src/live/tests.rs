use super::*;
use crate::store::memory::MemoryStore;
use std::sync::Arc;

fn record(ip: &str) -> LiveRecord {
    LiveRecord {
        ts: "2026-07-28T00:00:00Z".to_string(),
        method: "GET".to_string(),
        url: "http://example.com/".to_string(),
        target_domain: "example.com".to_string(),
        proxy_ip: ip.to_string(),
        status: Some(200),
        latency_ms: 12.5,
        blocked: false,
        attempt: 1,
        strategy: "per-request".to_string(),
        error: None,
        response_headers: (0..30)
            .map(|i| (format!("h{i}"), format!("v{i}")))
            .collect(),
    }
}

#[test]
fn with_headers_capped_truncates_to_twenty() {
    let r = record("1.2.3.4").with_headers_capped();
    assert_eq!(r.response_headers.len(), 20);
}

#[tokio::test]
async fn publish_then_recent_round_trips() {
    let pool = ProxyPool::new(Arc::new(MemoryStore::new()));
    let feed = LiveFeed::new(pool);

    feed.publish(&record("1.2.3.4")).await.unwrap();
    feed.publish(&record("5.6.7.8")).await.unwrap();

    let recent = feed.recent(10).await.unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].proxy_ip, "5.6.7.8");
    assert_eq!(recent[1].proxy_ip, "1.2.3.4");
}

#[tokio::test]
async fn subscribe_receives_published_record() {
    let pool = ProxyPool::new(Arc::new(MemoryStore::new()));
    let feed = LiveFeed::new(pool);

    let mut rx = feed.subscribe().await.unwrap();
    feed.publish(&record("9.9.9.9")).await.unwrap();

    let msg = rx.recv().await.unwrap();
    let parsed: LiveRecord = serde_json::from_str(&msg).unwrap();
    assert_eq!(parsed.proxy_ip, "9.9.9.9");
}
