use super::*;
use crate::store::memory::MemoryStore;

fn pool() -> ProxyPool {
    ProxyPool::new(Arc::new(MemoryStore::new()))
}

async fn seed(pool: &ProxyPool, ip: &str, port: u16, score: f64, latency_ms: f64) {
    let mut p = Proxy::new(ip, port, "test");
    p.health_score = score;
    p.latency_ms = latency_ms;
    p.total_checks = 1;
    p.success_count = 1;
    pool.add(p).await.unwrap();
}

#[tokio::test]
async fn add_is_insert_if_absent() {
    let pool = pool();
    let mut first = Proxy::new("1.1.1.1", 8080, "feed-a");
    first.success_count = 5;
    first.total_checks = 5;
    pool.add(first).await.unwrap();

    let mut second = Proxy::new("1.1.1.1", 8080, "feed-b");
    second.success_count = 0;
    pool.add(second).await.unwrap();

    let stored = pool.get("1.1.1.1", 8080).await.unwrap().unwrap();
    assert_eq!(stored.source, "feed-a");
    assert_eq!(stored.success_count, 5);
}

#[tokio::test]
async fn healthy_and_dead_sets_are_disjoint_and_indexed() {
    let pool = pool();
    seed(&pool, "1.1.1.1", 8080, 90.0, 10.0).await;
    seed(&pool, "2.2.2.2", 3128, 10.0, 50.0).await;

    pool.mark_dead("1.1.1.1", 8080).await.unwrap();

    let healthy = pool.get_healthy(0.0).await.unwrap();
    assert!(healthy.iter().all(|p| p.addr() != "1.1.1.1:8080"));
    assert!(pool.is_dead("1.1.1.1:8080").await.unwrap());

    let all = pool.get_all().await.unwrap();
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn three_consecutive_failures_marks_dead() {
    let pool = pool();
    seed(&pool, "9.9.9.9", 80, 50.0, 1.0).await;

    pool.record_failure("9.9.9.9", 80).await.unwrap();
    pool.record_failure("9.9.9.9", 80).await.unwrap();
    assert!(!pool.is_dead("9.9.9.9:80").await.unwrap());

    pool.record_failure("9.9.9.9", 80).await.unwrap();
    assert!(pool.is_dead("9.9.9.9:80").await.unwrap());

    let proxy = pool.get("9.9.9.9", 80).await.unwrap().unwrap();
    assert_eq!(proxy.fail_count, 3);
    assert_eq!(proxy.consecutive_fails, 3);
    assert_eq!(proxy.total_checks, 4); // 1 seeded success + 3 failures

    // a subsequent success moves it back to healthy with consecutive_fails=0 (S4)
    pool.record_success("9.9.9.9", 80, 5.0).await.unwrap();
    assert!(!pool.is_dead("9.9.9.9:80").await.unwrap());
    let proxy = pool.get("9.9.9.9", 80).await.unwrap().unwrap();
    assert_eq!(proxy.consecutive_fails, 0);
}

#[tokio::test]
async fn record_success_resets_consecutive_fails_and_is_healthy() {
    let pool = pool();
    seed(&pool, "5.5.5.5", 80, 0.0, 1.0).await;
    pool.record_failure("5.5.5.5", 80).await.unwrap();
    pool.record_success("5.5.5.5", 80, 12.0).await.unwrap();

    let proxy = pool.get("5.5.5.5", 80).await.unwrap().unwrap();
    assert_eq!(proxy.consecutive_fails, 0);
    assert!(!pool.is_dead("5.5.5.5:80").await.unwrap());
    assert!(proxy.health_score > 0.0 && proxy.health_score <= 100.0);
}

#[tokio::test]
async fn health_score_and_checks_invariant_holds() {
    let pool = pool();
    seed(&pool, "1.2.3.4", 80, 0.0, 1.0).await;
    pool.record_success("1.2.3.4", 80, 3.0).await.unwrap();
    pool.record_failure("1.2.3.4", 80).await.unwrap();
    pool.record_success("1.2.3.4", 80, 4.0).await.unwrap();

    let p = pool.get("1.2.3.4", 80).await.unwrap().unwrap();
    assert_eq!(p.success_count + p.fail_count, p.total_checks);
    assert!((0.0..=100.0).contains(&p.health_score));
}

#[tokio::test]
async fn get_healthy_sorts_by_score_desc_then_latency_asc() {
    let pool = pool();
    seed(&pool, "1.1.1.1", 1, 50.0, 100.0).await;
    seed(&pool, "2.2.2.2", 2, 90.0, 10.0).await;
    seed(&pool, "3.3.3.3", 3, 90.0, 5.0).await;

    let healthy = pool.get_healthy(0.0).await.unwrap();
    assert_eq!(healthy[0].addr(), "3.3.3.3:3");
    assert_eq!(healthy[1].addr(), "2.2.2.2:2");
    assert_eq!(healthy[2].addr(), "1.1.1.1:1");
}

#[tokio::test]
async fn flush_dead_removes_and_counts() {
    let pool = pool();
    seed(&pool, "1.1.1.1", 1, 10.0, 1.0).await;
    seed(&pool, "2.2.2.2", 2, 10.0, 1.0).await;
    pool.mark_dead("1.1.1.1", 1).await.unwrap();
    pool.mark_dead("2.2.2.2", 2).await.unwrap();

    let flushed = pool.flush_dead().await.unwrap();
    assert_eq!(flushed, 2);
    assert_eq!(pool.pool_size().await.unwrap(), 0);
}

#[tokio::test]
async fn session_pin_round_trips_with_ttl() {
    let pool = pool();
    let proxy = Proxy::new("7.7.7.7", 80, "test");
    pool.set_session_proxy("sess-1", &proxy, 300).await.unwrap();
    let pinned = pool.get_session_proxy("sess-1").await.unwrap().unwrap();
    assert_eq!(pinned.addr(), "7.7.7.7:80");
}

#[tokio::test]
async fn round_robin_cursor_persists() {
    let pool = pool();
    assert_eq!(pool.get_rr_index().await.unwrap(), 0);
    pool.set_rr_index(3).await.unwrap();
    assert_eq!(pool.get_rr_index().await.unwrap(), 3);
}

#[tokio::test]
async fn stats_accumulate_across_calls() {
    let pool = pool();
    pool.incr_stat("requests", 1).await.unwrap();
    pool.incr_stat("requests", 1).await.unwrap();
    pool.incr_stat("blocks", 1).await.unwrap();
    let stats = pool.get_stats().await.unwrap();
    assert_eq!(stats.get("requests").unwrap(), "2");
    assert_eq!(stats.get("blocks").unwrap(), "1");
}

#[tokio::test]
async fn request_log_caps_at_500_newest_first() {
    let pool = pool();
    for i in 0..520 {
        pool.log_request(&format!("{{\"i\":{i}}}")).await.unwrap();
    }
    let recent = pool.get_recent_requests(500).await.unwrap();
    assert_eq!(recent.len(), 500);
    assert_eq!(recent[0], "{\"i\":519}");
}

#[tokio::test]
async fn domain_overrides_round_trip() {
    let pool = pool();
    pool.set_domain_override("example.com", "{\"strategy\":\"round-robin\"}")
        .await
        .unwrap();
    assert_eq!(
        pool.get_domain_override("example.com").await.unwrap(),
        Some("{\"strategy\":\"round-robin\"}".to_string())
    );
    pool.delete_domain_override("example.com").await.unwrap();
    assert_eq!(pool.get_domain_override("example.com").await.unwrap(), None);
}
