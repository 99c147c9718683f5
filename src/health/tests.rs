use super::*;
use crate::store::memory::MemoryStore;
use std::sync::Arc;

#[tokio::test]
async fn run_once_on_empty_pool_reports_zero() {
    let pool = ProxyPool::new(Arc::new(MemoryStore::new()));
    let checker = HealthChecker::new(pool, 8, 2);
    let report = checker.run_once().await.unwrap();
    assert_eq!(report.total, 0);
    assert_eq!(report.healthy, 0);
    assert_eq!(report.dead, 0);
}

#[test]
fn probe_client_builds_with_valid_upstream() {
    let client = build_probe_client("1.2.3.4", 8080, Duration::from_secs(8));
    assert!(client.is_ok());
}

#[tokio::test]
async fn apply_failure_evicts_after_three_consecutive_fails() {
    use crate::pool::Proxy;

    let pool = ProxyPool::new(Arc::new(MemoryStore::new()));
    pool.add(Proxy::new("9.9.9.9", 8080, "test")).await.unwrap();

    apply_failure(&pool, "9.9.9.9", 8080).await;
    apply_failure(&pool, "9.9.9.9", 8080).await;
    assert!(pool.get("9.9.9.9", 8080).await.unwrap().is_some());

    apply_failure(&pool, "9.9.9.9", 8080).await;
    assert!(pool.get("9.9.9.9", 8080).await.unwrap().is_none());
    assert_eq!(pool.pool_size().await.unwrap(), 0);
}
