use super::memory::MemoryStore;
use super::{StateStore, StoreOp, StoreValue};
use std::sync::Arc;

/// Conformance suite exercised against the trait, not the concrete type.
/// Only the in-process mock is wired in here — the redis-backed
/// implementation shares these same assertions but requires a live server,
/// so it isn't exercised in unit tests (SPEC_FULL.md §4.A).
fn store() -> Arc<dyn StateStore> {
    Arc::new(MemoryStore::new())
}

#[tokio::test]
async fn string_get_set_roundtrip() {
    let s = store();
    assert_eq!(s.get("missing").await.unwrap(), None);
    s.set("k", "v1").await.unwrap();
    assert_eq!(s.get("k").await.unwrap(), Some("v1".to_string()));
    s.set("k", "v2").await.unwrap();
    assert_eq!(s.get("k").await.unwrap(), Some("v2".to_string()));
}

#[tokio::test]
async fn setnx_only_writes_once() {
    let s = store();
    assert!(s.setnx("k", "first").await.unwrap());
    assert!(!s.setnx("k", "second").await.unwrap());
    assert_eq!(s.get("k").await.unwrap(), Some("first".to_string()));
}

#[tokio::test]
async fn set_ex_expires() {
    let s = store();
    s.set_ex("k", "v", 0).await.unwrap();
    // a zero-second TTL should already be expired on next read
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    assert_eq!(s.get("k").await.unwrap(), None);
}

#[tokio::test]
async fn del_clears_all_representations() {
    let s = store();
    s.set("k", "v").await.unwrap();
    s.hset("k", "f", "v").await.unwrap();
    s.sadd("k", "m").await.unwrap();
    s.lpush("k", "x").await.unwrap();
    s.del("k").await.unwrap();
    assert_eq!(s.get("k").await.unwrap(), None);
    assert!(s.hgetall("k").await.unwrap().is_empty());
    assert!(s.smembers("k").await.unwrap().is_empty());
    assert!(s.lrange("k", 0, -1).await.unwrap().is_empty());
}

#[tokio::test]
async fn hash_operations() {
    let s = store();
    s.hset("h", "a", "1").await.unwrap();
    s.hset("h", "b", "2").await.unwrap();
    assert_eq!(s.hget("h", "a").await.unwrap(), Some("1".to_string()));
    let all = s.hgetall("h").await.unwrap();
    assert_eq!(all.len(), 2);
    s.hdel("h", "a").await.unwrap();
    assert_eq!(s.hget("h", "a").await.unwrap(), None);
}

#[tokio::test]
async fn hincrby_is_cumulative() {
    let s = store();
    assert_eq!(s.hincrby("stats", "requests", 1).await.unwrap(), 1);
    assert_eq!(s.hincrby("stats", "requests", 4).await.unwrap(), 5);
    assert_eq!(s.hincrby("stats", "blocks", -1).await.unwrap(), -1);
}

#[tokio::test]
async fn set_membership() {
    let s = store();
    s.sadd("idx", "a:1").await.unwrap();
    s.sadd("idx", "b:2").await.unwrap();
    assert_eq!(s.scard("idx").await.unwrap(), 2);
    assert!(s.sismember("idx", "a:1").await.unwrap());
    s.srem("idx", "a:1").await.unwrap();
    assert!(!s.sismember("idx", "a:1").await.unwrap());
    assert_eq!(s.scard("idx").await.unwrap(), 1);
}

#[tokio::test]
async fn list_push_trim_range_matches_bounded_ring_semantics() {
    let s = store();
    for i in 0..10 {
        s.lpush("log", &format!("entry-{i}")).await.unwrap();
    }
    // newest at head
    let all = s.lrange("log", 0, -1).await.unwrap();
    assert_eq!(all[0], "entry-9");
    assert_eq!(all.len(), 10);

    s.ltrim("log", 0, 4).await.unwrap();
    let trimmed = s.lrange("log", 0, -1).await.unwrap();
    assert_eq!(trimmed.len(), 5);
    assert_eq!(trimmed[0], "entry-9");
    assert_eq!(trimmed[4], "entry-5");
}

#[tokio::test]
async fn publish_subscribe_delivers_in_order() {
    let s = store();
    let mut rx = s.subscribe("live_requests").await.unwrap();
    s.publish("live_requests", "one").await.unwrap();
    s.publish("live_requests", "two").await.unwrap();
    assert_eq!(rx.recv().await.unwrap(), "one");
    assert_eq!(rx.recv().await.unwrap(), "two");
}

#[tokio::test]
async fn late_subscriber_misses_backlog() {
    let s = store();
    s.publish("topic", "missed").await.unwrap();
    let mut rx = s.subscribe("topic").await.unwrap();
    s.publish("topic", "seen").await.unwrap();
    assert_eq!(rx.recv().await.unwrap(), "seen");
}

#[tokio::test]
async fn pipeline_executes_in_order_and_reports_per_op_results() {
    let s = store();
    let results = s
        .pipeline(vec![
            StoreOp::SetNx("p:1".to_string(), "a".to_string()),
            StoreOp::SetNx("p:1".to_string(), "b".to_string()),
            StoreOp::Get("p:1".to_string()),
            StoreOp::SAdd("idx".to_string(), "p:1".to_string()),
        ])
        .await
        .unwrap();

    assert_eq!(results[0], StoreValue::Bool(true));
    assert_eq!(results[1], StoreValue::Bool(false));
    assert_eq!(results[2], StoreValue::Str(Some("a".to_string())));
    assert_eq!(results[3], StoreValue::Ok);
}
