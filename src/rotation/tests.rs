use super::*;
use crate::store::memory::MemoryStore;
use std::collections::HashSet;
use std::sync::Arc;

fn pool() -> ProxyPool {
    ProxyPool::new(Arc::new(MemoryStore::new()))
}

async fn seed_five(pool: &ProxyPool) -> Vec<String> {
    let mut addrs = Vec::new();
    for i in 1..=5u8 {
        let ip = format!("10.0.0.{i}");
        let mut p = Proxy::new(&ip, 8080, "test");
        p.total_checks = 1;
        p.success_count = 1;
        p.health_score = 50.0 + i as f64;
        addrs.push(p.addr());
        pool.add(p).await.unwrap();
    }
    addrs
}

fn ctx() -> SelectionContext {
    SelectionContext {
        session_ttl: 300,
        rotation_interval: 60,
        ..Default::default()
    }
}

#[tokio::test]
async fn per_request_visits_more_than_one_proxy() {
    let pool = pool();
    seed_five(&pool).await;
    let strategy = RotationStrategy::from_name("per-request", pool);

    let mut seen = HashSet::new();
    for _ in 0..50 {
        let p = strategy.select(&ctx()).await.unwrap().unwrap();
        seen.insert(p.addr());
    }
    assert!(seen.len() > 1);
}

#[tokio::test]
async fn per_session_pins_and_rotates_on_death() {
    let pool = pool();
    seed_five(&pool).await;
    let strategy = RotationStrategy::from_name("per-session", pool.clone());

    let mut session_ctx = ctx();
    session_ctx.session_id = Some("s".to_string());

    let first = strategy.select(&session_ctx).await.unwrap().unwrap();
    let second = strategy.select(&session_ctx).await.unwrap().unwrap();
    assert_eq!(first.addr(), second.addr());

    pool.mark_dead(&first.ip, first.port).await.unwrap();
    let third = strategy.select(&session_ctx).await.unwrap().unwrap();
    assert_ne!(third.addr(), first.addr());
}

#[tokio::test]
async fn time_based_holds_then_rotates_after_interval() {
    let pool = pool();
    seed_five(&pool).await;
    let strategy = RotationStrategy::from_name("time-based", pool.clone());

    let first = strategy.select(&ctx()).await.unwrap().unwrap();
    let second = strategy.select(&ctx()).await.unwrap().unwrap();
    assert_eq!(first.addr(), second.addr());

    // Force the rotation timestamp into the past.
    pool.set_config("time_based_last_rotation", "0").await.unwrap();
    let before = pool.get_config("time_based_last_rotation").await.unwrap();
    let _third = strategy.select(&ctx()).await.unwrap().unwrap();
    let after = pool.get_config("time_based_last_rotation").await.unwrap();
    assert_ne!(before, after);
}

#[tokio::test]
async fn on_block_holds_then_rotates_on_death() {
    let pool = pool();
    seed_five(&pool).await;
    let strategy = RotationStrategy::from_name("on-block", pool.clone());

    let first = strategy.select(&ctx()).await.unwrap().unwrap();
    let second = strategy.select(&ctx()).await.unwrap().unwrap();
    assert_eq!(first.addr(), second.addr());

    pool.mark_dead(&first.ip, first.port).await.unwrap();
    let third = strategy.select(&ctx()).await.unwrap().unwrap();
    assert_ne!(third.addr(), first.addr());
}

#[tokio::test]
async fn round_robin_visits_all_then_repeats() {
    let pool = pool();
    seed_five(&pool).await;
    let strategy = RotationStrategy::from_name("round-robin", pool);

    let mut first_pass = Vec::new();
    for _ in 0..5 {
        first_pass.push(strategy.select(&ctx()).await.unwrap().unwrap().addr());
    }
    let distinct: HashSet<_> = first_pass.iter().cloned().collect();
    assert_eq!(distinct.len(), 5);

    let mut second_pass = Vec::new();
    for _ in 0..5 {
        second_pass.push(strategy.select(&ctx()).await.unwrap().unwrap().addr());
    }
    assert_eq!(first_pass, second_pass);
}

#[tokio::test]
async fn round_robin_literal_two_proxies() {
    let pool = pool();
    let mut a = Proxy::new("1.1.1.1", 8080, "test");
    a.total_checks = 1;
    a.success_count = 1;
    a.health_score = 90.0;
    pool.add(a).await.unwrap();
    let mut b = Proxy::new("2.2.2.2", 3128, "test");
    b.total_checks = 1;
    b.success_count = 1;
    b.health_score = 80.0;
    pool.add(b).await.unwrap();

    let strategy = RotationStrategy::from_name("round-robin", pool);
    let mut seq = Vec::new();
    for _ in 0..4 {
        seq.push(strategy.select(&ctx()).await.unwrap().unwrap().ip);
    }
    assert_eq!(seq, vec!["1.1.1.1", "2.2.2.2", "1.1.1.1", "2.2.2.2"]);
}

#[tokio::test]
async fn all_strategies_return_none_when_pool_empty() {
    let names = ["per-request", "per-session", "time-based", "on-block", "round-robin"];
    for name in names {
        let pool = pool();
        let strategy = RotationStrategy::from_name(name, pool);
        assert!(strategy.select(&ctx()).await.unwrap().is_none(), "{name} should return none");
    }
}

#[tokio::test]
async fn unknown_strategy_falls_back_to_per_request() {
    let pool = pool();
    seed_five(&pool).await;
    let strategy = RotationStrategy::from_name("nonexistent", pool);
    assert!(strategy.select(&ctx()).await.unwrap().is_some());
}

#[tokio::test]
async fn domain_override_dispatches_to_named_strategy() {
    let pool = pool();
    let mut a = Proxy::new("1.1.1.1", 8080, "test");
    a.total_checks = 1;
    a.success_count = 1;
    pool.add(a).await.unwrap();
    let mut b = Proxy::new("2.2.2.2", 3128, "test");
    b.total_checks = 1;
    b.success_count = 1;
    pool.add(b).await.unwrap();

    pool.set_domain_override("example.com", r#"{"strategy":"round-robin"}"#)
        .await
        .unwrap();

    let dispatcher = RotationDispatcher::new(pool, "per-request");
    let mut override_ctx = ctx();
    override_ctx.target_domain = Some("example.com".to_string());

    let first = dispatcher.select(&override_ctx).await.unwrap().unwrap();
    let second = dispatcher.select(&override_ctx).await.unwrap().unwrap();
    assert_ne!(first.addr(), second.addr());
}

#[tokio::test]
async fn dispatcher_picks_up_live_strategy_change() {
    let pool = pool();
    let mut a = Proxy::new("1.1.1.1", 8080, "test");
    a.total_checks = 1;
    a.success_count = 1;
    pool.add(a).await.unwrap();
    let mut b = Proxy::new("2.2.2.2", 3128, "test");
    b.total_checks = 1;
    b.success_count = 1;
    pool.add(b).await.unwrap();

    let dispatcher = RotationDispatcher::new(pool.clone(), "round-robin");
    let first = dispatcher.select(&ctx()).await.unwrap().unwrap();
    let second = dispatcher.select(&ctx()).await.unwrap().unwrap();
    assert_ne!(first.addr(), second.addr(), "round-robin should alternate");

    // Simulate an admin POST /api/rotation-rules switching the live strategy.
    pool.set_config("rotation_strategy", "on-block").await.unwrap();
    let third = dispatcher.select(&ctx()).await.unwrap().unwrap();
    let fourth = dispatcher.select(&ctx()).await.unwrap().unwrap();
    assert_eq!(third.addr(), fourth.addr(), "on-block should stick once the live config takes effect");
}

#[tokio::test]
async fn mark_block_increments_stats_and_marks_dead() {
    let pool = pool();
    let mut p = Proxy::new("1.1.1.1", 8080, "test");
    p.total_checks = 1;
    p.success_count = 1;
    pool.add(p).await.unwrap();

    let dispatcher = RotationDispatcher::new(pool.clone(), "per-request");
    dispatcher.mark_block("1.1.1.1", 8080).await.unwrap();

    assert!(pool.is_dead("1.1.1.1:8080").await.unwrap());
    let stats = pool.get_stats().await.unwrap();
    assert_eq!(stats.get("blocks").map(String::as_str), Some("1"));
}
