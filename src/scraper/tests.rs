use super::*;

#[test]
fn parse_feed_discards_malformed_and_out_of_range() {
    let text = "1.2.3.4:8080\n1.2.3.4:8080\nbad\n5.6.7.8:70000\n";
    let candidates = parse_feed(text, "example.com");
    assert_eq!(candidates.len(), 2);
    assert_eq!(candidates[0].ip, "1.2.3.4");
    assert_eq!(candidates[0].port, 8080);
    assert_eq!(candidates[1].ip, "1.2.3.4");
}

#[test]
fn dedupe_keeps_first_occurrence_by_canonical_address() {
    let text = "1.2.3.4:8080\n1.2.3.4:8080\nbad\n5.6.7.8:70000\n";
    let candidates = parse_feed(text, "example.com");
    let merged = dedupe(candidates);
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].ip, "1.2.3.4");
    assert_eq!(merged[0].port, 8080);
}

#[test]
fn dedupe_preserves_source_of_first_occurrence() {
    let mut first = parse_feed("9.9.9.9:80\n", "alpha.example");
    let second = parse_feed("9.9.9.9:80\n", "beta.example");
    first.extend(second);
    let merged = dedupe(first);
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].source, "alpha.example");
}

#[test]
fn hostname_of_strips_scheme_and_path() {
    assert_eq!(hostname_of("https://example.com/http.txt"), "example.com");
    assert_eq!(hostname_of("http://1.2.3.4/a/b?c=d"), "1.2.3.4");
}

#[tokio::test]
async fn run_once_ingests_sources_via_insert_if_absent() {
    use crate::health::HealthChecker;
    use crate::store::memory::MemoryStore;
    use std::sync::Arc;

    let pool = ProxyPool::new(Arc::new(MemoryStore::new()));
    let checker = HealthChecker::new(pool.clone(), 8, 2);
    let scraper = Scraper::new(pool.clone(), 20, false, None);

    // No network access in this test context: fetch_source swallows transport
    // errors and yields an empty candidate list, so run_once must still
    // complete cleanly against an offline pool.
    scraper.run_once(&checker).await.unwrap();
    assert_eq!(pool.pool_size().await.unwrap(), 0);
}

#[tokio::test]
async fn webshare_fallback_is_skipped_without_api_key() {
    use crate::store::memory::MemoryStore;
    use std::sync::Arc;

    let pool = ProxyPool::new(Arc::new(MemoryStore::new()));
    let scraper = Scraper::new(pool.clone(), 20, true, None);
    scraper.fetch_webshare_fallback().await.unwrap();
    assert_eq!(pool.pool_size().await.unwrap(), 0);
}
