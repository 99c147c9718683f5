#[cfg(test)]
mod tests;

use crate::health::HealthChecker;
use crate::pool::{Proxy, ProxyPool};
use futures_util::future::join_all;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Fixed ordered list of newline-delimited `ip:port` feeds, per SPEC_FULL.md §4.E.
const SOURCES: &[&str] = &[
    "https://raw.githubusercontent.com/TheSpeedX/PROXY-List/master/http.txt",
    "https://raw.githubusercontent.com/clarketm/proxy-list/master/proxy-list-raw.txt",
    "https://www.proxy-list.download/api/v1/get?type=http",
];

const SOURCE_FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const WEBSHARE_FETCH_LIMIT: usize = 25;

fn line_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{1,3}(?:\.\d{1,3}){3}):(\d{2,5})$").unwrap())
}

/// A single candidate parsed from a source feed, before dedup/merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub ip: String,
    pub port: u16,
    pub source: String,
}

/// Parse newline-delimited `ip:port` text, discarding malformed lines and
/// out-of-range ports. Stamps every candidate with `source`.
pub fn parse_feed(text: &str, source: &str) -> Vec<Candidate> {
    let re = line_pattern();
    text.lines()
        .filter_map(|line| {
            let line = line.trim();
            let caps = re.captures(line)?;
            let ip = caps.get(1)?.as_str().to_string();
            let port: u32 = caps.get(2)?.as_str().parse().ok()?;
            if port == 0 || port > 65535 {
                return None;
            }
            Some(Candidate {
                ip,
                port: port as u16,
                source: source.to_string(),
            })
        })
        .collect()
}

/// Dedupe a merged stream of candidates by canonical address, keeping the
/// first occurrence.
pub fn dedupe(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(candidates.len());
    for c in candidates {
        let addr = format!("{}:{}", c.ip, c.port);
        if seen.insert(addr) {
            out.push(c);
        }
    }
    out
}

fn hostname_of(url: &str) -> String {
    url.split("://")
        .nth(1)
        .and_then(|rest| rest.split('/').next())
        .unwrap_or(url)
        .to_string()
}

#[derive(Debug, Deserialize)]
struct WebshareProxyEntry {
    proxy_address: String,
    port: u16,
    #[serde(default)]
    country_code: String,
}

#[derive(Debug, Deserialize)]
struct WebshareResponse {
    results: Vec<WebshareProxyEntry>,
}

/// Multi-source fetch → dedupe → merge → probe → fallback pipeline that
/// keeps the pool populated, per SPEC_FULL.md §4.E.
pub struct Scraper {
    pool: ProxyPool,
    http: reqwest::Client,
    min_pool_size: usize,
    webshare_enabled: bool,
    webshare_api_key: Option<String>,
}

impl Scraper {
    pub fn new(
        pool: ProxyPool,
        min_pool_size: usize,
        webshare_enabled: bool,
        webshare_api_key: Option<String>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(SOURCE_FETCH_TIMEOUT)
            .build()
            .expect("failed to build scraper http client");
        Self {
            pool,
            http,
            min_pool_size,
            webshare_enabled,
            webshare_api_key,
        }
    }

    /// Run a full scrape → health-check cycle once.
    pub async fn run_once(&self, health_checker: &HealthChecker) -> anyhow::Result<()> {
        let fetches = SOURCES.iter().map(|url| self.fetch_source(url));
        let results = join_all(fetches).await;

        let mut candidates = Vec::new();
        for result in results {
            candidates.extend(result);
        }

        let merged = dedupe(candidates);
        info!("scraper: merged {} candidates from {} sources", merged.len(), SOURCES.len());

        let proxies: Vec<Proxy> = merged
            .into_iter()
            .map(|c| Proxy::new(c.ip, c.port, c.source))
            .collect();
        let yielded = proxies.len();
        self.pool.bulk_add(&proxies).await?;

        metrics::gauge!("gengar_scrape_last_yield").set(yielded as f64);
        metrics::counter!("gengar_scrape_total", "result" => "success").increment(1);

        health_checker.run_once().await?;

        let healthy = self.pool.healthy_count().await?;
        if healthy < self.min_pool_size && self.webshare_enabled {
            if let Err(e) = self.fetch_webshare_fallback().await {
                warn!("scraper: webshare fallback failed, error={}", e);
            }
        }

        Ok(())
    }

    /// Sleep `interval_secs` then run a cycle, forever. Exceptions are
    /// logged and swallowed so the loop never exits.
    pub async fn run_periodic(&self, interval_secs: u64, health_checker: &HealthChecker, shutdown: &tokio::sync::Notify) {
        loop {
            match self.run_once(health_checker).await {
                Ok(_) => {}
                Err(e) => {
                    warn!("scraper: cycle failed, error={}", e);
                    metrics::counter!("gengar_scrape_total", "result" => "error").increment(1);
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(interval_secs)) => {}
                _ = shutdown.notified() => return,
            }
        }
    }

    async fn fetch_source(&self, url: &str) -> Vec<Candidate> {
        let hostname = hostname_of(url);
        match tokio::time::timeout(SOURCE_FETCH_TIMEOUT, self.http.get(url).send()).await {
            Ok(Ok(resp)) => match resp.text().await {
                Ok(text) => parse_feed(&text, &hostname),
                Err(e) => {
                    warn!("scraper: source body read failed, url={}, error={}", url, e);
                    Vec::new()
                }
            },
            Ok(Err(e)) => {
                warn!("scraper: source fetch failed, url={}, error={}", url, e);
                Vec::new()
            }
            Err(_) => {
                warn!("scraper: source fetch timed out, url={}", url);
                Vec::new()
            }
        }
    }

    async fn fetch_webshare_fallback(&self) -> anyhow::Result<()> {
        let Some(api_key) = &self.webshare_api_key else {
            return Ok(());
        };

        let resp = self
            .http
            .get("https://proxy.webshare.io/api/v2/proxy/list/")
            .query(&[("mode", "direct"), ("page_size", "25")])
            .header("Authorization", format!("Token {api_key}"))
            .send()
            .await?;

        let parsed: WebshareResponse = resp.json().await?;
        let proxies: Vec<Proxy> = parsed
            .results
            .into_iter()
            .take(WEBSHARE_FETCH_LIMIT)
            .map(|entry| {
                let mut p = Proxy::new(entry.proxy_address, entry.port, "webshare");
                p.country = entry.country_code;
                p
            })
            .collect();

        debug!("scraper: webshare fallback yielded {} proxies", proxies.len());
        for proxy in proxies {
            self.pool.put(proxy).await?;
        }
        Ok(())
    }
}
