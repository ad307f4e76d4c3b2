// Proxy pool: harvest free proxy lists, geotag, upsert into the proxy table

use crate::data::Database;
use crate::error::Result;
use futures::stream::{self, StreamExt};
use reqwest::Client;
use std::collections::HashSet;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_PROXY_SOURCES: &[&str] = &[
    "https://raw.githubusercontent.com/TheSpeedX/PROXY-List/master/http.txt",
    "https://raw.githubusercontent.com/clarketm/proxy-list/master/proxy-list-raw.txt",
];

pub const DEFAULT_GEO_ENDPOINT: &str = "https://ipapi.co";

#[derive(Debug, Clone)]
pub struct ProxyPoolOptions {
    pub sources: Vec<String>,
    /// Base URL of the country lookup; `None` skips geotagging.
    pub geo_endpoint: Option<String>,
    pub feed_timeout: Duration,
    pub geo_timeout: Duration,
    pub lookup_concurrency: usize,
    pub proxy_type: String,
}

impl Default for ProxyPoolOptions {
    fn default() -> Self {
        Self {
            sources: DEFAULT_PROXY_SOURCES.iter().map(|s| s.to_string()).collect(),
            geo_endpoint: Some(DEFAULT_GEO_ENDPOINT.to_string()),
            feed_timeout: Duration::from_secs(15),
            geo_timeout: Duration::from_secs(5),
            lookup_concurrency: 8,
            proxy_type: "anonymous".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyCandidate {
    pub ip: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeotaggedProxy {
    pub candidate: ProxyCandidate,
    pub country: Option<String>,
}

/// Parse newline-delimited `ip:port` entries, skipping anything else.
pub fn parse_candidates(text: &str) -> Vec<ProxyCandidate> {
    text.lines()
        .filter_map(|line| {
            let (ip, port) = line.trim().rsplit_once(':')?;
            let ip: IpAddr = ip.trim_matches(|c| c == '[' || c == ']').parse().ok()?;
            let port: u16 = port.parse().ok().filter(|&p| p != 0)?;
            Some(ProxyCandidate {
                ip: ip.to_string(),
                port,
            })
        })
        .collect()
}

/// Lookup bodies are expected to hold a two-letter country code.
pub fn normalize_country(body: &str) -> Option<String> {
    let code: String = body.trim().chars().take(2).collect::<String>().to_uppercase();
    (code.len() == 2 && code.chars().all(|c| c.is_ascii_alphabetic())).then_some(code)
}

/// Read contract for crawls: connection strings for every proxy on file.
pub fn list_proxies(db: &Database) -> Result<Vec<String>> {
    Ok(db.proxy_connection_strings()?)
}

pub struct ProxyPool {
    client: Client,
    options: ProxyPoolOptions,
}

impl ProxyPool {
    pub fn new(options: ProxyPoolOptions) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("trawler/", env!("CARGO_PKG_VERSION")))
            .timeout(options.feed_timeout)
            .build()?;
        Ok(Self { client, options })
    }

    pub fn options(&self) -> &ProxyPoolOptions {
        &self.options
    }

    async fn fetch_feed(&self, source: &str) -> reqwest::Result<String> {
        self.client
            .get(source)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
    }

    /// Deduplicated candidates across all feeds. A failing feed contributes
    /// nothing and does not affect the others.
    pub async fn fetch_candidates(&self) -> HashSet<ProxyCandidate> {
        let mut candidates = HashSet::new();
        for source in &self.options.sources {
            match self.fetch_feed(source).await {
                Ok(text) => {
                    let parsed = parse_candidates(&text);
                    debug!("{} candidates from {}", parsed.len(), source);
                    candidates.extend(parsed);
                }
                Err(e) => warn!("Failed to fetch proxy list from {}: {}", source, e),
            }
        }
        candidates
    }

    /// Best effort; any failure means "unknown".
    pub async fn lookup_country(&self, ip: &str) -> Option<String> {
        let endpoint = self.options.geo_endpoint.as_deref()?;
        let url = format!("{}/{}/country/", endpoint.trim_end_matches('/'), ip);

        let response = self
            .client
            .get(&url)
            .timeout(self.options.geo_timeout)
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            debug!("Country lookup for {} answered {}", ip, response.status());
            return None;
        }
        normalize_country(&response.text().await.ok()?)
    }

    pub async fn gather(&self) -> Vec<GeotaggedProxy> {
        let candidates = self.fetch_candidates().await;
        info!("Geotagging {} proxy candidates", candidates.len());

        stream::iter(candidates)
            .map(|candidate| async move {
                let country = self.lookup_country(&candidate.ip).await;
                GeotaggedProxy { candidate, country }
            })
            .buffer_unordered(self.options.lookup_concurrency.max(1))
            .collect()
            .await
    }

    /// Upsert every proxy; rows that fail to write are logged and skipped.
    /// Returns how many were added or refreshed.
    pub fn store(&self, db: &Database, proxies: &[GeotaggedProxy]) -> usize {
        let mut written = 0;
        for proxy in proxies {
            let ProxyCandidate { ip, port } = &proxy.candidate;
            match db.upsert_proxy(ip, *port, &self.options.proxy_type, proxy.country.as_deref()) {
                Ok(()) => written += 1,
                Err(e) => warn!("Failed to store proxy {}:{}: {}", ip, port, e),
            }
        }
        written
    }

    /// One full refresh cycle against the database at `db_path`.
    pub async fn refresh(&self, db_path: &Path) -> Result<usize> {
        let proxies = self.gather().await;
        let db = Database::new(db_path)?;
        let written = self.store(&db, &proxies);
        info!("Added or refreshed {} proxies", written);
        Ok(written)
    }
}
