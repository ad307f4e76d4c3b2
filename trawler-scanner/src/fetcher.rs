use crate::error::{Result, ScanError};
use crate::result::{FetchFailure, FetchOutcome};
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, Proxy};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_TIMEOUT_SECS: u64 = 15;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 13_4) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.6261.128 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64; rv:115.0) Gecko/20100101 Firefox/115.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:118.0) Gecko/20100101 Firefox/118.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_1 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1",
    "Mozilla/5.0 (Linux; Android 14; Pixel 7 Pro) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Mobile Safari/537.36",
];

/// A single bounded GET. Implementations never raise: every failure is
/// returned as a [`FetchFailure`].
pub trait PageFetcher: Send + Sync + 'static {
    fn fetch(&self, url: &str, proxy: Option<&str>) -> impl Future<Output = FetchOutcome> + Send;
}

/// reqwest-backed fetcher. Proxied clients are built on first use and
/// cached, so a large proxy list costs nothing until a proxy is picked.
pub struct HttpFetcher {
    direct: Client,
    timeout: Duration,
    proxies: HashSet<String>,
    proxied: Mutex<HashMap<String, Client>>,
    user_agent_cursor: AtomicUsize,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        Self::with_proxies(&[], Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        Self::with_proxies(&[], timeout)
    }

    /// Accept proxy connection strings for later use. Proxies that fail to
    /// parse are logged and left out; fetches routed to them go direct.
    pub fn with_proxies(proxies: &[String], timeout: Duration) -> Result<Self> {
        let direct = build_client(None, timeout)?;

        let mut accepted = HashSet::new();
        for proxy_url in proxies {
            if accepted.contains(proxy_url) {
                continue;
            }
            match parse_proxy(proxy_url) {
                Ok(_) => {
                    accepted.insert(proxy_url.clone());
                }
                Err(e) => warn!("Ignoring proxy: {}", e),
            }
        }

        Ok(Self {
            direct,
            timeout,
            proxies: accepted,
            proxied: Mutex::new(HashMap::new()),
            user_agent_cursor: AtomicUsize::new(0),
        })
    }

    pub fn proxy_count(&self) -> usize {
        self.proxies.len()
    }

    /// Proxied clients built so far.
    pub fn built_clients(&self) -> usize {
        self.cache().len()
    }

    fn cache(&self) -> MutexGuard<'_, HashMap<String, Client>> {
        self.proxied.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn client_for(&self, proxy: Option<&str>) -> Client {
        let Some(proxy_url) = proxy else {
            return self.direct.clone();
        };
        if !self.proxies.contains(proxy_url) {
            debug!("No client for proxy {}, fetching directly", proxy_url);
            return self.direct.clone();
        }

        let cached = self.cache().get(proxy_url).cloned();
        if let Some(client) = cached {
            return client;
        }

        // Client construction loads TLS roots; keep it off the runtime threads
        let owned = proxy_url.to_string();
        let timeout = self.timeout;
        match tokio::task::spawn_blocking(move || build_client(Some(&owned), timeout)).await {
            Ok(Ok(client)) => self
                .cache()
                .entry(proxy_url.to_string())
                .or_insert(client)
                .clone(),
            Ok(Err(e)) => {
                warn!("Proxy client unavailable, fetching directly: {}", e);
                self.direct.clone()
            }
            Err(e) => {
                warn!("Proxy client build for {} aborted: {}", proxy_url, e);
                self.direct.clone()
            }
        }
    }

    fn next_user_agent(&self) -> &'static str {
        let idx = self.user_agent_cursor.fetch_add(1, Ordering::Relaxed) % USER_AGENTS.len();
        USER_AGENTS[idx]
    }
}

impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, proxy: Option<&str>) -> FetchOutcome {
        debug!("Fetching {} via {}", url, proxy.unwrap_or("direct"));

        let response = self
            .client_for(proxy)
            .await
            .get(url)
            .header(header::USER_AGENT, self.next_user_agent())
            .send()
            .await
            .map_err(classify_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchFailure::Status(status.as_u16()));
        }

        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                FetchFailure::Timeout
            } else {
                FetchFailure::Body(e.to_string())
            }
        })?;

        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

fn classify_error(e: reqwest::Error) -> FetchFailure {
    if e.is_timeout() {
        FetchFailure::Timeout
    } else if e.is_connect() {
        FetchFailure::Connect(e.to_string())
    } else {
        FetchFailure::Request(e.to_string())
    }
}

fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(
        header::ACCEPT_LANGUAGE,
        HeaderValue::from_static("pt-BR,pt;q=0.9,en-US;q=0.8,en;q=0.7"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers
}

fn parse_proxy(proxy_url: &str) -> Result<Proxy> {
    Proxy::all(proxy_url).map_err(|e| ScanError::InvalidProxy {
        proxy: proxy_url.to_string(),
        reason: e.to_string(),
    })
}

fn build_client(proxy_url: Option<&str>, timeout: Duration) -> Result<Client> {
    let mut builder = Client::builder()
        .default_headers(default_headers())
        .timeout(timeout)
        .connect_timeout(timeout / 2)
        .pool_max_idle_per_host(50)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .redirect(reqwest::redirect::Policy::limited(5));

    builder = match proxy_url {
        Some(proxy_url) => builder.proxy(parse_proxy(proxy_url)?),
        None => builder.no_proxy(),
    };

    Ok(builder.build()?)
}
