use crate::error::{Result, ScanError};
use crate::extract::{extract_links_for_host, normalize_seed};
use crate::fetcher::PageFetcher;
use crate::proxy::ProxyRotation;
use crate::result::{CrawlResult, CrawlStats, FetchFailure, FetchOutcome};
use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use url::Url;

pub const DEFAULT_CONCURRENCY: usize = 10;

pub type ProgressCallback = Arc<dyn Fn(usize, String) + Send + Sync>;

/// Where a crawl reports what it finds. Awaited from worker tasks, so
/// implementations that touch storage must yield instead of blocking.
pub trait CrawlSink: Send + Sync + 'static {
    /// Persist a successfully fetched URL.
    fn record_link(&self, url: &str) -> impl Future<Output = Result<()>> + Send;

    /// A fetch produced no content. Must not fail the crawl.
    fn report_failure(&self, url: &str, failure: &FetchFailure) -> impl Future<Output = ()> + Send;
}

/// Sink that keeps nothing.
pub struct NullSink;

impl CrawlSink for NullSink {
    async fn record_link(&self, _url: &str) -> Result<()> {
        Ok(())
    }

    async fn report_failure(&self, _url: &str, _failure: &FetchFailure) {}
}

/// Retries apply to transient failures only (see [`FetchFailure::is_transient`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            retries: 0,
            backoff: Duration::from_millis(500),
        }
    }

    /// Linear backoff: `backoff * attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff * attempt
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

struct Frontier {
    queue: VecDeque<(String, usize)>,
    visited: HashSet<String>,
    in_flight: usize,
    truncated: bool,
}

impl Frontier {
    fn seeded(seed: &str) -> Self {
        let mut queue = VecDeque::new();
        queue.push_back((seed.to_string(), 0));
        Self {
            queue,
            visited: HashSet::new(),
            in_flight: 0,
            truncated: false,
        }
    }

    /// Dequeue the next unvisited item and mark it visited in the same step.
    fn claim(&mut self, max_pages: Option<usize>) -> Option<(String, usize)> {
        while let Some((url, depth)) = self.queue.pop_front() {
            if self.visited.contains(&url) {
                continue;
            }
            if max_pages.is_some_and(|limit| self.visited.len() >= limit) {
                debug!("Page ceiling reached, dropping {} queued URLs", self.queue.len() + 1);
                self.queue.clear();
                self.truncated = true;
                return None;
            }
            self.visited.insert(url.clone());
            self.in_flight += 1;
            return Some((url, depth));
        }
        None
    }
}

#[derive(Default)]
struct Counters {
    pages_fetched: AtomicUsize,
    pages_failed: AtomicUsize,
    links_recorded: AtomicUsize,
    links_rejected: AtomicUsize,
}

struct Shared {
    frontier: Mutex<Frontier>,
    wake: Notify,
    counters: Counters,
}

impl Shared {
    fn frontier(&self) -> MutexGuard<'_, Frontier> {
        self.frontier.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Bounded-depth breadth-first crawler over a shared frontier.
///
/// A fixed pool of workers drains the frontier; every fetch first takes a slot
/// from the crawler's limiter, so the limiter (not the worker count) bounds
/// concurrent requests.
pub struct Crawler<F: PageFetcher> {
    fetcher: Arc<F>,
    limiter: Arc<Semaphore>,
    workers: usize,
    max_depth: usize,
    max_pages: Option<usize>,
    time_budget: Option<Duration>,
    retry: RetryPolicy,
    record_seed: bool,
    progress_callback: Option<ProgressCallback>,
}

impl<F: PageFetcher> Crawler<F> {
    pub fn new(fetcher: F) -> Self {
        Self::shared(Arc::new(fetcher))
    }

    /// Crawler over a fetcher that other crawls may be using at the same time.
    pub fn shared(fetcher: Arc<F>) -> Self {
        Self {
            fetcher,
            limiter: Arc::new(Semaphore::new(DEFAULT_CONCURRENCY)),
            workers: DEFAULT_CONCURRENCY,
            max_depth: 0,
            max_pages: None,
            time_budget: None,
            retry: RetryPolicy::none(),
            record_seed: false,
            progress_callback: None,
        }
    }

    /// Worker count and fetch cap. Replaces any limiter set earlier.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        self.workers = concurrency;
        self.limiter = Arc::new(Semaphore::new(concurrency));
        self
    }

    /// Use an externally owned limiter, e.g. to make several crawls share one budget.
    pub fn with_limiter(mut self, limiter: Arc<Semaphore>) -> Self {
        self.limiter = limiter;
        self
    }

    /// 0 means unlimited.
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_max_pages(mut self, max_pages: Option<usize>) -> Self {
        self.max_pages = max_pages.filter(|&n| n > 0);
        self
    }

    pub fn with_time_budget(mut self, budget: Option<Duration>) -> Self {
        self.time_budget = budget;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Also hand the base URL to the sink once it has been fetched.
    pub fn with_record_seed(mut self, record_seed: bool) -> Self {
        self.record_seed = record_seed;
        self
    }

    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    pub fn limiter(&self) -> Arc<Semaphore> {
        self.limiter.clone()
    }

    pub async fn crawl<S: CrawlSink>(
        &self,
        base_url: &str,
        proxies: Arc<ProxyRotation>,
        sink: Arc<S>,
    ) -> Result<CrawlResult> {
        let seed = normalize_seed(base_url)
            .ok_or_else(|| ScanError::InvalidUrl(base_url.to_string()))?;
        let host = seed
            .host_str()
            .ok_or_else(|| ScanError::InvalidUrl(base_url.to_string()))?
            .to_string();
        let seed = seed.to_string();

        info!(
            "Starting crawl of {} with {} workers (max depth {}, {} proxies)",
            seed,
            self.workers,
            self.max_depth,
            proxies.len()
        );

        let started = Instant::now();
        let shared = Arc::new(Shared {
            frontier: Mutex::new(Frontier::seeded(&seed)),
            wake: Notify::new(),
            counters: Counters::default(),
        });

        let mut workers = JoinSet::new();
        for worker_id in 0..self.workers {
            let worker = Worker {
                id: worker_id,
                fetcher: self.fetcher.clone(),
                limiter: self.limiter.clone(),
                proxies: proxies.clone(),
                sink: sink.clone(),
                shared: shared.clone(),
                progress_callback: self.progress_callback.clone(),
                seed: seed.clone(),
                host: host.clone(),
                max_depth: self.max_depth,
                max_pages: self.max_pages,
                retry: self.retry,
                record_seed: self.record_seed,
            };
            workers.spawn(worker.run());
        }

        let mut timed_out = false;
        match self.time_budget {
            Some(budget) => {
                match tokio::time::timeout(budget, join_workers(&mut workers)).await {
                    Ok(joined) => joined?,
                    Err(_) => {
                        warn!("Crawl of {} exceeded its {:?} budget, stopping", seed, budget);
                        timed_out = true;
                    }
                }
            }
            None => join_workers(&mut workers).await?,
        }
        workers.abort_all();

        let frontier = shared.frontier();
        let counters = &shared.counters;
        let stats = CrawlStats {
            pages_fetched: counters.pages_fetched.load(Ordering::Relaxed),
            pages_failed: counters.pages_failed.load(Ordering::Relaxed),
            links_recorded: counters.links_recorded.load(Ordering::Relaxed),
            links_rejected: counters.links_rejected.load(Ordering::Relaxed),
            elapsed: started.elapsed(),
            truncated: timed_out || frontier.truncated,
        };

        info!(
            "Crawl of {} complete. Visited {} URLs ({} fetched, {} failed) in {:?}",
            seed,
            frontier.visited.len(),
            stats.pages_fetched,
            stats.pages_failed,
            stats.elapsed
        );

        Ok(CrawlResult {
            base_url: seed,
            visited: frontier.visited.clone(),
            stats,
        })
    }
}

async fn join_workers(workers: &mut JoinSet<()>) -> Result<()> {
    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            workers.abort_all();
            return Err(ScanError::JoinError(e));
        }
    }
    Ok(())
}

struct Worker<F: PageFetcher, S: CrawlSink> {
    id: usize,
    fetcher: Arc<F>,
    limiter: Arc<Semaphore>,
    proxies: Arc<ProxyRotation>,
    sink: Arc<S>,
    shared: Arc<Shared>,
    progress_callback: Option<ProgressCallback>,
    seed: String,
    host: String,
    max_depth: usize,
    max_pages: Option<usize>,
    retry: RetryPolicy,
    record_seed: bool,
}

impl<F: PageFetcher, S: CrawlSink> Worker<F, S> {
    async fn run(self) {
        debug!("Worker {} started", self.id);

        while let Some((url, depth)) = self.claim().await {
            if let Some(ref callback) = self.progress_callback {
                callback(self.id, url.clone());
            }
            let links = self.process(&url, depth).await;
            self.complete(links, depth);
        }

        debug!("Worker {} finished", self.id);
    }

    /// Wait for work. Returns `None` once the frontier is empty and no other
    /// worker holds an item that could still add to it.
    async fn claim(&self) -> Option<(String, usize)> {
        loop {
            let notified = {
                let mut frontier = self.shared.frontier();
                if let Some(item) = frontier.claim(self.max_pages) {
                    return Some(item);
                }
                if frontier.in_flight == 0 {
                    self.shared.wake.notify_waiters();
                    return None;
                }
                self.shared.wake.notified()
            };
            notified.await;
        }
    }

    fn complete(&self, links: HashSet<String>, depth: usize) {
        {
            let mut frontier = self.shared.frontier();
            for link in links {
                if !frontier.visited.contains(&link) {
                    frontier.queue.push_back((link, depth + 1));
                }
            }
            frontier.in_flight -= 1;
        }
        self.shared.wake.notify_waiters();
    }

    async fn process(&self, url: &str, depth: usize) -> HashSet<String> {
        let counters = &self.shared.counters;

        let html = match self.fetch_with_retry(url).await {
            Ok(html) => html,
            Err(failure) => {
                debug!("Fetch failed for {}: {}", url, failure);
                counters.pages_failed.fetch_add(1, Ordering::Relaxed);
                self.sink.report_failure(url, &failure).await;
                return HashSet::new();
            }
        };
        counters.pages_fetched.fetch_add(1, Ordering::Relaxed);

        if self.record_seed || url != self.seed {
            match self.sink.record_link(url).await {
                Ok(()) => {
                    counters.links_recorded.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    warn!("{}", e);
                    counters.links_rejected.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        if self.max_depth != 0 && depth >= self.max_depth {
            return HashSet::new();
        }

        match Url::parse(url) {
            Ok(page_url) => {
                let links = extract_links_for_host(&html, &page_url, &self.host);
                debug!("[Worker {}] {} yielded {} links at depth {}", self.id, url, links.len(), depth);
                links
            }
            Err(e) => {
                warn!("Cannot resolve links on {}: {}", url, e);
                HashSet::new()
            }
        }
    }

    /// Each attempt holds a limiter slot only for the network call itself.
    async fn fetch_with_retry(&self, url: &str) -> FetchOutcome {
        let mut attempt = 0;
        loop {
            let proxy = self.proxies.next();
            let outcome = {
                let Ok(_permit) = self.limiter.acquire().await else {
                    return Err(FetchFailure::Request("fetch limiter closed".to_string()));
                };
                self.fetcher.fetch(url, proxy).await
            };

            match outcome {
                Err(failure) if failure.is_transient() && attempt < self.retry.retries => {
                    attempt += 1;
                    debug!("Retrying {} ({}/{}) after {}", url, attempt, self.retry.retries, failure);
                    tokio::time::sleep(self.retry.delay_for(attempt)).await;
                }
                other => return other,
            }
        }
    }
}
