use crate::data::{Database, LinkStatus, LogLevel, Store};
use crate::error::{CoreError, Result};
use crate::log::ScrapeLogger;
use crate::proxy_pool::list_proxies;
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use trawler_scanner::fetcher::DEFAULT_TIMEOUT_SECS;
use trawler_scanner::{
    CrawlResult, CrawlSink, Crawler, FetchFailure, HttpFetcher, ProgressCallback, ProxyRotation,
    RetryPolicy, ScanError,
};
use tracing::{debug, info, warn};

/// Options for one scrape run across all active stores
#[derive(Debug, Clone)]
pub struct ScrapeOptions {
    pub db_path: PathBuf,
    /// Workers and fetch cap per store crawl.
    pub concurrency: usize,
    /// 0 means unlimited.
    pub max_depth: usize,
    pub max_pages: Option<usize>,
    pub time_budget: Option<Duration>,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    /// How many stores are crawled at once.
    pub store_concurrency: usize,
    /// Also record each store's base URL as a link once it is fetched.
    pub record_front_page: bool,
    pub show_progress_bars: bool,
}

impl ScrapeOptions {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            concurrency: trawler_scanner::crawler::DEFAULT_CONCURRENCY,
            max_depth: 0,
            max_pages: None,
            time_budget: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retry: RetryPolicy::none(),
            store_concurrency: 1,
            record_front_page: false,
            show_progress_bars: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreOutcome {
    pub store_id: i64,
    pub name: String,
    pub base_url: String,
    /// ScrapeLink rows on file for this store in the run.
    pub links: i64,
    pub visited: usize,
    pub failed: usize,
    pub truncated: bool,
    pub error: Option<String>,
}

impl StoreOutcome {
    fn errored(store: &Store, error: String) -> Self {
        Self {
            store_id: store.id,
            name: store.name.clone(),
            base_url: store.base_url.clone(),
            links: 0,
            visited: 0,
            failed: 0,
            truncated: false,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub stores: Vec<StoreOutcome>,
}

impl RunSummary {
    pub fn total_links(&self) -> i64 {
        self.stores.iter().map(|s| s.links).sum()
    }

    pub fn failed_stores(&self) -> usize {
        self.stores.iter().filter(|s| s.error.is_some()).count()
    }
}

/// Persists discoveries of one store crawl through its own connection.
/// Every database call runs on the blocking pool.
pub struct RunSink {
    db: Arc<Mutex<Database>>,
    run_id: String,
    store_id: i64,
    logger: ScrapeLogger,
}

impl RunSink {
    pub fn new(db: Database, run_id: &str, store_id: i64) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            run_id: run_id.to_string(),
            store_id,
            logger: ScrapeLogger::for_run(run_id),
        }
    }

    async fn with_db<T, F>(&self, f: F) -> std::result::Result<T, tokio::task::JoinError>
    where
        F: FnOnce(&Database) -> T + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let db = db.lock().unwrap_or_else(PoisonError::into_inner);
            f(&db)
        })
        .await
    }

    pub async fn count_links(&self) -> Result<i64> {
        let run_id = self.run_id.clone();
        let store_id = self.store_id;
        self.with_db(move |db| db.count_links(&run_id, store_id))
            .await
            .map_err(|e| CoreError::Other(format!("Link count aborted: {}", e)))?
            .map_err(CoreError::from)
    }

    pub async fn log(&self, level: LogLevel, message: &str) {
        let logger = self.logger.clone();
        let message = message.to_string();
        if let Err(e) = self
            .with_db(move |db| logger.log(db, None, level, &message))
            .await
        {
            warn!("Scrape log write aborted: {}", e);
        }
    }
}

impl CrawlSink for RunSink {
    async fn record_link(&self, url: &str) -> trawler_scanner::error::Result<()> {
        let run_id = self.run_id.clone();
        let store_id = self.store_id;
        let logger = self.logger.clone();
        let link = url.to_string();

        let saved = self
            .with_db(move |db| {
                match db.insert_scrape_link(&run_id, store_id, &link, LinkStatus::Success) {
                    Ok(inserted) => {
                        if !inserted {
                            debug!("Link {} already recorded for store {}", link, store_id);
                        }
                        Ok(())
                    }
                    Err(e) => {
                        let message = format!("Failed to save link {}: {}", link, e);
                        logger.log(db, None, LogLevel::Error, &message);
                        Err(e.to_string())
                    }
                }
            })
            .await
            .map_err(|e| e.to_string())
            .and_then(|saved| saved);

        saved.map_err(|reason| ScanError::SinkError {
            url: url.to_string(),
            reason,
        })
    }

    async fn report_failure(&self, url: &str, failure: &FetchFailure) {
        self.log(LogLevel::Warning, &format!("Failed to fetch {}: {}", url, failure))
            .await;
    }
}

fn spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
        pb.set_style(style);
    }
    pb.enable_steady_tick(Duration::from_millis(120));
    pb.set_message("Starting scrape run...");
    pb
}

/// Crawl every active store once under a fresh run record.
///
/// Per-store failures are logged and counted as zero links; the run is
/// always closed as finished. Only failures to open or close the run record
/// itself are returned as errors.
pub async fn run_scrape(options: &ScrapeOptions) -> Result<RunSummary> {
    let db = Database::new(&options.db_path)?;
    let run_id = db.create_run()?;
    let logger = ScrapeLogger::for_run(&run_id);

    let proxies = match list_proxies(&db) {
        Ok(proxies) => proxies,
        Err(e) => {
            logger.error(&db, &format!("Could not load proxies, crawling directly: {}", e));
            Vec::new()
        }
    };
    let stores = match db.active_stores() {
        Ok(stores) => stores,
        Err(e) => {
            logger.error(&db, &format!("Could not load stores: {}", e));
            Vec::new()
        }
    };
    logger.info(
        &db,
        &format!(
            "Scrape run started for {} stores with {} proxies",
            stores.len(),
            proxies.len()
        ),
    );

    // One fetcher per run; proxied clients are built lazily and shared by every store
    let fetcher = match HttpFetcher::with_proxies(&proxies, options.timeout) {
        Ok(fetcher) => Some(Arc::new(fetcher)),
        Err(e) => {
            logger.error(&db, &format!("Could not build HTTP client: {}", e));
            None
        }
    };

    let progress_bar = options.show_progress_bars.then(|| Arc::new(spinner()));
    let processed = Arc::new(AtomicUsize::new(0));
    let proxies = Arc::new(proxies);

    let mut outcomes: Vec<StoreOutcome> = stream::iter(stores)
        .map(|store| {
            let progress = progress_bar.as_ref().map(|pb| {
                let pb = pb.clone();
                let processed = processed.clone();
                let name = store.name.clone();
                let callback: ProgressCallback = Arc::new(move |_worker_id: usize, _url: String| {
                    let count = processed.fetch_add(1, Ordering::Relaxed) + 1;
                    pb.set_message(format!("Crawling {}... {} URLs processed", name, count));
                });
                callback
            });
            let proxies = proxies.clone();
            let fetcher = fetcher.clone();
            let run_id = run_id.as_str();
            async move {
                let Some(fetcher) = fetcher else {
                    return StoreOutcome::errored(&store, "no HTTP client available".to_string());
                };
                match crawl_store(options, run_id, &store, fetcher, proxies, progress).await {
                    Ok(outcome) => outcome,
                    Err(e) => StoreOutcome::errored(&store, e.to_string()),
                }
            }
        })
        .buffer_unordered(options.store_concurrency.max(1))
        .collect()
        .await;
    outcomes.sort_by_key(|o| o.store_id);

    if let Some(pb) = progress_bar {
        pb.finish_and_clear();
    }

    for outcome in &outcomes {
        match &outcome.error {
            Some(error) => logger.error(
                &db,
                &format!("Store {} ({}) failed: {}", outcome.name, outcome.base_url, error),
            ),
            None => logger.info(
                &db,
                &format!(
                    "Store {} finished: {} links recorded, {} fetches failed",
                    outcome.name, outcome.links, outcome.failed
                ),
            ),
        }
    }

    db.finish_run(&run_id)?;
    info!("Scrape run {} finished", run_id);

    Ok(RunSummary {
        run_id,
        stores: outcomes,
    })
}

async fn crawl_store(
    options: &ScrapeOptions,
    run_id: &str,
    store: &Store,
    fetcher: Arc<HttpFetcher>,
    proxies: Arc<Vec<String>>,
    progress: Option<ProgressCallback>,
) -> Result<StoreOutcome> {
    info!("Crawling store {} at {}", store.name, store.base_url);

    let db_path = options.db_path.clone();
    let db = tokio::task::spawn_blocking(move || Database::new(&db_path))
        .await
        .map_err(|e| CoreError::Other(format!("Opening database aborted: {}", e)))??;
    let sink = Arc::new(RunSink::new(db, run_id, store.id));

    let mut crawler = Crawler::shared(fetcher)
        .with_concurrency(options.concurrency)
        .with_max_depth(options.max_depth)
        .with_max_pages(options.max_pages)
        .with_time_budget(options.time_budget)
        .with_retry_policy(options.retry)
        .with_record_seed(options.record_front_page);
    if let Some(callback) = progress {
        crawler = crawler.with_progress_callback(callback);
    }

    let rotation = Arc::new(ProxyRotation::new(proxies.to_vec()));
    let result: CrawlResult = crawler
        .crawl(&store.base_url, rotation, sink.clone())
        .await
        .map_err(CoreError::Scan)?;

    if result.stats.truncated {
        sink.log(
            LogLevel::Warning,
            &format!("Crawl of {} stopped early at a page or time ceiling", store.base_url),
        )
        .await;
    }

    Ok(StoreOutcome {
        store_id: store.id,
        name: store.name.clone(),
        base_url: store.base_url.clone(),
        links: sink.count_links().await?,
        visited: result.visited.len(),
        failed: result.stats.pages_failed,
        truncated: result.stats.truncated,
        error: None,
    })
}
