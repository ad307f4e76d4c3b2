use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

/// Why a fetch produced no content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchFailure {
    /// The server answered with a non-2xx status.
    Status(u16),
    Timeout,
    Connect(String),
    /// The response started but its body could not be read.
    Body(String),
    Request(String),
}

impl FetchFailure {
    /// Failures worth another attempt under a retry policy.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchFailure::Timeout | FetchFailure::Connect(_) => true,
            FetchFailure::Status(code) => *code == 429 || (500..=599).contains(code),
            FetchFailure::Body(_) | FetchFailure::Request(_) => false,
        }
    }
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchFailure::Status(code) => write!(f, "HTTP status {}", code),
            FetchFailure::Timeout => write!(f, "request timed out"),
            FetchFailure::Connect(msg) => write!(f, "connection error: {}", msg),
            FetchFailure::Body(msg) => write!(f, "failed to read body: {}", msg),
            FetchFailure::Request(msg) => write!(f, "request error: {}", msg),
        }
    }
}

/// HTML text on success, the failure cause otherwise.
pub type FetchOutcome = std::result::Result<String, FetchFailure>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrawlStats {
    pub pages_fetched: usize,
    pub pages_failed: usize,
    pub links_recorded: usize,
    pub links_rejected: usize,
    pub elapsed: Duration,
    /// Set when a page or time ceiling cut the crawl short.
    pub truncated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlResult {
    pub base_url: String,
    /// Every URL claimed by a worker, the seed included.
    pub visited: HashSet<String>,
    pub stats: CrawlStats,
}

impl CrawlResult {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            visited: HashSet::new(),
            stats: CrawlStats::default(),
        }
    }

    /// Visited URLs other than the seed.
    pub fn discovered(&self) -> impl Iterator<Item = &String> {
        self.visited.iter().filter(move |url| **url != self.base_url)
    }
}
