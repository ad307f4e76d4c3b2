pub mod crawler;
pub mod error;
pub mod extract;
pub mod fetcher;
pub mod proxy;
pub mod result;

pub use crawler::{CrawlSink, Crawler, NullSink, ProgressCallback, RetryPolicy};
pub use error::ScanError;
pub use fetcher::{HttpFetcher, PageFetcher};
pub use proxy::ProxyRotation;
pub use result::{CrawlResult, CrawlStats, FetchFailure, FetchOutcome};
