pub mod data;
pub mod error;
pub mod log;
pub mod proxy_pool;
pub mod report;
pub mod schedule;
pub mod scrape;

pub use data::Database;
pub use error::CoreError;
pub use log::ScrapeLogger;
pub use proxy_pool::{ProxyPool, ProxyPoolOptions, list_proxies};
pub use report::ReportFormat;
pub use schedule::{ScheduleOptions, run_schedule};
pub use scrape::{RunSummary, ScrapeOptions, StoreOutcome, run_scrape};
