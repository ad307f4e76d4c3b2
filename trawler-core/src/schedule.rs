// Recurring scrape runs and proxy refreshes

use crate::error::Result;
use crate::proxy_pool::{ProxyPool, ProxyPoolOptions};
use crate::scrape::{ScrapeOptions, run_scrape};
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{error, info};

#[derive(Debug, Clone)]
pub struct ScheduleOptions {
    pub scrape_every: Duration,
    pub proxy_refresh_every: Duration,
    pub scrape: ScrapeOptions,
    pub proxies: ProxyPoolOptions,
}

/// Run both cycles until Ctrl-C.
pub async fn run_schedule(options: ScheduleOptions) -> Result<()> {
    run_schedule_until(options, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
        }
    })
    .await
}

/// Run both cycles until `shutdown` resolves. The first tick of each fires
/// immediately; a tick still running at shutdown is abandoned.
pub async fn run_schedule_until<S>(options: ScheduleOptions, shutdown: S) -> Result<()>
where
    S: Future<Output = ()>,
{
    let ScheduleOptions {
        scrape_every,
        proxy_refresh_every,
        scrape,
        proxies,
    } = options;

    let pool = ProxyPool::new(proxies)?;
    let db_path = scrape.db_path.clone();

    info!(
        "Scheduler started: scrape every {:?}, proxy refresh every {:?}",
        scrape_every, proxy_refresh_every
    );

    let scrape_task = tokio::spawn(scrape_cycle(scrape, scrape_every));
    let proxy_task = tokio::spawn(proxy_cycle(pool, db_path, proxy_refresh_every));

    shutdown.await;
    info!("Scheduler shutting down");
    scrape_task.abort();
    proxy_task.abort();
    Ok(())
}

async fn scrape_cycle(options: ScrapeOptions, every: Duration) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        match run_scrape(&options).await {
            Ok(summary) => info!(
                "Scheduled run {} recorded {} links ({} stores failed)",
                summary.run_id,
                summary.total_links(),
                summary.failed_stores()
            ),
            Err(e) => error!("Scheduled scrape run failed: {}", e),
        }
    }
}

async fn proxy_cycle(pool: ProxyPool, db_path: PathBuf, every: Duration) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        if let Err(e) = pool.refresh(&db_path).await {
            error!("Scheduled proxy refresh failed: {}", e);
        }
    }
}
