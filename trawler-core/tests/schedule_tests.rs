// Tests for the recurring scheduler

use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use trawler_core::data::{Database, RunStatus};
use trawler_core::proxy_pool::ProxyPoolOptions;
use trawler_core::schedule::{ScheduleOptions, run_schedule_until};
use trawler_core::scrape::ScrapeOptions;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

fn both_cycles_ran(db_path: &Path) -> bool {
    let Ok(db) = Database::new(db_path) else {
        return false;
    };
    let finished = db
        .list_runs(10)
        .map(|runs| runs.iter().any(|r| r.status == RunStatus::Finished))
        .unwrap_or(false);
    finished && db.proxy_count().unwrap_or(0) > 0
}

#[tokio::test]
async fn test_first_ticks_fire_immediately() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(200).set_body_string("1.2.3.4:8080\n"))
        .mount(&server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("schedule.db");
    Database::new(&db_path).unwrap();

    let options = ScheduleOptions {
        scrape_every: Duration::from_secs(3600),
        proxy_refresh_every: Duration::from_secs(3600),
        scrape: ScrapeOptions::new(&db_path),
        proxies: ProxyPoolOptions {
            sources: vec![format!("{}/feed", server.uri())],
            geo_endpoint: None,
            ..ProxyPoolOptions::default()
        },
    };

    let watched = db_path.clone();
    let shutdown = async move {
        for _ in 0..100 {
            if both_cycles_ran(&watched) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    };

    run_schedule_until(options, shutdown).await.unwrap();

    assert!(both_cycles_ran(&db_path));
    let db = Database::new(&db_path).unwrap();
    assert_eq!(db.list_runs(10).unwrap().len(), 1);
}
