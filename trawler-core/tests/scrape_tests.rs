// Tests for scrape runs across stores

use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use trawler_core::data::{Database, LogLevel, RunStatus};
use trawler_core::scrape::{ScrapeOptions, run_scrape};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

async fn mount_page(server: &MockServer, page: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(page))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(body)
                .insert_header("content-type", "text/html"),
        )
        .mount(server)
        .await;
}

/// Seed links to /a, /b, /a again and an external page.
async fn storefront() -> MockServer {
    let server = MockServer::start().await;
    mount_page(
        &server,
        "/",
        r#"<html><body>
            <a href="/a">A</a>
            <a href="/b">B</a>
            <a href="/a">A again</a>
            <a href="https://external.test/c">Elsewhere</a>
        </body></html>"#,
    )
    .await;
    mount_page(&server, "/a", "<html><body>A</body></html>").await;
    mount_page(&server, "/b", "<html><body>B</body></html>").await;
    server
}

fn options(db_path: &Path) -> ScrapeOptions {
    ScrapeOptions {
        concurrency: 4,
        max_depth: 1,
        timeout: Duration::from_secs(5),
        ..ScrapeOptions::new(db_path)
    }
}

#[tokio::test]
async fn test_run_records_discovered_links() {
    let server = storefront().await;
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("scrape.db");

    let store_id = {
        let db = Database::new(&db_path).unwrap();
        db.add_store("shop", &format!("{}/", server.uri())).unwrap()
    };

    let summary = run_scrape(&options(&db_path)).await.unwrap();
    assert_eq!(summary.stores.len(), 1);
    assert_eq!(summary.stores[0].links, 2);
    assert!(summary.stores[0].error.is_none());

    let db = Database::new(&db_path).unwrap();
    let mut urls: Vec<String> = db
        .links_for_run(&summary.run_id)
        .unwrap()
        .into_iter()
        .map(|link| link.source_url)
        .collect();
    urls.sort();
    assert_eq!(
        urls,
        vec![format!("{}/a", server.uri()), format!("{}/b", server.uri())]
    );
    assert_eq!(db.count_links(&summary.run_id, store_id).unwrap(), 2);

    let run = db.get_run(&summary.run_id).unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Finished);
    assert!(run.finished_at.is_some());
}

#[tokio::test]
async fn test_run_finishes_when_every_store_fails() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("scrape.db");
    {
        let db = Database::new(&db_path).unwrap();
        db.add_store("broken", "not a url").unwrap();
        db.add_store("offline", "http://127.0.0.1:1/").unwrap();
    }

    let summary = run_scrape(&options(&db_path)).await.unwrap();
    assert_eq!(summary.stores.len(), 2);
    assert_eq!(summary.total_links(), 0);
    assert_eq!(summary.failed_stores(), 1);

    let db = Database::new(&db_path).unwrap();
    let run = db.get_run(&summary.run_id).unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Finished);

    let logs = db.logs_for_run(&summary.run_id, 50).unwrap();
    assert!(
        logs.iter()
            .any(|e| e.level == LogLevel::Error && e.message.contains("broken"))
    );
    assert!(
        logs.iter()
            .any(|e| e.level == LogLevel::Warning && e.message.contains("127.0.0.1:1"))
    );
}

#[tokio::test]
async fn test_failing_store_does_not_affect_others() {
    let server = storefront().await;
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("scrape.db");
    {
        let db = Database::new(&db_path).unwrap();
        db.add_store("broken", "ftp://shop.example/").unwrap();
        db.add_store("shop", &format!("{}/", server.uri())).unwrap();
    }

    let summary = run_scrape(&options(&db_path)).await.unwrap();
    assert_eq!(summary.failed_stores(), 1);
    assert_eq!(summary.total_links(), 2);
}

#[tokio::test]
async fn test_inactive_stores_are_skipped() {
    let server = storefront().await;
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("scrape.db");
    {
        let db = Database::new(&db_path).unwrap();
        let id = db.add_store("shop", &format!("{}/", server.uri())).unwrap();
        db.set_store_active(id, false).unwrap();
    }

    let summary = run_scrape(&options(&db_path)).await.unwrap();
    assert!(summary.stores.is_empty());

    let db = Database::new(&db_path).unwrap();
    assert!(db.links_for_run(&summary.run_id).unwrap().is_empty());
    assert_eq!(
        db.get_run(&summary.run_id).unwrap().unwrap().status,
        RunStatus::Finished
    );
}

#[tokio::test]
async fn test_repeated_runs_are_independent() {
    let server = storefront().await;
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("scrape.db");
    {
        let db = Database::new(&db_path).unwrap();
        db.add_store("shop", &format!("{}/", server.uri())).unwrap();
    }

    let first = run_scrape(&options(&db_path)).await.unwrap();
    let second = run_scrape(&options(&db_path)).await.unwrap();
    assert_ne!(first.run_id, second.run_id);

    let db = Database::new(&db_path).unwrap();
    assert_eq!(db.links_for_run(&first.run_id).unwrap().len(), 2);
    assert_eq!(db.links_for_run(&second.run_id).unwrap().len(), 2);
    assert_eq!(db.list_runs(10).unwrap().len(), 2);
}

#[tokio::test]
async fn test_concurrent_store_crawls() {
    let first = storefront().await;
    let second = storefront().await;
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("scrape.db");
    {
        let db = Database::new(&db_path).unwrap();
        db.add_store("first", &format!("{}/", first.uri())).unwrap();
        db.add_store("second", &format!("{}/", second.uri())).unwrap();
    }

    let options = ScrapeOptions {
        store_concurrency: 2,
        ..options(&db_path)
    };
    let summary = run_scrape(&options).await.unwrap();

    assert_eq!(summary.stores.len(), 2);
    assert!(summary.stores[0].store_id < summary.stores[1].store_id);
    assert!(summary.stores.iter().all(|s| s.links == 2));
}

#[tokio::test]
async fn test_unlimited_depth_follows_chain() {
    let server = MockServer::start().await;
    mount_page(&server, "/", r#"<a href="/one">1</a>"#).await;
    mount_page(&server, "/one", r#"<a href="/two">2</a>"#).await;
    mount_page(&server, "/two", r#"<a href="/">home</a>"#).await;

    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("scrape.db");
    {
        let db = Database::new(&db_path).unwrap();
        db.add_store("chain", &format!("{}/", server.uri())).unwrap();
    }

    let shallow = run_scrape(&options(&db_path)).await.unwrap();
    assert_eq!(shallow.total_links(), 1);

    let deep = run_scrape(&ScrapeOptions {
        max_depth: 0,
        ..options(&db_path)
    })
    .await
    .unwrap();
    assert_eq!(deep.total_links(), 2);
    assert_eq!(deep.stores[0].visited, 3);
}

#[tokio::test]
async fn test_front_page_recorded_when_enabled() {
    let server = MockServer::start().await;
    mount_page(&server, "/", "<html><body>No links here</body></html>").await;

    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("scrape.db");
    {
        let db = Database::new(&db_path).unwrap();
        db.add_store("landing", &format!("{}/", server.uri())).unwrap();
    }

    let default_run = run_scrape(&options(&db_path)).await.unwrap();
    assert_eq!(default_run.stores[0].links, 0);

    let recorded_run = run_scrape(&ScrapeOptions {
        record_front_page: true,
        ..options(&db_path)
    })
    .await
    .unwrap();
    assert_eq!(recorded_run.stores[0].links, 1);

    let db = Database::new(&db_path).unwrap();
    let links = db.links_for_run(&recorded_run.run_id).unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].source_url, format!("{}/", server.uri()));
    assert_eq!(links[0].kind, "frontpage");
}
