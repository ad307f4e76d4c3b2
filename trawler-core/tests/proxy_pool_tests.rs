// Tests for proxy feed harvesting and persistence

use std::time::Duration;
use tempfile::TempDir;
use trawler_core::data::Database;
use trawler_core::proxy_pool::{ProxyPool, ProxyPoolOptions, list_proxies};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

fn options_for(server: &MockServer, feeds: &[&str], geo: bool) -> ProxyPoolOptions {
    ProxyPoolOptions {
        sources: feeds
            .iter()
            .map(|feed| format!("{}{}", server.uri(), feed))
            .collect(),
        geo_endpoint: geo.then(|| format!("{}/geo", server.uri())),
        feed_timeout: Duration::from_secs(5),
        geo_timeout: Duration::from_secs(2),
        ..ProxyPoolOptions::default()
    }
}

async fn mount_feed(server: &MockServer, feed: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(feed))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_candidates_deduplicated_across_feeds() {
    let server = MockServer::start().await;
    mount_feed(&server, "/feed-a", "1.2.3.4:8080\n5.6.7.8:3128\n").await;
    mount_feed(&server, "/feed-b", "5.6.7.8:3128\n9.9.9.9:80\ngarbage\n").await;

    let pool = ProxyPool::new(options_for(&server, &["/feed-a", "/feed-b"], false)).unwrap();
    let candidates = pool.fetch_candidates().await;

    assert_eq!(candidates.len(), 3);
}

#[tokio::test]
async fn test_failing_feed_does_not_stop_others() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    mount_feed(&server, "/feed", "1.2.3.4:8080\n").await;

    let pool = ProxyPool::new(options_for(&server, &["/broken", "/feed"], false)).unwrap();
    let candidates = pool.fetch_candidates().await;

    assert_eq!(candidates.len(), 1);
}

#[tokio::test]
async fn test_unreachable_feed_yields_nothing() {
    let options = ProxyPoolOptions {
        sources: vec!["http://127.0.0.1:1/list.txt".to_string()],
        geo_endpoint: None,
        feed_timeout: Duration::from_secs(2),
        ..ProxyPoolOptions::default()
    };
    let pool = ProxyPool::new(options).unwrap();
    assert!(pool.fetch_candidates().await.is_empty());
}

#[tokio::test]
async fn test_country_lookup() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/geo/1.2.3.4/country/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("br\n"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/geo/5.6.7.8/country/"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let pool = ProxyPool::new(options_for(&server, &[], true)).unwrap();

    assert_eq!(pool.lookup_country("1.2.3.4").await, Some("BR".to_string()));
    assert_eq!(pool.lookup_country("5.6.7.8").await, None);
}

#[tokio::test]
async fn test_refresh_persists_geotagged_proxies() {
    let server = MockServer::start().await;
    mount_feed(&server, "/feed", "1.2.3.4:8080\n5.6.7.8:3128\n").await;
    Mock::given(method("GET"))
        .and(path("/geo/1.2.3.4/country/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("US"))
        .mount(&server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("proxies.db");

    let pool = ProxyPool::new(options_for(&server, &["/feed"], true)).unwrap();
    let written = pool.refresh(&db_path).await.unwrap();
    assert_eq!(written, 2);

    let db = Database::new(&db_path).unwrap();
    let proxies = db.list_proxies().unwrap();
    assert_eq!(proxies.len(), 2);

    let tagged = proxies.iter().find(|p| p.ip == "1.2.3.4").unwrap();
    assert_eq!(tagged.country.as_deref(), Some("US"));
    assert_eq!(tagged.kind, "anonymous");
    assert!(tagged.last_used.is_some());

    let untagged = proxies.iter().find(|p| p.ip == "5.6.7.8").unwrap();
    assert_eq!(untagged.country, None);
}

#[tokio::test]
async fn test_refresh_twice_creates_no_duplicates() {
    let server = MockServer::start().await;
    mount_feed(&server, "/feed", "1.2.3.4:8080\n5.6.7.8:3128\n").await;

    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("proxies.db");

    let pool = ProxyPool::new(options_for(&server, &["/feed"], false)).unwrap();
    pool.refresh(&db_path).await.unwrap();
    pool.refresh(&db_path).await.unwrap();

    let db = Database::new(&db_path).unwrap();
    assert_eq!(db.proxy_count().unwrap(), 2);
}

#[tokio::test]
async fn test_list_proxies_for_crawl() {
    let server = MockServer::start().await;
    mount_feed(&server, "/feed", "1.2.3.4:8080\n").await;

    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("proxies.db");

    let pool = ProxyPool::new(options_for(&server, &["/feed"], false)).unwrap();
    pool.refresh(&db_path).await.unwrap();

    let db = Database::new(&db_path).unwrap();
    assert_eq!(list_proxies(&db).unwrap(), vec!["http://1.2.3.4:8080".to_string()]);
}

#[tokio::test]
async fn test_ipv6_candidates_yield_usable_proxy_urls() {
    let server = MockServer::start().await;
    mount_feed(&server, "/feed", "[2001:db8::1]:8080\n").await;

    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("proxies.db");

    let pool = ProxyPool::new(options_for(&server, &["/feed"], false)).unwrap();
    pool.refresh(&db_path).await.unwrap();

    let db = Database::new(&db_path).unwrap();
    let proxies = list_proxies(&db).unwrap();
    assert_eq!(proxies, vec!["http://[2001:db8::1]:8080".to_string()]);
    assert!(reqwest::Proxy::all(&proxies[0]).is_ok());
}
