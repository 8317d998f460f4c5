//! End-to-end crawls against a mock listing site
//!
//! The site serves list pages at `/cards?page=N&tier=P` and detail pages at
//! `/cards/info/ID`. Detail pages that should fail answer 404, which the
//! fetcher treats as an unresolved attempt.

use gleaner::config::{Config, PartitionEntry};
use gleaner::crawler::{Coordinator, CrawlOptions, RunStatus};
use gleaner::renderer::HttpRenderer;
use gleaner::storage::{JsonStore, StateDocument};
use gleaner::{CrawlState, Record, StateStore, WorkCoordinate};
use gleaner::state::CandidateItem;
use tempfile::TempDir;
use tokio::sync::watch;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn list_page(ids: &[u32]) -> String {
    let items: String = ids
        .iter()
        .map(|id| {
            format!(
                r#"<div class="card"><a href="/cards/info/{id}"><img src="/img/{id}.png" alt="Card {id}"></a></div>"#,
                id = id
            )
        })
        .collect();
    format!("<html><body>{}</body></html>", items)
}

fn detail_page(category: &str, maker: &str) -> String {
    format!(
        r#"<html><body>
           <ol class="breadcrumb-new">
             <li itemprop="itemListElement"><span itemprop="name">Home</span><meta itemprop="position" content="1"></li>
             <li itemprop="itemListElement"><span itemprop="name">Tier 1</span><meta itemprop="position" content="2"></li>
             <li itemprop="itemListElement"><span itemprop="name">{}</span><meta itemprop="position" content="3"></li>
           </ol>
           <p>Card Maker: <a href="/u/{}">{}</a></p>
           </body></html>"#,
        category, maker, maker
    )
}

const NO_RESULTS: &str = "<html><body><h3>No cards found</h3></body></html>";

async fn mount_list(server: &MockServer, page: u32, body: String) {
    Mock::given(method("GET"))
        .and(path("/cards"))
        .and(query_param("page", page.to_string()))
        .and(query_param("tier", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

async fn mount_detail(server: &MockServer, id: u32, category: Option<&str>) {
    let response = match category {
        Some(category) => ResponseTemplate::new(200).set_body_string(detail_page(category, "Kira")),
        None => ResponseTemplate::new(404),
    };
    Mock::given(method("GET"))
        .and(path(format!("/cards/info/{}", id)))
        .respond_with(response)
        .mount(server)
        .await;
}

fn create_test_config(server: &MockServer, dir: &TempDir, last_page: Option<u32>) -> Config {
    let mut config = Config::default();
    config.site.list_url = format!("{}/cards?page={{page}}&tier={{partition}}", server.uri());
    config.site.detail_host_hint = "127.0.0.1".to_string();
    config.partitions = vec![PartitionEntry::new("1", 1, last_page)];
    config.crawler.page_concurrency = 1;
    config.crawler.item_concurrency = 3;
    config.crawler.request_delay_ms = 0;
    config.crawler.scan_retry_delay_ms = 10;
    config.fetch.max_attempts = 1;
    config.fetch.backoff_ms = 0;
    config.renderer.list_timeout_secs = 5;
    config.renderer.detail_timeout_secs = 5;
    config.renderer.poll_interval_ms = 50;
    config.output.state_path = dir.path().join("cards.json");
    config.output.diagnostics_dir = dir.path().join("diagnostics");
    config
}

async fn crawl(config: Config) -> gleaner::crawler::RunReport {
    let renderer = HttpRenderer::new(&config.renderer).expect("Failed to build renderer");
    let mut coordinator = Coordinator::new(config, renderer, CrawlOptions::default())
        .expect("Failed to create coordinator");
    coordinator
        .run(watch::channel(false).1)
        .await
        .expect("Crawl failed")
}

fn read_state(config: &Config) -> StateDocument {
    JsonStore::read_document(&config.output.state_path).expect("State document missing")
}

async fn list_requests(server: &MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.url.path() == "/cards")
        .map(|r| r.url.query().unwrap_or_default().to_string())
        .collect()
}

#[tokio::test]
async fn test_one_failure_of_three_completes_page() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_list(&server, 1, list_page(&[1, 2, 3])).await;
    mount_detail(&server, 1, Some("Naruto")).await;
    mount_detail(&server, 2, Some("Bleach")).await;
    mount_detail(&server, 3, None).await;

    let config = create_test_config(&server, &dir, Some(1));
    let report = crawl(config.clone()).await;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.pages_completed, 1);
    assert_eq!(report.items_resolved, 2);
    assert_eq!(report.items_dropped, 1);

    let document = read_state(&config);
    assert_eq!(document.completed_coordinates, vec!["1-1".to_string()]);
    assert_eq!(document.total_records, 2);
    let mut categories: Vec<&str> = document.records.iter().map(|r| r.category.as_str()).collect();
    categories.sort();
    assert_eq!(categories, vec!["Bleach", "Naruto"]);
    assert!(document.records.iter().all(|r| r.attribution_name == "Kira"));
    assert!(document.records.iter().all(|r| r.partition == "1" && r.page_index == 1));

    let stats = document.stats.expect("Stats missing");
    assert_eq!(stats.total_attempts, 3);
    assert_eq!(stats.successful_attempts, 2);
}

#[tokio::test]
async fn test_two_failures_of_three_leaves_page_pending() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_list(&server, 1, list_page(&[1, 2, 3])).await;
    mount_detail(&server, 1, Some("Naruto")).await;
    mount_detail(&server, 2, None).await;
    mount_detail(&server, 3, None).await;

    let config = create_test_config(&server, &dir, Some(1));
    let report = crawl(config.clone()).await;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.pages_completed, 0);
    assert_eq!(report.pages_pending, 1);

    let document = read_state(&config);
    assert!(document.completed_coordinates.is_empty());
    // The resolved item is kept even though its page is not complete
    assert_eq!(document.total_records, 1);
}

#[tokio::test]
async fn test_resume_skips_completed_pages() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_list(&server, 1, list_page(&[1])).await;
    mount_list(&server, 2, list_page(&[2])).await;
    mount_detail(&server, 1, Some("Naruto")).await;
    mount_detail(&server, 2, Some("Bleach")).await;

    let config = create_test_config(&server, &dir, Some(2));

    // A previous run finished page 1
    let item = CandidateItem::new(
        format!("{}/img/1.png", server.uri()),
        format!("{}/cards/info/1", server.uri()),
        "Card 1",
    );
    let mut state = CrawlState::new();
    state
        .records
        .push(Record::enriched(&item, &WorkCoordinate::new("1", 1), "Naruto", "Kira"));
    state.completed.insert(WorkCoordinate::new("1", 1));
    JsonStore::from_config(&config.output, config.partition_order())
        .save(&state)
        .unwrap();

    let report = crawl(config.clone()).await;

    assert_eq!(report.pages_completed, 1);
    assert_eq!(report.items_resolved, 1);
    assert_eq!(list_requests(&server).await, vec!["page=2&tier=1".to_string()]);

    let document = read_state(&config);
    assert_eq!(
        document.completed_coordinates,
        vec!["1-1".to_string(), "1-2".to_string()]
    );
    assert_eq!(document.total_records, 2);
}

#[tokio::test]
async fn test_open_partition_stops_at_no_results_page() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_list(&server, 1, list_page(&[1, 2])).await;
    mount_list(&server, 2, NO_RESULTS.to_string()).await;
    mount_detail(&server, 1, Some("Naruto")).await;
    mount_detail(&server, 2, Some("Naruto")).await;

    let config = create_test_config(&server, &dir, None);
    let report = crawl(config.clone()).await;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.partitions_ended, vec!["1".to_string()]);
    assert_eq!(
        list_requests(&server).await,
        vec!["page=1&tier=1".to_string(), "page=2&tier=1".to_string()]
    );

    let document = read_state(&config);
    assert_eq!(document.total_records, 2);
}

#[tokio::test]
async fn test_blocked_detail_page_is_not_recorded() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_list(&server, 1, list_page(&[1, 2, 3])).await;
    mount_detail(&server, 1, Some("Naruto")).await;
    mount_detail(&server, 2, Some("Naruto")).await;
    Mock::given(method("GET"))
        .and(path("/cards/info/3"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<p>Please complete the CAPTCHA</p>"))
        .mount(&server)
        .await;

    let config = create_test_config(&server, &dir, Some(1));
    let report = crawl(config.clone()).await;

    assert_eq!(report.items_resolved, 2);
    let document = read_state(&config);
    assert_eq!(document.total_records, 2);
    assert!(!document.records.iter().any(|r| r.identity.ends_with("/img/3.png")));
}
