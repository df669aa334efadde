// Tests for the worker pool, driven by an in-process browser

use async_trait::async_trait;
use harvester_core::config::HarvestConfig;
use harvester_core::enrichment::{EnrichmentPipeline, OcrClient};
use harvester_core::model::CrawlResult;
use harvester_core::monitor::Monitor;
use harvester_core::proof::verify;
use harvester_core::scheduler::Scheduler;
use harvester_core::submission::{LocalArtifactStore, Submitter};
use harvester_scanner::browser::{Browser, GotoOptions, Page};
use harvester_scanner::error::{Result as ScanResult, ScanError};
use harvester_scanner::frontier::CrawlTarget;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

#[derive(Clone)]
enum FakeResponse {
    Html(String),
    Fail,
}

/// Serves canned HTML and records every navigation.
#[derive(Clone, Default)]
struct FakeBrowser {
    pages: Arc<HashMap<String, FakeResponse>>,
    visits: Arc<Mutex<Vec<String>>>,
    screenshot: Option<Vec<u8>>,
    latency: Duration,
}

impl FakeBrowser {
    fn new(pages: Vec<(&str, FakeResponse)>) -> Self {
        Self {
            pages: Arc::new(pages.into_iter().map(|(u, r)| (u.to_string(), r)).collect()),
            ..Self::default()
        }
    }

    fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn with_screenshot(mut self, bytes: &[u8]) -> Self {
        self.screenshot = Some(bytes.to_vec());
        self
    }

    fn visits(&self) -> Vec<String> {
        self.visits.lock().unwrap().clone()
    }

    fn page(&self) -> FakePage {
        FakePage {
            browser: self.clone(),
            html: None,
        }
    }
}

struct FakePage {
    browser: FakeBrowser,
    html: Option<String>,
}

#[async_trait]
impl Page for FakePage {
    async fn goto(&mut self, url: &str, _options: GotoOptions) -> ScanResult<u16> {
        self.browser.visits.lock().unwrap().push(url.to_string());
        if !self.browser.latency.is_zero() {
            tokio::time::sleep(self.browser.latency).await;
        }
        match self.browser.pages.get(url) {
            Some(FakeResponse::Html(html)) => {
                self.html = Some(html.clone());
                Ok(200)
            }
            Some(FakeResponse::Fail) => Err(ScanError::Browser(format!("navigation to {} crashed", url))),
            None => Err(ScanError::Browser(format!("HTTP 404 for {}", url))),
        }
    }

    async fn content(&self) -> ScanResult<String> {
        self.html
            .clone()
            .ok_or_else(|| ScanError::Browser("no document loaded".to_string()))
    }

    async fn metrics(&self) -> ScanResult<BTreeMap<String, f64>> {
        Ok(BTreeMap::from([("loadTimeMs".to_string(), 5.0)]))
    }

    async fn screenshot(&self, _full_page: bool) -> ScanResult<Vec<u8>> {
        self.browser
            .screenshot
            .clone()
            .ok_or(ScanError::Unsupported("screenshot"))
    }

    async fn evaluate(&self, _script: &str) -> ScanResult<serde_json::Value> {
        Err(ScanError::Unsupported("evaluate"))
    }

    async fn close(&mut self) -> ScanResult<()> {
        Ok(())
    }
}

#[async_trait]
impl Browser for FakeBrowser {
    async fn new_page(&self) -> ScanResult<Box<dyn Page>> {
        Ok(Box::new(self.page()))
    }

    fn is_connected(&self) -> bool {
        true
    }

    async fn version(&self) -> ScanResult<String> {
        Ok("FakeBrowser/1.0".to_string())
    }
}

fn fast_config(concurrency: usize, max_depth: usize) -> HarvestConfig {
    HarvestConfig {
        max_concurrency: concurrency,
        max_depth,
        request_delay_ms: 1,
        error_backoff_ms: 5,
        idle_poll_ms: 10,
        timeout_ms: 2_000,
        ..HarvestConfig::default()
    }
}

fn html_with_links(title: &str, links: &[&str]) -> FakeResponse {
    let anchors: String = links
        .iter()
        .map(|l| format!(r#"<a href="{}">{}</a>"#, l, l))
        .collect();
    FakeResponse::Html(format!(
        r#"<html><head><title>{}</title></head><body><div hidden>stale banner markup</div>{}</body></html>"#,
        title, anchors
    ))
}

fn target(url: &str) -> CrawlTarget {
    CrawlTarget {
        url: url.to_string(),
        depth: 0,
        priority: 1.0,
        discovered_at: chrono::Utc::now(),
        referrer: None,
    }
}

// ============================================================================
// Example Scenarios
// ============================================================================

#[tokio::test]
async fn test_single_seed_depth_zero_yields_one_verifiable_result() {
    let browser = FakeBrowser::new(vec![(
        "https://example.com",
        html_with_links("home", &["/about", "/contact"]),
    )]);
    let scheduler = Scheduler::new(fast_config(1, 0), Arc::new(browser.clone())).unwrap();
    scheduler.seed(["https://example.com"]).await;
    scheduler.run_until_idle().await;

    let results = scheduler.results().await;
    assert_eq!(results.len(), 1);
    assert_eq!(browser.visits(), vec!["https://example.com"]);

    let result = &results[0];
    let expected_id = hex::encode(Sha256::digest(format!("https://example.com-{}", result.space_saved)));
    assert_eq!(result.crawl_id, expected_id);
    assert!(result.space_saved > 0);
    assert!(verify(&result.merkle_root, &result.merkle_proof, "https://example.com"));
    assert_eq!(result.merkle_leaves[0], "https://example.com");
}

#[tokio::test]
async fn test_discovery_follows_links_up_to_max_depth() {
    let browser = FakeBrowser::new(vec![
        ("https://site.test/", html_with_links("root", &["/a"])),
        ("https://site.test/a", html_with_links("a", &["/b"])),
        ("https://site.test/b", html_with_links("b", &["/c"])),
    ]);
    let scheduler = Scheduler::new(fast_config(2, 1), Arc::new(browser.clone())).unwrap();
    scheduler.seed(["https://site.test/"]).await;
    scheduler.run_until_idle().await;

    let mut visits = browser.visits();
    visits.sort();
    assert_eq!(visits, vec!["https://site.test/", "https://site.test/a"]);

    let depths: HashMap<String, usize> = scheduler
        .results()
        .await
        .into_iter()
        .map(|r| (r.url, r.depth))
        .collect();
    assert_eq!(depths["https://site.test/a"], 1);
}

// ============================================================================
// Concurrency Tests
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_no_url_is_dispatched_twice() {
    // Every page links to every other page.
    let urls: Vec<String> = (0..12).map(|i| format!("https://mesh.test/p{}", i)).collect();
    let paths: Vec<String> = (0..12).map(|i| format!("/p{}", i)).collect();
    let path_refs: Vec<&str> = paths.iter().map(String::as_str).collect();
    let pages = urls
        .iter()
        .map(|u| (u.as_str(), html_with_links(u, &path_refs)))
        .collect();

    let browser = FakeBrowser::new(pages).with_latency(Duration::from_millis(3));
    let scheduler = Scheduler::new(fast_config(6, 3), Arc::new(browser.clone())).unwrap();
    scheduler.seed(["https://mesh.test/p0"]).await;
    scheduler.run_until_idle().await;

    let mut visits = browser.visits();
    let total = visits.len();
    visits.sort();
    visits.dedup();
    assert_eq!(visits.len(), total, "a URL was fetched more than once");
    assert_eq!(total, 12);
    assert_eq!(scheduler.results().await.len(), 12);
}

#[tokio::test]
async fn test_failing_target_does_not_stop_worker() {
    let browser = FakeBrowser::new(vec![
        ("https://bad.test/", FakeResponse::Fail),
        ("https://good.test/", html_with_links("good", &[])),
    ]);
    let monitor = Arc::new(Monitor::new(Default::default()));
    let scheduler = Scheduler::new(fast_config(1, 0), Arc::new(browser.clone()))
        .unwrap()
        .with_monitor(monitor.clone());
    scheduler.seed(["https://bad.test/", "https://good.test/"]).await;
    scheduler.run_until_idle().await;

    assert_eq!(browser.visits(), vec!["https://bad.test/", "https://good.test/"]);
    let results = scheduler.results().await;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].url, "https://good.test/");

    let performance = monitor.sample_performance(&[]).await;
    assert_eq!(performance.total_results, 1);
}

#[tokio::test]
async fn test_missing_page_is_not_recorded() {
    let browser = FakeBrowser::new(vec![("https://ok.test/", html_with_links("ok", &["/gone"]))]);
    let scheduler = Scheduler::new(fast_config(2, 1), Arc::new(browser.clone())).unwrap();
    scheduler.seed(["https://ok.test/"]).await;
    scheduler.run_until_idle().await;

    assert_eq!(browser.visits().len(), 2);
    assert_eq!(scheduler.results().await.len(), 1);
}

// ============================================================================
// Lifecycle Tests
// ============================================================================

#[tokio::test]
async fn test_start_and_shutdown() {
    let browser = FakeBrowser::new(vec![]);
    let scheduler = Scheduler::new(fast_config(3, 1), Arc::new(browser)).unwrap();
    assert!(!scheduler.is_running());

    scheduler.start().await;
    assert!(scheduler.is_running());
    assert_eq!(scheduler.worker_states().await.len(), 3);

    scheduler.shutdown().await;
    assert!(!scheduler.is_running());
    assert!(scheduler.worker_states().await.is_empty());
}

#[tokio::test]
async fn test_shutdown_interrupts_pacing_delay() {
    let browser = FakeBrowser::new(vec![("https://slow.test/", html_with_links("slow", &[]))]);
    let config = HarvestConfig {
        request_delay_ms: 60_000,
        ..fast_config(1, 0)
    };
    let scheduler = Scheduler::new(config, Arc::new(browser)).unwrap();
    scheduler.seed(["https://slow.test/"]).await;
    scheduler.start().await;

    while scheduler.results().await.is_empty() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    tokio::time::timeout(Duration::from_secs(5), scheduler.shutdown())
        .await
        .expect("shutdown should not wait out the pacing delay");
}

#[tokio::test]
async fn test_worker_states_track_progress() {
    let browser = FakeBrowser::new(vec![
        ("https://w.test/", html_with_links("w", &["/x"])),
        ("https://w.test/x", html_with_links("x", &[])),
    ]);
    let config = HarvestConfig {
        request_delay_ms: 60_000,
        ..fast_config(1, 1)
    };
    let scheduler = Scheduler::new(config, Arc::new(browser)).unwrap();
    scheduler.seed(["https://w.test/"]).await;
    scheduler.start().await;

    let states = loop {
        let states = scheduler.worker_states().await;
        if states[0].pages_processed == 1 && states[0].current_url.is_none() {
            break states;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    };
    assert!(states[0].space_harvested > 0);
    assert_eq!(scheduler.frontier_len().await, 1);

    scheduler.shutdown().await;
}

// ============================================================================
// Retention and Callback Tests
// ============================================================================

#[tokio::test]
async fn test_result_log_is_bounded_and_callback_sees_everything() {
    let browser = FakeBrowser::new(vec![
        ("https://r.test/", html_with_links("r", &["/1", "/2", "/3"])),
        ("https://r.test/1", html_with_links("1", &[])),
        ("https://r.test/2", html_with_links("2", &[])),
        ("https://r.test/3", html_with_links("3", &[])),
    ]);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    let progress = Arc::new(Mutex::new(0usize));
    let progress_clone = progress.clone();

    let config = HarvestConfig {
        result_capacity: 2,
        ..fast_config(2, 1)
    };
    let scheduler = Scheduler::new(config, Arc::new(browser))
        .unwrap()
        .with_result_callback(Arc::new(move |result: &CrawlResult| {
            seen_clone.lock().unwrap().push(result.url.clone());
        }))
        .with_progress_callback(Arc::new(move |_worker: usize, _message: String| {
            *progress_clone.lock().unwrap() += 1;
        }));
    scheduler.seed(["https://r.test/"]).await;
    scheduler.run_until_idle().await;

    assert_eq!(seen.lock().unwrap().len(), 4);
    assert_eq!(scheduler.results().await.len(), 2);
    assert_eq!(scheduler.total_recorded().await, 4);
    assert!(*progress.lock().unwrap() >= 8);
}

// ============================================================================
// process_url Tests
// ============================================================================

#[tokio::test]
async fn test_ocr_failure_does_not_change_commitment() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ocr"))
        .respond_with(ResponseTemplate::new(500).set_body_string("model not loaded"))
        .mount(&mock_server)
        .await;

    let url = "https://ocr.test/";
    let browser = FakeBrowser::new(vec![(url, html_with_links("ocr", &["/next"]))]).with_screenshot(b"png");
    let config = fast_config(1, 0);

    let plain = Scheduler::new(config.clone(), Arc::new(browser.clone())).unwrap();
    let mut page = browser.page();
    let baseline = plain.process_url(&mut page, &target(url)).await.unwrap();

    let ocr = OcrClient::new(&mock_server.uri(), Duration::from_secs(2)).unwrap();
    let enriched = Scheduler::new(config.clone(), Arc::new(browser.clone()))
        .unwrap()
        .with_enrichment(EnrichmentPipeline::new(ocr, &config.ocr).unwrap());
    let mut page = browser.page();
    let with_failed_ocr = enriched.process_url(&mut page, &target(url)).await.unwrap();

    assert!(with_failed_ocr.ocr.is_none());
    assert_eq!(with_failed_ocr.space_saved, baseline.space_saved);
    assert_eq!(with_failed_ocr.merkle_root, baseline.merkle_root);
    assert_eq!(with_failed_ocr.crawl_id, baseline.crawl_id);
    assert_eq!(enriched.results().await.len(), 1);
}

#[tokio::test]
async fn test_successful_ocr_is_attached() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ocr"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "text": "Free shipping on every order today", "confidence": 0.8, "blocks": []
        })))
        .mount(&mock_server)
        .await;

    let url = "https://ocr.test/";
    let browser = FakeBrowser::new(vec![(url, html_with_links("ocr", &[]))]).with_screenshot(b"png");
    let config = fast_config(1, 0);
    let ocr = OcrClient::new(&mock_server.uri(), Duration::from_secs(2)).unwrap();
    let scheduler = Scheduler::new(config.clone(), Arc::new(browser.clone()))
        .unwrap()
        .with_enrichment(EnrichmentPipeline::new(ocr, &config.ocr).unwrap());

    let mut page = browser.page();
    let result = scheduler.process_url(&mut page, &target(url)).await.unwrap();
    let ocr = result.ocr.expect("OCR summary");
    assert_eq!(ocr.document_id, format!("{}::ocr", result.crawl_id));
    assert_eq!(ocr.text, "Free shipping on every order today");
    assert!(!ocr.indexed);
}

#[tokio::test]
async fn test_submission_sets_artifact_cid() {
    let dir = TempDir::new().unwrap();
    let url = "https://store.test/";
    let browser = FakeBrowser::new(vec![(url, html_with_links("store", &[]))]);
    let scheduler = Scheduler::new(fast_config(1, 0), Arc::new(browser.clone()))
        .unwrap()
        .with_submitter(Submitter::new().with_store(Arc::new(LocalArtifactStore::new(dir.path()))));

    let mut page = browser.page();
    let result = scheduler.process_url(&mut page, &target(url)).await.unwrap();
    let cid = result.artifact_cid.expect("artifact cid");
    assert!(cid.starts_with("sha256-"));
    assert!(dir.path().join(format!("{}.json", cid)).exists());
}

#[tokio::test]
async fn test_process_url_propagates_load_failure() {
    let browser = FakeBrowser::new(vec![("https://down.test/", FakeResponse::Fail)]);
    let scheduler = Scheduler::new(fast_config(1, 0), Arc::new(browser.clone())).unwrap();
    let mut page = browser.page();
    assert!(scheduler.process_url(&mut page, &target("https://down.test/")).await.is_err());
    assert!(scheduler.results().await.is_empty());
}

#[test]
fn test_invalid_config_is_rejected() {
    let config = HarvestConfig {
        max_concurrency: 0,
        ..HarvestConfig::default()
    };
    assert!(Scheduler::new(config, Arc::new(FakeBrowser::default())).is_err());
}
