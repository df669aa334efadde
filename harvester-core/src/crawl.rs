use crate::config::HarvestConfig;
use crate::enrichment::EnrichmentPipeline;
use crate::error::{HarvestError, Result};
use crate::model::CrawlResult;
use crate::monitor::{Monitor, MonitorStatus};
use crate::scheduler::{ProgressCallback, ResultCallback, Scheduler};
use crate::submission::Submitter;
use harvester_scanner::{Browser, HttpBrowser};
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

/// Options for configuring a crawl operation
pub struct CrawlOptions {
    pub seeds: Vec<String>,
    pub config: HarvestConfig,
    /// Subscribe to this before calling [`execute_crawl`] to see live status.
    pub monitor: Option<Arc<Monitor>>,
}

impl CrawlOptions {
    pub fn new(seeds: Vec<String>, config: HarvestConfig) -> Self {
        Self {
            seeds,
            config,
            monitor: None,
        }
    }

    pub fn with_monitor(mut self, monitor: Arc<Monitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }
}

#[derive(Debug, Clone)]
pub struct CrawlSummary {
    /// Retained results, oldest first.
    pub results: Vec<CrawlResult>,
    /// Every result produced, including those evicted from retention.
    pub total_recorded: u64,
    pub status: Option<MonitorStatus>,
}

/// Extract the path component from a URL
pub fn extract_url_path(url: &str) -> String {
    Url::parse(url)
        .ok()
        .map(|u| {
            let path = u.path().to_string();
            if path.is_empty() { "/".to_string() } else { path }
        })
        .unwrap_or_else(|| url.to_string())
}

/// Crawls `options.seeds` with an HTTP-backed browser until the frontier
/// drains.
pub async fn execute_crawl(
    options: CrawlOptions,
    progress_callback: Option<ProgressCallback>,
    result_callback: Option<ResultCallback>,
) -> Result<CrawlSummary> {
    let browser: Arc<dyn Browser> = Arc::new(HttpBrowser::new(options.config.timeout())?);
    crawl_with_browser(options, browser, progress_callback, result_callback).await
}

pub async fn crawl_with_browser(
    options: CrawlOptions,
    browser: Arc<dyn Browser>,
    progress_callback: Option<ProgressCallback>,
    result_callback: Option<ResultCallback>,
) -> Result<CrawlSummary> {
    let CrawlOptions {
        seeds,
        config,
        monitor,
    } = options;

    if seeds.is_empty() {
        return Err(HarvestError::Config("no seed URLs given".to_string()));
    }

    let enrichment = EnrichmentPipeline::from_config(&config)?;
    if let Some(pipeline) = &enrichment {
        match pipeline.ocr().health().await {
            Ok(health) => info!("OCR worker ready: {}", health),
            Err(e) => warn!("OCR worker health check failed, continuing: {}", e),
        }
    }
    let submitter = Submitter::from_config(&config.submission, config.timeout())?;

    let mut scheduler = Scheduler::new(config, browser)?;
    if let Some(enrichment) = enrichment {
        scheduler = scheduler.with_enrichment(enrichment);
    }
    if let Some(submitter) = submitter {
        scheduler = scheduler.with_submitter(submitter);
    }
    if let Some(monitor) = &monitor {
        scheduler = scheduler.with_monitor(monitor.clone());
    }
    if let Some(callback) = progress_callback {
        scheduler = scheduler.with_progress_callback(callback);
    }
    if let Some(callback) = result_callback {
        scheduler = scheduler.with_result_callback(callback);
    }

    info!("Crawling {} seed(s)", seeds.len());
    scheduler.seed(&seeds).await;
    scheduler.run_until_idle().await;

    let status = match &monitor {
        Some(monitor) => {
            monitor.sample_performance(&[]).await;
            Some(monitor.status().await)
        }
        None => None,
    };

    Ok(CrawlSummary {
        results: scheduler.results().await,
        total_recorded: scheduler.total_recorded().await,
        status,
    })
}
