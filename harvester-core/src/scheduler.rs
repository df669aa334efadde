//! Worker pool over the priority frontier.
//!
//! Every frontier mutation happens under one mutex: a target is marked
//! visited in the same critical section that queues it, and `in_flight` is
//! bumped in the same section that dequeues it. Idle detection relies on
//! both.

use crate::config::HarvestConfig;
use crate::enrichment::EnrichmentPipeline;
use crate::error::Result;
use crate::model::{CrawlResult, WorkerState, WorkerStatus};
use crate::monitor::{Monitor, SharedWorkers};
use crate::proof::{build_commitment, generate_crawl_id};
use crate::submission::Submitter;
use harvester_scanner::{Analyzer, Browser, CrawlTarget, Frontier, Page};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub type ProgressCallback = Arc<dyn Fn(usize, String) + Send + Sync>;
pub type ResultCallback = Arc<dyn Fn(&CrawlResult) + Send + Sync>;

/// Bounded in-memory retention; the oldest result is evicted first.
#[derive(Debug)]
pub struct ResultLog {
    capacity: usize,
    entries: VecDeque<CrawlResult>,
    total: u64,
}

impl ResultLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
            total: 0,
        }
    }

    pub fn push(&mut self, result: CrawlResult) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(result);
        self.total += 1;
    }

    pub fn snapshot(&self) -> Vec<CrawlResult> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Results ever recorded, including evicted ones.
    pub fn total_recorded(&self) -> u64 {
        self.total
    }
}

/// Everything needed to take one target end to end.
#[derive(Clone)]
struct Pipeline {
    config: Arc<HarvestConfig>,
    analyzer: Arc<Analyzer>,
    frontier: Arc<Mutex<Frontier>>,
    results: Arc<Mutex<ResultLog>>,
    enrichment: Option<Arc<EnrichmentPipeline>>,
    submitter: Option<Arc<Submitter>>,
    monitor: Option<Arc<Monitor>>,
    result_callback: Option<ResultCallback>,
}

impl Pipeline {
    async fn process(&self, page: &mut dyn Page, target: &CrawlTarget) -> Result<CrawlResult> {
        let start = Instant::now();
        let report = self
            .analyzer
            .analyze_page(page, &target.url, self.config.timeout())
            .await?;

        {
            let mut frontier = self.frontier.lock().await;
            frontier.record_page(&report);
            if target.depth < frontier.max_depth() {
                let mut queued = 0;
                for link in report.outbound_links() {
                    if frontier.discover(&link, target.depth + 1, Some(&target.url)).is_queued() {
                        queued += 1;
                    }
                }
                debug!("Queued {} new links from {}", queued, target.url);
            }
        }

        let commitment = build_commitment(&report.url, &report.analysis);
        if !commitment.is_available() {
            warn!("Recording {} without a commitment", target.url);
        }
        let crawl_id = generate_crawl_id(&report.url, &report.analysis);
        let mut result = CrawlResult::new(report, target.depth, commitment, crawl_id);

        if let Some(enrichment) = &self.enrichment {
            match page.content().await {
                Ok(html) => {
                    match enrichment.enrich(page, &result.url, &result.crawl_id, &html).await {
                        Ok(ocr) => result.ocr = ocr,
                        Err(e) => warn!("Enrichment failed for {}: {}", result.url, e),
                    }
                }
                Err(e) => warn!("Enrichment skipped for {}: {}", result.url, e),
            }
        }

        result.processing_ms = start.elapsed().as_millis() as u64;

        if let Some(submitter) = &self.submitter {
            submitter.submit(&mut result).await;
        }

        self.record(&result).await;
        Ok(result)
    }

    async fn record(&self, result: &CrawlResult) {
        self.results.lock().await.push(result.clone());
        if let Some(monitor) = &self.monitor {
            monitor.record_result(result).await;
        }
        if let Some(callback) = &self.result_callback {
            callback(result);
        }
    }
}

pub struct Scheduler {
    pipeline: Pipeline,
    browser: Arc<dyn Browser>,
    workers: SharedWorkers,
    running: Arc<AtomicBool>,
    in_flight: Arc<AtomicUsize>,
    wake: Arc<Notify>,
    progress_callback: Option<ProgressCallback>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(config: HarvestConfig, browser: Arc<dyn Browser>) -> Result<Self> {
        config.validate()?;
        let frontier = Frontier::new(config.max_depth);
        let results = ResultLog::new(config.result_capacity);

        Ok(Self {
            pipeline: Pipeline {
                config: Arc::new(config),
                analyzer: Arc::new(Analyzer::new()),
                frontier: Arc::new(Mutex::new(frontier)),
                results: Arc::new(Mutex::new(results)),
                enrichment: None,
                submitter: None,
                monitor: None,
                result_callback: None,
            },
            browser,
            workers: Arc::new(Mutex::new(Vec::new())),
            running: Arc::new(AtomicBool::new(false)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            wake: Arc::new(Notify::new()),
            progress_callback: None,
            handles: Mutex::new(Vec::new()),
        })
    }

    pub fn with_analyzer(mut self, analyzer: Analyzer) -> Self {
        self.pipeline.analyzer = Arc::new(analyzer);
        self
    }

    pub fn with_enrichment(mut self, enrichment: EnrichmentPipeline) -> Self {
        self.pipeline.enrichment = Some(Arc::new(enrichment));
        self
    }

    pub fn with_submitter(mut self, submitter: Submitter) -> Self {
        self.pipeline.submitter = Some(Arc::new(submitter));
        self
    }

    pub fn with_monitor(mut self, monitor: Arc<Monitor>) -> Self {
        self.pipeline.monitor = Some(monitor);
        self
    }

    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    pub fn with_result_callback(mut self, callback: ResultCallback) -> Self {
        self.pipeline.result_callback = Some(callback);
        self
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.pipeline.config
    }

    pub async fn seed<I, S>(&self, urls: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut frontier = self.pipeline.frontier.lock().await;
        for url in urls {
            frontier.enqueue_seed(url.as_ref());
        }
    }

    /// Spawns `max_concurrency` worker loops. A second call while running
    /// does nothing.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::AcqRel) {
            debug!("Scheduler already running");
            return;
        }

        let concurrency = self.pipeline.config.max_concurrency;
        *self.workers.lock().await = (0..concurrency).map(WorkerState::new).collect();

        if let Some(monitor) = &self.pipeline.monitor {
            monitor.start(self.browser.clone(), self.workers.clone());
        }

        let mut handles = self.handles.lock().await;
        for id in 0..concurrency {
            let worker = Worker {
                id,
                pipeline: self.pipeline.clone(),
                browser: self.browser.clone(),
                workers: self.workers.clone(),
                running: self.running.clone(),
                in_flight: self.in_flight.clone(),
                wake: self.wake.clone(),
                progress: self.progress_callback.clone(),
            };
            handles.push(tokio::spawn(worker.run()));
        }
        info!("Started {} crawl workers", concurrency);
    }

    /// Clears the running flag and waits for every loop to finish its
    /// current target.
    pub async fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
        self.wake.notify_waiters();

        let handles: Vec<_> = self.handles.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Worker task ended abnormally: {}", e);
            }
        }

        if let Some(monitor) = &self.pipeline.monitor {
            monitor.stop();
        }
        self.workers.lock().await.clear();
        info!("Scheduler stopped");
    }

    /// Runs until the frontier is drained and nothing is in flight.
    pub async fn run_until_idle(&self) {
        self.start().await;
        let poll = self.pipeline.config.idle_poll();
        loop {
            tokio::time::sleep(poll).await;
            let frontier = self.pipeline.frontier.lock().await;
            if frontier.is_empty() && self.in_flight.load(Ordering::Acquire) == 0 {
                break;
            }
        }
        self.shutdown().await;
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub async fn worker_states(&self) -> Vec<WorkerState> {
        self.workers.lock().await.clone()
    }

    pub async fn results(&self) -> Vec<CrawlResult> {
        self.pipeline.results.lock().await.snapshot()
    }

    pub async fn total_recorded(&self) -> u64 {
        self.pipeline.results.lock().await.total_recorded()
    }

    pub async fn frontier_len(&self) -> usize {
        self.pipeline.frontier.lock().await.len()
    }

    /// Takes one target through analysis, proof, enrichment and submission,
    /// and records the result.
    pub async fn process_url(&self, page: &mut dyn Page, target: &CrawlTarget) -> Result<CrawlResult> {
        self.pipeline.process(page, target).await
    }
}

struct Worker {
    id: usize,
    pipeline: Pipeline,
    browser: Arc<dyn Browser>,
    workers: SharedWorkers,
    running: Arc<AtomicBool>,
    in_flight: Arc<AtomicUsize>,
    wake: Arc<Notify>,
    progress: Option<ProgressCallback>,
}

impl Worker {
    async fn run(self) {
        debug!("Worker {} started", self.id);
        let config = self.pipeline.config.clone();

        while self.running.load(Ordering::Acquire) {
            let target = {
                let mut frontier = self.pipeline.frontier.lock().await;
                let target = frontier.next();
                if target.is_some() {
                    self.in_flight.fetch_add(1, Ordering::AcqRel);
                }
                target
            };

            let Some(target) = target else {
                self.pause(config.idle_poll()).await;
                continue;
            };

            self.set_state(|state| {
                state.status = WorkerStatus::Processing;
                state.current_url = Some(target.url.clone());
            })
            .await;
            self.report(format!("Processing {}", target.url));

            let outcome = self.crawl(&target).await;

            match &outcome {
                Ok(result) => {
                    let saved = result.space_saved;
                    self.set_state(|state| {
                        state.pages_processed += 1;
                        state.space_harvested += saved;
                    })
                    .await;
                    self.report(format!("Harvested {} bytes from {}", saved, target.url));
                }
                Err(e) => {
                    warn!("Worker {} failed on {}: {}", self.id, target.url, e);
                    if let Some(monitor) = &self.pipeline.monitor {
                        monitor.record_error(Some(&target.url), e.to_string()).await;
                    }
                    self.report(format!("Failed {}", target.url));
                }
            }

            self.set_state(|state| {
                state.status = WorkerStatus::Active;
                state.current_url = None;
            })
            .await;
            self.in_flight.fetch_sub(1, Ordering::AcqRel);

            let delay = if outcome.is_ok() {
                config.request_delay()
            } else {
                config.error_backoff()
            };
            self.pause(delay).await;
        }

        debug!("Worker {} stopped", self.id);
    }

    /// One page per target; tabs are never shared.
    async fn crawl(&self, target: &CrawlTarget) -> Result<CrawlResult> {
        let mut page = self.browser.new_page().await?;
        let outcome = self.pipeline.process(page.as_mut(), target).await;
        if let Err(e) = page.close().await {
            debug!("Closing page for {} failed: {}", target.url, e);
        }
        outcome
    }

    /// Sleeps, waking early on shutdown.
    async fn pause(&self, duration: Duration) {
        if duration.is_zero() {
            tokio::task::yield_now().await;
            return;
        }
        let notified = self.wake.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a shutdown in between is not missed.
        notified.as_mut().enable();
        if !self.running.load(Ordering::Acquire) {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = notified => {}
        }
    }

    async fn set_state<F>(&self, update: F)
    where
        F: FnOnce(&mut WorkerState),
    {
        let mut workers = self.workers.lock().await;
        if let Some(state) = workers.get_mut(self.id) {
            update(state);
        }
    }

    fn report(&self, message: String) {
        if let Some(callback) = &self.progress {
            callback(self.id, message);
        }
    }
}
