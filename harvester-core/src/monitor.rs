//! Periodic health checks and rolling performance samples, published on a
//! broadcast channel.

use crate::config::MonitorConfig;
use crate::model::{CrawlResult, WorkerState, WorkerStatus};
use chrono::{DateTime, Utc};
use harvester_scanner::Browser;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const ERROR_HISTORY: usize = 10;
const DEGRADED_AFTER: u32 = 3;
const VERSION_TIMEOUT: Duration = Duration::from_secs(5);
const CHANNEL_CAPACITY: usize = 64;
/// Assumed page size for `/proc/self/statm`.
const PAGE_SIZE: u64 = 4096;

pub type SharedWorkers = Arc<Mutex<Vec<WorkerState>>>;
pub type UpdateCallback = Arc<dyn Fn(&StatusUpdate) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    pub url: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub browser_connected: bool,
    pub browser_version: Option<String>,
    pub consecutive_errors: u32,
    pub error_history: Vec<ErrorRecord>,
    pub last_check: Option<DateTime<Utc>>,
}

impl Default for HealthSnapshot {
    fn default() -> Self {
        Self {
            status: HealthStatus::Healthy,
            browser_connected: false,
            browser_version: None,
            consecutive_errors: 0,
            error_history: Vec::new(),
            last_check: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSnapshot {
    pub timestamp: Option<DateTime<Utc>>,
    pub results_per_minute: usize,
    pub average_processing_ms: f64,
    pub average_optimization_score: f64,
    pub total_results: u64,
    pub total_space_saved: u64,
    pub workers: usize,
    pub busy_workers: usize,
    pub runtime_workers: usize,
    pub alive_tasks: usize,
    pub resident_memory_bytes: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "snapshot", rename_all = "lowercase")]
pub enum StatusUpdate {
    Health(HealthSnapshot),
    Performance(PerformanceSnapshot),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorStatus {
    pub health: HealthSnapshot,
    pub performance: PerformanceSnapshot,
}

struct Sample {
    processing_ms: u64,
    optimization_score: f64,
}

#[derive(Default)]
struct MonitorState {
    health: HealthSnapshot,
    performance: PerformanceSnapshot,
    consecutive_errors: u32,
    errors: VecDeque<ErrorRecord>,
    window: VecDeque<Sample>,
    last_minute: VecDeque<DateTime<Utc>>,
    total_results: u64,
    total_space_saved: u64,
}

impl MonitorState {
    fn prune_last_minute(&mut self, now: DateTime<Utc>) {
        let cutoff = now - chrono::Duration::minutes(1);
        while self.last_minute.front().is_some_and(|t| *t < cutoff) {
            self.last_minute.pop_front();
        }
    }
}

pub struct Monitor {
    config: MonitorConfig,
    state: Mutex<MonitorState>,
    sender: broadcast::Sender<StatusUpdate>,
    loops: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Monitor {
    pub fn new(config: MonitorConfig) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            config,
            state: Mutex::new(MonitorState::default()),
            sender,
            loops: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusUpdate> {
        self.sender.subscribe()
    }

    /// Delivers every update to `callback` on its own task, so a panicking
    /// callback only ends its own delivery.
    pub fn on_update(&self, callback: UpdateCallback) -> JoinHandle<()> {
        let mut receiver = self.sender.subscribe();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(update) => callback(&update),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Status subscriber lagged, skipped {} updates", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    fn publish(&self, update: StatusUpdate) {
        // No receivers is fine.
        let _ = self.sender.send(update);
    }

    /// Spawns the health and performance loops.
    pub fn start(self: &Arc<Self>, browser: Arc<dyn Browser>, workers: SharedWorkers) {
        let mut loops = match self.loops.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !loops.is_empty() {
            debug!("Monitor already running");
            return;
        }

        let monitor = self.clone();
        let health_every = self.config.health_check_interval();
        loops.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(health_every);
            loop {
                interval.tick().await;
                monitor.check_health(browser.as_ref()).await;
            }
        }));

        let monitor = self.clone();
        let performance_every = self.config.performance_update_interval();
        loops.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(performance_every);
            loop {
                interval.tick().await;
                let snapshot = workers.lock().await.clone();
                monitor.sample_performance(&snapshot).await;
            }
        }));

        info!(
            "Monitor started (health every {:?}, performance every {:?})",
            health_every, performance_every
        );
    }

    pub fn stop(&self) {
        let mut loops = match self.loops.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for handle in loops.drain(..) {
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        match self.loops.lock() {
            Ok(guard) => !guard.is_empty(),
            Err(poisoned) => !poisoned.into_inner().is_empty(),
        }
    }

    pub async fn record_result(&self, result: &CrawlResult) {
        let mut state = self.state.lock().await;
        state.consecutive_errors = 0;
        state.total_results += 1;
        state.total_space_saved += result.space_saved;
        state.last_minute.push_back(result.timestamp);
        state.prune_last_minute(Utc::now());
        state.window.push_back(Sample {
            processing_ms: result.processing_ms,
            optimization_score: result.optimization_score,
        });
        while state.window.len() > self.config.performance_window.max(1) {
            state.window.pop_front();
        }
    }

    pub async fn record_error(&self, url: Option<&str>, message: impl Into<String>) {
        let mut state = self.state.lock().await;
        state.consecutive_errors += 1;
        state.errors.push_back(ErrorRecord {
            timestamp: Utc::now(),
            url: url.map(str::to_string),
            message: message.into(),
        });
        while state.errors.len() > ERROR_HISTORY {
            state.errors.pop_front();
        }
    }

    /// Probes the browser and publishes the resulting snapshot.
    pub async fn check_health(&self, browser: &dyn Browser) -> HealthSnapshot {
        let connected = browser.is_connected();
        let version = if connected {
            match tokio::time::timeout(VERSION_TIMEOUT, browser.version()).await {
                Ok(Ok(version)) => Ok(version),
                Ok(Err(e)) => Err(format!("browser version check failed: {}", e)),
                Err(_) => Err(format!("browser unresponsive for {:?}", VERSION_TIMEOUT)),
            }
        } else {
            Err("browser disconnected".to_string())
        };

        let snapshot = {
            let mut state = self.state.lock().await;
            let previous = state.health.status;

            let (status, browser_version) = match version {
                Ok(v) => {
                    let status = if state.consecutive_errors >= DEGRADED_AFTER {
                        HealthStatus::Degraded
                    } else {
                        HealthStatus::Healthy
                    };
                    (status, Some(v))
                }
                Err(message) => {
                    state.errors.push_back(ErrorRecord {
                        timestamp: Utc::now(),
                        url: None,
                        message,
                    });
                    while state.errors.len() > ERROR_HISTORY {
                        state.errors.pop_front();
                    }
                    (HealthStatus::Unhealthy, None)
                }
            };

            if status != previous {
                match status {
                    HealthStatus::Unhealthy => error!("Health is now unhealthy"),
                    HealthStatus::Degraded => warn!(
                        "Health degraded after {} consecutive errors",
                        state.consecutive_errors
                    ),
                    HealthStatus::Healthy => info!("Health recovered"),
                }
            }

            state.health = HealthSnapshot {
                status,
                browser_connected: connected,
                browser_version,
                consecutive_errors: state.consecutive_errors,
                error_history: state.errors.iter().cloned().collect(),
                last_check: Some(Utc::now()),
            };
            state.health.clone()
        };

        self.publish(StatusUpdate::Health(snapshot.clone()));
        snapshot
    }

    /// Computes a performance snapshot from recorded results and publishes it.
    pub async fn sample_performance(&self, workers: &[WorkerState]) -> PerformanceSnapshot {
        let resident_memory_bytes = resident_memory().await;
        let (runtime_workers, alive_tasks) = runtime_counts();
        let now = Utc::now();

        let snapshot = {
            let mut state = self.state.lock().await;
            state.prune_last_minute(now);

            let samples = state.window.len();
            let (average_processing_ms, average_optimization_score) = if samples == 0 {
                (0.0, 0.0)
            } else {
                let processing: u64 = state.window.iter().map(|s| s.processing_ms).sum();
                let score: f64 = state.window.iter().map(|s| s.optimization_score).sum();
                (processing as f64 / samples as f64, score / samples as f64)
            };

            state.performance = PerformanceSnapshot {
                timestamp: Some(now),
                results_per_minute: state.last_minute.len(),
                average_processing_ms,
                average_optimization_score,
                total_results: state.total_results,
                total_space_saved: state.total_space_saved,
                workers: workers.len(),
                busy_workers: workers
                    .iter()
                    .filter(|w| w.status == WorkerStatus::Processing)
                    .count(),
                runtime_workers,
                alive_tasks,
                resident_memory_bytes,
            };
            state.performance.clone()
        };

        self.publish(StatusUpdate::Performance(snapshot.clone()));
        snapshot
    }

    /// Latest snapshots; never measures.
    pub async fn status(&self) -> MonitorStatus {
        let state = self.state.lock().await;
        MonitorStatus {
            health: state.health.clone(),
            performance: state.performance.clone(),
        }
    }

    pub async fn health_status(&self) -> HealthSnapshot {
        self.state.lock().await.health.clone()
    }

    pub async fn performance_metrics(&self) -> PerformanceSnapshot {
        self.state.lock().await.performance.clone()
    }
}

fn runtime_counts() -> (usize, usize) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            let metrics = handle.metrics();
            (metrics.num_workers(), metrics.num_alive_tasks())
        }
        Err(_) => (0, 0),
    }
}

async fn resident_memory() -> Option<u64> {
    let statm = tokio::fs::read_to_string("/proc/self/statm").await.ok()?;
    parse_statm(&statm)
}

fn parse_statm(statm: &str) -> Option<u64> {
    let pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(pages * PAGE_SIZE)
}
