//! Crawl configuration: defaults, optional JSON file, `HARVESTER_*`
//! environment overrides, then whatever the caller sets last.

use crate::error::{HarvestError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OcrConfig {
    pub enabled: bool,
    pub endpoint: Option<String>,
    pub max_images: usize,
    /// Largest image, remote or inline, handed to OCR.
    pub max_image_bytes: usize,
    pub timeout_ms: u64,
    pub min_text_length: usize,
    pub language_hint: Option<String>,
    pub compression_ratio: Option<f64>,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: None,
            max_images: 4,
            max_image_bytes: 25 * 1024 * 1024,
            timeout_ms: 30_000,
            min_text_length: 24,
            language_hint: None,
            compression_ratio: None,
        }
    }
}

impl OcrConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IndexConfig {
    pub endpoint: Option<String>,
    pub timeout_ms: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SubmissionConfig {
    pub ledger_endpoint: Option<String>,
    pub artifact_endpoint: Option<String>,
    pub artifact_dir: Option<String>,
}

impl SubmissionConfig {
    pub fn is_enabled(&self) -> bool {
        self.ledger_endpoint.is_some() || self.artifact_endpoint.is_some() || self.artifact_dir.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MonitorConfig {
    pub health_check_interval_ms: u64,
    pub performance_update_interval_ms: u64,
    /// Results averaged for throughput and score.
    pub performance_window: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            health_check_interval_ms: 15_000,
            performance_update_interval_ms: 5_000,
            performance_window: 50,
        }
    }
}

impl MonitorConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn performance_update_interval(&self) -> Duration {
        Duration::from_millis(self.performance_update_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HarvestConfig {
    pub max_concurrency: usize,
    pub request_delay_ms: u64,
    pub max_depth: usize,
    pub timeout_ms: u64,
    pub error_backoff_ms: u64,
    pub idle_poll_ms: u64,
    /// In-memory results kept; older ones are only in the sink.
    pub result_capacity: usize,
    pub ocr: OcrConfig,
    pub index: IndexConfig,
    pub submission: SubmissionConfig,
    pub monitor: MonitorConfig,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            request_delay_ms: 2_000,
            max_depth: 2,
            timeout_ms: 30_000,
            error_backoff_ms: 5_000,
            idle_poll_ms: 1_000,
            result_capacity: 1_000,
            ocr: OcrConfig::default(),
            index: IndexConfig::default(),
            submission: SubmissionConfig::default(),
            monitor: MonitorConfig::default(),
        }
    }
}

impl HarvestConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Applies endpoint overrides from the process environment.
    pub fn with_env(self) -> Self {
        self.with_env_from(|key| std::env::var(key).ok())
    }

    pub fn with_env_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("HARVESTER_OCR_ENDPOINT") {
            self.ocr.endpoint = Some(v);
        }
        if let Some(v) = lookup("HARVESTER_INDEX_ENDPOINT") {
            self.index.endpoint = Some(v);
        }
        if let Some(v) = lookup("HARVESTER_LEDGER_ENDPOINT") {
            self.submission.ledger_endpoint = Some(v);
        }
        if let Some(v) = lookup("HARVESTER_ARTIFACT_ENDPOINT") {
            self.submission.artifact_endpoint = Some(v);
        }
        if let Some(v) = lookup("HARVESTER_ARTIFACT_DIR") {
            self.submission.artifact_dir = Some(v);
        }
        if let Some(v) = lookup("HARVESTER_OCR_ENABLED") {
            self.ocr.enabled = matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(HarvestError::Config("maxConcurrency must be at least 1".to_string()));
        }
        if self.result_capacity == 0 {
            return Err(HarvestError::Config("resultCapacity must be at least 1".to_string()));
        }
        if self.ocr.enabled && self.ocr.endpoint.is_some() && self.ocr.max_images == 0 {
            return Err(HarvestError::Config(
                "ocr.maxImages must be at least 1 when OCR is enabled".to_string(),
            ));
        }
        if self.ocr.enabled && self.ocr.endpoint.is_some() && self.ocr.max_image_bytes == 0 {
            return Err(HarvestError::Config(
                "ocr.maxImageBytes must be at least 1 when OCR is enabled".to_string(),
            ));
        }
        for (name, endpoint) in [
            ("ocr.endpoint", &self.ocr.endpoint),
            ("index.endpoint", &self.index.endpoint),
            ("submission.ledgerEndpoint", &self.submission.ledger_endpoint),
            ("submission.artifactEndpoint", &self.submission.artifact_endpoint),
        ] {
            if let Some(url) = endpoint
                && !(url.starts_with("http://") || url.starts_with("https://"))
            {
                return Err(HarvestError::Config(format!("{} must be an http(s) URL", name)));
            }
        }
        Ok(())
    }

    /// OCR runs only when enabled and pointed somewhere.
    pub fn ocr_active(&self) -> bool {
        self.ocr.enabled && self.ocr.endpoint.is_some()
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }
}
