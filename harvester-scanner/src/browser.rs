//! Browser-automation capability.
//!
//! The crawler only needs a handful of page operations; anything that can
//! navigate, hand back markup and (optionally) take screenshots can drive it.

use crate::error::{Result, ScanError};
use async_trait::async_trait;
use reqwest::Client;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

const USER_AGENT: &str = concat!("Harvester/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitUntil {
    Load,
    DomContentLoaded,
    NetworkIdle,
}

#[derive(Debug, Clone, Copy)]
pub struct GotoOptions {
    pub timeout: Duration,
    pub wait_until: WaitUntil,
}

impl GotoOptions {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            wait_until: WaitUntil::NetworkIdle,
        }
    }
}

/// One tab. Never shared between workers.
#[async_trait]
pub trait Page: Send + Sync {
    /// Navigates and waits per `options`; returns the HTTP status.
    async fn goto(&mut self, url: &str, options: GotoOptions) -> Result<u16>;
    async fn content(&self) -> Result<String>;
    async fn metrics(&self) -> Result<BTreeMap<String, f64>>;
    async fn screenshot(&self, full_page: bool) -> Result<Vec<u8>>;
    async fn evaluate(&self, script: &str) -> Result<serde_json::Value>;
    async fn close(&mut self) -> Result<()>;
}

#[async_trait]
pub trait Browser: Send + Sync {
    async fn new_page(&self) -> Result<Box<dyn Page>>;
    fn is_connected(&self) -> bool;
    /// Cheap round trip used as a liveness probe.
    async fn version(&self) -> Result<String>;
}

/// Fetch-only browser backed by `reqwest`. Pages are never rendered, so
/// screenshots and script evaluation are unsupported.
pub struct HttpBrowser {
    client: Client,
    connected: Arc<AtomicBool>,
}

impl HttpBrowser {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .connect_timeout(timeout / 2)
            .pool_max_idle_per_host(50)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;

        Ok(Self {
            client,
            connected: Arc::new(AtomicBool::new(true)),
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Marks the browser gone; new pages are refused afterwards.
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::Release);
    }
}

#[async_trait]
impl Browser for HttpBrowser {
    async fn new_page(&self) -> Result<Box<dyn Page>> {
        if !self.is_connected() {
            return Err(ScanError::Browser("browser disconnected".to_string()));
        }
        Ok(Box::new(HttpPage {
            client: self.client.clone(),
            body: None,
            status: 0,
            load_time: Duration::ZERO,
        }))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn version(&self) -> Result<String> {
        if !self.is_connected() {
            return Err(ScanError::Browser("browser disconnected".to_string()));
        }
        Ok(USER_AGENT.to_string())
    }
}

pub struct HttpPage {
    client: Client,
    body: Option<String>,
    status: u16,
    load_time: Duration,
}

#[async_trait]
impl Page for HttpPage {
    async fn goto(&mut self, url: &str, options: GotoOptions) -> Result<u16> {
        debug!("Fetching {}", url);

        let start = Instant::now();
        let response = self
            .client
            .get(url)
            .timeout(options.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ScanError::Timeout {
                        url: url.to_string(),
                        after: options.timeout,
                    }
                } else {
                    ScanError::HttpError(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScanError::Browser(format!("{} answered HTTP {}", url, status.as_u16())));
        }

        let is_html = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("text/html") || ct.contains("application/xhtml"))
            .unwrap_or(false);
        if !is_html {
            return Err(ScanError::ParseError(format!("{} is not an HTML document", url)));
        }

        let body = response.text().await?;
        self.load_time = start.elapsed();
        self.status = status.as_u16();
        self.body = Some(body);
        Ok(self.status)
    }

    async fn content(&self) -> Result<String> {
        self.body
            .clone()
            .ok_or_else(|| ScanError::Browser("no document loaded".to_string()))
    }

    async fn metrics(&self) -> Result<BTreeMap<String, f64>> {
        let body = self
            .body
            .as_ref()
            .ok_or_else(|| ScanError::Browser("no document loaded".to_string()))?;
        let mut metrics = BTreeMap::new();
        metrics.insert("loadTimeMs".to_string(), self.load_time.as_millis() as f64);
        metrics.insert("status".to_string(), self.status as f64);
        metrics.insert("transferBytes".to_string(), body.len() as f64);
        Ok(metrics)
    }

    async fn screenshot(&self, _full_page: bool) -> Result<Vec<u8>> {
        Err(ScanError::Unsupported("screenshot"))
    }

    async fn evaluate(&self, _script: &str) -> Result<serde_json::Value> {
        Err(ScanError::Unsupported("evaluate"))
    }

    async fn close(&mut self) -> Result<()> {
        self.body = None;
        Ok(())
    }
}
