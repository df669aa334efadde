//! Best-effort OCR over screenshots and page images, forwarded to a
//! retrieval index. Nothing in here may fail a crawl.

use crate::config::{HarvestConfig, IndexConfig, OcrConfig};
use crate::error::{HarvestError, Result, check_response};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use harvester_scanner::Page;
use harvester_scanner::links::resolve_url;
use reqwest::Client;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactSource {
    Screenshot,
    Image(String),
}

impl ArtifactSource {
    pub fn label(&self) -> String {
        match self {
            ArtifactSource::Screenshot => "screenshot".to_string(),
            ArtifactSource::Image(url) => url.clone(),
        }
    }
}

/// A binary capture handed to OCR.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub source: ArtifactSource,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl Artifact {
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime, STANDARD.encode(&self.bytes))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OcrRequest<'a> {
    base64_data: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    language_hint: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    compression_ratio: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OcrBlock {
    pub text: String,
    pub confidence: Option<f64>,
    pub bbox: Option<Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrResponse {
    pub text: String,
    pub confidence: Option<f64>,
    pub language: Option<String>,
    pub model: Option<String>,
    pub latency_ms: Option<u64>,
    pub request_id: Option<String>,
    #[serde(default)]
    pub blocks: Vec<OcrBlock>,
}

/// Client for the OCR worker (`POST <endpoint>/ocr`).
#[derive(Clone)]
pub struct OcrClient {
    client: Client,
    endpoint: String,
    language_hint: Option<String>,
    compression_ratio: Option<f64>,
}

impl OcrClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            language_hint: None,
            compression_ratio: None,
        })
    }

    pub fn from_config(endpoint: &str, config: &OcrConfig) -> Result<Self> {
        let mut client = Self::new(endpoint, config.timeout())?;
        client.language_hint = config.language_hint.clone();
        client.compression_ratio = config.compression_ratio;
        Ok(client)
    }

    pub fn with_language_hint(mut self, hint: impl Into<String>) -> Self {
        self.language_hint = Some(hint.into());
        self
    }

    pub async fn recognize(&self, artifact: &Artifact) -> Result<OcrResponse> {
        let request = OcrRequest {
            base64_data: artifact.data_uri(),
            language_hint: self.language_hint.as_deref(),
            compression_ratio: self.compression_ratio,
        };
        let response = self
            .client
            .post(format!("{}/ocr", self.endpoint))
            .json(&request)
            .send()
            .await?;
        let response = check_response("ocr", response).await?;
        Ok(response.json().await?)
    }

    pub async fn health(&self) -> Result<serde_json::Value> {
        let response = self
            .client
            .get(format!("{}/health", self.endpoint))
            .send()
            .await?;
        let response = check_response("ocr", response).await?;
        Ok(response.json().await?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexDocument {
    pub id: String,
    pub title: String,
    pub content: String,
    pub metadata: serde_json::Value,
}

#[derive(Serialize)]
struct IndexRequest<'a> {
    documents: &'a [IndexDocument],
}

/// Client for the retrieval-index upsert endpoint.
#[derive(Clone)]
pub struct IndexClient {
    client: Client,
    endpoint: String,
}

impl IndexClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }

    pub fn from_config(config: &IndexConfig) -> Result<Option<Self>> {
        config
            .endpoint
            .as_deref()
            .map(|endpoint| Self::new(endpoint, Duration::from_millis(config.timeout_ms)))
            .transpose()
    }

    pub async fn upsert(&self, documents: &[IndexDocument]) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&IndexRequest { documents })
            .send()
            .await?;
        check_response("index", response).await?;
        Ok(())
    }
}

/// Per-artifact outcome, kept as provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactOcr {
    pub source: String,
    pub mime: String,
    pub bytes: usize,
    pub text_length: usize,
    pub confidence: Option<f64>,
    pub language: Option<String>,
    pub latency_ms: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrSummary {
    pub document_id: String,
    pub text: String,
    pub indexed: bool,
    pub captured_at: DateTime<Utc>,
    pub artifacts: Vec<ArtifactOcr>,
}

pub fn document_id(crawl_id: &str) -> String {
    format!("{}::ocr", crawl_id)
}

pub struct EnrichmentPipeline {
    ocr: OcrClient,
    index: Option<IndexClient>,
    http: Client,
    max_images: usize,
    max_image_bytes: usize,
    timeout: Duration,
    min_text_length: usize,
}

impl EnrichmentPipeline {
    pub fn new(ocr: OcrClient, config: &OcrConfig) -> Result<Self> {
        let http = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self {
            ocr,
            index: None,
            http,
            max_images: config.max_images,
            max_image_bytes: config.max_image_bytes,
            timeout: config.timeout(),
            min_text_length: config.min_text_length,
        })
    }

    pub fn with_index(mut self, index: IndexClient) -> Self {
        self.index = Some(index);
        self
    }

    pub fn ocr(&self) -> &OcrClient {
        &self.ocr
    }

    /// `None` unless OCR is enabled and has an endpoint.
    pub fn from_config(config: &HarvestConfig) -> Result<Option<Self>> {
        if !config.ocr_active() {
            return Ok(None);
        }
        let Some(endpoint) = config.ocr.endpoint.as_deref() else {
            return Ok(None);
        };
        let mut pipeline = Self::new(OcrClient::from_config(endpoint, &config.ocr)?, &config.ocr)?;
        pipeline.index = IndexClient::from_config(&config.index)?;
        Ok(Some(pipeline))
    }

    /// Screenshot first, then up to `max_images` page images. Sources that
    /// cannot be captured are skipped.
    pub async fn collect_artifacts(&self, page: &dyn Page, url: &str, html: &str) -> Vec<Artifact> {
        let mut artifacts = Vec::new();

        match page.screenshot(true).await {
            Ok(bytes) if !bytes.is_empty() => artifacts.push(Artifact {
                source: ArtifactSource::Screenshot,
                mime: "image/png".to_string(),
                bytes,
            }),
            Ok(_) => debug!("Empty screenshot for {}", url),
            Err(e) => debug!("No screenshot for {}: {}", url, e),
        }

        for src in image_sources(url, html, self.max_images) {
            let artifact = if src.starts_with("data:") {
                decode_data_uri(&src).and_then(|artifact| {
                    if artifact.bytes.len() > self.max_image_bytes {
                        Err(HarvestError::TooLarge {
                            what: "image",
                            limit: self.max_image_bytes,
                        })
                    } else {
                        Ok(artifact)
                    }
                })
            } else {
                self.fetch_image(&src).await
            };
            match artifact {
                Ok(artifact) => artifacts.push(artifact),
                Err(e) => debug!("Skipping image {}: {}", truncate(&src, 80), e),
            }
        }

        artifacts
    }

    async fn fetch_image(&self, src: &str) -> Result<Artifact> {
        let too_large = HarvestError::TooLarge {
            what: "image",
            limit: self.max_image_bytes,
        };
        let response = self.http.get(src).timeout(self.timeout).send().await?;
        let mut response = check_response("image", response).await?;
        if response
            .content_length()
            .is_some_and(|len| len > self.max_image_bytes as u64)
        {
            return Err(too_large);
        }
        let mime = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string());
        // Content-Length may be absent or wrong; count as we read.
        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if bytes.len() + chunk.len() > self.max_image_bytes {
                return Err(too_large);
            }
            bytes.extend_from_slice(&chunk);
        }
        Ok(Artifact {
            source: ArtifactSource::Image(src.to_string()),
            mime,
            bytes,
        })
    }

    async fn recognize_one(&self, artifact: &Artifact) -> (ArtifactOcr, Option<String>) {
        let start = Instant::now();
        let outcome = match tokio::time::timeout(self.timeout, self.ocr.recognize(artifact)).await {
            Ok(result) => result,
            Err(_) => Err(HarvestError::Timeout("ocr", self.timeout)),
        };
        let elapsed = start.elapsed().as_millis() as u64;

        let mut record = ArtifactOcr {
            source: artifact.source.label(),
            mime: artifact.mime.clone(),
            bytes: artifact.bytes.len(),
            text_length: 0,
            confidence: None,
            language: None,
            latency_ms: elapsed,
            error: None,
        };

        match outcome {
            Ok(response) => {
                let text = response.text.trim().to_string();
                record.text_length = text.len();
                record.confidence = response.confidence;
                record.language = response.language;
                record.latency_ms = response.latency_ms.unwrap_or(elapsed);
                (record, Some(text).filter(|t| !t.is_empty()))
            }
            Err(e) => {
                warn!("OCR failed for {}: {}", record.source, e);
                record.error = Some(e.to_string());
                (record, None)
            }
        }
    }

    /// Runs OCR over the page's artifacts and indexes the text. `Ok(None)`
    /// means nothing useful was found.
    pub async fn enrich(&self, page: &dyn Page, url: &str, crawl_id: &str, html: &str) -> Result<Option<OcrSummary>> {
        let artifacts = self.collect_artifacts(page, url, html).await;
        if artifacts.is_empty() {
            debug!("No OCR artifacts for {}", url);
            return Ok(None);
        }

        let outcomes = join_all(artifacts.iter().map(|a| self.recognize_one(a))).await;
        let mut records = Vec::with_capacity(outcomes.len());
        let mut texts = Vec::new();
        for (record, text) in outcomes {
            records.push(record);
            texts.extend(text);
        }

        let text = texts.join("\n");
        if text.chars().count() < self.min_text_length {
            debug!("OCR text for {} below threshold ({} chars)", url, text.chars().count());
            return Ok(None);
        }

        let captured_at = Utc::now();
        let document_id = document_id(crawl_id);
        let mut indexed = false;

        if let Some(index) = &self.index {
            let document = IndexDocument {
                id: document_id.clone(),
                title: format!("OCR text for {}", url),
                content: text.clone(),
                metadata: serde_json::json!({
                    "sourceUrl": url,
                    "crawlId": crawl_id,
                    "capturedAt": captured_at.to_rfc3339(),
                    "artifacts": records
                        .iter()
                        .map(|r| serde_json::json!({
                            "source": r.source,
                            "confidence": r.confidence,
                            "latencyMs": r.latency_ms,
                        }))
                        .collect::<Vec<_>>(),
                }),
            };
            match index.upsert(std::slice::from_ref(&document)).await {
                Ok(()) => {
                    indexed = true;
                    info!("Indexed OCR document {}", document_id);
                }
                Err(e) => warn!("Index upsert failed for {}: {}", document_id, e),
            }
        }

        Ok(Some(OcrSummary {
            document_id,
            text,
            indexed,
            captured_at,
            artifacts: records,
        }))
    }
}

/// `<img src>` values resolved against `base`; data URIs pass through.
pub fn image_sources(base: &str, html: &str, limit: usize) -> Vec<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("img[src]").expect("static selector");
    let mut sources = Vec::new();
    for img in document.select(&selector) {
        if sources.len() >= limit {
            break;
        }
        let Some(src) = img.value().attr("src").map(str::trim) else {
            continue;
        };
        let resolved = if src.starts_with("data:") {
            Some(src.to_string())
        } else {
            resolve_url(base, src)
        };
        if let Some(resolved) = resolved
            && !sources.contains(&resolved)
        {
            sources.push(resolved);
        }
    }
    sources
}

pub fn decode_data_uri(uri: &str) -> Result<Artifact> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| HarvestError::Config("not a data URI".to_string()))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| HarvestError::Config("data URI without payload".to_string()))?;
    let mime = header
        .strip_suffix(";base64")
        .ok_or_else(|| HarvestError::Config("only base64 data URIs are supported".to_string()))?;
    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| HarvestError::Config(format!("bad base64 payload: {}", e)))?;
    Ok(Artifact {
        source: ArtifactSource::Image(truncate(uri, 64)),
        mime: if mime.is_empty() { "application/octet-stream".to_string() } else { mime.to_string() },
        bytes,
    })
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
