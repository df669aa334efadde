//! Hand-off of finished results to the artifact store and the ledger.

use crate::config::SubmissionConfig;
use crate::error::{HarvestError, Result, check_response};
use crate::model::CrawlResult;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredArtifact {
    pub cid: String,
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn store_artifact(&self, result: &CrawlResult) -> Result<StoredArtifact>;
}

/// Posts the serialized result and expects `{"cid": ...}` back.
pub struct HttpArtifactStore {
    client: Client,
    endpoint: String,
}

impl HttpArtifactStore {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }
}

#[async_trait]
impl ArtifactStore for HttpArtifactStore {
    async fn store_artifact(&self, result: &CrawlResult) -> Result<StoredArtifact> {
        let response = self.client.post(&self.endpoint).json(result).send().await?;
        let response = check_response("artifact store", response).await?;
        Ok(response.json().await?)
    }
}

/// Content-addressed JSON files in a local directory.
pub struct LocalArtifactStore {
    dir: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, cid: &str) -> PathBuf {
        self.dir.join(format!("{}.json", cid))
    }
}

pub fn content_id(bytes: &[u8]) -> String {
    format!("sha256-{}", hex::encode(Sha256::digest(bytes)))
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn store_artifact(&self, result: &CrawlResult) -> Result<StoredArtifact> {
        let bytes = serde_json::to_vec_pretty(result)?;
        let cid = content_id(&bytes);
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(&cid);
        if !tokio::fs::try_exists(&path).await? {
            tokio::fs::write(&path, &bytes).await?;
        }
        debug!("Stored artifact {} at {}", cid, path.display());
        Ok(StoredArtifact { cid })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerClaim {
    pub crawl_id: String,
    pub merkle_root: String,
    pub bytes_saved: u64,
    pub backlinks_count: usize,
    #[serde(rename = "artifactCID")]
    pub artifact_cid: Option<String>,
}

impl LedgerClaim {
    pub fn for_result(result: &CrawlResult) -> Self {
        Self {
            crawl_id: result.crawl_id.clone(),
            merkle_root: result.merkle_root.clone(),
            bytes_saved: result.space_saved,
            backlinks_count: result.backlinks.len(),
            artifact_cid: result.artifact_cid.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerReceipt {
    pub success: bool,
    pub tx_hash: Option<String>,
    pub error: Option<String>,
}

pub struct LedgerClient {
    client: Client,
    endpoint: String,
}

impl LedgerClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }

    pub async fn submit(&self, result: &CrawlResult) -> Result<LedgerReceipt> {
        let claim = LedgerClaim::for_result(result);
        let response = self.client.post(&self.endpoint).json(&claim).send().await?;
        let response = check_response("ledger", response).await?;
        let status = response.status().as_u16();
        let receipt: LedgerReceipt = response.json().await?;
        if !receipt.success {
            return Err(HarvestError::Collaborator {
                service: "ledger",
                status,
                body: receipt
                    .error
                    .unwrap_or_else(|| "claim rejected".to_string()),
            });
        }
        Ok(receipt)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubmissionOutcome {
    pub cid: Option<String>,
    pub receipt: Option<LedgerReceipt>,
}

/// Store, then claim. Failures are logged and never retried.
pub struct Submitter {
    store: Option<Arc<dyn ArtifactStore>>,
    ledger: Option<LedgerClient>,
}

impl Submitter {
    pub fn new() -> Self {
        Self {
            store: None,
            ledger: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_ledger(mut self, ledger: LedgerClient) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn from_config(config: &SubmissionConfig, timeout: Duration) -> Result<Option<Self>> {
        if !config.is_enabled() {
            return Ok(None);
        }
        let mut submitter = Self::new();
        if let Some(endpoint) = &config.artifact_endpoint {
            submitter = submitter.with_store(Arc::new(HttpArtifactStore::new(endpoint, timeout)?));
        } else if let Some(dir) = &config.artifact_dir {
            submitter = submitter.with_store(Arc::new(LocalArtifactStore::new(dir)));
        }
        if let Some(endpoint) = &config.ledger_endpoint {
            submitter = submitter.with_ledger(LedgerClient::new(endpoint, timeout)?);
        }
        Ok(Some(submitter))
    }

    /// Fills `artifact_cid` when the store succeeds. Results without a
    /// commitment are stored but never claimed.
    pub async fn submit(&self, result: &mut CrawlResult) -> SubmissionOutcome {
        let mut outcome = SubmissionOutcome::default();

        if let Some(store) = &self.store {
            match store.store_artifact(result).await {
                Ok(stored) => {
                    result.artifact_cid = Some(stored.cid.clone());
                    outcome.cid = Some(stored.cid);
                }
                Err(e) => warn!("Artifact store failed for {}: {}", result.url, e),
            }
        }

        let Some(ledger) = &self.ledger else {
            return outcome;
        };
        if !result.commitment().is_available() {
            warn!("Not submitting {}: commitment unavailable", result.url);
            return outcome;
        }
        match ledger.submit(result).await {
            Ok(receipt) => {
                info!(
                    "Ledger accepted {} ({})",
                    result.crawl_id,
                    receipt.tx_hash.as_deref().unwrap_or("no tx hash")
                );
                outcome.receipt = Some(receipt);
            }
            Err(e) => warn!("Ledger submission failed for {}: {}", result.url, e),
        }
        outcome
    }
}

impl Default for Submitter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proof::{build_commitment, generate_crawl_id};
    use harvester_scanner::analysis::Analyzer;
    use std::collections::BTreeMap;
    use tempfile::TempDir;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_partial_json, method, path},
    };

    fn sample_result() -> CrawlResult {
        let html = r#"<html><body><div hidden>gone</div><a href="/next">next</a></body></html>"#;
        let report = Analyzer::new().analyze_html("https://example.com/", html, 12, BTreeMap::new());
        let commitment = build_commitment(&report.url, &report.analysis);
        let crawl_id = generate_crawl_id(&report.url, &report.analysis);
        CrawlResult::new(report, 0, commitment, crawl_id)
    }

    #[tokio::test]
    async fn test_local_store_is_content_addressed() {
        let dir = TempDir::new().unwrap();
        let store = LocalArtifactStore::new(dir.path());
        let result = sample_result();

        let first = store.store_artifact(&result).await.unwrap();
        let second = store.store_artifact(&result).await.unwrap();
        assert_eq!(first, second);
        assert!(first.cid.starts_with("sha256-"));
        assert_eq!(first.cid.len(), "sha256-".len() + 64);

        let written = std::fs::read(store.path_for(&first.cid)).unwrap();
        assert_eq!(content_id(&written), first.cid);
    }

    #[tokio::test]
    async fn test_submitter_chains_store_and_ledger() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/artifacts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"cid": "bafy123"})))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/claims"))
            .and(body_partial_json(serde_json::json!({"artifactCID": "bafy123"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true, "txHash": "0xabc"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let timeout = Duration::from_secs(2);
        let submitter = Submitter::new()
            .with_store(Arc::new(
                HttpArtifactStore::new(&format!("{}/artifacts", mock_server.uri()), timeout).unwrap(),
            ))
            .with_ledger(LedgerClient::new(&format!("{}/claims", mock_server.uri()), timeout).unwrap());

        let mut result = sample_result();
        let outcome = submitter.submit(&mut result).await;
        assert_eq!(result.artifact_cid.as_deref(), Some("bafy123"));
        assert_eq!(outcome.cid.as_deref(), Some("bafy123"));
        assert_eq!(outcome.receipt.unwrap().tx_hash.as_deref(), Some("0xabc"));
    }

    #[tokio::test]
    async fn test_ledger_requires_success_flag() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": false, "error": "duplicate claim"
            })))
            .mount(&mock_server)
            .await;

        let ledger = LedgerClient::new(&mock_server.uri(), Duration::from_secs(2)).unwrap();
        let err = ledger.submit(&sample_result()).await.unwrap_err();
        assert!(err.to_string().contains("duplicate claim"));
    }

    #[tokio::test]
    async fn test_failures_are_swallowed_and_not_retried() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/artifacts"))
            .respond_with(ResponseTemplate::new(503).set_body_string("store down"))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/claims"))
            .respond_with(ResponseTemplate::new(500).set_body_string("ledger down"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let timeout = Duration::from_secs(2);
        let submitter = Submitter::new()
            .with_store(Arc::new(
                HttpArtifactStore::new(&format!("{}/artifacts", mock_server.uri()), timeout).unwrap(),
            ))
            .with_ledger(LedgerClient::new(&format!("{}/claims", mock_server.uri()), timeout).unwrap());

        let mut result = sample_result();
        let outcome = submitter.submit(&mut result).await;
        assert_eq!(outcome, SubmissionOutcome::default());
        assert!(result.artifact_cid.is_none());
    }

    #[tokio::test]
    async fn test_unavailable_commitment_is_not_claimed() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"success": true})))
            .expect(0)
            .mount(&mock_server)
            .await;

        let submitter =
            Submitter::new().with_ledger(LedgerClient::new(&mock_server.uri(), Duration::from_secs(2)).unwrap());
        let mut result = sample_result();
        result.merkle_root = crate::proof::ZERO_ROOT.to_string();
        let outcome = submitter.submit(&mut result).await;
        assert!(outcome.receipt.is_none());
    }

    #[test]
    fn test_from_config() {
        let timeout = Duration::from_secs(1);
        assert!(Submitter::from_config(&SubmissionConfig::default(), timeout).unwrap().is_none());
        let config = SubmissionConfig {
            artifact_dir: Some("/tmp/artifacts".to_string()),
            ..SubmissionConfig::default()
        };
        let submitter = Submitter::from_config(&config, timeout).unwrap().unwrap();
        assert!(submitter.store.is_some());
        assert!(submitter.ledger.is_none());
    }
}
