use crate::enrichment::OcrSummary;
use crate::proof::{MerkleCommitment, ProofStep};
use chrono::{DateTime, Utc};
use harvester_scanner::result::{
    Backlink, DomStats, Optimization, PageReport, PerformanceStats, SchemaRecord,
};
use serde::{Deserialize, Serialize};

/// The durable output of one crawled page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlResult {
    pub url: String,
    pub depth: usize,
    pub timestamp: DateTime<Utc>,
    pub space_saved: u64,
    pub optimizations: Vec<Optimization>,
    pub schemas: Vec<SchemaRecord>,
    pub backlinks: Vec<Backlink>,
    pub performance: PerformanceStats,
    pub dom_stats: DomStats,
    pub merkle_root: String,
    pub merkle_proof: Vec<ProofStep>,
    pub merkle_leaves: Vec<String>,
    pub crawl_id: String,
    pub optimization_score: f64,
    pub processing_ms: u64,
    #[serde(rename = "artifactCID")]
    pub artifact_cid: Option<String>,
    pub ocr: Option<OcrSummary>,
}

impl CrawlResult {
    pub fn new(
        report: PageReport,
        depth: usize,
        commitment: MerkleCommitment,
        crawl_id: String,
    ) -> Self {
        let optimization_score = report.analysis.optimization_score();
        Self {
            url: report.url,
            depth,
            timestamp: Utc::now(),
            space_saved: report.analysis.space_saved,
            optimizations: report.analysis.optimizations,
            schemas: report.schemas,
            backlinks: report.backlinks,
            performance: report.analysis.performance,
            dom_stats: report.analysis.dom_stats,
            merkle_root: commitment.root,
            merkle_proof: commitment.proof,
            merkle_leaves: commitment.leaves,
            crawl_id,
            optimization_score,
            processing_ms: 0,
            artifact_cid: None,
            ocr: None,
        }
    }

    pub fn commitment(&self) -> MerkleCommitment {
        MerkleCommitment {
            root: self.merkle_root.clone(),
            proof: self.merkle_proof.clone(),
            leaves: self.merkle_leaves.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Active,
    Processing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerState {
    pub id: usize,
    pub status: WorkerStatus,
    pub current_url: Option<String>,
    pub pages_processed: u64,
    pub space_harvested: u64,
    pub start_time: DateTime<Utc>,
}

impl WorkerState {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            status: WorkerStatus::Active,
            current_url: None,
            pages_processed: 0,
            space_harvested: 0,
            start_time: Utc::now(),
        }
    }
}
