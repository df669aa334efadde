use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Info => "info",
        }
    }

    /// Buckets a byte saving into a severity.
    pub fn from_savings(bytes: u64) -> Self {
        match bytes {
            0 => Severity::Info,
            1..=10_239 => Severity::Low,
            10_240..=102_399 => Severity::Medium,
            102_400..=1_048_575 => Severity::High,
            _ => Severity::Critical,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationKind {
    UnusedElements,
    DuplicateElements,
    OversizedImages,
    UnusedCss,
    UnusedJs,
}

impl OptimizationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizationKind::UnusedElements => "unused_elements",
            OptimizationKind::DuplicateElements => "duplicate_elements",
            OptimizationKind::OversizedImages => "oversized_images",
            OptimizationKind::UnusedCss => "unused_css",
            OptimizationKind::UnusedJs => "unused_js",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Optimization {
    #[serde(rename = "type")]
    pub kind: OptimizationKind,
    pub severity: Severity,
    pub description: String,
    pub potential_savings: u64,
}

/// Element and byte counts for one document. The serialized form is a
/// Merkle leaf, so field order must not change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomStats {
    pub total_elements: usize,
    pub unused_elements: usize,
    pub duplicate_elements: usize,
    pub oversized_images: usize,
    pub images: usize,
    pub scripts: usize,
    pub stylesheets: usize,
    pub unused_css_bytes: u64,
    pub unused_js_bytes: u64,
}

/// Load measurements for one document. Also a Merkle leaf; `BTreeMap` keeps
/// the browser-reported metrics in a stable order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceStats {
    pub load_time_ms: u64,
    pub content_bytes: u64,
    pub metrics: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub space_saved: u64,
    pub optimizations: Vec<Optimization>,
    pub dom_stats: DomStats,
    pub performance: PerformanceStats,
}

impl AnalysisResult {
    /// How lean the page already is, 0 (all waste) to 100 (nothing to reclaim).
    pub fn optimization_score(&self) -> f64 {
        let total = self.performance.content_bytes;
        if total == 0 {
            return 100.0;
        }
        let ratio = self.space_saved as f64 / total as f64;
        ((1.0 - ratio) * 100.0).clamp(0.0, 100.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaFormat {
    JsonLd,
    Microdata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaRecord {
    pub format: SchemaFormat,
    pub schema_type: Option<String>,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    Internal,
    External,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backlink {
    pub source: String,
    pub target: String,
    pub anchor_text: String,
    pub kind: LinkKind,
}

/// Everything the analysis adapter extracts from one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageReport {
    pub url: String,
    pub analysis: AnalysisResult,
    pub schemas: Vec<SchemaRecord>,
    pub backlinks: Vec<Backlink>,
}

impl PageReport {
    /// Distinct outbound targets in document order.
    pub fn outbound_links(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.backlinks
            .iter()
            .filter(|link| seen.insert(link.target.as_str()))
            .map(|link| link.target.clone())
            .collect()
    }
}
