// Crawl reports from recorded results

use crate::data::SessionInfo;
use crate::model::CrawlResult;
use harvester_scanner::result::Severity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportFormat {
    Text,
    Json,
}

impl ReportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Some(ReportFormat::Text),
            "json" => Some(ReportFormat::Json),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub info: usize,
}

impl SeverityCounts {
    fn add(&mut self, severity: Severity) {
        match severity {
            Severity::Critical => self.critical += 1,
            Severity::High => self.high += 1,
            Severity::Medium => self.medium += 1,
            Severity::Low => self.low += 1,
            Severity::Info => self.info += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.critical + self.high + self.medium + self.low + self.info
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub pages: usize,
    pub hosts: usize,
    pub total_space_saved: u64,
    pub average_optimization_score: f64,
    pub severity_counts: SeverityCounts,
    pub optimizations_by_type: BTreeMap<String, usize>,
    pub schemas: usize,
    pub backlinks: usize,
    pub verified_proofs: usize,
    pub unavailable_proofs: usize,
    pub ocr_documents: usize,
    pub stored_artifacts: usize,
}

pub fn summarize(results: &[CrawlResult]) -> ReportSummary {
    let mut summary = ReportSummary {
        pages: results.len(),
        hosts: group_by_host(results).len(),
        ..ReportSummary::default()
    };

    for result in results {
        summary.total_space_saved += result.space_saved;
        summary.average_optimization_score += result.optimization_score;
        summary.schemas += result.schemas.len();
        summary.backlinks += result.backlinks.len();
        for optimization in &result.optimizations {
            summary.severity_counts.add(optimization.severity);
            *summary
                .optimizations_by_type
                .entry(optimization.kind.as_str().to_string())
                .or_default() += 1;
        }
        if result.commitment().verify_url_leaf() {
            summary.verified_proofs += 1;
        } else {
            summary.unavailable_proofs += 1;
        }
        if result.ocr.is_some() {
            summary.ocr_documents += 1;
        }
        if result.artifact_cid.is_some() {
            summary.stored_artifacts += 1;
        }
    }

    if !results.is_empty() {
        summary.average_optimization_score /= results.len() as f64;
    }
    summary
}

fn group_by_host(results: &[CrawlResult]) -> BTreeMap<String, Vec<&CrawlResult>> {
    let mut hosts: BTreeMap<String, Vec<&CrawlResult>> = BTreeMap::new();
    for result in results {
        let host = url::Url::parse(&result.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| "unknown".to_string());
        hosts.entry(host).or_default().push(result);
    }
    hosts
}

pub fn generate_report(results: &[CrawlResult]) -> String {
    let summary = summarize(results);
    let mut report = String::new();

    report.push_str(RULE);
    report.push_str("                          HARVESTER CRAWL REPORT\n");
    report.push_str(RULE);
    report.push('\n');

    report.push_str(&format!("Pages:        {}\n", summary.pages));
    report.push_str(&format!("Hosts:        {}\n", summary.hosts));
    report.push_str(&format!("Reclaimable:  {}\n", format_bytes(summary.total_space_saved)));
    report.push_str(&format!("Avg. Score:   {:.1}/100\n", summary.average_optimization_score));
    report.push_str(&format!(
        "Proofs:       {} verified, {} unavailable\n",
        summary.verified_proofs, summary.unavailable_proofs
    ));
    if summary.ocr_documents > 0 {
        report.push_str(&format!("OCR Docs:     {}\n", summary.ocr_documents));
    }
    if summary.stored_artifacts > 0 {
        report.push_str(&format!("Artifacts:    {}\n", summary.stored_artifacts));
    }
    report.push('\n');

    let counts = &summary.severity_counts;
    if counts.total() > 0 {
        report.push_str(RULE);
        report.push_str("OPTIMIZATIONS\n");
        report.push_str(RULE);
        report.push('\n');
        for (label, count) in [
            ("[CRITICAL]", counts.critical),
            ("[HIGH]    ", counts.high),
            ("[MEDIUM]  ", counts.medium),
            ("[LOW]     ", counts.low),
            ("[INFO]    ", counts.info),
        ] {
            if count > 0 {
                report.push_str(&format!("  {} {}\n", label, count));
            }
        }
        report.push('\n');
        for (kind, count) in &summary.optimizations_by_type {
            report.push_str(&format!("  {:<20} {}\n", format_kind(kind), count));
        }
        report.push('\n');
    }

    if !results.is_empty() {
        report.push_str(RULE);
        report.push_str("PAGES BY HOST\n");
        report.push_str(RULE);
        report.push('\n');

        for (host, pages) in group_by_host(results) {
            let saved: u64 = pages.iter().map(|r| r.space_saved).sum();
            report.push_str(&format!("{}  ({} pages, {})\n", host, pages.len(), format_bytes(saved)));
            for (i, result) in pages.iter().enumerate() {
                let prefix = if i == pages.len() - 1 { "└── " } else { "├── " };
                let path = url::Url::parse(&result.url)
                    .map(|u| u.path().to_string())
                    .unwrap_or_else(|_| result.url.clone());
                let proof = if result.commitment().verify_url_leaf() { "✓" } else { "✗" };
                report.push_str(&format!(
                    "{}{}  [{} | score {:.0} | {} {}]\n",
                    prefix,
                    path,
                    format_bytes(result.space_saved),
                    result.optimization_score,
                    proof,
                    short_id(&result.crawl_id),
                ));
            }
            report.push('\n');
        }
    }

    report.push_str(RULE);
    report.push_str("                               End of Report\n");
    report.push_str(RULE);
    report
}

pub fn generate_json_report(
    results: &[CrawlResult],
    session: Option<&SessionInfo>,
) -> Result<String, serde_json::Error> {
    let json_report = serde_json::json!({
        "report": {
            "metadata": {
                "generator": "Harvester",
                "version": env!("CARGO_PKG_VERSION"),
                "generated_at": chrono::Utc::now().to_rfc3339(),
                "format": "json"
            },
            "session": session.map(|s| serde_json::json!({
                "id": s.id,
                "status": s.status,
                "start_time": format_iso8601_timestamp(s.start_time),
                "end_time": s.end_time.map(format_iso8601_timestamp),
                "duration_seconds": s.end_time.map(|end| end - s.start_time),
                "seeds": s.seed_urls,
            })),
            "summary": summarize(results),
            "results": results,
        }
    });

    serde_json::to_string_pretty(&json_report)
}

pub fn save_report(content: &str, path: &Path) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(content.as_bytes())?;
    Ok(())
}

pub fn format_bytes(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    let b = bytes as f64;
    if b < KIB {
        format!("{} B", bytes)
    } else if b < KIB * KIB {
        format!("{:.1} KiB", b / KIB)
    } else {
        format!("{:.1} MiB", b / (KIB * KIB))
    }
}

fn format_kind(kind: &str) -> String {
    kind.split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                None => String::new(),
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn short_id(crawl_id: &str) -> &str {
    crawl_id.get(..12).unwrap_or(crawl_id)
}

fn format_iso8601_timestamp(timestamp: i64) -> String {
    use chrono::{DateTime, Utc};
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default()
}
