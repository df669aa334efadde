pub mod analysis;
pub mod browser;
pub mod error;
pub mod frontier;
pub mod links;
pub mod result;

pub use analysis::{Analyzer, HiddenElementClassifier, UnusedClassifier};
pub use browser::{Browser, GotoOptions, HttpBrowser, Page, WaitUntil};
pub use error::ScanError;
pub use frontier::{CrawlTarget, DiscoverOutcome, Frontier};
pub use result::{AnalysisResult, Backlink, DomStats, LinkKind, PageReport, PerformanceStats};
