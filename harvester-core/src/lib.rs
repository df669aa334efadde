pub mod config;
pub mod crawl;
pub mod data;
pub mod enrichment;
pub mod error;
pub mod model;
pub mod monitor;
pub mod proof;
pub mod report;
pub mod scheduler;
pub mod submission;

pub use config::HarvestConfig;
pub use error::{HarvestError, Result};
pub use model::{CrawlResult, WorkerState, WorkerStatus};
pub use monitor::{HealthStatus, Monitor, StatusUpdate};
pub use proof::{MerkleCommitment, ZERO_ROOT};
pub use scheduler::{ProgressCallback, ResultCallback, ResultLog, Scheduler};
