use harvester_scanner::ScanError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarvestError {
    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{service} answered HTTP {status}: {body}")]
    Collaborator {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("{0} timed out after {1:?}")]
    Timeout(&'static str, Duration),

    #[error("{what} exceeds {limit} bytes")]
    TooLarge { what: &'static str, limit: usize },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Proof error: {0}")]
    Proof(String),

    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, HarvestError>;

/// Turns a non-2xx response into [`HarvestError::Collaborator`], keeping the
/// body for the log.
pub(crate) async fn check_response(
    service: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(HarvestError::Collaborator {
        service,
        status: status.as_u16(),
        body,
    })
}
