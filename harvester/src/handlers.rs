use harvester_core::config::HarvestConfig;
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

// Helper functions for crawl handler

/// Load URLs from either a file or a single URL argument
pub fn load_urls_from_source(
    url: Option<&Url>,
    hosts_file: Option<&PathBuf>,
) -> Result<Vec<String>, String> {
    if let Some(hosts_file_path) = hosts_file {
        load_urls_from_file(hosts_file_path)
    } else if let Some(url) = url {
        Ok(vec![url.as_str().to_string()])
    } else {
        Err("Either --url or --hosts-file must be provided".to_string())
    }
}

/// Load and parse URLs from a file. Blank lines and `#` comments are skipped.
pub fn load_urls_from_file(path: &Path) -> Result<Vec<String>, String> {
    let content = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read hosts file {}: {}", path.display(), e))?;

    let mut urls: Vec<String> = Vec::new();
    for line in content.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(url) = parse_url_line(line)
            && !urls.contains(&url)
        {
            urls.push(url);
        }
    }

    if urls.is_empty() {
        return Err(format!("No valid URLs found in {}", path.display()));
    }

    Ok(urls)
}

/// Parse a single line as an http(s) URL, trying to add http:// if needed
pub fn parse_url_line(line: &str) -> Option<String> {
    if let Ok(url) = Url::parse(line) {
        if matches!(url.scheme(), "http" | "https") && url.host_str().is_some() {
            return Some(line.to_string());
        }
        // "example.com:8080" parses with "example.com" as the scheme.
        if line.contains("://") {
            tracing::warn!("Skipping URL with unsupported scheme '{}'", line);
            return None;
        }
    }

    let with_scheme = format!("http://{}", line);
    if let Ok(url) = Url::parse(&with_scheme)
        && url.host_str().is_some_and(|h| !h.is_empty() && !h.contains(' '))
    {
        return Some(with_scheme);
    }

    tracing::warn!("Skipping invalid URL '{}'", line);
    None
}

/// Command-line values that override the file and environment configuration.
#[derive(Debug, Clone, Default)]
pub struct CrawlOverrides {
    pub workers: Option<usize>,
    pub max_depth: Option<usize>,
    pub delay_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub no_ocr: bool,
}

impl CrawlOverrides {
    pub fn apply(&self, mut config: HarvestConfig) -> HarvestConfig {
        if let Some(workers) = self.workers {
            config.max_concurrency = workers;
        }
        if let Some(depth) = self.max_depth {
            config.max_depth = depth;
        }
        if let Some(delay) = self.delay_ms {
            config.request_delay_ms = delay;
        }
        if let Some(timeout) = self.timeout_ms {
            config.timeout_ms = timeout;
        }
        if self.no_ocr {
            config.ocr.enabled = false;
        }
        config
    }
}

/// Builds the effective configuration: defaults, then the optional JSON
/// file, then `HARVESTER_*` environment variables, then command-line flags.
pub fn resolve_config(
    config_file: Option<&Path>,
    overrides: &CrawlOverrides,
) -> Result<HarvestConfig, String> {
    resolve_config_with(config_file, overrides, |key| std::env::var(key).ok())
}

pub fn resolve_config_with<F>(
    config_file: Option<&Path>,
    overrides: &CrawlOverrides,
    lookup: F,
) -> Result<HarvestConfig, String>
where
    F: Fn(&str) -> Option<String>,
{
    let base = match config_file {
        Some(path) => HarvestConfig::from_file(path)
            .map_err(|e| format!("Failed to load config {}: {}", path.display(), e))?,
        None => HarvestConfig::default(),
    };

    let config = overrides.apply(base.with_env_from(lookup));
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

/// Expands `~` in the database location and creates its parent directory.
pub fn prepare_db_path(raw: &str) -> Result<PathBuf, String> {
    let expanded = shellexpand::tilde(raw);
    let path = PathBuf::from(expanded.as_ref());
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create {}: {}", parent.display(), e))?;
    }
    Ok(path)
}
