pub mod handlers;

// Re-export commonly used handler functions for convenience
pub use handlers::{
    CrawlOverrides, load_urls_from_file, load_urls_from_source, parse_url_line, resolve_config,
};

// Re-export crawl functionality from harvester-core
pub use harvester_core::crawl::{CrawlOptions, CrawlSummary, execute_crawl, extract_url_path};
