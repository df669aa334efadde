//! Priority frontier: visited set, FIFO seed backlog and a scored queue.
//!
//! The frontier is plain synchronous data. Whoever shares it between workers
//! must hold one lock across `discover`/`next` so that marking a URL visited
//! and queueing it happen together.

use crate::links::BacklinkGraph;
use crate::result::PageReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use tracing::debug;
use url::Url;

pub const MIN_PRIORITY: f64 = 0.1;
pub const MAX_PRIORITY: f64 = 10.0;
pub const SEED_PRIORITY: f64 = 1.0;

const FRESHNESS_BONUS: f64 = 1.0;
const SCHEMA_BONUS: f64 = 0.5;
const SECURE_BONUS: f64 = 0.2;
const BACKLINK_WEIGHT: f64 = 0.1;
const BACKLINK_CAP: f64 = 2.0;
const AUTHORITY_WEIGHT: f64 = 0.1;

/// TLDs that earn the authority bonus.
const HIGH_TRUST_TLDS: &[&str] = &["gov", "edu", "org", "mil", "int"];

/// One frontier entry. Immutable once queued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlTarget {
    pub url: String,
    pub depth: usize,
    pub priority: f64,
    pub discovered_at: DateTime<Utc>,
    pub referrer: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DiscoverOutcome {
    Queued(f64),
    AlreadyVisited,
    TooDeep,
    InvalidUrl,
}

impl DiscoverOutcome {
    pub fn is_queued(&self) -> bool {
        matches!(self, DiscoverOutcome::Queued(_))
    }
}

struct QueuedTarget {
    seq: u64,
    target: CrawlTarget,
}

impl PartialEq for QueuedTarget {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedTarget {}

impl PartialOrd for QueuedTarget {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTarget {
    // Max-heap on priority; among equal priorities the older entry wins.
    fn cmp(&self, other: &Self) -> Ordering {
        self.target
            .priority
            .total_cmp(&other.target.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

pub struct Frontier {
    max_depth: usize,
    visited: HashSet<String>,
    backlog: VecDeque<CrawlTarget>,
    queue: BinaryHeap<QueuedTarget>,
    next_seq: u64,
    authority: HashMap<String, f64>,
    schema_urls: HashSet<String>,
    backlinks: BacklinkGraph,
}

impl Frontier {
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth,
            visited: HashSet::new(),
            backlog: VecDeque::new(),
            queue: BinaryHeap::new(),
            next_seq: 0,
            authority: HashMap::new(),
            schema_urls: HashSet::new(),
            backlinks: BacklinkGraph::new(),
        }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Queues an explicit seed at depth 0. Seeds are accepted even when the
    /// URL has been seen before.
    pub fn enqueue_seed(&mut self, url: &str) {
        self.mark_visited(url);
        self.backlog.push_back(CrawlTarget {
            url: url.to_string(),
            depth: 0,
            priority: SEED_PRIORITY,
            discovered_at: Utc::now(),
            referrer: None,
        });
        debug!("Seeded {}", url);
    }

    /// Offers a discovered link. The URL is marked visited as soon as it is
    /// accepted, so a second discovery before dequeue is rejected.
    pub fn discover(&mut self, url: &str, depth: usize, referrer: Option<&str>) -> DiscoverOutcome {
        let Ok(parsed) = Url::parse(url) else {
            return DiscoverOutcome::InvalidUrl;
        };
        if self.visited.contains(parsed.as_str()) {
            return DiscoverOutcome::AlreadyVisited;
        }
        if depth > self.max_depth {
            return DiscoverOutcome::TooDeep;
        }

        let priority = self.priority(url, depth, referrer);
        self.mark_visited(url);

        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(QueuedTarget {
            seq,
            target: CrawlTarget {
                url: url.to_string(),
                depth,
                priority,
                discovered_at: Utc::now(),
                referrer: referrer.map(str::to_string),
            },
        });

        DiscoverOutcome::Queued(priority)
    }

    /// Scores a URL for the priority queue. Always within
    /// [`MIN_PRIORITY`, `MAX_PRIORITY`].
    pub fn priority(&mut self, url: &str, depth: usize, _referrer: Option<&str>) -> f64 {
        let parsed = Url::parse(url).ok();

        let mut score = (10.0 - depth as f64).max(0.0);

        if let Some(host) = parsed.as_ref().and_then(|u| u.host_str()) {
            let host = host.to_string();
            score += self.domain_authority(&host) * AUTHORITY_WEIGHT;
        }

        // Every newly discovered URL counts as fresh.
        score += FRESHNESS_BONUS;

        if self.schema_urls.contains(url) {
            score += SCHEMA_BONUS;
        }

        score += (self.backlinks.backlink_count(url) as f64 * BACKLINK_WEIGHT).min(BACKLINK_CAP);

        if parsed.as_ref().map(|u| u.scheme() == "https").unwrap_or(false) {
            score += SECURE_BONUS;
        }

        score.clamp(MIN_PRIORITY, MAX_PRIORITY)
    }

    /// Highest-priority discovered target, falling back to the seed backlog.
    pub fn next(&mut self) -> Option<CrawlTarget> {
        if let Some(queued) = self.queue.pop() {
            return Some(queued.target);
        }
        self.backlog.pop_front()
    }

    /// Memoized heuristic rank for a host, never negative.
    pub fn domain_authority(&mut self, domain: &str) -> f64 {
        let domain = domain.trim_end_matches('.').to_ascii_lowercase();
        if let Some(score) = self.authority.get(&domain) {
            return *score;
        }
        let score = compute_domain_authority(&domain);
        self.authority.insert(domain, score);
        score
    }

    /// Feeds what a crawled page revealed back into scoring.
    pub fn record_page(&mut self, report: &PageReport) {
        if !report.schemas.is_empty() {
            self.schema_urls.insert(report.url.clone());
        }
        for link in &report.backlinks {
            self.backlinks.add(link);
        }
    }

    pub fn backlink_count(&self, url: &str) -> usize {
        self.backlinks.backlink_count(url)
    }

    pub fn is_visited(&self, url: &str) -> bool {
        self.visited.contains(&visit_key(url))
    }

    pub fn visited_count(&self) -> usize {
        self.visited.len()
    }

    /// Targets waiting in either queue.
    pub fn len(&self) -> usize {
        self.queue.len() + self.backlog.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty() && self.backlog.is_empty()
    }

    fn mark_visited(&mut self, url: &str) {
        self.visited.insert(visit_key(url));
    }
}

/// Visited-set key. "https://a.test" and "https://a.test/" are the same page.
fn visit_key(url: &str) -> String {
    Url::parse(url)
        .map(String::from)
        .unwrap_or_else(|_| url.to_string())
}

fn compute_domain_authority(domain: &str) -> f64 {
    let labels: Vec<&str> = domain.split('.').filter(|l| !l.is_empty()).collect();
    let tld_bonus = match labels.last() {
        Some(tld) if HIGH_TRUST_TLDS.contains(tld) => 1.0,
        _ => 0.0,
    };
    let subdomains = labels.len().saturating_sub(2) as f64;
    let brevity = (1.0 - domain.len() as f64 / 50.0).max(0.0);

    (1.0 + tld_bonus - subdomains * 0.1 + brevity).max(0.0)
}
