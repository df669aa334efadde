// Link resolution and the session-wide backlink graph

use crate::result::{Backlink, LinkKind};
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;
use url::Url;

/// Resolves `href` against `base`, dropping the fragment. Non-navigational
/// references (javascript:, mailto:, tel:, in-page anchors) yield `None`.
pub fn resolve_url(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty()
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with('#')
    {
        return None;
    }

    let base_url = Url::parse(base).ok()?;
    let mut resolved = base_url.join(href).ok()?;
    if resolved.scheme() != "http" && resolved.scheme() != "https" {
        return None;
    }
    resolved.set_fragment(None);

    Some(resolved.to_string())
}

pub fn is_same_domain(url: &str, base_domain: &str) -> bool {
    if let Ok(parsed) = Url::parse(url)
        && let Some(host) = parsed.host_str()
    {
        return host == base_domain || host.ends_with(&format!(".{}", base_domain));
    }
    false
}

pub fn link_kind(source: &str, target: &str) -> LinkKind {
    let source_host = Url::parse(source)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string));
    match source_host {
        Some(host) if is_same_domain(target, &host) => LinkKind::Internal,
        _ => LinkKind::External,
    }
}

/// Directed source -> target graph of every link seen this session.
#[derive(Default)]
pub struct BacklinkGraph {
    graph: DiGraph<String, LinkKind>,
    nodes: HashMap<String, NodeIndex>,
}

impl BacklinkGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn node(&mut self, url: &str) -> NodeIndex {
        if let Some(idx) = self.nodes.get(url) {
            return *idx;
        }
        let idx = self.graph.add_node(url.to_string());
        self.nodes.insert(url.to_string(), idx);
        idx
    }

    /// Adds an edge; repeated source/target pairs count once.
    pub fn add(&mut self, link: &Backlink) {
        if link.source == link.target {
            return;
        }
        let source = self.node(&link.source);
        let target = self.node(&link.target);
        if self.graph.find_edge(source, target).is_none() {
            self.graph.add_edge(source, target, link.kind);
        }
    }

    /// Number of distinct pages linking to `url`.
    pub fn backlink_count(&self, url: &str) -> usize {
        self.nodes
            .get(url)
            .map(|idx| {
                self.graph
                    .neighbors_directed(*idx, Direction::Incoming)
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(source: &str, target: &str) -> Backlink {
        Backlink {
            source: source.to_string(),
            target: target.to_string(),
            anchor_text: String::new(),
            kind: link_kind(source, target),
        }
    }

    #[test]
    fn test_resolve_relative() {
        assert_eq!(
            resolve_url("https://example.com/a/b", "../c#top"),
            Some("https://example.com/c".to_string())
        );
    }

    #[test]
    fn test_resolve_skips_non_navigational() {
        assert_eq!(resolve_url("https://example.com", "mailto:x@example.com"), None);
        assert_eq!(resolve_url("https://example.com", "javascript:void(0)"), None);
        assert_eq!(resolve_url("https://example.com", "#section"), None);
        assert_eq!(resolve_url("https://example.com", "   "), None);
        assert_eq!(resolve_url("https://example.com", "ftp://example.com/file"), None);
    }

    #[test]
    fn test_same_domain_includes_subdomains() {
        assert!(is_same_domain("https://blog.example.com/x", "example.com"));
        assert!(!is_same_domain("https://example.org/x", "example.com"));
        assert!(!is_same_domain("https://notexample.com/x", "example.com"));
    }

    #[test]
    fn test_link_kind() {
        assert_eq!(
            link_kind("https://example.com/", "https://example.com/about"),
            LinkKind::Internal
        );
        assert_eq!(
            link_kind("https://example.com/", "https://other.test/"),
            LinkKind::External
        );
    }

    #[test]
    fn test_backlink_count_counts_distinct_sources() {
        let mut graph = BacklinkGraph::new();
        graph.add(&link("https://a.test/1", "https://a.test/target"));
        graph.add(&link("https://a.test/1", "https://a.test/target"));
        graph.add(&link("https://a.test/2", "https://a.test/target"));
        graph.add(&link("https://a.test/target", "https://a.test/target"));

        assert_eq!(graph.backlink_count("https://a.test/target"), 2);
        assert_eq!(graph.backlink_count("https://a.test/1"), 0);
        assert_eq!(graph.backlink_count("https://unknown.test/"), 0);
        assert_eq!(graph.edge_count(), 2);
    }
}
