//! Turns one fetched page into a [`PageReport`].

use crate::browser::{GotoOptions, Page};
use crate::error::{Result, ScanError};
use crate::links::{link_kind, resolve_url};
use crate::result::{
    AnalysisResult, Backlink, DomStats, Optimization, OptimizationKind, PageReport,
    PerformanceStats, SchemaFormat, SchemaRecord, Severity,
};
use ego_tree::NodeId;
use ego_tree::iter::Edge;
use scraper::{ElementRef, Html, Node, Selector};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::{Duration, Instant};
use tracing::debug;

/// Estimated bytes reclaimed by re-encoding one oversized image.
pub const OVERSIZED_IMAGE_SAVINGS: u64 = 50 * 1024;
const OVERSIZED_PIXELS: u64 = 1920 * 1080;
const OVERSIZED_WIDTH: u64 = 2560;
/// Repeated blocks shorter than this are ignored (think `<p></p>`).
const MIN_DUPLICATE_BYTES: usize = 64;

const NON_CONTENT_TAGS: &[&str] = &[
    "html", "head", "body", "script", "style", "link", "meta", "title", "template", "noscript",
    "base",
];
const CONTAINER_TAGS: &[&str] = &[
    "div", "span", "p", "section", "article", "aside", "ul", "ol", "li", "nav", "header", "footer",
];
const VOID_TAGS: &[&str] = &[
    "area", "base", "basefont", "bgsound", "br", "col", "embed", "frame", "hr", "img", "input",
    "keygen", "link", "meta", "param", "source", "track", "wbr",
];
/// Text inside these is serialized without escaping.
const RAW_TEXT_TAGS: &[&str] = &[
    "style", "script", "xmp", "iframe", "noembed", "noframes", "plaintext",
];
const BLOCK_TAGS: &[&str] = &[
    "div", "section", "article", "aside", "p", "ul", "ol", "table", "form", "nav", "header",
    "footer", "figure", "svg", "iframe",
];

fn sel(css: &str) -> Selector {
    Selector::parse(css).expect("static selector")
}

/// Decides whether a DOM node is dead weight. Swap in a smarter policy with
/// [`Analyzer::with_classifier`].
pub trait UnusedClassifier: Send + Sync {
    fn is_unused(&self, element: &ElementRef) -> bool;
}

/// Flags hidden elements and empty containers.
pub struct HiddenElementClassifier;

impl UnusedClassifier for HiddenElementClassifier {
    fn is_unused(&self, element: &ElementRef) -> bool {
        let el = element.value();
        if el.attr("hidden").is_some() {
            return true;
        }
        if el.attr("aria-hidden").map(|v| v.eq_ignore_ascii_case("true")).unwrap_or(false) {
            return true;
        }
        if let Some(style) = el.attr("style") {
            let style: String = style
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect::<String>()
                .to_ascii_lowercase();
            if style.contains("display:none") || style.contains("visibility:hidden") {
                return true;
            }
        }
        if CONTAINER_TAGS.contains(&el.name()) {
            let has_child_elements = element.children().any(|c| c.value().is_element());
            return !has_child_elements
                && el.attr("id").is_none()
                && !element.text().any(|t| !t.trim().is_empty());
        }
        false
    }
}

pub struct Analyzer {
    classifier: Box<dyn UnusedClassifier>,
}

impl Analyzer {
    pub fn new() -> Self {
        Self {
            classifier: Box::new(HiddenElementClassifier),
        }
    }

    pub fn with_classifier(mut self, classifier: Box<dyn UnusedClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Loads `url` in `page` and analyzes it. A page that does not load
    /// within `timeout` fails the whole call; no partial report is produced.
    pub async fn analyze_page(&self, page: &mut dyn Page, url: &str, timeout: Duration) -> Result<PageReport> {
        let start = Instant::now();
        match tokio::time::timeout(timeout, page.goto(url, GotoOptions::new(timeout))).await {
            Ok(status) => {
                status?;
            }
            Err(_) => {
                return Err(ScanError::Timeout {
                    url: url.to_string(),
                    after: timeout,
                });
            }
        }
        let elapsed = start.elapsed();

        let html = page.content().await?;
        let metrics = page.metrics().await.unwrap_or_default();
        let load_time_ms = metrics
            .get("loadTimeMs")
            .map(|v| *v as u64)
            .unwrap_or(elapsed.as_millis() as u64);

        Ok(self.analyze_html(url, &html, load_time_ms, metrics))
    }

    pub fn analyze_html(
        &self,
        url: &str,
        html: &str,
        load_time_ms: u64,
        metrics: BTreeMap<String, f64>,
    ) -> PageReport {
        let document = Html::parse_document(html);

        let markup = index_markup(&document);

        let mut stats = DomStats::default();
        let (unused_count, unused_bytes) = self.unused_elements(&document, &markup, &mut stats);
        stats.unused_elements = unused_count;

        let (duplicate_count, duplicate_bytes, unused_js) = duplicate_elements(&document, &markup);
        stats.duplicate_elements = duplicate_count;
        stats.unused_js_bytes = unused_js;

        stats.oversized_images = oversized_images(&document);
        stats.unused_css_bytes = unused_css_bytes(&document);

        let oversized_savings = stats.oversized_images as u64 * OVERSIZED_IMAGE_SAVINGS;
        let mut optimizations = Vec::new();
        push_optimization(
            &mut optimizations,
            OptimizationKind::UnusedElements,
            unused_bytes,
            format!("{} hidden or empty elements can be removed", stats.unused_elements),
        );
        push_optimization(
            &mut optimizations,
            OptimizationKind::DuplicateElements,
            duplicate_bytes,
            format!("{} elements repeat earlier markup", stats.duplicate_elements),
        );
        push_optimization(
            &mut optimizations,
            OptimizationKind::OversizedImages,
            oversized_savings,
            format!("{} images are larger than any display needs", stats.oversized_images),
        );
        push_optimization(
            &mut optimizations,
            OptimizationKind::UnusedCss,
            stats.unused_css_bytes,
            "inline CSS rules match no element".to_string(),
        );
        push_optimization(
            &mut optimizations,
            OptimizationKind::UnusedJs,
            stats.unused_js_bytes,
            "scripts are included more than once".to_string(),
        );
        optimizations.sort_by(|a, b| b.potential_savings.cmp(&a.potential_savings));

        let space_saved = unused_bytes
            + duplicate_bytes
            + oversized_savings
            + stats.unused_css_bytes
            + stats.unused_js_bytes;

        debug!(
            "Analyzed {}: {} elements, {} bytes reclaimable",
            url, stats.total_elements, space_saved
        );

        PageReport {
            url: url.to_string(),
            analysis: AnalysisResult {
                space_saved,
                optimizations,
                dom_stats: stats,
                performance: PerformanceStats {
                    load_time_ms,
                    content_bytes: html.len() as u64,
                    metrics,
                },
            },
            schemas: extract_schemas(&document),
            backlinks: extract_backlinks(&document, url),
        }
    }

    fn unused_elements(
        &self,
        document: &Html,
        markup: &HashMap<NodeId, Markup>,
        stats: &mut DomStats,
    ) -> (usize, u64) {
        let mut flagged = 0usize;
        let mut bytes = 0u64;
        // Children of a removable element go with it.
        let mut inside_flagged: Option<NodeId> = None;

        for edge in document.root_element().traverse() {
            let node = match edge {
                Edge::Open(node) => node,
                Edge::Close(node) => {
                    if inside_flagged == Some(node.id()) {
                        inside_flagged = None;
                    }
                    continue;
                }
            };
            let Some(element) = ElementRef::wrap(node) else {
                continue;
            };

            stats.total_elements += 1;
            match element.value().name() {
                "img" => stats.images += 1,
                "script" => stats.scripts += 1,
                "style" => stats.stylesheets += 1,
                "link" if is_stylesheet(&element) => stats.stylesheets += 1,
                _ => {}
            }

            if inside_flagged.is_some() || NON_CONTENT_TAGS.contains(&element.value().name()) {
                continue;
            }
            if self.classifier.is_unused(&element) {
                flagged += 1;
                bytes += markup.get(&element.id()).map_or(0, |m| m.len);
                inside_flagged = Some(element.id());
            }
        }

        (flagged, bytes)
    }
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new()
    }
}

fn push_optimization(list: &mut Vec<Optimization>, kind: OptimizationKind, savings: u64, description: String) {
    if savings == 0 {
        return;
    }
    list.push(Optimization {
        kind,
        severity: Severity::from_savings(savings),
        description,
        potential_savings: savings,
    });
}

fn is_stylesheet(element: &ElementRef) -> bool {
    element
        .value()
        .attr("rel")
        .map(|rel| rel.split_whitespace().any(|r| r.eq_ignore_ascii_case("stylesheet")))
        .unwrap_or(false)
}

/// Digest and serialized length of one element's subtree.
#[derive(Debug, Clone, Copy)]
struct Markup {
    digest: [u8; 32],
    len: u64,
}

/// One post-order pass over the tree. Each element is summarized from its
/// children's summaries, so no subtree is serialized more than once.
fn index_markup(document: &Html) -> HashMap<NodeId, Markup> {
    let mut index: HashMap<NodeId, Markup> = HashMap::new();

    for edge in document.tree.root().traverse() {
        let Edge::Close(node) = edge else {
            continue;
        };
        let Node::Element(element) = node.value() else {
            continue;
        };

        let name = element.name();
        let mut hasher = Sha256::new();
        hasher.update(name.as_bytes());
        // `<name` and `>`
        let mut len = name.len() as u64 + 2;
        for (attr, value) in element.attrs() {
            hasher.update([0u8]);
            hasher.update(attr.as_bytes());
            hasher.update([1u8]);
            hasher.update(value.as_bytes());
            // ` attr="value"`
            len += attr.len() as u64 + 4 + escaped_len(value, true);
        }

        if !VOID_TAGS.contains(&name) {
            let raw_text = RAW_TEXT_TAGS.contains(&name);
            for child in node.children() {
                match child.value() {
                    Node::Element(_) => {
                        if let Some(child_markup) = index.get(&child.id()) {
                            hasher.update([2u8]);
                            hasher.update(child_markup.digest);
                            len += child_markup.len;
                        }
                    }
                    Node::Text(text) => {
                        let text: &str = text;
                        hasher.update([3u8]);
                        hasher.update(text.as_bytes());
                        len += if raw_text { text.len() as u64 } else { escaped_len(text, false) };
                    }
                    Node::Comment(comment) => {
                        let comment: &str = comment;
                        hasher.update([4u8]);
                        hasher.update(comment.as_bytes());
                        // `<!--` and `-->`
                        len += comment.len() as u64 + 7;
                    }
                    _ => {}
                }
            }
            // `</name>`
            len += name.len() as u64 + 3;
        }

        index.insert(
            node.id(),
            Markup {
                digest: hasher.finalize().into(),
                len,
            },
        );
    }

    index
}

/// Length of `text` once serialized with HTML escaping.
fn escaped_len(text: &str, in_attribute: bool) -> u64 {
    text.chars()
        .map(|c| match c {
            '&' => 5,
            '\u{a0}' => 6,
            '"' if in_attribute => 6,
            '<' | '>' if !in_attribute => 4,
            c => c.len_utf8(),
        })
        .sum::<usize>() as u64
}

/// Returns (count, markup bytes, script bytes) for repeated content.
fn duplicate_elements(document: &Html, markup: &HashMap<NodeId, Markup>) -> (usize, u64, u64) {
    let mut count = 0usize;
    let mut bytes = 0u64;
    let mut script_bytes = 0u64;

    let mut seen_markup: HashMap<[u8; 32], usize> = HashMap::new();
    // A repeated block already accounts for everything inside it.
    let mut inside_counted: Option<NodeId> = None;
    for edge in document.root_element().traverse() {
        let node = match edge {
            Edge::Open(node) => node,
            Edge::Close(node) => {
                if inside_counted == Some(node.id()) {
                    inside_counted = None;
                }
                continue;
            }
        };
        if inside_counted.is_some() {
            continue;
        }
        let Some(element) = ElementRef::wrap(node) else {
            continue;
        };
        if !BLOCK_TAGS.contains(&element.value().name()) {
            continue;
        }
        let Some(summary) = markup.get(&element.id()) else {
            continue;
        };
        if summary.len < MIN_DUPLICATE_BYTES as u64 {
            continue;
        }
        let seen = seen_markup.entry(summary.digest).or_insert(0);
        *seen += 1;
        if *seen > 1 {
            inside_counted = Some(element.id());
            count += 1;
            bytes += summary.len;
        }
    }

    let mut seen_scripts = HashSet::new();
    for script in document.select(&sel("script")) {
        let key = match script.value().attr("src") {
            Some(src) => format!("src:{}", src),
            None => {
                let body: String = script.text().collect();
                if body.trim().is_empty() {
                    continue;
                }
                format!("inline:{}", body)
            }
        };
        if !seen_scripts.insert(key) {
            count += 1;
            script_bytes += script.html().len() as u64;
        }
    }

    let mut seen_sheets = HashSet::new();
    for link in document.select(&sel("link[href]")) {
        if !is_stylesheet(&link) {
            continue;
        }
        if let Some(href) = link.value().attr("href")
            && !seen_sheets.insert(href.to_string())
        {
            count += 1;
            bytes += link.html().len() as u64;
        }
    }

    (count, bytes, script_bytes)
}

fn parse_dimension(value: Option<&str>) -> Option<u64> {
    value?.trim().trim_end_matches("px").parse().ok()
}

fn oversized_images(document: &Html) -> usize {
    document
        .select(&sel("img"))
        .filter(|img| {
            let width = parse_dimension(img.value().attr("width"));
            let height = parse_dimension(img.value().attr("height"));
            match (width, height) {
                (Some(w), Some(h)) => w.saturating_mul(h) > OVERSIZED_PIXELS || w > OVERSIZED_WIDTH,
                (Some(w), None) => w > OVERSIZED_WIDTH,
                _ => false,
            }
        })
        .count()
}

fn unused_css_bytes(document: &Html) -> u64 {
    document
        .select(&sel("style"))
        .map(|style| {
            let css: String = style.text().collect();
            unused_rule_bytes(document, &strip_comments(&css))
        })
        .sum()
}

fn strip_comments(css: &str) -> String {
    let mut out = String::with_capacity(css.len());
    let mut rest = css;
    while let Some(start) = rest.find("/*") {
        out.push_str(&rest[..start]);
        match rest[start + 2..].find("*/") {
            Some(end) => rest = &rest[start + 2 + end + 2..],
            None => return out,
        }
    }
    out.push_str(rest);
    out
}

/// Walks top-level rules; recurses into `@media`/`@supports` blocks and keeps
/// every other at-rule.
fn unused_rule_bytes(document: &Html, css: &str) -> u64 {
    let mut unused = 0u64;
    let mut rest = css;

    while let Some(open) = rest.find('{') {
        let prelude = rest[..open].trim();
        let Some(close) = matching_brace(&rest[open..]) else {
            break;
        };
        let block = &rest[open + 1..open + close];
        let rule_len = (prelude.len() + close + 1) as u64;

        if prelude.starts_with("@media") || prelude.starts_with("@supports") {
            unused += unused_rule_bytes(document, block);
        } else if !prelude.starts_with('@') && !selectors_match(document, prelude) {
            unused += rule_len;
        }

        rest = &rest[open + close + 1..];
    }

    unused
}

fn matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (idx, c) in s.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(idx);
                }
            }
            _ => {}
        }
    }
    None
}

/// A rule counts as used if any of its selectors matches, or if we cannot
/// parse one (pseudo-classes and the like).
fn selectors_match(document: &Html, prelude: &str) -> bool {
    prelude.split(',').map(str::trim).filter(|s| !s.is_empty()).any(|raw| {
        match Selector::parse(raw) {
            Ok(selector) => document.select(&selector).next().is_some(),
            Err(_) => true,
        }
    })
}

fn extract_schemas(document: &Html) -> Vec<SchemaRecord> {
    let mut records = Vec::new();

    for script in document.select(&sel(r#"script[type="application/ld+json"]"#)) {
        let body: String = script.text().collect();
        match serde_json::from_str::<serde_json::Value>(body.trim()) {
            Ok(serde_json::Value::Array(items)) => {
                records.extend(items.into_iter().map(json_ld_record));
            }
            Ok(value) => {
                if let Some(serde_json::Value::Array(graph)) = value.get("@graph") {
                    records.extend(graph.iter().cloned().map(json_ld_record));
                } else {
                    records.push(json_ld_record(value));
                }
            }
            Err(e) => debug!("Skipping malformed JSON-LD block: {}", e),
        }
    }

    for scope in document.select(&sel("[itemscope]")) {
        // Nested scopes are reported as part of their parent.
        let nested = scope
            .ancestors()
            .filter_map(ElementRef::wrap)
            .any(|a| a.value().attr("itemscope").is_some());
        if nested {
            continue;
        }

        let mut properties = serde_json::Map::new();
        for prop in scope.select(&sel("[itemprop]")) {
            let Some(name) = prop.value().attr("itemprop") else {
                continue;
            };
            let value = prop
                .value()
                .attr("content")
                .or_else(|| prop.value().attr("href"))
                .or_else(|| prop.value().attr("src"))
                .map(str::to_string)
                .unwrap_or_else(|| collapse_whitespace(&prop.text().collect::<String>()));
            properties
                .entry(name.to_string())
                .or_insert(serde_json::Value::String(value));
        }

        records.push(SchemaRecord {
            format: SchemaFormat::Microdata,
            schema_type: scope
                .value()
                .attr("itemtype")
                .and_then(|t| t.rsplit('/').next())
                .map(str::to_string),
            data: serde_json::Value::Object(properties),
        });
    }

    records
}

fn json_ld_record(value: serde_json::Value) -> SchemaRecord {
    let schema_type = match value.get("@type") {
        Some(serde_json::Value::String(t)) => Some(t.clone()),
        Some(serde_json::Value::Array(types)) => types.first().and_then(|t| t.as_str()).map(str::to_string),
        _ => None,
    };
    SchemaRecord {
        format: SchemaFormat::JsonLd,
        schema_type,
        data: value,
    }
}

fn extract_backlinks(document: &Html, current_url: &str) -> Vec<Backlink> {
    document
        .select(&sel("a[href]"))
        .filter_map(|anchor| {
            let href = anchor.value().attr("href")?;
            let target = resolve_url(current_url, href)?;
            Some(Backlink {
                source: current_url.to_string(),
                kind: link_kind(current_url, &target),
                target,
                anchor_text: collapse_whitespace(&anchor.text().collect::<String>()),
            })
        })
        .collect()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::LinkKind;

    fn analyze(html: &str) -> PageReport {
        Analyzer::new().analyze_html("https://example.com/", html, 10, BTreeMap::new())
    }

    #[test]
    fn test_counts_hidden_and_empty_elements() {
        let report = analyze(
            r#"<html><body>
                <div hidden><span>secret</span></div>
                <p style="display: none">gone</p>
                <div aria-hidden="true">icon</div>
                <div></div>
                <div id="mount"></div>
                <p>visible</p>
            </body></html>"#,
        );
        let stats = &report.analysis.dom_stats;
        // hidden div (child not counted separately), hidden p, aria div, empty div
        assert_eq!(stats.unused_elements, 4);
        assert!(report.analysis.space_saved > 0);
        assert_eq!(
            report.analysis.optimizations[0].kind,
            OptimizationKind::UnusedElements
        );
    }

    #[test]
    fn test_clean_page_saves_nothing() {
        let report = analyze("<html><body><h1>Title</h1><p>Text</p></body></html>");
        assert_eq!(report.analysis.space_saved, 0);
        assert!(report.analysis.optimizations.is_empty());
        assert!(report.analysis.dom_stats.total_elements >= 5);
    }

    #[test]
    fn test_duplicate_blocks_and_scripts() {
        let block = r#"<section class="promo"><p>Buy one, get one free, this week only.</p></section>"#;
        let html = format!(
            r#"<html><head>
                <script src="/app.js"></script>
                <script src="/app.js"></script>
                <link rel="stylesheet" href="/site.css">
                <link rel="stylesheet" href="/site.css">
            </head><body>{0}{0}{0}</body></html>"#,
            block
        );
        let report = analyze(&html);
        let stats = &report.analysis.dom_stats;
        // two repeated sections, one repeated script, one repeated stylesheet
        assert_eq!(stats.duplicate_elements, 4);
        assert!(stats.unused_js_bytes > 0);
        assert_eq!(stats.scripts, 2);
        assert_eq!(stats.stylesheets, 2);
        let kinds: Vec<_> = report.analysis.optimizations.iter().map(|o| o.kind).collect();
        assert!(kinds.contains(&OptimizationKind::DuplicateElements));
        assert!(kinds.contains(&OptimizationKind::UnusedJs));
    }

    #[test]
    fn test_oversized_images() {
        let report = analyze(
            r#"<html><body>
                <img src="a.jpg" width="4000" height="3000">
                <img src="b.jpg" width="3000px">
                <img src="c.jpg" width="800" height="600">
                <img src="d.jpg">
            </body></html>"#,
        );
        assert_eq!(report.analysis.dom_stats.oversized_images, 2);
        assert_eq!(report.analysis.dom_stats.images, 4);
        assert_eq!(report.analysis.space_saved, 2 * OVERSIZED_IMAGE_SAVINGS);
    }

    #[test]
    fn test_absurd_image_dimensions_do_not_overflow() {
        let report = analyze(r#"<img width="99999999999" height="99999999999"><img width="18446744073709551615" height="2">"#);
        assert_eq!(report.analysis.dom_stats.oversized_images, 2);
    }

    #[test]
    fn test_markup_lengths_match_serialization() {
        let document = Html::parse_document(
            r#"<html><head><script>if (a < b && c) { go(); }</script></head><body>
                <div class="x" data-note="say &quot;hi&quot; &amp; bye"><!-- note --><p>Fish &amp; chips &lt;3&nbsp;today</p><br><img src="a.png" alt=""></div>
                <svg viewBox="0 0 1 1"><path d="M0 0"></path></svg>
            </body></html>"#,
        );
        let markup = index_markup(&document);
        for element in document.root_element().descendants().filter_map(ElementRef::wrap) {
            assert_eq!(
                markup[&element.id()].len,
                element.html().len() as u64,
                "length of <{}>",
                element.value().name()
            );
        }
    }

    #[test]
    fn test_deeply_nested_markup_is_linear() {
        let depth = 3000;
        let html = format!(
            "<html><body>{}<p>core</p>{}</body></html>",
            r#"<div class="wrapper-block">"#.repeat(depth),
            "</div>".repeat(depth)
        );
        let start = Instant::now();
        let report = analyze(&html);
        assert!(report.analysis.dom_stats.total_elements >= depth);
        assert_eq!(report.analysis.dom_stats.duplicate_elements, 0);
        assert!(start.elapsed() < Duration::from_secs(5), "took {:?}", start.elapsed());
    }

    #[test]
    fn test_nested_duplicates_counted_once() {
        let inner = r#"<div class="card"><p>Same card body repeated across the whole listing page.</p></div>"#;
        let outer = format!(r#"<section class="row">{0}{0}</section>"#, inner);
        let report = analyze(&format!("<html><body>{0}{0}</body></html>", outer));
        // second card in the first row, then the whole second row
        assert_eq!(report.analysis.dom_stats.duplicate_elements, 2);
    }

    #[test]
    fn test_unused_css_rules() {
        let report = analyze(
            r#"<html><head><style>
                /* comment */
                .used { color: red; }
                .missing { color: blue; }
                @media (max-width: 600px) { .also-missing { margin: 0; } .used { margin: 1px; } }
                @font-face { font-family: x; src: url(x.woff); }
                a:hover { color: green; }
            </style></head><body><p class="used">hi</p><a href="/x">x</a></body></html>"#,
        );
        let unused = report.analysis.dom_stats.unused_css_bytes;
        // trimmed selector plus its block
        let expected = ".missing{ color: blue; }".len() + ".also-missing{ margin: 0; }".len();
        assert_eq!(unused, expected as u64);
    }

    #[test]
    fn test_optimizations_sorted_by_savings() {
        let report = analyze(
            r#"<html><body>
                <div hidden>x</div>
                <img width="5000" height="5000">
            </body></html>"#,
        );
        let savings: Vec<u64> = report
            .analysis
            .optimizations
            .iter()
            .map(|o| o.potential_savings)
            .collect();
        let mut sorted = savings.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(savings, sorted);
        assert_eq!(report.analysis.optimizations[0].kind, OptimizationKind::OversizedImages);
    }

    #[test]
    fn test_extracts_json_ld_and_microdata() {
        let report = analyze(
            r#"<html><head>
                <script type="application/ld+json">{"@context":"https://schema.org","@type":"Article","headline":"Hi"}</script>
                <script type="application/ld+json">{"@graph":[{"@type":"Person"},{"@type":["Organization","Thing"]}]}</script>
                <script type="application/ld+json">{not json</script>
            </head><body>
                <div itemscope itemtype="https://schema.org/Product">
                    <span itemprop="name">Widget</span>
                    <meta itemprop="price" content="9.99">
                    <div itemprop="brand" itemscope itemtype="https://schema.org/Brand"><span itemprop="name">Acme</span></div>
                </div>
            </body></html>"#,
        );
        let types: Vec<_> = report
            .schemas
            .iter()
            .map(|s| (s.format, s.schema_type.clone()))
            .collect();
        assert_eq!(
            types,
            vec![
                (SchemaFormat::JsonLd, Some("Article".to_string())),
                (SchemaFormat::JsonLd, Some("Person".to_string())),
                (SchemaFormat::JsonLd, Some("Organization".to_string())),
                (SchemaFormat::Microdata, Some("Product".to_string())),
            ]
        );
        let product = &report.schemas[3].data;
        assert_eq!(product["name"], "Widget");
        assert_eq!(product["price"], "9.99");
    }

    #[test]
    fn test_extracts_backlinks() {
        let report = analyze(
            r##"<html><body>
                <a href="/about">About   us</a>
                <a href="https://other.test/page">Elsewhere</a>
                <a href="#top">Top</a>
                <a href="mailto:hi@example.com">Mail</a>
            </body></html>"##,
        );
        assert_eq!(report.backlinks.len(), 2);
        assert_eq!(report.backlinks[0].target, "https://example.com/about");
        assert_eq!(report.backlinks[0].anchor_text, "About us");
        assert_eq!(report.backlinks[0].kind, LinkKind::Internal);
        assert_eq!(report.backlinks[1].kind, LinkKind::External);
    }

    struct EverythingUnused;

    impl UnusedClassifier for EverythingUnused {
        fn is_unused(&self, _element: &ElementRef) -> bool {
            true
        }
    }

    #[test]
    fn test_custom_classifier() {
        let analyzer = Analyzer::new().with_classifier(Box::new(EverythingUnused));
        let report = analyzer.analyze_html(
            "https://example.com/",
            "<html><body><main><p>a</p><p>b</p></main></body></html>",
            0,
            BTreeMap::new(),
        );
        // only <main>; its children go with it
        assert_eq!(report.analysis.dom_stats.unused_elements, 1);
    }
}
