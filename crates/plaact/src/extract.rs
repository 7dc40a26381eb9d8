use std::cmp::Reverse;

use scraper::{ElementRef, Html, Node, Selector};
use serde::{Deserialize, Serialize};

use crate::config::CrawlerConfig;

/// Where the body is cut relative to a matched end marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerCut {
    /// A closing sentence that belongs to the body.
    After,
    /// A footer label that follows the body.
    Before,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndMarker {
    pub text: String,
    pub cut: MarkerCut,
}

impl EndMarker {
    pub fn new(text: impl Into<String>, cut: MarkerCut) -> Self {
        Self {
            text: text.into(),
            cut,
        }
    }
}

impl AsRef<str> for EndMarker {
    fn as_ref(&self) -> &str {
        &self.text
    }
}

const SKIPPED_ELEMENTS: [&str; 4] = ["script", "style", "noscript", "template"];

/// Returns the smallest byte offset at or after `from` where any marker
/// occurs, with the marker found there. On a tie the longest marker wins,
/// then the earliest in the list.
pub fn earliest_marker<'m, M: AsRef<str>>(
    text: &str,
    markers: &'m [M],
    from: usize,
) -> Option<(usize, &'m M)> {
    let haystack = text.get(from..)?;
    markers
        .iter()
        .filter_map(|m| {
            let needle: &str = m.as_ref();
            if needle.is_empty() {
                return None;
            }
            haystack
                .find(needle)
                .map(|pos| (from + pos, Reverse(needle.len()), m))
        })
        .min_by_key(|&(pos, len, _)| (pos, len))
        .map(|(pos, _, m)| (pos, m))
}

fn collect_text(element: ElementRef, out: &mut Vec<String>) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push(text.to_string()),
            Node::Element(el) if SKIPPED_ELEMENTS.contains(&el.name()) => {}
            Node::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    collect_text(child_el, out);
                }
            }
            _ => {}
        }
    }
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Slices announcement bodies out of detail pages using textual markers.
#[derive(Debug, Clone)]
pub struct DetailExtractor {
    start_markers: Vec<String>,
    end_markers: Vec<EndMarker>,
    content_selector: Option<Selector>,
}

impl DetailExtractor {
    pub fn new(start_markers: Vec<String>, end_markers: Vec<EndMarker>) -> Self {
        Self {
            start_markers,
            end_markers,
            content_selector: None,
        }
    }

    pub fn from_config(config: &CrawlerConfig) -> Self {
        let content_selector = config
            .content_selector
            .as_deref()
            .and_then(|sel| match Selector::parse(sel) {
                Ok(selector) => Some(selector),
                Err(e) => {
                    log::warn!("Ignoring content selector '{}': {}", sel, e);
                    None
                }
            });

        Self {
            start_markers: config.start_markers.clone(),
            end_markers: config.end_markers.clone(),
            content_selector,
        }
    }

    /// Plain text of the page: the content element when the selector
    /// matches, the whole document otherwise. Tags are stripped and
    /// whitespace runs collapse to one space.
    pub fn flatten(&self, html: &str) -> String {
        let document = Html::parse_document(html);
        let root = self
            .content_selector
            .as_ref()
            .and_then(|sel| document.select(sel).next())
            .unwrap_or_else(|| document.root_element());

        let mut parts = Vec::new();
        collect_text(root, &mut parts);
        normalize_whitespace(&parts.join(" "))
    }

    /// Body between the first start marker and the first end marker after
    /// it, or `None` when the page carries no start marker.
    pub fn extract(&self, html: &str) -> Option<String> {
        self.extract_from_text(&self.flatten(html))
    }

    pub fn extract_from_text(&self, text: &str) -> Option<String> {
        let (start, marker) = earliest_marker(text, &self.start_markers, 0)?;

        let end = earliest_marker(text, &self.end_markers, start + marker.len())
            .map(|(pos, end_marker)| match end_marker.cut {
                MarkerCut::After => pos + end_marker.text.len(),
                MarkerCut::Before => pos,
            })
            .unwrap_or(text.len());

        let mut slice = &text[start..end];

        // Some templates print the title twice back to back.
        let rest = slice[marker.len()..].trim_start();
        if rest.starts_with(marker.as_str()) {
            slice = rest;
        }

        Some(slice.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn extractor() -> DetailExtractor {
        DetailExtractor::new(
            vec!["TITLE-A".to_string(), "TITLE-B".to_string()],
            vec![
                EndMarker::new("closing words.", MarkerCut::After),
                EndMarker::new("Downloads", MarkerCut::Before),
            ],
        )
    }

    #[test]
    fn test_earliest_marker_picks_minimal_offset() {
        let markers = ["beta", "alpha"];
        assert_eq!(
            earliest_marker("x alpha beta", &markers, 0),
            Some((2, &"alpha"))
        );
        assert_eq!(earliest_marker("x alpha beta", &markers, 3).map(|m| m.0), Some(8));
        assert_eq!(earliest_marker("nothing", &markers, 0), None);
        assert_eq!(earliest_marker("short", &markers, 99), None);
    }

    #[test]
    fn test_earliest_marker_prefers_longest_on_tie() {
        let markers = ["abc", "abcdef"];
        assert_eq!(
            earliest_marker("__abcdef", &markers, 0),
            Some((2, &"abcdef"))
        );
    }

    #[test]
    fn test_extract_returns_none_without_start_marker() {
        let html = "<html><body><p>Unrelated news</p><p>Downloads</p></body></html>";
        assert_eq!(extractor().extract(html), None);
    }

    #[test]
    fn test_extract_cuts_after_closing_phrase() {
        let html = "<html><body><nav>menu</nav><p>TITLE-A</p><p>body text, closing words.</p>\
                    <p>trailing</p><p>Downloads</p></body></html>";
        assert_eq!(
            extractor().extract(html).as_deref(),
            Some("TITLE-A body text, closing words.")
        );
    }

    #[test]
    fn test_extract_cuts_before_footer_label() {
        let html = "<body><h2>TITLE-B</h2><div>only body</div><div>Downloads area</div></body>";
        assert_eq!(
            extractor().extract(html).as_deref(),
            Some("TITLE-B only body")
        );
    }

    #[test]
    fn test_extract_runs_to_end_without_end_marker() {
        let html = "<body><p>TITLE-A</p><p>everything   else\n here</p></body>";
        assert_eq!(
            extractor().extract(html).as_deref(),
            Some("TITLE-A everything else here")
        );
    }

    #[test]
    fn test_extract_ignores_end_marker_before_start() {
        let text = "Downloads TITLE-A body Downloads";
        assert_eq!(
            extractor().extract_from_text(text).as_deref(),
            Some("TITLE-A body")
        );
    }

    #[test]
    fn test_extract_collapses_duplicated_title() {
        let text = "menu TITLE-ATITLE-A body closing words.";
        assert_eq!(
            extractor().extract_from_text(text).as_deref(),
            Some("TITLE-A body closing words.")
        );
        let spaced = "TITLE-B TITLE-B body";
        assert_eq!(
            extractor().extract_from_text(spaced).as_deref(),
            Some("TITLE-B body")
        );
    }

    #[test]
    fn test_flatten_skips_scripts() {
        let html = "<html><head><style>p{}</style></head><body><script>var x = 1;</script>\
                    <p>visible</p></body></html>";
        assert_eq!(extractor().flatten(html), "visible");
    }

    #[test]
    fn test_extract_detail_fixture() {
        let html = fs::read_to_string("fixtures/detail_page.html").expect("Failed to read fixture");
        let extractor = DetailExtractor::from_config(&CrawlerConfig::default());

        let body = extractor.extract(&html).expect("Should find the report body");
        assert!(body.starts_with("中共解放軍臺海周邊海、空域動態"));
        assert!(body.ends_with("並派遣任務機、艦及岸置飛彈系統監控應處。"));
        assert!(!body.contains("下載專區"));
        assert_eq!(body.matches("中共解放軍臺海周邊海、空域動態").count(), 1);
    }

    #[test]
    fn test_extract_unrelated_fixture_is_miss() {
        let html =
            fs::read_to_string("fixtures/unrelated_page.html").expect("Failed to read fixture");
        let extractor = DetailExtractor::from_config(&CrawlerConfig::default());
        assert_eq!(extractor.extract(&html), None);
    }
}
