//! Chapter image extraction and reading-order resolution.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

/// Non-content imagery that sites mix into chapter pages, matched against
/// the file name only.
static NOISE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(logo|icon|avatar|banner|sponsor|badge|(^|[_.-])ads?([_.-]|$))").unwrap()
});

static TRAILING_DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+$").unwrap());

/// One image element as found in the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCandidate {
    /// Raw attribute value, possibly relative.
    pub src: String,
    /// Explicit page index carried by the element, if any.
    pub page_index: Option<u32>,
    /// Position in document order.
    pub position: usize,
}

impl ImageCandidate {
    pub fn new(src: impl Into<String>, page_index: Option<u32>, position: usize) -> Self {
        Self {
            src: src.into(),
            page_index,
            position,
        }
    }
}

/// Whether the file name looks like site chrome rather than a page.
/// Directory names are ignored, so `/uploads/lexicon/001.jpg` is kept.
pub fn is_noise_image(url: &Url) -> bool {
    file_name(url).is_some_and(|file| NOISE_PATTERN.is_match(file))
}

fn file_name(url: &Url) -> Option<&str> {
    url.path_segments()?.rev().find(|s| !s.is_empty())
}

/// Digits ending the file stem, e.g. `12` for `page_12.webp`. Hash-like
/// names such as `1b7c9e.jpg` have none.
fn filename_number(url: &Url) -> Option<u64> {
    let file = file_name(url)?;
    let stem = file.rsplit_once('.').map(|(s, _)| s).unwrap_or(file);
    TRAILING_DIGITS
        .find(stem)
        .and_then(|m| m.as_str().parse().ok())
}

/// Resolve, filter, deduplicate and order image candidates.
///
/// Candidates with an explicit page index come first, ordered by it. Ties
/// and unindexed candidates fall back to the numeric filename suffix, then
/// to document position.
pub fn order_images(base: &Url, candidates: Vec<ImageCandidate>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut resolved: Vec<(Url, ImageCandidate)> = Vec::new();

    for candidate in candidates {
        let src = candidate.src.trim();
        if src.is_empty() || src.starts_with("data:") {
            continue;
        }
        let Ok(url) = base.join(src) else {
            continue;
        };
        if !matches!(url.scheme(), "http" | "https") || is_noise_image(&url) {
            continue;
        }
        if seen.insert(url.as_str().to_string()) {
            resolved.push((url, candidate));
        }
    }

    resolved.sort_by_key(|(url, c)| {
        let number = filename_number(url);
        (
            c.page_index.is_none(),
            c.page_index.unwrap_or(0),
            number.is_none(),
            number.unwrap_or(0),
            c.position,
        )
    });

    resolved.into_iter().map(|(url, _)| url.to_string()).collect()
}

/// Collect candidates from `document` using the first non-empty attribute in
/// `attrs` for each element matched by `selector`.
pub(crate) fn collect_candidates(
    document: &Html,
    selector: &Selector,
    attrs: &[String],
    index_attr: Option<&str>,
) -> Vec<ImageCandidate> {
    document
        .select(selector)
        .enumerate()
        .filter_map(|(position, el)| {
            let src = attrs
                .iter()
                .filter_map(|a| el.value().attr(a))
                .map(|v| v.split_whitespace().next().unwrap_or(""))
                .find(|v| !v.is_empty())?;
            let page_index = index_attr
                .and_then(|a| el.value().attr(a))
                .and_then(|v| v.trim().parse::<u32>().ok());
            Some(ImageCandidate::new(src, page_index, position))
        })
        .collect()
}
