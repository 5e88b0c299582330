//! Reference adapter driven by per-site CSS selector sets.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use url::Url;

use super::images::collect_candidates;
use super::{
    fetch_markup, order_images, AdapterError, NavigationPolicy, ProgressHooks, RequestPacer,
    SiteAdapter,
};
use crate::browser::BrowserPool;
use crate::models::{CatalogSummary, ChapterStub};

/// Markup extraction rules for one site.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SiteSelectors {
    /// Title heading on the detail page.
    pub title: String,

    #[serde(default = "default_cover")]
    pub cover: Option<String>,

    /// Attributes tried in order for the cover URL.
    #[serde(default = "default_cover_attrs")]
    pub cover_attrs: Vec<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub author: Option<String>,

    #[serde(default)]
    pub categories: Option<String>,

    /// Anchor elements of the chapter list.
    pub chapter_links: String,

    /// Most sites list the latest chapter first.
    #[serde(default = "default_newest_first")]
    pub chapters_newest_first: bool,

    /// Page image elements on a chapter page.
    pub images: String,

    /// Attributes tried in order for each image URL (lazy loaders first).
    #[serde(default = "default_image_attrs")]
    pub image_attrs: Vec<String>,

    /// Attribute carrying an explicit page number, if the site has one.
    #[serde(default)]
    pub page_index_attr: Option<String>,
}

fn default_cover() -> Option<String> {
    Some("meta[property='og:image']".to_string())
}

fn default_cover_attrs() -> Vec<String> {
    vec!["content".into(), "data-src".into(), "src".into()]
}

fn default_newest_first() -> bool {
    true
}

fn default_image_attrs() -> Vec<String> {
    vec!["data-src".into(), "data-lazy-src".into(), "src".into()]
}

/// Selectors compiled once at construction.
struct Compiled {
    title: Selector,
    cover: Option<Selector>,
    description: Option<Selector>,
    author: Option<Selector>,
    categories: Option<Selector>,
    chapter_links: Selector,
    images: Selector,
}

fn compile(css: &str) -> anyhow::Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow::anyhow!("invalid selector '{}': {}", css, e))
}

fn compile_opt(css: &Option<String>) -> anyhow::Result<Option<Selector>> {
    css.as_deref().map(compile).transpose()
}

pub struct SelectorAdapter {
    name: String,
    rules: SiteSelectors,
    compiled: Compiled,
    pool: Arc<BrowserPool>,
    pacer: RequestPacer,
    navigation: NavigationPolicy,
}

impl SelectorAdapter {
    pub fn new(
        name: impl Into<String>,
        rules: SiteSelectors,
        pool: Arc<BrowserPool>,
        pacer: RequestPacer,
        navigation: NavigationPolicy,
    ) -> anyhow::Result<Self> {
        let name = name.into();
        let compiled = Compiled {
            title: compile(&rules.title)?,
            cover: compile_opt(&rules.cover)?,
            description: compile_opt(&rules.description)?,
            author: compile_opt(&rules.author)?,
            categories: compile_opt(&rules.categories)?,
            chapter_links: compile(&rules.chapter_links)?,
            images: compile(&rules.images)?,
        };
        Ok(Self {
            name,
            rules,
            compiled,
            pool,
            pacer,
            navigation,
        })
    }

    /// Extract the catalog summary from detail page markup.
    pub fn parse_detail(&self, url: &str, html: &str) -> Result<CatalogSummary, AdapterError> {
        let base = parse_url(url)?;
        let document = Html::parse_document(html);

        let title = document
            .select(&self.compiled.title)
            .map(element_text)
            .find(|t| !t.is_empty())
            .ok_or_else(|| AdapterError::mismatch(url, "title not found"))?;

        let cover_url = self.compiled.cover.as_ref().and_then(|sel| {
            document.select(sel).find_map(|el| {
                self.rules
                    .cover_attrs
                    .iter()
                    .filter_map(|a| el.value().attr(a))
                    .find(|v| !v.trim().is_empty())
                    .and_then(|v| base.join(v.trim()).ok())
                    .map(|u| u.to_string())
            })
        });

        let description = self.compiled.description.as_ref().and_then(|sel| {
            document
                .select(sel)
                .next()
                .map(|el| el.inner_html().trim().to_string())
                .filter(|d| !d.is_empty())
        });

        let author = self.compiled.author.as_ref().and_then(|sel| {
            document
                .select(sel)
                .map(element_text)
                .find(|a| !a.is_empty())
        });

        let categories = self
            .compiled
            .categories
            .as_ref()
            .map(|sel| {
                let mut seen = HashSet::new();
                document
                    .select(sel)
                    .map(element_text)
                    .filter(|c| !c.is_empty() && seen.insert(c.to_lowercase()))
                    .collect()
            })
            .unwrap_or_default();

        let mut seen = HashSet::new();
        let mut chapters: Vec<ChapterStub> = document
            .select(&self.compiled.chapter_links)
            .filter_map(|el| {
                let href = el.value().attr("href")?.trim();
                let link = base.join(href).ok()?;
                if !seen.insert(link.as_str().to_string()) {
                    return None;
                }
                let text = element_text(el);
                let title = if text.is_empty() {
                    last_segment(&link).unwrap_or_else(|| link.to_string())
                } else {
                    text
                };
                Some(ChapterStub::new(title, link.to_string()))
            })
            .collect();

        if chapters.is_empty() {
            return Err(AdapterError::mismatch(url, "no chapter links found"));
        }
        if self.rules.chapters_newest_first {
            chapters.reverse();
        }

        Ok(CatalogSummary {
            title,
            cover_url,
            description,
            author,
            categories,
            chapters,
        })
    }

    /// Extract ordered page image URLs from chapter markup.
    pub fn parse_images(&self, chapter_url: &str, html: &str) -> Result<Vec<String>, AdapterError> {
        let base = parse_url(chapter_url)?;
        let document = Html::parse_document(html);
        let candidates = collect_candidates(
            &document,
            &self.compiled.images,
            &self.rules.image_attrs,
            self.rules.page_index_attr.as_deref(),
        );
        let images = order_images(&base, candidates);
        if images.is_empty() {
            return Err(AdapterError::mismatch(chapter_url, "no page images found"));
        }
        Ok(images)
    }
}

#[async_trait]
impl SiteAdapter for SelectorAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_catalog_detail(
        &self,
        url: &str,
        hooks: Option<&dyn ProgressHooks>,
    ) -> Result<CatalogSummary, AdapterError> {
        if let Some(h) = hooks {
            h.on_start(url);
        }

        let result = match fetch_markup(&self.pool, &self.pacer, &self.navigation, url).await {
            Ok(html) => self.parse_detail(url, &html),
            Err(e) => Err(e),
        };

        if let Some(h) = hooks {
            match &result {
                Ok(summary) => {
                    h.on_chapters_found(url, summary.chapters.len());
                    h.on_success(url, summary);
                }
                Err(e) => h.on_error(url, e),
            }
        }
        result
    }

    async fn fetch_page_images(&self, chapter_url: &str) -> Result<Vec<String>, AdapterError> {
        let html = fetch_markup(&self.pool, &self.pacer, &self.navigation, chapter_url).await?;
        self.parse_images(chapter_url, &html)
    }
}

fn parse_url(url: &str) -> Result<Url, AdapterError> {
    Url::parse(url).map_err(|e| AdapterError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })
}

/// Element text with whitespace collapsed.
fn element_text(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(|t| t.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ")
}

fn last_segment(url: &Url) -> Option<String> {
    url.path_segments()?
        .filter(|s| !s.is_empty())
        .next_back()
        .map(|s| s.to_string())
}
