//! Page snapshot extraction.
//!
//! Hyperlinks and clickables are parsed out of the serialized markup with
//! `scraper`; input fields come from one in-page query so visibility and
//! enabled state are evaluated by the browser itself. Each part fails on its
//! own: a broken part becomes an empty list and an `error!` line.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error};
use url::Url;

use crate::browser::LivePage;
use crate::config::ExtractionConfig;
use crate::error::AgentError;
use crate::util::url_entropy;

const INPUT_FIELDS_JS: &str = include_str!("js/input_fields.js");
const YOUTUBE_VIDEOS_JS: &str = include_str!("js/youtube_videos.js");

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InputField {
    pub tag: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub input_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aria_label: Option<String>,
    pub selector: String,
}

impl InputField {
    pub fn from_selector(selector: impl Into<String>) -> Self {
        Self {
            tag: "input".into(),
            selector: selector.into(),
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Clickable {
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub onclick: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tabindex: Option<String>,
    #[serde(skip)]
    outer_html: String,
}

/// A title/link pair produced by a site-specific extractor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteLink {
    pub title: String,
    pub link: String,
}

/// Bounded, immutable view of one page handed to the model.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub hyperlinks: Vec<String>,
    pub input_fields: Vec<InputField>,
    pub clickable_fields: Vec<Clickable>,
    pub visible_text: Vec<String>,
    pub current_url: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub site_links: Vec<SiteLink>,
}

impl PageSnapshot {
    /// The snapshot used before the first real extraction: the start page is
    /// known to carry a search box.
    pub fn initial(start_url: &str) -> Self {
        Self {
            input_fields: vec![InputField::from_selector("#searchbox")],
            current_url: start_url.to_string(),
            ..Self::default()
        }
    }
}

fn parse_selector(s: &str) -> Result<Selector, String> {
    Selector::parse(s).map_err(|e| format!("bad selector {s:?}: {e:?}"))
}

fn join_href(base: Option<&Url>, href: &str) -> Option<Url> {
    match base {
        Some(base) => base.join(href).ok(),
        None => Url::parse(href).ok(),
    }
}

fn is_junk_href(href_lower: &str, cfg: &ExtractionConfig) -> bool {
    href_lower.is_empty()
        || cfg.invalid_hrefs.iter().any(|h| h == href_lower)
        || href_lower.starts_with("javascript:")
        || href_lower.starts_with('#')
}

/// Absolute, filtered anchor targets in document order.
pub fn extract_hyperlinks(
    html: &str,
    base_url: &str,
    cfg: &ExtractionConfig,
) -> Result<Vec<String>, String> {
    let doc = Html::parse_document(html);
    let anchors = parse_selector("a[href]")?;
    let base = Url::parse(base_url).ok();

    let mut out = Vec::new();
    for a in doc.select(&anchors) {
        let href = a.value().attr("href").unwrap_or_default().trim();
        let href_lower = href.to_lowercase();
        if is_junk_href(&href_lower, cfg) {
            continue;
        }
        let Some(full) = join_href(base.as_ref(), href) else {
            continue;
        };
        if cfg.links_to_avoid.iter().any(|x| href_lower.contains(x.as_str())) {
            continue;
        }
        if !cfg.valid_schemes.iter().any(|s| s == full.scheme()) {
            continue;
        }
        let full = full.to_string();
        if url_entropy(&full) < cfg.max_entropy {
            out.push(full);
        }
    }
    Ok(out)
}

fn stripped_text(el: &ElementRef<'_>) -> String {
    el.text().map(str::trim).filter(|s| !s.is_empty()).collect()
}

fn attr(el: &ElementRef<'_>, name: &str) -> Option<String> {
    el.value()
        .attr(name)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

fn truncate_chars(s: &str, limit: usize) -> String {
    s.chars().take(limit).collect()
}

/// Deduplicated clickable descriptors, capped unless `cfg.full_clickables`.
pub fn extract_clickables(
    html: &str,
    base_url: &str,
    cfg: &ExtractionConfig,
) -> Result<Vec<Clickable>, String> {
    let doc = Html::parse_document(html);
    let base = Url::parse(base_url).ok();
    let mut candidates: Vec<ElementRef<'_>> = Vec::new();

    if !cfg.clickable_selectors.is_empty() {
        let tags = parse_selector(&cfg.clickable_selectors.join(", "))?;
        for el in doc.select(&tags) {
            if el.value().name() == "a" {
                let href = el.value().attr("href").unwrap_or_default().trim().to_lowercase();
                if is_junk_href(&href, cfg) {
                    continue;
                }
            }
            candidates.push(el);
        }
    }

    let inputs = parse_selector("input")?;
    candidates.extend(doc.select(&inputs).filter(|el| {
        let t = el.value().attr("type").unwrap_or_default().to_lowercase();
        cfg.valid_button_types.iter().any(|v| *v == t)
    }));

    candidates.extend(doc.select(&parse_selector("[onclick]")?));
    candidates.extend(doc.select(&parse_selector("[role]")?).filter(|el| {
        let role = el.value().attr("role").unwrap_or_default().to_lowercase();
        role == "button" || role == "link"
    }));
    candidates.extend(doc.select(&parse_selector("[tabindex]")?));

    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut out = Vec::new();
    for el in candidates {
        let tag = el.value().name().to_string();
        let markup = el.html();
        if !seen.insert((tag.clone(), markup.clone())) {
            continue;
        }

        let text = stripped_text(&el);
        let href = attr(&el, "href");
        let onclick = attr(&el, "onclick");
        if text.is_empty() && href.is_none() && onclick.is_none() {
            continue;
        }

        let text_lower = text.to_lowercase();
        if cfg.junk_keywords.iter().any(|k| text_lower.contains(k.as_str())) {
            continue;
        }

        let href = href.map(|h| match &base {
            Some(b) => b.join(&h).map(|u| u.to_string()).unwrap_or(h),
            None => h,
        });

        out.push(Clickable {
            tag,
            text: Some(text).filter(|t| !t.is_empty()),
            href,
            onclick,
            role: attr(&el, "role"),
            tabindex: attr(&el, "tabindex"),
            outer_html: truncate_chars(&markup, cfg.outer_html_limit),
        });
        if !cfg.full_clickables && out.len() >= cfg.clickable_cap {
            break;
        }
    }
    Ok(out)
}

pub fn extract_visible_text(body_text: &str) -> Vec<String> {
    body_text
        .split('\n')
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Wrap a `(cfg) => ...` script so it runs with `arg` as its argument.
pub(crate) fn call_with(script: &str, arg: &Value) -> String {
    format!("({})({})", script.trim(), arg)
}

pub async fn extract_input_fields(
    page: &dyn LivePage,
    cfg: &ExtractionConfig,
) -> Result<Vec<InputField>, AgentError> {
    let arg = json!({
        "valid_tags": cfg.input_valid_tags,
        "invalid_input_types": cfg.invalid_input_types,
    });
    let value = page.evaluate(&call_with(INPUT_FIELDS_JS, &arg)).await?;
    serde_json::from_value(value).map_err(|e| AgentError::Other(format!("input fields: {e}")))
}

/// Alternate extraction for a family of sites, chosen by URL.
#[async_trait]
pub trait SiteExtractor: Send + Sync {
    fn name(&self) -> &str;
    fn matches(&self, url: &Url) -> bool;
    async fn augment(
        &self,
        page: &dyn LivePage,
        snapshot: &mut PageSnapshot,
    ) -> Result<(), AgentError>;
}

/// Video title/id pairs on YouTube result and watch pages.
pub struct YouTubeExtractor {
    pub limit: usize,
}

impl Default for YouTubeExtractor {
    fn default() -> Self {
        Self { limit: 30 }
    }
}

const YOUTUBE_WATCH_PREFIXES: &[&str] = &[
    "https://www.youtube.com/watch?v=",
    "https://youtube.com/watch?v=",
    "https://m.youtube.com/watch?v=",
];

/// Strip the watch URL down to the bare video id.
pub fn minimize_youtube_link(href: &str) -> String {
    for prefix in YOUTUBE_WATCH_PREFIXES {
        if let Some(rest) = href.strip_prefix(prefix) {
            return rest.split('&').next().unwrap_or(rest).to_string();
        }
    }
    href.to_string()
}

#[derive(Deserialize)]
struct RawVideo {
    title: String,
    href: String,
}

#[async_trait]
impl SiteExtractor for YouTubeExtractor {
    fn name(&self) -> &str {
        "youtube"
    }

    fn matches(&self, url: &Url) -> bool {
        url.host_str()
            .map(|h| h == "youtube.com" || h.ends_with(".youtube.com"))
            .unwrap_or(false)
    }

    async fn augment(
        &self,
        page: &dyn LivePage,
        snapshot: &mut PageSnapshot,
    ) -> Result<(), AgentError> {
        let arg = json!({ "link_selector": "a[href*='/watch?v=']", "limit": self.limit });
        let value = page.evaluate(&call_with(YOUTUBE_VIDEOS_JS, &arg)).await?;
        let videos: Vec<RawVideo> = serde_json::from_value(value)
            .map_err(|e| AgentError::Other(format!("youtube videos: {e}")))?;
        snapshot.site_links = videos
            .into_iter()
            .map(|v| SiteLink {
                title: v.title,
                link: minimize_youtube_link(&v.href),
            })
            .collect();
        Ok(())
    }
}

/// Builds one [`PageSnapshot`] per call from a live page.
#[derive(Clone)]
pub struct DomExtractor {
    cfg: ExtractionConfig,
    sites: Vec<Arc<dyn SiteExtractor>>,
}

impl DomExtractor {
    pub fn new(cfg: ExtractionConfig) -> Self {
        Self {
            cfg,
            sites: vec![Arc::new(YouTubeExtractor::default())],
        }
    }

    pub fn with_site(mut self, site: Arc<dyn SiteExtractor>) -> Self {
        self.sites.push(site);
        self
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.cfg
    }

    /// Never fails: each part that cannot be built is left empty.
    pub async fn extract(&self, page: &dyn LivePage) -> PageSnapshot {
        let current_url = match page.url().await {
            Ok(u) => u,
            Err(e) => {
                error!(error = %e, "failed to read page url");
                String::new()
            }
        };
        let html = match page.content().await {
            Ok(h) => Some(h),
            Err(e) => {
                error!(error = %e, "failed to read page content");
                None
            }
        };
        let body_text = page.body_text().await;

        let mut snapshot = PageSnapshot {
            current_url: current_url.clone(),
            ..PageSnapshot::default()
        };
        // Parsed documents are not Send; keep parsing out of the awaits above.
        if let Some(html) = &html {
            match extract_hyperlinks(html, &current_url, &self.cfg) {
                Ok(v) => snapshot.hyperlinks = v,
                Err(e) => error!(error = %e, "failed to extract hyperlinks"),
            }
            match extract_clickables(html, &current_url, &self.cfg) {
                Ok(v) => snapshot.clickable_fields = v,
                Err(e) => error!(error = %e, "failed to extract clickables"),
            }
        }
        match body_text {
            Ok(t) => snapshot.visible_text = extract_visible_text(&t),
            Err(e) => error!(error = %e, "failed to extract text"),
        }
        match extract_input_fields(page, &self.cfg).await {
            Ok(v) => snapshot.input_fields = v,
            Err(e) => error!(error = %e, "failed to extract input fields"),
        }

        if let Ok(url) = Url::parse(&current_url) {
            for site in self.sites.iter().filter(|s| s.matches(&url)) {
                debug!(extractor = site.name(), "applying site extractor");
                if let Err(e) = site.augment(page, &mut snapshot).await {
                    error!(extractor = site.name(), error = %e, "site extraction failed");
                }
            }
        }
        snapshot
    }
}
