//! GitHub Trending scraper.
//!
//! Scrapes the daily [trending page](https://github.com/trending?since=daily).
//! Each repository row is an `article.Box-row` with the `owner/repo` link in
//! its `h2`, an optional description paragraph, the primary language and two
//! star counters (total and "stars today").
//!
//! When README enrichment is enabled, repositories without a description get a
//! plain-text README excerpt fetched from the REST API, where a token raises
//! the rate limit from 60 to 5000 requests per hour.

use super::http::HttpSource;
use super::{AdapterOutput, FetchContext, ParsedPage, SourceAdapter};
use crate::config::{FetchSettings, GithubSettings, SOURCE_GITHUB};
use crate::error::AdapterError;
use crate::models::RawItem;
use crate::utils::{collapse_whitespace, parse_count, truncate_with_ellipsis};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

const TRENDING_URL: &str = "https://github.com/trending?since=daily";
const API_BASE: &str = "https://api.github.com";
const README_CONCURRENCY: usize = 5;
const README_MAX_CHARS: usize = 2000;

pub struct GithubTrending {
    page: HttpSource,
    api: HttpSource,
    trending_url: String,
    api_base: String,
    fetch_readme: bool,
}

impl GithubTrending {
    pub fn new(fetch: &FetchSettings, settings: &GithubSettings) -> Result<Self, AdapterError> {
        let api = HttpSource::new(SOURCE_GITHUB, fetch, settings.token.clone())?;
        if settings.fetch_readme && !api.has_token() {
            warn!("No GitHub token configured; README lookups are limited to 60 per hour");
        }
        Ok(Self {
            page: HttpSource::new(SOURCE_GITHUB, fetch, None)?,
            api,
            trending_url: TRENDING_URL.to_string(),
            api_base: API_BASE.to_string(),
            fetch_readme: settings.fetch_readme,
        })
    }

    pub fn with_endpoints(mut self, trending_url: &str, api_base: &str) -> Self {
        self.trending_url = trending_url.to_string();
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    /// Fill missing descriptions from README excerpts, keeping item order.
    ///
    /// README failures are logged and leave the item unchanged.
    #[instrument(level = "info", skip_all, fields(count = items.len()))]
    async fn enrich_with_readmes(&self, items: Vec<RawItem>) -> Vec<RawItem> {
        let enriched: Vec<RawItem> = stream::iter(items)
            .map(|item| async move {
                if item.has_snippet() {
                    return item;
                }
                let Some(full_name) = item.metadata.get("full_name").cloned() else {
                    return item;
                };
                match self.readme_excerpt(&full_name).await {
                    Ok(Some(excerpt)) => item.with_snippet(Some(excerpt)),
                    Ok(None) => item,
                    Err(e) => {
                        warn!(repo = %full_name, error = %e, "README lookup failed");
                        item
                    }
                }
            })
            .buffered(README_CONCURRENCY)
            .collect()
            .await;

        let filled = enriched.iter().filter(|i| i.has_snippet()).count();
        info!(filled, "README enrichment finished");
        enriched
    }

    async fn readme_excerpt(&self, full_name: &str) -> Result<Option<String>, AdapterError> {
        let url = format!("{}/repos/{}/readme", self.api_base, full_name);
        let readme: ReadmeResponse = self.api.get_json(&url).await?;
        let packed: String = readme.content.split_whitespace().collect();
        let bytes = STANDARD
            .decode(packed.as_bytes())
            .map_err(|e| AdapterError::parse(SOURCE_GITHUB, format!("README base64: {e}")))?;
        let text = String::from_utf8_lossy(&bytes);
        Ok(readme_to_excerpt(&text, README_MAX_CHARS))
    }
}

#[async_trait]
impl SourceAdapter for GithubTrending {
    fn source_id(&self) -> &'static str {
        SOURCE_GITHUB
    }

    #[instrument(level = "info", skip_all, fields(source = SOURCE_GITHUB))]
    async fn fetch(&self, ctx: &FetchContext) -> AdapterOutput {
        let html = match self.page.get_text(&self.trending_url).await {
            Ok(html) => html,
            Err(e) => return AdapterOutput::failed(e),
        };
        let mut page = match parse_trending(&html, ctx.now, ctx.max_items) {
            Ok(page) => page,
            Err(e) => return AdapterOutput::failed(e),
        };
        if self.fetch_readme {
            page.items = self.enrich_with_readmes(page.items).await;
        }
        info!(count = page.items.len(), skipped = page.skipped, "Fetched trending repositories");
        page.into()
    }
}

#[derive(Debug, Deserialize)]
struct ReadmeResponse {
    #[serde(default)]
    content: String,
}

fn selector(css: &str) -> Result<Selector, AdapterError> {
    Selector::parse(css)
        .map_err(|e| AdapterError::parse(SOURCE_GITHUB, format!("selector {css}: {e}")))
}

fn text_of(el: ElementRef<'_>) -> String {
    collapse_whitespace(&el.text().collect::<Vec<_>>().join(" "))
}

/// Parse the trending page into items.
///
/// A page without a single repository row is treated as a parse error since
/// it means the layout changed.
pub fn parse_trending(
    html: &str,
    fetched_at: DateTime<Utc>,
    max_items: usize,
) -> Result<ParsedPage, AdapterError> {
    let document = Html::parse_document(html);
    let row_sel = selector("article.Box-row")?;
    let link_sel = selector("h2 a[href]")?;
    let desc_sel = selector("p")?;
    let lang_sel = selector("span[itemprop='programmingLanguage']")?;
    let stars_sel = selector("a[href$='/stargazers']")?;
    let today_sel = selector("span.float-sm-right")?;

    let mut page = ParsedPage::default();
    let mut rows = 0usize;

    for row in document.select(&row_sel) {
        rows += 1;
        if page.is_full(max_items) {
            break;
        }
        let Some(href) = row
            .select(&link_sel)
            .next()
            .and_then(|a| a.value().attr("href"))
        else {
            page.skip(SOURCE_GITHUB, "repository row without a link");
            continue;
        };
        let full_name = href.trim().trim_matches('/').to_string();
        let Some((owner, _repo)) = full_name.split_once('/') else {
            page.skip(SOURCE_GITHUB, "repository link is not owner/repo");
            continue;
        };

        let description = row.select(&desc_sel).next().map(text_of);
        let language = row.select(&lang_sel).next().map(text_of).unwrap_or_default();
        let stars = row
            .select(&stars_sel)
            .next()
            .and_then(|a| parse_count(&text_of(a)));
        let stars_today = row
            .select(&today_sel)
            .next()
            .and_then(|s| parse_count(&text_of(s)))
            .map(|n| format!("{n}"))
            .unwrap_or_default();

        let item = RawItem::new(
            SOURCE_GITHUB,
            full_name.clone(),
            format!("https://github.com/{full_name}"),
            fetched_at,
        )
        .with_snippet(description)
        .with_score(stars)
        .with_meta("full_name", full_name.as_str())
        .with_meta("author", owner)
        .with_meta("language", language)
        .with_meta("stars_today", stars_today);

        debug!(repo = %full_name, "Parsed trending repository");
        page.items.push(item);
    }

    if rows == 0 {
        return Err(AdapterError::parse(
            SOURCE_GITHUB,
            "no repository rows found on trending page",
        ));
    }
    Ok(page)
}

static MD_IMAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[[^\]]*\]\([^)]*\)").expect("valid regex"));
static MD_LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").expect("valid regex"));
static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("valid regex"));
static MD_MARKUP: Lazy<Regex> = Lazy::new(|| Regex::new(r"[#*_`>|]+").expect("valid regex"));

/// Reduce README markdown to a short plain-text excerpt.
pub fn readme_to_excerpt(markdown: &str, max_chars: usize) -> Option<String> {
    let text = MD_IMAGE.replace_all(markdown, " ");
    let text = MD_LINK.replace_all(&text, "$1");
    let text = HTML_TAG.replace_all(&text, " ");
    let text = MD_MARKUP.replace_all(&text, " ");
    let text = collapse_whitespace(&text);
    if text.is_empty() {
        None
    } else {
        Some(truncate_with_ellipsis(&text, max_chars))
    }
}
