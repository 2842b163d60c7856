//! arXiv listing for the AI categories via the Atom export API.
//!
//! Queries `cs.AI`, `cs.LG` and `cs.CL`, newest submissions first. The abstract
//! becomes the snippet and the first authors are kept as metadata.

use super::http::HttpSource;
use super::{AdapterOutput, FetchContext, ParsedPage, SourceAdapter};
use crate::config::{FetchSettings, SOURCE_ARXIV};
use crate::error::AdapterError;
use crate::models::RawItem;
use crate::utils::collapse_whitespace;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quick_xml::de::from_str;
use serde::Deserialize;
use tracing::{info, instrument};
use url::Url;

const QUERY_URL: &str = "http://export.arxiv.org/api/query";
const CATEGORIES: &str = "cat:cs.AI OR cat:cs.LG OR cat:cs.CL";
const MAX_LISTED_AUTHORS: usize = 3;

pub struct ArxivRecent {
    http: HttpSource,
    endpoint: String,
}

impl ArxivRecent {
    pub fn new(fetch: &FetchSettings) -> Result<Self, AdapterError> {
        Ok(Self {
            http: HttpSource::new(SOURCE_ARXIV, fetch, None)?,
            endpoint: QUERY_URL.to_string(),
        })
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }

    fn request_url(&self, limit: usize) -> Result<Url, AdapterError> {
        let limit = limit.to_string();
        Url::parse_with_params(
            &self.endpoint,
            [
                ("search_query", CATEGORIES),
                ("sortBy", "submittedDate"),
                ("sortOrder", "descending"),
                ("start", "0"),
                ("max_results", limit.as_str()),
            ],
        )
        .map_err(|e| AdapterError::Client {
            source_id: SOURCE_ARXIV.to_string(),
            message: format!("bad endpoint {}: {e}", self.endpoint),
        })
    }
}

#[async_trait]
impl SourceAdapter for ArxivRecent {
    fn source_id(&self) -> &'static str {
        SOURCE_ARXIV
    }

    #[instrument(level = "info", skip_all, fields(source = SOURCE_ARXIV))]
    async fn fetch(&self, ctx: &FetchContext) -> AdapterOutput {
        let result = async {
            let url = self.request_url(ctx.max_items)?;
            let xml = self.http.get_text(url.as_str()).await?;
            parse_feed(&xml, ctx.now, ctx.max_items)
        }
        .await;
        if let Ok(page) = &result {
            info!(count = page.items.len(), skipped = page.skipped, "Fetched arXiv entries");
        }
        result.into()
    }
}

#[derive(Debug, Deserialize)]
struct Feed {
    #[serde(rename = "entry", default)]
    entries: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    id: Option<String>,
    title: Option<String>,
    summary: Option<String>,
    published: Option<String>,
    #[serde(rename = "author", default)]
    authors: Vec<Author>,
    #[serde(rename = "link", default)]
    links: Vec<Link>,
}

#[derive(Debug, Deserialize)]
struct Author {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Link {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

impl Entry {
    /// The abstract page link, falling back to the entry id (also a URL).
    fn abs_url(&self) -> Option<String> {
        self.links
            .iter()
            .find(|l| l.rel.as_deref() == Some("alternate"))
            .and_then(|l| l.href.clone())
            .or_else(|| self.id.clone())
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
    }
}

/// Parse an Atom feed from the export API.
pub fn parse_feed(
    xml: &str,
    fetched_at: DateTime<Utc>,
    max_items: usize,
) -> Result<ParsedPage, AdapterError> {
    let feed: Feed =
        from_str(xml).map_err(|e| AdapterError::parse(SOURCE_ARXIV, format!("atom: {e}")))?;

    let mut page = ParsedPage::default();
    for entry in feed.entries {
        if page.is_full(max_items) {
            break;
        }
        let title = entry
            .title
            .as_deref()
            .map(collapse_whitespace)
            .unwrap_or_default();
        if title.is_empty() {
            page.skip(SOURCE_ARXIV, "entry without title");
            continue;
        }
        let Some(url) = entry.abs_url() else {
            page.skip(SOURCE_ARXIV, "entry without link");
            continue;
        };
        let published_at = match entry.published.as_deref().map(str::trim) {
            None => None,
            Some(raw) => match DateTime::parse_from_rfc3339(raw) {
                Ok(dt) => Some(dt.with_timezone(&Utc)),
                Err(_) => {
                    page.skip(SOURCE_ARXIV, "unparsable published date");
                    continue;
                }
            },
        };

        let names: Vec<String> = entry
            .authors
            .iter()
            .filter_map(|a| a.name.as_deref().map(collapse_whitespace))
            .filter(|n| !n.is_empty())
            .collect();
        let mut authors = names
            .iter()
            .take(MAX_LISTED_AUTHORS)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
        if names.len() > MAX_LISTED_AUTHORS {
            authors.push_str(" et al.");
        }

        page.items.push(
            RawItem::new(SOURCE_ARXIV, title, url, fetched_at)
                .with_snippet(entry.summary.as_deref().map(collapse_whitespace))
                .with_published_at(published_at)
                .with_meta("authors", authors),
        );
    }
    Ok(page)
}
