//! Papers with Code: newest papers from the public REST API.

use super::http::HttpSource;
use super::{AdapterOutput, FetchContext, ParsedPage, SourceAdapter};
use crate::config::{FetchSettings, SOURCE_PAPERS_WITH_CODE};
use crate::error::AdapterError;
use crate::models::RawItem;
use crate::utils::collapse_whitespace;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, instrument};

const PAPERS_URL: &str = "https://paperswithcode.com/api/v1/papers/";

pub struct PapersWithCode {
    http: HttpSource,
    endpoint: String,
}

impl PapersWithCode {
    pub fn new(fetch: &FetchSettings) -> Result<Self, AdapterError> {
        Ok(Self {
            http: HttpSource::new(SOURCE_PAPERS_WITH_CODE, fetch, None)?,
            endpoint: PAPERS_URL.to_string(),
        })
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }
}

#[async_trait]
impl SourceAdapter for PapersWithCode {
    fn source_id(&self) -> &'static str {
        SOURCE_PAPERS_WITH_CODE
    }

    #[instrument(level = "info", skip_all, fields(source = SOURCE_PAPERS_WITH_CODE))]
    async fn fetch(&self, ctx: &FetchContext) -> AdapterOutput {
        let url = format!(
            "{}?ordering=-published&items_per_page={}",
            self.endpoint, ctx.max_items
        );
        let result = match self.http.get_json::<Value>(&url).await {
            Ok(json) => parse_papers(json, ctx.now, ctx.max_items),
            Err(e) => Err(e),
        };
        if let Ok(page) = &result {
            info!(count = page.items.len(), skipped = page.skipped, "Fetched papers");
        }
        result.into()
    }
}

#[derive(Debug, Deserialize)]
struct Paper {
    id: Option<String>,
    title: Option<String>,
    #[serde(rename = "abstract")]
    summary: Option<String>,
    url_abs: Option<String>,
    published: Option<String>,
    #[serde(default)]
    authors: Vec<String>,
    proceeding: Option<String>,
}

/// Map the `{"results": [...]}` page onto items.
pub fn parse_papers(
    json: Value,
    fetched_at: DateTime<Utc>,
    max_items: usize,
) -> Result<ParsedPage, AdapterError> {
    let Some(results) = json.get("results").and_then(Value::as_array) else {
        return Err(AdapterError::parse(
            SOURCE_PAPERS_WITH_CODE,
            "response has no results array",
        ));
    };

    let mut page = ParsedPage::default();
    for raw in results {
        if page.is_full(max_items) {
            break;
        }
        let paper: Paper = match Paper::deserialize(raw) {
            Ok(p) => p,
            Err(e) => {
                page.skip(SOURCE_PAPERS_WITH_CODE, &e.to_string());
                continue;
            }
        };
        let title = paper
            .title
            .as_deref()
            .map(collapse_whitespace)
            .unwrap_or_default();
        if title.is_empty() {
            page.skip(SOURCE_PAPERS_WITH_CODE, "paper without title");
            continue;
        }
        let url = paper
            .url_abs
            .clone()
            .filter(|u| !u.trim().is_empty())
            .or_else(|| {
                paper
                    .id
                    .as_deref()
                    .map(|id| format!("https://paperswithcode.com/paper/{id}"))
            });
        let Some(url) = url else {
            page.skip(SOURCE_PAPERS_WITH_CODE, "paper without link");
            continue;
        };
        let published_at = match paper.published.as_deref() {
            None => None,
            Some(raw) => match parse_published(raw) {
                Some(dt) => Some(dt),
                None => {
                    page.skip(SOURCE_PAPERS_WITH_CODE, "unparsable published date");
                    continue;
                }
            },
        };

        page.items.push(
            RawItem::new(SOURCE_PAPERS_WITH_CODE, title, url, fetched_at)
                .with_snippet(paper.summary.as_deref().map(collapse_whitespace))
                .with_published_at(published_at)
                .with_meta("authors", paper.authors.join(", "))
                .with_meta("proceeding", paper.proceeding.unwrap_or_default()),
        );
    }
    Ok(page)
}

/// The API reports plain dates (`2025-04-02`); full timestamps are accepted too.
fn parse_published(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}
