//! Source adapters mapping external technology-news listings into [`RawItem`]s.
//!
//! Every adapter implements the [`SourceAdapter`] capability and composes the
//! shared [`http::HttpSource`] for timeouts, retries and auth. Parsing lives in
//! pure functions so fixtures can be tested without a network.
//!
//! # Supported Sources
//!
//! | Source | Module | Method | Score |
//! |--------|--------|--------|-------|
//! | GitHub Trending | [`github`] | HTML scraping, optional README via REST API | total stars |
//! | Hugging Face | [`huggingface`] | Models JSON API, trending sort | likes |
//! | arXiv | [`arxiv`] | Atom export API (cs.AI, cs.LG, cs.CL) | none |
//! | Papers with Code | [`papers_with_code`] | Papers JSON API | none |
//! | Towards Data Science | [`towards_data_science`] | RSS feed | none |

pub mod arxiv;
pub mod github;
pub mod http;
pub mod huggingface;
pub mod papers_with_code;
pub mod towards_data_science;

use crate::config::{
    PipelineConfig, SOURCE_ARXIV, SOURCE_GITHUB, SOURCE_HUGGINGFACE, SOURCE_PAPERS_WITH_CODE,
    SOURCE_TOWARDS_DATA_SCIENCE,
};
use crate::error::AdapterError;
use crate::models::RawItem;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::{error, warn};

/// Per-run inputs handed to every adapter.
#[derive(Debug, Clone, Copy)]
pub struct FetchContext {
    /// Timestamp stamped on every item as `fetched_at`.
    pub now: DateTime<Utc>,
    pub max_items: usize,
}

/// Result of one adapter call: whatever was parsed, plus the error if the
/// source failed. A failed source may still carry partial items.
#[derive(Debug, Default)]
pub struct AdapterOutput {
    pub items: Vec<RawItem>,
    /// Entries dropped because they were malformed.
    pub skipped: usize,
    pub error: Option<AdapterError>,
}

impl AdapterOutput {
    pub fn failed(error: AdapterError) -> Self {
        Self {
            items: Vec::new(),
            skipped: 0,
            error: Some(error),
        }
    }
}

/// Items parsed out of one response body.
#[derive(Debug, Default)]
pub struct ParsedPage {
    pub items: Vec<RawItem>,
    pub skipped: usize,
}

impl ParsedPage {
    /// Record a malformed entry.
    pub(crate) fn skip(&mut self, source_id: &str, reason: &str) {
        warn!(source = source_id, reason, "Skipping malformed entry");
        self.skipped += 1;
    }

    pub(crate) fn is_full(&self, max: usize) -> bool {
        self.items.len() >= max
    }
}

impl From<ParsedPage> for AdapterOutput {
    fn from(page: ParsedPage) -> Self {
        Self {
            items: page.items,
            skipped: page.skipped,
            error: None,
        }
    }
}

impl From<Result<ParsedPage, AdapterError>> for AdapterOutput {
    fn from(result: Result<ParsedPage, AdapterError>) -> Self {
        match result {
            Ok(page) => page.into(),
            Err(e) => AdapterOutput::failed(e),
        }
    }
}

/// The fetch capability shared by all sources.
///
/// Implementations never panic or block indefinitely; failures come back in
/// [`AdapterOutput::error`].
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_id(&self) -> &'static str;

    async fn fetch(&self, ctx: &FetchContext) -> AdapterOutput;
}

/// Stand-in for an adapter whose HTTP client could not be built; it reports
/// the construction error on every fetch so the source still shows up in stats.
struct Unavailable {
    source_id: &'static str,
    error: AdapterError,
}

#[async_trait]
impl SourceAdapter for Unavailable {
    fn source_id(&self) -> &'static str {
        self.source_id
    }

    async fn fetch(&self, _ctx: &FetchContext) -> AdapterOutput {
        AdapterOutput::failed(self.error.clone())
    }
}

fn build_one(
    id: &'static str,
    config: &PipelineConfig,
) -> Result<Box<dyn SourceAdapter>, AdapterError> {
    let fetch = &config.fetch;
    let adapter: Box<dyn SourceAdapter> = match id {
        SOURCE_GITHUB => Box::new(github::GithubTrending::new(fetch, &config.github)?),
        SOURCE_HUGGINGFACE => Box::new(huggingface::HuggingFaceTrending::new(
            fetch,
            &config.huggingface,
        )?),
        SOURCE_ARXIV => Box::new(arxiv::ArxivRecent::new(fetch)?),
        SOURCE_PAPERS_WITH_CODE => Box::new(papers_with_code::PapersWithCode::new(fetch)?),
        SOURCE_TOWARDS_DATA_SCIENCE => {
            Box::new(towards_data_science::TowardsDataScience::new(fetch)?)
        }
        other => {
            return Err(AdapterError::Client {
                source_id: other.to_string(),
                message: "no adapter registered".to_string(),
            });
        }
    };
    Ok(adapter)
}

/// Instantiate the adapters enabled in `config`, in configuration order.
///
/// Unknown ids are logged and ignored; duplicates are collapsed.
pub fn build_adapters(config: &PipelineConfig) -> Vec<Box<dyn SourceAdapter>> {
    let mut seen = HashSet::new();
    let mut adapters: Vec<Box<dyn SourceAdapter>> = Vec::new();

    for wanted in &config.sources.enabled {
        let Some(id) = crate::config::ALL_SOURCES
            .into_iter()
            .find(|id| id.eq_ignore_ascii_case(wanted.trim()))
        else {
            warn!(source = %wanted, "Unknown source id in configuration; ignoring");
            continue;
        };
        if !seen.insert(id) {
            continue;
        }
        match build_one(id, config) {
            Ok(adapter) => adapters.push(adapter),
            Err(e) => {
                error!(source = id, error = %e, "Could not build source adapter");
                adapters.push(Box::new(Unavailable { source_id: id, error: e }));
            }
        }
    }
    adapters
}
