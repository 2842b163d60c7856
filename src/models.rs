//! Data models for fetched items, duplicate clusters and the daily report.
//!
//! This module defines the core data structures used throughout the pipeline:
//! - [`RawItem`]: One listing as produced by a source adapter
//! - [`ItemCluster`]: Items judged to describe the same story, with a canonical pick
//! - [`ReportEntry`]: A summarized and categorized cluster
//! - [`RunReport`]: The ranked output of a single run, plus per-source statistics
//!
//! Items are immutable once created. Clusters are only built by the
//! deduplication stage and entries only by the summarization stage.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// A single listing fetched from one source.
///
/// Every source adapter maps its native format (HTML rows, JSON objects,
/// Atom entries) into this uniform shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawItem {
    /// Identifier of the adapter that produced the item (e.g. `"github"`).
    pub source_id: String,
    /// Headline, repository name, model id or paper title.
    pub title: String,
    /// Canonical link to the item.
    pub url: String,
    /// Publication time when the source exposes one.
    pub published_at: Option<DateTime<Utc>>,
    /// Short description, abstract or README excerpt.
    pub summary_snippet: Option<String>,
    /// Popularity signal (stars, likes) when the source has one.
    pub score: Option<f64>,
    /// When this run fetched the item.
    pub fetched_at: DateTime<Utc>,
    /// Source-specific extras such as `language`, `author` or `stars_today`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl RawItem {
    pub fn new(
        source_id: impl Into<String>,
        title: impl Into<String>,
        url: impl Into<String>,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            title: title.into(),
            url: url.into(),
            published_at: None,
            summary_snippet: None,
            score: None,
            fetched_at,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_snippet(mut self, snippet: Option<String>) -> Self {
        self.summary_snippet = snippet
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        self
    }

    pub fn with_score(mut self, score: Option<f64>) -> Self {
        self.score = score;
        self
    }

    pub fn with_published_at(mut self, published_at: Option<DateTime<Utc>>) -> Self {
        self.published_at = published_at;
        self
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<String>) -> Self {
        let value = value.into();
        if !value.trim().is_empty() {
            self.metadata.insert(key.to_string(), value);
        }
        self
    }

    /// Stable identity of an item inside a run: `source_id:url`.
    pub fn key(&self) -> String {
        format!("{}:{}", self.source_id, self.url)
    }

    /// `true` when the item carries a non-blank snippet.
    pub fn has_snippet(&self) -> bool {
        self.summary_snippet
            .as_deref()
            .is_some_and(|s| !s.trim().is_empty())
    }
}

/// A group of items describing the same underlying story.
///
/// The canonical item is always one of `member_items`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemCluster {
    pub canonical_item: RawItem,
    pub member_items: Vec<RawItem>,
    /// Similarity of each member (keyed by [`RawItem::key`]) to the canonical item.
    pub similarity_scores: BTreeMap<String, f64>,
}

impl ItemCluster {
    pub fn len(&self) -> usize {
        self.member_items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.member_items.is_empty()
    }

    /// Titles of every member except the canonical one, in member order.
    pub fn other_titles(&self) -> Vec<&str> {
        let canonical = self.canonical_item.key();
        self.member_items
            .iter()
            .filter(|m| m.key() != canonical)
            .map(|m| m.title.as_str())
            .collect()
    }

    /// Distinct source ids represented in the cluster, sorted.
    pub fn sources(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self
            .member_items
            .iter()
            .map(|m| m.source_id.as_str())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

/// Fixed topic taxonomy for report entries.
///
/// The declaration order is the ranking priority: projects first, `Other` last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Project,
    Paper,
    Model,
    Article,
    Other,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Project,
        Category::Paper,
        Category::Model,
        Category::Article,
        Category::Other,
    ];

    /// Rank priority, lower sorts first.
    pub fn priority(self) -> u8 {
        match self {
            Category::Project => 0,
            Category::Paper => 1,
            Category::Model => 2,
            Category::Article => 3,
            Category::Other => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Project => "project",
            Category::Paper => "paper",
            Category::Model => "model",
            Category::Article => "article",
            Category::Other => "other",
        }
    }

    /// Map a free-form label from the model onto the enum.
    ///
    /// Matching ignores case, surrounding whitespace/punctuation and a plural `s`.
    /// Anything unrecognized becomes [`Category::Other`].
    pub fn from_label(label: &str) -> Self {
        let cleaned = label
            .trim()
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        let singular = cleaned.strip_suffix('s').unwrap_or(&cleaned);
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == cleaned || c.as_str() == singular)
            .unwrap_or(Category::Other)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which path produced an entry's summary and category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneratedBy {
    Ai,
    Fallback,
}

/// One summarized, categorized cluster in the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub cluster: ItemCluster,
    /// One to three sentences, capped in length.
    pub summary: String,
    pub category: Category,
    pub generated_by: GeneratedBy,
    /// `true` when the canonical URL was not part of the previous run's report.
    #[serde(default)]
    pub is_new: bool,
}

/// Per-source outcome of the fetch stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStats {
    pub fetched_count: usize,
    pub error: Option<String>,
}

/// The output of one pipeline run.
///
/// Produced once per run by the orchestrator and handed to the caller; the
/// rendering and persistence layers only read it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Local calendar date of the run.
    pub date: NaiveDate,
    pub generated_at: DateTime<Utc>,
    /// Ranked entries.
    pub entries: Vec<ReportEntry>,
    pub source_stats: BTreeMap<String, SourceStats>,
    /// A source failed or at least one entry used the fallback summary.
    pub degraded: bool,
    /// At least one comparator batch failed and deduplication fell back to fingerprints.
    #[serde(default)]
    pub dedup_fallback: bool,
    /// Items fetched before deduplication.
    #[serde(default)]
    pub total_items: usize,
}

impl RunReport {
    /// The degraded rule: any source error or any fallback entry.
    pub fn is_degraded(
        source_stats: &BTreeMap<String, SourceStats>,
        entries: &[ReportEntry],
    ) -> bool {
        source_stats.values().any(|s| s.error.is_some())
            || entries
                .iter()
                .any(|e| e.generated_by == GeneratedBy::Fallback)
    }

    /// Canonical URLs of every entry, used for delta comparison against the next run.
    pub fn canonical_urls(&self) -> HashSet<&str> {
        self.entries
            .iter()
            .map(|e| e.cluster.canonical_item.url.as_str())
            .collect()
    }

    pub fn failed_sources(&self) -> Vec<&str> {
        self.source_stats
            .iter()
            .filter(|(_, s)| s.error.is_some())
            .map(|(id, _)| id.as_str())
            .collect()
    }
}
