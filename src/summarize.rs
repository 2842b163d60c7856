//! Summarization, categorization and ranking of clusters.
//!
//! Each cluster is summarized independently through a [`SummaryService`].
//! Replies are validated (non-empty summary, length cap, category mapped onto
//! the fixed taxonomy). Any failure, including a per-call timeout, produces a
//! local fallback entry instead.

use crate::api::{AskAsync, Prompt, strip_code_fences};
use crate::error::AiError;
use crate::models::{Category, GeneratedBy, ItemCluster, ReportEntry};
use crate::utils::{looks_truncated, truncate_for_log, truncate_with_ellipsis};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant as Deadline, timeout_at};
use tracing::{debug, info, instrument, warn};

const PROMPT_SNIPPET_CHARS: usize = 1000;
const FALLBACK_TITLE_CHARS: usize = 200;

/// What the summarizer sees for one cluster.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRequest {
    pub title: String,
    pub snippet: Option<String>,
    pub url: String,
    /// Titles of the other members, unique, canonical excluded.
    pub member_titles: Vec<String>,
}

impl SummaryRequest {
    pub fn from_cluster(cluster: &ItemCluster) -> Self {
        let canonical = &cluster.canonical_item;
        Self {
            title: canonical.title.clone(),
            snippet: canonical
                .summary_snippet
                .as_deref()
                .map(|s| truncate_with_ellipsis(s, PROMPT_SNIPPET_CHARS)),
            url: canonical.url.clone(),
            member_titles: cluster
                .other_titles()
                .into_iter()
                .filter(|t| *t != canonical.title)
                .unique()
                .map(str::to_string)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SummaryResponse {
    pub summary: String,
    pub category: String,
}

/// External text-generation contract for one cluster.
#[async_trait]
pub trait SummaryService: Send + Sync {
    async fn summarize(&self, request: &SummaryRequest) -> Result<SummaryResponse, AiError>;
}

const SUMMARY_SYSTEM_PROMPT: &str = "You write a daily AI and technology news digest. \
For the item described in the user message, write a factual summary of one to three sentences \
and choose exactly one category from: project, paper, model, article, other. \
Reply with JSON only: {\"summary\": \"...\", \"category\": \"...\"}";

/// [`SummaryService`] backed by a chat model.
pub struct LlmSummarizer<A> {
    ai: Arc<A>,
}

impl<A: AskAsync> LlmSummarizer<A> {
    pub fn new(ai: Arc<A>) -> Self {
        Self { ai }
    }
}

fn render_user_prompt(request: &SummaryRequest) -> String {
    let mut out = format!("Title: {}\nURL: {}\n", request.title, request.url);
    if let Some(snippet) = &request.snippet {
        out.push_str(&format!("Description: {snippet}\n"));
    }
    if !request.member_titles.is_empty() {
        out.push_str("Also reported as:\n");
        for t in &request.member_titles {
            out.push_str(&format!("- {t}\n"));
        }
    }
    out
}

#[async_trait]
impl<A: AskAsync + 'static> SummaryService for LlmSummarizer<A> {
    async fn summarize(&self, request: &SummaryRequest) -> Result<SummaryResponse, AiError> {
        let prompt = Prompt::new(SUMMARY_SYSTEM_PROMPT, render_user_prompt(request));
        let mut reply = self.ai.ask(&prompt).await?;
        let mut parsed = serde_json::from_str::<SummaryResponse>(strip_code_fences(&reply));

        // A reply cut off by the token limit gets one more chance.
        if let Err(e) = &parsed {
            if looks_truncated(e) {
                warn!(error = %e, "EOF while parsing summary; re-asking once");
                reply = self.ai.ask(&prompt).await?;
                parsed = serde_json::from_str::<SummaryResponse>(strip_code_fences(&reply));
            }
        }

        parsed.map_err(|e| {
            AiError::Malformed(format!(
                "{e}; reply was {}",
                truncate_for_log(&reply, 300)
            ))
        })
    }
}

/// Runs the summarizer over every cluster with bounded concurrency.
pub struct SummaryStage {
    service: Arc<dyn SummaryService>,
    concurrency: usize,
    call_timeout: Duration,
    max_chars: usize,
    use_service: bool,
}

impl SummaryStage {
    pub fn new(
        service: Arc<dyn SummaryService>,
        concurrency: usize,
        call_timeout: Duration,
        max_chars: usize,
    ) -> Self {
        Self {
            service,
            concurrency: concurrency.max(1),
            call_timeout,
            max_chars: max_chars.max(1),
            use_service: true,
        }
    }

    /// With `false`, every cluster gets the local fallback and the service is never called.
    pub fn with_service_enabled(mut self, enabled: bool) -> Self {
        self.use_service = enabled;
        self
    }

    /// Summarize one cluster; never fails.
    #[instrument(level = "debug", skip_all, fields(title = %cluster.canonical_item.title))]
    pub async fn summarize(&self, cluster: ItemCluster, deadline: Deadline) -> ReportEntry {
        if !self.use_service {
            return self.fallback(cluster);
        }
        let request = SummaryRequest::from_cluster(&cluster);
        let call_deadline = (Deadline::now() + self.call_timeout).min(deadline);
        let result = match timeout_at(call_deadline, self.service.summarize(&request)).await {
            Ok(result) => result,
            Err(_) => Err(AiError::Timeout(self.call_timeout)),
        };

        match result.and_then(|r| self.validate(r)) {
            Ok((summary, category)) => {
                debug!(%category, "Summarized cluster");
                ReportEntry {
                    cluster,
                    summary,
                    category,
                    generated_by: GeneratedBy::Ai,
                    is_new: false,
                }
            }
            Err(e) => {
                warn!(error = %e, "Summarization failed; using fallback");
                self.fallback(cluster)
            }
        }
    }

    /// Summarize every cluster. The output keeps the input order.
    #[instrument(level = "info", skip_all, fields(clusters = clusters.len()))]
    pub async fn summarize_all(
        &self,
        clusters: Vec<ItemCluster>,
        deadline: Deadline,
    ) -> Vec<ReportEntry> {
        let mut indexed: Vec<(usize, ReportEntry)> = stream::iter(clusters.into_iter().enumerate())
            .map(|(i, cluster)| async move { (i, self.summarize(cluster, deadline).await) })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        indexed.sort_by_key(|(i, _)| *i);

        let entries: Vec<ReportEntry> = indexed.into_iter().map(|(_, e)| e).collect();
        let fallbacks = entries
            .iter()
            .filter(|e| e.generated_by == GeneratedBy::Fallback)
            .count();
        info!(total = entries.len(), fallbacks, "Summarization stage finished");
        entries
    }

    fn validate(&self, response: SummaryResponse) -> Result<(String, Category), AiError> {
        let summary = response.summary.trim();
        if summary.is_empty() {
            return Err(AiError::Malformed("empty summary".into()));
        }
        Ok((
            truncate_with_ellipsis(summary, self.max_chars),
            Category::from_label(&response.category),
        ))
    }

    /// Local heuristic: truncated title plus snippet, category `other`.
    pub fn fallback(&self, cluster: ItemCluster) -> ReportEntry {
        let canonical = &cluster.canonical_item;
        let title = truncate_with_ellipsis(&canonical.title, FALLBACK_TITLE_CHARS);
        let text = match canonical.summary_snippet.as_deref() {
            Some(snippet) if !snippet.trim().is_empty() => format!("{title}: {}", snippet.trim()),
            _ => title,
        };
        ReportEntry {
            summary: truncate_with_ellipsis(&text, self.max_chars),
            cluster,
            category: Category::Other,
            generated_by: GeneratedBy::Fallback,
            is_new: false,
        }
    }
}

/// Rank order: category priority, then more members, then higher score
/// (missing scores last), then newer fetch, then url and title.
pub fn rank_order(a: &ReportEntry, b: &ReportEntry) -> Ordering {
    let (ca, cb) = (&a.cluster.canonical_item, &b.cluster.canonical_item);
    a.category
        .priority()
        .cmp(&b.category.priority())
        .then_with(|| b.cluster.len().cmp(&a.cluster.len()))
        .then_with(|| match (ca.score, cb.score) {
            (Some(x), Some(y)) => y.total_cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| cb.fetched_at.cmp(&ca.fetched_at))
        .then_with(|| ca.url.cmp(&cb.url))
        .then_with(|| ca.title.cmp(&cb.title))
}

/// Stable sort by [`rank_order`].
pub fn rank_entries(entries: &mut [ReportEntry]) {
    entries.sort_by(rank_order);
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::api::tests::ScriptedAsk;
    use crate::models::RawItem;
    use crate::models::tests::{item, ts};
    use std::collections::BTreeMap;
    use std::sync::atomic::Ordering as AtomicOrdering;

    pub(crate) fn single(item: RawItem) -> ItemCluster {
        ItemCluster {
            canonical_item: item.clone(),
            similarity_scores: BTreeMap::from([(item.key(), 1.0)]),
            member_items: vec![item],
        }
    }

    /// Returns a fixed reply for every request.
    pub(crate) struct FixedSummarizer(pub Result<SummaryResponse, AiError>);

    #[async_trait]
    impl SummaryService for FixedSummarizer {
        async fn summarize(&self, _r: &SummaryRequest) -> Result<SummaryResponse, AiError> {
            self.0.clone()
        }
    }

    /// Sleeps past any reasonable timeout.
    struct StuckSummarizer;

    #[async_trait]
    impl SummaryService for StuckSummarizer {
        async fn summarize(&self, _r: &SummaryRequest) -> Result<SummaryResponse, AiError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(AiError::Unavailable("unreachable".into()))
        }
    }

    fn reply(summary: &str, category: &str) -> Result<SummaryResponse, AiError> {
        Ok(SummaryResponse { summary: summary.into(), category: category.into() })
    }

    fn stage(service: impl SummaryService + 'static) -> SummaryStage {
        SummaryStage::new(Arc::new(service), 4, Duration::from_secs(5), 500)
    }

    fn deadline() -> Deadline {
        Deadline::now() + Duration::from_secs(60)
    }

    fn entry(category: Category, members: usize, score: Option<f64>, url: &str) -> ReportEntry {
        let items: Vec<RawItem> = (0..members)
            .map(|i| item("gh", "t", &format!("{url}#{i}")).with_score(score))
            .collect();
        let mut cluster = single(items[0].clone());
        cluster.member_items = items;
        ReportEntry {
            cluster,
            summary: "s".into(),
            category,
            generated_by: GeneratedBy::Ai,
            is_new: false,
        }
    }

    #[test]
    fn test_request_lists_unique_other_titles() {
        let canonical = item("hf", "Llama 4", "a").with_snippet(Some("x".repeat(3000)));
        let cluster = ItemCluster {
            canonical_item: canonical.clone(),
            member_items: vec![
                canonical,
                item("gh", "llama-4 release", "b"),
                item("tds", "llama-4 release", "c"),
                item("arxiv", "Llama 4", "d"),
            ],
            similarity_scores: BTreeMap::new(),
        };
        let req = SummaryRequest::from_cluster(&cluster);
        assert_eq!(req.member_titles, vec!["llama-4 release"]);
        assert_eq!(req.snippet.unwrap().chars().count(), 1000);
    }

    #[tokio::test]
    async fn test_valid_reply_is_capped_and_categorized() {
        let long = "word ".repeat(200);
        let e = stage(FixedSummarizer(reply(&long, "Papers")))
            .summarize(single(item("arxiv", "X", "u")), deadline())
            .await;
        assert_eq!(e.generated_by, GeneratedBy::Ai);
        assert_eq!(e.category, Category::Paper);
        assert!(e.summary.chars().count() <= 500);
        assert!(e.summary.ends_with('…'));
    }

    #[tokio::test]
    async fn test_unknown_category_maps_to_other() {
        let e = stage(FixedSummarizer(reply("Fine.", "breaking-news")))
            .summarize(single(item("gh", "X", "u")), deadline())
            .await;
        assert_eq!(e.category, Category::Other);
        assert_eq!(e.generated_by, GeneratedBy::Ai);
    }

    #[tokio::test]
    async fn test_service_error_and_empty_summary_fall_back() {
        let it = item("gh", "Llama 4 released", "u").with_snippet(Some("Open weights.".into()));
        let e = stage(FixedSummarizer(Err(AiError::Unavailable("503".into()))))
            .summarize(single(it.clone()), deadline())
            .await;
        assert_eq!(e.generated_by, GeneratedBy::Fallback);
        assert_eq!(e.category, Category::Other);
        assert_eq!(e.summary, "Llama 4 released: Open weights.");

        let e = stage(FixedSummarizer(reply("   ", "model")))
            .summarize(single(it), deadline())
            .await;
        assert_eq!(e.generated_by, GeneratedBy::Fallback);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_falls_back() {
        let e = SummaryStage::new(Arc::new(StuckSummarizer), 2, Duration::from_secs(5), 500)
            .summarize(single(item("gh", "Slow", "u")), deadline())
            .await;
        assert_eq!(e.generated_by, GeneratedBy::Fallback);
        assert_eq!(e.summary, "Slow");
    }

    #[tokio::test]
    async fn test_llm_summarizer_reasks_once_on_truncated_json() {
        let ai = Arc::new(ScriptedAsk::new(vec![
            Ok(r#"{"summary": "Meta released Ll"#.into()),
            Ok("```json\n{\"summary\": \"Meta released Llama 4.\", \"category\": \"model\"}\n```".into()),
        ]));
        let summarizer = LlmSummarizer::new(Arc::clone(&ai));
        let req = SummaryRequest::from_cluster(&single(item("hf", "Llama 4", "u")));
        let r = summarizer.summarize(&req).await.unwrap();
        assert_eq!(r.category, "model");
        assert_eq!(ai.calls.load(AtomicOrdering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_malformed_error_quotes_the_reply_that_failed() {
        let ai = Arc::new(ScriptedAsk::new(vec![
            Ok(r#"{"summary": "first attempt"#.into()),
            Ok(r#"{"summary": "second attempt"#.into()),
        ]));
        let req = SummaryRequest::from_cluster(&single(item("hf", "Llama 4", "u")));
        let err = LlmSummarizer::new(Arc::clone(&ai)).summarize(&req).await.unwrap_err();
        let AiError::Malformed(message) = err else {
            panic!("expected a malformed reply error");
        };
        assert!(message.contains("second attempt"));
        assert!(!message.contains("first attempt"));
        assert_eq!(ai.calls.load(AtomicOrdering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_disabled_service_uses_fallback_without_calling() {
        let ai = Arc::new(ScriptedAsk::new(vec![reply_json()]));
        let e = SummaryStage::new(
            Arc::new(LlmSummarizer::new(Arc::clone(&ai))),
            2,
            Duration::from_secs(5),
            500,
        )
        .with_service_enabled(false)
        .summarize(single(item("gh", "Quiet day", "u")), deadline())
        .await;
        assert_eq!(e.generated_by, GeneratedBy::Fallback);
        assert_eq!(e.summary, "Quiet day");
        assert_eq!(ai.calls.load(AtomicOrdering::SeqCst), 0);
    }

    fn reply_json() -> Result<String, AiError> {
        Ok(r#"{"summary": "Unused.", "category": "article"}"#.into())
    }

    #[tokio::test]
    async fn test_llm_summarizer_rejects_non_json() {
        let ai = Arc::new(ScriptedAsk::new(vec![Ok("I cannot help with that.".into())]));
        let req = SummaryRequest::from_cluster(&single(item("hf", "Llama 4", "u")));
        let err = LlmSummarizer::new(Arc::clone(&ai)).summarize(&req).await.unwrap_err();
        assert!(matches!(err, AiError::Malformed(_)));
        assert_eq!(ai.calls.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_summarize_all_keeps_input_order() {
        let clusters = (0..10)
            .map(|i| single(item("gh", &format!("T{i}"), &format!("u{i}"))))
            .collect();
        let entries = stage(FixedSummarizer(reply("ok", "project")))
            .summarize_all(clusters, deadline())
            .await;
        let titles: Vec<_> = entries
            .iter()
            .map(|e| e.cluster.canonical_item.title.as_str())
            .collect();
        assert_eq!(titles, (0..10).map(|i| format!("T{i}")).collect::<Vec<_>>());
    }

    #[test]
    fn test_rank_order() {
        let mut entries = vec![
            entry(Category::Other, 5, Some(100.0), "o"),
            entry(Category::Paper, 1, None, "p-none"),
            entry(Category::Paper, 1, Some(3.0), "p-3"),
            entry(Category::Project, 1, Some(1.0), "proj-1"),
            entry(Category::Paper, 2, None, "p-two"),
            entry(Category::Project, 3, None, "proj-3"),
        ];
        rank_entries(&mut entries);
        let urls: Vec<_> = entries
            .iter()
            .map(|e| e.cluster.canonical_item.url.trim_end_matches("#0"))
            .collect();
        assert_eq!(urls, vec!["proj-3", "proj-1", "p-two", "p-3", "p-none", "o"]);
    }

    #[test]
    fn test_ranking_is_deterministic_under_permutation() {
        let base = vec![
            entry(Category::Model, 1, Some(2.0), "b"),
            entry(Category::Model, 1, Some(2.0), "a"),
            entry(Category::Article, 1, None, "c"),
            entry(Category::Model, 1, Some(f64::NAN), "d"),
        ];
        let urls = |entries: &[ReportEntry]| -> Vec<String> {
            entries.iter().map(|e| e.cluster.canonical_item.url.clone()).collect()
        };
        let mut first = base.clone();
        rank_entries(&mut first);
        let mut reversed: Vec<_> = base.into_iter().rev().collect();
        rank_entries(&mut reversed);
        assert_eq!(urls(&first), urls(&reversed));
        assert_eq!(urls(&first), vec!["d#0", "a#0", "b#0", "c#0"]);
        let mut again = first.clone();
        rank_entries(&mut again);
        assert_eq!(urls(&again), urls(&first));
    }
}
