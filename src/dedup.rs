//! Cross-source duplicate detection.
//!
//! Clustering runs in three passes over the fetched items:
//!
//! 1. **Fingerprint pre-filter**: titles are lower-cased with punctuation and
//!    whitespace collapsed; identical fingerprints merge without any AI call.
//! 2. **Semantic comparison**: one representative per fingerprint group is sent
//!    to a [`DuplicateJudge`] in batches (sorted by fingerprint so similar
//!    titles tend to share a batch). The judge answers with groups of indices.
//! 3. **Transitive merge**: both kinds of evidence feed one union-find, whose
//!    components become [`ItemCluster`]s.
//!
//! A failed or timed-out batch only loses the semantic merges for its own
//! candidates; fingerprint merges always apply.

use crate::api::{AskAsync, Prompt, strip_code_fences};
use crate::error::AiError;
use crate::models::{ItemCluster, RawItem};
use crate::utils::{truncate_for_log, truncate_with_ellipsis};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant as Deadline, timeout_at};
use tracing::{debug, info, instrument, warn};

static NON_ALNUM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\p{L}\p{N}]+").expect("valid regex"));

const SNIPPET_CHARS_FOR_COMPARISON: usize = 200;

/// Cheap normalized key: lower-case, punctuation and whitespace runs collapsed.
pub fn fingerprint(title: &str) -> String {
    NON_ALNUM
        .replace_all(&title.to_lowercase(), " ")
        .trim()
        .to_string()
}

/// Token Jaccard similarity of two fingerprints.
pub fn jaccard(a: &str, b: &str) -> f64 {
    let ta: HashSet<&str> = a.split_whitespace().collect();
    let tb: HashSet<&str> = b.split_whitespace().collect();
    if ta.is_empty() && tb.is_empty() {
        return 1.0;
    }
    let inter = ta.intersection(&tb).count() as f64;
    let union = ta.union(&tb).count() as f64;
    inter / union
}

/// Ordering where `Less` means "better canonical candidate".
///
/// Snippet first, then the longer title, then earliest fetch, then
/// `source_id`, `url` and `title` ascending so the order is total.
pub fn canonical_order(a: &RawItem, b: &RawItem) -> Ordering {
    b.has_snippet()
        .cmp(&a.has_snippet())
        .then_with(|| b.title.chars().count().cmp(&a.title.chars().count()))
        .then_with(|| a.fetched_at.cmp(&b.fetched_at))
        .then_with(|| a.source_id.cmp(&b.source_id))
        .then_with(|| a.url.cmp(&b.url))
        .then_with(|| a.title.cmp(&b.title))
}

/// Index of the canonical member. Independent of the order of `members`
/// up to identical items. `members` must be non-empty.
pub fn choose_canonical(members: &[RawItem]) -> usize {
    members
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| canonical_order(a, b))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

/// Disjoint-set forest over item positions.
#[derive(Debug, Clone)]
pub struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    pub fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut cur = x;
        while self.parent[cur] != root {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        root
    }

    /// Merge the sets of `a` and `b`; returns `false` if already joined.
    pub fn union(&mut self, a: usize, b: usize) -> bool {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return false;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            Ordering::Less => self.parent[ra] = rb,
            Ordering::Greater => self.parent[rb] = ra,
            Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
        true
    }
}

/// One entry of a comparator request; `index` is local to the batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub index: usize,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

/// Semantic comparator: groups candidate indices that describe the same story.
///
/// Implementations may return fewer or more groups than candidates, unknown or
/// repeated indices; the caller sanitizes the answer.
#[async_trait]
pub trait DuplicateJudge: Send + Sync {
    async fn group(&self, candidates: &[Candidate]) -> Result<Vec<Vec<usize>>, AiError>;
}

const JUDGE_SYSTEM_PROMPT: &str = "You compare technology news listings. \
Given a JSON array of items with an index, a title and sometimes a snippet, find items \
that describe the same underlying story, release, paper or project, even when worded differently. \
Reply with JSON only: {\"groups\": [[i, j, ...], ...]} listing only groups of two or more indices. \
Reply {\"groups\": []} when nothing is duplicated.";

/// [`DuplicateJudge`] backed by a chat model.
pub struct LlmJudge<A> {
    ai: Arc<A>,
}

impl<A: AskAsync> LlmJudge<A> {
    pub fn new(ai: Arc<A>) -> Self {
        Self { ai }
    }
}

#[async_trait]
impl<A: AskAsync + 'static> DuplicateJudge for LlmJudge<A> {
    async fn group(&self, candidates: &[Candidate]) -> Result<Vec<Vec<usize>>, AiError> {
        let payload = serde_json::to_string(candidates)
            .map_err(|e| AiError::Malformed(format!("encoding candidates: {e}")))?;
        let prompt = Prompt::new(JUDGE_SYSTEM_PROMPT, payload);
        let reply = self.ai.ask(&prompt).await?;
        parse_groups(&reply, candidates.len())
    }
}

/// Decode a comparator reply into index groups.
///
/// Accepts a bare array of arrays or `{"groups": [...]}`, optionally inside a
/// code fence. Indices outside `0..n` and non-integer entries are dropped;
/// groups left with fewer than two distinct indices are discarded.
pub fn parse_groups(reply: &str, n: usize) -> Result<Vec<Vec<usize>>, AiError> {
    let body = strip_code_fences(reply);
    let value: Value = serde_json::from_str(body).map_err(|e| {
        AiError::Malformed(format!("{e}: {}", truncate_for_log(body, 200)))
    })?;
    let groups = match &value {
        Value::Array(groups) => groups,
        Value::Object(map) => match map.get("groups") {
            Some(Value::Array(groups)) => groups,
            _ => return Err(AiError::Malformed("object without a groups array".into())),
        },
        _ => return Err(AiError::Malformed("expected an array of groups".into())),
    };

    Ok(groups
        .iter()
        .filter_map(Value::as_array)
        .map(|g| {
            g.iter()
                .filter_map(Value::as_u64)
                .map(|i| i as usize)
                .filter(|&i| i < n)
                .collect::<BTreeSet<_>>()
        })
        .filter(|g| g.len() >= 2)
        .map(|g| g.into_iter().collect())
        .collect())
}

/// Result of the dedup stage.
#[derive(Debug)]
pub struct DedupOutcome {
    pub clusters: Vec<ItemCluster>,
    /// At least one comparator batch failed or timed out.
    pub ai_fallback: bool,
}

pub struct Deduplicator {
    judge: Arc<dyn DuplicateJudge>,
    batch_size: usize,
    concurrency: usize,
    call_timeout: Duration,
    use_judge: bool,
}

impl Deduplicator {
    pub fn new(
        judge: Arc<dyn DuplicateJudge>,
        batch_size: usize,
        concurrency: usize,
        call_timeout: Duration,
    ) -> Self {
        Self {
            judge,
            // A batch needs two candidates to compare anything.
            batch_size: batch_size.max(2),
            concurrency: concurrency.max(1),
            call_timeout,
            use_judge: true,
        }
    }

    /// With `false`, only fingerprint matches merge and the judge is never called.
    pub fn with_judge_enabled(mut self, enabled: bool) -> Self {
        self.use_judge = enabled;
        self
    }

    /// Partition `items` into clusters. Every item lands in exactly one cluster.
    #[instrument(level = "info", skip_all, fields(items = items.len()))]
    pub async fn cluster(&self, items: Vec<RawItem>, deadline: Deadline) -> DedupOutcome {
        let n = items.len();
        let fingerprints: Vec<String> = items.iter().map(|i| fingerprint(&i.title)).collect();
        let mut uf = UnionFind::new(n);

        // Pass 1: identical fingerprints.
        let mut by_fp: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (i, fp) in fingerprints.iter().enumerate() {
            by_fp.entry(fp.as_str()).or_default().push(i);
        }
        for group in by_fp.values() {
            for &other in &group[1..] {
                uf.union(group[0], other);
            }
        }

        // Pass 2: one representative per fingerprint group, in fingerprint order.
        let representatives: Vec<usize> = by_fp
            .values()
            .map(|group| {
                let members: Vec<RawItem> = group.iter().map(|&i| items[i].clone()).collect();
                group[choose_canonical(&members)]
            })
            .collect();

        let batches: Vec<&[usize]> = if self.use_judge {
            representatives
                .chunks(self.batch_size)
                .filter(|b| b.len() >= 2)
                .collect()
        } else {
            debug!("Comparator disabled; fingerprint matches only");
            Vec::new()
        };
        let batch_count = batches.len();

        let results: Vec<(&[usize], Result<Vec<Vec<usize>>, AiError>)> = stream::iter(batches)
            .map(|batch| {
                let judge = Arc::clone(&self.judge);
                let candidates: Vec<Candidate> = batch
                    .iter()
                    .enumerate()
                    .map(|(local, &i)| Candidate {
                        index: local,
                        title: items[i].title.clone(),
                        snippet: items[i]
                            .summary_snippet
                            .as_deref()
                            .map(|s| truncate_with_ellipsis(s, SNIPPET_CHARS_FOR_COMPARISON)),
                    })
                    .collect();
                let call_deadline = (Deadline::now() + self.call_timeout).min(deadline);
                let call_timeout = self.call_timeout;
                async move {
                    let res = match timeout_at(call_deadline, judge.group(&candidates)).await {
                        Ok(res) => res,
                        Err(_) => Err(AiError::Timeout(call_timeout)),
                    };
                    (batch, res)
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut ai_fallback = false;
        let mut ai_merges = 0usize;
        for (batch, res) in results {
            match res {
                Ok(groups) => {
                    for group in groups {
                        // Unknown local indices are dropped, repeats collapse.
                        let members: BTreeSet<usize> =
                            group.iter().filter_map(|&local| batch.get(local).copied()).collect();
                        let members: Vec<usize> = members.into_iter().collect();
                        for pair in members.windows(2) {
                            if uf.union(pair[0], pair[1]) {
                                ai_merges += 1;
                            }
                        }
                    }
                }
                Err(e) => {
                    ai_fallback = true;
                    warn!(batch_size = batch.len(), error = %e, "Comparator batch failed; keeping fingerprint clusters");
                }
            }
        }

        // Pass 3: components become clusters, ordered by first member.
        let mut components: Vec<Vec<usize>> = Vec::new();
        let mut slot_of_root: BTreeMap<usize, usize> = BTreeMap::new();
        for i in 0..n {
            let root = uf.find(i);
            let slot = *slot_of_root.entry(root).or_insert_with(|| {
                components.push(Vec::new());
                components.len() - 1
            });
            components[slot].push(i);
        }

        let mut pool: Vec<Option<RawItem>> = items.into_iter().map(Some).collect();
        let clusters: Vec<ItemCluster> = components
            .into_iter()
            .map(|indices| {
                let members: Vec<RawItem> =
                    indices.iter().filter_map(|&i| pool[i].take()).collect();
                let fps: Vec<&str> = indices.iter().map(|&i| fingerprints[i].as_str()).collect();
                build_cluster(members, &fps)
            })
            .collect();

        info!(
            fingerprint_groups = representatives.len(),
            batches = batch_count,
            ai_merges,
            clusters = clusters.len(),
            ai_fallback,
            "Deduplication finished"
        );
        DedupOutcome {
            clusters,
            ai_fallback,
        }
    }
}

fn build_cluster(members: Vec<RawItem>, fingerprints: &[&str]) -> ItemCluster {
    let canonical = choose_canonical(&members);
    let canonical_fp = fingerprints[canonical];
    let similarity_scores = members
        .iter()
        .zip(fingerprints)
        .map(|(m, fp)| {
            let score = if *fp == canonical_fp {
                1.0
            } else {
                jaccard(fp, canonical_fp)
            };
            (m.key(), score)
        })
        .collect();
    debug!(size = members.len(), canonical = %members[canonical].title, "Cluster formed");
    ItemCluster {
        canonical_item: members[canonical].clone(),
        member_items: members,
        similarity_scores,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::api::tests::ScriptedAsk;
    use crate::models::tests::{item, ts};
    use itertools::Itertools;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    /// Groups every candidate whose title contains the keyword.
    pub(crate) struct KeywordJudge(pub &'static str);

    #[async_trait]
    impl DuplicateJudge for KeywordJudge {
        async fn group(&self, candidates: &[Candidate]) -> Result<Vec<Vec<usize>>, AiError> {
            Ok(vec![
                candidates
                    .iter()
                    .filter(|c| c.title.to_lowercase().contains(self.0))
                    .map(|c| c.index)
                    .collect(),
            ])
        }
    }

    /// Always unavailable; counts calls.
    #[derive(Default)]
    pub(crate) struct DownJudge {
        pub calls: AtomicUsize,
    }

    #[async_trait]
    impl DuplicateJudge for DownJudge {
        async fn group(&self, _candidates: &[Candidate]) -> Result<Vec<Vec<usize>>, AiError> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            Err(AiError::Unavailable("down".into()))
        }
    }

    fn dedup(judge: Arc<dyn DuplicateJudge>, batch_size: usize) -> Deduplicator {
        Deduplicator::new(judge, batch_size, 4, Duration::from_secs(5))
    }

    fn deadline() -> Deadline {
        Deadline::now() + Duration::from_secs(30)
    }

    fn scenario() -> Vec<RawItem> {
        vec![
            item("gh", "Llama 4 released", "https://gh/llama4"),
            item("hf", "llama-4 release announced", "https://hf/llama4")
                .with_snippet(Some("Meta ships Llama 4".into())),
            item("arxiv", "Unrelated paper X", "https://arxiv/x"),
        ]
    }

    #[test]
    fn test_fingerprint_normalization() {
        assert_eq!(fingerprint("  Llama-4:  Released!! "), "llama 4 released");
        assert_eq!(fingerprint("GPT‑5 — what's new?"), "gpt 5 what s new");
        assert_eq!(fingerprint("模型 发布"), "模型 发布");
        assert_eq!(fingerprint("!!!"), "");
    }

    #[test]
    fn test_jaccard() {
        assert_eq!(jaccard("a b c", "a b c"), 1.0);
        assert_eq!(jaccard("a b", "c d"), 0.0);
        assert!((jaccard("llama 4 released", "llama 4 release announced") - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_union_find() {
        let mut uf = UnionFind::new(5);
        assert!(uf.union(0, 1));
        assert!(uf.union(3, 4));
        assert!(uf.union(1, 4));
        assert!(!uf.union(0, 3));
        assert_eq!(uf.find(0), uf.find(4));
        assert_ne!(uf.find(2), uf.find(0));
    }

    #[test]
    fn test_canonical_choice_is_permutation_invariant() {
        let base = vec![
            item("hf", "Llama 4", "u1"),
            item("gh", "Llama 4 is here", "u2"),
            RawItem::new("arxiv", "Llama 4", "u3", ts(-5)),
            item("aa", "Llama 4 is here", "u4"),
        ];
        let expected = base[choose_canonical(&base)].clone();
        assert_eq!(expected.url, "u4");
        for perm in base.iter().cloned().permutations(base.len()) {
            assert_eq!(perm[choose_canonical(&perm)], expected);
        }

        let with_snippet = item("zz", "x", "u5").with_snippet(Some("text".into()));
        let mut members = base.clone();
        members.push(with_snippet.clone());
        assert_eq!(members[choose_canonical(&members)], with_snippet);
    }

    #[test]
    fn test_parse_groups_variants() {
        assert_eq!(parse_groups("[[0,1],[2]]", 3).unwrap(), vec![vec![0, 1]]);
        assert_eq!(
            parse_groups("```json\n{\"groups\": [[2, 0, 2, 9, \"x\"]]}\n```", 3).unwrap(),
            vec![vec![0, 2]]
        );
        assert!(parse_groups("{\"groups\": []}", 3).unwrap().is_empty());
        assert!(matches!(parse_groups("sure! here", 3), Err(AiError::Malformed(_))));
        assert!(matches!(parse_groups("{\"dupes\": 1}", 3), Err(AiError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_llm_judge_round_trip() {
        let ai = Arc::new(ScriptedAsk::new(vec![Ok("{\"groups\": [[0, 1]]}".into())]));
        let judge = LlmJudge::new(Arc::clone(&ai));
        let cands = vec![
            Candidate { index: 0, title: "a".into(), snippet: None },
            Candidate { index: 1, title: "b".into(), snippet: Some("s".into()) },
        ];
        assert_eq!(judge.group(&cands).await.unwrap(), vec![vec![0, 1]]);
        assert_eq!(ai.calls.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_semantic_duplicates_merge() {
        let out = dedup(Arc::new(KeywordJudge("llama")), 20)
            .cluster(scenario(), deadline())
            .await;
        assert!(!out.ai_fallback);
        assert_eq!(out.clusters.len(), 2);

        let llama = out.clusters.iter().find(|c| c.len() == 2).unwrap();
        assert_eq!(llama.canonical_item.source_id, "hf");
        assert_eq!(llama.similarity_scores["hf:https://hf/llama4"], 1.0);
        assert!(llama.similarity_scores["gh:https://gh/llama4"] < 1.0);
        assert!(out.clusters.iter().any(|c| c.len() == 1 && c.canonical_item.source_id == "arxiv"));
    }

    #[tokio::test]
    async fn test_comparator_down_falls_back_to_fingerprints() {
        let mut items = scenario();
        items.push(item("tds", "LLAMA 4 -- Released", "https://tds/llama"));
        let judge = Arc::new(DownJudge::default());
        let out = dedup(judge.clone(), 20).cluster(items, deadline()).await;

        assert!(out.ai_fallback);
        assert_eq!(judge.calls.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(out.clusters.len(), 3);
        let merged = out.clusters.iter().find(|c| c.len() == 2).unwrap();
        assert_eq!(merged.sources(), vec!["gh", "tds"]);
        assert!(merged.similarity_scores.values().all(|s| *s == 1.0));
    }

    #[tokio::test]
    async fn test_every_item_in_exactly_one_cluster() {
        let titles = [
            "Llama 4 released", "llama 4 released", "Mistral Small 3", "mistral-small-3",
            "Diffusion survey", "Llama four", "RAG in practice", "rag in practice!",
        ];
        let items: Vec<RawItem> = titles
            .iter()
            .enumerate()
            .map(|(i, t)| item(["gh", "hf", "arxiv"][i % 3], t, &format!("u{i}")))
            .collect();
        let keys: BTreeSet<String> = items.iter().map(RawItem::key).collect();

        let out = dedup(Arc::new(KeywordJudge("llama")), 3)
            .cluster(items, deadline())
            .await;
        let mut seen = Vec::new();
        for c in &out.clusters {
            assert!(c.member_items.contains(&c.canonical_item));
            seen.extend(c.member_items.iter().map(RawItem::key));
        }
        assert_eq!(seen.len(), keys.len());
        assert_eq!(seen.into_iter().collect::<BTreeSet<_>>(), keys);
    }

    #[tokio::test]
    async fn test_single_representative_skips_comparator() {
        let judge = Arc::new(DownJudge::default());
        let items = vec![item("gh", "Same", "a"), item("hf", "same!", "b")];
        let out = dedup(judge.clone(), 20).cluster(items, deadline()).await;
        assert_eq!(out.clusters.len(), 1);
        assert!(!out.ai_fallback);
        assert_eq!(judge.calls.load(AtomicOrdering::SeqCst), 0);
    }

    /// Returns whatever indices it was built with, valid or not.
    struct FixedGroupsJudge(Vec<Vec<usize>>);

    #[async_trait]
    impl DuplicateJudge for FixedGroupsJudge {
        async fn group(&self, _candidates: &[Candidate]) -> Result<Vec<Vec<usize>>, AiError> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_out_of_range_and_repeated_indices_are_ignored() {
        let items = vec![item("gh", "Alpha", "a"), item("hf", "Beta", "b")];
        let out = dedup(Arc::new(FixedGroupsJudge(vec![vec![0, 7], vec![1, 1]])), 20)
            .cluster(items.clone(), deadline())
            .await;
        assert!(!out.ai_fallback);
        assert_eq!(out.clusters.len(), 2);

        let out = dedup(Arc::new(FixedGroupsJudge(vec![vec![1, 9, 0, 1]])), 20)
            .cluster(items, deadline())
            .await;
        assert_eq!(out.clusters.len(), 1);
        assert_eq!(out.clusters[0].len(), 2);
    }

    #[tokio::test]
    async fn test_batch_size_one_still_reaches_comparator() {
        let out = dedup(Arc::new(KeywordJudge("llama")), 1)
            .cluster(scenario(), deadline())
            .await;
        assert_eq!(out.clusters.len(), 2);
    }

    #[tokio::test]
    async fn test_disabled_judge_is_never_called() {
        let mut items = scenario();
        items.push(item("tds", "LLAMA 4 -- Released", "https://tds/llama"));
        let judge = Arc::new(DownJudge::default());
        let out = dedup(judge.clone(), 20)
            .with_judge_enabled(false)
            .cluster(items, deadline())
            .await;

        assert_eq!(judge.calls.load(AtomicOrdering::SeqCst), 0);
        assert!(!out.ai_fallback);
        assert_eq!(out.clusters.len(), 3);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let out = dedup(Arc::new(DownJudge::default()), 20)
            .cluster(Vec::new(), deadline())
            .await;
        assert!(out.clusters.is_empty());
        assert!(!out.ai_fallback);
    }
}
