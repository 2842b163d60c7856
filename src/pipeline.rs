//! Pipeline orchestration.
//!
//! An [`Orchestrator`] is built per run and walks the stages strictly in
//! sequence:
//!
//! ```text
//! Idle → Fetching → Deduplicating → Summarizing → Assembling → Done
//!           └────────────────────────────────────────────→ Failed
//! ```
//!
//! `Failed` is reached only when the fetch stage produced no items at all.
//! Every other failure degrades the report but still ends in `Done`.

use crate::api::AiBackend;
use crate::config::PipelineConfig;
use crate::dedup::{Deduplicator, DuplicateJudge, LlmJudge};
use crate::error::PipelineError;
use crate::fetch::fetch_all;
use crate::models::RunReport;
use crate::sources::{FetchContext, SourceAdapter, build_adapters};
use crate::summarize::{LlmSummarizer, SummaryService, SummaryStage, rank_entries};
use chrono::{Local, Utc};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::Instant as Deadline;
use tracing::{error, info, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Idle,
    Fetching,
    Deduplicating,
    Summarizing,
    Assembling,
    Done,
    Failed,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

pub struct Orchestrator {
    config: PipelineConfig,
    adapters: Vec<Box<dyn SourceAdapter>>,
    dedup: Deduplicator,
    summaries: SummaryStage,
    stage: PipelineStage,
}

impl Orchestrator {
    pub fn new(
        config: PipelineConfig,
        adapters: Vec<Box<dyn SourceAdapter>>,
        judge: Arc<dyn DuplicateJudge>,
        summarizer: Arc<dyn SummaryService>,
    ) -> Self {
        let dedup = Deduplicator::new(
            judge,
            config.dedup.batch_size,
            config.ai.concurrency,
            config.ai.timeout(),
        )
        .with_judge_enabled(config.dedup.ai_enabled);
        let summaries = SummaryStage::new(
            summarizer,
            config.ai.concurrency,
            config.ai.timeout(),
            config.summary.max_chars,
        )
        .with_service_enabled(config.summary.ai_enabled);
        Self {
            config,
            adapters,
            dedup,
            summaries,
            stage: PipelineStage::Idle,
        }
    }

    /// Wire the real adapters and the configured AI backend.
    pub fn from_config(config: PipelineConfig) -> Self {
        let config = config.sanitized();
        let adapters = build_adapters(&config);
        let ai = Arc::new(AiBackend::from_settings(&config.ai));
        let judge = Arc::new(LlmJudge::new(Arc::clone(&ai)));
        let summarizer = Arc::new(LlmSummarizer::new(ai));
        Self::new(config, adapters, judge, summarizer)
    }

    pub fn stage(&self) -> PipelineStage {
        self.stage
    }

    fn enter(&mut self, next: PipelineStage) {
        info!(from = %self.stage, to = %next, "Pipeline stage transition");
        self.stage = next;
    }

    /// Execute one run. `previous` is only read, for `is_new` marking.
    #[instrument(level = "info", skip_all, fields(adapters = self.adapters.len()))]
    pub async fn run(&mut self, previous: Option<&RunReport>) -> Result<RunReport, PipelineError> {
        let t0 = Instant::now();
        let deadline = Deadline::now() + self.config.run_deadline();
        let generated_at = Utc::now();
        let ctx = FetchContext {
            now: generated_at,
            max_items: self.config.fetch.max_items_per_source,
        };

        self.enter(PipelineStage::Fetching);
        let fetched = fetch_all(&self.adapters, &ctx, deadline, self.config.fetch.concurrency).await;
        if fetched.items.is_empty() {
            self.enter(PipelineStage::Failed);
            let err = PipelineError::TotalFetchFailure {
                diagnostics: fetched.stats,
            };
            error!(error = %err, "No items fetched; run failed");
            return Err(err);
        }
        let total_items = fetched.total_items();
        let source_stats = fetched.stats;

        self.enter(PipelineStage::Deduplicating);
        let outcome = self.dedup.cluster(fetched.items, deadline).await;

        self.enter(PipelineStage::Summarizing);
        let mut entries = self.summaries.summarize_all(outcome.clusters, deadline).await;

        self.enter(PipelineStage::Assembling);
        let seen: HashSet<&str> = previous.map(RunReport::canonical_urls).unwrap_or_default();
        for entry in &mut entries {
            entry.is_new = !seen.contains(entry.cluster.canonical_item.url.as_str());
        }
        rank_entries(&mut entries);

        let report = RunReport {
            date: Local::now().date_naive(),
            generated_at,
            degraded: RunReport::is_degraded(&source_stats, &entries),
            dedup_fallback: outcome.ai_fallback,
            total_items,
            entries,
            source_stats,
        };

        self.enter(PipelineStage::Done);
        info!(
            entries = report.entries.len(),
            total_items,
            degraded = report.degraded,
            dedup_fallback = report.dedup_fallback,
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Pipeline run finished"
        );
        Ok(report)
    }
}

/// Single entry point for the scheduler: build an orchestrator from `config`
/// and run it once.
pub async fn run_pipeline(
    config: PipelineConfig,
    previous: Option<&RunReport>,
) -> Result<RunReport, PipelineError> {
    Orchestrator::from_config(config).run(previous).await
}
