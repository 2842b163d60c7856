//! # Daily AI News
//!
//! Collects daily AI and technology listings from several sources, merges
//! listings that describe the same story, and summarizes the survivors into a
//! ranked [`RunReport`].
//!
//! ## Architecture
//!
//! 1. **Fetching** ([`fetch`], [`sources`]): every source adapter runs
//!    concurrently under a run deadline; failures are isolated per source.
//! 2. **Deduplication** ([`dedup`]): fingerprint pre-filter, then batched
//!    semantic comparison through the AI service, merged with union-find.
//! 3. **Summarization** ([`summarize`]): one summary and category per cluster,
//!    with a local fallback whenever the AI service misbehaves.
//! 4. **Assembly** ([`pipeline`]): ranking, delta against the previous report
//!    and the degraded flag.
//!
//! The library never writes files; persistence and rendering live in the
//! binary's `outputs` module.

pub mod api;
pub mod config;
pub mod dedup;
pub mod error;
pub mod fetch;
pub mod models;
pub mod pipeline;
pub mod retry;
pub mod sources;
pub mod summarize;
pub mod utils;

pub use config::PipelineConfig;
pub use error::{AdapterError, AiError, ConfigError, PipelineError};
pub use models::{Category, GeneratedBy, ItemCluster, RawItem, ReportEntry, RunReport, SourceStats};
pub use pipeline::{Orchestrator, PipelineStage, run_pipeline};
