//! Run configuration with documented defaults.
//!
//! A [`PipelineConfig`] is read from an optional YAML file, then selected
//! values are overridden from CLI flags or environment variables by the
//! binary. Every field has a default so an empty file, or no
//! file at all, is a valid configuration.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, instrument};

pub const SOURCE_GITHUB: &str = "github";
pub const SOURCE_HUGGINGFACE: &str = "huggingface";
pub const SOURCE_ARXIV: &str = "arxiv";
pub const SOURCE_PAPERS_WITH_CODE: &str = "paperswithcode";
pub const SOURCE_TOWARDS_DATA_SCIENCE: &str = "towardsdatascience";

pub const ALL_SOURCES: [&str; 5] = [
    SOURCE_GITHUB,
    SOURCE_HUGGINGFACE,
    SOURCE_ARXIV,
    SOURCE_PAPERS_WITH_CODE,
    SOURCE_TOWARDS_DATA_SCIENCE,
];

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Top-level configuration for one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Wall-clock budget for the whole run, in seconds.
    pub run_deadline_secs: u64,
    pub fetch: FetchSettings,
    pub sources: SourceSettings,
    pub github: GithubSettings,
    pub huggingface: HuggingFaceSettings,
    pub ai: AiSettings,
    pub dedup: DedupSettings,
    pub summary: SummarySettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            run_deadline_secs: 600,
            fetch: FetchSettings::default(),
            sources: SourceSettings::default(),
            github: GithubSettings::default(),
            huggingface: HuggingFaceSettings::default(),
            ai: AiSettings::default(),
            dedup: DedupSettings::default(),
            summary: SummarySettings::default(),
        }
    }
}

/// HTTP behaviour shared by every source adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    /// How many adapters run at once.
    pub concurrency: usize,
    /// Per-request timeout.
    pub timeout_secs: u64,
    /// Attempts per request, including the first one.
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub max_items_per_source: usize,
    pub user_agent: String,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            concurrency: 5,
            timeout_secs: 30,
            max_attempts: 3,
            retry_base_delay_ms: 1000,
            max_items_per_source: 25,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    /// Source ids to run; unknown ids are ignored with a warning.
    pub enabled: Vec<String>,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            enabled: ALL_SOURCES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GithubSettings {
    /// Bearer token; raises the REST API limit from 60 to 5000 requests per hour.
    pub token: Option<String>,
    /// Enrich trending repositories with a README excerpt.
    pub fetch_readme: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HuggingFaceSettings {
    pub token: Option<String>,
}

/// OpenAI-compatible chat-completions endpoint used for comparison and summaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: usize,
    pub retry_base_delay_ms: u64,
    /// Concurrent comparator batches and concurrent summaries.
    pub concurrency: usize,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com/v1beta/openai".to_string(),
            api_key: None,
            model: "gemini-1.5-flash".to_string(),
            timeout_secs: 60,
            max_retries: 3,
            retry_base_delay_ms: 2000,
            concurrency: 5,
            max_tokens: 4000,
            temperature: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupSettings {
    /// Maximum titles sent to the comparator in one call.
    pub batch_size: usize,
    /// Ask the AI comparator about near-duplicates; `false` keeps fingerprint matching only.
    pub ai_enabled: bool,
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self {
            batch_size: 20,
            ai_enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarySettings {
    /// Summaries longer than this are truncated with an ellipsis.
    pub max_chars: usize,
    /// Summarize through the AI service; `false` uses the local fallback text.
    pub ai_enabled: bool,
}

impl Default for SummarySettings {
    fn default() -> Self {
        Self {
            max_chars: 500,
            ai_enabled: true,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a YAML file.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().display().to_string();
        let text = std::fs::read_to_string(path.as_ref()).map_err(|source| ConfigError::Io {
            path: path_str.clone(),
            source,
        })?;
        let config = Self::from_yaml_str(&text).map_err(|source| ConfigError::Yaml {
            path: path_str,
            source,
        })?;
        info!("Loaded configuration file");
        Ok(config)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, serde_yaml::Error> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(text)?;
        Ok(config.sanitized())
    }

    /// Clamp values that would stall the pipeline.
    pub fn sanitized(mut self) -> Self {
        self.fetch.concurrency = self.fetch.concurrency.max(1);
        self.fetch.max_attempts = self.fetch.max_attempts.max(1);
        self.fetch.timeout_secs = self.fetch.timeout_secs.max(1);
        self.ai.concurrency = self.ai.concurrency.max(1);
        self.ai.timeout_secs = self.ai.timeout_secs.max(1);
        self.dedup.batch_size = self.dedup.batch_size.max(2);
        self.summary.max_chars = self.summary.max_chars.max(1);
        self.github.token = non_blank(self.github.token);
        self.huggingface.token = non_blank(self.huggingface.token);
        self.ai.api_key = non_blank(self.ai.api_key);
        self
    }

    pub fn run_deadline(&self) -> Duration {
        Duration::from_secs(self.run_deadline_secs)
    }

    pub fn is_source_enabled(&self, source_id: &str) -> bool {
        self.sources
            .enabled
            .iter()
            .any(|s| s.eq_ignore_ascii_case(source_id))
    }
}

impl FetchSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

impl AiSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
