//! Error taxonomy for the pipeline.
//!
//! Adapter and AI errors are recovered locally by the stage that sees them;
//! only [`PipelineError::TotalFetchFailure`] ends a run without a report.

use crate::models::SourceStats;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single source adapter.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AdapterError {
    #[error("{source_id}: request timed out after {after:?}")]
    Timeout { source_id: String, after: Duration },

    #[error("{source_id}: HTTP error{}: {message}", .status.map(|s| format!(" {s}")).unwrap_or_default())]
    Http {
        source_id: String,
        status: Option<u16>,
        message: String,
    },

    #[error("{source_id}: could not parse response: {message}")]
    Parse { source_id: String, message: String },

    #[error("{source_id}: run deadline exceeded before the source finished")]
    DeadlineExceeded { source_id: String },

    #[error("{source_id}: client setup failed: {message}")]
    Client { source_id: String, message: String },
}

impl AdapterError {
    pub fn source_id(&self) -> &str {
        match self {
            AdapterError::Timeout { source_id, .. }
            | AdapterError::Http { source_id, .. }
            | AdapterError::Parse { source_id, .. }
            | AdapterError::DeadlineExceeded { source_id }
            | AdapterError::Client { source_id, .. } => source_id,
        }
    }

    pub fn parse(source_id: &str, message: impl Into<String>) -> Self {
        AdapterError::Parse {
            source_id: source_id.to_string(),
            message: message.into(),
        }
    }
}

/// Failure of the external text-generation service.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AiError {
    #[error("AI service unavailable: {0}")]
    Unavailable(String),

    #[error("AI response malformed: {0}")]
    Malformed(String),

    #[error("AI service rejected the request with HTTP {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("AI call timed out after {0:?}")]
    Timeout(Duration),
}

impl AiError {
    /// Whether retrying the same request could succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(self, AiError::Malformed(_) | AiError::Rejected { .. })
    }
}

/// Failure reading the YAML configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing config {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Run-level failure: no report is produced.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineError {
    #[error("every source failed or returned nothing ({})", summarize_diagnostics(.diagnostics))]
    TotalFetchFailure {
        diagnostics: BTreeMap<String, SourceStats>,
    },
}

fn summarize_diagnostics(diagnostics: &BTreeMap<String, SourceStats>) -> String {
    diagnostics
        .iter()
        .map(|(id, stats)| match &stats.error {
            Some(e) => format!("{id}: {e}"),
            None => format!("{id}: 0 items"),
        })
        .collect::<Vec<_>>()
        .join("; ")
}
