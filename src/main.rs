//! # Daily AI News
//!
//! Runs the daily pipeline once: fetch AI and tech listings from GitHub
//! Trending, Hugging Face, arXiv, Papers with Code and Towards Data Science,
//! merge duplicate stories, summarize them, then write the ranked report as
//! JSON and, optionally, as a Markdown digest.
//!
//! ## Usage
//!
//! ```sh
//! daily_ai_news -j ./reports -m ./digest
//! ```
//!
//! The process exits non-zero only when no source returned anything; in that
//! case `latest.json` is left untouched.

use clap::Parser;
use daily_ai_news::{PipelineConfig, PipelineError, run_pipeline};
use std::error::Error;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;
mod outputs;

use cli::Cli;
use outputs::{ensure_writable_dir, json, markdown};

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("daily_ai_news starting up");

    let args = Cli::parse();
    debug!(?args.json_output_dir, ?args.markdown_output_dir, ?args.config, ?args.retention_days, "Parsed CLI arguments");

    // Early check: ensure JSON output dir is writable
    if let Err(e) = ensure_writable_dir(&args.json_output_dir).await {
        error!(
            path = %args.json_output_dir,
            error = %e,
            "JSON output directory is not writable (fix perms or choose a different path)"
        );
        return Err(e);
    }

    // ---- Configuration ----
    let config = match &args.config {
        Some(path) => PipelineConfig::from_yaml_file(path)?,
        None => {
            info!("No config file given; using defaults");
            PipelineConfig::default()
        }
    };
    let config = args.apply(config, std::env::var("GEMINI_API_KEY").ok());
    if config.ai.api_key.is_none() {
        warn!("No AI API key configured; summaries will use the fallback text");
    }
    info!(
        sources = ?config.sources.enabled,
        model = %config.ai.model,
        deadline_secs = config.run_deadline_secs,
        "Configuration ready"
    );

    // ---- Run ----
    let previous = json::load_previous(&args.json_output_dir).await;
    let report = match run_pipeline(config, previous.as_ref()).await {
        Ok(report) => report,
        Err(PipelineError::TotalFetchFailure { diagnostics }) => {
            for (source, stats) in &diagnostics {
                error!(
                    source = %source,
                    error = stats.error.as_deref().unwrap_or("returned no items"),
                    "Source diagnostics"
                );
            }
            error!("Every source failed; previous report left untouched");
            return Err(PipelineError::TotalFetchFailure { diagnostics }.into());
        }
    };

    // ---- JSON output ----
    let json_path = json::write_report(&report, &args.json_output_dir).await?;
    info!(path = %json_path.display(), "JSON report written");

    if let Some(keep_days) = args.retention_days {
        if let Err(e) = json::prune_archive(&args.json_output_dir, keep_days, report.date) {
            error!(path = %args.json_output_dir, error = %e, "Failed pruning old JSON reports");
        }
    }

    // ---- Markdown output ----
    if let Some(markdown_dir) = &args.markdown_output_dir {
        if let Err(e) = markdown::write_digest(&report, markdown_dir).await {
            error!(path = %markdown_dir, error = %e, "Failed writing Markdown digest");
        }
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        entries = report.entries.len(),
        degraded = report.degraded,
        failed_sources = ?report.failed_sources(),
        "Execution complete"
    );

    Ok(())
}
