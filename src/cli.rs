//! Command-line interface definitions for Daily AI News.
//!
//! Flags override the YAML configuration file; secrets are usually supplied
//! through the environment rather than on the command line.

use clap::Parser;
use daily_ai_news::PipelineConfig;

/// Command-line arguments for one pipeline run.
///
/// # Examples
///
/// ```sh
/// # JSON reports only, defaults for everything else
/// daily_ai_news -j ./reports
///
/// # JSON and a Markdown digest, with a config file
/// daily_ai_news -j ./reports -m ./digest -c ./config.yaml
///
/// # Point the summarizer at a different OpenAI-compatible endpoint
/// AI_BASE_URL=http://localhost:8080/v1 AI_MODEL=qwen2.5 daily_ai_news -j ./reports
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Output directory for JSON reports (also holds `latest.json`)
    #[arg(short, long)]
    pub json_output_dir: String,

    /// Output directory for the Markdown digest
    #[arg(short, long)]
    pub markdown_output_dir: Option<String>,

    /// Optional path to config.yaml file
    #[arg(short, long)]
    pub config: Option<String>,

    /// GitHub token for README enrichment
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    /// Hugging Face access token
    #[arg(long, env = "HF_TOKEN", hide_env_values = true)]
    pub hf_token: Option<String>,

    /// API key for the AI service (falls back to GEMINI_API_KEY)
    #[arg(long, env = "AI_API_KEY", hide_env_values = true)]
    pub ai_api_key: Option<String>,

    /// Base URL of an OpenAI-compatible chat-completions API
    #[arg(long, env = "AI_BASE_URL")]
    pub ai_base_url: Option<String>,

    /// Model name passed to the AI service
    #[arg(long, env = "AI_MODEL")]
    pub ai_model: Option<String>,

    /// Enrich GitHub projects with a README excerpt
    #[arg(long)]
    pub github_readme: bool,

    /// Merge duplicates on fingerprints only, without the AI comparator
    #[arg(long)]
    pub no_ai_dedup: bool,

    /// Use the local fallback text instead of AI summaries
    #[arg(long)]
    pub no_ai_summary: bool,

    /// Delete archived JSON reports older than this many days
    #[arg(long, env = "DATA_RETENTION_DAYS")]
    pub retention_days: Option<u32>,
}

impl Cli {
    /// Layer the flags that were given on top of `config`.
    ///
    /// `fallback_api_key` is used only when neither the flag nor the
    /// configuration file supplies an AI key.
    pub fn apply(&self, mut config: PipelineConfig, fallback_api_key: Option<String>) -> PipelineConfig {
        if let Some(token) = &self.github_token {
            config.github.token = Some(token.clone());
        }
        if let Some(token) = &self.hf_token {
            config.huggingface.token = Some(token.clone());
        }
        if let Some(key) = &self.ai_api_key {
            config.ai.api_key = Some(key.clone());
        }
        if config.ai.api_key.is_none() {
            config.ai.api_key = fallback_api_key;
        }
        if let Some(base_url) = &self.ai_base_url {
            config.ai.base_url = base_url.clone();
        }
        if let Some(model) = &self.ai_model {
            config.ai.model = model.clone();
        }
        if self.github_readme {
            config.github.fetch_readme = true;
        }
        if self.no_ai_dedup {
            config.dedup.ai_enabled = false;
        }
        if self.no_ai_summary {
            config.summary.ai_enabled = false;
        }
        config.sanitized()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from([
            "daily_ai_news",
            "--json-output-dir",
            "./json",
            "--markdown-output-dir",
            "./markdown",
        ]);

        assert_eq!(cli.json_output_dir, "./json");
        assert_eq!(cli.markdown_output_dir.as_deref(), Some("./markdown"));
        assert!(!cli.github_readme);
        assert!(cli.retention_days.is_none());
    }

    #[test]
    fn test_cli_short_flags() {
        let cli = Cli::parse_from(["daily_ai_news", "-j", "/tmp/json", "-c", "/tmp/config.yaml"]);

        assert_eq!(cli.json_output_dir, "/tmp/json");
        assert!(cli.markdown_output_dir.is_none());
        assert_eq!(cli.config.as_deref(), Some("/tmp/config.yaml"));
    }

    #[test]
    fn test_json_output_dir_is_required() {
        assert!(Cli::try_parse_from(["daily_ai_news", "-m", "/tmp/md"]).is_err());
    }

    #[test]
    fn test_apply_overrides_config() {
        let cli = Cli::parse_from([
            "daily_ai_news",
            "-j",
            "/tmp/json",
            "--ai-api-key",
            "flag-key",
            "--ai-model",
            "gemini-2.0-flash",
            "--github-token",
            "ghp_x",
            "--github-readme",
        ]);
        let config = cli.apply(PipelineConfig::default(), Some("env-key".into()));

        assert_eq!(config.ai.api_key.as_deref(), Some("flag-key"));
        assert_eq!(config.ai.model, "gemini-2.0-flash");
        assert_eq!(config.github.token.as_deref(), Some("ghp_x"));
        assert!(config.github.fetch_readme);
        assert_eq!(config.ai.base_url, PipelineConfig::default().ai.base_url);
    }

    #[test]
    fn test_apply_uses_fallback_key_only_when_missing() {
        let cli = Cli::parse_from(["daily_ai_news", "-j", "/tmp/json"]);

        let mut from_file = PipelineConfig::default();
        from_file.ai.api_key = Some("file-key".into());
        let config = cli.apply(from_file, Some("gemini-key".into()));
        assert_eq!(config.ai.api_key.as_deref(), Some("file-key"));

        let config = cli.apply(PipelineConfig::default(), Some("gemini-key".into()));
        assert_eq!(config.ai.api_key.as_deref(), Some("gemini-key"));
    }

    #[test]
    fn test_ai_switches_and_retention() {
        let cli = Cli::parse_from([
            "daily_ai_news",
            "-j",
            "/tmp/json",
            "--no-ai-dedup",
            "--no-ai-summary",
            "--retention-days",
            "30",
        ]);
        assert_eq!(cli.retention_days, Some(30));

        let config = cli.apply(PipelineConfig::default(), None);
        assert!(!config.dedup.ai_enabled);
        assert!(!config.summary.ai_enabled);

        let config = Cli::parse_from(["daily_ai_news", "-j", "/tmp/json"]).apply(PipelineConfig::default(), None);
        assert!(config.dedup.ai_enabled);
        assert!(config.summary.ai_enabled);
    }

    #[test]
    fn test_retention_days_rejects_non_numbers() {
        assert!(Cli::try_parse_from(["daily_ai_news", "-j", "/tmp/json", "--retention-days", "week"]).is_err());
    }
}
