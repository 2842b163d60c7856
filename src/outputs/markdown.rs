//! Markdown digest rendering and the dated index page.

use daily_ai_news::config::SOURCE_GITHUB;
use daily_ai_news::utils::{slugify_title, upcase};
use daily_ai_news::{Category, ReportEntry, RunReport};
use itertools::Itertools;
use std::error::Error;
use std::fmt::{self, Write};
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

pub const INDEX_FILE: &str = "index.md";
const INDEX_HEADER: &str = "# Daily AI News Index";

fn heading(category: Category) -> String {
    match category {
        Category::Other => upcase(category.as_str()),
        _ => format!("{}s", upcase(category.as_str())),
    }
}

/// Render a report as a Markdown digest.
///
/// Entries keep their ranked order inside each category section; empty
/// categories are left out.
pub fn report_to_markdown(report: &RunReport) -> Result<String, fmt::Error> {
    let mut md = String::new();

    writeln!(md, "# Daily AI News: {}\n", report.date)?;

    if report.degraded {
        let failed = report.failed_sources();
        write!(md, "> **Degraded run.** ")?;
        if failed.is_empty() {
            writeln!(md, "Some summaries were generated without the AI service.")?;
        } else {
            writeln!(md, "Failed sources: {}.", failed.join(", "))?;
        }
        writeln!(md)?;
    }
    if report.dedup_fallback {
        writeln!(md, "> Duplicate detection ran on exact titles only; some repeats may remain.\n")?;
    }

    let new_count = report.entries.iter().filter(|e| e.is_new).count();
    writeln!(
        md,
        "_{} stories from {} items ({} new), generated {}._\n",
        report.entries.len(),
        report.total_items,
        new_count,
        report.generated_at.format("%Y-%m-%d %H:%M UTC")
    )?;

    let sections: Vec<(Category, Vec<&ReportEntry>)> = Category::ALL
        .into_iter()
        .map(|c| (c, report.entries.iter().filter(|e| e.category == c).collect::<Vec<_>>()))
        .filter(|(_, entries)| !entries.is_empty())
        .collect();

    writeln!(md, "## Contents\n")?;
    for (category, entries) in &sections {
        let title = heading(*category);
        writeln!(md, "- [{}](#{}) ({})", title, slugify_title(&title), entries.len())?;
    }
    writeln!(md)?;

    for (category, entries) in &sections {
        writeln!(md, "## {}\n", heading(*category))?;
        for entry in entries {
            write_entry(&mut md, entry)?;
        }
    }

    write_source_stats(&mut md, report)?;
    write_languages(&mut md, report)?;

    Ok(md)
}

fn write_entry(md: &mut String, entry: &ReportEntry) -> fmt::Result {
    let canonical = &entry.cluster.canonical_item;
    let marker = if entry.is_new { " **new**" } else { "" };
    writeln!(md, "### [{}]({}){}\n", canonical.title, canonical.url, marker)?;
    writeln!(md, "{}\n", entry.summary)?;
    writeln!(md, "- Sources: {}", entry.cluster.sources().join(", "))?;
    if let Some(score) = canonical.score {
        writeln!(md, "- Score: {score}")?;
    }
    let others = entry.cluster.other_titles();
    if !others.is_empty() {
        let quoted = others.iter().map(|t| format!("\"{t}\"")).join(", ");
        writeln!(md, "- Also reported as: {quoted}")?;
    }
    writeln!(md)
}

fn write_source_stats(md: &mut String, report: &RunReport) -> fmt::Result {
    writeln!(md, "## Sources\n")?;
    writeln!(md, "| Source | Items | Status |")?;
    writeln!(md, "|--------|------:|--------|")?;
    for (source, stats) in &report.source_stats {
        let status = match &stats.error {
            None => "ok".to_string(),
            Some(e) => format!("failed: {}", e.replace('|', "/")),
        };
        writeln!(md, "| {} | {} | {} |", source, stats.fetched_count, status)?;
    }
    writeln!(md)
}

/// Language counts across every GitHub project in the report, most common first.
fn language_distribution(report: &RunReport) -> Vec<(&str, usize)> {
    report
        .entries
        .iter()
        .flat_map(|e| e.cluster.member_items.iter())
        .filter(|i| i.source_id == SOURCE_GITHUB)
        .filter_map(|i| i.metadata.get("language").map(String::as_str))
        .counts()
        .into_iter()
        .sorted_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)))
        .collect()
}

fn write_languages(md: &mut String, report: &RunReport) -> fmt::Result {
    let languages = language_distribution(report);
    if languages.is_empty() {
        return Ok(());
    }
    writeln!(md, "## GitHub languages\n")?;
    for (language, count) in languages {
        writeln!(md, "- {language}: {count}")?;
    }
    writeln!(md)
}

/// Insert or replace the line for `date` directly under the index header.
///
/// Dates are listed newest first; rerunning on the same day replaces that
/// day's line instead of adding a second one.
fn upsert_index_line(content: &str, date: &str, line: &str) -> String {
    let date_link = format!("[**{date}**]");
    let mut lines: Vec<String> = content
        .lines()
        .filter(|l| !l.contains(&date_link))
        .map(|l| l.to_string())
        .collect();

    match lines.iter().position(|l| l.starts_with(INDEX_HEADER)) {
        Some(pos) => {
            let mut at = pos + 1;
            if lines.get(at).is_some_and(|l| l.trim().is_empty()) {
                at += 1;
            } else {
                lines.insert(at, String::new());
                at += 1;
            }
            lines.insert(at, line.to_string());
        }
        None => {
            lines.insert(0, INDEX_HEADER.to_string());
            lines.insert(1, String::new());
            lines.insert(2, line.to_string());
        }
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Write `{date}.md` and refresh `index.md` in `markdown_output_dir`.
#[instrument(level = "info", skip_all, fields(%markdown_output_dir, date = %report.date))]
pub async fn write_digest(report: &RunReport, markdown_output_dir: &str) -> Result<(), Box<dyn Error>> {
    let md = report_to_markdown(report)?;
    let filename = format!("{}.md", report.date);
    let path = Path::new(markdown_output_dir).join(&filename);
    fs::create_dir_all(markdown_output_dir).await?;
    fs::write(&path, md).await?;
    info!(path = %path.display(), "Wrote Markdown digest");

    let index_path = Path::new(markdown_output_dir).join(INDEX_FILE);
    let existing = if index_path.exists() {
        fs::read_to_string(&index_path).await?
    } else {
        format!("{INDEX_HEADER}\n")
    };
    let date = report.date.to_string();
    let suffix = if report.degraded { ", degraded" } else { "" };
    let line = format!(
        "- [**{date}**](./{filename}) ({} stories{suffix})",
        report.entries.len()
    );
    fs::write(&index_path, upsert_index_line(&existing, &date, &line)).await?;
    info!(path = %index_path.display(), "Updated Markdown index");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outputs::tests::sample_report;

    #[test]
    fn test_digest_groups_by_category_in_priority_order() {
        let md = report_to_markdown(&sample_report()).unwrap();

        let projects = md.find("## Projects").unwrap();
        let papers = md.find("## Papers").unwrap();
        assert!(projects < papers);
        assert!(!md.contains("## Models"));
        assert!(md.contains("- [Projects](#projects) (1)"));
        assert!(md.contains("### [acme/agent-kit](https://github.com/acme/agent-kit) **new**"));
        assert!(md.contains("- Also reported as: \"Agent Kit 1.0 released\""));
        assert!(md.contains("- Sources: github, towardsdatascience"));
    }

    #[test]
    fn test_digest_banner_and_stats() {
        let mut report = sample_report();
        let md = report_to_markdown(&report).unwrap();
        assert!(!md.contains("Degraded run"));
        assert!(md.contains("| arxiv | 1 | ok |"));

        report.degraded = true;
        report.source_stats.get_mut("huggingface").unwrap().error =
            Some("huggingface: HTTP 503".into());
        let md = report_to_markdown(&report).unwrap();
        assert!(md.contains("> **Degraded run.** Failed sources: huggingface."));
        assert!(md.contains("| huggingface | 0 | failed: huggingface: HTTP 503 |"));
    }

    #[test]
    fn test_language_distribution_counts_github_members() {
        let report = sample_report();
        assert_eq!(language_distribution(&report), vec![("Rust", 1)]);
        let md = report_to_markdown(&report).unwrap();
        assert!(md.contains("## GitHub languages\n\n- Rust: 1"));
    }

    #[test]
    fn test_index_lists_newest_first_and_replaces_same_day() {
        let first = upsert_index_line("", "2025-10-15", "- [**2025-10-15**](./2025-10-15.md) (3 stories)");
        let second = upsert_index_line(&first, "2025-10-16", "- [**2025-10-16**](./2025-10-16.md) (4 stories)");
        assert_eq!(
            second,
            "# Daily AI News Index\n\n- [**2025-10-16**](./2025-10-16.md) (4 stories)\n- [**2025-10-15**](./2025-10-15.md) (3 stories)\n"
        );

        let rerun = upsert_index_line(&second, "2025-10-16", "- [**2025-10-16**](./2025-10-16.md) (5 stories)");
        assert_eq!(rerun.matches("2025-10-16**").count(), 1);
        assert!(rerun.contains("(5 stories)"));
    }

    #[tokio::test]
    async fn test_write_digest_creates_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_str().unwrap();
        write_digest(&sample_report(), root).await.unwrap();

        assert!(dir.path().join("2025-10-16.md").exists());
        let index = std::fs::read_to_string(dir.path().join(INDEX_FILE)).unwrap();
        assert!(index.contains("- [**2025-10-16**](./2025-10-16.md) (2 stories)"));
    }
}
