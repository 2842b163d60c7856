//! JSON persistence of run reports.
//!
//! Every run is archived under its date, and `latest.json` always holds the
//! most recent successful report so the next run can mark repeats:
//!
//! ```text
//! json_output_dir/
//! ├── latest.json
//! └── 2025/
//!     └── 10/
//!         └── 16/
//!             ├── report_0700.json
//!             └── report_1900.json
//! ```

use chrono::{Days, Local, NaiveDate};
use daily_ai_news::RunReport;
use std::error::Error;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, error, info, instrument, warn};

pub const LATEST_FILE: &str = "latest.json";

/// Archive path for `report` below `json_output_dir`.
pub fn report_path(report: &RunReport, json_output_dir: &str) -> PathBuf {
    let local = report.generated_at.with_timezone(&Local);
    Path::new(json_output_dir)
        .join(report.date.format("%Y").to_string())
        .join(report.date.format("%m").to_string())
        .join(report.date.format("%d").to_string())
        .join(format!("report_{}.json", local.format("%H%M")))
}

/// Write `report` to its dated archive path and replace `latest.json`.
///
/// `latest.json` is written to a temporary file first and renamed into place,
/// so a crash never leaves a half-written previous report behind.
#[instrument(level = "info", skip_all, fields(json_output_dir = %json_output_dir))]
pub async fn write_report(
    report: &RunReport,
    json_output_dir: &str,
) -> Result<PathBuf, Box<dyn Error>> {
    let json = serde_json::to_string_pretty(report)?;

    let path = report_path(report, json_output_dir);
    if let Some(dir) = path.parent() {
        info!(dir = %dir.display(), "Ensuring JSON directory exists");
        if let Err(e) = fs::create_dir_all(dir).await {
            error!(dir = %dir.display(), error = %e, "Failed to create JSON dir");
            return Err(e.into());
        }
    }
    fs::write(&path, &json).await?;
    info!(path = %path.display(), entries = report.entries.len(), "Wrote JSON report");

    let latest = Path::new(json_output_dir).join(LATEST_FILE);
    let staging = latest.with_extension("json.tmp");
    fs::write(&staging, &json).await?;
    fs::rename(&staging, &latest).await?;
    debug!(path = %latest.display(), "Replaced latest report");

    Ok(path)
}

/// Read the previous run's report from `latest.json`.
///
/// A missing file is normal on the first run. An unreadable or corrupt file
/// is logged and treated the same way, so every entry counts as new.
#[instrument(level = "info", skip_all, fields(json_output_dir = %json_output_dir))]
pub async fn load_previous(json_output_dir: &str) -> Option<RunReport> {
    let path = Path::new(json_output_dir).join(LATEST_FILE);
    let text = match fs::read_to_string(&path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "No previous report; all entries will be new");
            return None;
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Could not read previous report");
            return None;
        }
    };
    match serde_json::from_str::<RunReport>(&text) {
        Ok(report) => {
            info!(date = %report.date, entries = report.entries.len(), "Loaded previous report");
            Some(report)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Previous report is not valid JSON; ignoring it");
            None
        }
    }
}

fn numeric_name(entry: &std::fs::DirEntry) -> Option<u32> {
    entry.file_name().to_str()?.parse().ok()
}

fn subdirs(dir: &Path) -> std::io::Result<Vec<(u32, PathBuf)>> {
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            if let Some(n) = numeric_name(&entry) {
                out.push((n, entry.path()));
            }
        }
    }
    Ok(out)
}

/// Delete archived day directories older than `keep_days` before `today`.
///
/// Only `YYYY/MM/DD` directories are touched; `latest.json` and anything
/// else in `json_output_dir` is left alone. Month and year directories
/// emptied by the prune are removed too. Returns the number of days deleted.
#[instrument(level = "info", skip_all, fields(json_output_dir = %json_output_dir, keep_days))]
pub fn prune_archive(
    json_output_dir: &str,
    keep_days: u32,
    today: NaiveDate,
) -> Result<usize, Box<dyn Error>> {
    let cutoff = today
        .checked_sub_days(Days::new(u64::from(keep_days)))
        .unwrap_or(NaiveDate::MIN);
    let mut removed = 0usize;

    for (year, year_dir) in subdirs(Path::new(json_output_dir))? {
        for (month, month_dir) in subdirs(&year_dir)? {
            for (day, day_dir) in subdirs(&month_dir)? {
                let Some(date) = NaiveDate::from_ymd_opt(year as i32, month, day) else {
                    continue;
                };
                if date < cutoff {
                    std::fs::remove_dir_all(&day_dir)?;
                    debug!(dir = %day_dir.display(), "Removed expired reports");
                    removed += 1;
                }
            }
            if std::fs::read_dir(&month_dir)?.next().is_none() {
                std::fs::remove_dir(&month_dir)?;
            }
        }
        if std::fs::read_dir(&year_dir)?.next().is_none() {
            std::fs::remove_dir(&year_dir)?;
        }
    }

    info!(removed, %cutoff, "Pruned report archive");
    Ok(removed)
}
