//! Output generation for finished run reports.
//!
//! - [`json`]: dated JSON archive plus `latest.json`, read back as the previous report
//! - [`markdown`]: human-readable digest and a newest-first index page
//!
//! ```text
//! json_output_dir/
//! ├── latest.json
//! └── 2025/10/16/report_0700.json
//!
//! markdown_output_dir/
//! ├── 2025-10-16.md
//! └── index.md
//! ```

pub mod json;
pub mod markdown;

use std::error::Error;
use std::fs as stdfs;
use tokio::fs;
use tracing::{info, instrument};

/// Ensure a directory exists and is writable.
///
/// Creates the directory if needed, then writes and removes a scratch file.
#[instrument(level = "info", skip_all, fields(path = %path))]
pub async fn ensure_writable_dir(path: &str) -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(path).await?;
    let check_path = format!("{}/..__write_check__", path.trim_end_matches('/'));
    stdfs::File::create(&check_path)?;
    let _ = stdfs::remove_file(&check_path);
    info!("Output directory is writable");
    Ok(())
}
