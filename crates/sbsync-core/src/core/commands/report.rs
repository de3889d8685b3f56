use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use tempfile::NamedTempFile;
use tracing::info;

use sbsync_domain::{RunReport, Summary};

/// One line with totals, errors, and missing files.
#[must_use]
pub fn summary_line(label: &str, summary: &Summary) -> String {
    format!(
        "{label}: {} apps, {} to update, {} up to date, {} errors, {} missing files",
        summary.total, summary.to_update, summary.up_to_date, summary.errors, summary.missing_files
    )
}

/// Writes the report next to its final name and renames it into place.
pub(crate) fn write_report(path: &Path, report: &RunReport) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create report directory {}", parent.display()))?;
    let mut tmp = NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to stage report in {}", parent.display()))?;
    serde_json::to_writer_pretty(&mut tmp, report)?;
    tmp.write_all(b"\n")?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .with_context(|| format!("failed to write report {}", path.display()))?;
    info!(path = %path.display(), "wrote run report");
    Ok(())
}
