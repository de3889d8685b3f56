//! Command handlers. Each returns an [`ExecutionOutcome`](crate::ExecutionOutcome)
//! for the CLI to render.

mod manifest;
mod report;
mod run;

use std::path::PathBuf;

use serde_json::json;

use sbsync_domain::{parse_id_list, FilterError, IdFilter, ManifestError};

use crate::core::tooling::outcome::ExecutionOutcome;

pub use manifest::{list_backups, reformat_manifest, restore_backup, RestoreRequest};
pub use report::summary_line;
pub use run::{run_sync, run_validate, SyncRequest, ValidateRequest};

#[derive(Debug, Clone, Default)]
pub struct ReportOptions {
    pub report_file: Option<PathBuf>,
    pub fail_on_errors: bool,
}

pub(crate) fn build_filter(
    only: Option<&str>,
    exclude: Option<&str>,
) -> Result<IdFilter, FilterError> {
    let only = only
        .map(|raw| parse_id_list("--only", raw))
        .transpose()?
        .unwrap_or_default();
    let exclude = exclude
        .map(|raw| parse_id_list("--exclude", raw))
        .transpose()?
        .unwrap_or_default();
    Ok(IdFilter::new(only, exclude))
}

pub(crate) fn filter_error_outcome(err: &FilterError) -> ExecutionOutcome {
    ExecutionOutcome::user_error(
        err.to_string(),
        json!({
            "reason": "invalid-filter",
            "flag": err.flag,
            "token": err.token,
            "hint": "pass a comma separated list of integer app uids, e.g. --only 742,833",
        }),
    )
}

pub(crate) fn manifest_error_outcome(err: &ManifestError) -> ExecutionOutcome {
    let mut details = json!({ "reason": manifest_error_reason(err) });
    match err {
        ManifestError::Schema { path, violations } => {
            details["manifest"] = json!(path.display().to_string());
            details["violations"] = json!(violations);
            details["hint"] = json!("fix the listed entries, then re-run");
        }
        ManifestError::Io { path, .. }
        | ManifestError::Parse { path, .. }
        | ManifestError::Render { path, .. }
        | ManifestError::NotAnArray { path, .. }
        | ManifestError::BackupNotFound { path, .. }
        | ManifestError::NoBackups { path } => {
            details["manifest"] = json!(path.display().to_string());
        }
    }
    if err.is_user_error() {
        ExecutionOutcome::user_error(err.to_string(), details)
    } else {
        ExecutionOutcome::failure(err.to_string(), details)
    }
}

fn manifest_error_reason(err: &ManifestError) -> &'static str {
    match err {
        ManifestError::Io { .. } => "manifest-io",
        ManifestError::Parse { .. } | ManifestError::NotAnArray { .. } => "manifest-parse",
        ManifestError::Render { .. } => "manifest-render",
        ManifestError::Schema { .. } => "manifest-schema",
        ManifestError::BackupNotFound { .. } => "backup-not-found",
        ManifestError::NoBackups { .. } => "no-backups",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_combines_both_lists() {
        let filter = build_filter(Some("742, 833"), Some("833")).expect("filter");
        assert!(filter.admits(Some(742)));
        assert!(!filter.admits(Some(833)));
        assert!(!filter.admits(Some(1)));
        assert!(build_filter(None, None).expect("filter").is_unrestricted());
    }

    #[test]
    fn bad_exclude_list_is_a_user_error() {
        let err = build_filter(Some("742"), Some("x")).expect_err("bad token");
        let outcome = filter_error_outcome(&err);
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(outcome.details["flag"], "--exclude");
        assert_eq!(outcome.details["token"], "x");
    }
}
