use anyhow::Result;
use serde_json::json;
use tracing::info;

use super::manifest_error_outcome;
use crate::core::config::context::CommandContext;
use crate::core::tooling::outcome::ExecutionOutcome;

/// Rewrites the manifest with sorted keys and four-space indentation.
///
/// # Errors
/// Never fails outright; manifest errors are reported through the outcome.
pub fn reformat_manifest(ctx: &CommandContext) -> Result<ExecutionOutcome> {
    let store = ctx.manifest_store();
    let outcome = match store.reformat() {
        Ok(outcome) => outcome,
        Err(err) => return Ok(manifest_error_outcome(&err)),
    };
    let path = store.path().display().to_string();
    let message = if outcome.changed {
        info!(path = %path, "reformatted manifest");
        format!("reformatted {path} ({} entries)", outcome.entries)
    } else {
        format!("{path} is already formatted")
    };
    Ok(ExecutionOutcome::success(
        message,
        json!({
            "manifest": path,
            "entries": outcome.entries,
            "changed": outcome.changed,
        }),
    ))
}

/// # Errors
/// Never fails outright; manifest errors are reported through the outcome.
pub fn list_backups(ctx: &CommandContext) -> Result<ExecutionOutcome> {
    let store = ctx.manifest_store();
    let backups = match store.backups() {
        Ok(backups) => backups,
        Err(err) => return Ok(manifest_error_outcome(&err)),
    };
    let message = match backups.len() {
        0 => "no backups".to_string(),
        1 => "1 backup".to_string(),
        n => format!("{n} backups"),
    };
    Ok(ExecutionOutcome::success(
        message,
        json!({
            "manifest": store.path().display().to_string(),
            "retention": store.retention(),
            "backups": backups
                .iter()
                .map(|backup| json!({
                    "name": backup.name,
                    "stamp": backup.stamp,
                    "path": backup.path.display().to_string(),
                    "bytes": backup.bytes,
                }))
                .collect::<Vec<_>>(),
        }),
    ))
}

#[derive(Debug, Clone, Default)]
pub struct RestoreRequest {
    /// Backup file name or stamp; the newest backup when absent.
    pub name: Option<String>,
}

/// # Errors
/// Never fails outright; manifest errors are reported through the outcome.
pub fn restore_backup(ctx: &CommandContext, request: &RestoreRequest) -> Result<ExecutionOutcome> {
    let store = ctx.manifest_store();
    let outcome = match store.restore(request.name.as_deref()) {
        Ok(outcome) => outcome,
        Err(err) => return Ok(manifest_error_outcome(&err)),
    };
    Ok(ExecutionOutcome::success(
        format!(
            "restored {} ({} entries)",
            outcome.restored.name, outcome.entries
        ),
        json!({
            "manifest": store.path().display().to_string(),
            "restored": outcome.restored.name,
            "entries": outcome.entries,
            "previous": outcome
                .previous
                .as_ref()
                .map(|path| path.display().to_string()),
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    use serial_test::serial;
    use tempfile::{tempdir, TempDir};

    use crate::core::config::GlobalOptions;
    use crate::core::tooling::outcome::CommandStatus;

    fn options(contents: &str) -> (TempDir, PathBuf, GlobalOptions) {
        let dir = tempdir().expect("tempdir");
        let manifest = dir.path().join("Your_apps.json");
        fs::write(&manifest, contents).expect("manifest");
        std::env::set_var("SBSYNC_STATE_DIR", dir.path().join("state"));
        let global = GlobalOptions {
            manifest: Some(manifest.clone()),
            output_dir: Some(dir.path().join("apps")),
            ..GlobalOptions::default()
        };
        (dir, manifest, global)
    }

    #[test]
    #[serial]
    fn reformat_is_idempotent() {
        let (_dir, manifest, global) = options(
            r#"[{"version":"9.0.0","uid":742,"name":"Windows","appid":"Splunk_TA_windows"}]"#,
        );
        let ctx = CommandContext::new(&global).expect("context");

        let first = reformat_manifest(&ctx).expect("fmt");
        assert_eq!(first.details["changed"], true);
        let formatted = fs::read_to_string(&manifest).expect("read");
        assert!(formatted.starts_with("[\n    {\n        \"appid\""));

        let second = reformat_manifest(&ctx).expect("fmt");
        assert_eq!(second.details["changed"], false);
        assert_eq!(fs::read_to_string(&manifest).expect("read"), formatted);
    }

    #[test]
    #[serial]
    fn reformat_refuses_invalid_entries() {
        let (_dir, manifest, global) = options(r#"[{"uid": 0, "name": ""}]"#);
        let before = fs::read_to_string(&manifest).expect("read");
        let ctx = CommandContext::new(&global).expect("context");

        let outcome = reformat_manifest(&ctx).expect("fmt");

        assert_eq!(outcome.status, CommandStatus::UserError);
        assert_eq!(outcome.details["reason"], "manifest-schema");
        assert!(outcome.details["violations"].as_array().is_some_and(|v| !v.is_empty()));
        assert_eq!(fs::read_to_string(&manifest).expect("read"), before);
    }

    #[test]
    #[serial]
    fn restore_without_backups_is_a_user_error() {
        let (_dir, _manifest, global) = options("[]");
        let ctx = CommandContext::new(&global).expect("context");

        let listed = list_backups(&ctx).expect("backups");
        assert_eq!(listed.message, "no backups");

        let outcome = restore_backup(&ctx, &RestoreRequest::default()).expect("restore");
        assert_eq!(outcome.status, CommandStatus::UserError);
        assert_eq!(outcome.details["reason"], "no-backups");
    }

    #[test]
    #[serial]
    fn restore_brings_back_the_newest_backup() {
        let original = r#"[{"uid": 742, "name": "Windows", "appid": "Splunk_TA_windows", "version": "9.0.0"}]"#;
        let (dir, manifest, global) = options(original);
        let backup = dir.path().join("Your_apps.json.bak-20251110T100000000000");
        fs::write(&backup, original).expect("backup");
        fs::write(&manifest, "[]").expect("overwrite");
        let ctx = CommandContext::new(&global).expect("context");

        let outcome = restore_backup(&ctx, &RestoreRequest::default()).expect("restore");

        assert_eq!(outcome.status, CommandStatus::Ok);
        assert_eq!(outcome.details["entries"], 1);
        assert_eq!(fs::read_to_string(&manifest).expect("read"), original);
        let listed = list_backups(&ctx).expect("backups");
        assert_eq!(listed.details["backups"].as_array().map(Vec::len), Some(2));
    }
}
