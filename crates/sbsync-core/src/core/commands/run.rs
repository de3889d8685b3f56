use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde_json::json;
use time::OffsetDateTime;
use tracing::{info, warn};

use sbsync_domain::{RunReport, Summary};

use super::report::{summary_line, write_report};
use super::{build_filter, filter_error_outcome, manifest_error_outcome, ReportOptions};
use crate::core::config::context::CommandContext;
use crate::core::config::LastUsed;
use crate::core::reconcile::{Mode, ReconcileOptions, Reconciler, RunOutcome};
use crate::core::tooling::outcome::{CommandStatus, ExecutionOutcome};

#[derive(Debug, Clone)]
#[allow(clippy::struct_excessive_bools)]
pub struct SyncRequest {
    pub dry_run: bool,
    pub only: Option<String>,
    pub exclude: Option<String>,
    pub check_updates: bool,
    pub upgrade_missing: bool,
    pub fix_missing: bool,
    pub hash: bool,
    pub report: ReportOptions,
}

impl Default for SyncRequest {
    fn default() -> Self {
        Self {
            dry_run: false,
            only: None,
            exclude: None,
            check_updates: true,
            upgrade_missing: false,
            fix_missing: false,
            hash: false,
            report: ReportOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidateRequest {
    pub only: Option<String>,
    pub exclude: Option<String>,
    pub hash: bool,
    /// Exit non-zero when any entry fails the schema.
    pub strict: bool,
    pub report: ReportOptions,
}

/// Reconciles the selected entries against disk and the catalog, persisting
/// the manifest when anything changed.
///
/// # Errors
/// Returns an error if the catalog client cannot be constructed or the
/// report cannot be serialized.
pub fn run_sync(ctx: &CommandContext, request: &SyncRequest) -> Result<ExecutionOutcome> {
    let filter = match build_filter(request.only.as_deref(), request.exclude.as_deref()) {
        Ok(filter) => filter,
        Err(err) => return Ok(filter_error_outcome(&err)),
    };
    let store = ctx.manifest_store();
    let manifest = match store.load() {
        Ok(manifest) => manifest,
        Err(err) => return Ok(manifest_error_outcome(&err)),
    };
    let gateway = ctx.catalog()?;
    let options = ReconcileOptions {
        mode: Mode::Sync,
        dry_run: request.dry_run,
        check_updates: request.check_updates,
        upgrade_missing: request.upgrade_missing,
        fix_missing: request.fix_missing,
        hash: request.hash,
    };
    let outcome =
        Reconciler::new(ctx.output_dir(), Some(gateway.as_ref()), options).run(&manifest, &filter);

    let mut problems = Vec::new();
    let saved = if outcome.mutated && !request.dry_run {
        match store.save(&outcome.manifest) {
            Ok(()) => {
                info!(path = %store.path().display(), "manifest updated");
                true
            }
            Err(err) => {
                warn!(error = %err, "failed to persist manifest");
                problems.push(err.to_string());
                false
            }
        }
    } else {
        false
    };

    let label = if request.dry_run { "sync (dry run)" } else { "sync" };
    let finished = finish_run(ctx, label, outcome, &request.report, problems, saved)?;
    if !request.dry_run && finished.status != CommandStatus::Failure {
        remember_paths(ctx, store.path());
    }
    Ok(finished)
}

/// Checks the selected entries against the schema and the output directory.
/// Never contacts the catalog and never writes the manifest.
///
/// # Errors
/// Returns an error if the report cannot be serialized.
pub fn run_validate(ctx: &CommandContext, request: &ValidateRequest) -> Result<ExecutionOutcome> {
    let filter = match build_filter(request.only.as_deref(), request.exclude.as_deref()) {
        Ok(filter) => filter,
        Err(err) => return Ok(filter_error_outcome(&err)),
    };
    let manifest = match ctx.manifest_store().load() {
        Ok(manifest) => manifest,
        Err(err) => return Ok(manifest_error_outcome(&err)),
    };
    let outcome = Reconciler::new(ctx.output_dir(), None, ReconcileOptions::validate(request.hash))
        .run(&manifest, &filter);
    let strict_failure = request.strict && Summary::from_results(&outcome.results).invalid > 0;
    let mut finished = finish_run(ctx, "validate", outcome, &request.report, Vec::new(), false)?;
    if strict_failure && finished.status.exit_code() == 0 {
        finished = ExecutionOutcome::findings(finished.message, finished.details);
    }
    Ok(finished)
}

fn finish_run(
    ctx: &CommandContext,
    label: &str,
    outcome: RunOutcome,
    report_options: &ReportOptions,
    mut problems: Vec<String>,
    saved: bool,
) -> Result<ExecutionOutcome> {
    let report = RunReport::build(outcome.results, OffsetDateTime::now_utc());
    if let Some(path) = &report_options.report_file {
        if let Err(err) = write_report(path, &report) {
            warn!(error = %err, "failed to write report");
            problems.push(format!("{err:#}"));
        }
    }
    let summary = report.summary;
    let message = summary_line(label, &summary);
    let details = json!({
        "manifest": ctx.config().manifest().display().to_string(),
        "output_dir": ctx.output_dir().display().to_string(),
        "saved": saved,
        "report_file": report_options
            .report_file
            .as_ref()
            .map(|path| path.display().to_string()),
        "problems": problems,
        "report": serde_json::to_value(&report)?,
    });

    if !problems.is_empty() {
        let message = format!("{message}; {}", problems.join("; "));
        return Ok(ExecutionOutcome::failure(message, details));
    }
    if report_options.fail_on_errors && summary.has_findings() {
        return Ok(ExecutionOutcome::findings(message, details));
    }
    Ok(ExecutionOutcome::success(message, details))
}

fn remember_paths(ctx: &CommandContext, manifest: &Path) {
    let Some(state_dir) = ctx.state_dir() else {
        return;
    };
    let record = LastUsed {
        manifest: Some(absolute(manifest)),
        output_dir: Some(absolute(ctx.output_dir())),
    };
    if &record == ctx.last_used() {
        return;
    }
    if let Err(err) = record.save(state_dir) {
        warn!(error = %err, "failed to record last-used paths");
    }
}

fn absolute(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::Value;

    use sbsync_domain::{Action, ManifestStore};
    use serial_test::serial;
    use tempfile::tempdir;

    use crate::core::catalog::{
        AppRef, CatalogGateway, DownloadHandle, DownloadReceipt, GatewayError, Release,
    };
    use crate::core::config::GlobalOptions;

    fn results_of(details: &Value) -> Option<&Vec<Value>> {
        details.get("report")?.get("results")?.as_array()
    }

    struct StaticCatalog {
        version: &'static str,
    }

    impl CatalogGateway for StaticCatalog {
        fn fetch_latest(&self, app: &AppRef) -> Result<Release, GatewayError> {
            Ok(Release {
                version: self.version.to_string(),
                handle: self.release(app, self.version),
                metadata: None,
            })
        }

        fn release(&self, app: &AppRef, version: &str) -> DownloadHandle {
            DownloadHandle {
                uid: app.uid,
                version: version.to_string(),
                url: String::new(),
            }
        }

        fn download(
            &self,
            _handle: &DownloadHandle,
            destination: &Path,
        ) -> Result<DownloadReceipt, GatewayError> {
            fs::write(destination, b"new").map_err(|err| GatewayError::Io(err.to_string()))?;
            Ok(DownloadReceipt {
                path: destination.to_path_buf(),
                bytes: 3,
                last_modified: None,
            })
        }
    }

    struct Workspace {
        _dir: tempfile::TempDir,
        manifest: PathBuf,
        outdir: PathBuf,
        global: GlobalOptions,
    }

    fn workspace(contents: &str) -> Workspace {
        let dir = tempdir().expect("tempdir");
        let manifest = dir.path().join("Your_apps.json");
        let outdir = dir.path().join("apps");
        fs::create_dir_all(&outdir).expect("outdir");
        fs::write(&manifest, contents).expect("manifest");
        std::env::set_var("SBSYNC_STATE_DIR", dir.path().join("state"));
        let global = GlobalOptions {
            manifest: Some(manifest.clone()),
            output_dir: Some(outdir.clone()),
            ..GlobalOptions::default()
        };
        Workspace {
            _dir: dir,
            manifest,
            outdir,
            global,
        }
    }

    const WINDOWS: &str = r#"[{"uid": 742, "name": "Windows", "appid": "Splunk_TA_windows", "version": "9.0.0"}]"#;

    #[test]
    #[serial]
    fn sync_updates_and_persists_manifest() {
        let ws = workspace(WINDOWS);
        fs::write(ws.outdir.join("742_9.0.0.tgz"), b"old").expect("archive");
        let ctx = CommandContext::with_catalog(&ws.global, Arc::new(StaticCatalog { version: "9.1.0" }))
            .expect("context");

        let outcome = run_sync(&ctx, &SyncRequest::default()).expect("sync");

        assert_eq!(outcome.status, CommandStatus::Ok);
        assert_eq!(outcome.details["saved"], true);
        assert_eq!(
            outcome.message,
            "sync: 1 apps, 1 to update, 0 up to date, 0 errors, 0 missing files"
        );
        let manifest = ManifestStore::new(&ws.manifest, 5).load().expect("reload");
        assert_eq!(
            manifest.entry(742).expect("entry").declared_version.as_str(),
            "9.1.0"
        );
        assert_eq!(ManifestStore::new(&ws.manifest, 5).backups().expect("backups").len(), 1);
        let remembered = LastUsed::load(ctx.state_dir());
        assert!(remembered.manifest.is_some());
    }

    #[test]
    #[serial]
    fn dry_run_leaves_manifest_untouched() {
        let ws = workspace(WINDOWS);
        fs::write(ws.outdir.join("742_9.0.0.tgz"), b"old").expect("archive");
        let before = fs::read(&ws.manifest).expect("read");
        let ctx = CommandContext::with_catalog(&ws.global, Arc::new(StaticCatalog { version: "9.1.0" }))
            .expect("context");
        let request = SyncRequest {
            dry_run: true,
            ..SyncRequest::default()
        };

        let outcome = run_sync(&ctx, &request).expect("sync");

        assert_eq!(outcome.status, CommandStatus::Ok);
        assert_eq!(fs::read(&ws.manifest).expect("read"), before);
        let results = results_of(&outcome.details).expect("results");
        assert_eq!(results[0]["action"], Action::UpdateAvailable.as_str());
        assert_eq!(LastUsed::load(ctx.state_dir()), LastUsed::default());
    }

    #[test]
    #[serial]
    fn findings_fail_only_when_requested() {
        let ws = workspace(WINDOWS);
        let ctx = CommandContext::with_catalog(&ws.global, Arc::new(StaticCatalog { version: "9.1.0" }))
            .expect("context");

        let lenient = run_sync(&ctx, &SyncRequest::default()).expect("sync");
        assert_eq!(lenient.status, CommandStatus::Ok);
        assert_eq!(lenient.details["report"]["summary"]["missing_files"], 1);

        let strict = run_sync(
            &ctx,
            &SyncRequest {
                report: ReportOptions {
                    fail_on_errors: true,
                    ..ReportOptions::default()
                },
                ..SyncRequest::default()
            },
        )
        .expect("sync");
        assert_eq!(strict.status, CommandStatus::Findings);
    }

    #[test]
    #[serial]
    fn invalid_filter_stops_before_loading() {
        let ws = workspace("not json");
        let ctx = CommandContext::with_catalog(&ws.global, Arc::new(StaticCatalog { version: "1" }))
            .expect("context");
        let outcome = run_sync(
            &ctx,
            &SyncRequest {
                only: Some("742,seven".into()),
                ..SyncRequest::default()
            },
        )
        .expect("sync");
        assert_eq!(outcome.status, CommandStatus::UserError);
        assert_eq!(outcome.details["token"], "seven");
    }

    #[test]
    #[serial]
    fn unparseable_manifest_is_an_operational_failure() {
        let ws = workspace("{\"uid\": 742}");
        let ctx = CommandContext::new(&ws.global).expect("context");
        let outcome = run_validate(&ctx, &ValidateRequest::default()).expect("validate");
        assert_eq!(outcome.status, CommandStatus::Failure);
        assert_eq!(outcome.details["reason"], "manifest-parse");
    }

    #[test]
    #[serial]
    fn strict_validation_flags_schema_violations() {
        let ws = workspace(r#"[{"uid": 742, "name": "Windows", "version": "9.0.0"}]"#);
        let ctx = CommandContext::new(&ws.global).expect("context");

        let lenient = run_validate(&ctx, &ValidateRequest::default()).expect("validate");
        assert_eq!(lenient.status, CommandStatus::Ok);
        assert_eq!(lenient.details["report"]["summary"]["invalid"], 1);

        let strict = run_validate(
            &ctx,
            &ValidateRequest {
                strict: true,
                ..ValidateRequest::default()
            },
        )
        .expect("validate");
        assert_eq!(strict.status, CommandStatus::Findings);
    }

    #[test]
    #[serial]
    fn report_file_is_written() {
        let ws = workspace(WINDOWS);
        let report_path = ws.outdir.join("report.json");
        let ctx = CommandContext::new(&ws.global).expect("context");
        let outcome = run_validate(
            &ctx,
            &ValidateRequest {
                report: ReportOptions {
                    report_file: Some(report_path.clone()),
                    fail_on_errors: false,
                },
                ..ValidateRequest::default()
            },
        )
        .expect("validate");
        assert_eq!(outcome.status, CommandStatus::Ok);
        let written: Value =
            serde_json::from_str(&fs::read_to_string(&report_path).expect("report")).expect("json");
        assert_eq!(written["summary"]["total"], 1);
        assert_eq!(written["results"][0]["action"], "valid");
    }
}
