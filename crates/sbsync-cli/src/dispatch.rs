use color_eyre::{eyre::eyre, Result};
use sbsync_core::{
    list_backups, reformat_manifest, restore_backup, run_sync, run_validate, CommandContext,
    ExecutionOutcome, ReportOptions, RestoreRequest, SyncRequest, ValidateRequest,
};

use crate::cli::{CommandCli, ReportArgs, SyncArgs, ValidateArgs};

pub fn dispatch_command(ctx: &CommandContext, command: &CommandCli) -> Result<ExecutionOutcome> {
    match command {
        CommandCli::Sync(args) => core_call(|| run_sync(ctx, &sync_request_from_args(args))),
        CommandCli::Validate(args) => {
            core_call(|| run_validate(ctx, &validate_request_from_args(args)))
        }
        CommandCli::Fmt => core_call(|| reformat_manifest(ctx)),
        CommandCli::Backups => core_call(|| list_backups(ctx)),
        CommandCli::Restore(args) => {
            let request = RestoreRequest {
                name: args.name.clone(),
            };
            core_call(|| restore_backup(ctx, &request))
        }
    }
}

fn core_call<F>(action: F) -> Result<ExecutionOutcome>
where
    F: FnOnce() -> anyhow::Result<ExecutionOutcome>,
{
    action().map_err(|err| eyre!("{err:#}"))
}

fn sync_request_from_args(args: &SyncArgs) -> SyncRequest {
    SyncRequest {
        dry_run: args.dry_run,
        only: args.selection.only.clone(),
        exclude: args.selection.exclude.clone(),
        check_updates: !args.no_update_check,
        upgrade_missing: args.upgrade_missing,
        fix_missing: args.fix_missing,
        hash: args.hash,
        report: report_options(&args.report),
    }
}

fn validate_request_from_args(args: &ValidateArgs) -> ValidateRequest {
    ValidateRequest {
        only: args.selection.only.clone(),
        exclude: args.selection.exclude.clone(),
        hash: args.hash,
        strict: args.strict,
        report: report_options(&args.report),
    }
}

fn report_options(args: &ReportArgs) -> ReportOptions {
    ReportOptions {
        report_file: args.report_file.clone(),
        fail_on_errors: args.fail_on_errors,
    }
}

/// Whether the per-app table was requested for this command.
pub fn wants_table(command: &CommandCli) -> bool {
    match command {
        CommandCli::Sync(args) => args.report.summary,
        CommandCli::Validate(args) => args.report.summary,
        CommandCli::Fmt | CommandCli::Backups | CommandCli::Restore(_) => false,
    }
}
