use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

pub const SBSYNC_HELP_TEMPLATE: &str =
    "{before-help}\nUsage:\n    {usage}\n\nCommands:\n{subcommands}\n\nGlobal options:\n{options}\n";

pub const SBSYNC_BEFORE_HELP: &str = concat!(
    "sbsync ",
    env!("CARGO_PKG_VERSION"),
    " – Splunkbase app inventory sync\n\n",
    "  sync             Bring archives and Your_apps.json in line with Splunkbase.\n",
    "  validate         Check the manifest and archives without touching the network.\n",
    "  fmt              Rewrite the manifest canonically.\n",
    "  backups          List manifest backups, oldest first.\n",
    "  restore          Put a manifest backup back in place.\n",
);

#[derive(Parser, Debug)]
#[command(
    name = "sbsync",
    author,
    version,
    disable_help_subcommand = true,
    before_help = SBSYNC_BEFORE_HELP,
    help_template = SBSYNC_HELP_TEMPLATE
)]
#[allow(clippy::struct_excessive_bools)]
pub struct SbsyncCli {
    #[arg(
        long,
        value_name = "PATH",
        help = "Manifest to reconcile (default: Your_apps.json)",
        global = true
    )]
    pub manifest: Option<PathBuf>,
    #[arg(
        long = "outdir",
        value_name = "PATH",
        help = "Directory holding <uid>_<version>.tgz archives",
        global = true
    )]
    pub output_dir: Option<PathBuf>,
    #[arg(
        long,
        value_name = "N",
        help = "Manifest backups to keep (0 disables backups)",
        global = true
    )]
    pub backups: Option<usize>,
    #[arg(
        short,
        long,
        help = "Only print the summary line (errors still print)",
        global = true
    )]
    pub quiet: bool,
    #[arg(
        short,
        long,
        action = ArgAction::Count,
        help = "Increase logging (-vv reaches trace)",
        global = true
    )]
    pub verbose: u8,
    #[arg(long, help = "Force trace logging regardless of -v/-q", global = true)]
    pub trace: bool,
    #[arg(
        long,
        help = "Emit a {status,message,details} JSON envelope",
        global = true
    )]
    pub json: bool,
    #[arg(long, help = "Disable colored human output", global = true)]
    pub no_color: bool,
    #[command(subcommand)]
    pub command: CommandCli,
}

#[derive(Subcommand, Debug)]
pub enum CommandCli {
    #[command(about = "Download missing or outdated archives and update the manifest.")]
    Sync(SyncArgs),
    #[command(about = "Check entries against the schema and the output directory.")]
    Validate(ValidateArgs),
    #[command(about = "Rewrite the manifest with sorted keys and four-space indentation.")]
    Fmt,
    #[command(about = "List manifest backups, oldest first.")]
    Backups,
    #[command(about = "Restore a manifest backup (newest when NAME is omitted).")]
    Restore(RestoreArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct SelectionArgs {
    #[arg(
        long,
        value_name = "IDS",
        help = "Comma separated app uids to process (default: all)"
    )]
    pub only: Option<String>,
    #[arg(long, value_name = "IDS", help = "Comma separated app uids to skip")]
    pub exclude: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ReportArgs {
    #[arg(long, help = "Print a per-app table after the summary line")]
    pub summary: bool,
    #[arg(long, value_name = "PATH", help = "Write the run report as JSON")]
    pub report_file: Option<PathBuf>,
    #[arg(
        long,
        help = "Exit with code 3 when any app has errors, missing files, or schema violations"
    )]
    pub fail_on_errors: bool,
}

#[derive(Args, Debug, Clone)]
#[allow(clippy::struct_excessive_bools)]
pub struct SyncArgs {
    #[arg(long, help = "Report what would change without downloading or writing")]
    pub dry_run: bool,
    #[command(flatten)]
    pub selection: SelectionArgs,
    #[arg(long, help = "Skip asking the catalog for newer releases")]
    pub no_update_check: bool,
    #[arg(long, help = "Download the latest release when the pinned archive is missing")]
    pub upgrade_missing: bool,
    #[arg(long, help = "Re-download the pinned release when its archive is missing")]
    pub fix_missing: bool,
    #[arg(long, help = "Include a SHA-256 of each archive in the results")]
    pub hash: bool,
    #[command(flatten)]
    pub report: ReportArgs,
}

#[derive(Args, Debug, Clone)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,
    #[arg(long, help = "Include a SHA-256 of each archive in the results")]
    pub hash: bool,
    #[arg(long, help = "Exit with code 3 when any entry violates the schema")]
    pub strict: bool,
    #[command(flatten)]
    pub report: ReportArgs,
}

#[derive(Args, Debug, Clone)]
pub struct RestoreArgs {
    #[arg(value_name = "NAME", help = "Backup file name or timestamp")]
    pub name: Option<String>,
}
