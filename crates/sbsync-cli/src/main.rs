use std::io;

use clap::Parser;
use color_eyre::Result;
use sbsync_core::{CommandContext, ExecutionOutcome, GlobalOptions};
use serde_json::json;

mod cli;
mod dispatch;
mod output;
mod style;

use cli::SbsyncCli;
use dispatch::{dispatch_command, wants_table};
use output::{emit_output, OutputOptions};

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = SbsyncCli::parse();
    init_tracing(cli.trace, cli.verbose, cli.quiet);

    let global = GlobalOptions {
        quiet: cli.quiet,
        verbose: cli.verbose,
        trace: cli.trace,
        json: cli.json,
        manifest: cli.manifest.clone(),
        output_dir: cli.output_dir.clone(),
        backups: cli.backups,
    };

    let outcome = match CommandContext::new(&global) {
        Ok(ctx) => dispatch_command(&ctx, &cli.command).unwrap_or_else(|err| {
            ExecutionOutcome::failure(format!("{err:#}"), json!({ "reason": "internal" }))
        }),
        Err(err) => ExecutionOutcome::user_error(
            format!("{err:#}"),
            json!({
                "reason": "invalid-config",
                "hint": "check the SBSYNC_* environment variables",
            }),
        ),
    };
    let options = OutputOptions {
        quiet: cli.quiet,
        json: cli.json,
        no_color: cli.no_color,
        table: wants_table(&cli.command),
    };
    let code = emit_output(&options, &outcome)?;

    if code == 0 {
        Ok(())
    } else {
        std::process::exit(code);
    }
}

fn init_tracing(trace: bool, verbose: u8, quiet: bool) {
    let level = if trace {
        "trace"
    } else if quiet {
        "error"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = format!("sbsync={level},sbsync_core={level},sbsync_domain={level}");
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .with_level(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}
