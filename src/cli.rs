use anyhow::{Result, bail};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::commands::{self, CommandReport};
use crate::logging;

#[derive(Debug, Parser)]
#[command(
    name = "frame-patch",
    version,
    about = "Patch house-frame CAD containers: metadata, labels, and groups"
)]
struct Cli {
    /// Log pipeline stages at debug level.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print the command report as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Write a patched copy of SOURCE to DESTINATION.
    Patch(PatchArgs),
    /// Report properties, categories, and groups of SOURCE without changing it.
    Inspect(InspectArgs),
}

#[derive(Debug, Args)]
struct PatchArgs {
    source: PathBuf,
    destination: PathBuf,
    #[arg(long)]
    config: Option<PathBuf>,
    /// Apply every edit in memory and report it, but write nothing.
    #[arg(long)]
    dry_run: bool,
    /// Skip comparing the repacked container against the source.
    #[arg(long)]
    no_verify: bool,
}

#[derive(Debug, Args)]
struct InspectArgs {
    source: PathBuf,
    #[arg(long)]
    config: Option<PathBuf>,
}

fn emit(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print!("{}", report.render_text());
    }
    Ok(())
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose)?;

    let report = match cli.command {
        Command::Patch(args) => commands::patch::run(&commands::patch::PatchCommandOptions {
            source: args.source,
            destination: args.destination,
            config_path: args.config,
            dry_run: args.dry_run,
            no_verify: args.no_verify,
        })?,
        Command::Inspect(args) => commands::inspect::run(&commands::inspect::InspectOptions {
            source: args.source,
            config_path: args.config,
        })?,
    };

    emit(&report, cli.json)?;
    if !report.ok {
        bail!("{} reported {} issue(s)", report.command, report.issues.len());
    }
    Ok(())
}
