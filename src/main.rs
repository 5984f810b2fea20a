use std::path::PathBuf;
use std::process::exit;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use dotbackup::cli::{handle_backup_command, BackupCommands};
use dotbackup::config::paths::{BackupPaths, ROOT_ENV_VAR};
use dotbackup::BackupError;

#[derive(Parser)]
#[command(
    name = "dot-backup",
    version,
    about = "Backup and restore for dotfiles and tool configuration",
    long_about = "dot-backup captures dotfiles into versioned, compressed archives \
                  (full, incremental, differential or config-only), keeps them under \
                  a tiered retention policy, verifies them and restores them fully \
                  or selectively."
)]
struct Cli {
    /// Backup root directory
    #[arg(long, global = true, env = ROOT_ENV_VAR, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Show debug diagnostics on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: BackupCommands,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let quiet = cli.command.is_quiet();
    if let Err(err) = run(cli) {
        if !quiet {
            eprintln!("error: {:#}", err);
        }
        let code = err
            .downcast_ref::<BackupError>()
            .map(BackupError::exit_code)
            .unwrap_or(1);
        exit(code);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let layer = fmt::layer().compact().with_writer(std::io::stderr);
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry().with(layer).with(filter).init();
}

fn run(cli: Cli) -> Result<()> {
    let paths = match cli.root {
        Some(root) => BackupPaths::with_root(root),
        None => BackupPaths::new().context("cannot resolve the backup root")?,
    };
    handle_backup_command(&paths, cli.command)?;
    Ok(())
}
