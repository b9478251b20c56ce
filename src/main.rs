use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tracing::{error, warn};

use backup_fetch::config::paths::AppPaths;
use backup_fetch::logging;
use backup_fetch::orchestrator::{self, Services, SystemClock};

#[derive(Parser)]
#[command(
    name = "backup-fetch",
    version,
    about = "Trigger a remote CMS backup and pull the archive to local storage",
    long_about = "backup-fetch starts the remote backup job, downloads the resulting \
                  archive over FTPS or SFTP, deletes it from the web space, rotates \
                  short-term and long-term local copies and emails a completion notice. \
                  Each invocation runs exactly one backup cycle."
)]
struct Cli {
    /// Settings file (YAML, or JSON when it ends in .json)
    #[arg(short, long, env = "BACKUP_FETCH_CONFIG")]
    config: Option<PathBuf>,

    /// Persistent log file
    #[arg(long, env = "BACKUP_FETCH_LOG")]
    log_file: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config_path = match setup(&cli) {
        Ok(path) => path,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    match orchestrator::run(&config_path, &SystemClock, Services::production) {
        Ok(report) => {
            if !report.archive.remote_deleted {
                warn!("{} is still on the server", report.archive.remote_path);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// Resolve paths and install logging, returning the settings file to use
fn setup(cli: &Cli) -> Result<PathBuf> {
    let paths = AppPaths::new().context("Failed to resolve default paths")?;

    let log_file = cli.log_file.clone().unwrap_or_else(|| paths.log_file());
    logging::init(Some(&log_file), cli.verbose).context("Failed to set up logging")?;

    Ok(cli.config.clone().unwrap_or_else(|| paths.settings_file()))
}
