//! deploy-indexes - MongoDB index deployment orchestrator
//!
//! Executes every `.js` file in a scripts directory through mongosh, in
//! file-name order, after verifying the shell is installed and the cluster
//! is reachable. Every step is logged to the console and a per-run log file.
//!
//! Exit codes: 0 on full success, 1 on any pre-flight, discovery, or script
//! failure, 130 when interrupted.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

mod config;
mod deploy;
mod discover;
mod exec;
mod logging;

use config::DeployConfig;
use deploy::{Deployer, SECTION_RULE};

const EXIT_FAILURE: i32 = 1;
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Parser, Debug)]
#[command(
    name = "deploy-indexes",
    version,
    about = "Deploy MongoDB indexes by running mongosh scripts"
)]
struct Cli {
    /// Directory containing .js index scripts (falls back to INDEXES_DIRECTORY)
    #[arg(long, value_name = "DIR")]
    scripts_dir: Option<PathBuf>,

    /// Directory for per-run log files
    #[arg(long, value_name = "DIR", default_value = config::DEFAULT_LOG_DIR)]
    log_dir: PathBuf,

    /// Name or path of the mongosh binary
    #[arg(long, value_name = "BIN", default_value = config::DEFAULT_MONGOSH_BIN)]
    mongosh_bin: String,

    /// Extra arguments appended to every mongosh invocation (shell-quoted)
    #[arg(long, value_name = "ARGS")]
    mongosh_args: Option<String>,

    /// Write a machine-readable run summary JSON to this path
    #[arg(long, value_name = "PATH")]
    summary_out: Option<PathBuf>,

    /// Run the pre-flight checks and list scripts without executing anything
    #[arg(long)]
    dry_run: bool,
}

fn main() {
    let cli = Cli::parse();

    let log_path = match logging::init(&cli.log_dir) {
        Ok(path) => path,
        Err(err) => {
            eprintln!("failed to initialize logging: {err:#}");
            std::process::exit(EXIT_FAILURE);
        }
    };

    let interrupt = Arc::new(AtomicBool::new(false));
    {
        let interrupt = Arc::clone(&interrupt);
        if let Err(err) = ctrlc::set_handler(move || interrupt.store(true, Ordering::SeqCst)) {
            warn!("could not register interrupt handler: {err}");
        }
    }

    info!("{SECTION_RULE}");
    info!("MongoDB index deployment started");
    info!("logging to {}", log_path.display());
    info!("{SECTION_RULE}");

    match run(&cli, &interrupt) {
        Ok(true) => {}
        Ok(false) => {
            if interrupt.load(Ordering::SeqCst) {
                warn!("deployment interrupted by user");
                std::process::exit(EXIT_INTERRUPTED);
            }
            std::process::exit(EXIT_FAILURE);
        }
        Err(err) => {
            error!("fatal error during deployment: {err:#}");
            std::process::exit(EXIT_FAILURE);
        }
    }
}

/// The full workflow. `Ok(true)` means every script succeeded; expected
/// operational failures come back as `Ok(false)` after being logged, and
/// `Err` is reserved for unexpected conditions.
fn run(cli: &Cli, interrupt: &Arc<AtomicBool>) -> Result<bool> {
    let config = DeployConfig::resolve(
        cli.scripts_dir.clone(),
        cli.mongosh_bin.clone(),
        cli.mongosh_args.as_deref(),
    )?;

    let deployer = Deployer::new(&config, Arc::clone(interrupt));

    if !deployer.check_mongosh() {
        error!("MongoDB Shell (mongosh) is required but not found");
        return Ok(false);
    }

    if !deployer.test_connection() {
        error!("failed to establish MongoDB connection");
        return Ok(false);
    }

    if cli.dry_run {
        return dry_run(&config);
    }

    info!(
        "starting index deployment from directory: {}",
        config.scripts_dir.display()
    );
    let summary = deployer.deploy()?;

    if let Some(path) = &cli.summary_out {
        write_summary(path, &summary)?;
        info!("wrote run summary to {}", path.display());
    }

    if summary.all_succeeded() {
        info!("{SECTION_RULE}");
        info!("index deployment completed successfully");
        info!("{SECTION_RULE}");
        Ok(true)
    } else {
        error!("{SECTION_RULE}");
        error!("index deployment completed with errors");
        error!("{SECTION_RULE}");
        Ok(false)
    }
}

/// List what would run, without executing any script.
fn dry_run(config: &DeployConfig) -> Result<bool> {
    let scripts = discover::find_js_files(&config.scripts_dir)?;
    if scripts.is_empty() {
        error!("no script files found to execute");
        return Ok(false);
    }
    info!("dry run: {} script(s) would be executed", scripts.len());
    Ok(true)
}

fn write_summary(path: &Path, summary: &deploy::DeploySummary) -> Result<()> {
    let json = serde_json::to_string_pretty(summary).context("serialize run summary")?;
    std::fs::write(path, json)
        .with_context(|| format!("write run summary {}", path.display()))?;
    Ok(())
}
