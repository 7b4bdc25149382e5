//! csdr - Chunkserver Disk Replacement
//!
//! Operator command line for swapping the disk under a chunkserver.
//!
//! ```text
//! csdr disks commit disks.yaml                 install the disks document
//! csdr replace-disk -c <ID> -d /dev/sdc        replace the chunkserver's disk
//! csdr replace-disk status [-c <ID>]           show replacement progress
//! csdr replace-disk stop -c <ID>               cancel a replacement
//! ```

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use chunkserver_disk_replace::{
    commit_disks,
    config::ToolConfig,
    remote::{ContainerServiceController, RemoteFormatter, SshExecutor},
    report::render_status,
    Error, FileStore, ReplaceOrchestrator, ReplaceRequest, StopOutcome, Storage,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Chunkserver disk replacement
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Tool configuration file (YAML)
    #[arg(long, env = "CSDR_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Override the state directory
    #[arg(long, env = "CSDR_STATE_DIR", global = true)]
    state_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "warn", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON", global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replace the disk of a chunkserver
    ReplaceDisk(ReplaceDiskArgs),

    /// Manage the disks document
    Disks {
        #[command(subcommand)]
        action: DisksAction,
    },
}

#[derive(Args, Debug)]
#[command(args_conflicts_with_subcommands = true)]
struct ReplaceDiskArgs {
    #[command(subcommand)]
    action: Option<ReplaceAction>,

    /// Chunkserver id
    #[arg(short = 'c', long)]
    chunkserver_id: Option<String>,

    /// New disk device path
    #[arg(short = 'd', long)]
    device: Option<String>,

    /// Do not ask for confirmation
    #[arg(short = 'y', long)]
    yes: bool,

    /// Leave the chunkserver stopped after the new disk is committed
    #[arg(long)]
    no_restart: bool,
}

#[derive(Subcommand, Debug)]
enum ReplaceAction {
    /// Show replacement progress
    Status {
        /// Only this chunkserver
        #[arg(short = 'c', long)]
        chunkserver_id: Option<String>,
    },

    /// Cancel a replacement and revert its bookkeeping
    Stop {
        /// Chunkserver id
        #[arg(short = 'c', long)]
        chunkserver_id: String,

        /// Do not ask for confirmation
        #[arg(short = 'y', long)]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
enum DisksAction {
    /// Validate and install a disks document
    Commit {
        /// Path of the disks document
        file: PathBuf,
    },

    /// Print the installed disks document
    Show,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(&cli);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = e.downcast_ref::<Error>().map(Error::exit_code).unwrap_or(1);
            match e.downcast_ref::<Error>() {
                Some(Error::Cancelled(_)) => eprintln!("{}", e),
                _ => {
                    error!("{:#}", e);
                    eprintln!("Error: {:#}", e);
                }
            }
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    info!(
        "{} v{}",
        chunkserver_disk_replace::NAME,
        chunkserver_disk_replace::VERSION
    );

    let mut config = ToolConfig::load(cli.config.as_deref()).await?;
    if let Some(state_dir) = cli.state_dir {
        config.state_dir = state_dir;
    }
    debug!("Configuration: {:?}", config);

    let store = Arc::new(FileStore::open(&config.state_dir).await?);

    match cli.command {
        Command::Disks { action } => match action {
            DisksAction::Commit { file } => {
                let raw = tokio::fs::read_to_string(&file).await.map_err(|_| {
                    Error::DisksFileNotFound {
                        path: file.display().to_string(),
                    }
                })?;
                let summary = commit_disks(store.as_ref(), &raw).await?;
                println!(
                    "Disks committed: {} added, {} updated, {} removed",
                    summary.added, summary.updated, summary.removed
                );
                for record in &summary.kept_owned {
                    println!(
                        "  kept {}:{} (owned by chunkserver {})",
                        record.host,
                        record.device,
                        record.service_id.as_deref().unwrap_or_default()
                    );
                }
            }
            DisksAction::Show => {
                print!("{}", store.disks_document().await?);
            }
        },

        Command::ReplaceDisk(args) => {
            let orchestrator = build_orchestrator(&config, store.clone());
            match args.action {
                Some(ReplaceAction::Status { chunkserver_id }) => {
                    let tickets = orchestrator.status(chunkserver_id.as_deref()).await?;
                    println!("{}", render_status(&tickets));
                }

                Some(ReplaceAction::Stop { chunkserver_id, yes }) => {
                    if !yes {
                        confirm(&format!(
                            "Stop the disk replacement of chunkserver {}?",
                            chunkserver_id
                        ))
                        .await?;
                    }
                    match orchestrator.stop(&chunkserver_id).await? {
                        StopOutcome::Stopped(ticket) => println!(
                            "Stopped replacement of chunkserver {}: {} restored on {}",
                            ticket.service_id, ticket.old_device, ticket.host
                        ),
                        StopOutcome::NoReplacement => println!(
                            "No disk replacement in progress for chunkserver {}",
                            chunkserver_id
                        ),
                    }
                }

                None => {
                    let service_id = args.chunkserver_id.ok_or(Error::ChunkserverIdRequired)?;
                    let device = args.device.ok_or(Error::DevicePathRequired)?;

                    let old = orchestrator.locate(&service_id).await?;
                    if !args.yes {
                        confirm(&format!(
                            "Replace disk {} of chunkserver {} on {} with {}?",
                            old.device, service_id, old.host, device
                        ))
                        .await?;
                    }

                    let request = ReplaceRequest {
                        service_id,
                        device,
                        restart_service: config.restart_service && !args.no_restart,
                    };
                    let ticket = orchestrator
                        .replace(&request)
                        .await
                        .with_context(|| format!("replace disk of chunkserver {}", request.service_id))?;
                    println!(
                        "Chunkserver {} now uses {} on {}; run `csdr replace-disk status` to follow formatting",
                        ticket.service_id, ticket.new_device, ticket.host
                    );
                }
            }
        }
    }
    Ok(())
}

fn build_orchestrator(config: &ToolConfig, store: Arc<FileStore>) -> ReplaceOrchestrator {
    let executor = Arc::new(SshExecutor::new(config.ssh.clone()));
    let services = Arc::new(ContainerServiceController::new(
        executor.clone(),
        config.service.clone(),
    ));
    let formatter = Arc::new(RemoteFormatter::new(executor.clone(), config.format.clone()));

    info!("State directory: {:?}", store.root_path());
    ReplaceOrchestrator::new(store, executor, services, formatter)
        .with_uuid_rewrite(config.format.uuid_rewrite.clone())
}

/// Ask a yes/no question on the terminal
async fn confirm(question: &str) -> chunkserver_disk_replace::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout
        .write_all(format!("{} [y/N]: ", question).as_bytes())
        .await?;
    stdout.flush().await?;

    let mut answer = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut answer)
        .await?;

    match answer.trim().to_lowercase().as_str() {
        "y" | "yes" => Ok(()),
        _ => Err(Error::Cancelled("declined at confirmation prompt".to_string())),
    }
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(cli: &Cli) {
    let level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if cli.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
