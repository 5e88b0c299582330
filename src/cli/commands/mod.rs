//! CLI commands implementation.

mod daemon;
mod init;
mod run;
mod target;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{load_settings, LoadOptions};
use crate::models::{JobKind, JobStatus, TargetStatus};
use crate::runtime::Runtime;
use crate::scheduler::Sweep;

#[derive(Parser)]
#[command(name = "comicrawl")]
#[command(about = "Crawl orchestration and catalog sync for comic sources")]
#[command(version)]
pub struct Cli {
    /// Config file (default: discovered comicrawl.{toml,yaml,json})
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory
    #[arg(long, global = true, env = "COMICRAWL_DATA_DIR")]
    data: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory and databases
    Init,

    /// List supported source domains
    Sites,

    /// Manage crawl targets
    Target {
        #[command(subcommand)]
        command: TargetCommands,
    },

    /// Crawl one target
    Run {
        /// Target ID
        id: i64,
        /// Job kind
        #[arg(long, default_value = "full", value_parser = parse_job_kind)]
        kind: JobKind,
        /// Run inline instead of enqueueing
        #[arg(long)]
        now: bool,
    },

    /// Enqueue every target that is not crawling
    RunAll,

    /// List jobs, newest first
    Jobs {
        /// Only jobs of this target
        #[arg(long)]
        target: Option<i64>,
        /// Only jobs in this status
        #[arg(long, value_parser = parse_job_status)]
        status: Option<JobStatus>,
        #[arg(long, default_value = "50")]
        limit: u32,
    },

    /// Run one scheduler sweep now
    Sweep {
        #[arg(value_enum)]
        sweep: Sweep,
    },

    /// Run the scheduler and workers until interrupted
    Daemon,
}

#[derive(Subcommand)]
enum TargetCommands {
    /// Register a target URL
    Add {
        url: String,
        #[arg(long)]
        title: Option<String>,
    },
    /// List targets
    List {
        #[arg(long, value_parser = parse_target_status)]
        status: Option<TargetStatus>,
        #[arg(long, default_value = "100")]
        limit: u32,
    },
    /// Show one target and its recent jobs
    Show { id: i64 },
    /// Change a target's URL or title
    Update {
        id: i64,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        title: Option<String>,
    },
    /// Delete a target and its job history
    Remove { id: i64 },
}

fn parse_job_kind(s: &str) -> Result<JobKind, String> {
    JobKind::from_str(s).ok_or_else(|| format!("unknown job kind '{}' (full, update)", s))
}

fn parse_job_status(s: &str) -> Result<JobStatus, String> {
    JobStatus::from_str(s).ok_or_else(|| {
        format!(
            "unknown job status '{}' (queued, running, succeeded, failed)",
            s
        )
    })
}

fn parse_target_status(s: &str) -> Result<TargetStatus, String> {
    TargetStatus::from_str(s).ok_or_else(|| {
        format!(
            "unknown target status '{}' (pending, crawling, done, error)",
            s
        )
    })
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = LoadOptions {
        config_path: cli.config,
        data_dir: cli.data,
    };
    let (settings, config) = load_settings(options).await?;
    let runtime = Runtime::build(settings, config)?;
    let admin = runtime.admin();

    match cli.command {
        Commands::Init => init::cmd_init(&runtime),
        Commands::Sites => init::cmd_sites(&admin),
        Commands::Target { command } => match command {
            TargetCommands::Add { url, title } => {
                target::cmd_target_add(&admin, &url, title.as_deref())
            }
            TargetCommands::List { status, limit } => {
                target::cmd_target_list(&admin, status, limit)
            }
            TargetCommands::Show { id } => target::cmd_target_show(&admin, id),
            TargetCommands::Update { id, url, title } => {
                target::cmd_target_update(&admin, id, url.as_deref(), title.as_deref())
            }
            TargetCommands::Remove { id } => target::cmd_target_remove(&admin, id),
        },
        Commands::Run { id, kind, now } => {
            let result = run::cmd_run(&admin, id, kind, now).await;
            runtime.close().await;
            result
        }
        Commands::RunAll => run::cmd_run_all(&admin),
        Commands::Jobs {
            target,
            status,
            limit,
        } => run::cmd_jobs(&admin, target, status, limit),
        Commands::Sweep { sweep } => run::cmd_sweep(&admin, sweep),
        Commands::Daemon => daemon::cmd_daemon(&runtime).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_run_with_kind() {
        let cli = Cli::try_parse_from(["comicrawl", "run", "7", "--kind", "update", "--now"]).unwrap();
        match cli.command {
            Commands::Run { id, kind, now } => {
                assert_eq!(id, 7);
                assert_eq!(kind, JobKind::Update);
                assert!(now);
            }
            _ => panic!("expected run"),
        }
        assert!(Cli::try_parse_from(["comicrawl", "run", "7", "--kind", "partial"]).is_err());
    }

    #[test]
    fn parses_sweep_names() {
        let cli = Cli::try_parse_from(["comicrawl", "sweep", "chapter-check"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Sweep {
                sweep: Sweep::ChapterCheck
            }
        ));
    }

    #[test]
    fn parses_status_filters() {
        let cli = Cli::try_parse_from(["comicrawl", "jobs", "--status", "failed"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Jobs {
                status: Some(JobStatus::Failed),
                ..
            }
        ));
        assert!(Cli::try_parse_from(["comicrawl", "target", "list", "--status", "weird"]).is_err());
    }
}
