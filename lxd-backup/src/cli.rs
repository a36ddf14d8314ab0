//! # lxd-backup CLI interface
//!
//! Argument parsing, run orchestration, and the printed run report. All
//! pipeline logic lives in `lxd-backup-core`; this module only decides which
//! pipeline to run, with which configuration and collaborators.
//!
//! A run goes: load config → check repositories (fatal) → optional local
//! cleanup → backup or restore pipeline → JSON report on stdout. Per-container
//! failures are part of the report, not of the exit status.

use crate::load_config::load_config;
use anyhow::Result;
use clap::{Parser, ValueEnum};
use lxd_backup_core::backup::{run_backup, BackupSource};
use lxd_backup_core::cleanup::{check_repositories, cleanup_local, CleanupReport};
use lxd_backup_core::config::RunConfig;
use lxd_backup_core::contract::Collaborators;
use lxd_backup_core::error::BackupError;
use lxd_backup_core::item::PipelineItem;
use lxd_backup_core::report::{CompositeReporter, MemoryReporter, OutcomeReporter, RunSummary, TracingReporter};
use lxd_backup_core::restore::run_restore;
use lxd_backup_core::source::{parse_restore_list, restore_items, RestoreMapping};
use lxd_backup_core::target::Target;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Backup,
    Restore,
}

/// Back up and restore LXD containers through lxc, zstd and restic.
#[derive(Parser, Debug)]
#[clap(
    name = "lxd-backup",
    version,
    about = "Back up LXD containers to restic repositories, or restore them"
)]
pub struct Cli {
    /// Path to the YAML config file
    #[clap(long)]
    pub config: PathBuf,

    #[clap(short = 'a', long, value_enum)]
    pub action: Action,

    /// Back up the containers of this host instead of the configured hosts
    #[clap(long)]
    pub local: bool,

    /// Use the configured worker counts; otherwise every stage runs one worker
    #[clap(long)]
    pub concurrently: bool,

    /// Delete every local container and image before running
    #[clap(long)]
    pub cleanup: bool,

    /// Host to restore onto (default: this host)
    #[clap(long)]
    pub remote_host: Option<String>,

    /// Container to restore
    #[clap(long)]
    pub container: Option<String>,

    /// Name to restore `--container` as (default: its own name)
    #[clap(long = "as")]
    pub restore_as: Option<String>,

    /// File of `name:restoreAs` lines to restore
    #[clap(long)]
    pub restore_list: Option<PathBuf>,

    /// Default log filter when RUST_LOG is unset
    #[clap(long, default_value = "info")]
    pub log_level: String,
}

/// What a finished run prints.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub action: Action,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanup: Option<CleanupReport>,
    pub completed: Vec<String>,
    pub summary: RunSummary,
}

/// Source-name → restore-name mapping from `--container/--as` or `--restore-list`.
pub fn restore_mapping(cli: &Cli) -> Result<RestoreMapping> {
    if let Some(container) = &cli.container {
        let restore_as = cli.restore_as.clone().unwrap_or_else(|| container.clone());
        return Ok(RestoreMapping::from([(container.clone(), restore_as)]));
    }
    if let Some(list) = &cli.restore_list {
        let content = std::fs::read_to_string(list).map_err(|e| {
            tracing::error!(error = ?e, restore_list = ?list, "Failed to read restore list");
            anyhow::anyhow!("Failed to read restore list {:?}: {}", list, e)
        })?;
        return Ok(parse_restore_list(&content));
    }
    Err(BackupError::config("restore needs --container or --restore-list").into())
}

/// Run the action selected by `cli` with already-loaded configuration.
pub async fn execute(cli: &Cli, config: &RunConfig, collaborators: &Collaborators) -> Result<RunReport> {
    let memory = Arc::new(MemoryReporter::new());
    let reporter: Arc<dyn OutcomeReporter> = Arc::new(
        CompositeReporter::new()
            .with(Arc::new(TracingReporter))
            .with(memory.clone()),
    );

    let (cleanup, completed) = match cli.action {
        Action::Backup => {
            if config.backup_repositories.is_empty() {
                return Err(BackupError::config("no backup_restic_repos configured").into());
            }
            check_repositories(collaborators.repositories.as_ref(), &config.backup_repositories).await?;
            let cleanup = maybe_cleanup(cli, collaborators).await?;
            let source = if cli.local {
                BackupSource::Local
            } else {
                BackupSource::Remote
            };
            let run = run_backup(config, collaborators, source, reporter).await?;
            (cleanup, names(&run.completed))
        }
        Action::Restore => {
            let repository = config
                .restore_repository
                .as_ref()
                .ok_or_else(|| BackupError::config("no restore_restic_repo configured"))?;
            let mapping = restore_mapping(cli)?;
            check_repositories(collaborators.repositories.as_ref(), std::slice::from_ref(repository)).await?;
            let cleanup = maybe_cleanup(cli, collaborators).await?;
            let target = Target::from_host(cli.remote_host.as_deref());
            let run = run_restore(config, collaborators, restore_items(&mapping, &target), reporter).await?;
            (cleanup, names(&run.completed))
        }
    };

    let summary = memory.summary();
    tracing::info!(
        action = ?cli.action,
        completed = completed.len(),
        failed = summary.failed_total(),
        "Run finished"
    );
    Ok(RunReport {
        action: cli.action,
        cleanup,
        completed,
        summary,
    })
}

async fn maybe_cleanup(cli: &Cli, collaborators: &Collaborators) -> Result<Option<CleanupReport>> {
    if !cli.cleanup {
        return Ok(None);
    }
    Ok(Some(cleanup_local(collaborators.platform.as_ref()).await?))
}

fn names<T: PipelineItem>(items: &[T]) -> Vec<String> {
    items.iter().map(|i| i.name().to_string()).collect()
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    // Emit a top-level 'trace_initialised' event at the very start
    tracing::info!("trace_initialised");

    let config = load_config(&cli.config)?;
    let config = if cli.concurrently { config } else { config.sequential() };
    config.trace_loaded();

    match execute(&cli, &config, &Collaborators::command_line()).await {
        Ok(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Err(e) => {
            tracing::error!(action = ?cli.action, error = %e, "Run aborted");
            Err(e)
        }
    }
}
