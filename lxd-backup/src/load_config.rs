/// `load_config` module: Loads the YAML run configuration, resolves repository
/// passwords from the environment, and produces the core [`RunConfig`].
///
/// This module is the only place where the user-supplied YAML is parsed.
///
/// # Responsibilities
/// - Parse the config file into the YAML-side structs below
/// - Resolve `password_env` references against the process environment
/// - Fill in defaults (two workers per stage, work dir `.`) and map everything
///   onto [`RunConfig`], which the core threads through every stage
///
/// # Errors
/// All errors surface as `anyhow::Error` at the CLI boundary. Missing or
/// inconsistent values are reported as [`BackupError::ConfigFailure`].
use anyhow::Result;
use lxd_backup_core::config::{RunConfig, StageWorkers, DEFAULT_WORKERS};
use lxd_backup_core::contract::Repository;
use lxd_backup_core::error::BackupError;
use lxd_backup_core::pipeline::DEFAULT_CHANNEL_CAPACITY;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info};

#[derive(Debug, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub blacklist: Vec<String>,
    #[serde(default)]
    pub backup_restic_repos: Vec<RepositorySection>,
    #[serde(default)]
    pub restore_restic_repo: Option<RepositorySection>,
    #[serde(default = "default_workers")]
    pub local_workers: usize,
    /// Per-stage worker overrides, keyed by stage name.
    #[serde(default)]
    pub workers: HashMap<String, usize>,
    #[serde(default)]
    pub repository_concurrency: Option<usize>,
    #[serde(default)]
    pub remote_concurrency: Option<usize>,
    #[serde(default)]
    pub stage_timeout_secs: Option<u64>,
    #[serde(default)]
    pub snapshot_tag: Option<String>,
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
    #[serde(default)]
    pub channel_size: Option<usize>,
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

/// A restic repository as written in the config: the password inline, or the
/// name of the environment variable holding it.
#[derive(Debug, Deserialize)]
pub struct RepositorySection {
    pub path: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub password_env: Option<String>,
}

impl RepositorySection {
    pub fn resolve(&self) -> Result<Repository, BackupError> {
        let password = match (&self.password_env, &self.password) {
            (Some(var), _) => std::env::var(var).map_err(|_| {
                BackupError::config(format!(
                    "repository {}: environment variable {var} is not set",
                    self.path
                ))
            })?,
            (None, Some(password)) => password.clone(),
            (None, None) => {
                return Err(BackupError::config(format!(
                    "repository {}: no password or password_env given",
                    self.path
                )))
            }
        };
        Ok(Repository::new(self.path.clone(), password))
    }
}

impl FileConfig {
    /// Map onto the core configuration. Environment lookups happen here.
    pub fn into_run_config(self) -> Result<RunConfig, BackupError> {
        let backup_repositories = self
            .backup_restic_repos
            .iter()
            .map(RepositorySection::resolve)
            .collect::<Result<Vec<_>, _>>()?;
        let restore_repository = self
            .restore_restic_repo
            .as_ref()
            .map(RepositorySection::resolve)
            .transpose()?;

        Ok(RunConfig {
            work_dir: self.work_dir.unwrap_or_else(|| PathBuf::from(".")),
            hosts: self.hosts,
            blacklist: self.blacklist,
            backup_repositories,
            restore_repository,
            snapshot_tag: self.snapshot_tag.filter(|t| !t.trim().is_empty()),
            workers: StageWorkers {
                default: self.local_workers.max(1),
                overrides: self.workers,
            },
            repository_concurrency: self.repository_concurrency,
            remote_concurrency: self.remote_concurrency,
            stage_timeout: self.stage_timeout_secs.map(Duration::from_secs),
            channel_size: self.channel_size.unwrap_or(DEFAULT_CHANNEL_CAPACITY).max(1),
        })
    }
}

/// Parse YAML text into a [`RunConfig`].
pub fn parse_config(content: &str) -> Result<RunConfig> {
    let raw: FileConfig = match serde_yaml::from_str(content) {
        Ok(conf) => conf,
        Err(e) => {
            error!(error = ?e, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };
    Ok(raw.into_run_config()?)
}

/// Loads the YAML config file at `path` and resolves it into a [`RunConfig`].
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<RunConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => {
            info!(config_path = ?path_ref, "Config file read successfully");
            content
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    let config = parse_config(&config_content)?;
    info!(config_path = ?path_ref, "Parsed config YAML successfully");
    Ok(config)
}
