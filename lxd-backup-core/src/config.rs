use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::contract::Repository;
use crate::target::Target;

pub const DEFAULT_WORKERS: usize = 2;

/// Everything a run needs, resolved once at startup and passed down explicitly.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub work_dir: PathBuf,
    pub hosts: Vec<String>,
    pub blacklist: Vec<String>,
    pub backup_repositories: Vec<Repository>,
    pub restore_repository: Option<Repository>,
    /// Constant snapshot tag; a tag is generated per run when `None`.
    pub snapshot_tag: Option<String>,
    pub workers: StageWorkers,
    /// Concurrent destination calls per item in the store stage.
    pub repository_concurrency: Option<usize>,
    /// Concurrent hosts listed during remote enumeration.
    pub remote_concurrency: Option<usize>,
    pub stage_timeout: Option<Duration>,
    pub channel_size: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("."),
            hosts: Vec::new(),
            blacklist: Vec::new(),
            backup_repositories: Vec::new(),
            restore_repository: None,
            snapshot_tag: None,
            workers: StageWorkers::default(),
            repository_concurrency: None,
            remote_concurrency: None,
            stage_timeout: None,
            channel_size: crate::pipeline::DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl RunConfig {
    pub fn trace_loaded(&self) {
        info!(
            work_dir = %self.work_dir.display(),
            hosts = self.hosts.len(),
            blacklist = self.blacklist.len(),
            backup_repositories = self.backup_repositories.len(),
            restore_repository = self.restore_repository.is_some(),
            default_workers = self.workers.default,
            "Loaded RunConfig"
        );
        debug!(?self, "RunConfig loaded (full debug)");
    }

    /// Force every stage down to one worker and one-slot queues.
    pub fn sequential(mut self) -> Self {
        self.workers = StageWorkers {
            default: 1,
            overrides: HashMap::new(),
        };
        self.channel_size = 1;
        self
    }

    pub fn remote_targets(&self) -> Vec<Target> {
        self.hosts.iter().map(|h| Target::from_host(Some(h))).collect()
    }
}

/// Worker count per stage name, falling back to `default`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageWorkers {
    pub default: usize,
    #[serde(default)]
    pub overrides: HashMap<String, usize>,
}

impl Default for StageWorkers {
    fn default() -> Self {
        Self {
            default: DEFAULT_WORKERS,
            overrides: HashMap::new(),
        }
    }
}

impl StageWorkers {
    pub fn uniform(workers: usize) -> Self {
        Self {
            default: workers.max(1),
            overrides: HashMap::new(),
        }
    }

    pub fn with(mut self, stage: &str, workers: usize) -> Self {
        self.overrides.insert(stage.to_string(), workers);
        self
    }

    pub fn for_stage(&self, stage: &str) -> usize {
        self.overrides.get(stage).copied().unwrap_or(self.default).max(1)
    }
}
