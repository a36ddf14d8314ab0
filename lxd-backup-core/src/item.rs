//! Work items flowing through the backup and restore pipelines.
//!
//! Items move by value: a stage worker owns an item while it applies an
//! operation and hands it to the next queue afterwards. Nothing else holds a
//! reference to it in the meantime.

use std::time::Duration;

use serde::Serialize;

use crate::target::Target;

/// Time spent by one item in one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageTiming {
    pub stage: String,
    pub duration: Duration,
}

/// Per-item record of the stages passed and the error that ended the run, if any.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Journey {
    timings: Vec<StageTiming>,
    terminal_error: Option<String>,
}

impl Journey {
    pub fn timings(&self) -> &[StageTiming] {
        &self.timings
    }

    pub fn terminal_error(&self) -> Option<&str> {
        self.terminal_error.as_deref()
    }

    pub fn is_failed(&self) -> bool {
        self.terminal_error.is_some()
    }

    pub(crate) fn record(&mut self, stage: &str, duration: Duration) {
        self.timings.push(StageTiming {
            stage: stage.to_string(),
            duration,
        });
    }

    /// Marks the item as dropped. The first error wins.
    pub(crate) fn fail(&mut self, error: impl Into<String>) {
        if self.terminal_error.is_none() {
            self.terminal_error = Some(error.into());
        }
    }

    /// Stage names in the order they were passed.
    pub fn stages(&self) -> Vec<&str> {
        self.timings.iter().map(|t| t.stage.as_str()).collect()
    }
}

/// What a stage needs to know about the items it moves.
pub trait PipelineItem: Send + Sync + 'static {
    /// Identity used as the join key in every log line and outcome record.
    fn name(&self) -> &str;
    fn host(&self) -> &Target;
    fn journey(&self) -> &Journey;
    fn journey_mut(&mut self) -> &mut Journey;
}

/// One container being backed up.
#[derive(Debug, Clone, Serialize)]
pub struct WorkItem {
    name: String,
    pub origin: Target,
    pub snapshot_tag: String,
    /// Snapshot names seen when the container was enumerated.
    pub existing_snapshots: Vec<String>,
    journey: Journey,
}

impl WorkItem {
    pub fn new(name: impl Into<String>, origin: Target, snapshot_tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            origin,
            snapshot_tag: snapshot_tag.into(),
            existing_snapshots: Vec::new(),
            journey: Journey::default(),
        }
    }

    pub fn with_existing_snapshots(mut self, snapshots: Vec<String>) -> Self {
        self.existing_snapshots = snapshots;
        self
    }

    pub fn has_snapshot(&self, tag: &str) -> bool {
        self.existing_snapshots.iter().any(|s| s == tag)
    }

    /// `<name>.tar`, the file produced by the export stage.
    pub fn archive_name(&self) -> String {
        format!("{}.tar", self.name)
    }

    /// `<name>.tar.zst`, the file produced by the compress stage.
    pub fn compressed_name(&self) -> String {
        format!("{}.tar.zst", self.name)
    }
}

impl PipelineItem for WorkItem {
    fn name(&self) -> &str {
        &self.name
    }

    fn host(&self) -> &Target {
        &self.origin
    }

    fn journey(&self) -> &Journey {
        &self.journey
    }

    fn journey_mut(&mut self) -> &mut Journey {
        &mut self.journey
    }
}

/// One container being restored from a repository under a (possibly new) name.
#[derive(Debug, Clone, Serialize)]
pub struct RestoreItem {
    source_name: String,
    pub restore_as: String,
    pub target: Target,
    journey: Journey,
}

impl RestoreItem {
    pub fn new(source_name: impl Into<String>, restore_as: impl Into<String>, target: Target) -> Self {
        Self {
            source_name: source_name.into(),
            restore_as: restore_as.into(),
            target,
            journey: Journey::default(),
        }
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn archive_name(&self) -> String {
        format!("{}.tar", self.source_name)
    }

    pub fn compressed_name(&self) -> String {
        format!("{}.tar.zst", self.source_name)
    }
}

impl PipelineItem for RestoreItem {
    fn name(&self) -> &str {
        &self.source_name
    }

    fn host(&self) -> &Target {
        &self.target
    }

    fn journey(&self) -> &Journey {
        &self.journey
    }

    fn journey_mut(&mut self) -> &mut Journey {
        &mut self.journey
    }
}
