//! # backup: snapshot → publish → export → compress → store → cleanup
//!
//! Stage operations for the backup pipeline and the function that assembles
//! them. Every operation works on one [`WorkItem`] and branches on the item's
//! origin ([`Target::Local`] or [`Target::Remote`]) instead of duplicating
//! control flow per host kind.
//!
//! Transient files live in the configured work dir as `<name>.tar` and
//! `<name>.tar.zst`. An operation that fails, or runs past the stage deadline,
//! removes what it produced itself; the terminal `cleanup` stage removes the compressed archive of every item
//! that made it through the store stage.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::RunConfig;
use crate::contract::{Collaborators, Compressor, ContainerPlatform, Repository, RepositoryClient};
use crate::error::BackupError;
use crate::item::{PipelineItem, WorkItem};
use crate::pipeline::{FanOutStage, Operation, Pipeline, PipelineRun, Stage, StageConfig, TargetOperation};
use crate::report::OutcomeReporter;
use crate::source::{generate_snapshot_tag, SourceEnumerator};
use crate::target::Target;

pub const SNAPSHOT_STAGE: &str = "snapshot";
pub const PUBLISH_STAGE: &str = "publish";
pub const EXPORT_STAGE: &str = "export";
pub const COMPRESS_STAGE: &str = "compress";
pub const STORE_STAGE: &str = "store";
pub const CLEANUP_STAGE: &str = "cleanup";

/// Where the containers to back up come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupSource {
    Local,
    /// The configured remote hosts.
    Remote,
}

/// Delete-then-create the item's snapshot.
pub struct SnapshotOp {
    platform: Arc<dyn ContainerPlatform>,
}

#[async_trait]
impl Operation<WorkItem> for SnapshotOp {
    async fn apply(&self, item: &mut WorkItem) -> Result<(), BackupError> {
        let tag = item.snapshot_tag.clone();
        if item.has_snapshot(&tag) {
            self.platform.delete_snapshot(item.name(), &tag, &item.origin).await?;
            info!(container = item.name(), host = %item.origin, tag = %tag, "[BACKUP] removed stale snapshot");
        }
        self.platform.create_snapshot(item.name(), &tag, &item.origin).await
    }
}

/// Turn the snapshot into an image in the local image store, then drop the snapshot.
///
/// Remote snapshots are published on their own host and the image is copied
/// over, so the heavy lifting happens where the storage lives.
pub struct PublishOp {
    platform: Arc<dyn ContainerPlatform>,
}

impl PublishOp {
    async fn publish(&self, item: &WorkItem) -> Result<(), BackupError> {
        let (name, tag) = (item.name(), item.snapshot_tag.as_str());
        match &item.origin {
            Target::Local => {
                self.platform
                    .publish_image(name, tag, name, &Target::Local, &Target::Local)
                    .await
            }
            remote @ Target::Remote(_) => {
                self.platform.publish_image(name, tag, name, remote, remote).await?;
                let copied = self.platform.copy_image(name, remote, &Target::Local).await;
                let removed = self.platform.delete_image(name, remote).await;
                copied?;
                removed
            }
        }
    }
}

#[async_trait]
impl Operation<WorkItem> for PublishOp {
    async fn apply(&self, item: &mut WorkItem) -> Result<(), BackupError> {
        let published = self.publish(item).await;
        let removed = self
            .platform
            .delete_snapshot(item.name(), &item.snapshot_tag, &item.origin)
            .await;
        published?;
        removed
    }
}

/// Export the local image to `<name>.tar` and delete the image.
pub struct ExportOp {
    platform: Arc<dyn ContainerPlatform>,
    work_dir: PathBuf,
}

#[async_trait]
impl Operation<WorkItem> for ExportOp {
    async fn apply(&self, item: &mut WorkItem) -> Result<(), BackupError> {
        let archive = self.work_dir.join(item.archive_name());
        let exported = self.platform.export_image(item.name(), &archive).await;
        let removed = self.platform.delete_image(item.name(), &Target::Local).await;
        if exported.is_err() || removed.is_err() {
            remove_quietly(&archive).await;
        }
        exported?;
        removed
    }

    async fn abort(&self, item: &WorkItem) {
        remove_quietly(&self.work_dir.join(item.archive_name())).await;
    }
}

/// Compress `<name>.tar` into `<name>.tar.zst` and delete the tarball.
pub struct CompressOp {
    compressor: Arc<dyn Compressor>,
    work_dir: PathBuf,
}

#[async_trait]
impl Operation<WorkItem> for CompressOp {
    async fn apply(&self, item: &mut WorkItem) -> Result<(), BackupError> {
        let archive = self.work_dir.join(item.archive_name());
        let compressed = self.work_dir.join(item.compressed_name());
        if let Err(err) = self.compressor.compress(&archive, &compressed).await {
            remove_quietly(&archive).await;
            remove_quietly(&compressed).await;
            return Err(err);
        }
        if let Err(err) = remove_file("delete-archive", &archive).await {
            remove_quietly(&compressed).await;
            return Err(err);
        }
        Ok(())
    }

    async fn abort(&self, item: &WorkItem) {
        remove_quietly(&self.work_dir.join(item.archive_name())).await;
        remove_quietly(&self.work_dir.join(item.compressed_name())).await;
    }
}

/// Store `<name>.tar.zst` in one repository.
pub struct StoreOp {
    client: Arc<dyn RepositoryClient>,
    work_dir: PathBuf,
}

#[async_trait]
impl TargetOperation<WorkItem, Repository> for StoreOp {
    async fn apply(&self, item: &WorkItem, repository: &Repository) -> Result<(), BackupError> {
        let compressed = self.work_dir.join(item.compressed_name());
        self.client.backup(repository, &compressed).await
    }
}

/// Delete one transient file belonging to the item.
pub struct RemoveArtifact<T> {
    work_dir: PathBuf,
    file_name: fn(&T) -> String,
    _item: PhantomData<fn(&T)>,
}

impl<T> RemoveArtifact<T> {
    pub fn new(work_dir: impl Into<PathBuf>, file_name: fn(&T) -> String) -> Self {
        Self {
            work_dir: work_dir.into(),
            file_name,
            _item: PhantomData,
        }
    }
}

#[async_trait]
impl<T: PipelineItem> Operation<T> for RemoveArtifact<T> {
    async fn apply(&self, item: &mut T) -> Result<(), BackupError> {
        let path = self.work_dir.join((self.file_name)(item));
        remove_file("delete-artifact", &path).await
    }
}

pub(crate) async fn remove_file(operation: &str, path: &Path) -> Result<(), BackupError> {
    tokio::fs::remove_file(path)
        .await
        .map_err(|e| BackupError::operation(operation, format!("{}: {e}", path.display())))
}

/// Best-effort removal of a file left behind by a failed operation.
pub(crate) async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => info!(path = %path.display(), "removed partial artifact"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "could not remove partial artifact"),
    }
}

/// Assemble the six backup stages for `config`, all items tagged `snapshot_tag`.
pub fn backup_pipeline(
    config: &RunConfig,
    collaborators: &Collaborators,
    reporter: Arc<dyn OutcomeReporter>,
) -> Pipeline<WorkItem> {
    let stage = |name: &str| {
        StageConfig::new(name, config.workers.for_stage(name)).with_timeout(config.stage_timeout)
    };
    let work_dir = config.work_dir.clone();

    let mut store = FanOutStage::new(
        stage(STORE_STAGE),
        config.backup_repositories.clone(),
        StoreOp {
            client: collaborators.repositories.clone(),
            work_dir: work_dir.clone(),
        },
    );
    if let Some(cap) = config.repository_concurrency {
        store = store.with_max_parallel(cap);
    }

    Pipeline::new(reporter)
        .with_channel_size(config.channel_size)
        .add_stage(Stage::new(
            stage(SNAPSHOT_STAGE),
            SnapshotOp {
                platform: collaborators.platform.clone(),
            },
        ))
        .add_stage(Stage::new(
            stage(PUBLISH_STAGE),
            PublishOp {
                platform: collaborators.platform.clone(),
            },
        ))
        .add_stage(Stage::new(
            stage(EXPORT_STAGE),
            ExportOp {
                platform: collaborators.platform.clone(),
                work_dir: work_dir.clone(),
            },
        ))
        .add_stage(Stage::new(
            stage(COMPRESS_STAGE),
            CompressOp {
                compressor: collaborators.compressor.clone(),
                work_dir: work_dir.clone(),
            },
        ))
        .add_stage(store)
        .add_stage(Stage::new(
            stage(CLEANUP_STAGE),
            RemoveArtifact::new(work_dir, WorkItem::compressed_name),
        ))
}

/// Enumerate containers from `source` and push them through the backup pipeline.
///
/// Only a failed local listing (or a remote run without hosts) is an error;
/// per-item failures are reported through `reporter` and the run carries on.
pub async fn run_backup(
    config: &RunConfig,
    collaborators: &Collaborators,
    source: BackupSource,
    reporter: Arc<dyn OutcomeReporter>,
) -> Result<PipelineRun<WorkItem>, BackupError> {
    let snapshot_tag = config.snapshot_tag.clone().unwrap_or_else(generate_snapshot_tag);
    info!(tag = %snapshot_tag, source = ?source, "[BACKUP] starting");

    let enumerator = SourceEnumerator::new(
        collaborators.platform.clone(),
        &config.blacklist,
        snapshot_tag,
        reporter.clone(),
    );
    let pipeline = backup_pipeline(config, collaborators, reporter);

    match source {
        BackupSource::Local => {
            let items = enumerator.enumerate_local().await?;
            Ok(pipeline.run(items).await)
        }
        BackupSource::Remote => {
            let hosts = config.remote_targets();
            if hosts.is_empty() {
                return Err(BackupError::config("no hosts configured, nothing to back up"));
            }
            let concurrency = config.remote_concurrency.unwrap_or(hosts.len());
            let (tx, rx) = flume::bounded(config.channel_size.max(1));
            let (pushed, run) = tokio::join!(
                enumerator.enumerate_remote(&hosts, concurrency, tx),
                pipeline.run_from(rx)
            );
            info!(enumerated = pushed, completed = run.completed.len(), "[BACKUP] remote run finished");
            Ok(run)
        }
    }
}
