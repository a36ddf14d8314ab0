//! # restore: repository → work dir → image → running container
//!
//! Stages, in order: `restore`, `decompress`, `delete-compressed`, `import`,
//! `delete-archive`, `start`, `delete-image`. Every [`RestoreItem`] carries the
//! name it is restored as and the host it lands on, so remote restores reuse
//! the same operations with a different [`Target`].
//!
//! As in the backup pipeline, an operation that fails or times out removes the
//! work-dir files of its item, so a dropped item leaves nothing behind.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::backup::{remove_quietly, RemoveArtifact};
use crate::config::RunConfig;
use crate::contract::{Collaborators, Compressor, ContainerPlatform, Repository, RepositoryClient};
use crate::error::BackupError;
use crate::item::RestoreItem;
use crate::pipeline::{Operation, Pipeline, PipelineRun, Stage, StageConfig};
use crate::report::OutcomeReporter;

pub const RESTORE_STAGE: &str = "restore";
pub const DECOMPRESS_STAGE: &str = "decompress";
pub const DELETE_COMPRESSED_STAGE: &str = "delete-compressed";
pub const IMPORT_STAGE: &str = "import";
pub const DELETE_ARCHIVE_STAGE: &str = "delete-archive";
pub const START_STAGE: &str = "start";
pub const DELETE_IMAGE_STAGE: &str = "delete-image";

/// Fetch the latest `<source>.tar.zst` from the restore repository.
pub struct FetchOp {
    client: Arc<dyn RepositoryClient>,
    repository: Repository,
    work_dir: PathBuf,
}

#[async_trait]
impl Operation<RestoreItem> for FetchOp {
    async fn apply(&self, item: &mut RestoreItem) -> Result<(), BackupError> {
        let result = self
            .client
            .restore(&self.repository, &item.compressed_name(), &self.work_dir)
            .await;
        if result.is_err() {
            self.abort(item).await;
        }
        result
    }

    async fn abort(&self, item: &RestoreItem) {
        remove_quietly(&self.work_dir.join(item.compressed_name())).await;
    }
}

/// `<source>.tar.zst` → `<source>.tar`. A missing input is an operation failure.
pub struct DecompressOp {
    compressor: Arc<dyn Compressor>,
    work_dir: PathBuf,
}

#[async_trait]
impl Operation<RestoreItem> for DecompressOp {
    async fn apply(&self, item: &mut RestoreItem) -> Result<(), BackupError> {
        let compressed = self.work_dir.join(item.compressed_name());
        let archive = self.work_dir.join(item.archive_name());
        let result = self.compressor.decompress(&compressed, &archive).await;
        if result.is_err() {
            self.abort(item).await;
        }
        result
    }

    async fn abort(&self, item: &RestoreItem) {
        remove_quietly(&self.work_dir.join(item.compressed_name())).await;
        remove_quietly(&self.work_dir.join(item.archive_name())).await;
    }
}

/// Import `<source>.tar` as image `<restore_as>` on the item's target.
pub struct ImportOp {
    platform: Arc<dyn ContainerPlatform>,
    work_dir: PathBuf,
}

#[async_trait]
impl Operation<RestoreItem> for ImportOp {
    async fn apply(&self, item: &mut RestoreItem) -> Result<(), BackupError> {
        let archive = self.work_dir.join(item.archive_name());
        let result = self
            .platform
            .import_image(&archive, &item.restore_as, &item.target)
            .await;
        if result.is_err() {
            self.abort(item).await;
        }
        result
    }

    async fn abort(&self, item: &RestoreItem) {
        remove_quietly(&self.work_dir.join(item.archive_name())).await;
    }
}

/// Launch container `<restore_as>` from the image of the same name.
pub struct StartOp {
    platform: Arc<dyn ContainerPlatform>,
}

#[async_trait]
impl Operation<RestoreItem> for StartOp {
    async fn apply(&self, item: &mut RestoreItem) -> Result<(), BackupError> {
        self.platform
            .launch_container(&item.restore_as, &item.restore_as, &item.target)
            .await?;
        info!(container = %item.restore_as, host = %item.target, source = item.source_name(), "[RESTORE] container launched");
        Ok(())
    }
}

pub struct DeleteImageOp {
    platform: Arc<dyn ContainerPlatform>,
}

#[async_trait]
impl Operation<RestoreItem> for DeleteImageOp {
    async fn apply(&self, item: &mut RestoreItem) -> Result<(), BackupError> {
        self.platform.delete_image(&item.restore_as, &item.target).await
    }
}

/// Assemble the seven restore stages reading from `repository`.
pub fn restore_pipeline(
    config: &RunConfig,
    repository: Repository,
    collaborators: &Collaborators,
    reporter: Arc<dyn OutcomeReporter>,
) -> Pipeline<RestoreItem> {
    let stage = |name: &str| {
        StageConfig::new(name, config.workers.for_stage(name)).with_timeout(config.stage_timeout)
    };
    let work_dir = config.work_dir.clone();
    let platform = &collaborators.platform;

    Pipeline::new(reporter)
        .with_channel_size(config.channel_size)
        .add_stage(Stage::new(
            stage(RESTORE_STAGE),
            FetchOp {
                client: collaborators.repositories.clone(),
                repository,
                work_dir: work_dir.clone(),
            },
        ))
        .add_stage(Stage::new(
            stage(DECOMPRESS_STAGE),
            DecompressOp {
                compressor: collaborators.compressor.clone(),
                work_dir: work_dir.clone(),
            },
        ))
        .add_stage(Stage::new(
            stage(DELETE_COMPRESSED_STAGE),
            RemoveArtifact::new(work_dir.clone(), RestoreItem::compressed_name),
        ))
        .add_stage(Stage::new(
            stage(IMPORT_STAGE),
            ImportOp {
                platform: platform.clone(),
                work_dir: work_dir.clone(),
            },
        ))
        .add_stage(Stage::new(
            stage(DELETE_ARCHIVE_STAGE),
            RemoveArtifact::new(work_dir, RestoreItem::archive_name),
        ))
        .add_stage(Stage::new(
            stage(START_STAGE),
            StartOp {
                platform: platform.clone(),
            },
        ))
        .add_stage(Stage::new(
            stage(DELETE_IMAGE_STAGE),
            DeleteImageOp {
                platform: platform.clone(),
            },
        ))
}

/// Restore `items` from the configured restore repository.
pub async fn run_restore(
    config: &RunConfig,
    collaborators: &Collaborators,
    items: Vec<RestoreItem>,
    reporter: Arc<dyn OutcomeReporter>,
) -> Result<PipelineRun<RestoreItem>, BackupError> {
    let repository = config
        .restore_repository
        .clone()
        .ok_or_else(|| BackupError::config("no restore repository configured"))?;
    info!(items = items.len(), repository = %repository, "[RESTORE] starting");
    Ok(restore_pipeline(config, repository, collaborators, reporter)
        .run(items)
        .await)
}
