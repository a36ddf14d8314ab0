//! Run-level operations that happen before any pipeline starts.

use serde::Serialize;
use tracing::{error, info};

use crate::contract::{ContainerPlatform, Repository, RepositoryClient};
use crate::error::BackupError;
use crate::target::Target;

/// How much of the local host was wiped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub containers_deleted: usize,
    pub images_deleted: usize,
    pub failures: usize,
}

/// Force-delete every local container and every local image.
///
/// A listing failure aborts; individual delete failures are logged and
/// counted, and the sweep continues.
pub async fn cleanup_local(platform: &dyn ContainerPlatform) -> Result<CleanupReport, BackupError> {
    let mut report = CleanupReport::default();

    let containers = platform.list_containers(&Target::Local).await?;
    for container in containers {
        match platform.delete_container(&container.name, &Target::Local, true).await {
            Ok(()) => report.containers_deleted += 1,
            Err(err) => {
                error!(container = %container.name, error = %err, "[CLEANUP][ERROR] could not delete container");
                report.failures += 1;
            }
        }
    }

    let images = platform.list_images(&Target::Local).await?;
    for image in images {
        match platform.delete_image(&image.fingerprint, &Target::Local).await {
            Ok(()) => report.images_deleted += 1,
            Err(err) => {
                error!(image = %image.fingerprint, error = %err, "[CLEANUP][ERROR] could not delete image");
                report.failures += 1;
            }
        }
    }

    info!(
        containers = report.containers_deleted,
        images = report.images_deleted,
        failures = report.failures,
        "[CLEANUP] local host wiped"
    );
    Ok(report)
}

/// Check every repository in order. The first unhealthy one aborts the run.
pub async fn check_repositories(
    client: &dyn RepositoryClient,
    repositories: &[Repository],
) -> Result<(), BackupError> {
    for repository in repositories {
        client.check(repository).await.inspect_err(|err| {
            error!(repository = %repository, error = %err, "[CHECK][ERROR] repository unusable");
        })?;
    }
    Ok(())
}
