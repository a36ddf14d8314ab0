//! # contract: interfaces to the external tools the pipelines drive
//!
//! The pipelines never talk to `lxc`, `zstd` or `restic` directly. They go
//! through the three traits below, which are implemented by the command-backed
//! clients in [`crate::lxc`], [`crate::zstd`] and [`crate::restic`] and by
//! `mockall` mocks in tests.
//!
//! ## Contract
//! - Every call is a single blocking step from the caller's point of view: the
//!   future resolves once the external command has exited.
//! - Failures carry the tool's stderr in a [`BackupError`].
//! - Calls may leave partial side effects behind on failure. Stage operations
//!   clean up their own transient files, nothing else is rolled back.
//!
//! ## Mocking & Testing
//! - The traits are annotated for `mockall` (feature `test-export-mocks`, on by
//!   default) so integration tests can script collaborator behaviour.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;
use serde::{Deserialize, Serialize};

use crate::error::BackupError;
use crate::lxc::LxcCli;
use crate::restic::ResticCli;
use crate::target::Target;
use crate::zstd::ZstdCli;

/// LXD status code for a running container.
pub const STATUS_RUNNING: i64 = 103;

/// A container as reported by `lxc list --format json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub name: String,
    #[serde(default)]
    pub status_code: i64,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub snapshots: Vec<SnapshotInfo>,
}

impl ContainerInfo {
    pub fn is_running(&self) -> bool {
        self.status_code == STATUS_RUNNING
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub name: String,
}

/// An image as reported by `lxc image list --format json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub fingerprint: String,
}

// lxc emits `"snapshots": null` for containers without snapshots.
fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<SnapshotInfo>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<SnapshotInfo>>::deserialize(deserializer)?.unwrap_or_default())
}

/// A restic repository: location plus the password handed to restic through its environment.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub path: String,
    pub password: String,
}

impl Repository {
    pub fn new(path: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("path", &self.path)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl std::fmt::Display for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path)
    }
}

/// The container platform (`lxc`).
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ContainerPlatform: Send + Sync {
    async fn list_containers(&self, target: &Target) -> Result<Vec<ContainerInfo>, BackupError>;

    async fn list_images(&self, target: &Target) -> Result<Vec<ImageInfo>, BackupError>;

    async fn create_snapshot(
        &self,
        container: &str,
        tag: &str,
        target: &Target,
    ) -> Result<(), BackupError>;

    async fn delete_snapshot(
        &self,
        container: &str,
        tag: &str,
        target: &Target,
    ) -> Result<(), BackupError>;

    /// Publish `container/tag` as an image aliased `alias`.
    ///
    /// The snapshot is read from `source`; the image lands in `destination`'s image store.
    async fn publish_image(
        &self,
        container: &str,
        tag: &str,
        alias: &str,
        source: &Target,
        destination: &Target,
    ) -> Result<(), BackupError>;

    /// Copy image `alias` from `source`'s image store to `destination`'s, keeping the alias.
    async fn copy_image(
        &self,
        alias: &str,
        source: &Target,
        destination: &Target,
    ) -> Result<(), BackupError>;

    /// Export image `alias` to `path` (which must end in `.tar`).
    async fn export_image(&self, alias: &str, path: &Path) -> Result<(), BackupError>;

    async fn delete_image(&self, alias: &str, target: &Target) -> Result<(), BackupError>;

    async fn import_image(&self, path: &Path, alias: &str, target: &Target) -> Result<(), BackupError>;

    async fn launch_container(&self, alias: &str, name: &str, target: &Target) -> Result<(), BackupError>;

    async fn delete_container(&self, name: &str, target: &Target, force: bool) -> Result<(), BackupError>;
}

/// The compression tool (`zstd`).
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Compressor: Send + Sync {
    /// Compress `source` into `destination`, leaving `source` in place.
    async fn compress(&self, source: &Path, destination: &Path) -> Result<(), BackupError>;

    /// Decompress `source` into `destination`, leaving `source` in place.
    async fn decompress(&self, source: &Path, destination: &Path) -> Result<(), BackupError>;
}

/// The backup-storage tool (`restic`). Credentials travel in the child environment only.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait RepositoryClient: Send + Sync {
    async fn check(&self, repository: &Repository) -> Result<(), BackupError>;

    /// Store `path` in `repository`.
    async fn backup(&self, repository: &Repository, path: &Path) -> Result<(), BackupError>;

    /// Retrieve the latest stored copy of `file_name` into `target_dir`.
    async fn restore(
        &self,
        repository: &Repository,
        file_name: &str,
        target_dir: &Path,
    ) -> Result<(), BackupError>;
}

/// The three external tools a run talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub platform: Arc<dyn ContainerPlatform>,
    pub compressor: Arc<dyn Compressor>,
    pub repositories: Arc<dyn RepositoryClient>,
}

impl Collaborators {
    /// `lxc`, `zstd` and `restic` from `PATH`.
    pub fn command_line() -> Self {
        Self {
            platform: Arc::new(LxcCli::default()),
            compressor: Arc::new(ZstdCli::default()),
            repositories: Arc::new(ResticCli::default()),
        }
    }
}
