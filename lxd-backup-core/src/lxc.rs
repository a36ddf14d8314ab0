//! [`ContainerPlatform`] backed by the `lxc` command-line client.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::command::{run, tool_command};
use crate::contract::{ContainerInfo, ContainerPlatform, ImageInfo};
use crate::error::BackupError;
use crate::target::Target;

pub struct LxcCli {
    program: PathBuf,
}

impl Default for LxcCli {
    fn default() -> Self {
        Self::new("lxc")
    }
}

impl LxcCli {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn lxc(&self, operation: &str, args: &[&str]) -> Result<Vec<u8>, BackupError> {
        debug!(operation, args = ?args, "lxc");
        let mut cmd = tool_command(&self.program);
        cmd.args(args);
        run(operation, &mut cmd).await
    }
}

/// `lxc image export <alias> <base>` appends `.tar` itself.
fn export_base(path: &Path) -> Result<String, BackupError> {
    let raw = path.to_string_lossy();
    raw.strip_suffix(".tar")
        .map(str::to_string)
        .ok_or_else(|| BackupError::operation("export-image", format!("{raw} does not end in .tar")))
}

#[async_trait]
impl ContainerPlatform for LxcCli {
    async fn list_containers(&self, target: &Target) -> Result<Vec<ContainerInfo>, BackupError> {
        let remote = target.remote_spec();
        let out = self
            .lxc("list-containers", &["list", remote.as_str(), "--format", "json"])
            .await
            .map_err(|e| BackupError::list(target.to_string(), e.to_string()))?;
        serde_json::from_slice(&out)
            .map_err(|e| BackupError::list(target.to_string(), format!("unreadable container list: {e}")))
    }

    async fn list_images(&self, target: &Target) -> Result<Vec<ImageInfo>, BackupError> {
        let remote = target.remote_spec();
        let out = self
            .lxc("list-images", &["image", "list", remote.as_str(), "--format", "json"])
            .await
            .map_err(|e| BackupError::list(target.to_string(), e.to_string()))?;
        serde_json::from_slice(&out)
            .map_err(|e| BackupError::list(target.to_string(), format!("unreadable image list: {e}")))
    }

    async fn create_snapshot(&self, container: &str, tag: &str, target: &Target) -> Result<(), BackupError> {
        let name = target.qualify(container);
        self.lxc("create-snapshot", &["snapshot", name.as_str(), tag]).await.map(drop)
    }

    async fn delete_snapshot(&self, container: &str, tag: &str, target: &Target) -> Result<(), BackupError> {
        let name = target.qualify(&format!("{container}/{tag}"));
        self.lxc("delete-snapshot", &["delete", name.as_str()]).await.map(drop)
    }

    async fn publish_image(
        &self,
        container: &str,
        tag: &str,
        alias: &str,
        source: &Target,
        destination: &Target,
    ) -> Result<(), BackupError> {
        let snapshot = source.qualify(&format!("{container}/{tag}"));
        let remote = destination.remote_spec();
        self.lxc(
            "publish-image",
            &["publish", snapshot.as_str(), remote.as_str(), "--alias", alias, "--compression", "none"],
        )
        .await
        .map(drop)
    }

    async fn copy_image(&self, alias: &str, source: &Target, destination: &Target) -> Result<(), BackupError> {
        let image = source.qualify(alias);
        let remote = destination.remote_spec();
        self.lxc("copy-image", &["image", "copy", image.as_str(), remote.as_str(), "--alias", alias])
            .await
            .map(drop)
    }

    async fn export_image(&self, alias: &str, path: &Path) -> Result<(), BackupError> {
        let base = export_base(path)?;
        self.lxc("export-image", &["image", "export", alias, base.as_str()]).await.map(drop)
    }

    async fn delete_image(&self, alias: &str, target: &Target) -> Result<(), BackupError> {
        let image = target.qualify(alias);
        self.lxc("delete-image", &["image", "delete", image.as_str()]).await.map(drop)
    }

    async fn import_image(&self, path: &Path, alias: &str, target: &Target) -> Result<(), BackupError> {
        let file = path.to_string_lossy().into_owned();
        let remote = target.remote_spec();
        self.lxc("import-image", &["image", "import", file.as_str(), remote.as_str(), "--alias", alias])
            .await
            .map(drop)
    }

    async fn launch_container(&self, alias: &str, name: &str, target: &Target) -> Result<(), BackupError> {
        let image = target.qualify(alias);
        let container = target.qualify(name);
        self.lxc("launch-container", &["launch", image.as_str(), container.as_str()]).await.map(drop)
    }

    async fn delete_container(&self, name: &str, target: &Target, force: bool) -> Result<(), BackupError> {
        let container = target.qualify(name);
        let mut args = vec!["delete", container.as_str()];
        if force {
            args.push("--force");
        }
        self.lxc("delete-container", &args).await.map(drop)
    }
}
