//! [`RepositoryClient`] backed by the `restic` command-line tool.
//!
//! Repository location and password are passed as `RESTIC_REPOSITORY` and
//! `RESTIC_PASSWORD` in the child's environment, never as arguments.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};

use crate::command::{run, tool_command};
use crate::contract::{Repository, RepositoryClient};
use crate::error::BackupError;

pub struct ResticCli {
    program: PathBuf,
}

impl Default for ResticCli {
    fn default() -> Self {
        Self::new("restic")
    }
}

impl ResticCli {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self, repository: &Repository) -> Command {
        let mut cmd = tool_command(&self.program);
        cmd.env("RESTIC_REPOSITORY", &repository.path)
            .env("RESTIC_PASSWORD", &repository.password);
        cmd
    }

    fn backup_command(&self, repository: &Repository, path: &Path) -> Command {
        let mut cmd = self.command(repository);
        cmd.arg("backup").arg(path);
        cmd
    }

    fn restore_command(&self, repository: &Repository, snapshot_path: &Path, staging: &Path) -> Command {
        let mut cmd = self.command(repository);
        cmd.args(["restore", "latest", "--path"])
            .arg(snapshot_path)
            .arg("--target")
            .arg(staging);
        cmd
    }
}

fn repository_error(repository: &Repository, err: BackupError) -> BackupError {
    match err {
        BackupError::OperationFailure { operation, message } => {
            BackupError::repository(repository.path.clone(), format!("{operation}: {message}"))
        }
        other => other,
    }
}

#[async_trait]
impl RepositoryClient for ResticCli {
    async fn check(&self, repository: &Repository) -> Result<(), BackupError> {
        let mut cmd = self.command(repository);
        cmd.arg("check");
        run("restic check", &mut cmd)
            .await
            .map_err(|e| repository_error(repository, e))?;
        info!(repository = %repository, "restic repository is OK");
        Ok(())
    }

    async fn backup(&self, repository: &Repository, path: &Path) -> Result<(), BackupError> {
        let path = absolute(path).await?;
        let mut cmd = self.backup_command(repository, &path);
        run("restic backup", &mut cmd)
            .await
            .map(drop)
            .map_err(|e| repository_error(repository, e))
    }

    /// restic recreates the stored directory layout under `--target`, so the
    /// snapshot is restored into a scratch directory and the file moved out.
    /// The scratch directory is removed on drop, also when a deadline cuts
    /// the restore short.
    async fn restore(&self, repository: &Repository, file_name: &str, target_dir: &Path) -> Result<(), BackupError> {
        let snapshot_path = absolute(target_dir).await?.join(file_name);
        let staging = tempfile::Builder::new()
            .prefix(".restore-")
            .tempdir_in(target_dir)
            .map_err(|e| BackupError::operation("restic restore", e.to_string()))?;
        let mut cmd = self.restore_command(repository, &snapshot_path, staging.path());
        let restored = match run("restic restore", &mut cmd).await {
            Ok(_) => move_into_place(staging.path(), file_name, target_dir).await,
            Err(e) => Err(repository_error(repository, e)),
        };
        let staging_path = staging.path().to_path_buf();
        if let Err(e) = staging.close() {
            warn!(path = %staging_path.display(), error = %e, "could not remove restore staging dir");
        }
        restored
    }
}

/// restic records absolute paths, and `restore --path` only matches those.
async fn absolute(path: &Path) -> Result<PathBuf, BackupError> {
    tokio::fs::canonicalize(path)
        .await
        .map_err(|e| BackupError::operation("resolve path", format!("{}: {e}", path.display())))
}

/// Find `file_name` anywhere below `staging` and rename it to `target_dir/file_name`.
async fn move_into_place(staging: &Path, file_name: &str, target_dir: &Path) -> Result<(), BackupError> {
    let io_err = |e: std::io::Error| BackupError::operation("restic restore", e.to_string());
    let mut pending = vec![staging.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await.map_err(io_err)?;
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let kind = entry.file_type().await.map_err(io_err)?;
            if kind.is_dir() {
                pending.push(entry.path());
            } else if entry.file_name() == file_name {
                tokio::fs::rename(entry.path(), target_dir.join(file_name))
                    .await
                    .map_err(io_err)?;
                return Ok(());
            }
        }
    }
    Err(BackupError::operation(
        "restic restore",
        format!("{file_name} not found in restored snapshot"),
    ))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn command_failures_become_repository_failures() {
        let restic = ResticCli::new("false");
        let repo = Repository::new("/srv/restic/two", "secret");
        let err = restic.check(&repo).await.unwrap_err();
        match err {
            BackupError::RepositoryFailure { repository, .. } => assert_eq!(repository, "/srv/restic/two"),
            other => panic!("expected RepositoryFailure, got {other:?}"),
        }
    }

    #[test]
    fn credentials_travel_through_the_environment() {
        let restic = ResticCli::default();
        let repo = Repository::new("/srv/one", "pw");
        let cmd = restic.command(&repo);
        let envs: Vec<_> = cmd.as_std().get_envs().collect();
        assert!(envs.contains(&(std::ffi::OsStr::new("RESTIC_REPOSITORY"), Some(std::ffi::OsStr::new("/srv/one")))));
        assert!(envs.contains(&(std::ffi::OsStr::new("RESTIC_PASSWORD"), Some(std::ffi::OsStr::new("pw")))));
        assert_eq!(cmd.as_std().get_args().count(), 0);
    }

    fn args(cmd: &Command) -> Vec<String> {
        cmd.as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn backup_and_restore_address_the_same_absolute_path() {
        let restic = ResticCli::default();
        let repo = Repository::new("/srv/one", "pw");
        let file = Path::new("/var/lib/lxd-backup/web.tar.zst");

        assert_eq!(args(&restic.backup_command(&repo, file)), vec!["backup", "/var/lib/lxd-backup/web.tar.zst"]);
        assert_eq!(
            args(&restic.restore_command(&repo, file, Path::new("/var/lib/lxd-backup/.restore-x"))),
            vec![
                "restore",
                "latest",
                "--path",
                "/var/lib/lxd-backup/web.tar.zst",
                "--target",
                "/var/lib/lxd-backup/.restore-x"
            ]
        );
    }

    #[tokio::test]
    async fn relative_work_dirs_resolve_to_absolute_paths() {
        let dir = tempfile::tempdir().unwrap();
        let resolved = absolute(dir.path()).await.unwrap();
        assert!(resolved.is_absolute());
        assert!(absolute(&dir.path().join("missing")).await.is_err());
    }

    #[tokio::test]
    async fn failed_restore_leaves_no_staging_dir() {
        let dir = tempfile::tempdir().unwrap();
        let restic = ResticCli::new("false");
        let repo = Repository::new("/srv/one", "pw");

        let err = restic.restore(&repo, "web.tar.zst", dir.path()).await.unwrap_err();
        assert_eq!(err.kind(), "RepositoryFailure");
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn restored_file_is_moved_out_of_nested_layout() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join(".restore-x");
        let nested = staging.join("var").join("backups");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("web.tar.zst"), b"zst").unwrap();

        move_into_place(&staging, "web.tar.zst", dir.path()).await.unwrap();
        assert_eq!(std::fs::read(dir.path().join("web.tar.zst")).unwrap(), b"zst");

        let err = move_into_place(&staging, "db.tar.zst", dir.path()).await.unwrap_err();
        assert!(err.to_string().contains("db.tar.zst not found"));
    }
}
