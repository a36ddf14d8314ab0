//! [`Compressor`] backed by the `zstd` command-line tool.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::command::{run, tool_command};
use crate::contract::Compressor;
use crate::error::BackupError;

pub struct ZstdCli {
    program: PathBuf,
}

impl Default for ZstdCli {
    fn default() -> Self {
        Self::new("zstd")
    }
}

impl ZstdCli {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

async fn ensure_exists(operation: &str, path: &Path) -> Result<(), BackupError> {
    match tokio::fs::try_exists(path).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(BackupError::operation(
            operation,
            format!("{} does not exist", path.display()),
        )),
        Err(e) => Err(BackupError::operation(operation, format!("{}: {e}", path.display()))),
    }
}

#[async_trait]
impl Compressor for ZstdCli {
    /// `zstd <src> -T0 --rsyncable -f -o <dst>`: all cores, output friendly to
    /// content-defined chunking in the backup tool.
    async fn compress(&self, source: &Path, destination: &Path) -> Result<(), BackupError> {
        ensure_exists("compress", source).await?;
        let mut cmd = tool_command(&self.program);
        cmd.arg(source)
            .args(["-T0", "--rsyncable", "-q", "-f", "-o"])
            .arg(destination);
        run("compress", &mut cmd).await.map(drop)
    }

    async fn decompress(&self, source: &Path, destination: &Path) -> Result<(), BackupError> {
        ensure_exists("decompress", source).await?;
        let mut cmd = tool_command(&self.program);
        cmd.arg("-d")
            .arg(source)
            .args(["-T0", "-q", "-f", "-o"])
            .arg(destination);
        run("decompress", &mut cmd).await.map(drop)
    }
}
