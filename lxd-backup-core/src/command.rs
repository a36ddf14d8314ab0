//! Running external tools and turning their exit status into [`BackupError`]s.

use std::ffi::OsStr;
use std::process::Stdio;
use std::time::Instant;

use tokio::process::Command;
use tracing::{debug, error};

use crate::error::BackupError;

/// Build a command that is killed if the awaiting future is dropped (e.g. on timeout).
pub fn tool_command(program: impl AsRef<OsStr>) -> Command {
    let mut cmd = Command::new(program);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

/// Run `cmd` to completion and return its stdout.
///
/// A non-zero exit becomes an `OperationFailure` labelled `operation` carrying
/// the trimmed stderr (or the exit status when stderr is empty).
pub async fn run(operation: &str, cmd: &mut Command) -> Result<Vec<u8>, BackupError> {
    let started = Instant::now();
    let program = format!("{:?}", cmd.as_std().get_program());

    let output = cmd.output().await.map_err(|e| {
        error!(operation, program = %program, error = %e, "Failed to launch process");
        BackupError::operation(operation, format!("failed to launch {program}: {e}"))
    })?;

    debug!(
        operation,
        program = %program,
        status = ?output.status,
        spent = ?started.elapsed(),
        "Process exited"
    );

    if output.status.success() {
        return Ok(output.stdout);
    }

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let message = if stderr.is_empty() {
        format!("exited with {}", output.status)
    } else {
        stderr
    };
    Err(BackupError::operation(operation, message))
}
