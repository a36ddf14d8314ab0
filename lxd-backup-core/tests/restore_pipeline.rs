use std::path::Path;
use std::sync::{Arc, Mutex};

use lxd_backup_core::config::RunConfig;
use lxd_backup_core::contract::{
    Collaborators, MockCompressor, MockContainerPlatform, MockRepositoryClient, Repository,
};
use lxd_backup_core::error::BackupError;
use lxd_backup_core::item::{PipelineItem, RestoreItem};
use lxd_backup_core::report::{MemoryReporter, OutcomeStatus};
use lxd_backup_core::restore::{restore_pipeline, run_restore};
use lxd_backup_core::source::{parse_restore_list, restore_items};
use lxd_backup_core::target::Target;
use tempfile::tempdir;

type CallLog = Arc<Mutex<Vec<String>>>;

fn logged(log: &CallLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

fn io(operation: &'static str) -> impl Fn(std::io::Error) -> BackupError {
    move |e| BackupError::operation(operation, e.to_string())
}

/// Drops `<file_name>` into the target dir unless the name is listed as missing.
fn repository_client(missing: &'static [&'static str]) -> MockRepositoryClient {
    let mut mock = MockRepositoryClient::new();
    mock.expect_restore()
        .returning(move |_repository: &Repository, file_name: &str, target_dir: &Path| {
            if missing.iter().any(|m| *m == file_name) {
                return Ok(());
            }
            std::fs::write(target_dir.join(file_name), b"zst").map_err(io("restore"))
        });
    mock
}

fn compressor() -> MockCompressor {
    let mut mock = MockCompressor::new();
    mock.expect_decompress().returning(|source: &Path, destination: &Path| {
        if !source.exists() {
            return Err(BackupError::operation(
                "decompress",
                format!("{} does not exist", source.display()),
            ));
        }
        std::fs::write(destination, b"tar").map_err(io("decompress"))
    });
    mock
}

fn platform(log: &CallLog) -> MockContainerPlatform {
    let mut mock = MockContainerPlatform::new();
    let l = log.clone();
    mock.expect_import_image().returning(move |path, alias, target| {
        assert!(path.exists(), "archive must exist when imported");
        l.lock().unwrap().push(format!("import {alias} on {target}"));
        Ok(())
    });
    let l = log.clone();
    mock.expect_launch_container().returning(move |image, name, target| {
        l.lock().unwrap().push(format!("launch {name} from {image} on {target}"));
        Ok(())
    });
    let l = log.clone();
    mock.expect_delete_image().returning(move |alias, target| {
        l.lock().unwrap().push(format!("delete-image {alias} on {target}"));
        Ok(())
    });
    mock
}

fn config(work_dir: &Path) -> RunConfig {
    RunConfig {
        work_dir: work_dir.to_path_buf(),
        restore_repository: Some(Repository::new("/srv/restore", "pw")),
        ..RunConfig::default()
    }
}

#[tokio::test]
async fn restores_each_listed_container_under_its_new_name() {
    let work = tempdir().unwrap();
    let log = CallLog::default();
    let collaborators = Collaborators {
        platform: Arc::new(platform(&log)),
        compressor: Arc::new(compressor()),
        repositories: Arc::new(repository_client(&[])),
    };
    let reporter = Arc::new(MemoryReporter::new());
    let items = restore_items(&parse_restore_list("web:web-restored\n"), &Target::Local);

    let run = run_restore(&config(work.path()), &collaborators, items, reporter.clone())
        .await
        .unwrap();

    assert_eq!(run.completed.len(), 1);
    assert_eq!(
        run.completed[0].journey().stages(),
        vec![
            "restore",
            "decompress",
            "delete-compressed",
            "import",
            "delete-archive",
            "start",
            "delete-image"
        ]
    );
    assert_eq!(
        logged(&log),
        vec![
            "import web-restored on local",
            "launch web-restored from web-restored on local",
            "delete-image web-restored on local",
        ]
    );
    assert!(reporter.failures().is_empty());
    assert!(std::fs::read_dir(work.path()).unwrap().next().is_none());
}

#[tokio::test]
async fn restore_onto_a_remote_host_directs_every_call_there() {
    let work = tempdir().unwrap();
    let log = CallLog::default();
    let collaborators = Collaborators {
        platform: Arc::new(platform(&log)),
        compressor: Arc::new(compressor()),
        repositories: Arc::new(repository_client(&[])),
    };
    let items = vec![RestoreItem::new("db", "db", Target::Remote("h3".into()))];

    run_restore(&config(work.path()), &collaborators, items, Arc::new(MemoryReporter::new()))
        .await
        .unwrap();

    assert_eq!(
        logged(&log),
        vec![
            "import db on h3",
            "launch db from db on h3",
            "delete-image db on h3",
        ]
    );
}

#[tokio::test]
async fn missing_archive_fails_decompress_and_spares_the_rest() {
    let work = tempdir().unwrap();
    let log = CallLog::default();
    let collaborators = Collaborators {
        platform: Arc::new(platform(&log)),
        compressor: Arc::new(compressor()),
        repositories: Arc::new(repository_client(&["gone.tar.zst"])),
    };
    let reporter = Arc::new(MemoryReporter::new());
    let items = restore_items(&parse_restore_list("gone:gone\nkept:kept\n"), &Target::Local);

    let run = run_restore(&config(work.path()), &collaborators, items, reporter.clone())
        .await
        .unwrap();

    assert_eq!(run.completed.len(), 1);
    assert_eq!(run.completed[0].source_name(), "kept");
    let failures = reporter.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].item, "gone");
    assert_eq!(failures[0].stage, "decompress");
    assert!(matches!(&failures[0].status, OutcomeStatus::Failed { kind, .. } if kind == "OperationFailure"));
    assert!(logged(&log).iter().all(|call| !call.contains("gone")));
}

#[tokio::test]
async fn restore_without_repository_is_a_config_failure() {
    let work = tempdir().unwrap();
    let collaborators = Collaborators {
        platform: Arc::new(MockContainerPlatform::new()),
        compressor: Arc::new(MockCompressor::new()),
        repositories: Arc::new(MockRepositoryClient::new()),
    };
    let config = RunConfig {
        work_dir: work.path().to_path_buf(),
        ..RunConfig::default()
    };
    let err = run_restore(&config, &collaborators, Vec::new(), Arc::new(MemoryReporter::new()))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "ConfigFailure");
}

#[test]
fn restore_stages_are_wired_in_order() {
    let collaborators = Collaborators {
        platform: Arc::new(MockContainerPlatform::new()),
        compressor: Arc::new(MockCompressor::new()),
        repositories: Arc::new(MockRepositoryClient::new()),
    };
    let pipeline = restore_pipeline(
        &RunConfig::default(),
        Repository::new("/srv/restore", "pw"),
        &collaborators,
        Arc::new(MemoryReporter::new()),
    );
    assert_eq!(
        pipeline.stage_names(),
        vec![
            "restore",
            "decompress",
            "delete-compressed",
            "import",
            "delete-archive",
            "start",
            "delete-image"
        ]
    );
}

#[tokio::test]
async fn failed_import_leaves_no_files_behind() {
    let work = tempdir().unwrap();
    let mut platform = MockContainerPlatform::new();
    platform
        .expect_import_image()
        .returning(|_, _, _| Err(BackupError::operation("import-image", "image already exists")));
    platform.expect_launch_container().times(0);
    let collaborators = Collaborators {
        platform: Arc::new(platform),
        compressor: Arc::new(compressor()),
        repositories: Arc::new(repository_client(&[])),
    };
    let reporter = Arc::new(MemoryReporter::new());

    let run = run_restore(
        &config(work.path()),
        &collaborators,
        vec![RestoreItem::new("web", "web", Target::Local)],
        reporter.clone(),
    )
    .await
    .unwrap();

    assert!(run.completed.is_empty());
    assert_eq!(reporter.failures()[0].stage, "import");
    assert!(std::fs::read_dir(work.path()).unwrap().next().is_none());
}
