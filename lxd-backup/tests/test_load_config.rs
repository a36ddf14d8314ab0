use lxd_backup::load_config::{load_config, parse_config};
use serial_test::serial;
use std::env;
use std::fs::write;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::NamedTempFile;

#[tokio::test]
#[serial]
async fn test_load_config_full_file() {
    let config_yaml = r#"
hosts: [h1, h2]
blacklist: [scratch]
backup_restic_repos:
  - path: /srv/restic/one
    password: inline-secret
  - path: sftp:backup@vault:/restic
    password_env: LXD_BACKUP_TEST_VAULT_PASSWORD
restore_restic_repo:
  path: /srv/restic/one
  password: inline-secret
local_workers: 3
workers:
  compress: 6
repository_concurrency: 1
remote_concurrency: 4
stage_timeout_secs: 600
snapshot_tag: nightly
work_dir: /var/tmp/lxd-backup
channel_size: 16
"#;
    let config_file = NamedTempFile::new().expect("temp file");
    write(config_file.path(), config_yaml).unwrap();
    env::set_var("LXD_BACKUP_TEST_VAULT_PASSWORD", "from-env");

    let config = load_config(config_file.path()).expect("Config should load");
    env::remove_var("LXD_BACKUP_TEST_VAULT_PASSWORD");

    assert_eq!(config.hosts, vec!["h1", "h2"]);
    assert_eq!(config.blacklist, vec!["scratch"]);
    assert_eq!(config.backup_repositories.len(), 2);
    assert_eq!(config.backup_repositories[0].password, "inline-secret");
    assert_eq!(config.backup_repositories[1].path, "sftp:backup@vault:/restic");
    assert_eq!(config.backup_repositories[1].password, "from-env");
    assert_eq!(
        config.restore_repository.as_ref().map(|r| r.path.as_str()),
        Some("/srv/restic/one")
    );
    assert_eq!(config.workers.for_stage("compress"), 6);
    assert_eq!(config.workers.for_stage("export"), 3);
    assert_eq!(config.repository_concurrency, Some(1));
    assert_eq!(config.remote_concurrency, Some(4));
    assert_eq!(config.stage_timeout, Some(Duration::from_secs(600)));
    assert_eq!(config.snapshot_tag.as_deref(), Some("nightly"));
    assert_eq!(config.work_dir, PathBuf::from("/var/tmp/lxd-backup"));
    assert_eq!(config.channel_size, 16);
}

#[test]
fn test_defaults_for_minimal_config() {
    let config = parse_config("hosts: [h1]\n").expect("Config should parse");
    assert_eq!(config.workers.for_stage("snapshot"), 2);
    assert_eq!(config.work_dir, PathBuf::from("."));
    assert!(config.backup_repositories.is_empty());
    assert!(config.restore_repository.is_none());
    assert!(config.snapshot_tag.is_none());
    assert!(config.stage_timeout.is_none());
}

#[tokio::test]
#[serial]
async fn test_missing_password_env_is_a_config_error() {
    env::remove_var("LXD_BACKUP_TEST_UNSET_PASSWORD");
    let err = parse_config(
        "backup_restic_repos:\n  - path: /srv/restic\n    password_env: LXD_BACKUP_TEST_UNSET_PASSWORD\n",
    )
    .unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("LXD_BACKUP_TEST_UNSET_PASSWORD"), "got: {msg}");
    assert!(msg.contains("configuration error"), "got: {msg}");
}

#[test]
fn test_repository_without_password_is_rejected() {
    let err = parse_config("restore_restic_repo:\n  path: /srv/restic\n").unwrap_err();
    assert!(err.to_string().contains("no password or password_env"));
}

#[test]
fn test_invalid_yaml_is_reported() {
    let err = parse_config("hosts: [unterminated\n").unwrap_err();
    assert!(err.to_string().contains("Failed to parse config YAML"));
}

#[test]
fn test_missing_file_is_reported() {
    let err = load_config("/nonexistent/lxd-backup.yaml").unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}
