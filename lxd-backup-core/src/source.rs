//! Producing the initial queue of work items.
//!
//! Enumeration is the only place that lists containers. The running/blacklist
//! filter is applied once, right after listing; later stages work from the
//! cached [`WorkItem`] data only.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use futures::stream::{self, StreamExt};
use regex::Regex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::contract::{ContainerInfo, ContainerPlatform};
use crate::error::BackupError;
use crate::item::{RestoreItem, WorkItem};
use crate::report::{Outcome, OutcomeReporter};
use crate::target::Target;

pub const ENUMERATE_STAGE: &str = "enumerate";

/// Source container name to the name it is restored as.
pub type RestoreMapping = BTreeMap<String, String>;

/// A fresh snapshot tag, used when no constant tag is configured.
pub fn generate_snapshot_tag() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("backup-{}", &id[..8])
}

/// Keep running containers whose name is not blacklisted.
pub fn filter_containers(containers: Vec<ContainerInfo>, blacklist: &HashSet<String>) -> Vec<ContainerInfo> {
    containers
        .into_iter()
        .filter(|c| c.is_running() && !blacklist.contains(&c.name))
        .collect()
}

pub struct SourceEnumerator {
    platform: Arc<dyn ContainerPlatform>,
    blacklist: HashSet<String>,
    snapshot_tag: String,
    reporter: Arc<dyn OutcomeReporter>,
}

impl SourceEnumerator {
    pub fn new(
        platform: Arc<dyn ContainerPlatform>,
        blacklist: &[String],
        snapshot_tag: impl Into<String>,
        reporter: Arc<dyn OutcomeReporter>,
    ) -> Self {
        Self {
            platform,
            blacklist: blacklist.iter().cloned().collect(),
            snapshot_tag: snapshot_tag.into(),
            reporter,
        }
    }

    fn to_items(&self, host: &Target, containers: Vec<ContainerInfo>) -> Vec<WorkItem> {
        let listed = containers.len();
        let items: Vec<WorkItem> = filter_containers(containers, &self.blacklist)
            .into_iter()
            .map(|c| {
                WorkItem::new(c.name, host.clone(), self.snapshot_tag.clone())
                    .with_existing_snapshots(c.snapshots.into_iter().map(|s| s.name).collect())
            })
            .collect();
        info!(host = %host, listed, selected = items.len(), "[ENUMERATE] containers selected");
        items
    }

    /// List the local host. Failure is fatal to the run.
    pub async fn enumerate_local(&self) -> Result<Vec<WorkItem>, BackupError> {
        let containers = self.platform.list_containers(&Target::Local).await?;
        Ok(self.to_items(&Target::Local, containers))
    }

    /// List `hosts` with at most `concurrency` listings in flight, pushing
    /// selected items into `sink` as each host answers.
    ///
    /// A host that cannot be listed is reported and contributes no items.
    /// Returns the number of items pushed.
    pub async fn enumerate_remote(
        &self,
        hosts: &[Target],
        concurrency: usize,
        sink: flume::Sender<WorkItem>,
    ) -> usize {
        let sink = &sink;
        let counts: Vec<usize> = stream::iter(hosts)
            .map(|host| async move {
                let started = Instant::now();
                match self.platform.list_containers(host).await {
                    Ok(containers) => {
                        let mut pushed = 0;
                        for item in self.to_items(host, containers) {
                            if sink.send_async(item).await.is_err() {
                                warn!(host = %host, "[ENUMERATE] pipeline closed, stopping");
                                break;
                            }
                            pushed += 1;
                        }
                        pushed
                    }
                    Err(err) => {
                        self.reporter.record(Outcome::failed(
                            &host.to_string(),
                            host,
                            ENUMERATE_STAGE,
                            started.elapsed(),
                            &err,
                        ));
                        0
                    }
                }
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;
        counts.into_iter().sum()
    }

    /// [`Self::enumerate_remote`] collected into a vector.
    pub async fn enumerate_remote_collect(&self, hosts: &[Target], concurrency: usize) -> Vec<WorkItem> {
        let (tx, rx) = flume::unbounded();
        self.enumerate_remote(hosts, concurrency, tx).await;
        rx.drain().collect()
    }
}

fn restore_line() -> &'static Regex {
    static LINE: OnceLock<Regex> = OnceLock::new();
    LINE.get_or_init(|| {
        Regex::new(r"^\s*([^:\s]+)\s*:\s*([^:\s]+)\s*$").expect("restore-list pattern is valid")
    })
}

/// Parse `name:restoreAs` lines. Blank lines and `#` comments are ignored,
/// malformed lines are skipped with a warning. A repeated name keeps its last mapping.
pub fn parse_restore_list(text: &str) -> RestoreMapping {
    let mut mapping = RestoreMapping::new();
    for (number, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        match restore_line().captures(trimmed) {
            Some(caps) => {
                mapping.insert(caps[1].to_string(), caps[2].to_string());
            }
            None => warn!(line = number + 1, content = trimmed, "Skipping malformed restore-list line"),
        }
    }
    mapping
}

/// One restore item per mapping entry, all directed at `target`.
pub fn restore_items(mapping: &RestoreMapping, target: &Target) -> Vec<RestoreItem> {
    mapping
        .iter()
        .map(|(source, restore_as)| RestoreItem::new(source.clone(), restore_as.clone(), target.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{SnapshotInfo, STATUS_RUNNING};

    fn container(name: &str, status_code: i64) -> ContainerInfo {
        ContainerInfo {
            name: name.into(),
            status_code,
            snapshots: vec![SnapshotInfo { name: "old".into() }],
        }
    }

    #[test]
    fn filter_drops_stopped_and_blacklisted() {
        let blacklist: HashSet<String> = ["c".to_string()].into_iter().collect();
        let kept = filter_containers(
            vec![container("a", STATUS_RUNNING), container("b", 102), container("c", STATUS_RUNNING)],
            &blacklist,
        );
        let names: Vec<_> = kept.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a"]);
    }

    #[test]
    fn restore_list_parsing() {
        let mapping = parse_restore_list("web:web-restored\n\n# comment\nbroken line\ndb : db2\nweb:web-again\na:b:c\n");
        assert_eq!(mapping.len(), 2);
        assert_eq!(mapping["web"], "web-again");
        assert_eq!(mapping["db"], "db2");
    }

    #[test]
    fn generated_tags_are_unique() {
        let a = generate_snapshot_tag();
        let b = generate_snapshot_tag();
        assert!(a.starts_with("backup-"));
        assert_eq!(a.len(), "backup-".len() + 8);
        assert_ne!(a, b);
    }

    #[test]
    fn restore_items_follow_mapping() {
        let mut mapping = RestoreMapping::new();
        mapping.insert("web".into(), "web2".into());
        let items = restore_items(&mapping, &Target::Remote("h2".into()));
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].source_name(), "web");
        assert_eq!(items[0].restore_as, "web2");
        assert_eq!(items[0].target, Target::Remote("h2".into()));
    }
}
