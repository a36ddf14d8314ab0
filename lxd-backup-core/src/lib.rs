#![doc = "lxd-backup-core: staged backup and restore pipelines for LXD containers."]

//! This crate holds the pipeline runtime, the work-item model, the interfaces to
//! `lxc`, `zstd` and `restic`, and the backup and restore stage definitions.
//! The command-line front end lives in the `lxd-backup` crate.
//!
//! # Usage
//! Build a [`config::RunConfig`], pick [`contract::Collaborators`] (the
//! command-line tools, or mocks in tests) and call [`backup::run_backup`] or
//! [`restore::run_restore`] with an [`report::OutcomeReporter`].

pub mod backup;
pub mod cleanup;
pub mod command;
pub mod config;
pub mod contract;
pub mod error;
pub mod item;
pub mod lxc;
pub mod pipeline;
pub mod report;
pub mod restic;
pub mod restore;
pub mod source;
pub mod target;
pub mod zstd;

pub use error::{BackupError, Result};
