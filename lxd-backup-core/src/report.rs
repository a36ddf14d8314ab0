//! Outcome reporting.
//!
//! Every stage hands one [`Outcome`] per item (and per target, for fan-out
//! stages) to an [`OutcomeReporter`]. Logging is one implementation of that
//! interface ([`TracingReporter`]); [`MemoryReporter`] keeps the records so a
//! run can be summarised, and [`CompositeReporter`] feeds several at once.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tracing::{error, info};

use crate::error::BackupError;
use crate::target::Target;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeStatus {
    Succeeded,
    Failed { kind: String, message: String },
}

/// One item's result at one stage (and one destination, for fan-out stages).
#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    pub item: String,
    pub host: String,
    pub stage: String,
    /// Destination label for fan-out stages.
    pub target: Option<String>,
    pub spent: Duration,
    pub status: OutcomeStatus,
}

impl Outcome {
    pub fn succeeded(item: &str, host: &Target, stage: &str, spent: Duration) -> Self {
        Self {
            item: item.to_string(),
            host: host.to_string(),
            stage: stage.to_string(),
            target: None,
            spent,
            status: OutcomeStatus::Succeeded,
        }
    }

    pub fn failed(item: &str, host: &Target, stage: &str, spent: Duration, err: &BackupError) -> Self {
        Self {
            item: item.to_string(),
            host: host.to_string(),
            stage: stage.to_string(),
            target: None,
            spent,
            status: OutcomeStatus::Failed {
                kind: err.kind().to_string(),
                message: err.to_string(),
            },
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.status, OutcomeStatus::Failed { .. })
    }
}

/// Sink for per-item, per-stage outcomes. Shared by all workers of a run.
pub trait OutcomeReporter: Send + Sync {
    fn record(&self, outcome: Outcome);
}

/// Logs each outcome as a structured tracing event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl OutcomeReporter for TracingReporter {
    fn record(&self, outcome: Outcome) {
        let destination = outcome.target.as_deref().unwrap_or("-");
        match &outcome.status {
            OutcomeStatus::Succeeded => info!(
                container = %outcome.item,
                host = %outcome.host,
                stage = %outcome.stage,
                destination,
                spent = ?outcome.spent,
                "[STAGE] done"
            ),
            OutcomeStatus::Failed { kind, message } => error!(
                container = %outcome.item,
                host = %outcome.host,
                stage = %outcome.stage,
                destination,
                spent = ?outcome.spent,
                kind = %kind,
                error = %message,
                "[STAGE][ERROR] failed"
            ),
        }
    }
}

/// Keeps every outcome in memory.
#[derive(Debug, Default)]
pub struct MemoryReporter {
    outcomes: Mutex<Vec<Outcome>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outcomes(&self) -> Vec<Outcome> {
        self.lock().clone()
    }

    pub fn failures(&self) -> Vec<Outcome> {
        self.lock().iter().filter(|o| o.is_failure()).cloned().collect()
    }

    /// Outcomes recorded for `stage`, in arrival order.
    pub fn for_stage(&self, stage: &str) -> Vec<Outcome> {
        self.lock().iter().filter(|o| o.stage == stage).cloned().collect()
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary::from_outcomes(&self.lock())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Outcome>> {
        // A poisoned lock still holds valid records.
        self.outcomes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl OutcomeReporter for MemoryReporter {
    fn record(&self, outcome: Outcome) {
        self.lock().push(outcome);
    }
}

/// Fans every outcome out to several reporters.
#[derive(Default, Clone)]
pub struct CompositeReporter {
    reporters: Vec<Arc<dyn OutcomeReporter>>,
}

impl CompositeReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, reporter: Arc<dyn OutcomeReporter>) -> Self {
        self.reporters.push(reporter);
        self
    }
}

impl OutcomeReporter for CompositeReporter {
    fn record(&self, outcome: Outcome) {
        if let Some((last, rest)) = self.reporters.split_last() {
            for reporter in rest {
                reporter.record(outcome.clone());
            }
            last.record(outcome);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StageCounts {
    pub succeeded: usize,
    pub failed: usize,
}

/// Aggregated view of a run, printed by the CLI once the pipeline has drained.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub stages: BTreeMap<String, StageCounts>,
    pub failures: Vec<Outcome>,
}

impl RunSummary {
    pub fn from_outcomes(outcomes: &[Outcome]) -> Self {
        let mut summary = RunSummary::default();
        for outcome in outcomes {
            let counts = summary.stages.entry(outcome.stage.clone()).or_default();
            if outcome.is_failure() {
                counts.failed += 1;
                summary.failures.push(outcome.clone());
            } else {
                counts.succeeded += 1;
            }
        }
        summary
    }

    pub fn failed_total(&self) -> usize {
        self.failures.len()
    }
}
