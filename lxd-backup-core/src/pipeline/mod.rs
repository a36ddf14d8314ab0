//! # Staged pipeline
//!
//! A [`Pipeline`] is an ordered list of stages connected by bounded `flume`
//! queues. Each stage runs its own pool of worker tasks, so the degree of
//! parallelism is set per stage rather than for the pipeline as a whole.
//!
//! Runtime model:
//! - Queue `i` is written by stage `i - 1` (or the source) and read by all
//!   workers of stage `i`.
//! - Every queue has exactly one writer side. It closes when the last clone of
//!   its sender is dropped, which is when the last writing worker exits.
//! - A worker exits once its input queue is closed and drained, so closing
//!   cascades from the source to the terminal queue without any counting.
//! - Failed items are reported and dropped inside the stage; they never reach
//!   a later queue.
//!
//! Per-item stage order is total (an item cannot be in queue `i + 1` before
//! stage `i` finished with it). Order across items is unspecified once a stage
//! has more than one worker.

mod fan_out;
mod stage;

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, info};

pub use fan_out::{FanOutStage, TargetOperation};
pub use stage::{Operation, Stage, StageConfig};

use crate::item::PipelineItem;
use crate::report::OutcomeReporter;

/// Default capacity of the queues between stages.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 8;

/// Anything that can be wired in as a pipeline stage.
pub trait StageRunner<T>: Send {
    fn name(&self) -> &str;

    /// Start the stage's workers reading `input` and writing `output`.
    fn spawn(
        self: Box<Self>,
        input: flume::Receiver<T>,
        output: flume::Sender<T>,
        reporter: Arc<dyn OutcomeReporter>,
    ) -> Vec<JoinHandle<()>>;
}

/// Ordered composition of stages. Performs no business logic itself.
pub struct Pipeline<T> {
    stages: Vec<Box<dyn StageRunner<T>>>,
    reporter: Arc<dyn OutcomeReporter>,
    channel_size: usize,
}

/// Result of spawning a pipeline: the terminal queue plus every worker handle.
pub struct SpawnedPipeline<T> {
    pub output: flume::Receiver<T>,
    pub tasks: Vec<JoinHandle<()>>,
}

/// Items that came out of the terminal stage.
#[derive(Debug)]
pub struct PipelineRun<T> {
    pub completed: Vec<T>,
}

impl<T: PipelineItem> Pipeline<T> {
    pub fn new(reporter: Arc<dyn OutcomeReporter>) -> Self {
        Self {
            stages: Vec::new(),
            reporter,
            channel_size: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// Capacity of every queue between stages; at least one.
    pub fn with_channel_size(mut self, size: usize) -> Self {
        self.channel_size = size.max(1);
        self
    }

    /// Append a stage to the end of the pipeline.
    pub fn add_stage<S: StageRunner<T> + 'static>(mut self, stage: S) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Wire every stage to its successor, starting from `source`.
    pub fn spawn(self, source: flume::Receiver<T>) -> SpawnedPipeline<T> {
        let mut tasks = Vec::new();
        let mut current = source;

        for stage in self.stages {
            let (tx, rx) = flume::bounded::<T>(self.channel_size);
            debug!(stage = stage.name(), capacity = self.channel_size, "wiring stage");
            tasks.extend(stage.spawn(current, tx, self.reporter.clone()));
            current = rx;
        }

        SpawnedPipeline {
            output: current,
            tasks,
        }
    }

    /// Run the pipeline over `source` and block until the terminal queue closes.
    ///
    /// The terminal queue only closes after every worker of every stage has
    /// finished, so the returned run is complete.
    pub async fn run_from(self, source: flume::Receiver<T>) -> PipelineRun<T> {
        let names = self.stage_names().join(" -> ");
        info!(stages = %names, "[PIPELINE] starting");

        let SpawnedPipeline { output, tasks } = self.spawn(source);

        let mut completed = Vec::new();
        while let Ok(item) = output.recv_async().await {
            completed.push(item);
        }

        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "[PIPELINE][ERROR] stage worker panicked");
            }
        }

        info!(completed = completed.len(), "[PIPELINE] drained");
        PipelineRun { completed }
    }

    /// Feed a finite list of items into the pipeline and run it to completion.
    pub async fn run(self, items: Vec<T>) -> PipelineRun<T> {
        let (tx, rx) = flume::bounded::<T>(self.channel_size);
        let feeder = tokio::spawn(async move {
            for item in items {
                if tx.send_async(item).await.is_err() {
                    break;
                }
            }
        });

        let run = self.run_from(rx).await;
        if let Err(e) = feeder.await {
            error!(error = %e, "[PIPELINE][ERROR] source feeder panicked");
        }
        run
    }
}
