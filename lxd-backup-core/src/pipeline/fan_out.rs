use std::fmt::Display;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::stage::{with_deadline, StageConfig};
use super::StageRunner;
use crate::error::BackupError;
use crate::item::PipelineItem;
use crate::report::{Outcome, OutcomeReporter};

/// One step applied to one item for one destination.
#[async_trait]
pub trait TargetOperation<T, D>: Send + Sync {
    async fn apply(&self, item: &T, target: &D) -> Result<(), BackupError>;
}

/// A stage that runs its operation once per destination for every item.
///
/// Destinations are attempted concurrently, at most `max_parallel` at a time.
/// Each destination's result is reported on its own; the item is forwarded
/// exactly once after all of them finished, whatever they returned.
pub struct FanOutStage<T, D> {
    config: StageConfig,
    targets: Arc<[D]>,
    max_parallel: usize,
    operation: Arc<dyn TargetOperation<T, D>>,
}

impl<T, D> FanOutStage<T, D>
where
    T: PipelineItem,
    D: Display + Send + Sync + 'static,
{
    pub fn new(
        config: StageConfig,
        targets: Vec<D>,
        operation: impl TargetOperation<T, D> + 'static,
    ) -> Self {
        let max_parallel = targets.len().max(1);
        Self {
            config,
            targets: targets.into(),
            max_parallel,
            operation: Arc::new(operation),
        }
    }

    /// Cap concurrent destination calls per item. The effective width is
    /// `min(targets, max_parallel)` and never below one.
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    fn width(&self) -> usize {
        self.max_parallel.min(self.targets.len()).max(1)
    }

    pub fn spawn(
        self,
        input: flume::Receiver<T>,
        output: flume::Sender<T>,
        reporter: Arc<dyn OutcomeReporter>,
    ) -> Vec<JoinHandle<()>> {
        let name: Arc<str> = Arc::from(self.config.name.as_str());
        let width = self.width();

        (0..self.config.workers)
            .map(|worker| {
                let input = input.clone();
                let output = output.clone();
                let reporter = reporter.clone();
                let operation = self.operation.clone();
                let targets = self.targets.clone();
                let name = name.clone();
                let timeout = self.config.timeout;

                tokio::spawn(async move {
                    debug!(stage = %name, worker, targets = targets.len(), width, "fan-out worker started");
                    while let Ok(mut item) = input.recv_async().await {
                        if item.journey().is_failed() {
                            warn!(stage = %name, container = item.name(), "dropping item that already failed");
                            continue;
                        }

                        let started = Instant::now();
                        let results: Vec<(usize, Result<(), BackupError>, std::time::Duration)> = {
                            let item_ref = &item;
                            let operation_ref = operation.as_ref();
                            let name_ref: &str = &name;
                            let targets_ref: &[D] = &targets;
                            stream::iter(0..targets_ref.len())
                                .map(move |index| async move {
                                    let target = &targets_ref[index];
                                    let t = Instant::now();
                                    let result =
                                        with_deadline(name_ref, timeout, operation_ref.apply(item_ref, target)).await;
                                    (index, result, t.elapsed())
                                })
                                .buffer_unordered(width)
                                .collect()
                                .await
                        };

                        let mut failed = 0usize;
                        for (index, result, spent) in results {
                            let label = targets[index].to_string();
                            match result {
                                Ok(()) => reporter.record(
                                    Outcome::succeeded(item.name(), item.host(), &name, spent).with_target(label),
                                ),
                                Err(err) => {
                                    failed += 1;
                                    reporter.record(
                                        Outcome::failed(item.name(), item.host(), &name, spent, &err)
                                            .with_target(label),
                                    );
                                }
                            }
                        }
                        if failed > 0 {
                            warn!(
                                stage = %name,
                                container = item.name(),
                                failed,
                                total = targets.len(),
                                "partial delivery, forwarding anyway"
                            );
                        }

                        item.journey_mut().record(&name, started.elapsed());
                        if output.send_async(item).await.is_err() {
                            warn!(stage = %name, worker, "downstream queue closed, stopping worker");
                            break;
                        }
                    }
                    debug!(stage = %name, worker, "fan-out worker finished");
                })
            })
            .collect()
    }
}

impl<T, D> StageRunner<T> for FanOutStage<T, D>
where
    T: PipelineItem,
    D: Display + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.config.name
    }

    fn spawn(
        self: Box<Self>,
        input: flume::Receiver<T>,
        output: flume::Sender<T>,
        reporter: Arc<dyn OutcomeReporter>,
    ) -> Vec<JoinHandle<()>> {
        FanOutStage::spawn(*self, input, output, reporter)
    }
}
