//! Concurrency-bounded stage: N workers draining one queue into the next.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::StageRunner;
use crate::error::BackupError;
use crate::item::PipelineItem;
use crate::report::{Outcome, OutcomeReporter};

/// Name, degree of parallelism and per-operation deadline of one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageConfig {
    pub name: String,
    pub workers: usize,
    pub timeout: Option<Duration>,
}

impl StageConfig {
    /// `workers` below one is treated as one.
    pub fn new(name: impl Into<String>, workers: usize) -> Self {
        Self {
            name: name.into(),
            workers: workers.max(1),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// One step applied to each item. Implementations own their cleanup on failure.
#[async_trait]
pub trait Operation<T>: Send + Sync {
    async fn apply(&self, item: &mut T) -> Result<(), BackupError>;

    /// Called after `apply` was cut short by the stage deadline. The dropped
    /// future never reached its own error path, so anything it may have
    /// written for `item` is removed here.
    async fn abort(&self, _item: &T)
    where
        T: Sync,
    {
    }
}

/// A stage running a single [`Operation`] on `workers` parallel tasks.
///
/// Successful items are timed and forwarded; failed items get their terminal
/// error set, are reported, and go no further. No retries.
pub struct Stage<T> {
    config: StageConfig,
    operation: Arc<dyn Operation<T>>,
}

impl<T: PipelineItem> Stage<T> {
    pub fn new(config: StageConfig, operation: impl Operation<T> + 'static) -> Self {
        Self {
            config,
            operation: Arc::new(operation),
        }
    }

    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    /// Spawn the workers. The output queue closes once the last worker has
    /// seen the input closed and drained, because each worker holds one clone
    /// of `output` and this function drops the original.
    pub fn spawn(
        self,
        input: flume::Receiver<T>,
        output: flume::Sender<T>,
        reporter: Arc<dyn OutcomeReporter>,
    ) -> Vec<JoinHandle<()>> {
        let name: Arc<str> = Arc::from(self.config.name.as_str());
        (0..self.config.workers)
            .map(|worker| {
                let input = input.clone();
                let output = output.clone();
                let reporter = reporter.clone();
                let operation = self.operation.clone();
                let name = name.clone();
                let timeout = self.config.timeout;

                tokio::spawn(async move {
                    debug!(stage = %name, worker, "worker started");
                    while let Ok(mut item) = input.recv_async().await {
                        if item.journey().is_failed() {
                            warn!(stage = %name, container = item.name(), "dropping item that already failed");
                            continue;
                        }

                        let started = Instant::now();
                        let result = with_deadline(&name, timeout, operation.apply(&mut item)).await;
                        let spent = started.elapsed();

                        match result {
                            Ok(()) => {
                                item.journey_mut().record(&name, spent);
                                reporter.record(Outcome::succeeded(item.name(), item.host(), &name, spent));
                                if output.send_async(item).await.is_err() {
                                    warn!(stage = %name, worker, "downstream queue closed, stopping worker");
                                    break;
                                }
                            }
                            Err(err) => {
                                if matches!(err, BackupError::Timeout { .. }) {
                                    operation.abort(&item).await;
                                }
                                reporter.record(Outcome::failed(item.name(), item.host(), &name, spent, &err));
                                item.journey_mut().fail(err.to_string());
                            }
                        }
                    }
                    debug!(stage = %name, worker, "worker finished");
                })
            })
            .collect()
    }
}

impl<T: PipelineItem> StageRunner<T> for Stage<T> {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn spawn(
        self: Box<Self>,
        input: flume::Receiver<T>,
        output: flume::Sender<T>,
        reporter: Arc<dyn OutcomeReporter>,
    ) -> Vec<JoinHandle<()>> {
        Stage::spawn(*self, input, output, reporter)
    }
}

/// Run `fut`, turning an expired deadline into [`BackupError::Timeout`].
pub(crate) async fn with_deadline<F>(
    operation: &str,
    timeout: Option<Duration>,
    fut: F,
) -> Result<(), BackupError>
where
    F: Future<Output = Result<(), BackupError>>,
{
    match timeout {
        Some(after) => match tokio::time::timeout(after, fut).await {
            Ok(result) => result,
            Err(_) => Err(BackupError::Timeout {
                operation: operation.to_string(),
                after,
            }),
        },
        None => fut.await,
    }
}
