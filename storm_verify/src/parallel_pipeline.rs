// THEORY:
// Forecast cycles are independent: they read their own fields and write their own
// key in the store. The `WorkerPool` therefore runs whole cycles side by side.
// A dispatcher task hands cycles round-robin to a fixed set of workers over
// channels; each worker runs the CPU-bound cycle body on the blocking thread pool
// and answers over a oneshot channel. A failed cycle is reported in its own
// outcome and never stops the others.

use crate::core_modules::error::VerifyError;
use crate::core_modules::store::CycleKey;
use crate::pipeline::{CycleReport, CycleSpec, VerificationPipeline};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info};

/// The fate of one cycle submitted to the pool.
#[derive(Debug)]
pub enum CycleOutcome {
    Done(CycleReport),
    Failed { key: CycleKey, error: VerifyError },
}

impl CycleOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, CycleOutcome::Failed { .. })
    }
}

struct CycleTask {
    cycle: CycleSpec,
    result_sender: oneshot::Sender<CycleOutcome>,
}

pub struct WorkerPool {
    task_sender: mpsc::UnboundedSender<CycleTask>,
    workers: Vec<tokio::task::JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `worker_count` workers (at least one) sharing `pipeline`.
    /// Must be called from within a tokio runtime.
    pub fn new(pipeline: Arc<VerificationPipeline>, worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        let (task_sender, mut task_receiver) = mpsc::unbounded_channel::<CycleTask>();

        let (worker_senders, worker_receivers): (Vec<_>, Vec<_>) = (0..worker_count)
            .map(|_| mpsc::unbounded_channel::<CycleTask>())
            .unzip();

        tokio::spawn(async move {
            let mut worker_idx = 0;
            while let Some(task) = task_receiver.recv().await {
                let _ = worker_senders[worker_idx].send(task);
                worker_idx = (worker_idx + 1) % worker_count;
            }
        });

        let workers = worker_receivers
            .into_iter()
            .map(|mut worker_receiver| {
                let pipeline = Arc::clone(&pipeline);
                tokio::spawn(async move {
                    while let Some(task) = worker_receiver.recv().await {
                        let outcome = Self::run_cycle(Arc::clone(&pipeline), task.cycle).await;
                        let _ = task.result_sender.send(outcome);
                    }
                })
            })
            .collect();

        Self {
            task_sender,
            workers,
        }
    }

    /// A pool sized to the machine.
    pub fn with_default_size(pipeline: Arc<VerificationPipeline>) -> Self {
        Self::new(pipeline, num_cpus::get())
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    async fn run_cycle(pipeline: Arc<VerificationPipeline>, cycle: CycleSpec) -> CycleOutcome {
        let key = cycle.key.clone();
        let joined = tokio::task::spawn_blocking(move || pipeline.process_cycle(&cycle)).await;
        match joined {
            Ok(Ok(report)) => CycleOutcome::Done(report),
            Ok(Err(error)) => {
                error!(cycle = %key, %error, "cycle failed");
                CycleOutcome::Failed { key, error }
            }
            Err(join_error) => {
                error!(cycle = %key, %join_error, "cycle worker panicked");
                CycleOutcome::Failed {
                    key,
                    error: VerifyError::WorkerFailure(format!("worker panicked: {join_error}")),
                }
            }
        }
    }

    /// Submits one cycle and waits for its outcome.
    pub async fn process_cycle(&self, cycle: CycleSpec) -> CycleOutcome {
        let key = cycle.key.clone();
        let (result_sender, result_receiver) = oneshot::channel();
        let task = CycleTask {
            cycle,
            result_sender,
        };

        if self.task_sender.send(task).is_err() {
            return CycleOutcome::Failed {
                key,
                error: VerifyError::WorkerFailure("worker pool is shut down".to_string()),
            };
        }
        result_receiver.await.unwrap_or_else(|_| CycleOutcome::Failed {
            key,
            error: VerifyError::WorkerFailure("worker dropped the cycle".to_string()),
        })
    }

    /// Runs every cycle and returns the outcomes in submission order.
    pub async fn process_all(&self, cycles: Vec<CycleSpec>) -> Vec<CycleOutcome> {
        let total = cycles.len();
        let outcomes =
            futures::future::join_all(cycles.into_iter().map(|cycle| self.process_cycle(cycle))).await;
        let failed = outcomes.iter().filter(|o| o.is_failure()).count();
        info!(total, failed, "all cycles processed");
        outcomes
    }
}
