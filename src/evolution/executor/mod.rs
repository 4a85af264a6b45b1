use crate::evolution::candidate::{Candidate, CandidateId};
use crate::evolution::result::EvaluationBatch;
use crate::evolution::traits::{Problem, ProblemError, Representation};
use crate::seeding::SeedStream;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

mod fork_join;
mod pull_queue;
mod sequential;

pub use fork_join::{CandidatePoolExecutor, VariantPoolExecutor};
pub use pull_queue::PullQueueExecutor;
pub use sequential::SequentialExecutor;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Evaluation of candidate {candidate} failed: {source}")]
    Evaluation {
        candidate: CandidateId,
        #[source]
        source: ProblemError,
    },
    #[error("Evaluation was aborted through the cancellation token.")]
    Aborted,
    #[error("Could not start the worker pool: `{0}`")]
    WorkerPool(String),
    #[error("Invalid executor configuration: `{0}`")]
    InvalidConfig(String),
}

/// Evaluates batches of candidates against a problem and ranks them best-first.
///
/// Every strategy draws `variant_count` seeds from the stream it is handed before doing any
/// work, and variant `i` uses the same seed for every candidate in the call. Nothing inside an
/// executor is mutated by `evaluate`, so concurrent calls are safe.
pub trait Executor<R: Representation>: Send + Sync {
    fn evaluate(
        &self,
        candidates: &[Candidate<R>],
        seeds: SeedStream,
    ) -> Result<EvaluationBatch<R>, ExecutorError>;

    fn config(&self) -> &ExecutorConfig;

    fn maximum_fitness(&self) -> f64;

    fn cancellation_token(&self) -> CancellationToken;

    fn is_strict(&self) -> bool {
        self.config().strict
    }
}

/// Shared abort flag. Once cancelled it stays cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutorKind {
    /// Single-threaded reference; evaluation failures are fatal.
    #[default]
    Sequential,
    /// Worker pool pulling from a shared queue; failed units are retried, supports timeout.
    PullQueue,
    /// One fork-join task per candidate; failures are fatal.
    CandidatePool,
    /// One fork-join task per variant; failed entries are skipped when averaging.
    VariantPool,
}

fn default_variant_count() -> usize {
    1
}

fn default_strict() -> bool {
    true
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ExecutorConfig {
    #[serde(default)]
    pub kind: ExecutorKind,
    /// 0 uses the available hardware parallelism.
    #[serde(default)]
    pub worker_count: usize,
    #[serde(default = "default_variant_count")]
    pub variant_count: usize,
    /// 0 disables the timeout. Only honoured by [`ExecutorKind::PullQueue`].
    #[serde(default)]
    pub timeout_ms: u64,
    /// Require every variant of every candidate to complete.
    #[serde(default = "default_strict")]
    pub strict: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorConfig {
            kind: ExecutorKind::default(),
            worker_count: 0,
            variant_count: default_variant_count(),
            timeout_ms: 0,
            strict: default_strict(),
        }
    }
}

impl ExecutorConfig {
    pub fn resolved_worker_count(&self) -> usize {
        if self.worker_count == 0 {
            num_cpus::get()
        } else {
            self.worker_count
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }

    pub fn validate(&self) -> Result<(), ExecutorError> {
        if self.variant_count == 0 {
            return Err(ExecutorError::InvalidConfig(
                "variant_count must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Instantiates the strategy selected by `config.kind`.
pub fn build_executor<R: Representation + 'static>(
    config: ExecutorConfig,
    problem: Arc<dyn Problem<R>>,
) -> Result<Box<dyn Executor<R>>, ExecutorError> {
    config.validate()?;
    if config.timeout().is_some()
        && !matches!(config.kind, ExecutorKind::PullQueue)
    {
        warn!(
            kind = ?config.kind,
            timeout_ms = config.timeout_ms,
            "Timeout is only honoured by the pull-queue executor and will be ignored."
        );
    }

    Ok(match config.kind {
        ExecutorKind::Sequential => Box::new(SequentialExecutor::new(config, problem)),
        ExecutorKind::PullQueue => Box::new(PullQueueExecutor::new(config, problem)),
        ExecutorKind::CandidatePool => Box::new(CandidatePoolExecutor::new(config, problem)?),
        ExecutorKind::VariantPool => Box::new(VariantPoolExecutor::new(config, problem)?),
    })
}
