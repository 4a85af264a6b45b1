use crate::evolution::executor::ExecutorError;
use crate::evolution::result::{Coverage, EvaluationResult};
use crate::evolution::traits::Representation;
use thiserror::Error;

pub mod genetic;

pub use genetic::{GeneticConfig, GeneticMethod, SkewDistribution};

#[derive(Error, Debug)]
pub enum MethodError {
    #[error(transparent)]
    Executor(#[from] ExecutorError),
    #[error("Generation {generation} came back incomplete ({coverage:?}) from a strict executor.")]
    Degraded {
        generation: usize,
        coverage: Coverage,
    },
    #[error("Invalid method configuration: `{0}`")]
    InvalidConfig(String),
    #[error("The recipe has no prepared method; call prepare first.")]
    NotPrepared,
}

/// A generational search over a ranked population.
pub trait Method<R: Representation> {
    /// Runs up to `generations` generations and returns the ranked population.
    ///
    /// Stops early once the best fitness reaches the problem's maximum. On error the
    /// population and generation count from the last successful generation are kept.
    fn run(&mut self, generations: usize) -> Result<&[EvaluationResult<R>], MethodError>;

    fn ranked_candidates(&self) -> &[EvaluationResult<R>];

    fn total_generations(&self) -> usize;
}
