use super::{CancellationToken, Executor, ExecutorConfig, ExecutorError};
use crate::evolution::candidate::Candidate;
use crate::evolution::result::{EvaluationBatch, FitnessAccumulator};
use crate::evolution::traits::{Problem, Representation};
use crate::seeding::SeedStream;
use std::sync::Arc;
use tracing::debug;

/// Evaluates every variant of every candidate on the caller's thread.
///
/// This is the reference the concurrent strategies are checked against. A failing evaluation
/// aborts the whole call with [`ExecutorError::Evaluation`].
pub struct SequentialExecutor<R: Representation> {
    config: ExecutorConfig,
    problem: Arc<dyn Problem<R>>,
    cancellation: CancellationToken,
}

impl<R: Representation> SequentialExecutor<R> {
    pub fn new(config: ExecutorConfig, problem: Arc<dyn Problem<R>>) -> Self {
        SequentialExecutor {
            config,
            problem,
            cancellation: CancellationToken::new(),
        }
    }
}

impl<R: Representation> Executor<R> for SequentialExecutor<R> {
    fn evaluate(
        &self,
        candidates: &[Candidate<R>],
        mut seeds: SeedStream,
    ) -> Result<EvaluationBatch<R>, ExecutorError> {
        let variant_seeds = seeds.seeds(self.config.variant_count);
        let mut accumulator = FitnessAccumulator::new(candidates, variant_seeds.len());
        debug!(
            candidates = candidates.len(),
            variants = variant_seeds.len(),
            "Sequential evaluation started."
        );

        for (candidate_index, candidate) in candidates.iter().enumerate() {
            for &variant_seed in &variant_seeds {
                if self.cancellation.is_cancelled() {
                    return Err(ExecutorError::Aborted);
                }
                let fitness = self
                    .problem
                    .evaluate(candidate.representation(), variant_seed)
                    .map_err(|source| ExecutorError::Evaluation {
                        candidate: candidate.id(),
                        source,
                    })?;
                accumulator.record(candidate_index, fitness);
            }
        }

        if self.cancellation.is_cancelled() {
            return Err(ExecutorError::Aborted);
        }
        Ok(accumulator.finish())
    }

    fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    fn maximum_fitness(&self) -> f64 {
        self.problem.maximum_fitness()
    }

    fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evolution::test_support::*;

    #[test]
    fn test_repeated_runs_are_bit_identical() {
        let executor = SequentialExecutor::<Scalar>::new(
            ExecutorConfig {
                variant_count: 4,
                ..Default::default()
            },
            Arc::new(SeededProblem { maximum: 100. }),
        );
        let candidates = scalars(&[0.5, 7.25, 3., 7.25]);
        let first = executor.evaluate(&candidates, SeedStream::new(3)).unwrap();
        let second = executor.evaluate(&candidates, SeedStream::new(3)).unwrap();
        let summary = |batch: &EvaluationBatch<Scalar>| {
            batch
                .results
                .iter()
                .map(|r| (r.candidate.id(), r.fitness.to_bits()))
                .collect::<Vec<_>>()
        };
        assert_eq!(summary(&first), summary(&second));
    }

    #[test]
    fn test_failure_is_fatal() {
        let seed = SeedStream::new(1).seeds(1)[0];
        let executor = SequentialExecutor::<Scalar>::new(
            ExecutorConfig::default(),
            Arc::new(FailOnceProblem::new(2., seed)),
        );
        let candidates = scalars(&[1., 2.]);
        let error = executor
            .evaluate(&candidates, SeedStream::new(1))
            .unwrap_err();
        match error {
            ExecutorError::Evaluation { candidate, .. } => assert_eq!(candidate, candidates[1].id()),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
