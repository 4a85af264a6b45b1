use super::{CancellationToken, Executor, ExecutorConfig, ExecutorError};
use crate::evolution::candidate::Candidate;
use crate::evolution::result::{EvaluationBatch, FitnessAccumulator};
use crate::evolution::traits::{Problem, Representation};
use crate::seeding::SeedStream;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::Arc;
use tracing::{debug, warn};

fn build_pool(config: &ExecutorConfig, name: &'static str) -> Result<ThreadPool, ExecutorError> {
    ThreadPoolBuilder::new()
        .num_threads(config.resolved_worker_count())
        .thread_name(move |index| format!("{name}-{index}"))
        .build()
        .map_err(|e| ExecutorError::WorkerPool(e.to_string()))
}

/// One fork-join task per candidate, each running that candidate's variants in order.
///
/// A failing evaluation is fatal for the whole call.
pub struct CandidatePoolExecutor<R: Representation> {
    config: ExecutorConfig,
    problem: Arc<dyn Problem<R>>,
    cancellation: CancellationToken,
    pool: ThreadPool,
}

impl<R: Representation> CandidatePoolExecutor<R> {
    pub fn new(config: ExecutorConfig, problem: Arc<dyn Problem<R>>) -> Result<Self, ExecutorError> {
        let pool = build_pool(&config, "candidate-pool")?;
        Ok(CandidatePoolExecutor {
            config,
            problem,
            cancellation: CancellationToken::new(),
            pool,
        })
    }
}

impl<R: Representation> Executor<R> for CandidatePoolExecutor<R> {
    fn evaluate(
        &self,
        candidates: &[Candidate<R>],
        mut seeds: SeedStream,
    ) -> Result<EvaluationBatch<R>, ExecutorError> {
        let variant_seeds = seeds.seeds(self.config.variant_count);
        debug!(
            candidates = candidates.len(),
            threads = self.pool.current_num_threads(),
            "Candidate pool evaluation started."
        );

        let rows: Vec<Vec<f64>> = self.pool.install(|| {
            candidates
                .par_iter()
                .map(|candidate| {
                    variant_seeds
                        .iter()
                        .map(|&variant_seed| {
                            if self.cancellation.is_cancelled() {
                                return Err(ExecutorError::Aborted);
                            }
                            self.problem
                                .evaluate(candidate.representation(), variant_seed)
                                .map_err(|source| ExecutorError::Evaluation {
                                    candidate: candidate.id(),
                                    source,
                                })
                        })
                        .collect::<Result<Vec<f64>, ExecutorError>>()
                })
                .collect::<Result<Vec<_>, ExecutorError>>()
        })?;

        if self.cancellation.is_cancelled() {
            return Err(ExecutorError::Aborted);
        }

        let mut accumulator = FitnessAccumulator::new(candidates, variant_seeds.len());
        for (candidate_index, row) in rows.into_iter().enumerate() {
            for fitness in row {
                accumulator.record(candidate_index, fitness);
            }
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

/// One fork-join task per variant, each sweeping every candidate with that variant's seed.
///
/// Failed evaluations are stored as NaN and left out of the candidate's mean. A candidate
/// whose every variant failed is missing from the results.
pub struct VariantPoolExecutor<R: Representation> {
    config: ExecutorConfig,
    problem: Arc<dyn Problem<R>>,
    cancellation: CancellationToken,
    pool: ThreadPool,
}

impl<R: Representation> VariantPoolExecutor<R> {
    pub fn new(config: ExecutorConfig, problem: Arc<dyn Problem<R>>) -> Result<Self, ExecutorError> {
        let pool = build_pool(&config, "variant-pool")?;
        Ok(VariantPoolExecutor {
            config,
            problem,
            cancellation: CancellationToken::new(),
            pool,
        })
    }
}

impl<R: Representation> Executor<R> for VariantPoolExecutor<R> {
    fn evaluate(
        &self,
        candidates: &[Candidate<R>],
        mut seeds: SeedStream,
    ) -> Result<EvaluationBatch<R>, ExecutorError> {
        let variant_seeds = seeds.seeds(self.config.variant_count);
        debug!(
            variants = variant_seeds.len(),
            threads = self.pool.current_num_threads(),
            "Variant pool evaluation started."
        );

        let columns: Vec<Vec<f64>> = self.pool.install(|| {
            variant_seeds
                .par_iter()
                .map(|&variant_seed| {
                    candidates
                        .iter()
                        .map(|candidate| {
                            if self.cancellation.is_cancelled() {
                                return Err(ExecutorError::Aborted);
                            }
                            Ok(self
                                .problem
                                .evaluate(candidate.representation(), variant_seed)
                                .unwrap_or_else(|error| {
                                    warn!(
                                        candidate = %candidate.id(),
                                        variant_seed,
                                        %error,
                                        "Variant evaluation failed; skipping it."
                                    );
                                    f64::NAN
                                }))
                        })
                        .collect::<Result<Vec<f64>, ExecutorError>>()
                })
                .collect::<Result<Vec<_>, ExecutorError>>()
        })?;

        if self.cancellation.is_cancelled() {
            return Err(ExecutorError::Aborted);
        }

        // fold columns back in variant order so sums match the sequential order
        let mut accumulator = FitnessAccumulator::new(candidates, variant_seeds.len());
        for column in columns {
            for (candidate_index, fitness) in column.into_iter().enumerate() {
                accumulator.record(candidate_index, fitness);
            }
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
