use crate::evolution::candidate::Candidate;
use crate::evolution::executor::{build_executor, Executor, ExecutorConfig};
use crate::evolution::method::{GeneticConfig, GeneticMethod, Method, MethodError};
use crate::evolution::result::EvaluationResult;
use crate::evolution::traits::{Operator, Problem, Representation};
use crate::seeding::SeedStream;
use std::sync::Arc;
use tracing::{info, warn};

/// Wires a problem, an operator, an executor and the genetic method together.
///
/// `prepare` builds the executor, creates and evaluates the initial population and hands it
/// to a fresh method; `run` then drives generations. All randomness is derived from the two
/// seeds given at construction.
pub struct Recipe<R: Representation + 'static> {
    problem: Arc<dyn Problem<R>>,
    operator: Arc<dyn Operator<R>>,
    executor_config: ExecutorConfig,
    method_config: GeneticConfig,
    evolution_stream: SeedStream,
    evaluation_stream: SeedStream,
    method: Option<GeneticMethod<R>>,
}

impl<R: Representation + 'static> Recipe<R> {
    pub fn new(
        problem: Arc<dyn Problem<R>>,
        operator: Arc<dyn Operator<R>>,
        executor_config: ExecutorConfig,
        method_config: GeneticConfig,
        evolution_seed: u64,
        evaluation_seed: u64,
    ) -> Self {
        Recipe {
            problem,
            operator,
            executor_config,
            method_config,
            evolution_stream: SeedStream::new(evolution_seed),
            evaluation_stream: SeedStream::new(evaluation_seed),
            method: None,
        }
    }

    /// Creates `candidate_count` random candidates, evaluates them and prepares the method.
    pub fn prepare(&mut self, candidate_count: usize) -> Result<&[EvaluationResult<R>], MethodError> {
        let executor = self.executor()?;

        let mut rng = self.evolution_stream.split();
        let candidates: Vec<Candidate<R>> = (0..candidate_count)
            .map(|_| Candidate::new(self.operator.create(&mut rng)))
            .collect();
        if let Some(first) = candidates.first() {
            self.problem
                .check_shape(first.representation())
                .map_err(|e| MethodError::InvalidConfig(e.to_string()))?;
        }

        let batch = executor.evaluate(&candidates, self.evaluation_stream.split())?;
        if !batch.coverage.is_complete() {
            if executor.is_strict() {
                return Err(MethodError::Degraded {
                    generation: 0,
                    coverage: batch.coverage,
                });
            }
            warn!(
                returned = batch.coverage.candidates_returned,
                dispatched = batch.coverage.candidates_dispatched,
                "Initial population came back incomplete."
            );
        }
        info!(
            candidates = candidate_count,
            best_fitness = batch.results.first().map(|r| r.fitness),
            "Initial population evaluated."
        );

        self.install(candidate_count, batch.results, executor)
    }

    /// Prepares the method from an already ranked population, skipping initial evaluation.
    pub fn prepare_ranked(
        &mut self,
        ranked_candidates: Vec<EvaluationResult<R>>,
    ) -> Result<&[EvaluationResult<R>], MethodError> {
        let executor = self.executor()?;
        let population_size = ranked_candidates.len();
        self.install(population_size, ranked_candidates, executor)
    }

    pub fn run(&mut self, generations: usize) -> Result<&[EvaluationResult<R>], MethodError> {
        self.method
            .as_mut()
            .ok_or(MethodError::NotPrepared)?
            .run(generations)
    }

    pub fn method(&self) -> Option<&GeneticMethod<R>> {
        self.method.as_ref()
    }

    fn executor(&self) -> Result<Arc<dyn Executor<R>>, MethodError> {
        let executor = build_executor(self.executor_config.clone(), Arc::clone(&self.problem))?;
        Ok(Arc::from(executor))
    }

    fn install(
        &mut self,
        population_size: usize,
        ranked_candidates: Vec<EvaluationResult<R>>,
        executor: Arc<dyn Executor<R>>,
    ) -> Result<&[EvaluationResult<R>], MethodError> {
        let method = GeneticMethod::new(
            self.method_config.clone(),
            population_size,
            ranked_candidates,
            Arc::clone(&self.operator),
            executor,
            self.evolution_stream.split(),
            self.evaluation_stream.split(),
        )?;
        Ok(self.method.insert(method).ranked_candidates())
    }
}
