use super::{Method, MethodError};
use crate::consts::{CROSSOVER_TOURNAMENT_SIZE, SURVIVOR_SAMPLING_ATTEMPTS};
use crate::evolution::candidate::{Candidate, CandidateId};
use crate::evolution::executor::Executor;
use crate::evolution::result::{rank, EvaluationResult};
use crate::evolution::traits::{Operator, Representation};
use crate::seeding::SeedStream;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

fn default_skew_factor() -> f64 {
    1.0
}

fn default_weight() -> f64 {
    0.2
}

/// Proportions of each kind of member in a new generation, normalised by their sum.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GeneticConfig {
    #[serde(default = "default_skew_factor")]
    pub skew_factor: f64,
    #[serde(default = "default_weight")]
    pub elite_weight: f64,
    #[serde(default = "default_weight")]
    pub random_weight: f64,
    #[serde(default = "default_weight")]
    pub mutated_weight: f64,
    #[serde(default = "default_weight")]
    pub crossed_weight: f64,
    #[serde(default = "default_weight")]
    pub new_weight: f64,
}

impl Default for GeneticConfig {
    fn default() -> Self {
        GeneticConfig {
            skew_factor: default_skew_factor(),
            elite_weight: default_weight(),
            random_weight: default_weight(),
            mutated_weight: default_weight(),
            crossed_weight: default_weight(),
            new_weight: default_weight(),
        }
    }
}

impl GeneticConfig {
    pub fn total_weight(&self) -> f64 {
        self.elite_weight
            + self.random_weight
            + self.mutated_weight
            + self.crossed_weight
            + self.new_weight
    }

    pub fn validate(&self) -> Result<(), MethodError> {
        let weights = [
            ("elite_weight", self.elite_weight),
            ("random_weight", self.random_weight),
            ("mutated_weight", self.mutated_weight),
            ("crossed_weight", self.crossed_weight),
            ("new_weight", self.new_weight),
        ];
        for (name, weight) in weights {
            if !weight.is_finite() || weight < 0. {
                return Err(MethodError::InvalidConfig(format!(
                    "{name} must be a finite non-negative number, got {weight}"
                )));
            }
        }
        if self.total_weight() <= 0. {
            return Err(MethodError::InvalidConfig(
                "At least one population weight must be positive".into(),
            ));
        }
        if !self.skew_factor.is_finite() || self.skew_factor < 0. {
            return Err(MethodError::InvalidConfig(format!(
                "skew_factor must be a finite non-negative number, got {}",
                self.skew_factor
            )));
        }
        Ok(())
    }

    fn share(&self, weight: f64, population_size: usize) -> usize {
        (weight / self.total_weight() * population_size as f64).round() as usize
    }
}

/// Rank-biased selection: rank `i` of `n` is drawn with probability proportional to
/// `(n - i)^skew`.
#[derive(Debug, Clone)]
pub struct SkewDistribution {
    probabilities: Vec<f64>,
}

impl SkewDistribution {
    pub fn new(size: usize, skew_factor: f64) -> Self {
        // relative to the top rank so large skews underflow to zero instead of overflowing
        let weights: Vec<f64> = (0..size)
            .map(|i| ((size - i) as f64 / size as f64).powf(skew_factor))
            .collect();
        let sum: f64 = weights.iter().sum();
        SkewDistribution {
            probabilities: weights.into_iter().map(|w| w / sum).collect(),
        }
    }

    pub fn probabilities(&self) -> &[f64] {
        &self.probabilities
    }

    pub fn len(&self) -> usize {
        self.probabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probabilities.is_empty()
    }

    /// Walks the cumulative distribution with one uniform draw. Rounding leftovers land on
    /// the last rank.
    pub fn sample<G: Rng>(&self, rng: &mut G) -> usize {
        let mut remaining: f64 = rng.gen();
        let last = self.probabilities.len().saturating_sub(1);
        let mut rank = 0;
        while rank < last && remaining > self.probabilities[rank] {
            remaining -= self.probabilities[rank];
            rank += 1;
        }
        rank
    }
}

/// New generation under construction. Membership is by candidate identity.
struct Pool<R> {
    members: Vec<Candidate<R>>,
    ids: HashSet<CandidateId>,
    capacity: usize,
}

impl<R> Pool<R> {
    fn new(capacity: usize) -> Self {
        Pool {
            members: Vec::with_capacity(capacity),
            ids: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    fn insert(&mut self, candidate: Candidate<R>) -> bool {
        if self.is_full() || !self.ids.insert(candidate.id()) {
            return false;
        }
        self.members.push(candidate);
        true
    }

    fn is_full(&self) -> bool {
        self.members.len() >= self.capacity
    }

    fn room(&self) -> usize {
        self.capacity - self.members.len()
    }
}

/// Genetic algorithm over a ranked population.
///
/// Each generation keeps the elite, resamples survivors, mutates and crosses skew-sampled
/// parents and tops up with fresh candidates. Evolution decisions draw from one sub-stream
/// per generation and every evaluation call gets its own sub-stream, both split on this
/// thread before the executor runs.
pub struct GeneticMethod<R: Representation> {
    config: GeneticConfig,
    population_size: usize,
    operator: Arc<dyn Operator<R>>,
    executor: Arc<dyn Executor<R>>,
    evolution_stream: SeedStream,
    evaluation_stream: SeedStream,
    ranked_candidates: Vec<EvaluationResult<R>>,
    total_generations: usize,
}

impl<R: Representation> GeneticMethod<R> {
    pub fn new(
        config: GeneticConfig,
        population_size: usize,
        ranked_candidates: Vec<EvaluationResult<R>>,
        operator: Arc<dyn Operator<R>>,
        executor: Arc<dyn Executor<R>>,
        evolution_stream: SeedStream,
        evaluation_stream: SeedStream,
    ) -> Result<Self, MethodError> {
        config.validate()?;
        if population_size == 0 {
            return Err(MethodError::InvalidConfig(
                "Population size cannot be zero".into(),
            ));
        }
        let mut ranked_candidates = ranked_candidates;
        rank(&mut ranked_candidates);

        Ok(GeneticMethod {
            config,
            population_size,
            operator,
            executor,
            evolution_stream,
            evaluation_stream,
            ranked_candidates,
            total_generations: 0,
        })
    }

    pub fn config(&self) -> &GeneticConfig {
        &self.config
    }

    pub fn population_size(&self) -> usize {
        self.population_size
    }

    pub fn best(&self) -> Option<&EvaluationResult<R>> {
        self.ranked_candidates.first()
    }

    fn has_converged(&self) -> bool {
        self.best()
            .is_some_and(|best| best.fitness >= self.executor.maximum_fitness())
    }

    /// Builds the next candidate pool from the current ranking.
    pub(crate) fn evolve(&self, rng: &mut SeedStream) -> Vec<Candidate<R>> {
        let n = self.population_size;
        let ranked = &self.ranked_candidates;
        let mut pool = Pool::new(n);

        if !ranked.is_empty() {
            let skew = SkewDistribution::new(ranked.len(), self.config.skew_factor);

            let elite_count = self.config.share(self.config.elite_weight, n).min(ranked.len());
            for result in &ranked[..elite_count] {
                pool.insert(result.candidate.clone());
            }

            let survivor_count = self
                .config
                .share(self.config.random_weight, n)
                .min(ranked.len() - elite_count)
                .min(pool.room());
            self.add_survivors(&mut pool, &skew, survivor_count, rng);

            let mutated_count = self.config.share(self.config.mutated_weight, n).min(pool.room());
            for _ in 0..mutated_count {
                let parent = &ranked[skew.sample(rng)].candidate;
                pool.insert(Candidate::new(
                    self.operator.mutate(parent.representation(), rng),
                ));
            }

            let crossed_count = self.config.share(self.config.crossed_weight, n).min(pool.room());
            let mut fallbacks = 0;
            for _ in 0..crossed_count {
                let first = &ranked[skew.sample(rng)].candidate;
                let second = match self.most_different(first, &skew, rng) {
                    Some(index) => &ranked[index].candidate,
                    None => {
                        fallbacks += 1;
                        &ranked[rng.gen_range(0..ranked.len())].candidate
                    }
                };
                pool.insert(Candidate::new(self.operator.cross(
                    first.representation(),
                    second.representation(),
                    rng,
                )));
            }
            if fallbacks > 0 {
                warn!(
                    fallbacks,
                    crossed = crossed_count,
                    "No tournament contestant differed from the first parent; used a uniform random partner."
                );
            }
        }

        while !pool.is_full() {
            pool.insert(Candidate::new(self.operator.create(rng)));
        }
        pool.members
    }

    fn add_survivors(
        &self,
        pool: &mut Pool<R>,
        skew: &SkewDistribution,
        count: usize,
        rng: &mut SeedStream,
    ) {
        let ranked = &self.ranked_candidates;
        for _ in 0..count {
            let sampled = (0..SURVIVOR_SAMPLING_ATTEMPTS)
                .any(|_| pool.insert(ranked[skew.sample(rng)].candidate.clone()));
            if !sampled {
                // sampling keeps colliding; take the best ranked candidate not yet in the pool
                debug!("Survivor sampling exhausted its attempts, falling back to rank order.");
                if let Some(result) = ranked.iter().find(|r| !pool.ids.contains(&r.candidate.id())) {
                    pool.insert(result.candidate.clone());
                }
            }
        }
    }

    /// Index of the contestant strictly most different from `first`, if any differs at all.
    fn most_different(
        &self,
        first: &Candidate<R>,
        skew: &SkewDistribution,
        rng: &mut SeedStream,
    ) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for _ in 0..CROSSOVER_TOURNAMENT_SIZE {
            let index = skew.sample(rng);
            let difference = self.operator.difference(
                first.representation(),
                self.ranked_candidates[index].candidate.representation(),
            );
            if difference > best.map_or(0., |(_, d)| d) {
                best = Some((index, difference));
            }
        }
        best.map(|(index, _)| index)
    }
}

impl<R: Representation> Method<R> for GeneticMethod<R> {
    fn run(&mut self, generations: usize) -> Result<&[EvaluationResult<R>], MethodError> {
        for _ in 0..generations {
            if self.has_converged() {
                debug!(
                    generation = self.total_generations,
                    "Maximum fitness reached, stopping early."
                );
                break;
            }

            let mut rng = self.evolution_stream.split();
            let candidates = self.evolve(&mut rng);
            let batch = self
                .executor
                .evaluate(&candidates, self.evaluation_stream.split())?;

            let generation = self.total_generations + 1;
            if !batch.coverage.is_complete() {
                if self.executor.is_strict() {
                    return Err(MethodError::Degraded {
                        generation,
                        coverage: batch.coverage,
                    });
                }
                warn!(
                    generation,
                    returned = batch.coverage.candidates_returned,
                    dispatched = batch.coverage.candidates_dispatched,
                    units_completed = batch.coverage.units_completed,
                    units_dispatched = batch.coverage.units_dispatched,
                    "Continuing with an incomplete generation."
                );
            }

            self.ranked_candidates = batch.results;
            self.total_generations = generation;
            info!(
                generation,
                best_fitness = self.best().map(|r| r.fitness),
                population = self.ranked_candidates.len(),
                "Generation evaluated."
            );
        }
        Ok(&self.ranked_candidates)
    }

    fn ranked_candidates(&self) -> &[EvaluationResult<R>] {
        &self.ranked_candidates
    }

    fn total_generations(&self) -> usize {
        self.total_generations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evolution::executor::{
        build_executor, ExecutorConfig, ExecutorKind, SequentialExecutor,
    };
    use crate::evolution::test_support::*;
    use crate::evolution::traits::{Problem, ProblemError};

    /// Fails every evaluation of a value above the threshold.
    struct FailAboveProblem(f64);

    impl Problem<Scalar> for FailAboveProblem {
        fn evaluate(&self, representation: &Scalar, _seed: u64) -> Result<f64, ProblemError> {
            if representation.0 > self.0 {
                return Err(ProblemError::EvaluationFailed("above threshold".into()));
            }
            Ok(representation.0)
        }
        fn input_count(&self) -> usize {
            0
        }
        fn output_count(&self) -> usize {
            1
        }
    }

    fn ranked(values: &[f64]) -> Vec<EvaluationResult<Scalar>> {
        scalars(values)
            .into_iter()
            .zip(values)
            .map(|(candidate, &fitness)| EvaluationResult { candidate, fitness })
            .collect()
    }

    fn method(
        population_size: usize,
        initial: Vec<EvaluationResult<Scalar>>,
        executor: Arc<dyn Executor<Scalar>>,
    ) -> GeneticMethod<Scalar> {
        GeneticMethod::new(
            GeneticConfig::default(),
            population_size,
            initial,
            Arc::new(ScalarOperator),
            executor,
            SeedStream::new(1),
            SeedStream::new(2),
        )
        .unwrap()
    }

    fn sequential(problem: Arc<dyn Problem<Scalar>>) -> Arc<dyn Executor<Scalar>> {
        Arc::new(SequentialExecutor::new(
            ExecutorConfig {
                variant_count: 3,
                ..Default::default()
            },
            problem,
        ))
    }

    #[test]
    fn test_config_validation() {
        assert!(GeneticConfig::default().validate().is_ok());
        let negative = GeneticConfig {
            crossed_weight: -0.1,
            ..Default::default()
        };
        assert!(negative.validate().is_err());
        let all_zero = GeneticConfig {
            elite_weight: 0.,
            random_weight: 0.,
            mutated_weight: 0.,
            crossed_weight: 0.,
            new_weight: 0.,
            ..Default::default()
        };
        assert!(all_zero.validate().is_err());
        let skewed = GeneticConfig {
            skew_factor: f64::NAN,
            ..Default::default()
        };
        assert!(skewed.validate().is_err());
    }

    #[test]
    fn test_zero_skew_is_uniform() {
        let skew = SkewDistribution::new(10, 0.);
        for &p in skew.probabilities() {
            assert!((p - 0.1).abs() < 1e-12);
        }

        let mut rng = SeedStream::new(99);
        let trials = 100_000;
        let mut counts = [0usize; 10];
        for _ in 0..trials {
            counts[skew.sample(&mut rng)] += 1;
        }
        for count in counts {
            let frequency = count as f64 / trials as f64;
            assert!((frequency - 0.1).abs() < 0.01, "frequency {frequency}");
        }
    }

    #[test]
    fn test_positive_skew_prefers_better_ranks() {
        let skew = SkewDistribution::new(10, 2.);
        let probabilities = skew.probabilities();
        assert!(probabilities.windows(2).all(|pair| pair[0] > pair[1]));
        assert!((probabilities.iter().sum::<f64>() - 1.).abs() < 1e-12);

        let mut rng = SeedStream::new(5);
        let mut counts = [0usize; 10];
        for _ in 0..50_000 {
            counts[skew.sample(&mut rng)] += 1;
        }
        assert!(counts[0] > counts[9]);
    }

    #[test]
    fn test_large_skew_stays_finite() {
        let skew = SkewDistribution::new(10, 400.);
        let probabilities = skew.probabilities();
        assert!(probabilities.iter().all(|p| p.is_finite()));
        assert!((probabilities.iter().sum::<f64>() - 1.).abs() < 1e-12);
        assert!(probabilities[0] > 0.99);
        assert!(probabilities[1] > 0.);
    }

    #[test]
    fn test_generation_keeps_top_two_as_elite() {
        let initial = ranked(&[90., 80., 70., 60., 50., 40., 30., 20., 10., 5.]);
        let top_two = [initial[0].candidate.id(), initial[1].candidate.id()];
        let method = method(10, initial, sequential(Arc::new(ConstantProblem(1.))));

        let pool = method.evolve(&mut SeedStream::new(3));
        assert_eq!(pool.len(), 10);
        assert_eq!([pool[0].id(), pool[1].id()], top_two);
        let distinct: HashSet<CandidateId> = pool.iter().map(|c| c.id()).collect();
        assert_eq!(distinct.len(), 10);
    }

    #[test]
    fn test_empty_population_is_refilled_with_new_candidates() {
        let method = method(6, Vec::new(), sequential(Arc::new(ConstantProblem(1.))));
        let pool = method.evolve(&mut SeedStream::new(3));
        assert_eq!(pool.len(), 6);
    }

    #[test]
    fn test_converged_population_still_crosses() {
        let initial: Vec<_> = (0..5)
            .map(|_| EvaluationResult {
                candidate: Candidate::new(Scalar(4.)),
                fitness: 1.,
            })
            .collect();
        let method = method(5, initial, sequential(Arc::new(ConstantProblem(1.))));
        let pool = method.evolve(&mut SeedStream::new(8));
        assert_eq!(pool.len(), 5);
    }

    #[test]
    fn test_sequential_run_is_reproducible() {
        let summary = || {
            let problem = Arc::new(SeededProblem { maximum: f64::MAX });
            let mut method = method(12, Vec::new(), sequential(problem));
            method
                .run(6)
                .unwrap()
                .iter()
                .map(|r| (r.candidate.representation().0.to_bits(), r.fitness.to_bits()))
                .collect::<Vec<_>>()
        };
        let first = summary();
        assert_eq!(first.len(), 12);
        assert_eq!(first, summary());
    }

    #[test]
    fn test_stops_at_maximum_fitness() {
        let problem = Arc::new(SeededProblem { maximum: 0. });
        let mut method = method(4, ranked(&[3., 2.]), sequential(problem));
        let population = method.run(10).unwrap();
        assert_eq!(population.len(), 2);
        assert_eq!(method.total_generations(), 0);
    }

    #[test]
    fn test_strict_executor_reports_degraded_generation() {
        let executor = build_executor::<Scalar>(
            ExecutorConfig {
                kind: ExecutorKind::VariantPool,
                worker_count: 2,
                variant_count: 2,
                ..Default::default()
            },
            Arc::new(FailAboveProblem(-1_000.)),
        )
        .unwrap();
        let initial = ranked(&[3., 2., 1.]);
        let ids: Vec<CandidateId> = initial.iter().map(|r| r.candidate.id()).collect();
        let mut method = method(5, initial, Arc::from(executor));

        match method.run(3) {
            Err(MethodError::Degraded { generation, coverage }) => {
                assert_eq!(generation, 1);
                assert_eq!(coverage.candidates_returned, 0);
            }
            other => panic!("unexpected outcome {:?}", other.map(|r| r.len())),
        }
        assert_eq!(method.total_generations(), 0);
        let kept: Vec<CandidateId> = method
            .ranked_candidates()
            .iter()
            .map(|r| r.candidate.id())
            .collect();
        assert_eq!(kept, ids);
    }

    #[test]
    fn test_lenient_executor_continues_with_partial_generations() {
        let executor = build_executor::<Scalar>(
            ExecutorConfig {
                kind: ExecutorKind::VariantPool,
                worker_count: 2,
                variant_count: 2,
                strict: false,
                ..Default::default()
            },
            Arc::new(FailAboveProblem(50.)),
        )
        .unwrap();
        let mut method = method(10, ranked(&[3., 2., 1.]), Arc::from(executor));

        let population = method.run(4).unwrap();
        assert!(population.len() <= 10);
        assert!(population.iter().all(|r| r.fitness <= 50.));
        assert_eq!(method.total_generations(), 4);
    }
}
