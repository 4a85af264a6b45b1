//! Synthetic representations and problems shared by the executor and method tests.

use crate::evolution::candidate::Candidate;
use crate::evolution::traits::{
    Operator, Problem, ProblemError, Representation, RepresentationContext,
};
use crate::seeding::SeedStream;
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scalar(pub f64);

struct ScalarContext(f64);

impl RepresentationContext for ScalarContext {
    fn compute(&mut self, _inputs: &[f32], outputs: &mut [f32]) {
        outputs[0] = self.0 as f32;
    }
}

impl Representation for Scalar {
    fn input_count(&self) -> usize {
        0
    }
    fn output_count(&self) -> usize {
        1
    }
    fn create_context(&self, _stream: SeedStream) -> Box<dyn RepresentationContext + '_> {
        Box::new(ScalarContext(self.0))
    }
}

pub fn scalars(values: &[f64]) -> Vec<Candidate<Scalar>> {
    values.iter().map(|&v| Candidate::new(Scalar(v))).collect()
}

pub struct ScalarOperator;

impl Operator<Scalar> for ScalarOperator {
    fn create(&self, rng: &mut SeedStream) -> Scalar {
        Scalar(rng.gen_range(0.0..100.0))
    }
    fn mutate(&self, source: &Scalar, rng: &mut SeedStream) -> Scalar {
        Scalar(source.0 + rng.gen_range(-1.0..1.0))
    }
    fn cross(&self, first: &Scalar, second: &Scalar, _rng: &mut SeedStream) -> Scalar {
        Scalar((first.0 + second.0) / 2.)
    }
    fn difference(&self, first: &Scalar, second: &Scalar) -> f64 {
        (first.0 - second.0).abs()
    }
}

pub struct ConstantProblem(pub f64);

impl Problem<Scalar> for ConstantProblem {
    fn evaluate(&self, _representation: &Scalar, _variant_seed: u64) -> Result<f64, ProblemError> {
        Ok(self.0)
    }
    fn input_count(&self) -> usize {
        0
    }
    fn output_count(&self) -> usize {
        1
    }
}

/// Fitness depends on both the candidate and the variant seed.
pub struct SeededProblem {
    pub maximum: f64,
}

impl SeededProblem {
    pub fn expected(value: f64, seed: u64) -> f64 {
        value + (seed % 1_000) as f64 / 1_000.
    }
}

impl Problem<Scalar> for SeededProblem {
    fn evaluate(&self, representation: &Scalar, variant_seed: u64) -> Result<f64, ProblemError> {
        Ok(SeededProblem::expected(representation.0, variant_seed))
    }
    fn maximum_fitness(&self) -> f64 {
        self.maximum
    }
    fn input_count(&self) -> usize {
        0
    }
    fn output_count(&self) -> usize {
        1
    }
}

/// Fails exactly once for one (value, seed) pair, then behaves like [`SeededProblem`].
pub struct FailOnceProblem {
    pub value: f64,
    pub seed: u64,
    pub tripped: AtomicBool,
}

impl FailOnceProblem {
    pub fn new(value: f64, seed: u64) -> Self {
        FailOnceProblem {
            value,
            seed,
            tripped: AtomicBool::new(false),
        }
    }
}

impl Problem<Scalar> for FailOnceProblem {
    fn evaluate(&self, representation: &Scalar, variant_seed: u64) -> Result<f64, ProblemError> {
        if representation.0 == self.value
            && variant_seed == self.seed
            && !self.tripped.swap(true, Ordering::SeqCst)
        {
            return Err(ProblemError::EvaluationFailed("injected".into()));
        }
        Ok(SeededProblem::expected(representation.0, variant_seed))
    }
    fn input_count(&self) -> usize {
        0
    }
    fn output_count(&self) -> usize {
        1
    }
}

/// Always fails for one value; counts how often it was asked.
pub struct AlwaysFailProblem {
    pub value: f64,
    pub attempts: AtomicUsize,
}

impl AlwaysFailProblem {
    pub fn new(value: f64) -> Self {
        AlwaysFailProblem {
            value,
            attempts: AtomicUsize::new(0),
        }
    }
}

impl Problem<Scalar> for AlwaysFailProblem {
    fn evaluate(&self, representation: &Scalar, variant_seed: u64) -> Result<f64, ProblemError> {
        if representation.0 == self.value {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            return Err(ProblemError::EvaluationFailed("always".into()));
        }
        Ok(SeededProblem::expected(representation.0, variant_seed))
    }
    fn input_count(&self) -> usize {
        0
    }
    fn output_count(&self) -> usize {
        1
    }
}
