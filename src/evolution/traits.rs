use crate::seeding::SeedStream;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProblemError {
    #[error("Evaluation failed: `{0}`")]
    EvaluationFailed(String),
    #[error("Representation has {actual:?} inputs/outputs but the problem expects {expected:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },
    #[error("Invalid problem configuration: `{0}`")]
    InvalidConfig(String),
}

/// Per-evaluation scratch state bound to one representation.
///
/// A context owns every mutable buffer it needs (and its own random stream), so many contexts
/// over the same representation can run on different threads at once.
pub trait RepresentationContext {
    fn compute(&mut self, inputs: &[f32], outputs: &mut [f32]);
}

/// A candidate solution encoding. Immutable once created.
pub trait Representation: Send + Sync + std::fmt::Debug {
    fn input_count(&self) -> usize;
    fn output_count(&self) -> usize;
    fn create_context(&self, stream: SeedStream) -> Box<dyn RepresentationContext + '_>;
}

/// Creates and recombines representations.
///
/// Operators never modify their inputs; every call returns a fresh representation. All
/// randomness comes from the stream handed in by the caller.
pub trait Operator<R: Representation>: Send + Sync {
    fn create(&self, rng: &mut SeedStream) -> R;
    fn mutate(&self, source: &R, rng: &mut SeedStream) -> R;
    fn cross(&self, first: &R, second: &R, rng: &mut SeedStream) -> R;
    /// Symmetric, non-negative distance between two representations.
    fn difference(&self, first: &R, second: &R) -> f64;
}

/// A fitness problem. Higher fitness is better.
///
/// `evaluate` must be a pure function of its inputs: the same representation and variant
/// seed always produce the same fitness.
pub trait Problem<R: Representation>: Send + Sync {
    fn evaluate(&self, representation: &R, variant_seed: u64) -> Result<f64, ProblemError>;

    fn maximum_fitness(&self) -> f64 {
        f64::MAX
    }

    fn input_count(&self) -> usize;
    fn output_count(&self) -> usize;

    fn check_shape(&self, representation: &R) -> Result<(), ProblemError> {
        let expected = (self.input_count(), self.output_count());
        let actual = (representation.input_count(), representation.output_count());
        if expected != actual {
            return Err(ProblemError::ShapeMismatch { expected, actual });
        }
        Ok(())
    }
}
