use crate::evolution::traits::{Problem, ProblemError, Representation, RepresentationContext};
use crate::seeding::SeedStream;
use rand::Rng;
use serde::{Deserialize, Serialize};

fn default_true_value() -> f32 {
    1.
}

fn default_false_value() -> f32 {
    -1.
}

fn default_tolerance() -> f32 {
    0.05
}

fn default_operation_count() -> usize {
    100
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct XorConfig {
    #[serde(default = "default_true_value")]
    pub true_value: f32,
    #[serde(default = "default_false_value")]
    pub false_value: f32,
    /// Maximum distance between output and expected value for an answer to count.
    #[serde(default = "default_tolerance")]
    pub tolerance: f32,
    /// Random input pairs per evaluation.
    #[serde(default = "default_operation_count")]
    pub operation_count: usize,
}

impl Default for XorConfig {
    fn default() -> Self {
        XorConfig {
            true_value: default_true_value(),
            false_value: default_false_value(),
            tolerance: default_tolerance(),
            operation_count: default_operation_count(),
        }
    }
}

/// Boolean XOR over two inputs. Fitness is the percentage of correct answers.
pub struct XorProblem {
    config: XorConfig,
}

impl XorProblem {
    pub const MAXIMUM_FITNESS: f64 = 100.;

    pub fn new(config: XorConfig) -> Result<Self, ProblemError> {
        if config.operation_count == 0 {
            return Err(ProblemError::InvalidConfig(
                "operation_count must be at least 1".into(),
            ));
        }
        if config.tolerance.is_nan() || config.tolerance <= 0. {
            return Err(ProblemError::InvalidConfig(format!(
                "tolerance must be positive, got {}",
                config.tolerance
            )));
        }
        Ok(XorProblem { config })
    }

    fn encode(&self, value: bool) -> f32 {
        if value {
            self.config.true_value
        } else {
            self.config.false_value
        }
    }

    fn check(&self, context: &mut dyn RepresentationContext, a: bool, b: bool) -> bool {
        let mut output = [0f32];
        context.compute(&[self.encode(a), self.encode(b)], &mut output);
        (output[0] - self.encode(a ^ b)).abs() < self.config.tolerance
    }
}

impl<R: Representation> Problem<R> for XorProblem {
    fn evaluate(&self, representation: &R, variant_seed: u64) -> Result<f64, ProblemError> {
        self.check_shape(representation)?;

        let mut stream = SeedStream::new(variant_seed);
        let mut context = representation.create_context(stream.split());
        let correct = (0..self.config.operation_count)
            .filter(|_| {
                let (a, b) = (stream.gen::<bool>(), stream.gen::<bool>());
                self.check(&mut *context, a, b)
            })
            .count();

        Ok(correct as f64 / self.config.operation_count as f64 * Self::MAXIMUM_FITNESS)
    }

    fn maximum_fitness(&self) -> f64 {
        Self::MAXIMUM_FITNESS
    }

    fn input_count(&self) -> usize {
        2
    }

    fn output_count(&self) -> usize {
        1
    }
}
