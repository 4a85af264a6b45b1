use super::{check_non_negative, check_probability, RepresentationError};
use crate::evolution::traits::{Operator, Representation, RepresentationContext};
use crate::seeding::SeedStream;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

fn default_scale() -> f32 {
    1.
}

/// One tunable integer with its admissible range.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    #[serde(default)]
    pub meta_information: String,
    pub minimum: i32,
    pub maximum: i32,
    /// Factor applied to the value when it is read out by a context.
    #[serde(default = "default_scale")]
    pub scale: f32,
}

impl Parameter {
    pub fn new(name: impl Into<String>, minimum: i32, maximum: i32, scale: f32) -> Self {
        Parameter {
            name: name.into(),
            meta_information: String::new(),
            minimum,
            maximum,
            scale,
        }
    }

    fn range(&self) -> i64 {
        self.maximum as i64 - self.minimum as i64
    }

    fn clamp(&self, value: i64) -> i32 {
        value.clamp(self.minimum as i64, self.maximum as i64) as i32
    }
}

/// A vector of integer values, one per [`Parameter`]. Output `i` is `value_i * scale_i`;
/// inputs are accepted and ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSet {
    input_count: usize,
    parameters: Arc<[Parameter]>,
    values: Vec<i32>,
}

impl ParameterSet {
    pub fn new(
        input_count: usize,
        parameters: Arc<[Parameter]>,
        values: Vec<i32>,
    ) -> Result<Self, RepresentationError> {
        if values.len() != parameters.len() {
            return Err(RepresentationError::InvalidShape(format!(
                "{} values for {} parameters",
                values.len(),
                parameters.len()
            )));
        }
        if let Some((parameter, value)) = parameters
            .iter()
            .zip(&values)
            .find(|&(p, &v)| v < p.minimum || v > p.maximum)
        {
            return Err(RepresentationError::InvalidParameter {
                name: parameter.name.clone(),
                reason: format!(
                    "value {value} outside [{}, {}]",
                    parameter.minimum, parameter.maximum
                ),
            });
        }
        Ok(ParameterSet {
            input_count,
            parameters,
            values,
        })
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn values(&self) -> &[i32] {
        &self.values
    }

    fn with_values(&self, values: Vec<i32>) -> Self {
        ParameterSet {
            input_count: self.input_count,
            parameters: Arc::clone(&self.parameters),
            values,
        }
    }
}

struct ParameterSetContext<'a> {
    set: &'a ParameterSet,
}

impl RepresentationContext for ParameterSetContext<'_> {
    fn compute(&mut self, _inputs: &[f32], outputs: &mut [f32]) {
        for ((output, &value), parameter) in outputs
            .iter_mut()
            .zip(&self.set.values)
            .zip(self.set.parameters.iter())
        {
            *output = value as f32 * parameter.scale;
        }
    }
}

impl Representation for ParameterSet {
    fn input_count(&self) -> usize {
        self.input_count
    }

    fn output_count(&self) -> usize {
        self.parameters.len()
    }

    fn create_context(&self, _stream: SeedStream) -> Box<dyn RepresentationContext + '_> {
        Box::new(ParameterSetContext { set: self })
    }
}

fn default_direct_mutation_probability() -> f64 {
    0.2
}

fn default_mutation_severity() -> f64 {
    0.1
}

fn default_proportional_mutation_probability() -> f64 {
    0.1
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ParameterSetOpConfig {
    #[serde(default = "default_direct_mutation_probability")]
    pub direct_mutation_probability: f64,
    /// Fraction of the parameter range a direct mutation may move the value by.
    #[serde(default = "default_mutation_severity")]
    pub direct_mutation_severity: f64,
    #[serde(default = "default_proportional_mutation_probability")]
    pub proportional_mutation_probability: f64,
    /// Fraction of the current value a proportional mutation may move it by.
    #[serde(default = "default_mutation_severity")]
    pub proportional_mutation_severity: f64,
}

impl Default for ParameterSetOpConfig {
    fn default() -> Self {
        ParameterSetOpConfig {
            direct_mutation_probability: default_direct_mutation_probability(),
            direct_mutation_severity: default_mutation_severity(),
            proportional_mutation_probability: default_proportional_mutation_probability(),
            proportional_mutation_severity: default_mutation_severity(),
        }
    }
}

impl ParameterSetOpConfig {
    pub fn validate(&self) -> Result<(), RepresentationError> {
        check_probability("direct_mutation_probability", self.direct_mutation_probability)?;
        check_probability(
            "proportional_mutation_probability",
            self.proportional_mutation_probability,
        )?;
        check_non_negative("direct_mutation_severity", self.direct_mutation_severity)?;
        check_non_negative(
            "proportional_mutation_severity",
            self.proportional_mutation_severity,
        )
    }
}

pub struct ParameterSetOperator {
    config: ParameterSetOpConfig,
    input_count: usize,
    parameters: Arc<[Parameter]>,
}

impl ParameterSetOperator {
    pub fn new(
        config: ParameterSetOpConfig,
        input_count: usize,
        parameters: Vec<Parameter>,
    ) -> Result<Self, RepresentationError> {
        config.validate()?;
        if let Some(parameter) = parameters.iter().find(|p| p.minimum > p.maximum) {
            return Err(RepresentationError::InvalidParameter {
                name: parameter.name.clone(),
                reason: format!(
                    "minimum {} exceeds maximum {}",
                    parameter.minimum, parameter.maximum
                ),
            });
        }
        Ok(ParameterSetOperator {
            config,
            input_count,
            parameters: parameters.into(),
        })
    }

    pub fn parameters(&self) -> Arc<[Parameter]> {
        Arc::clone(&self.parameters)
    }
}

impl Operator<ParameterSet> for ParameterSetOperator {
    fn create(&self, rng: &mut SeedStream) -> ParameterSet {
        let values = self
            .parameters
            .iter()
            .map(|p| rng.gen_range(p.minimum..=p.maximum))
            .collect();
        ParameterSet {
            input_count: self.input_count,
            parameters: Arc::clone(&self.parameters),
            values,
        }
    }

    fn mutate(&self, source: &ParameterSet, rng: &mut SeedStream) -> ParameterSet {
        let config = &self.config;
        let values = source
            .values
            .iter()
            .zip(source.parameters.iter())
            .map(|(&value, parameter)| {
                let mut value = value as i64;
                if rng.gen::<f64>() < config.direct_mutation_probability {
                    let range =
                        (config.direct_mutation_severity * parameter.range() as f64) as i64;
                    value = value.saturating_add(rng.gen_range(-range..=range));
                }
                if rng.gen::<f64>() < config.proportional_mutation_probability {
                    let range = (config.proportional_mutation_severity * value as f64).abs() as i64;
                    value = value.saturating_add(rng.gen_range(-range..=range));
                }
                parameter.clamp(value)
            })
            .collect();
        source.with_values(values)
    }

    /// Copies a random contiguous slice of one parent over the other; which parent donates
    /// is itself random.
    fn cross(&self, first: &ParameterSet, second: &ParameterSet, rng: &mut SeedStream) -> ParameterSet {
        let (base, donor) = if rng.gen::<bool>() {
            (second, first)
        } else {
            (first, second)
        };
        let count = base.values.len().min(donor.values.len());
        if count == 0 {
            return base.clone();
        }
        let start = rng.gen_range(0..count);
        let stop = rng.gen_range(start + 1..=count);

        let mut values = base.values.clone();
        values[start..stop].copy_from_slice(&donor.values[start..stop]);
        base.with_values(values)
    }

    /// Sum of per-parameter distances, each normalised by the parameter's range.
    fn difference(&self, first: &ParameterSet, second: &ParameterSet) -> f64 {
        first
            .values
            .iter()
            .zip(&second.values)
            .zip(first.parameters.iter())
            .filter(|(_, parameter)| parameter.range() > 0)
            .map(|((&a, &b), parameter)| (a as f64 - b as f64).abs() / parameter.range() as f64)
            .sum()
    }
}
