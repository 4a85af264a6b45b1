use super::{check_non_negative, check_probability, RepresentationError};
use crate::evolution::traits::{Operator, Representation, RepresentationContext};
use crate::seeding::SeedStream;
use itertools::izip;
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActivationFunction {
    /// Linear, clamped to `[0, 1]`.
    #[default]
    Relu,
    Sigmoid,
    Tanh,
}

impl ActivationFunction {
    fn apply(self, x: f32) -> f32 {
        match self {
            ActivationFunction::Relu => x.clamp(0., 1.),
            ActivationFunction::Sigmoid => 1. / (1. + (-x).exp()),
            ActivationFunction::Tanh => x.tanh(),
        }
    }
}

fn default_hidden_node_count() -> usize {
    2
}

fn default_iteration_count() -> usize {
    2
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NetConfig {
    #[serde(default)]
    pub activation: ActivationFunction,
    #[serde(default = "default_hidden_node_count")]
    pub hidden_node_count: usize,
    /// Recurrent propagation steps per `compute` call.
    #[serde(default = "default_iteration_count")]
    pub iteration_count: usize,
}

impl Default for NetConfig {
    fn default() -> Self {
        NetConfig {
            activation: ActivationFunction::default(),
            hidden_node_count: default_hidden_node_count(),
            iteration_count: default_iteration_count(),
        }
    }
}

/// Recurrent network where every node feeds every node.
///
/// Nodes are laid out inputs first, then hidden, then outputs. Input nodes only ever hold the
/// values handed to `compute`; their rows in the weight matrix are unused.
#[derive(Debug, Clone, PartialEq)]
pub struct FullyMeshedNet {
    input_count: usize,
    output_count: usize,
    hidden_node_count: usize,
    iteration_count: usize,
    activation: ActivationFunction,
    /// Row-major `node_count x node_count`; row `i` holds the incoming weights of node `i`.
    weights: Vec<f32>,
    biases: Vec<f32>,
    /// Amplitude of uniform noise added to each node's sum. Non-positive means none.
    random_biases: Vec<f32>,
}

impl FullyMeshedNet {
    /// A net with all weights and biases zero.
    pub fn new(input_count: usize, output_count: usize, config: &NetConfig) -> Self {
        let node_count = input_count + config.hidden_node_count + output_count;
        FullyMeshedNet {
            input_count,
            output_count,
            hidden_node_count: config.hidden_node_count,
            iteration_count: config.iteration_count,
            activation: config.activation,
            weights: vec![0.; node_count * node_count],
            biases: vec![0.; node_count],
            random_biases: vec![0.; node_count],
        }
    }

    pub fn node_count(&self) -> usize {
        self.biases.len()
    }

    pub fn weight(&self, to: usize, from: usize) -> f32 {
        self.weights[to * self.node_count() + from]
    }

    pub fn set_weight(&mut self, to: usize, from: usize, weight: f32) {
        let node_count = self.node_count();
        self.weights[to * node_count + from] = weight;
    }

    pub fn bias(&self, node: usize) -> f32 {
        self.biases[node]
    }

    pub fn set_bias(&mut self, node: usize, bias: f32) {
        self.biases[node] = bias;
    }

    pub fn set_random_bias(&mut self, node: usize, random_bias: f32) {
        self.random_biases[node] = random_bias;
    }

    fn row(&self, node: usize) -> &[f32] {
        let node_count = self.node_count();
        &self.weights[node * node_count..(node + 1) * node_count]
    }
}

struct FullyMeshedNetContext<'a> {
    net: &'a FullyMeshedNet,
    stream: SeedStream,
    state: Vec<f32>,
    sums: Vec<f32>,
}

impl RepresentationContext for FullyMeshedNetContext<'_> {
    fn compute(&mut self, inputs: &[f32], outputs: &mut [f32]) {
        let net = self.net;
        let node_count = net.node_count();
        let first_computed = net.input_count;

        for (state, &input) in self.state.iter_mut().zip(inputs).take(net.input_count) {
            *state = input;
        }

        for _ in 0..net.iteration_count {
            // all sums come from the previous state, then every node activates at once
            for node in first_computed..node_count {
                let sum: f32 = net
                    .row(node)
                    .iter()
                    .zip(&self.state)
                    .map(|(weight, state)| weight * state)
                    .sum();
                let mut sum = net.biases[node] + sum;
                let random_bias = net.random_biases[node];
                if random_bias > 0. {
                    sum += self.stream.gen_range(-random_bias..random_bias);
                }
                self.sums[node] = sum;
            }
            for node in first_computed..node_count {
                self.state[node] = net.activation.apply(self.sums[node]);
            }
        }

        let offset = net.input_count + net.hidden_node_count;
        for (output, &state) in outputs.iter_mut().zip(&self.state[offset..]) {
            *output = state;
        }
    }
}

impl Representation for FullyMeshedNet {
    fn input_count(&self) -> usize {
        self.input_count
    }

    fn output_count(&self) -> usize {
        self.output_count
    }

    fn create_context(&self, stream: SeedStream) -> Box<dyn RepresentationContext + '_> {
        let node_count = self.node_count();
        Box::new(FullyMeshedNetContext {
            net: self,
            stream,
            state: vec![0.; node_count],
            sums: vec![0.; node_count],
        })
    }
}

fn default_initial_range() -> f32 {
    2.
}

fn default_limit_range() -> f32 {
    10.
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

/// Value ranges are symmetric around zero: a range of `r` means `(-r, r)`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NetOperatorConfig {
    #[serde(default = "default_initial_range")]
    pub initial_weight_range: f32,
    #[serde(default = "default_initial_range")]
    pub initial_bias_range: f32,
    /// 0 keeps random biases switched off, for creation and for mutation.
    #[serde(default)]
    pub initial_random_bias_range: f32,
    #[serde(default = "default_limit_range")]
    pub weight_range: f32,
    #[serde(default = "default_limit_range")]
    pub bias_range: f32,
    #[serde(default = "default_limit_range")]
    pub random_bias_range: f32,
    #[serde(default = "default_direct_mutation_probability")]
    pub direct_mutation_probability: f64,
    #[serde(default = "default_mutation_severity")]
    pub direct_mutation_severity: f64,
    #[serde(default = "default_proportional_mutation_probability")]
    pub proportional_mutation_probability: f64,
    #[serde(default = "default_mutation_severity")]
    pub proportional_mutation_severity: f64,
}

impl Default for NetOperatorConfig {
    fn default() -> Self {
        NetOperatorConfig {
            initial_weight_range: default_initial_range(),
            initial_bias_range: default_initial_range(),
            initial_random_bias_range: 0.,
            weight_range: default_limit_range(),
            bias_range: default_limit_range(),
            random_bias_range: default_limit_range(),
            direct_mutation_probability: default_direct_mutation_probability(),
            direct_mutation_severity: default_mutation_severity(),
            proportional_mutation_probability: default_proportional_mutation_probability(),
            proportional_mutation_severity: default_mutation_severity(),
        }
    }
}

impl NetOperatorConfig {
    pub fn validate(&self) -> Result<(), RepresentationError> {
        let ranges = [
            ("initial_weight_range", self.initial_weight_range),
            ("initial_bias_range", self.initial_bias_range),
            ("initial_random_bias_range", self.initial_random_bias_range),
            ("weight_range", self.weight_range),
            ("bias_range", self.bias_range),
            ("random_bias_range", self.random_bias_range),
        ];
        for (name, range) in ranges {
            check_non_negative(name, range as f64)?;
        }
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

fn symmetric(rng: &mut SeedStream, range: f64) -> f64 {
    if range > 0. {
        rng.gen_range(-range..range)
    } else {
        0.
    }
}

fn clamp_all(values: &mut [f32], limit: f32) {
    for value in values {
        *value = value.clamp(-limit, limit);
    }
}

pub struct FullyMeshedNetOperator {
    config: NetOperatorConfig,
    net_config: NetConfig,
    input_count: usize,
    output_count: usize,
}

impl FullyMeshedNetOperator {
    pub fn new(
        config: NetOperatorConfig,
        net_config: NetConfig,
        input_count: usize,
        output_count: usize,
    ) -> Result<Self, RepresentationError> {
        config.validate()?;
        if net_config.iteration_count == 0 {
            return Err(RepresentationError::InvalidShape(
                "iteration_count must be at least 1".into(),
            ));
        }
        Ok(FullyMeshedNetOperator {
            config,
            net_config,
            input_count,
            output_count,
        })
    }

    fn mutate_values(&self, values: &mut [f32], rng: &mut SeedStream) {
        let config = &self.config;
        for value in values {
            if rng.gen::<f64>() < config.direct_mutation_probability {
                *value += symmetric(rng, config.direct_mutation_severity) as f32;
            }
            if rng.gen::<f64>() < config.proportional_mutation_probability {
                let range = (*value as f64 * config.proportional_mutation_severity).abs();
                *value += symmetric(rng, range) as f32;
            }
        }
    }

    fn enforce_ranges(&self, net: &mut FullyMeshedNet) {
        let start = net.input_count * net.node_count();
        clamp_all(&mut net.weights[start..], self.config.weight_range);
        clamp_all(&mut net.biases, self.config.bias_range);
        clamp_all(&mut net.random_biases, self.config.random_bias_range);
    }
}

impl Operator<FullyMeshedNet> for FullyMeshedNetOperator {
    fn create(&self, rng: &mut SeedStream) -> FullyMeshedNet {
        let config = &self.config;
        let mut net = FullyMeshedNet::new(self.input_count, self.output_count, &self.net_config);
        let node_count = net.node_count();

        for node in net.input_count..node_count {
            for from in 0..node_count {
                let weight = symmetric(rng, config.initial_weight_range as f64) as f32;
                net.set_weight(node, from, weight);
            }
            net.biases[node] = symmetric(rng, config.initial_bias_range as f64) as f32;
            if config.initial_random_bias_range > 0. {
                net.random_biases[node] =
                    symmetric(rng, config.initial_random_bias_range as f64) as f32;
            }
        }
        self.enforce_ranges(&mut net);
        net
    }

    fn mutate(&self, source: &FullyMeshedNet, rng: &mut SeedStream) -> FullyMeshedNet {
        let mut net = source.clone();
        let first = net.input_count;
        let node_count = net.node_count();

        self.mutate_values(&mut net.biases[first..], rng);
        self.mutate_values(&mut net.weights[first * node_count..], rng);
        if self.config.initial_random_bias_range > 0. {
            self.mutate_values(&mut net.random_biases[first..], rng);
        }
        self.enforce_ranges(&mut net);
        net
    }

    /// Copies a random band of node rows (incoming weights, bias, random bias) from one
    /// parent into a copy of the other.
    fn cross(
        &self,
        first: &FullyMeshedNet,
        second: &FullyMeshedNet,
        rng: &mut SeedStream,
    ) -> FullyMeshedNet {
        let (base, donor) = if rng.gen::<bool>() {
            (second, first)
        } else {
            (first, second)
        };
        let mut net = base.clone();
        let node_count = net.node_count();
        if donor.node_count() != node_count || net.input_count >= node_count {
            return net;
        }

        let start = rng.gen_range(net.input_count..node_count);
        let stop = rng.gen_range(start + 1..=node_count);
        let rows = start * node_count..stop * node_count;
        net.weights[rows.clone()].copy_from_slice(&donor.weights[rows]);
        net.biases[start..stop].copy_from_slice(&donor.biases[start..stop]);
        net.random_biases[start..stop].copy_from_slice(&donor.random_biases[start..stop]);
        net
    }

    /// L1 distance over every non-input weight, bias and random bias.
    fn difference(&self, first: &FullyMeshedNet, second: &FullyMeshedNet) -> f64 {
        let start = first.input_count;
        let node_count = first.node_count();

        let weights: f64 = first.weights[start * node_count..]
            .iter()
            .zip(&second.weights[start * node_count..])
            .map(|(a, b)| (a - b).abs() as f64)
            .sum();
        let biases: f64 = izip!(
            &first.biases[start..],
            &second.biases[start..],
            &first.random_biases[start..],
            &second.random_biases[start..]
        )
        .map(|(b1, b2, r1, r2)| ((b1 - b2).abs() + (r1 - r2).abs()) as f64)
        .sum();
        weights + biases
    }
}

#[cfg(test)]
/// Hidden node computes AND, output computes `a OR b AND NOT hidden`, in ±1 logic.
pub(crate) fn xor_net() -> FullyMeshedNet {
    let config = NetConfig {
        activation: ActivationFunction::Tanh,
        hidden_node_count: 1,
        iteration_count: 2,
    };
    let mut net = FullyMeshedNet::new(2, 1, &config);
    net.set_weight(2, 0, 10.);
    net.set_weight(2, 1, 10.);
    net.set_bias(2, -10.);
    net.set_weight(3, 0, 10.);
    net.set_weight(3, 1, 10.);
    net.set_weight(3, 2, -20.);
    net.set_bias(3, -10.);
    net
}
