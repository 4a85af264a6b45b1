use crate::evolution::executor::ExecutorConfig;
use crate::evolution::method::GeneticConfig;
use crate::problem::XorConfig;
use crate::representation::{ActivationFunction, NetConfig, NetOperatorConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not read configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Could not parse configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid configuration: `{0}`")]
    Invalid(String),
}

fn default_population_size() -> usize {
    100
}

fn default_generations() -> usize {
    4000
}

fn default_evolution_seed() -> u64 {
    1
}

fn default_evaluation_seed() -> u64 {
    2
}

fn default_net() -> NetConfig {
    NetConfig {
        activation: ActivationFunction::Tanh,
        hidden_node_count: 1,
        iteration_count: 2,
    }
}

fn default_net_operator() -> NetOperatorConfig {
    NetOperatorConfig {
        initial_weight_range: 6.,
        initial_bias_range: 6.,
        weight_range: 6.,
        bias_range: 6.,
        ..Default::default()
    }
}

/// Everything `evo-bin` needs for one XOR run. Every field has a default, so `{}` is a
/// valid configuration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RunConfig {
    #[serde(default = "default_population_size")]
    pub population_size: usize,
    #[serde(default = "default_generations")]
    pub generations: usize,
    #[serde(default = "default_evolution_seed")]
    pub evolution_seed: u64,
    #[serde(default = "default_evaluation_seed")]
    pub evaluation_seed: u64,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub method: GeneticConfig,
    #[serde(default = "default_net")]
    pub net: NetConfig,
    #[serde(default = "default_net_operator")]
    pub net_operator: NetOperatorConfig,
    #[serde(default)]
    pub xor: XorConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            population_size: default_population_size(),
            generations: default_generations(),
            evolution_seed: default_evolution_seed(),
            evaluation_seed: default_evaluation_seed(),
            executor: ExecutorConfig::default(),
            method: GeneticConfig::default(),
            net: default_net(),
            net_operator: default_net_operator(),
            xor: XorConfig::default(),
        }
    }
}

impl RunConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: RunConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.population_size == 0 {
            return Err(ConfigError::Invalid("population_size cannot be zero".into()));
        }
        self.executor
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.method
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.net_operator
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }
}
