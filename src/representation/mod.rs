use thiserror::Error;

pub mod fully_meshed_net;
pub mod parameter_set;

pub use fully_meshed_net::{
    ActivationFunction, FullyMeshedNet, FullyMeshedNetOperator, NetConfig, NetOperatorConfig,
};
pub use parameter_set::{Parameter, ParameterSet, ParameterSetOpConfig, ParameterSetOperator};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepresentationError {
    #[error("Invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: String, reason: String },
    #[error("Invalid operator configuration: `{0}`")]
    InvalidOperatorConfig(String),
    #[error("Invalid representation shape: `{0}`")]
    InvalidShape(String),
}

pub(crate) fn check_probability(name: &str, value: f64) -> Result<(), RepresentationError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(RepresentationError::InvalidOperatorConfig(format!(
            "{name} must lie in [0, 1], got {value}"
        )));
    }
    Ok(())
}

pub(crate) fn check_non_negative(name: &str, value: f64) -> Result<(), RepresentationError> {
    if !value.is_finite() || value < 0. {
        return Err(RepresentationError::InvalidOperatorConfig(format!(
            "{name} must be a finite non-negative number, got {value}"
        )));
    }
    Ok(())
}
