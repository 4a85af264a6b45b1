pub mod xor;

pub use xor::{XorConfig, XorProblem};
