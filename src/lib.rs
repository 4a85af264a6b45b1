// Modules
pub mod config;
pub mod consts;
pub mod evolution;
pub mod problem;
pub mod representation;
pub mod seeding;
