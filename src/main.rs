use anyhow::Context;
use evo_engine::config::RunConfig;
use evo_engine::evolution::method::Method;
use evo_engine::evolution::recipe::Recipe;
use evo_engine::problem::XorProblem;
use evo_engine::representation::{FullyMeshedNet, FullyMeshedNetOperator};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Serialize)]
struct RunSummary {
    best_fitness: Option<f64>,
    population: usize,
    total_generations: usize,
    elapsed_ms: f64,
}

fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => RunConfig::load(&path).with_context(|| format!("loading {path}"))?,
        None => RunConfig::default(),
    };
    info!(
        population = config.population_size,
        generations = config.generations,
        executor = ?config.executor.kind,
        "Starting XOR run."
    );

    let problem = XorProblem::new(config.xor.clone())?;
    let operator = FullyMeshedNetOperator::new(
        config.net_operator.clone(),
        config.net.clone(),
        2,
        1,
    )?;
    let mut recipe: Recipe<FullyMeshedNet> = Recipe::new(
        Arc::new(problem),
        Arc::new(operator),
        config.executor.clone(),
        config.method.clone(),
        config.evolution_seed,
        config.evaluation_seed,
    );

    let start = Instant::now();
    recipe.prepare(config.population_size)?;
    let population = recipe.run(config.generations)?;
    let best_fitness = population.first().map(|r| r.fitness);
    let population = population.len();
    let total_generations = recipe
        .method()
        .map(|method| method.total_generations())
        .unwrap_or_default();

    let summary = RunSummary {
        best_fitness,
        population,
        total_generations,
        elapsed_ms: start.elapsed().as_secs_f64() * 1_000.,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
