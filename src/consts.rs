/// How long a pull-queue worker blocks on the shared queue before re-checking completion.
pub const POLL_TIMEOUT_MILLISECONDS: u64 = 10;

/// Number of skew-sampled contestants considered when picking the second crossover parent.
pub const CROSSOVER_TOURNAMENT_SIZE: usize = 10;

/// Rejection-sampling attempts per survivor slot before falling back to rank order.
pub const SURVIVOR_SAMPLING_ATTEMPTS: usize = 100;
