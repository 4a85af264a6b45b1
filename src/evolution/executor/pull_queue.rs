use super::{CancellationToken, Executor, ExecutorConfig, ExecutorError};
use crate::consts::POLL_TIMEOUT_MILLISECONDS;
use crate::evolution::candidate::Candidate;
use crate::evolution::result::{
    CompletedUnit, EvaluationBatch, EvaluationUnit, FitnessAccumulator,
};
use crate::evolution::traits::{Problem, Representation};
use crate::seeding::SeedStream;
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use threadpool::ThreadPool;
use tracing::{debug, warn};

/// Worker pool pulling evaluation units from a shared bounded queue.
///
/// A unit whose evaluation fails is pushed back onto the queue and picked up again by
/// whichever worker polls next, so a transient failure never loses data. A problem that
/// keeps failing is only bounded by the configured timeout. A unit whose evaluation panics
/// is not retried; it is reported as failed so the dispatcher never waits on it.
///
/// When the timeout elapses the queue is drained and aggregation proceeds over the units
/// received before the deadline. Workers still busy with a stalled unit are abandoned and
/// exit once that unit returns. Candidates with no finished unit are dropped.
pub struct PullQueueExecutor<R: Representation> {
    config: ExecutorConfig,
    problem: Arc<dyn Problem<R>>,
    cancellation: CancellationToken,
}

impl<R: Representation + 'static> PullQueueExecutor<R> {
    pub fn new(config: ExecutorConfig, problem: Arc<dyn Problem<R>>) -> Self {
        PullQueueExecutor {
            config,
            problem,
            cancellation: CancellationToken::new(),
        }
    }
}

enum WaitOutcome {
    Finished,
    TimedOut,
    Aborted,
    WorkersGone,
}

struct Worker<R> {
    id: usize,
    queue: Receiver<EvaluationUnit<R>>,
    requeue: Sender<EvaluationUnit<R>>,
    completed: Sender<CompletedUnit>,
    remaining: Arc<AtomicUsize>,
    stop: CancellationToken,
    problem: Arc<dyn Problem<R>>,
}

impl<R: Representation> Worker<R> {
    fn run(self) {
        let poll = Duration::from_millis(POLL_TIMEOUT_MILLISECONDS);
        while self.remaining.load(Ordering::Acquire) > 0 && !self.stop.is_cancelled() {
            let unit = match self.queue.recv_timeout(poll) {
                Ok(unit) => unit,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };

            let evaluation = panic::catch_unwind(AssertUnwindSafe(|| {
                self.problem
                    .evaluate(unit.candidate.representation(), unit.variant_seed)
            }));
            match evaluation {
                Ok(Ok(fitness)) => {
                    if !self.complete(unit.unit_index, fitness) {
                        break;
                    }
                }
                Err(_) => {
                    warn!(
                        worker = self.id,
                        unit = unit.unit_index,
                        candidate = %unit.candidate.id(),
                        "Evaluation panicked; the unit is recorded as failed."
                    );
                    // NaN is skipped by the accumulator but still counts as received
                    if !self.complete(unit.unit_index, f64::NAN) {
                        break;
                    }
                }
                Ok(Err(error)) => {
                    debug!(
                        worker = self.id,
                        unit = unit.unit_index,
                        candidate = %unit.candidate.id(),
                        %error,
                        "Evaluation failed, putting the unit back on the queue."
                    );
                    match self.requeue.try_send(unit) {
                        Ok(()) => {}
                        Err(TrySendError::Full(unit)) | Err(TrySendError::Disconnected(unit)) => {
                            warn!(
                                worker = self.id,
                                unit = unit.unit_index,
                                "Could not requeue a failed unit; it stays unevaluated."
                            );
                        }
                    }
                }
            }
        }
    }

    /// Hands a finished unit to the dispatcher. False once the dispatcher has stopped listening.
    fn complete(&self, unit_index: usize, fitness: f64) -> bool {
        if self
            .completed
            .send(CompletedUnit { unit_index, fitness })
            .is_err()
        {
            return false;
        }
        // saturating: the dispatcher may already have forced the count to zero
        let _ = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |remaining| {
                remaining.checked_sub(1)
            });
        true
    }
}

impl<R: Representation + 'static> Executor<R> for PullQueueExecutor<R> {
    fn evaluate(
        &self,
        candidates: &[Candidate<R>],
        mut seeds: SeedStream,
    ) -> Result<EvaluationBatch<R>, ExecutorError> {
        if self.cancellation.is_cancelled() {
            return Err(ExecutorError::Aborted);
        }

        let variant_seeds = seeds.seeds(self.config.variant_count);
        let mut accumulator = FitnessAccumulator::new(candidates, variant_seeds.len());
        let unit_count = candidates.len() * variant_seeds.len();
        if unit_count == 0 {
            return Ok(accumulator.finish());
        }

        // queue every unit before any worker starts; variant-major like the seed draw
        let (queue_sender, queue_receiver) = bounded::<EvaluationUnit<R>>(unit_count);
        let mut owner_of_unit = Vec::with_capacity(unit_count);
        for &variant_seed in &variant_seeds {
            for (candidate_index, candidate) in candidates.iter().enumerate() {
                let unit = EvaluationUnit {
                    unit_index: owner_of_unit.len(),
                    candidate_index,
                    candidate: candidate.clone(),
                    variant_seed,
                };
                owner_of_unit.push(unit.candidate_index);
                queue_sender
                    .try_send(unit)
                    .map_err(|e| ExecutorError::WorkerPool(e.to_string()))?;
            }
        }

        let (completed_sender, completed_receiver) = unbounded::<CompletedUnit>();
        let remaining = Arc::new(AtomicUsize::new(unit_count));
        let stop = CancellationToken::new();
        let worker_count = self.config.resolved_worker_count().min(unit_count).max(1);
        let pool = threadpool::Builder::new()
            .num_threads(worker_count)
            .thread_name("evaluation-worker".into())
            .build();

        for id in 0..worker_count {
            let worker = Worker {
                id,
                queue: queue_receiver.clone(),
                requeue: queue_sender.clone(),
                completed: completed_sender.clone(),
                remaining: Arc::clone(&remaining),
                stop: stop.clone(),
                problem: Arc::clone(&self.problem),
            };
            pool.execute(move || worker.run());
        }
        drop(completed_sender);
        debug!(
            units = unit_count,
            workers = worker_count,
            "Pull-queue evaluation dispatched."
        );

        let deadline = self.config.timeout().map(|timeout| Instant::now() + timeout);
        let outcome = self.wait_for_units(
            &completed_receiver,
            unit_count,
            deadline,
            &owner_of_unit,
            &mut accumulator,
        );

        // release the workers: clear pending work and force completion
        stop.cancel();
        while queue_receiver.try_recv().is_ok() {}
        remaining.store(0, Ordering::Release);
        // completions arriving from here on are ignored; a closed channel also stops workers
        drop(completed_receiver);
        match outcome {
            // a stalled worker must not hold the caller past the deadline
            WaitOutcome::TimedOut => drop(pool),
            WaitOutcome::Finished | WaitOutcome::Aborted | WaitOutcome::WorkersGone => {
                shutdown(&pool)
            }
        }

        match outcome {
            WaitOutcome::Finished => Ok(accumulator.finish()),
            WaitOutcome::Aborted => Err(ExecutorError::Aborted),
            WaitOutcome::TimedOut | WaitOutcome::WorkersGone => {
                let batch = accumulator.finish();
                warn!(
                    completed = batch.coverage.units_completed,
                    dispatched = batch.coverage.units_dispatched,
                    candidates_returned = batch.coverage.candidates_returned,
                    "Pull-queue evaluation ended before every unit completed."
                );
                Ok(batch)
            }
        }
    }

    fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    fn maximum_fitness(&self) -> f64 {
        self.problem.maximum_fitness()
    }

    fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }
}

impl<R: Representation + 'static> PullQueueExecutor<R> {
    fn wait_for_units(
        &self,
        completed_receiver: &Receiver<CompletedUnit>,
        unit_count: usize,
        deadline: Option<Instant>,
        owner_of_unit: &[usize],
        accumulator: &mut FitnessAccumulator<R>,
    ) -> WaitOutcome {
        let poll = Duration::from_millis(POLL_TIMEOUT_MILLISECONDS);
        let mut received = 0;
        loop {
            if received == unit_count {
                return WaitOutcome::Finished;
            }
            if self.cancellation.is_cancelled() {
                return WaitOutcome::Aborted;
            }
            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return WaitOutcome::TimedOut;
                    }
                    (deadline - now).min(poll)
                }
                None => poll,
            };
            match completed_receiver.recv_timeout(wait) {
                Ok(completed) => {
                    accumulator.record(owner_of_unit[completed.unit_index], completed.fitness);
                    received += 1;
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return WaitOutcome::WorkersGone,
            }
        }
    }
}

fn shutdown(pool: &ThreadPool) {
    pool.join();
    if pool.panic_count() > 0 {
        warn!(
            panics = pool.panic_count(),
            "Evaluation workers panicked outside of an evaluation."
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evolution::test_support::*;
    use crate::evolution::traits::ProblemError;
    use std::thread;

    fn config(variant_count: usize, timeout_ms: u64) -> ExecutorConfig {
        ExecutorConfig {
            kind: super::super::ExecutorKind::PullQueue,
            worker_count: 4,
            variant_count,
            timeout_ms,
            strict: true,
        }
    }

    #[test]
    fn test_failed_unit_is_retried_to_the_same_fitness() {
        let variant_seeds = SeedStream::new(21).seeds(3);
        let problem = Arc::new(FailOnceProblem::new(2., variant_seeds[1]));
        let executor = PullQueueExecutor::<Scalar>::new(config(3, 0), problem.clone());
        let candidates = scalars(&[1., 2., 3.]);
        let batch = executor.evaluate(&candidates, SeedStream::new(21)).unwrap();

        assert!(problem.tripped.load(Ordering::SeqCst), "failure was injected");
        assert!(batch.coverage.is_complete());
        let retried = batch
            .results
            .iter()
            .find(|r| r.candidate == candidates[1])
            .unwrap();
        let expected = variant_seeds
            .iter()
            .map(|&seed| SeededProblem::expected(2., seed))
            .sum::<f64>()
            / 3.;
        assert!((retried.fitness - expected).abs() < 1e-9);
    }

    #[test]
    fn test_timeout_drops_candidates_that_never_complete() {
        let problem = Arc::new(AlwaysFailProblem::new(2.));
        let executor = PullQueueExecutor::<Scalar>::new(config(2, 50), problem.clone());
        let candidates = scalars(&[1., 2., 3.]);

        let started = Instant::now();
        let batch = executor.evaluate(&candidates, SeedStream::new(4)).unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));

        assert!(problem.attempts.load(Ordering::SeqCst) > 2, "failures were retried");
        let returned: Vec<f64> = batch
            .results
            .iter()
            .map(|r| r.candidate.representation().0)
            .collect();
        assert_eq!(returned, vec![3., 1.]);
        assert_eq!(batch.coverage.candidates_dispatched, 3);
        assert_eq!(batch.coverage.units_completed, 4);
        assert!(!batch.coverage.is_complete());
    }

    /// Sleeps far past any test timeout for one value; answers immediately otherwise.
    struct StallProblem {
        stalled_value: f64,
    }

    impl Problem<Scalar> for StallProblem {
        fn evaluate(&self, representation: &Scalar, _seed: u64) -> Result<f64, ProblemError> {
            if representation.0 == self.stalled_value {
                thread::sleep(Duration::from_secs(2));
            }
            Ok(representation.0)
        }
        fn input_count(&self) -> usize {
            0
        }
        fn output_count(&self) -> usize {
            1
        }
    }

    #[test]
    fn test_timeout_abandons_stalled_worker() {
        let executor = PullQueueExecutor::<Scalar>::new(
            ExecutorConfig {
                worker_count: 2,
                ..config(1, 50)
            },
            Arc::new(StallProblem { stalled_value: 2. }),
        );
        let candidates = scalars(&[1., 2., 3.]);

        let started = Instant::now();
        let batch = executor.evaluate(&candidates, SeedStream::new(6)).unwrap();
        let elapsed = started.elapsed();
        assert!(elapsed < Duration::from_millis(1_000), "returned after {elapsed:?}");

        let returned: Vec<f64> = batch
            .results
            .iter()
            .map(|r| r.candidate.representation().0)
            .collect();
        assert_eq!(returned, vec![3., 1.]);
        assert_eq!(batch.coverage.units_completed, 2);
        assert!(!batch.coverage.is_complete());
    }

    struct PanicProblem;

    impl Problem<Scalar> for PanicProblem {
        fn evaluate(&self, representation: &Scalar, _seed: u64) -> Result<f64, ProblemError> {
            if representation.0 == 2. {
                panic!("evaluation blew up");
            }
            Ok(representation.0)
        }
        fn input_count(&self) -> usize {
            0
        }
        fn output_count(&self) -> usize {
            1
        }
    }

    #[test]
    fn test_panicking_evaluation_without_timeout_still_returns() {
        let executor = PullQueueExecutor::<Scalar>::new(
            ExecutorConfig {
                worker_count: 2,
                strict: false,
                ..config(2, 0)
            },
            Arc::new(PanicProblem),
        );
        let candidates = scalars(&[1., 2., 3.]);
        let batch = executor.evaluate(&candidates, SeedStream::new(7)).unwrap();

        let returned: Vec<f64> = batch
            .results
            .iter()
            .map(|r| r.candidate.representation().0)
            .collect();
        assert_eq!(returned, vec![3., 1.]);
        assert_eq!(batch.coverage.units_dispatched, 6);
        assert_eq!(batch.coverage.units_completed, 4);
        assert!(!batch.coverage.is_complete());
    }

    struct SlowProblem;

    impl Problem<Scalar> for SlowProblem {
        fn evaluate(&self, representation: &Scalar, _seed: u64) -> Result<f64, ProblemError> {
            thread::sleep(Duration::from_millis(5));
            Ok(representation.0)
        }
        fn input_count(&self) -> usize {
            0
        }
        fn output_count(&self) -> usize {
            1
        }
    }

    #[test]
    fn test_cancellation_mid_flight_returns_aborted() {
        let executor = PullQueueExecutor::<Scalar>::new(
            ExecutorConfig {
                worker_count: 1,
                ..config(50, 0)
            },
            Arc::new(SlowProblem),
        );
        let token = executor.cancellation_token();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            token.cancel();
        });

        let candidates = scalars(&[1., 2., 3., 4.]);
        let result = executor.evaluate(&candidates, SeedStream::new(1));
        canceller.join().unwrap();
        assert!(matches!(result, Err(ExecutorError::Aborted)));
    }
}
