use crate::evolution::candidate::{Candidate, CandidateId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One (candidate, variant) pair awaiting a fitness score.
///
/// Units carry no fitness field. A worker hands the fitness of a finished unit back to the
/// dispatching thread as a [`CompletedUnit`], and only that thread records it.
#[derive(Debug)]
pub struct EvaluationUnit<R> {
    pub unit_index: usize,
    pub candidate_index: usize,
    pub candidate: Candidate<R>,
    pub variant_seed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletedUnit {
    pub unit_index: usize,
    pub fitness: f64,
}

/// A candidate paired with its mean fitness over the variants that completed.
#[derive(Debug)]
pub struct EvaluationResult<R> {
    pub candidate: Candidate<R>,
    pub fitness: f64,
}

impl<R> Clone for EvaluationResult<R> {
    fn clone(&self) -> Self {
        EvaluationResult {
            candidate: self.candidate.clone(),
            fitness: self.fitness,
        }
    }
}

/// Sorts best-first. The sort is stable, so equal fitness keeps dispatch order.
pub fn rank<R>(results: &mut [EvaluationResult<R>]) {
    results.sort_by(|a, b| b.fitness.total_cmp(&a.fitness));
}

/// How much of a dispatched batch actually came back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coverage {
    pub candidates_dispatched: usize,
    pub candidates_returned: usize,
    pub units_dispatched: usize,
    pub units_completed: usize,
}

impl Coverage {
    pub fn is_complete(&self) -> bool {
        self.candidates_returned == self.candidates_dispatched
            && self.units_completed == self.units_dispatched
    }
}

#[derive(Debug)]
pub struct EvaluationBatch<R> {
    pub results: Vec<EvaluationResult<R>>,
    pub coverage: Coverage,
}

struct Slot<R> {
    candidate: Candidate<R>,
    sum: f64,
    count: usize,
}

/// Sums fitness per candidate identity and turns the sums into ranked means.
///
/// NaN entries are treated as failed evaluations and skipped. Candidates with no recorded
/// fitness are left out of the results entirely.
pub(crate) struct FitnessAccumulator<R> {
    slots: Vec<Slot<R>>,
    slot_of_candidate: Vec<usize>,
    units_dispatched: usize,
    units_completed: usize,
}

impl<R> FitnessAccumulator<R> {
    pub fn new(candidates: &[Candidate<R>], variant_count: usize) -> Self {
        let mut slots: Vec<Slot<R>> = Vec::with_capacity(candidates.len());
        let mut slot_by_id: HashMap<CandidateId, usize> = HashMap::with_capacity(candidates.len());
        let slot_of_candidate = candidates
            .iter()
            .map(|candidate| {
                *slot_by_id.entry(candidate.id()).or_insert_with(|| {
                    slots.push(Slot {
                        candidate: candidate.clone(),
                        sum: 0.,
                        count: 0,
                    });
                    slots.len() - 1
                })
            })
            .collect();

        FitnessAccumulator {
            slots,
            slot_of_candidate,
            units_dispatched: candidates.len() * variant_count,
            units_completed: 0,
        }
    }

    pub fn record(&mut self, candidate_index: usize, fitness: f64) {
        if fitness.is_nan() {
            return;
        }
        let slot = &mut self.slots[self.slot_of_candidate[candidate_index]];
        slot.sum += fitness;
        slot.count += 1;
        self.units_completed += 1;
    }

    pub fn finish(self) -> EvaluationBatch<R> {
        let candidates_dispatched = self.slots.len();
        let mut results: Vec<EvaluationResult<R>> = self
            .slots
            .into_iter()
            .filter(|slot| slot.count > 0)
            .map(|slot| EvaluationResult {
                candidate: slot.candidate,
                fitness: slot.sum / slot.count as f64,
            })
            .collect();
        rank(&mut results);

        EvaluationBatch {
            coverage: Coverage {
                candidates_dispatched,
                candidates_returned: results.len(),
                units_dispatched: self.units_dispatched,
                units_completed: self.units_completed,
            },
            results,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_skips_nan_and_drops_empty_candidates() {
        let candidates: Vec<Candidate<&str>> =
            vec![Candidate::new("a"), Candidate::new("b"), Candidate::new("c")];
        let mut accumulator = FitnessAccumulator::new(&candidates, 2);
        accumulator.record(0, 10.);
        accumulator.record(0, 20.);
        accumulator.record(1, 4.);
        accumulator.record(1, f64::NAN);
        accumulator.record(2, f64::NAN);

        let batch = accumulator.finish();
        assert_eq!(batch.results.len(), 2);
        assert_eq!(batch.results[0].candidate, candidates[0]);
        assert_eq!(batch.results[0].fitness, 15.);
        assert_eq!(batch.results[1].fitness, 4.);
        assert_eq!(
            batch.coverage,
            Coverage {
                candidates_dispatched: 3,
                candidates_returned: 2,
                units_dispatched: 6,
                units_completed: 3,
            }
        );
        assert!(!batch.coverage.is_complete());
    }

    #[test]
    fn test_duplicate_identity_aggregates_into_one_result() {
        let shared = Candidate::new(1);
        let candidates = vec![shared.clone(), shared.clone()];
        let mut accumulator = FitnessAccumulator::new(&candidates, 1);
        accumulator.record(0, 1.);
        accumulator.record(1, 3.);
        let batch = accumulator.finish();
        assert_eq!(batch.results.len(), 1);
        assert_eq!(batch.results[0].fitness, 2.);
    }

    #[test]
    fn test_rank_is_descending_and_stable() {
        let mut results: Vec<EvaluationResult<u8>> = [3., 9., 3., 1., 7.]
            .iter()
            .map(|&fitness| EvaluationResult {
                candidate: Candidate::new(0),
                fitness,
            })
            .collect();
        let first_three = results[0].candidate.id();
        let second_three = results[2].candidate.id();
        rank(&mut results);

        let fitness: Vec<f64> = results.iter().map(|r| r.fitness).collect();
        assert_eq!(fitness, vec![9., 7., 3., 3., 1.]);
        assert_eq!(results[2].candidate.id(), first_three);
        assert_eq!(results[3].candidate.id(), second_three);
    }
}
