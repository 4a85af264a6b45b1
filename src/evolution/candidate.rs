use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static CANDIDATE_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CandidateId(u64);

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A representation shared read-only between the generation that owns it and any worker
/// evaluating it. Cloning is cheap and keeps the identity.
pub struct Candidate<R> {
    id: CandidateId,
    representation: Arc<R>,
}

impl<R> Candidate<R> {
    pub fn new(representation: R) -> Self {
        let id = CandidateId(CANDIDATE_ID_COUNTER.fetch_add(1, Ordering::SeqCst));
        Candidate {
            id,
            representation: Arc::new(representation),
        }
    }

    pub fn id(&self) -> CandidateId {
        self.id
    }

    pub fn representation(&self) -> &R {
        &self.representation
    }
}

impl<R> Clone for Candidate<R> {
    fn clone(&self) -> Self {
        Candidate {
            id: self.id,
            representation: Arc::clone(&self.representation),
        }
    }
}

impl<R> PartialEq for Candidate<R> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl<R> Eq for Candidate<R> {}

impl<R> Hash for Candidate<R> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<R: fmt::Debug> fmt::Debug for Candidate<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Candidate")
            .field("id", &self.id)
            .field("representation", &self.representation)
            .finish()
    }
}
