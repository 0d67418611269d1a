//! Czar-side retryable unit: one attempt of one job within a user query.
//!
//! Grounded on `src/qdisp/JobQuery.cc` / `JobDescription.cc`. The
//! UberJob-assignment fields in the original (a newer, parallel draft that
//! batches several jobs bound for one worker into a single assignment) are
//! not carried forward; one JobQuery still addresses one (queryId, jobId,
//! chunkId, attempt).

use crate::common::{AttemptCount, ChunkId, JobId, QueryId, MAX_JOB_ATTEMPTS};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Created,
    Queued,
    Request,
    ResponseReady,
    Complete,
    Cancelled,
    RequestError,
    ResponseError,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Complete | JobState::Cancelled | JobState::RequestError | JobState::ResponseError)
    }
}

/// The payload and routing info for one dispatch attempt.
#[derive(Debug, Clone)]
pub struct JobDescription {
    pub chunk_id: ChunkId,
    pub resource_uri: String,
    pub payload: Vec<u8>,
    attempt_count: AttemptCount,
}

impl JobDescription {
    pub fn new(chunk_id: ChunkId, resource_uri: impl Into<String>, payload: Vec<u8>) -> Self {
        Self { chunk_id, resource_uri: resource_uri.into(), payload, attempt_count: 0 }
    }

    pub fn attempt_count(&self) -> AttemptCount {
        self.attempt_count
    }

    /// Bump the attempt counter, refusing once the structural maximum has
    /// been reached; callers scrub any partial merge results of the prior
    /// attempt before retrying.
    pub fn incr_attempt_count(&mut self) -> bool {
        if self.attempt_count >= MAX_JOB_ATTEMPTS {
            return false;
        }
        self.attempt_count += 1;
        true
    }
}

pub struct JobQuery {
    pub query_id: QueryId,
    pub job_id: JobId,
    pub description: Mutex<JobDescription>,
    state: Mutex<JobState>,
    cancelled: AtomicBool,
}

impl JobQuery {
    pub fn new(query_id: QueryId, job_id: JobId, description: JobDescription) -> Self {
        Self { query_id, job_id, description: Mutex::new(description), state: Mutex::new(JobState::Created), cancelled: AtomicBool::new(false) }
    }

    pub fn state(&self) -> JobState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: JobState) {
        *self.state.lock() = state;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Mark cancelled; returns true only the first time (idempotent per job).
    pub fn cancel(&self) -> bool {
        self.cancelled.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    /// Attempt to start (or retry) this job. Returns false once cancelled
    /// or the attempt ceiling has been hit.
    pub fn try_start_attempt(&self) -> bool {
        if self.is_cancelled() {
            return false;
        }
        let mut desc = self.description.lock();
        if !desc.incr_attempt_count() {
            return false;
        }
        self.set_state(JobState::Request);
        true
    }

    pub fn attempt_count(&self) -> AttemptCount {
        self.description.lock().attempt_count()
    }
}
