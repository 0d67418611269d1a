//! Single owner of a user query's fan-out: spawns jobs, tracks completion,
//! and implements squash (cancellation) and LIMIT-row-complete early exit.
//!
//! Grounded on `src/qdisp/Executive.cc`.

use crate::czar::job::{JobDescription, JobQuery, JobState};
use crate::common::{ChunkId, JobId, QueryId};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone)]
pub struct QMessage {
    pub chunk_id: ChunkId,
    pub source: String,
    pub state: JobState,
    pub state_code: i32,
    pub state_desc: String,
    pub severity: MessageSeverity,
}

/// Per-query ring of user-visible messages, surfaced to the SQL client via
/// the proxy on `Executive::join`.
#[derive(Default)]
pub struct MessageStore {
    messages: parking_lot::Mutex<Vec<QMessage>>,
}

impl MessageStore {
    pub fn push(&self, msg: QMessage) {
        self.messages.lock().push(msg);
    }

    pub fn drain(&self) -> Vec<QMessage> {
        std::mem::take(&mut self.messages.lock())
    }
}

pub struct Executive {
    pub query_id: QueryId,
    /// LIMIT row target, if the query has a bare `LIMIT k` with no
    /// GROUP BY / ORDER BY / all-chunks-required clause.
    limit_rows: Option<u64>,
    jobs: DashMap<JobId, Arc<JobQuery>>,
    incomplete: DashMap<JobId, ()>,
    cancelled: AtomicBool,
    squashed: AtomicBool,
    limit_row_complete: AtomicBool,
    rows_received: AtomicU64,
    message_store: MessageStore,
    idle: Notify,
}

impl Executive {
    pub fn new(query_id: QueryId, limit_rows: Option<u64>) -> Self {
        Self {
            query_id,
            limit_rows,
            jobs: DashMap::new(),
            incomplete: DashMap::new(),
            cancelled: AtomicBool::new(false),
            squashed: AtomicBool::new(false),
            limit_row_complete: AtomicBool::new(false),
            rows_received: AtomicU64::new(0),
            message_store: MessageStore::default(),
            idle: Notify::new(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn is_limit_row_complete(&self) -> bool {
        self.limit_row_complete.load(Ordering::Acquire)
    }

    /// Create and register a JobQuery; refuses once the query is cancelled.
    pub fn add(&self, job_id: JobId, description: JobDescription) -> Option<Arc<JobQuery>> {
        if self.is_cancelled() {
            return None;
        }
        let jq = Arc::new(JobQuery::new(self.query_id, job_id, description));
        self.jobs.insert(job_id, jq.clone());
        self.incomplete.insert(job_id, ());
        Some(jq)
    }

    pub fn job(&self, job_id: JobId) -> Option<Arc<JobQuery>> {
        self.jobs.get(&job_id).map(|e| e.clone())
    }

    /// Record rows received for this job; flips `limit_row_complete` once
    /// the query's LIMIT target has been reached.
    pub fn account_rows(&self, rows: u64) {
        if let Some(limit) = self.limit_rows {
            let total = self.rows_received.fetch_add(rows, Ordering::AcqRel) + rows;
            if total >= limit && !self.limit_row_complete.swap(true, Ordering::AcqRel) {
                self.squash_superfluous();
            }
        }
    }

    /// `erase from incompleteJobs, update JobStatus`; squashes the whole
    /// query if a job failed and the limit hasn't already been satisfied.
    /// `error_code` carries the worker-reported `errorcode` for a failure,
    /// if one was available (e.g. from a `CoreError::RemoteError`).
    pub fn mark_completed(&self, job_id: JobId, success: bool) {
        self.mark_completed_with_code(job_id, success, -1)
    }

    pub fn mark_completed_with_code(&self, job_id: JobId, success: bool, error_code: i32) {
        self.incomplete.remove(&job_id);
        if let Some(jq) = self.job(job_id) {
            jq.set_state(if success { JobState::Complete } else { JobState::RequestError });
            if !success {
                self.message_store.push(QMessage {
                    chunk_id: jq.description.lock().chunk_id,
                    source: "worker".to_string(),
                    state: jq.state(),
                    state_code: error_code,
                    state_desc: "job failed".to_string(),
                    severity: MessageSeverity::Error,
                });
            }
        }
        if !success && !self.is_limit_row_complete() {
            self.squash();
        }
        if self.incomplete.is_empty() {
            self.idle.notify_waiters();
        }
    }

    /// Idempotent: cancel every job exactly once. A job this port has not
    /// separately tracked as "in flight on a transport" is considered
    /// immediately cancellable, mirroring the original's `JobQuery::cancel`
    /// falling through to `markCompleted(jobId, false)` whenever the
    /// request was never handed to (or could not be pulled back from) the
    /// transport.
    pub fn squash(&self) {
        if self.squashed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancelled.store(true, Ordering::Release);
        let newly_cancelled: Vec<JobId> = self.jobs.iter().filter(|e| e.value().cancel()).map(|e| *e.key()).collect();
        for job_id in newly_cancelled {
            self.complete_cancelled(job_id);
        }
    }

    /// Cancel only jobs not yet COMPLETE; used once the LIMIT target has
    /// been satisfied so in-flight-but-unneeded jobs stop early without
    /// the whole query reporting failure.
    pub fn squash_superfluous(&self) {
        let newly_cancelled: Vec<JobId> = self
            .jobs
            .iter()
            .filter(|e| e.value().state() != JobState::Complete)
            .filter(|e| e.value().cancel())
            .map(|e| *e.key())
            .collect();
        for job_id in newly_cancelled {
            self.complete_cancelled(job_id);
        }
    }

    fn complete_cancelled(&self, job_id: JobId) {
        self.incomplete.remove(&job_id);
        if let Some(jq) = self.job(job_id) {
            if !jq.state().is_terminal() {
                jq.set_state(JobState::Cancelled);
            }
        }
        self.idle.notify_waiters();
    }

    /// Block until `incomplete` drains; returns true iff every job ended
    /// COMPLETE or the LIMIT was satisfied early.
    pub async fn join(&self) -> bool {
        loop {
            // Register interest before checking the condition: a drain that
            // completes between the check and the await would otherwise
            // notify_waiters() into nothing and leave this task parked
            // forever. Notify::notified() returns a future that captures a
            // pending permit at creation time, so a notify_waiters() call
            // racing this loop iteration is never lost.
            let notified = self.idle.notified();
            if self.incomplete.is_empty() {
                break;
            }
            notified.await;
        }
        if self.is_limit_row_complete() {
            return true;
        }
        self.jobs.iter().all(|e| e.value().state() == JobState::Complete)
    }

    pub fn incomplete_count(&self) -> usize {
        self.incomplete.len()
    }

    pub fn message_store(&self) -> &MessageStore {
        &self.message_store
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn join_waits_for_all_jobs_to_complete() {
        let exec = Executive::new(1, None);
        exec.add(1, JobDescription::new(10, "worker1", vec![]));
        exec.add(2, JobDescription::new(11, "worker1", vec![]));
        let exec = Arc::new(exec);
        let e2 = exec.clone();
        let handle = tokio::spawn(async move { e2.join().await });
        exec.mark_completed(1, true);
        exec.mark_completed(2, true);
        assert!(handle.await.unwrap());
    }

    #[tokio::test]
    async fn failed_job_squashes_query() {
        let exec = Executive::new(1, None);
        let jq1 = exec.add(1, JobDescription::new(10, "worker1", vec![])).unwrap();
        exec.add(2, JobDescription::new(11, "worker1", vec![]));
        exec.mark_completed(1, false);
        assert!(exec.is_cancelled());
        assert!(jq1.is_cancelled());
    }

    #[tokio::test]
    async fn limit_row_complete_squashes_superfluous_only() {
        let exec = Executive::new(1, Some(10));
        let jq1 = exec.add(1, JobDescription::new(10, "worker1", vec![])).unwrap();
        jq1.set_state(JobState::Complete);
        let jq2 = exec.add(2, JobDescription::new(11, "worker1", vec![])).unwrap();
        exec.account_rows(10);
        assert!(exec.is_limit_row_complete());
        assert!(jq2.is_cancelled());
        assert!(!jq1.is_cancelled());
    }
}
