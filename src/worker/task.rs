//! The worker's unit of admitted work: one fragment of one job, bound to a
//! chunk and a set of scan tables.
//!
//! Grounded on `src/wbase/Task.h` (referenced throughout `BlendScheduler.cc`
//! / `ScanScheduler.cc`) as surfaced by the scan-table / interactive /
//! chunkId fields those schedulers read off every `Task`.

use crate::common::{AttemptCount, ChunkId, JobId, QueryId, ScanTableInfo};
use std::sync::atomic::{AtomicU64, Ordering};

static TASK_SEQ: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone)]
pub struct Task {
    /// Process-unique identity, distinct from (queryId, jobId, chunkId)
    /// which a retry may share with its prior attempt.
    pub seq: u64,
    pub query_id: QueryId,
    pub job_id: JobId,
    pub chunk_id: ChunkId,
    pub attempt_count: AttemptCount,
    pub scan_tables: Vec<ScanTableInfo>,
    pub interactive: bool,
    pub scan_priority: i32,
}

impl Task {
    pub fn new(
        query_id: QueryId,
        job_id: JobId,
        chunk_id: ChunkId,
        scan_tables: Vec<ScanTableInfo>,
        interactive: bool,
    ) -> Self {
        let scan_priority = scan_tables.iter().map(|t| t.scan_rating).max().unwrap_or(0);
        Self {
            seq: TASK_SEQ.fetch_add(1, Ordering::Relaxed),
            query_id,
            job_id,
            chunk_id,
            attempt_count: 0,
            scan_tables,
            interactive,
            scan_priority,
        }
    }

    /// Slowest-table-first ordering key used by `ChunkTasksQueue`'s active
    /// heap: higher scan rating sorts first (runs last, behind faster work).
    pub fn ordering_key(&self) -> (i32, Vec<(String, String)>) {
        let mut tables: Vec<(String, String)> =
            self.scan_tables.iter().map(|t| (t.db.clone(), t.table.clone())).collect();
        tables.sort();
        (self.scan_priority, tables)
    }
}
