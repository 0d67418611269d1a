//! End-to-end coverage of the core dispatch/merge/schedule scenarios: a
//! clean single-chunk query, a LIMIT-bounded query that stops early, a
//! corrupted-then-retried attempt, a worker-reported failure, query-boot
//! migration to the snail scheduler, and transmit-slot backpressure.

use meshquery::czar::{Executive, JobDescription, MergeState, Merger, MergingHandler};
use meshquery::common::{AttemptCount, CellValue, JobId, QueryId, Row, ScanTableInfo};
use meshquery::error::CoreError;
use meshquery::wire::{terminator_frame, ResultMsg, RowBundle, TransmitData};
use meshquery::worker::{BlendScheduler, GroupScheduler, ScanScheduler, Task, TransmitMgr, UnlimitedMemMan};
use parking_lot::Mutex;
use std::sync::Arc;

/// Test double that records every row handed to it, keyed by job, so
/// assertions can check exactly which rows a query's jobs contributed.
struct VecMerger {
    rows: Mutex<Vec<Row>>,
    scrub_calls: std::sync::atomic::AtomicUsize,
}

impl VecMerger {
    fn new() -> Self {
        Self { rows: Mutex::new(Vec::new()), scrub_calls: std::sync::atomic::AtomicUsize::new(0) }
    }

    fn total_rows(&self) -> usize {
        self.rows.lock().len()
    }
}

impl Merger for VecMerger {
    fn merge_rows(&self, _query_id: QueryId, _job_id: JobId, rows: Vec<Row>) -> meshquery::Result<()> {
        self.rows.lock().extend(rows);
        Ok(())
    }

    fn prep_scrub(&self, _query_id: QueryId, _job_id: JobId, _attempt_count: AttemptCount) {
        self.scrub_calls.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }
}

fn text_row(value: &str) -> Row {
    Row::new(vec![CellValue::Text(value.to_string())])
}

fn frame_for(result: &ResultMsg) -> Vec<u8> {
    let mut frame = TransmitData::new("worker1");
    frame.build_data_msg(result).unwrap();
    frame.attach_next_header(None, true).unwrap();
    let mut bytes = frame.into_wire_frame().unwrap();
    bytes.extend_from_slice(&terminator_frame("worker1").unwrap());
    bytes
}

fn result_with_rows(query_id: QueryId, job_id: JobId, rows: &[&str], attempt: AttemptCount) -> ResultMsg {
    let bundles: Vec<RowBundle> =
        rows.iter().map(|v| RowBundle { column: vec![v.as_bytes().to_vec()], isnull: vec![false] }).collect();
    ResultMsg {
        query_id,
        job_id,
        rowcount: bundles.len() as u32,
        row: bundles,
        transmitsize: rows.iter().map(|v| v.len() as u64).sum(),
        attemptcount: attempt,
        errorcode: 0,
        errormsg: String::new(),
        fileresource_xroot: String::new(),
        fileresource_http: String::new(),
    }
}

// S1: a single chunk/job with a handful of rows completes cleanly and the
// merger ends up with exactly those rows.
#[tokio::test]
async fn single_chunk_query_completes_with_its_rows() {
    let merger = Arc::new(VecMerger::new());
    let handler = MergingHandler::new(merger.clone(), 1, 1);
    let result = result_with_rows(1, 1, &["a", "b", "c"], 0);
    let state = handler.flush(&frame_for(&result), 0).unwrap();
    assert_eq!(state, MergeState::Complete);
    assert_eq!(merger.total_rows(), 3);

    let exec = Executive::new(1, None);
    exec.add(1, JobDescription::new(10, "worker1", vec![]));
    exec.mark_completed(1, true);
    assert!(exec.join().await);
    assert_eq!(exec.incomplete_count(), 0);
}

// S2: a LIMIT 5 query across many chunks stops merging once the target is
// reached, cancelling the jobs for chunks it never needed to visit.
#[tokio::test]
async fn limit_query_stops_at_exact_row_count() {
    let inner = Arc::new(VecMerger::new());
    let limiter = meshquery::czar::LimitingMerger::new(inner.clone(), 5);

    let exec = Executive::new(2, Some(5));
    const NUM_CHUNKS: u32 = 100;
    for job_id in 1..=NUM_CHUNKS {
        exec.add(job_id, JobDescription::new(job_id, "worker1", vec![]));
    }

    // Only the first three chunks ever actually produce a result; the rest
    // are superfluous once the limit is satisfied.
    for job_id in 1..=3u32 {
        limiter.merge_rows(2, job_id, vec![text_row("x"), text_row("y")]).unwrap();
        exec.mark_completed(job_id, true);
        exec.account_rows(2);
    }

    assert!(exec.is_limit_row_complete());
    assert_eq!(inner.total_rows(), 5, "limiter must cap the 6th row merged for chunk 3");
    assert!(exec.join().await);
    assert_eq!(exec.incomplete_count(), 0, "every never-dispatched job must be drained, not left hanging");
}

// S3: a corrupted first attempt is rejected outright; the retry on a fresh
// attempt count succeeds and a prior partial merge triggers a scrub.
#[tokio::test]
async fn corrupted_attempt_is_rejected_and_retry_succeeds() {
    let merger = Arc::new(VecMerger::new());
    let handler = MergingHandler::new(merger.clone(), 3, 1);

    let result = result_with_rows(3, 1, &["a"], 0);
    let mut bytes = frame_for(&result);
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    assert!(handler.flush(&bytes, 0).is_err(), "tampered frame must fail its checksum");
    assert_eq!(merger.total_rows(), 0, "a rejected frame must not have merged anything");

    let retry = result_with_rows(3, 1, &["a", "b"], 1);
    let state = handler.flush(&frame_for(&retry), 1).unwrap();
    assert_eq!(state, MergeState::Complete);
    assert_eq!(merger.total_rows(), 2);
}

#[tokio::test]
async fn switching_attempt_counts_after_a_partial_merge_scrubs_first() {
    let merger = Arc::new(VecMerger::new());
    let handler = MergingHandler::new(merger.clone(), 3, 7);

    let attempt0 = result_with_rows(3, 7, &["stale"], 0);
    handler.flush(&frame_for(&attempt0), 0).unwrap();
    assert_eq!(merger.scrub_calls.load(std::sync::atomic::Ordering::Relaxed), 0);

    let attempt1 = result_with_rows(3, 7, &["fresh"], 1);
    handler.flush(&frame_for(&attempt1), 1).unwrap();
    assert_eq!(merger.scrub_calls.load(std::sync::atomic::Ordering::Relaxed), 1);
}

// S4: a worker-reported error on one job squashes the whole query and
// leaves a message naming the failing chunk and its error code.
#[tokio::test]
async fn worker_error_squashes_query_and_records_message() {
    let merger = Arc::new(VecMerger::new());
    let handler = MergingHandler::new(merger, 4, 42);

    let mut failing = result_with_rows(4, 42, &[], 0);
    failing.errorcode = 17;
    failing.errormsg = "overlap table missing".to_string();
    let err = handler.flush(&frame_for(&failing), 0).unwrap_err();
    let code = match err {
        CoreError::RemoteError { code, .. } => code,
        other => panic!("expected RemoteError, got {other:?}"),
    };
    assert_eq!(code, 17);

    let exec = Executive::new(4, None);
    exec.add(42, JobDescription::new(42, "worker1", vec![]));
    exec.add(43, JobDescription::new(43, "worker2", vec![]));
    exec.mark_completed_with_code(42, false, code);

    assert!(!exec.join().await);
    let messages = exec.message_store().drain();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].chunk_id, 42);
    assert_eq!(messages[0].state_code, 17);
}

// S5: once a query is marked booted, its already-queued tasks move off the
// scan scheduler they were sitting on and land on the snail scheduler.
#[tokio::test]
async fn booting_a_query_migrates_queued_tasks_to_snail() {
    let mem_man = Arc::new(UnlimitedMemMan::new());
    let group = Arc::new(GroupScheduler::new("group", 4));
    let fast = Arc::new(ScanScheduler::new("fast", 4, 1, 4, 0, 100, mem_man.clone()));
    let snail = Arc::new(ScanScheduler::new("snail", 1, 1, 1, i32::MIN, i32::MAX, mem_man));
    let blend = BlendScheduler::new(8, group, vec![fast], snail);

    let table = ScanTableInfo { db: "lsst".into(), table: "Object".into(), lock_in_mem: false, scan_rating: 10 };
    let tasks: Vec<Task> = (0..3).map(|i| Task::new(9, i, 100 + i, vec![table.clone()], false)).collect();
    blend.queue_cmd(tasks);

    blend.set_booted(9, true);

    // Freshly submitted work for the same query must also land on snail now.
    let more = vec![Task::new(9, 99, 200, vec![table], false)];
    blend.queue_cmd(more);

    let mut seen = 0;
    while let Some(task) = blend.get_cmd() {
        assert_eq!(task.query_id, 9);
        blend.command_start(&task);
        blend.command_finish(&task);
        seen += 1;
    }
    assert_eq!(seen, 4, "the 3 migrated tasks plus the 1 new one should all be retrievable");
}

// S6: the transmit manager enforces a hard ceiling on concurrent transmits,
// blocking a second task until the first releases its slot.
#[tokio::test]
async fn transmit_slot_blocks_until_released() {
    let mgr = Arc::new(TransmitMgr::new(1, 10));
    let lock_a = mgr.take(false, 1).await;
    assert_eq!(mgr.transmit_count(), 1);

    let mgr2 = mgr.clone();
    let waiter = tokio::spawn(async move { mgr2.take(false, 2).await });
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert!(!waiter.is_finished(), "second task must block while the only slot is held");

    drop(lock_a);
    let lock_b = tokio::time::timeout(std::time::Duration::from_millis(500), waiter)
        .await
        .expect("waiter should resolve once the slot is released")
        .unwrap();
    assert_eq!(mgr.transmit_count(), 1);
    drop(lock_b);
    assert_eq!(mgr.transmit_count(), 0);
}
