//! Worker-side admission control: a composite `BlendScheduler` that fans
//! tasks out to a `GroupScheduler`, a band of `ScanScheduler`s, and a
//! "snail" scheduler for booted queries.
//!
//! Grounded on `src/wsched/BlendScheduler.cc` (composite selection order
//! and the `(inFlight - priority)` sort), `src/wsched/ScanScheduler.cc`
//! (rating bands, MemMan-gated chunk advancement), `src/wsched/
//! GroupScheduler.cc` (chunk-grouped FIFO), and `src/wsched/
//! ChunkTasksQueue.cc` (per-chunk active/pending/in-flight bucket). The
//! deep `SchedulerBase` inheritance chain collapses into one `Scheduler`
//! trait per the REDESIGN FLAGS' dynamic-dispatch guidance.

use crate::worker::mem_man::{LockType, MemMan, PrepareOutcome};
use crate::worker::task::Task;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{BinaryHeap, HashSet, VecDeque};
use std::sync::Arc;

/// Minimal surface every sub-scheduler exposes to `BlendScheduler`.
pub trait Scheduler: Send + Sync {
    fn name(&self) -> &str;
    fn queue(&self, tasks: Vec<Task>);
    fn get(&self) -> Option<Task>;
    fn ready(&self) -> bool;
    fn start(&self, task: &Task);
    fn finish(&self, task: &Task);
    fn reserve(&self) -> i32;
    fn in_flight(&self) -> i32;
    fn size(&self) -> usize;
    fn as_any(&self) -> &dyn std::any::Any;

    /// Pull every not-yet-started task belonging to `query_id` off this
    /// scheduler's queue (pending and active, but never in-flight) so a
    /// caller can re-route them. Default no-op: only `ScanScheduler` bands
    /// are subject to query-boot demotion.
    fn remove_queued_for_query(&self, _query_id: crate::common::QueryId) -> Vec<Task> {
        Vec::new()
    }
}

/// Interactive and no-scan-table tasks, grouped by chunkId so
/// near-neighbor sub-chunk tasks run back-to-back.
pub struct GroupScheduler {
    name: String,
    max_in_flight: i32,
    chunk_order: Mutex<VecDeque<u32>>,
    by_chunk: Mutex<std::collections::HashMap<u32, VecDeque<Task>>>,
    in_flight: std::sync::atomic::AtomicI32,
}

impl GroupScheduler {
    pub fn new(name: impl Into<String>, max_in_flight: i32) -> Self {
        Self {
            name: name.into(),
            max_in_flight,
            chunk_order: Mutex::new(VecDeque::new()),
            by_chunk: Mutex::new(std::collections::HashMap::new()),
            in_flight: std::sync::atomic::AtomicI32::new(0),
        }
    }
}

impl Scheduler for GroupScheduler {
    fn name(&self) -> &str {
        &self.name
    }

    fn queue(&self, tasks: Vec<Task>) {
        let mut order = self.chunk_order.lock();
        let mut by_chunk = self.by_chunk.lock();
        for task in tasks {
            let chunk_id = task.chunk_id;
            let entry = by_chunk.entry(chunk_id).or_insert_with(|| {
                order.push_back(chunk_id);
                VecDeque::new()
            });
            entry.push_back(task);
        }
    }

    fn get(&self) -> Option<Task> {
        let mut order = self.chunk_order.lock();
        let mut by_chunk = self.by_chunk.lock();
        while let Some(&chunk_id) = order.front() {
            if let Some(queue) = by_chunk.get_mut(&chunk_id) {
                if let Some(task) = queue.pop_front() {
                    if queue.is_empty() {
                        by_chunk.remove(&chunk_id);
                        order.pop_front();
                    }
                    return Some(task);
                }
            }
            order.pop_front();
        }
        None
    }

    fn ready(&self) -> bool {
        !self.chunk_order.lock().is_empty() && self.in_flight.load(std::sync::atomic::Ordering::Relaxed) < self.max_in_flight
    }

    fn start(&self, _task: &Task) {
        self.in_flight.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    fn finish(&self, _task: &Task) {
        self.in_flight.fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
    }

    fn reserve(&self) -> i32 {
        0
    }

    fn in_flight(&self) -> i32 {
        self.in_flight.load(std::sync::atomic::Ordering::Relaxed)
    }

    fn size(&self) -> usize {
        self.by_chunk.lock().values().map(VecDeque::len).sum()
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Ordering wrapper so the active heap pops slowest-table-first.
struct HeapTask(Task);

impl PartialEq for HeapTask {
    fn eq(&self, other: &Self) -> bool {
        self.0.ordering_key() == other.0.ordering_key()
    }
}
impl Eq for HeapTask {}
impl PartialOrd for HeapTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapTask {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.ordering_key().cmp(&other.0.ordering_key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Active,
    Inactive,
}

struct ChunkTasks {
    active: BinaryHeap<HeapTask>,
    pending: VecDeque<Task>,
    in_flight: HashSet<u64>,
    state: ChunkState,
    mem_handle: Option<crate::worker::mem_man::Handle>,
}

impl ChunkTasks {
    fn new() -> Self {
        Self { active: BinaryHeap::new(), pending: VecDeque::new(), in_flight: HashSet::new(), state: ChunkState::Inactive, mem_handle: None }
    }

    fn is_empty_of_work(&self) -> bool {
        self.active.is_empty() && self.pending.is_empty() && self.in_flight.is_empty()
    }
}

/// Per-chunk bucketing with round-robin chunk advancement, guarded by one
/// mutex (`mapMtx` in the original).
struct ChunkTasksQueue {
    chunks: Mutex<std::collections::HashMap<u32, ChunkTasks>>,
    order: Mutex<VecDeque<u32>>,
}

impl ChunkTasksQueue {
    fn new() -> Self {
        Self { chunks: Mutex::new(std::collections::HashMap::new()), order: Mutex::new(VecDeque::new()) }
    }

    fn queue_task(&self, task: Task) {
        let mut chunks = self.chunks.lock();
        let mut order = self.order.lock();
        let chunk_id = task.chunk_id;
        let entry = chunks.entry(chunk_id).or_insert_with(|| {
            order.push_back(chunk_id);
            ChunkTasks::new()
        });
        match entry.state {
            ChunkState::Active => entry.active.push(HeapTask(task)),
            ChunkState::Inactive => entry.pending.push_back(task),
        }
    }

    fn task_complete(&self, seq: u64, chunk_id: u32) {
        let mut chunks = self.chunks.lock();
        if let Some(ct) = chunks.get_mut(&chunk_id) {
            ct.in_flight.remove(&seq);
            if ct.is_empty_of_work() {
                ct.state = ChunkState::Inactive;
                ct.mem_handle = None;
            }
        }
    }

    fn empty(&self) -> bool {
        self.order.lock().is_empty()
    }
}

/// One scan-rating band of the shared scan: `[min_rating, max_rating)`.
pub struct ScanScheduler {
    name: String,
    min_rating: i32,
    max_rating: i32,
    max_threads: i32,
    max_reserve: i32,
    max_active_chunks: usize,
    mem_man: Arc<dyn MemMan>,
    queue: ChunkTasksQueue,
    in_flight: std::sync::atomic::AtomicI32,
}

impl ScanScheduler {
    pub fn new(
        name: impl Into<String>,
        max_threads: i32,
        max_reserve: i32,
        max_active_chunks: usize,
        min_rating: i32,
        max_rating: i32,
        mem_man: Arc<dyn MemMan>,
    ) -> Self {
        Self {
            name: name.into(),
            min_rating,
            max_rating,
            max_threads,
            max_reserve,
            max_active_chunks,
            mem_man,
            queue: ChunkTasksQueue::new(),
            in_flight: std::sync::atomic::AtomicI32::new(0),
        }
    }

    pub fn is_rating_in_range(&self, rating: i32) -> bool {
        rating >= self.min_rating && rating < self.max_rating
    }

    pub fn active_chunk_count(&self) -> usize {
        self.active_chunk_count_locked(&self.queue.chunks.lock())
    }

    /// Advance the round-robin pointer, calling `MemMan::prepare` for the
    /// next inactive chunk with work until one succeeds or all are tried.
    fn try_activate_next(&self) -> Option<u32> {
        let mut chunks = self.queue.chunks.lock();
        let order = self.queue.order.lock();
        let n = order.len();
        for i in 0..n {
            let chunk_id = order[i];
            let ct = match chunks.get_mut(&chunk_id) {
                Some(ct) => ct,
                None => continue,
            };
            if ct.state == ChunkState::Active || ct.pending.is_empty() {
                continue;
            }
            if self.active_chunk_count_locked(&chunks) >= self.max_active_chunks {
                break;
            }
            let tables: Vec<(String, String)> = ct
                .pending
                .front()
                .map(|t| t.scan_tables.iter().map(|st| (st.db.clone(), st.table.clone())).collect())
                .unwrap_or_default();
            let lock_type = if ct.in_flight.is_empty() { LockType::Flexible } else { LockType::Required };
            match self.mem_man.prepare(&tables, chunk_id, lock_type) {
                PrepareOutcome::Ready(handle) => {
                    ct.mem_handle = Some(handle);
                    ct.state = ChunkState::Active;
                    while let Some(t) = ct.pending.pop_front() {
                        ct.active.push(HeapTask(t));
                    }
                    return Some(chunk_id);
                }
                PrepareOutcome::NoResources => continue,
            }
        }
        None
    }

    fn active_chunk_count_locked(&self, chunks: &std::collections::HashMap<u32, ChunkTasks>) -> usize {
        chunks.values().filter(|c| c.state == ChunkState::Active).count()
    }
}

impl Scheduler for ScanScheduler {
    fn name(&self) -> &str {
        &self.name
    }

    fn queue(&self, tasks: Vec<Task>) {
        for task in tasks {
            self.queue.queue_task(task);
        }
    }

    fn get(&self) -> Option<Task> {
        if self.in_flight.load(std::sync::atomic::Ordering::Relaxed) >= self.max_threads {
            return None;
        }
        loop {
            let mut chunks = self.queue.chunks.lock();
            let order = self.queue.order.lock();
            let mut found = None;
            for &chunk_id in order.iter() {
                if let Some(ct) = chunks.get_mut(&chunk_id) {
                    if ct.state == ChunkState::Active {
                        if let Some(HeapTask(task)) = ct.active.pop() {
                            ct.in_flight.insert(task.seq);
                            found = Some(task);
                            break;
                        }
                    }
                }
            }
            drop(order);
            drop(chunks);
            if found.is_some() {
                return found;
            }
            if self.try_activate_next().is_none() {
                return None;
            }
        }
    }

    fn ready(&self) -> bool {
        if self.in_flight.load(std::sync::atomic::Ordering::Relaxed) >= self.max_threads {
            return false;
        }
        let chunks = self.queue.chunks.lock();
        chunks.values().any(|c| c.state == ChunkState::Active && !c.active.is_empty())
            || chunks.values().any(|c| c.state == ChunkState::Inactive && !c.pending.is_empty())
    }

    fn start(&self, _task: &Task) {
        self.in_flight.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    fn finish(&self, task: &Task) {
        self.in_flight.fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
        self.queue.task_complete(task.seq, task.chunk_id);
    }

    fn reserve(&self) -> i32 {
        self.max_reserve
    }

    fn in_flight(&self) -> i32 {
        self.in_flight.load(std::sync::atomic::Ordering::Relaxed)
    }

    fn size(&self) -> usize {
        self.queue
            .chunks
            .lock()
            .values()
            .map(|c| c.active.len() + c.pending.len())
            .sum()
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn remove_queued_for_query(&self, query_id: crate::common::QueryId) -> Vec<Task> {
        let mut removed = Vec::new();
        let mut chunks = self.queue.chunks.lock();
        for ct in chunks.values_mut() {
            let kept: VecDeque<Task> = ct
                .pending
                .drain(..)
                .filter_map(|t| {
                    if t.query_id == query_id {
                        removed.push(t);
                        None
                    } else {
                        Some(t)
                    }
                })
                .collect();
            ct.pending = kept;

            let remaining: Vec<HeapTask> = ct
                .active
                .drain()
                .filter_map(|ht| {
                    if ht.0.query_id == query_id {
                        removed.push(ht.0.clone());
                        None
                    } else {
                        Some(ht)
                    }
                })
                .collect();
            ct.active = remaining.into_iter().collect();
        }
        removed
    }
}

/// Composite scheduler: group first, rating-ordered scan bands, snail
/// last. Selection order is Group, then scan schedulers sorted by
/// `(inFlight - priority)` ascending, then Snail.
pub struct BlendScheduler {
    schedulers: Vec<Arc<dyn Scheduler>>,
    group_name: String,
    snail_name: String,
    sched_max_threads: i32,
    booted_queries: DashMap<crate::common::QueryId, bool>,
}

impl BlendScheduler {
    pub fn new(
        sched_max_threads: i32,
        group: Arc<GroupScheduler>,
        scan_schedulers: Vec<Arc<ScanScheduler>>,
        snail: Arc<ScanScheduler>,
    ) -> Self {
        let group_name = group.name().to_string();
        let snail_name = snail.name().to_string();
        let mut schedulers: Vec<Arc<dyn Scheduler>> = Vec::new();
        schedulers.push(group);
        for s in scan_schedulers {
            schedulers.push(s);
        }
        schedulers.push(snail);
        Self { schedulers, group_name, snail_name, sched_max_threads, booted_queries: DashMap::new() }
    }

    /// Marking a query booted routes its future tasks to Snail (see
    /// `queue_cmd`) and migrates its not-yet-started queued tasks there too;
    /// tasks already in flight finish on whichever scheduler dispatched
    /// them, per `src/wsched/BlendScheduler.cc`'s `moveUserQuery`.
    pub fn set_booted(&self, query_id: crate::common::QueryId, booted: bool) {
        if booted {
            self.booted_queries.insert(query_id, true);
            let moved: Vec<Task> = self
                .schedulers
                .iter()
                .filter(|s| s.name() != self.snail_name)
                .flat_map(|s| s.remove_queued_for_query(query_id))
                .collect();
            if !moved.is_empty() {
                if let Some(snail) = self.schedulers.iter().find(|s| s.name() == self.snail_name) {
                    snail.queue(moved);
                }
            }
        } else {
            self.booted_queries.remove(&query_id);
        }
    }

    fn is_booted(&self, query_id: crate::common::QueryId) -> bool {
        self.booted_queries.get(&query_id).is_some()
    }

    /// Classify and dispatch a batch of tasks belonging to one job; all go
    /// to the same sub-scheduler.
    pub fn queue_cmd(&self, tasks: Vec<Task>) {
        if tasks.is_empty() {
            return;
        }
        let first = &tasks[0];
        let target: &str = if first.scan_tables.is_empty() || first.interactive {
            &self.group_name
        } else if self.is_booted(first.query_id) {
            &self.snail_name
        } else {
            let rating = first.scan_priority;
            self.schedulers
                .iter()
                .find_map(|s| {
                    s.as_any()
                        .downcast_ref::<ScanScheduler>()
                        .filter(|scan| scan.is_rating_in_range(rating))
                        .map(|_| s.name())
                })
                .unwrap_or(&self.snail_name)
        };
        if let Some(sched) = self.schedulers.iter().find(|s| s.name() == target) {
            sched.queue(tasks);
        }
    }

    fn calc_available_threads(&self) -> i32 {
        let reserve: i32 = self.schedulers.iter().map(|s| s.reserve()).sum();
        self.sched_max_threads - reserve
    }

    fn sorted_for_selection(&self) -> Vec<&Arc<dyn Scheduler>> {
        let mut order: Vec<&Arc<dyn Scheduler>> = self.schedulers.iter().collect();
        order.sort_by(|a, b| {
            if a.name() == self.group_name {
                return std::cmp::Ordering::Less;
            }
            if b.name() == self.group_name {
                return std::cmp::Ordering::Greater;
            }
            if a.name() == self.snail_name {
                return std::cmp::Ordering::Greater;
            }
            if b.name() == self.snail_name {
                return std::cmp::Ordering::Less;
            }
            (a.in_flight() - a.reserve()).cmp(&(b.in_flight() - b.reserve()))
        });
        order
    }

    /// A scheduler may be asked for work once it's still within its own
    /// reserved thread share, or while the pool has floating capacity
    /// beyond everyone's combined reserve.
    fn admit(&self, sched: &dyn Scheduler, available: i32) -> bool {
        sched.in_flight() < sched.reserve() || available > 0
    }

    pub fn ready(&self) -> bool {
        let available = self.calc_available_threads();
        self.sorted_for_selection().into_iter().any(|s| self.admit(s.as_ref(), available) && s.ready())
    }

    pub fn get_cmd(&self) -> Option<Task> {
        let available = self.calc_available_threads();
        for sched in self.sorted_for_selection() {
            if !self.admit(sched.as_ref(), available) {
                continue;
            }
            if let Some(task) = sched.get() {
                return Some(task);
            }
        }
        None
    }

    pub fn command_start(&self, task: &Task) {
        if let Some(sched) = self.scheduler_for(task) {
            sched.start(task);
        }
    }

    pub fn command_finish(&self, task: &Task) {
        if let Some(sched) = self.scheduler_for(task) {
            sched.finish(task);
        }
    }

    fn scheduler_for(&self, task: &Task) -> Option<&Arc<dyn Scheduler>> {
        if task.scan_tables.is_empty() || task.interactive {
            return self.schedulers.iter().find(|s| s.name() == self.group_name);
        }
        if self.is_booted(task.query_id) {
            return self.schedulers.iter().find(|s| s.name() == self.snail_name);
        }
        self.schedulers
            .iter()
            .find(|s| {
                s.as_any()
                    .downcast_ref::<ScanScheduler>()
                    .map(|scan| scan.is_rating_in_range(task.scan_priority))
                    .unwrap_or(false)
            })
            .or_else(|| self.schedulers.iter().find(|s| s.name() == self.snail_name))
    }

    pub fn size(&self) -> usize {
        self.schedulers.iter().map(|s| s.size()).sum()
    }

    pub fn in_flight(&self) -> i32 {
        self.schedulers.iter().map(|s| s.in_flight()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::mem_man::UnlimitedMemMan;

    fn task(chunk: u32, rating: i32) -> Task {
        Task::new(1, 1, chunk, vec![crate::common::ScanTableInfo {
            db: "lsst".into(),
            table: "Object".into(),
            lock_in_mem: true,
            scan_rating: rating,
        }], false)
    }

    #[test]
    fn group_scheduler_groups_by_chunk() {
        let g = GroupScheduler::new("group", 100);
        g.queue(vec![task(1, 0), task(2, 0), task(1, 0)]);
        assert_eq!(g.size(), 3);
        let first = g.get().unwrap();
        assert_eq!(first.chunk_id, 1);
    }

    #[test]
    fn scan_scheduler_activates_and_completes_chunk() {
        let mem = Arc::new(UnlimitedMemMan::new());
        let sched = ScanScheduler::new("fast", 4, 0, 4, 0, 100, mem);
        sched.queue(vec![task(7, 10)]);
        assert!(sched.ready());
        let t = sched.get().unwrap();
        assert_eq!(t.chunk_id, 7);
        sched.start(&t);
        sched.finish(&t);
        assert_eq!(sched.in_flight(), 0);
    }

    #[test]
    fn booting_a_query_migrates_its_queued_tasks_to_snail() {
        let mem = Arc::new(UnlimitedMemMan::new());
        let group = Arc::new(GroupScheduler::new("group", 100));
        let fast = Arc::new(ScanScheduler::new("scan-fast", 4, 0, 4, 0, 100, mem.clone()));
        let snail = Arc::new(ScanScheduler::new("snail", 1, 1, 1, i32::MIN, i32::MAX, mem));
        let blend = BlendScheduler::new(8, group, vec![fast.clone()], snail.clone());

        blend.queue_cmd(vec![task(1, 10), task(2, 10)]);
        assert_eq!(fast.size(), 2);
        assert_eq!(snail.size(), 0);

        blend.set_booted(1, true);
        assert_eq!(fast.size(), 0);
        assert_eq!(snail.size(), 2);

        blend.queue_cmd(vec![task(3, 10)]);
        assert_eq!(fast.size(), 0);
        assert_eq!(snail.size(), 3);
    }
}
