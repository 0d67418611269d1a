//! One transport stream shared by every task of a (queryId, chunkId) pair.
//!
//! Ported from `src/wbase/ChannelShared.{h,cc}` and `SendChannel.h`. The
//! transport-facing `SendChannel` becomes a trait; `ChannelShared` wraps a
//! `dyn SendChannel` exactly as the original wraps `wbase::SendChannel`.

use crate::common::{AttemptCount, ChunkId, JobId, QueryId, Row};
use crate::error::Result;
use crate::wire::{ResultMsg, TransmitData};
use crate::worker::transmit_mgr::{TransmitLock, TransmitMgr};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Transport-facing sink a `ChannelShared` streams frames into.
#[async_trait]
pub trait SendChannel: Send + Sync {
    async fn send(&self, buf: &[u8]) -> Result<bool>;
    async fn send_error(&self, msg: &str, code: i32) -> Result<bool>;
    fn kill(&self, note: &str) -> bool;
    fn is_dead(&self) -> bool;
    fn seq(&self) -> u64;
}

/// In-process `SendChannel` useful for single-process deployments and
/// tests: frames are appended to a shared buffer instead of going over a
/// socket.
pub struct BufferSendChannel {
    buf: Mutex<Vec<u8>>,
    dead: AtomicBool,
    seq: AtomicU64,
}

impl BufferSendChannel {
    pub fn new() -> Self {
        Self { buf: Mutex::new(Vec::new()), dead: AtomicBool::new(false), seq: AtomicU64::new(0) }
    }

    pub fn take_buffer(&self) -> Vec<u8> {
        std::mem::take(&mut self.buf.lock())
    }
}

impl Default for BufferSendChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SendChannel for BufferSendChannel {
    async fn send(&self, buf: &[u8]) -> Result<bool> {
        if self.dead.load(Ordering::Acquire) {
            return Ok(false);
        }
        self.buf.lock().extend_from_slice(buf);
        self.seq.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    async fn send_error(&self, _msg: &str, _code: i32) -> Result<bool> {
        self.send(&[]).await
    }

    fn kill(&self, _note: &str) -> bool {
        self.dead.store(true, Ordering::Release);
        true
    }

    fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }

    fn seq(&self) -> u64 {
        self.seq.load(Ordering::Relaxed)
    }
}

/// Identifies the job whose rows are currently being accumulated into a
/// transmit frame; the slice of `Task` fields `ChannelShared` actually uses.
#[derive(Debug, Clone, Copy)]
pub struct TaskCtx {
    pub query_id: QueryId,
    pub job_id: JobId,
    pub chunk_id: ChunkId,
    pub attempt_count: AttemptCount,
}

/// Shared by all tasks of one (queryId, chunkId) tuple so that near-neighbor
/// sub-chunk tasks stream into a single ordered byte channel.
pub struct ChannelShared {
    send_channel: Arc<dyn SendChannel>,
    transmit_mgr: Arc<TransmitMgr>,
    wname: String,
    scs_id: u64,
    task_count: AtomicI32,
    last_count: AtomicI32,
    last_recvd: AtomicBool,
    first_transmit: AtomicBool,
    transmit_lock: Mutex<Option<TransmitLock>>,
    transmit_lock_notify: Notify,
    /// Queue of frames waiting to be chained and sent; protected the way
    /// the original's `_queueMtx` protects `_transmitQueue`.
    queue: Mutex<VecDeque<TransmitData>>,
    /// The frame currently accumulating rows, protected like `_tMtx`.
    current: Mutex<Option<TransmitData>>,
}

static SCS_SEQ: AtomicU64 = AtomicU64::new(0);

impl ChannelShared {
    pub fn new(send_channel: Arc<dyn SendChannel>, transmit_mgr: Arc<TransmitMgr>, wname: impl Into<String>) -> Self {
        Self {
            send_channel,
            transmit_mgr,
            wname: wname.into(),
            scs_id: SCS_SEQ.fetch_add(1, Ordering::Relaxed),
            task_count: AtomicI32::new(0),
            last_count: AtomicI32::new(0),
            last_recvd: AtomicBool::new(false),
            first_transmit: AtomicBool::new(true),
            transmit_lock: Mutex::new(None),
            transmit_lock_notify: Notify::new(),
            queue: Mutex::new(VecDeque::new()),
            current: Mutex::new(None),
        }
    }

    pub fn scs_id(&self) -> u64 {
        self.scs_id
    }

    pub fn is_dead(&self) -> bool {
        self.send_channel.is_dead()
    }

    pub fn set_task_count(&self, n: i32) {
        self.task_count.store(n, Ordering::Relaxed);
    }

    pub fn get_task_count(&self) -> i32 {
        self.task_count.load(Ordering::Relaxed)
    }

    /// Increment the "last" counter; the caller that pushes it to
    /// `taskCount` learns that no more frames will be added.
    pub fn transmit_task_last(&self) -> bool {
        let n = self.last_count.fetch_add(1, Ordering::AcqRel) + 1;
        n >= self.task_count.load(Ordering::Relaxed)
    }

    pub fn kill(&self, note: &str) -> bool {
        self.last_recvd.store(true, Ordering::Release);
        self.send_channel.kill(note)
    }

    async fn wait_transmit_lock(&self, interactive: bool, query_id: QueryId) {
        if self.transmit_lock.lock().is_some() {
            return;
        }
        let lock = self.transmit_mgr.take(interactive, query_id).await;
        *self.transmit_lock.lock() = Some(lock);
        self.transmit_lock_notify.notify_waiters();
    }

    fn make_id_str(&self, query_id: QueryId, job_id: JobId) -> String {
        if query_id == 0 {
            "QID".to_string()
        } else {
            format!("QID{}#{}", query_id, job_id)
        }
    }

    /// Read rows into the current transmit frame until the soft size limit,
    /// pushes the frame onto the internal queue, and drives transmission.
    /// Blocks while the queue already holds >= 2 frames (backpressure).
    pub async fn build_and_transmit_result(
        &self,
        rows: &[Row],
        task: TaskCtx,
        last_in: bool,
        cancelled: bool,
    ) -> Result<bool> {
        self.wait_transmit_lock(false, task.query_id).await;

        let result = {
            let mut current = self.current.lock();
            let frame = current.get_or_insert_with(|| TransmitData::new(self.wname.clone()));
            frame.fill_rows(rows);
            ResultMsg {
                query_id: task.query_id,
                job_id: task.job_id,
                row: Vec::new(),
                rowcount: frame.row_count(),
                transmitsize: frame.transmit_size(),
                attemptcount: task.attempt_count,
                errorcode: 0,
                errormsg: String::new(),
                fileresource_xroot: String::new(),
                fileresource_http: String::new(),
            }
        };
        let mut frame = self.current.lock().take().unwrap();
        frame.build_data_msg(&result)?;
        self.prep_transmit(frame, task, cancelled, last_in).await
    }

    /// Discard any partially built frame and push an error frame; sent even
    /// when the task has been cancelled, to release waiters.
    pub async fn build_and_transmit_error(&self, msg: &str, code: i32, task: TaskCtx, cancelled: bool) -> Result<bool> {
        self.wait_transmit_lock(true, task.query_id).await;
        *self.current.lock() = None;
        let mut frame = TransmitData::new(self.wname.clone());
        let result = ResultMsg {
            query_id: task.query_id,
            job_id: task.job_id,
            row: Vec::new(),
            rowcount: 0,
            transmitsize: 0,
            attemptcount: task.attempt_count,
            errorcode: code,
            errormsg: msg.to_string(),
            fileresource_xroot: String::new(),
            fileresource_http: String::new(),
        };
        frame.build_data_msg(&result)?;
        self.prep_transmit(frame, task, cancelled, true).await
    }

    async fn prep_transmit(&self, frame: TransmitData, task: TaskCtx, cancelled: bool, last_in: bool) -> Result<bool> {
        if self.is_dead() {
            return Ok(false);
        }
        self.add_transmit(frame, task, cancelled, last_in).await
    }

    async fn add_transmit(&self, tdata: TransmitData, task: TaskCtx, cancelled: bool, last_in: bool) -> Result<bool> {
        let id_str = self.make_id_str(task.query_id, task.job_id);
        {
            let mut queue = self.queue.lock();
            if self.last_recvd.load(Ordering::Acquire) {
                tracing::warn!(id = %id_str, "addTransmit after reallyLast or dead");
                return Ok(false);
            }
            queue.push_back(tdata);
            if last_in || cancelled {
                self.last_recvd.store(true, Ordering::Release);
            }
        }
        self.drain_queue().await
    }

    /// Encode queued frames and pass them to the transport. A frame may not
    /// be sent until either its successor is on the queue (so its header
    /// can be chained onto the current body) or it is known to be last.
    async fn drain_queue(&self) -> Result<bool> {
        loop {
            let frame = {
                let mut queue = self.queue.lock();
                if queue.len() < 2 && !self.last_recvd.load(Ordering::Acquire) {
                    return Ok(true);
                }
                if queue.is_empty() {
                    return Ok(true);
                }
                let really_last = queue.len() == 1 && self.last_recvd.load(Ordering::Acquire);
                let contiguous = queue.make_contiguous();
                if really_last {
                    contiguous[0].attach_next_header(None, true)?;
                } else {
                    let (front, rest) = contiguous.split_at_mut(1);
                    front[0].attach_next_header(Some(&rest[0]), false)?;
                }
                let frame = queue.pop_front().unwrap();
                (frame, really_last)
            };
            let (frame, really_last) = frame;
            let bytes = frame.into_wire_frame()?;
            let sent = self.send_channel.send(&bytes).await?;
            if !sent {
                self.kill("ChannelShared::drain_queue send failed");
                return Ok(false);
            }
            if self.first_transmit.swap(false, Ordering::AcqRel) {
                tracing::debug!("first transmit sent for scsId={}", self.scs_id);
            }
            if really_last {
                return Ok(true);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> TaskCtx {
        TaskCtx { query_id: 1, job_id: 1, chunk_id: 10, attempt_count: 0 }
    }

    #[tokio::test]
    async fn task_count_zero_sends_only_terminator() {
        let send = Arc::new(BufferSendChannel::new());
        let mgr = Arc::new(TransmitMgr::new(10, 10));
        let channel = ChannelShared::new(send.clone(), mgr, "worker1");
        channel.set_task_count(0);
        assert!(channel.transmit_task_last());
        let ok = channel
            .build_and_transmit_error("no tasks", 0, ctx(), false)
            .await
            .unwrap();
        assert!(ok);
        assert!(!send.take_buffer().is_empty());
    }

    #[tokio::test]
    async fn kill_marks_channel_dead() {
        let send = Arc::new(BufferSendChannel::new());
        let mgr = Arc::new(TransmitMgr::new(10, 10));
        let channel = ChannelShared::new(send, mgr, "worker1");
        assert!(!channel.is_dead());
        channel.kill("test");
        assert!(channel.is_dead());
    }
}
