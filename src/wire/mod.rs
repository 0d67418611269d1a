//! On-wire framing: length-prefixed header -> body -> next-header -> body...
//!
//! Ported from `src/wbase/TransmitData.{h,cc}`. Bodies are `bincode`-encoded
//! rather than Protobuf, since this workspace carries no `prost` toolchain;
//! message field names and shapes otherwise mirror the original exactly.

use crate::common::{AttemptCount, ChunkId, JobId, QueryId, Row, ScanTableInfo};
use crate::error::{CoreError, Result};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Hard ceiling on a frame's body size.
pub const PROTOBUFFER_HARD_LIMIT: usize = 512 * 1024 * 1024;
/// Soft limit that causes the worker to flush a frame early.
pub const PROTOBUFFER_DESIRED_LIMIT: usize = 4 * 1024 * 1024;

static SEQ_SOURCE: AtomicU64 = AtomicU64::new(0);

fn md5_of(body: &[u8]) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(body);
    hasher.finalize().into()
}

/// The frame header preceding each body on the result stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtoHeader {
    pub size: u32,
    pub md5: [u8; 16],
    pub wname: String,
    pub largeresult: bool,
    pub endnodata: bool,
}

impl ProtoHeader {
    fn empty_terminator(wname: &str) -> Self {
        Self { size: 0, md5: [0u8; 16], wname: wname.to_string(), largeresult: false, endnodata: true }
    }
}

/// One result row plus its column null-mask, mirroring `RowBundle`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowBundle {
    pub column: Vec<Vec<u8>>,
    pub isnull: Vec<bool>,
}

impl From<&Row> for RowBundle {
    fn from(row: &Row) -> Self {
        let mut column = Vec::with_capacity(row.len());
        let mut isnull = Vec::with_capacity(row.len());
        for cell in &row.0 {
            match cell {
                crate::common::CellValue::Null => {
                    column.push(Vec::new());
                    isnull.push(true);
                }
                crate::common::CellValue::Int(v) => {
                    column.push(v.to_string().into_bytes());
                    isnull.push(false);
                }
                crate::common::CellValue::Float(v) => {
                    column.push(format!("{:.17e}", v).into_bytes());
                    isnull.push(false);
                }
                crate::common::CellValue::Text(v) => {
                    column.push(v.clone().into_bytes());
                    isnull.push(false);
                }
                crate::common::CellValue::Bytes(v) => {
                    column.push(v.clone());
                    isnull.push(false);
                }
            }
        }
        RowBundle { column, isnull }
    }
}

/// The body of a worker -> czar frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultMsg {
    pub query_id: QueryId,
    pub job_id: JobId,
    pub row: Vec<RowBundle>,
    pub rowcount: u32,
    pub transmitsize: u64,
    pub attemptcount: AttemptCount,
    pub errorcode: i32,
    pub errormsg: String,
    pub fileresource_xroot: String,
    pub fileresource_http: String,
}

impl ResultMsg {
    pub fn has_errormsg(&self) -> bool {
        !self.errormsg.is_empty()
    }
}

/// Metadata describing a job's result, delivered out of band or as the body
/// of a zero-length-inline-channel response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseSummary {
    pub query_id: QueryId,
    pub job_id: JobId,
    pub attemptcount: AttemptCount,
    pub rowcount: u32,
    pub transmitsize: u64,
    pub errorcode: i32,
    pub errormsg: String,
    pub wname: String,
    pub fileresource_xroot: String,
    pub fileresource_http: String,
}

/// One scan table referenced by a task's fragment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanTableMsg {
    pub db: String,
    pub table: String,
    pub lockinmem: bool,
    pub scanrating: i32,
}

impl From<&ScanTableInfo> for ScanTableMsg {
    fn from(t: &ScanTableInfo) -> Self {
        Self { db: t.db.clone(), table: t.table.clone(), lockinmem: t.lock_in_mem, scanrating: t.scan_rating }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubChunkSet {
    pub id: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentMsg {
    pub query: Vec<String>,
    pub subchunks: SubChunkSet,
    pub resulttable: String,
}

/// Czar -> worker dispatch message bound to one JobQuery attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMsg {
    pub queryid: QueryId,
    pub jobid: JobId,
    pub chunkid: ChunkId,
    pub attemptcount: AttemptCount,
    pub db: String,
    pub user: String,
    pub session: u64,
    pub fragment: Vec<FragmentMsg>,
    pub scantable: Vec<ScanTableMsg>,
    pub scanpriority: i32,
    pub scaninteractive: bool,
}

impl TaskMsg {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serde::encode_to_vec(self, bincode::config::standard())?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
        Ok(msg)
    }
}

/// A single arena-allocated frame under construction: a header plus the
/// growing byte buffer that will become this frame's body (with the next
/// frame's header appended once known).
pub struct TransmitData {
    header: ProtoHeader,
    pending_rows: Vec<Row>,
    data_msg: Vec<u8>,
    row_count: u32,
    t_size: u64,
    seq: u64,
    wname: String,
}

impl TransmitData {
    pub fn new(wname: impl Into<String>) -> Self {
        let wname = wname.into();
        Self {
            header: ProtoHeader::empty_terminator(&wname),
            pending_rows: Vec::new(),
            data_msg: Vec::new(),
            row_count: 0,
            t_size: 0,
            seq: SEQ_SOURCE.fetch_add(1, Ordering::Relaxed),
            wname,
        }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn row_count(&self) -> u32 {
        self.row_count
    }

    pub fn transmit_size(&self) -> u64 {
        self.t_size
    }

    /// Append rows to this frame's pending buffer until
    /// `PROTOBUFFER_DESIRED_LIMIT` is reached. Returns `false` once the
    /// caller should flush (the soft limit was hit mid-iteration).
    pub fn fill_rows(&mut self, rows: &[Row]) -> bool {
        for row in rows {
            let bundle = RowBundle::from(row);
            self.t_size += bundle.column.iter().map(|c| c.len() as u64).sum::<u64>();
            self.pending_rows.push(row.clone());
            self.row_count += 1;
            if self.t_size as usize > PROTOBUFFER_DESIRED_LIMIT.min(PROTOBUFFER_HARD_LIMIT) {
                return false;
            }
        }
        true
    }

    /// Serialize `result` as this frame's body and build the header for it.
    /// The header's `size` cannot be finalized until the *next* frame's
    /// header is known, per the chained-framing invariant; callers must
    /// call [`TransmitData::attach_next_header`] before transmitting.
    pub fn build_data_msg(&mut self, result: &ResultMsg) -> Result<()> {
        self.data_msg = bincode::serde::encode_to_vec(result, bincode::config::standard())?;
        self.row_count = result.rowcount;
        self.t_size = result.transmitsize;
        Ok(())
    }

    /// Append the header for the next frame (or a synthetic terminator
    /// header if `really_last`) to this frame's body, completing it for
    /// transmission.
    pub fn attach_next_header(&mut self, next: Option<&TransmitData>, really_last: bool) -> Result<()> {
        let next_header_bytes = if really_last {
            let term = ProtoHeader::empty_terminator(&self.wname);
            encode_header(&term)?
        } else {
            let next = next.ok_or_else(|| {
                CoreError::Bug("attachNextHeader called without really_last or a next frame".into())
            })?;
            encode_header(&next.header)?
        };
        self.data_msg.extend_from_slice(&next_header_bytes);
        self.header.size = self.data_msg.len() as u32;
        self.header.md5 = md5_of(&self.data_msg);
        self.header.endnodata = false;
        Ok(())
    }

    /// Render `(header_len, header_bytes, body_bytes)` ready to be written
    /// to the transport in that order.
    pub fn into_wire_frame(self) -> Result<Vec<u8>> {
        let header_bytes = encode_header(&self.header)?;
        let mut out = Vec::with_capacity(4 + header_bytes.len() + self.data_msg.len());
        out.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
        out.extend_from_slice(&header_bytes);
        out.extend_from_slice(&self.data_msg);
        Ok(out)
    }

    pub fn header(&self) -> &ProtoHeader {
        &self.header
    }
}

fn encode_header(header: &ProtoHeader) -> Result<Vec<u8>> {
    Ok(bincode::serde::encode_to_vec(header, bincode::config::standard())?)
}

/// Build the terminator frame: an empty body whose header has
/// `endnodata = true, size = 0`.
pub fn terminator_frame(wname: &str) -> Result<Vec<u8>> {
    let header = ProtoHeader::empty_terminator(wname);
    let header_bytes = encode_header(&header)?;
    let mut out = Vec::with_capacity(4 + header_bytes.len());
    out.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(&header_bytes);
    Ok(out)
}

/// Incrementally parses the repeating header/body sequence off a byte
/// stream, driving the same state machine as [`crate::czar::merging`].
pub struct FrameReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FrameReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Read one `(header, body)` pair, or `None` once the terminator frame
    /// has been consumed.
    pub fn next_frame(&mut self) -> Result<Option<(ProtoHeader, &'a [u8])>> {
        if self.pos + 4 > self.buf.len() {
            return Err(CoreError::Framing("truncated header length prefix".into()));
        }
        let header_len =
            u32::from_le_bytes(self.buf[self.pos..self.pos + 4].try_into().unwrap()) as usize;
        self.pos += 4;
        if self.pos + header_len > self.buf.len() {
            return Err(CoreError::Framing("truncated header".into()));
        }
        let header_bytes = &self.buf[self.pos..self.pos + header_len];
        self.pos += header_len;
        let (header, _): (ProtoHeader, usize) =
            bincode::serde::decode_from_slice(header_bytes, bincode::config::standard())?;
        if header.endnodata && header.size == 0 {
            return Ok(None);
        }
        if header.size as usize > PROTOBUFFER_HARD_LIMIT {
            return Err(CoreError::Framing("body exceeds PROTOBUFFER_HARD_LIMIT".into()));
        }
        if self.pos + header.size as usize > self.buf.len() {
            return Err(CoreError::Framing("truncated body".into()));
        }
        let body = &self.buf[self.pos..self.pos + header.size as usize];
        self.pos += header.size as usize;
        if md5_of(body) != header.md5 {
            return Err(CoreError::Framing("frame md5 mismatch".into()));
        }
        Ok(Some((header, body)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_result() -> ResultMsg {
        ResultMsg {
            query_id: 1,
            job_id: 2,
            row: vec![RowBundle { column: vec![b"a".to_vec()], isnull: vec![false] }],
            rowcount: 1,
            transmitsize: 1,
            attemptcount: 0,
            errorcode: 0,
            errormsg: String::new(),
            fileresource_xroot: String::new(),
            fileresource_http: String::new(),
        }
    }

    #[test]
    fn single_data_frame_then_terminator_round_trips() {
        let mut frame = TransmitData::new("worker1");
        frame.build_data_msg(&sample_result()).unwrap();
        frame.attach_next_header(None, true).unwrap();
        let mut bytes = frame.into_wire_frame().unwrap();
        bytes.extend_from_slice(&terminator_frame("worker1").unwrap());

        let mut reader = FrameReader::new(&bytes);
        let (header, body) = reader.next_frame().unwrap().unwrap();
        assert!(!header.endnodata);
        let (result, _): (ResultMsg, usize) =
            bincode::serde::decode_from_slice(body, bincode::config::standard()).unwrap();
        assert_eq!(result.query_id, 1);
        assert!(reader.next_frame().unwrap().is_none());
    }

    #[test]
    fn md5_mismatch_is_detected() {
        let mut frame = TransmitData::new("worker1");
        frame.build_data_msg(&sample_result()).unwrap();
        frame.attach_next_header(None, true).unwrap();
        let mut bytes = frame.into_wire_frame().unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        let mut reader = FrameReader::new(&bytes);
        assert!(reader.next_frame().is_err());
    }

    #[test]
    fn task_msg_encode_decode_round_trip() {
        let msg = TaskMsg {
            queryid: 7,
            jobid: 3,
            chunkid: 1234,
            attemptcount: 0,
            db: "lsst".into(),
            user: "qsmaster".into(),
            session: 1,
            fragment: vec![FragmentMsg {
                query: vec!["SELECT * FROM Object".into()],
                subchunks: SubChunkSet { id: vec![0, 1] },
                resulttable: "result_7_3".into(),
            }],
            scantable: vec![ScanTableMsg { db: "lsst".into(), table: "Object".into(), lockinmem: true, scanrating: 1 }],
            scanpriority: 1,
            scaninteractive: false,
        };
        let encoded = msg.encode().unwrap();
        let decoded = TaskMsg::decode(&encoded).unwrap();
        assert_eq!(decoded.chunkid, 1234);
        assert_eq!(decoded.fragment.len(), 1);
    }
}
