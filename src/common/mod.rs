//! Shared identifiers and value types used on both sides of the wire.

use serde::{Deserialize, Serialize};

pub type QueryId = u64;
pub type JobId = u32;
pub type ChunkId = u32;
pub type SubChunkId = u32;
pub type CzarId = u32;
pub type AttemptCount = u8;

/// Bound on job retries before a job is declared permanently failed.
pub const MAX_JOB_ATTEMPTS: AttemptCount = 5;

/// A single cell in a result row, mirroring the wire-level `Result.row[]` shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }
}

/// A decoded result row: the in-memory counterpart of the CSV-codec's
/// decoded fields and of the wire `Result.row[]` message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row(pub Vec<CellValue>);

impl Row {
    pub fn new(cells: Vec<CellValue>) -> Self {
        Self(cells)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One table a task scans, with its static scan-rating/lock requirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanTableInfo {
    pub db: String,
    pub table: String,
    pub lock_in_mem: bool,
    pub scan_rating: i32,
}

/// Map chunkId -> aggregate stats, merged associatively by summing fields.
#[derive(Debug, Clone, Default)]
pub struct ChunkIndex {
    entries: std::collections::HashMap<ChunkId, ChunkIndexEntry>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ChunkIndexEntry {
    pub num_rows: u64,
    pub num_sub_chunks: u32,
}

impl ChunkIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, chunk_id: ChunkId, entry: ChunkIndexEntry) {
        let slot = self.entries.entry(chunk_id).or_default();
        slot.num_rows += entry.num_rows;
        slot.num_sub_chunks = slot.num_sub_chunks.max(entry.num_sub_chunks);
    }

    pub fn get(&self, chunk_id: ChunkId) -> Option<ChunkIndexEntry> {
        self.entries.get(&chunk_id).copied()
    }

    pub fn total_rows(&self) -> u64 {
        self.entries.values().map(|e| e.num_rows).sum()
    }
}
