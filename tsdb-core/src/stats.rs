use serde::{Deserialize, Serialize};

/// Snapshot returned by `Engine::description()`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Description {
    pub ids: u64,
    pub wal_segments_open: u64,
    pub wal_segments_closed: u64,
    pub pages: u64,
    pub memstorage_chunks_allocated: u64,
    pub memstorage_chunks_capacity: Option<u64>,
}

/// Parameters of a range query, threaded through the tiers an `Engine::read_interval`
/// call touches so each one logs (and can short-circuit on) the same request.
#[derive(Clone, Copy, Debug)]
pub struct QueryInterval {
    pub id: u64,
    pub from: u64,
    pub to: u64,
    pub flag: u32,
}

/// Outcome of `Engine::fsck()`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FsckReport {
    pub pages: u64,
    pub chunks_ok: u64,
    pub chunks_bad: u64,
}
