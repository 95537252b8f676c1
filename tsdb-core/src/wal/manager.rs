//! Owns every WAL segment for one storage directory: routes appends to the open
//! segment, rotates on full, and hands closed segments to whatever drains them.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::Result;
use crate::measurement::{Measurement, Written};
use crate::memstorage::WalSink;

use super::segment::WalSegment;

pub struct WalManager {
    dir: PathBuf,
    record_capacity: u32,
    next_seq: AtomicU64,
    open: Mutex<Option<WalSegment>>,
    closed: Mutex<VecDeque<WalSegment>>,
}

impl WalManager {
    /// Scans `dir` for existing segments, classifying each open/closed from its own
    /// header (not from any external bookkeeping) so a crash mid-write recovers cleanly.
    pub fn open(dir: &Path, record_capacity: u32) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let mut found: Vec<(u64, WalSegment)> = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(seq) = WalSegment::seq_from_name(name) else { continue };
            let segment = WalSegment::open_existing(&entry.path(), seq)?;
            found.push((seq, segment));
        }
        found.sort_by_key(|(seq, _)| *seq);

        let mut closed = VecDeque::new();
        let mut open = None;
        let mut next_seq = 0u64;
        for (seq, segment) in found {
            next_seq = next_seq.max(seq + 1);
            if segment.is_closed() || segment.is_full() {
                closed.push_back(segment);
            } else if open.is_none() {
                open = Some(segment);
            } else {
                // Two segments look open after a crash: keep the newer one live, close the rest.
                closed.push_back(segment);
            }
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            record_capacity,
            next_seq: AtomicU64::new(next_seq),
            open: Mutex::new(open),
            closed: Mutex::new(closed),
        })
    }

    fn new_segment(&self) -> Result<WalSegment> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        WalSegment::create(&self.dir, seq, self.record_capacity)
    }

    pub fn append(&self, m: Measurement) -> Result<Written> {
        let mut open = self.open.lock();
        loop {
            if open.is_none() {
                *open = Some(self.new_segment()?);
            }
            let segment = open.as_mut().unwrap();
            match segment.append(m)? {
                Written::Written => return Ok(Written::Written),
                Written::Full => {
                    let mut full = open.take().unwrap();
                    full.close()?;
                    debug!(seq = full.seq(), "wal segment filled, rotating");
                    self.closed.lock().push_back(full);
                }
            }
        }
    }

    /// Detaches every closed segment for the dropper to convert into a page; the
    /// manager no longer owns them once this returns.
    pub fn take_closed(&self) -> Vec<WalSegment> {
        self.closed.lock().drain(..).collect()
    }

    pub fn open_segment_count(&self) -> u64 {
        self.open.lock().is_some() as u64
    }

    pub fn closed_segment_count(&self) -> u64 {
        self.closed.lock().len() as u64
    }

    pub fn segment_file_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.closed.lock().iter().map(|s| s.file_name_str()).collect();
        if let Some(open) = self.open.lock().as_ref() {
            names.push(open.file_name_str());
        }
        names
    }

    /// Closes the current open segment so the dropper picks it up too (used on
    /// `Engine::flush`/shutdown rather than waiting for it to fill naturally).
    pub fn flush(&self) -> Result<()> {
        let mut open = self.open.lock();
        if let Some(mut segment) = open.take() {
            if segment.count() > 0 {
                segment.close()?;
                self.closed.lock().push_back(segment);
            } else {
                *open = Some(segment);
            }
        }
        Ok(())
    }

    /// Every record currently on disk, closed and open segments alike, without
    /// disturbing segment ownership — the read side of crash-recovery replay.
    pub fn all_records(&self) -> Result<Vec<Measurement>> {
        let mut out = Vec::new();
        for segment in self.closed.lock().iter_mut() {
            out.extend(segment.read_all()?);
        }
        if let Some(segment) = self.open.lock().as_mut() {
            out.extend(segment.read_all()?);
        }
        Ok(out)
    }

    /// Drops closed segments whose every record predates `t`, and trims (rewrites)
    /// ones that are a mix of expired and live records. The open segment is left
    /// alone; it is still being written to.
    pub fn erase_old(&self, t: u64) -> Result<()> {
        let mut closed = self.closed.lock();
        let mut kept = VecDeque::new();
        for mut segment in closed.drain(..) {
            let records = segment.read_all()?;
            let surviving: Vec<Measurement> = records.into_iter().filter(|m| m.time >= t).collect();
            let path = segment.path().to_path_buf();
            if surviving.is_empty() {
                drop(segment);
                std::fs::remove_file(&path)?;
                continue;
            }
            if surviving.len() == segment.count() as usize {
                kept.push_back(segment);
                continue;
            }
            drop(segment);
            std::fs::remove_file(&path)?;
            let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
            let mut fresh = WalSegment::create(&self.dir, seq, self.record_capacity)?;
            for m in surviving {
                fresh.append(m)?;
            }
            fresh.close()?;
            kept.push_back(fresh);
        }
        *closed = kept;
        Ok(())
    }
}

impl WalSink for WalManager {
    fn append(&self, m: Measurement) -> Result<Written> {
        WalManager::append(self, m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_rotates_segments_once_full() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = WalManager::open(dir.path(), 4).unwrap();
        for i in 0..10u64 {
            mgr.append(Measurement::new(1, i, i as f64, 0)).unwrap();
        }
        assert_eq!(mgr.open_segment_count(), 1);
        assert_eq!(mgr.closed_segment_count(), 2);
    }

    #[test]
    fn take_closed_drains_and_manager_keeps_the_open_one() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = WalManager::open(dir.path(), 4).unwrap();
        for i in 0..9u64 {
            mgr.append(Measurement::new(1, i, i as f64, 0)).unwrap();
        }
        let closed = mgr.take_closed();
        assert_eq!(closed.len(), 2);
        assert_eq!(mgr.closed_segment_count(), 0);
        assert_eq!(mgr.open_segment_count(), 1);
    }

    #[test]
    fn reopening_a_directory_recovers_open_and_closed_segments() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mgr = WalManager::open(dir.path(), 4).unwrap();
            for i in 0..9u64 {
                mgr.append(Measurement::new(1, i, i as f64, 0)).unwrap();
            }
        }
        let reopened = WalManager::open(dir.path(), 4).unwrap();
        assert_eq!(reopened.closed_segment_count(), 2);
        assert_eq!(reopened.open_segment_count(), 1);
    }

    #[test]
    fn flush_closes_a_partially_filled_open_segment() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = WalManager::open(dir.path(), 4).unwrap();
        mgr.append(Measurement::new(1, 0, 0.0, 0)).unwrap();
        mgr.flush().unwrap();
        assert_eq!(mgr.closed_segment_count(), 1);
        assert_eq!(mgr.open_segment_count(), 0);
    }
}
