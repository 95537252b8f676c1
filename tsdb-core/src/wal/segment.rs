//! One append-only WAL file: a small fixed header followed by a run of 32-byte
//! [`Measurement`] records, preallocated to its final size up front.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::measurement::{Measurement, Written};

pub const MAGIC: [u8; 4] = *b"TSWL";
pub const VERSION: u32 = 1;
pub const HEADER_SIZE: usize = 32;

#[derive(Clone, Copy, Debug)]
struct WalHeader {
    capacity: u32,
    count: u32,
    closed: bool,
}

impl WalHeader {
    fn write_to(&self, buf: &mut [u8; HEADER_SIZE]) {
        buf.fill(0);
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4..8].copy_from_slice(&VERSION.to_le_bytes());
        buf[8..12].copy_from_slice(&self.capacity.to_le_bytes());
        buf[12..16].copy_from_slice(&self.count.to_le_bytes());
        buf[16] = self.closed as u8;
    }

    fn read_from(buf: &[u8; HEADER_SIZE]) -> Result<Self> {
        if buf[0..4] != MAGIC {
            return Err(Error::CorruptChunk("wal segment: bad magic".into()));
        }
        let version = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        if version != VERSION {
            return Err(Error::VersionMismatch { found: version, expected: VERSION });
        }
        let capacity = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        let count = u32::from_le_bytes(buf[12..16].try_into().unwrap());
        let closed = buf[16] != 0;
        Ok(Self { capacity, count, closed })
    }
}

/// A single segment file on disk, `seq` ordering it relative to its siblings.
pub struct WalSegment {
    path: PathBuf,
    seq: u64,
    file: File,
    header: WalHeader,
}

impl WalSegment {
    fn record_offset(index: u32) -> u64 {
        (HEADER_SIZE + index as usize * Measurement::SERIALIZED_SIZE) as u64
    }

    pub fn file_name(seq: u64) -> String {
        format!("{seq:010}.wal")
    }

    /// Parses the sequence number back out of a name produced by [`Self::file_name`].
    pub fn seq_from_name(name: &str) -> Option<u64> {
        name.strip_suffix(".wal")?.parse().ok()
    }

    pub fn create(dir: &Path, seq: u64, capacity: u32) -> Result<Self> {
        let path = dir.join(Self::file_name(seq));
        let mut file = OpenOptions::new().create_new(true).read(true).write(true).open(&path)?;
        let header = WalHeader { capacity, count: 0, closed: false };
        let mut buf = [0u8; HEADER_SIZE];
        header.write_to(&mut buf);
        file.write_all(&buf)?;
        let body_len = capacity as u64 * Measurement::SERIALIZED_SIZE as u64;
        file.set_len(HEADER_SIZE as u64 + body_len)?;
        file.flush()?;
        Ok(Self { path, seq, file, header })
    }

    pub fn open_existing(path: &Path, seq: u64) -> Result<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let mut buf = [0u8; HEADER_SIZE];
        file.read_exact(&mut buf)?;
        let header = WalHeader::read_from(&buf)?;
        Ok(Self { path: path.to_path_buf(), seq, file, header })
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name_str(&self) -> String {
        Self::file_name(self.seq)
    }

    pub fn is_closed(&self) -> bool {
        self.header.closed
    }

    pub fn is_full(&self) -> bool {
        self.header.count >= self.header.capacity
    }

    pub fn count(&self) -> u32 {
        self.header.count
    }

    fn persist_header(&mut self) -> Result<()> {
        let mut buf = [0u8; HEADER_SIZE];
        self.header.write_to(&mut buf);
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&buf)?;
        Ok(())
    }

    /// Appends one record. Returns `Written::Full` without writing anything once the
    /// segment has reached capacity or has already been closed; the caller rotates.
    pub fn append(&mut self, m: Measurement) -> Result<Written> {
        if self.header.closed || self.is_full() {
            return Ok(Written::Full);
        }
        let offset = Self::record_offset(self.header.count);
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&m.to_le_bytes())?;
        self.header.count += 1;
        self.persist_header()?;
        if self.is_full() {
            self.header.closed = true;
            self.persist_header()?;
        }
        Ok(Written::Written)
    }

    pub fn close(&mut self) -> Result<()> {
        if self.header.closed {
            return Ok(());
        }
        self.header.closed = true;
        self.persist_header()
    }

    /// Every record written to this segment so far, in append order.
    pub fn read_all(&mut self) -> Result<Vec<Measurement>> {
        let mut out = Vec::with_capacity(self.header.count as usize);
        self.file.seek(SeekFrom::Start(HEADER_SIZE as u64))?;
        let mut raw = [0u8; Measurement::SERIALIZED_SIZE];
        for _ in 0..self.header.count {
            self.file.read_exact(&mut raw)?;
            out.push(Measurement::from_le_bytes(&raw));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_persists_records_and_marks_full_at_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let mut seg = WalSegment::create(dir.path(), 1, 4).unwrap();
        for i in 0..4u64 {
            let w = seg.append(Measurement::new(1, i, i as f64, 0)).unwrap();
            assert_eq!(w, Written::Written);
        }
        assert!(seg.is_full());
        assert!(seg.is_closed());
        assert_eq!(seg.append(Measurement::new(1, 99, 0.0, 0)).unwrap(), Written::Full);

        let records = seg.read_all().unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(records[3].time, 3);
    }

    #[test]
    fn reopening_an_existing_segment_recovers_its_state() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut seg = WalSegment::create(dir.path(), 7, 10).unwrap();
            for i in 0..3u64 {
                seg.append(Measurement::new(2, i, i as f64, 0)).unwrap();
            }
        }
        let path = dir.path().join(WalSegment::file_name(7));
        let mut reopened = WalSegment::open_existing(&path, 7).unwrap();
        assert_eq!(reopened.count(), 3);
        assert!(!reopened.is_closed());
        let records = reopened.read_all().unwrap();
        assert_eq!(records.len(), 3);
    }

    #[test]
    fn seq_round_trips_through_file_name() {
        let name = WalSegment::file_name(42);
        assert_eq!(WalSegment::seq_from_name(&name), Some(42));
    }
}
