//! The `.pagei` companion file: one small fixed-size entry per chunk packed into a page,
//! so a lookup by id/time range never has to scan the (much larger) page body.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

use crate::error::{Error, Result};

pub const MAGIC: [u8; 4] = *b"TSPI";
pub const VERSION: u32 = 1;
const HEADER_SIZE: usize = 12;
pub const ENTRY_SIZE: usize = 40;

#[derive(Clone, Copy, Debug)]
pub struct IndexEntry {
    pub id: u64,
    pub min_time: u64,
    pub max_time: u64,
    /// Byte offset of this chunk's header within the page file.
    pub offset: u64,
    /// `HEADER_SIZE + bytes_used`: total bytes to read starting at `offset`.
    pub length: u64,
}

impl IndexEntry {
    fn write_to(&self, buf: &mut [u8]) {
        buf[0..8].copy_from_slice(&self.id.to_le_bytes());
        buf[8..16].copy_from_slice(&self.min_time.to_le_bytes());
        buf[16..24].copy_from_slice(&self.max_time.to_le_bytes());
        buf[24..32].copy_from_slice(&self.offset.to_le_bytes());
        buf[32..40].copy_from_slice(&self.length.to_le_bytes());
    }

    fn read_from(buf: &[u8]) -> Self {
        Self {
            id: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            min_time: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
            max_time: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
            offset: u64::from_le_bytes(buf[24..32].try_into().unwrap()),
            length: u64::from_le_bytes(buf[32..40].try_into().unwrap()),
        }
    }

    pub fn overlaps(&self, from: u64, to: u64) -> bool {
        self.min_time <= to && self.max_time >= from
    }
}

pub fn write_index(path: &Path, entries: &[IndexEntry]) -> Result<()> {
    let tmp = path.with_extension("pagei.tmp");
    {
        let mut file = File::create(&tmp)?;
        let mut header = [0u8; HEADER_SIZE];
        header[0..4].copy_from_slice(&MAGIC);
        header[4..8].copy_from_slice(&VERSION.to_le_bytes());
        header[8..12].copy_from_slice(&(entries.len() as u32).to_le_bytes());
        file.write_all(&header)?;
        let mut row = [0u8; ENTRY_SIZE];
        for entry in entries {
            entry.write_to(&mut row);
            file.write_all(&row)?;
        }
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

pub fn read_index(path: &Path) -> Result<Vec<IndexEntry>> {
    let mut file = OpenOptions::new().read(true).open(path)?;
    let mut header = [0u8; HEADER_SIZE];
    file.read_exact(&mut header)?;
    if header[0..4] != MAGIC {
        return Err(Error::CorruptChunk("page index: bad magic".into()));
    }
    let version = u32::from_le_bytes(header[4..8].try_into().unwrap());
    if version != VERSION {
        return Err(Error::VersionMismatch { found: version, expected: VERSION });
    }
    let count = u32::from_le_bytes(header[8..12].try_into().unwrap());
    let mut entries = Vec::with_capacity(count as usize);
    let mut row = [0u8; ENTRY_SIZE];
    for _ in 0..count {
        file.read_exact(&mut row)?;
        entries.push(IndexEntry::read_from(&row));
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_round_trips_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0000000001.pagei");
        let entries = vec![
            IndexEntry { id: 1, min_time: 0, max_time: 99, offset: 32, length: 200 },
            IndexEntry { id: 2, min_time: 10, max_time: 50, offset: 232, length: 150 },
        ];
        write_index(&path, &entries).unwrap();
        let loaded = read_index(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].id, 2);
        assert_eq!(loaded[1].max_time, 50);
        assert!(loaded[0].overlaps(50, 150));
        assert!(!loaded[1].overlaps(100, 150));
    }
}
