//! Immutable page files: the final resting place for chunks evicted from MemStorage or
//! converted out of a filled WAL segment. Each `<seq>.page` file is a packed run of
//! `(ChunkHeader, body)` pairs; its `<seq>.pagei` sibling indexes them by id/time so a
//! lookup never has to scan a page end to end.

pub mod index;

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::warn;

use crate::chunk::{self, Chunk, ChunkHeader, ChunkReader, HEADER_SIZE as CHUNK_HEADER_SIZE};
use crate::error::Result;
use crate::measurement::{Measurement, Written};
use crate::memstorage::PageSink;
use crate::stats::FsckReport;

use index::{ENTRY_SIZE, IndexEntry};

const MAGIC: [u8; 4] = *b"TSPG";
const VERSION: u32 = 1;
const HEADER_SIZE: usize = 32;

fn page_file_name(seq: u64) -> String {
    format!("{seq:010}.page")
}

fn index_file_name(seq: u64) -> String {
    format!("{seq:010}.pagei")
}

fn seq_from_page_name(name: &str) -> Option<u64> {
    name.strip_suffix(".page")?.parse().ok()
}

struct PageMeta {
    seq: u64,
    path: PathBuf,
    index_path: PathBuf,
    min_time: u64,
    max_time: u64,
    entries: Vec<IndexEntry>,
}

fn write_page_header(buf: &mut [u8; HEADER_SIZE], count: u32, min_time: u64, max_time: u64) {
    buf.fill(0);
    buf[0..4].copy_from_slice(&MAGIC);
    buf[4..8].copy_from_slice(&VERSION.to_le_bytes());
    buf[8..12].copy_from_slice(&count.to_le_bytes());
    buf[12..20].copy_from_slice(&min_time.to_le_bytes());
    buf[20..28].copy_from_slice(&max_time.to_le_bytes());
}

fn read_page_header(buf: &[u8; HEADER_SIZE]) -> Result<(u32, u64, u64)> {
    if buf[0..4] != MAGIC {
        return Err(crate::error::Error::CorruptChunk("page: bad magic".into()));
    }
    let version = u32::from_le_bytes(buf[4..8].try_into().unwrap());
    if version != VERSION {
        return Err(crate::error::Error::VersionMismatch { found: version, expected: VERSION });
    }
    let count = u32::from_le_bytes(buf[8..12].try_into().unwrap());
    let min_time = u64::from_le_bytes(buf[12..20].try_into().unwrap());
    let max_time = u64::from_le_bytes(buf[20..28].try_into().unwrap());
    Ok((count, min_time, max_time))
}

/// Packs `parts` (already-closed chunk headers with their trimmed bodies) into a new
/// page file plus its index, atomically via write-then-rename.
fn write_page_parts(dir: &Path, seq: u64, parts: &[(u64, ChunkHeader, &[u8])]) -> Result<PageMeta> {
    let path = dir.join(page_file_name(seq));
    let index_path = dir.join(index_file_name(seq));
    let tmp = path.with_extension("page.tmp");

    let min_time = parts.iter().map(|(_, h, _)| h.min_time).min().unwrap_or(0);
    let max_time = parts.iter().map(|(_, h, _)| h.max_time).max().unwrap_or(0);

    let mut entries = Vec::with_capacity(parts.len());
    {
        let mut file = File::create(&tmp)?;
        let mut header_buf = [0u8; HEADER_SIZE];
        write_page_header(&mut header_buf, parts.len() as u32, min_time, max_time);
        file.write_all(&header_buf)?;

        let mut offset = HEADER_SIZE as u64;
        let mut chunk_header_buf = [0u8; CHUNK_HEADER_SIZE];
        for (id, header, body) in parts {
            header.write_to(&mut chunk_header_buf);
            file.write_all(&chunk_header_buf)?;
            file.write_all(body)?;
            let length = (CHUNK_HEADER_SIZE + body.len()) as u64;
            entries.push(IndexEntry { id: *id, min_time: header.min_time, max_time: header.max_time, offset, length });
            offset += length;
        }
        file.flush()?;
    }
    std::fs::rename(&tmp, &path)?;
    index::write_index(&index_path, &entries)?;

    Ok(PageMeta { seq, path, index_path, min_time, max_time, entries })
}

fn load_page_meta(path: &Path, seq: u64) -> Result<PageMeta> {
    let index_path = path.with_file_name(index_file_name(seq));
    let entries = index::read_index(&index_path)?;
    let mut file = OpenOptions::new().read(true).open(path)?;
    let mut header_buf = [0u8; HEADER_SIZE];
    file.read_exact(&mut header_buf)?;
    let (_, min_time, max_time) = read_page_header(&header_buf)?;
    Ok(PageMeta { seq, path: path.to_path_buf(), index_path, min_time, max_time, entries })
}

fn read_chunk_raw(path: &Path, entry: &IndexEntry) -> Result<(ChunkHeader, Vec<u8>)> {
    let mut file = OpenOptions::new().read(true).open(path)?;
    file.seek(SeekFrom::Start(entry.offset))?;
    let mut buf = vec![0u8; entry.length as usize];
    file.read_exact(&mut buf)?;
    let header_bytes: [u8; CHUNK_HEADER_SIZE] = buf[..CHUNK_HEADER_SIZE].try_into().unwrap();
    let header = ChunkHeader::read_from(&header_bytes);
    let body = buf[CHUNK_HEADER_SIZE..].to_vec();
    Ok((header, body))
}

fn decode_chunk(path: &Path, entry: &IndexEntry) -> Result<Vec<Measurement>> {
    let (header, body) = read_chunk_raw(path, entry)?;
    Ok(ChunkReader::from_parts(&header, &body).collect())
}

/// Re-chunks a sorted run of one series' measurements the way a live `TimeTrack` would,
/// without needing an allocator (page rewrites own their `Chunk`s outright).
fn rebuild_chunks(chunk_size: u32, measurements: &[Measurement]) -> Vec<Chunk> {
    let body_capacity = (chunk_size as usize).saturating_sub(CHUNK_HEADER_SIZE).max(64);
    let mut out = Vec::new();
    let mut iter = measurements.iter();
    let Some(first) = iter.next() else { return out };
    let mut current = Chunk::new(body_capacity, *first);
    for m in iter {
        match current.append(*m) {
            Written::Written => {}
            Written::Full => {
                current.close();
                out.push(current);
                current = Chunk::new(body_capacity, *m);
            }
        }
    }
    current.close();
    out.push(current);
    out
}

/// Distributes `items` round-robin across `n` (clamped to at least one) output groups.
fn split_into<T>(items: Vec<T>, n: usize) -> Vec<Vec<T>> {
    let n = n.max(1);
    let mut out: Vec<Vec<T>> = (0..n).map(|_| Vec::new()).collect();
    for (i, item) in items.into_iter().enumerate() {
        out[i % n].push(item);
    }
    out
}

pub struct PageManager {
    dir: PathBuf,
    pages: RwLock<Vec<PageMeta>>,
    next_seq: AtomicU64,
}

impl PageManager {
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let mut pages = Vec::new();
        let mut next_seq = 0u64;
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(seq) = seq_from_page_name(name) else { continue };
            next_seq = next_seq.max(seq + 1);
            pages.push(load_page_meta(&entry.path(), seq)?);
        }
        pages.sort_by_key(|p| p.seq);
        Ok(Self { dir: dir.to_path_buf(), pages: RwLock::new(pages), next_seq: AtomicU64::new(next_seq) })
    }

    fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::SeqCst)
    }

    pub fn page_count(&self) -> u64 {
        self.pages.read().len() as u64
    }

    pub fn page_file_names(&self) -> Vec<String> {
        self.pages.read().iter().map(|p| page_file_name(p.seq)).collect()
    }

    pub fn ids(&self) -> Vec<u64> {
        let pages = self.pages.read();
        let set: HashSet<u64> = pages.iter().flat_map(|p| p.entries.iter().map(|e| e.id)).collect();
        set.into_iter().collect()
    }

    /// Builds new chunks from already-sorted per-id measurement batches (what the
    /// dropper hands over after draining a closed WAL segment) and packs them into
    /// one new page.
    pub fn append_measurement_batches(&self, chunk_size: u32, batches: &[(u64, Vec<Measurement>)]) -> Result<()> {
        let mut owned: Vec<(u64, Chunk)> = Vec::new();
        for (id, measurements) in batches {
            if measurements.is_empty() {
                continue;
            }
            for chunk in rebuild_chunks(chunk_size, measurements) {
                owned.push((*id, chunk));
            }
        }
        if owned.is_empty() {
            return Ok(());
        }
        let parts: Vec<(u64, ChunkHeader, &[u8])> =
            owned.iter().map(|(id, c)| (*id, *c.header(), c.closed_bytes())).collect();
        let seq = self.next_seq();
        let meta = write_page_parts(&self.dir, seq, &parts)?;
        self.pages.write().push(meta);
        Ok(())
    }

    pub fn foreach(&self, id: u64, from: u64, to: u64, flag: u32) -> Result<Vec<Measurement>> {
        let pages = self.pages.read();
        let mut out = Vec::new();
        for page in pages.iter() {
            if page.max_time < from || page.min_time > to {
                continue;
            }
            for entry in &page.entries {
                if entry.id == id && entry.overlaps(from, to) {
                    let decoded = decode_chunk(&page.path, entry)?;
                    out.extend(decoded.into_iter().filter(|m| m.time >= from && m.time <= to && m.matches_flag(flag)));
                }
            }
        }
        out.sort_by_key(|m| m.time);
        Ok(out)
    }

    pub fn time_point(&self, id: u64, tp: u64) -> Result<Option<Measurement>> {
        let pages = self.pages.read();
        let mut best: Option<Measurement> = None;
        for page in pages.iter() {
            if page.min_time > tp {
                continue;
            }
            for entry in &page.entries {
                if entry.id != id || entry.min_time > tp {
                    continue;
                }
                for m in decode_chunk(&page.path, entry)? {
                    if m.time <= tp && best.is_none_or(|b| m.time > b.time) {
                        best = Some(m);
                    }
                }
            }
        }
        Ok(best)
    }

    pub fn load_min_max(&self, id: u64) -> Option<(u64, u64)> {
        let pages = self.pages.read();
        let mut acc: Option<(u64, u64)> = None;
        for page in pages.iter() {
            for entry in &page.entries {
                if entry.id != id {
                    continue;
                }
                acc = Some(match acc {
                    None => (entry.min_time, entry.max_time),
                    Some((mn, mx)) => (mn.min(entry.min_time), mx.max(entry.max_time)),
                });
            }
        }
        acc
    }

    fn delete_page(&self, path: &Path, index_path: &Path) -> Result<()> {
        let _ = std::fs::remove_file(path);
        let _ = std::fs::remove_file(index_path);
        Ok(())
    }

    /// Drops whole chunks whose `max_time < t`; a page left with nothing is deleted,
    /// one with a mix of survivors and casualties is rewritten under a fresh sequence
    /// number (pages are otherwise immutable once written).
    pub fn erase_old(&self, t: u64) -> Result<()> {
        let mut pages = self.pages.write();
        let mut rebuilt = Vec::new();
        for page in pages.drain(..) {
            if page.max_time < t {
                self.delete_page(&page.path, &page.index_path)?;
                continue;
            }
            if page.entries.iter().all(|e| e.max_time >= t) {
                rebuilt.push(page);
                continue;
            }
            let mut parts_owned: Vec<(u64, ChunkHeader, Vec<u8>)> = Vec::new();
            for entry in &page.entries {
                if entry.max_time < t {
                    continue;
                }
                let (header, body) = read_chunk_raw(&page.path, entry)?;
                parts_owned.push((entry.id, header, body));
            }
            self.delete_page(&page.path, &page.index_path)?;
            if parts_owned.is_empty() {
                continue;
            }
            let parts: Vec<(u64, ChunkHeader, &[u8])> =
                parts_owned.iter().map(|(id, h, b)| (*id, *h, b.as_slice())).collect();
            let seq = self.next_seq();
            rebuilt.push(write_page_parts(&self.dir, seq, &parts)?);
        }
        rebuilt.sort_by_key(|p| p.seq);
        *pages = rebuilt;
        Ok(())
    }

    /// Verifies every chunk's CRC; pages with a bad chunk are rewritten keeping only
    /// the chunks that still check out, and the drop is logged.
    pub fn fsck(&self) -> Result<FsckReport> {
        let mut report = FsckReport::default();
        let mut pages = self.pages.write();
        let mut rebuilt = Vec::new();
        for page in pages.drain(..) {
            report.pages += 1;
            let mut good: Vec<(u64, ChunkHeader, Vec<u8>)> = Vec::new();
            let mut bad = 0u64;
            for entry in &page.entries {
                let (header, body) = read_chunk_raw(&page.path, entry)?;
                if chunk::verify_crc_parts(&header, &body) {
                    good.push((entry.id, header, body));
                } else {
                    bad += 1;
                }
            }
            report.chunks_ok += good.len() as u64;
            report.chunks_bad += bad;
            if bad == 0 {
                rebuilt.push(page);
                continue;
            }
            warn!(page = page.seq, bad, "fsck dropped corrupt chunks");
            self.delete_page(&page.path, &page.index_path)?;
            if good.is_empty() {
                continue;
            }
            let parts: Vec<(u64, ChunkHeader, &[u8])> = good.iter().map(|(id, h, b)| (*id, *h, b.as_slice())).collect();
            let seq = self.next_seq();
            rebuilt.push(write_page_parts(&self.dir, seq, &parts)?);
        }
        rebuilt.sort_by_key(|p| p.seq);
        *pages = rebuilt;
        Ok(report)
    }

    fn all_measurements_from(&self, pages: &[PageMeta]) -> Result<Vec<(u64, Measurement)>> {
        let mut out = Vec::new();
        for page in pages {
            for entry in &page.entries {
                for m in decode_chunk(&page.path, entry)? {
                    out.push((entry.id, m));
                }
            }
        }
        Ok(out)
    }

    fn write_compacted(&self, chunk_size: u32, rows: Vec<(u64, Measurement)>, target: usize) -> Result<Vec<PageMeta>> {
        use std::collections::BTreeMap;
        let mut by_id: BTreeMap<u64, Vec<Measurement>> = BTreeMap::new();
        for (id, m) in rows {
            by_id.entry(id).or_default().push(m);
        }
        let mut owned: Vec<(u64, Chunk)> = Vec::new();
        for (id, mut measurements) in by_id {
            measurements.sort_by_key(|m| m.time);
            for chunk in rebuild_chunks(chunk_size, &measurements) {
                owned.push((id, chunk));
            }
        }
        if owned.is_empty() {
            return Ok(Vec::new());
        }
        let groups = split_into(owned, target.max(1));
        let mut metas = Vec::new();
        for group in groups {
            if group.is_empty() {
                continue;
            }
            let parts: Vec<(u64, ChunkHeader, &[u8])> =
                group.iter().map(|(id, c)| (*id, *c.header(), c.closed_bytes())).collect();
            let seq = self.next_seq();
            metas.push(write_page_parts(&self.dir, seq, &parts)?);
        }
        Ok(metas)
    }

    /// Merges every page into `target` output pages (`0` is treated as `1`: "compact
    /// everything down" always leaves at least one page behind).
    pub fn compact_to(&self, chunk_size: u32, target: u32) -> Result<()> {
        let mut pages = self.pages.write();
        if pages.len() <= 1 && target as usize >= pages.len().max(1) {
            return Ok(());
        }
        let rows = self.all_measurements_from(&pages)?;
        for page in pages.iter() {
            self.delete_page(&page.path, &page.index_path)?;
        }
        let target = if target == 0 { 1 } else { target as usize };
        let mut rebuilt = self.write_compacted(chunk_size, rows, target)?;
        rebuilt.sort_by_key(|p| p.seq);
        *pages = rebuilt;
        Ok(())
    }

    /// Merges every page overlapping `[from, to]` into a single page; pages entirely
    /// outside that range are left untouched.
    pub fn compact_by_time(&self, chunk_size: u32, from: u64, to: u64) -> Result<()> {
        let mut pages = self.pages.write();
        let (overlapping, rest): (Vec<PageMeta>, Vec<PageMeta>) =
            pages.drain(..).partition(|p| p.min_time <= to && p.max_time >= from);
        if overlapping.len() <= 1 {
            *pages = overlapping.into_iter().chain(rest).collect();
            pages.sort_by_key(|p| p.seq);
            return Ok(());
        }
        let rows = self.all_measurements_from(&overlapping)?;
        for page in &overlapping {
            self.delete_page(&page.path, &page.index_path)?;
        }
        let mut rebuilt = self.write_compacted(chunk_size, rows, 1)?;
        rebuilt.extend(rest);
        rebuilt.sort_by_key(|p| p.seq);
        *pages = rebuilt;
        Ok(())
    }
}

impl PageSink for PageManager {
    fn append_chunks(&self, batch: &[(u64, &Chunk)]) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let parts: Vec<(u64, ChunkHeader, &[u8])> = batch.iter().map(|(id, c)| (*id, *c.header(), c.closed_bytes())).collect();
        let seq = self.next_seq();
        let meta = write_page_parts(&self.dir, seq, &parts)?;
        self.pages.write().push(meta);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::allocator::{ChunkAllocator, UnlimitedAllocator};
    use std::sync::Arc;

    fn sample_chunk(id: u64, start: u64, count: u64) -> Chunk {
        let alloc = UnlimitedAllocator::new(4096);
        let mut chunk = alloc.allocate(Measurement::new(id, start, start as f64, 0)).unwrap();
        for i in 1..count {
            chunk.append(Measurement::new(id, start + i, (start + i) as f64, 0));
        }
        chunk.close();
        *chunk
    }

    #[test]
    fn append_chunks_then_reads_back_an_interval() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = PageManager::open(dir.path()).unwrap();
        let chunk = sample_chunk(1, 0, 50);
        mgr.append_chunks(&[(1, &chunk)]).unwrap();
        assert_eq!(mgr.page_count(), 1);

        let window = mgr.foreach(1, 10, 20, 0).unwrap();
        let times: Vec<u64> = window.iter().map(|m| m.time).collect();
        assert_eq!(times, (10..=20).collect::<Vec<_>>());
    }

    #[test]
    fn time_point_returns_latest_at_or_before() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = PageManager::open(dir.path()).unwrap();
        let chunk = sample_chunk(1, 0, 50);
        mgr.append_chunks(&[(1, &chunk)]).unwrap();
        let found = mgr.time_point(1, 25).unwrap().unwrap();
        assert_eq!(found.time, 25);
    }

    #[test]
    fn reopening_a_directory_recovers_pages() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mgr = PageManager::open(dir.path()).unwrap();
            let chunk = sample_chunk(1, 0, 20);
            mgr.append_chunks(&[(1, &chunk)]).unwrap();
        }
        let reopened = PageManager::open(dir.path()).unwrap();
        assert_eq!(reopened.page_count(), 1);
        assert_eq!(reopened.foreach(1, 0, 19, 0).unwrap().len(), 20);
    }

    #[test]
    fn erase_old_drops_fully_expired_pages_and_trims_partial_ones() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = PageManager::open(dir.path()).unwrap();
        let old_chunk = sample_chunk(1, 0, 20);
        let mixed_chunk = sample_chunk(1, 100, 20);
        mgr.append_chunks(&[(1, &old_chunk), (1, &mixed_chunk)]).unwrap();

        mgr.erase_old(50).unwrap();
        let remaining = mgr.foreach(1, 0, 200, 0).unwrap();
        assert!(remaining.iter().all(|m| m.time >= 100));
    }

    #[test]
    fn fsck_reports_clean_pages_as_ok() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = PageManager::open(dir.path()).unwrap();
        let chunk = sample_chunk(1, 0, 10);
        mgr.append_chunks(&[(1, &chunk)]).unwrap();
        let report = mgr.fsck().unwrap();
        assert_eq!(report.pages, 1);
        assert_eq!(report.chunks_bad, 0);
        assert_eq!(report.chunks_ok, 1);
    }

    #[test]
    fn compact_to_merges_multiple_pages_into_one() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = PageManager::open(dir.path()).unwrap();
        for start in [0u64, 100, 200] {
            let chunk = sample_chunk(1, start, 20);
            mgr.append_chunks(&[(1, &chunk)]).unwrap();
        }
        assert_eq!(mgr.page_count(), 3);
        mgr.compact_to(4096, 1).unwrap();
        assert_eq!(mgr.page_count(), 1);
        assert_eq!(mgr.foreach(1, 0, 300, 0).unwrap().len(), 60);
    }
}
