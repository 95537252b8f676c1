//! `TimeTrack`: the ordered list of chunks that make up one series' in-memory history.

use std::sync::Arc;

use crate::chunk::Chunk;
use crate::chunk::allocator::ChunkAllocator;
use crate::error::{Error, Result};
use crate::measurement::{Measurement, Written};

pub struct TimeTrack {
    id: u64,
    allocator: Arc<dyn ChunkAllocator>,
    closed: Vec<Box<Chunk>>,
    current: Option<Box<Chunk>>,
    min_time: Option<u64>,
    max_time: Option<u64>,
}

impl TimeTrack {
    pub fn new(id: u64, allocator: Arc<dyn ChunkAllocator>) -> Self {
        Self { id, allocator, closed: Vec::new(), current: None, min_time: None, max_time: None }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn chunk_count(&self) -> usize {
        self.closed.len() + self.current.is_some() as usize
    }

    pub fn min_max(&self) -> Option<(u64, u64)> {
        Some((self.min_time?, self.max_time?))
    }

    /// The open chunk's `min_time`, or `None` if this track has no open chunk right now.
    pub fn current_min_time(&self) -> Option<u64> {
        self.current.as_ref().map(|c| c.header().min_time)
    }

    /// Appends one measurement, opening or retiring chunks as needed. Errors with
    /// `NoSpace` when the allocator has no free slot for a new chunk.
    pub fn append(&mut self, m: Measurement) -> Result<Written> {
        loop {
            match self.current.as_mut() {
                None => {
                    let chunk = self.allocator.allocate(m)?;
                    self.current = Some(chunk);
                    self.touch(m);
                    return Ok(Written::Written);
                }
                Some(chunk) => match chunk.append(m) {
                    Written::Written => {
                        self.touch(m);
                        return Ok(Written::Written);
                    }
                    Written::Full => {
                        let mut full = self.current.take().unwrap();
                        full.close();
                        self.closed.push(full);
                        continue;
                    }
                },
            }
        }
    }

    fn touch(&mut self, m: Measurement) {
        self.min_time = Some(self.min_time.map_or(m.time, |t| t.min(m.time)));
        self.max_time = Some(self.max_time.map_or(m.time, |t| t.max(m.time)));
    }

    fn all_chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.closed.iter().map(|c| c.as_ref()).chain(self.current.iter().map(|c| c.as_ref()))
    }

    /// Ascending-time measurements across every chunk overlapping `[from, to]`, filtered
    /// by `flag` (`0` matches anything).
    pub fn interval(&self, from: u64, to: u64, flag: u32) -> Vec<Measurement> {
        let mut out: Vec<Measurement> = self
            .all_chunks()
            .filter(|c| c.header().min_time <= to && c.header().max_time >= from)
            .flat_map(|c| c.reader())
            .filter(|m| m.time >= from && m.time <= to && m.matches_flag(flag))
            .collect();
        out.sort_by_key(|m| m.time);
        out
    }

    /// Latest measurement with `time <= tp`, or an empty `NO_DATA` marker if none exists.
    pub fn read_time_point(&self, tp: u64) -> Measurement {
        self.all_chunks()
            .filter(|c| c.header().min_time <= tp)
            .flat_map(|c| c.reader())
            .filter(|m| m.time <= tp)
            .max_by_key(|m| m.time)
            .unwrap_or_else(|| Measurement::empty(self.id, tp))
    }

    /// Detaches up to `n` oldest closed chunks for the caller to persist before freeing.
    pub fn drop_n(&mut self, n: usize) -> Vec<Box<Chunk>> {
        let n = n.min(self.closed.len());
        self.closed.drain(0..n).collect()
    }

    /// Frees (via the allocator) every chunk, closed or current, whose `max_time < t`.
    pub fn drop_old(&mut self, t: u64) {
        let mut remaining = Vec::with_capacity(self.closed.len());
        for chunk in self.closed.drain(..) {
            if chunk.header().max_time < t {
                self.allocator.free(chunk);
            } else {
                remaining.push(chunk);
            }
        }
        self.closed = remaining;
        if let Some(current) = &self.current {
            if current.header().max_time < t {
                if let Some(current) = self.current.take() {
                    self.allocator.free(current);
                }
            }
        }
    }

    /// Closes and detaches the open chunk, if any (used by flush/stop).
    pub fn flush_current(&mut self) -> Option<Box<Chunk>> {
        let mut chunk = self.current.take()?;
        chunk.close();
        Some(chunk)
    }

    pub fn reject_if_out_of_order(&self, time: u64) -> Result<()> {
        if let Some(max) = self.max_time {
            if time < max {
                return Err(Error::OutOfOrderWrite(format!("id {} time {} < max {}", self.id, time, max)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::allocator::UnlimitedAllocator;

    fn track() -> TimeTrack {
        TimeTrack::new(1, Arc::new(UnlimitedAllocator::new(256)))
    }

    #[test]
    fn appends_span_multiple_chunks_as_each_fills() {
        let mut t = track();
        for i in 0..500u64 {
            t.append(Measurement::new(1, i, i as f64, 0)).unwrap();
        }
        assert!(t.chunk_count() > 1);
        assert_eq!(t.min_max(), Some((0, 499)));
    }

    #[test]
    fn interval_merges_across_chunks_in_time_order() {
        let mut t = track();
        for i in 0..500u64 {
            t.append(Measurement::new(1, i, i as f64, 0)).unwrap();
        }
        let window = t.interval(100, 110, 0);
        let times: Vec<u64> = window.iter().map(|m| m.time).collect();
        assert_eq!(times, (100..=110).collect::<Vec<_>>());
    }

    #[test]
    fn read_time_point_falls_back_to_no_data() {
        let t = track();
        let m = t.read_time_point(42);
        assert!(m.is_no_data());
        assert_eq!(m.time, 42);
    }

    #[test]
    fn drop_old_frees_fully_expired_closed_chunks() {
        let mut t = track();
        for i in 0..500u64 {
            t.append(Measurement::new(1, i, i as f64, 0)).unwrap();
        }
        let before = t.chunk_count();
        t.drop_old(200);
        assert!(t.chunk_count() < before);
    }
}
