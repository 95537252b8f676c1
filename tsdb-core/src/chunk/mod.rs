//! A chunk holds one compressed run of measurements for a single series inside a
//! fixed-size byte region handed out by a [`allocator::ChunkAllocator`].

pub mod allocator;
pub mod header;

use crc32fast::Hasher;

use crate::codec::{BitReader, BitWriter, CompressedReader, CompressedWriter};
use crate::measurement::{Measurement, Written};

pub use header::{ChunkHeader, HEADER_SIZE};

/// A chunk in progress or closed. `body` is exactly `chunk_size - HEADER_SIZE` bytes, owned
/// by whichever allocator slot this chunk was carved from.
pub struct Chunk {
    header: ChunkHeader,
    body: Vec<u8>,
    body_bit_len: usize,
    writer: CompressedWriter,
}

impl Chunk {
    pub fn new(body_capacity: usize, first: Measurement) -> Self {
        Self {
            header: ChunkHeader::open(first),
            body: vec![0u8; body_capacity],
            body_bit_len: 0,
            writer: CompressedWriter::seeded(&first),
        }
    }

    pub fn header(&self) -> &ChunkHeader {
        &self.header
    }

    pub fn is_full(&self) -> bool {
        self.header.is_full
    }

    pub fn is_closed(&self) -> bool {
        self.header.is_closed
    }

    /// Appends `m` to this chunk's series. `m.id` must match the chunk's id; that's a
    /// caller invariant (TimeTrack never crosses ids), not checked here.
    pub fn append(&mut self, m: Measurement) -> Written {
        if self.header.is_full || self.header.is_closed {
            return Written::Full;
        }
        if m.time < self.header.max_time {
            self.header.is_full = true;
            return Written::Full;
        }

        let mut bw = BitWriter::resume(&mut self.body, self.body_bit_len);
        if !self.writer.append(&mut bw, &m) {
            self.header.is_full = true;
            return Written::Full;
        }
        self.body_bit_len = bw.bit_len();
        self.header.count += 1;
        self.header.max_time = m.time;
        self.header.flag_bloom |= m.flag;
        Written::Written
    }

    /// Freezes the chunk: computes the CRC over the written portion of the body and
    /// flips `is_closed`. A full chunk is always closed; a chunk can also be closed
    /// early (TimeTrack retiring the current chunk on drop/flush).
    pub fn close(&mut self) {
        if self.header.is_closed {
            return;
        }
        self.header.bytes_used = self.body_bit_len.div_ceil(8) as u32;
        let used = self.header.bytes_used as usize;
        let mut hasher = Hasher::new();
        hasher.update(&self.body[..used]);
        self.header.crc32 = hasher.finalize();
        self.header.is_closed = true;
    }

    /// A restartable lazy cursor over this chunk's measurements, first one included.
    pub fn reader(&self) -> ChunkReader<'_> {
        ChunkReader::new(&self.header, &self.body, self.body_bit_len)
    }

    pub fn verify_crc(&self) -> bool {
        verify_crc_parts(&self.header, &self.body)
    }

    /// The closed chunk's body, trimmed to the bytes actually written. What a page
    /// writer packs to disk; meaningless before `close()`.
    pub fn closed_bytes(&self) -> &[u8] {
        &self.body[..self.header.bytes_used as usize]
    }
}

/// Verifies a chunk's CRC from its header and body alone, without a live `Chunk` —
/// what a page reader has after decompressing bytes off disk.
pub fn verify_crc_parts(header: &ChunkHeader, body: &[u8]) -> bool {
    let used = header.bytes_used as usize;
    if used > body.len() {
        return false;
    }
    let mut hasher = Hasher::new();
    hasher.update(&body[..used]);
    hasher.finalize() == header.crc32
}

pub struct ChunkReader<'a> {
    first: Measurement,
    emitted_first: bool,
    br: BitReader<'a>,
    decoder: CompressedReader,
    remaining: u32,
}

impl<'a> ChunkReader<'a> {
    fn new(header: &ChunkHeader, body: &'a [u8], body_bit_len: usize) -> Self {
        Self {
            first: header.first_measurement,
            emitted_first: false,
            br: BitReader::new(body, body_bit_len),
            decoder: CompressedReader::seeded(header.id, &header.first_measurement),
            remaining: header.count.saturating_sub(1),
        }
    }

    /// Builds a reader directly from a header and its matching on-disk body slice
    /// (`bytes_used` bytes), for chunks living in a page file rather than a live `Chunk`.
    pub fn from_parts(header: &ChunkHeader, body: &'a [u8]) -> Self {
        let bit_len = (header.bytes_used as usize) * 8;
        Self::new(header, body, bit_len)
    }
}

impl<'a> Iterator for ChunkReader<'a> {
    type Item = Measurement;

    fn next(&mut self) -> Option<Measurement> {
        if !self.emitted_first {
            self.emitted_first = true;
            return Some(self.first);
        }
        if self.remaining == 0 {
            return None;
        }
        let m = self.decoder.read(&mut self.br)?;
        self.remaining -= 1;
        Some(m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_read_and_close_round_trip() {
        let first = Measurement::new(1, 0, 1.0, 0);
        let mut chunk = Chunk::new(1024, first);
        for i in 1..100u64 {
            assert_eq!(chunk.append(Measurement::new(1, i * 10, i as f64, 0)), Written::Written);
        }
        chunk.close();
        assert!(chunk.is_closed());
        assert!(chunk.verify_crc());

        let collected: Vec<Measurement> = chunk.reader().collect();
        assert_eq!(collected.len(), 100);
        assert_eq!(collected[0], first);
        assert_eq!(collected[50].time, 500);
    }

    #[test]
    fn out_of_order_append_marks_chunk_full() {
        let mut chunk = Chunk::new(1024, Measurement::new(1, 100, 1.0, 0));
        assert_eq!(chunk.append(Measurement::new(1, 200, 2.0, 0)), Written::Written);
        assert_eq!(chunk.append(Measurement::new(1, 50, 3.0, 0)), Written::Full);
        assert!(chunk.is_full());
    }

    #[test]
    fn small_body_fills_up_and_reports_full() {
        let mut chunk = Chunk::new(2, Measurement::new(1, 0, 1.0, 0));
        let mut appended = 1;
        loop {
            match chunk.append(Measurement::new(1, appended as u64, 1.0, 0)) {
                Written::Written => appended += 1,
                Written::Full => break,
            }
        }
        assert!(chunk.is_full());
        let collected: Vec<Measurement> = chunk.reader().collect();
        assert_eq!(collected.len(), appended);
    }
}
