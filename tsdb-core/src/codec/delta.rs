//! Delta-of-delta timestamp codec.
//!
//! The first measurement of a chunk is stored raw in the chunk header, never through this
//! codec. Every later timestamp is encoded as `D = (t_i - t_{i-1}) - (t_{i-1} - t_{i-2})`,
//! with the very first `D` computed against an implicit previous delta of zero, then
//! prefix-coded by magnitude:
//!
//! | prefix  | meaning        | payload |
//! |---------|----------------|---------|
//! | `0`     | `D == 0`       | none    |
//! | `10`    | `-63..=63`     | 7 bits  |
//! | `110`   | `-255..=255`   | 9 bits  |
//! | `1110`  | `-2047..=2047` | 12 bits |
//! | `1111`  | anything else  | 32 bits |

use super::bitbuf::{BitReader, BitWriter, sign_extend};

#[derive(Clone, Copy, Debug)]
pub struct DeltaCompressor {
    prev_time: u64,
    prev_delta: i64,
}

impl DeltaCompressor {
    pub fn seeded(first_time: u64) -> Self {
        Self { prev_time: first_time, prev_delta: 0 }
    }

    pub fn append(&mut self, bw: &mut BitWriter, time: u64) -> bool {
        let delta = time as i64 - self.prev_time as i64;
        let dd = delta - self.prev_delta;
        if !Self::write_dd(bw, dd) {
            return false;
        }
        self.prev_delta = delta;
        self.prev_time = time;
        true
    }

    fn write_dd(bw: &mut BitWriter, d: i64) -> bool {
        if d == 0 {
            bw.write_bit(false)
        } else if (-63..=63).contains(&d) {
            bw.write_bit(true) && bw.write_bit(false) && bw.write_bits(d as u64, 7)
        } else if (-255..=255).contains(&d) {
            bw.write_bits(0b110, 3) && bw.write_bits(d as u64, 9)
        } else if (-2047..=2047).contains(&d) {
            bw.write_bits(0b1110, 4) && bw.write_bits(d as u64, 12)
        } else {
            bw.write_bits(0b1111, 4) && bw.write_bits(d as u64, 32)
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct DeltaDeCompressor {
    prev_time: u64,
    prev_delta: i64,
}

impl DeltaDeCompressor {
    pub fn seeded(first_time: u64) -> Self {
        Self { prev_time: first_time, prev_delta: 0 }
    }

    pub fn read(&mut self, br: &mut BitReader) -> Option<u64> {
        let dd = Self::read_dd(br)?;
        let delta = self.prev_delta + dd;
        let time = (self.prev_time as i64 + delta) as u64;
        self.prev_delta = delta;
        self.prev_time = time;
        Some(time)
    }

    fn read_dd(br: &mut BitReader) -> Option<i64> {
        if !br.read_bit()? {
            return Some(0);
        }
        if !br.read_bit()? {
            return Some(sign_extend(br.read_bits(7)?, 7));
        }
        if !br.read_bit()? {
            return Some(sign_extend(br.read_bits(9)?, 9));
        }
        if !br.read_bit()? {
            return Some(sign_extend(br.read_bits(12)?, 12));
        }
        Some(sign_extend(br.read_bits(32)?, 32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(times: &[u64]) -> Vec<u64> {
        let first = times[0];
        let mut buf = [0u8; 256];
        let mut w = BitWriter::new(&mut buf);
        let mut comp = DeltaCompressor::seeded(first);
        for &t in &times[1..] {
            assert!(comp.append(&mut w, t));
        }
        let len = w.bit_len();
        let mut r = BitReader::new(&buf, len);
        let mut decomp = DeltaDeCompressor::seeded(first);
        let mut out = vec![first];
        for _ in &times[1..] {
            out.push(decomp.read(&mut r).unwrap());
        }
        out
    }

    #[test]
    fn regular_interval_round_trips() {
        let times: Vec<u64> = (0..50).map(|i| 1_000 + i * 10).collect();
        assert_eq!(round_trip(&times), times);
    }

    #[test]
    fn irregular_jumps_round_trip() {
        let times = vec![10u64, 20, 21, 5_000, 5_001, 100_000_000, 100_000_001];
        assert_eq!(round_trip(&times), times);
    }

    #[test]
    fn full_chunk_reports_false_without_corrupting_state() {
        let mut buf = [0u8; 1];
        let mut w = BitWriter::new(&mut buf);
        let mut comp = DeltaCompressor::seeded(0);
        assert!(!comp.append(&mut w, 1_000_000_000));
    }
}
