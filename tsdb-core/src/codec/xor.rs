//! XOR-based value codec (Gorilla-style).
//!
//! The first value of a chunk is stored raw in the header. Every later value is XORed
//! against the previous one; if the result is zero the value repeated and a single `0`
//! bit is written. Otherwise a `1` bit is written, followed by either:
//!
//! - `0` + the meaningful bits, reusing the previous block's leading/trailing zero
//!   counts when they still cover this XOR, or
//! - `1` + a fresh 5-bit leading-zero count + a 6-bit (meaningful-bit-count - 1) +
//!   the meaningful bits themselves.
//!
//! Leading zero counts are clamped to 31 so they always fit the 5-bit field; this only
//! ever widens the stored window, never drops a set bit.

use super::bitbuf::{BitReader, BitWriter};

const MAX_LEAD: u32 = 31;

#[derive(Clone, Copy, Debug)]
pub struct XorCompressor {
    prev_bits: u64,
    prev_lead: u32,
    prev_trail: u32,
}

impl XorCompressor {
    pub fn seeded(first_value: f64) -> Self {
        // prev_lead/prev_trail start past any real window so the first real XOR always
        // takes the "fresh window" branch.
        Self { prev_bits: first_value.to_bits(), prev_lead: 64, prev_trail: 64 }
    }

    pub fn append(&mut self, bw: &mut BitWriter, value: f64) -> bool {
        let bits = value.to_bits();
        let x = bits ^ self.prev_bits;
        let ok = if x == 0 {
            bw.write_bit(false)
        } else {
            let lead = x.leading_zeros().min(MAX_LEAD);
            let trail = x.trailing_zeros();
            let nbits = 64 - lead - trail;
            let window_reusable =
                self.prev_lead + self.prev_trail <= 64 && lead >= self.prev_lead && trail >= self.prev_trail;
            if window_reusable {
                let nbits = 64 - self.prev_lead - self.prev_trail;
                let meaningful = x >> self.prev_trail;
                bw.write_bit(true) && bw.write_bit(false) && bw.write_bits(meaningful, nbits)
            } else {
                let meaningful = x >> trail;
                let written = bw.write_bit(true)
                    && bw.write_bit(true)
                    && bw.write_bits(lead as u64, 5)
                    && bw.write_bits((nbits - 1) as u64, 6)
                    && bw.write_bits(meaningful, nbits);
                if written {
                    self.prev_lead = lead;
                    self.prev_trail = trail;
                }
                written
            }
        };
        if ok {
            self.prev_bits = bits;
        }
        ok
    }
}

#[derive(Clone, Copy, Debug)]
pub struct XorDeCompressor {
    prev_bits: u64,
    prev_lead: u32,
    prev_trail: u32,
}

impl XorDeCompressor {
    pub fn seeded(first_value: f64) -> Self {
        Self { prev_bits: first_value.to_bits(), prev_lead: 64, prev_trail: 64 }
    }

    pub fn read(&mut self, br: &mut BitReader) -> Option<f64> {
        let same = !br.read_bit()?;
        let x = if same {
            0
        } else if !br.read_bit()? {
            let nbits = 64 - self.prev_lead - self.prev_trail;
            br.read_bits(nbits)? << self.prev_trail
        } else {
            let lead = br.read_bits(5)? as u32;
            let nbits = br.read_bits(6)? as u32 + 1;
            let trail = 64 - lead - nbits;
            self.prev_lead = lead;
            self.prev_trail = trail;
            br.read_bits(nbits)? << trail
        };
        let bits = self.prev_bits ^ x;
        self.prev_bits = bits;
        Some(f64::from_bits(bits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(values: &[f64]) -> Vec<f64> {
        let first = values[0];
        let mut buf = [0u8; 512];
        let mut w = BitWriter::new(&mut buf);
        let mut comp = XorCompressor::seeded(first);
        for &v in &values[1..] {
            assert!(comp.append(&mut w, v));
        }
        let len = w.bit_len();
        let mut r = BitReader::new(&buf, len);
        let mut decomp = XorDeCompressor::seeded(first);
        let mut out = vec![first];
        for _ in &values[1..] {
            out.push(decomp.read(&mut r).unwrap());
        }
        out
    }

    #[test]
    fn repeated_value_round_trips() {
        let values = vec![42.0; 20];
        assert_eq!(round_trip(&values), values);
    }

    #[test]
    fn slowly_drifting_sensor_round_trips() {
        let values: Vec<f64> = (0..100).map(|i| 20.0 + (i as f64) * 0.01).collect();
        assert_eq!(round_trip(&values), values);
    }

    #[test]
    fn wildly_varying_values_round_trip() {
        let values = vec![0.0, f64::MAX, -1.0, 1e-300, -1e300, 3.14159, 0.0, -0.0];
        assert_eq!(round_trip(&values), values);
    }
}
