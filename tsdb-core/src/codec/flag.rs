//! Run-length flag codec. Flags change rarely compared to time/value, so a repeat costs
//! one bit and a change costs one bit plus the raw 32-bit flag.

use super::bitbuf::{BitReader, BitWriter};

#[derive(Clone, Copy, Debug)]
pub struct FlagCompressor {
    prev: u32,
}

impl FlagCompressor {
    pub fn seeded(first_flag: u32) -> Self {
        Self { prev: first_flag }
    }

    pub fn append(&mut self, bw: &mut BitWriter, flag: u32) -> bool {
        if flag == self.prev {
            return bw.write_bit(false);
        }
        let ok = bw.write_bit(true) && bw.write_bits(flag as u64, 32);
        if ok {
            self.prev = flag;
        }
        ok
    }
}

#[derive(Clone, Copy, Debug)]
pub struct FlagDeCompressor {
    prev: u32,
}

impl FlagDeCompressor {
    pub fn seeded(first_flag: u32) -> Self {
        Self { prev: first_flag }
    }

    pub fn read(&mut self, br: &mut BitReader) -> Option<u32> {
        if !br.read_bit()? {
            return Some(self.prev);
        }
        let flag = br.read_bits(32)? as u32;
        self.prev = flag;
        Some(flag)
    }
}
