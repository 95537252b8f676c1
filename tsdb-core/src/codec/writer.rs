use crate::measurement::Measurement;

use super::bitbuf::BitWriter;
use super::delta::DeltaCompressor;
use super::flag::FlagCompressor;
use super::xor::XorCompressor;

/// Encodes measurements after the first one (which a chunk keeps verbatim in its header)
/// into the three parallel bit streams that make up a chunk body.
pub struct CompressedWriter {
    time: DeltaCompressor,
    value: XorCompressor,
    flag: FlagCompressor,
}

impl CompressedWriter {
    pub fn seeded(first: &Measurement) -> Self {
        Self {
            time: DeltaCompressor::seeded(first.time),
            value: XorCompressor::seeded(first.value),
            flag: FlagCompressor::seeded(first.flag),
        }
    }

    /// Appends one measurement. Returns `false` (without touching `bw` or codec state) if
    /// the chunk body has no room left for it.
    pub fn append(&mut self, bw: &mut BitWriter, m: &Measurement) -> bool {
        let time_snapshot = self.time;
        let value_snapshot = self.value;
        let flag_snapshot = self.flag;
        let checkpoint = bw.bit_len();

        let ok = self.time.append(bw, m.time) && self.value.append(bw, m.value) && self.flag.append(bw, m.flag);
        if !ok {
            self.time = time_snapshot;
            self.value = value_snapshot;
            self.flag = flag_snapshot;
            bw.rewind(checkpoint);
        }
        ok
    }
}
