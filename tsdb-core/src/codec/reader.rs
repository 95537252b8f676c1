use crate::measurement::Measurement;

use super::bitbuf::BitReader;
use super::delta::DeltaDeCompressor;
use super::flag::FlagDeCompressor;
use super::xor::XorDeCompressor;

/// Decodes the bit streams a [`super::writer::CompressedWriter`] produced, one measurement
/// (`id` supplied by the caller, since the wire format doesn't repeat it per-point) at a time.
pub struct CompressedReader {
    id: u64,
    time: DeltaDeCompressor,
    value: XorDeCompressor,
    flag: FlagDeCompressor,
}

impl CompressedReader {
    pub fn seeded(id: u64, first: &Measurement) -> Self {
        Self {
            id,
            time: DeltaDeCompressor::seeded(first.time),
            value: XorDeCompressor::seeded(first.value),
            flag: FlagDeCompressor::seeded(first.flag),
        }
    }

    pub fn read(&mut self, br: &mut BitReader) -> Option<Measurement> {
        let time = self.time.read(br)?;
        let value = self.value.read(br)?;
        let flag = self.flag.read(br)?;
        Some(Measurement::new(self.id, time, value, flag))
    }
}
