//! Fixed-layout chunk header: little-endian, CRC32 (IEEE 802.3) over the compressed body.

use crate::measurement::Measurement;

pub const HEADER_SIZE: usize = 128;

#[derive(Clone, Copy, Debug)]
pub struct ChunkHeader {
    pub id: u64,
    pub count: u32,
    pub min_time: u64,
    pub max_time: u64,
    pub bytes_used: u32,
    pub crc32: u32,
    pub flag_bloom: u32,
    pub first_measurement: Measurement,
    pub is_full: bool,
    pub is_closed: bool,
}

impl ChunkHeader {
    pub fn open(first: Measurement) -> Self {
        Self {
            id: first.id,
            count: 1,
            min_time: first.time,
            max_time: first.time,
            bytes_used: 0,
            crc32: 0,
            flag_bloom: first.flag,
            first_measurement: first,
            is_full: false,
            is_closed: false,
        }
    }

    pub fn write_to(&self, buf: &mut [u8; HEADER_SIZE]) {
        buf.fill(0);
        buf[0..8].copy_from_slice(&self.id.to_le_bytes());
        buf[8..12].copy_from_slice(&self.count.to_le_bytes());
        buf[12..20].copy_from_slice(&self.min_time.to_le_bytes());
        buf[20..28].copy_from_slice(&self.max_time.to_le_bytes());
        buf[28..32].copy_from_slice(&self.bytes_used.to_le_bytes());
        buf[32..36].copy_from_slice(&self.crc32.to_le_bytes());
        buf[36..40].copy_from_slice(&self.flag_bloom.to_le_bytes());
        buf[40..72].copy_from_slice(&self.first_measurement.to_le_bytes());
        buf[72] = self.is_full as u8;
        buf[73] = self.is_closed as u8;
    }

    pub fn read_from(buf: &[u8; HEADER_SIZE]) -> Self {
        let id = u64::from_le_bytes(buf[0..8].try_into().unwrap());
        let count = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        let min_time = u64::from_le_bytes(buf[12..20].try_into().unwrap());
        let max_time = u64::from_le_bytes(buf[20..28].try_into().unwrap());
        let bytes_used = u32::from_le_bytes(buf[28..32].try_into().unwrap());
        let crc32 = u32::from_le_bytes(buf[32..36].try_into().unwrap());
        let flag_bloom = u32::from_le_bytes(buf[36..40].try_into().unwrap());
        let first_measurement = Measurement::from_le_bytes(buf[40..72].try_into().unwrap());
        let is_full = buf[72] != 0;
        let is_closed = buf[73] != 0;
        Self { id, count, min_time, max_time, bytes_used, crc32, flag_bloom, first_measurement, is_full, is_closed }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips_through_bytes() {
        let first = Measurement::new(5, 100, 2.5, 3);
        let mut h = ChunkHeader::open(first);
        h.count = 10;
        h.max_time = 900;
        h.bytes_used = 256;
        h.crc32 = 0xdead_beef;
        h.flag_bloom = 0b111;
        h.is_full = true;
        h.is_closed = true;

        let mut buf = [0u8; HEADER_SIZE];
        h.write_to(&mut buf);
        let back = ChunkHeader::read_from(&buf);
        assert_eq!(back.id, 5);
        assert_eq!(back.count, 10);
        assert_eq!(back.min_time, 100);
        assert_eq!(back.max_time, 900);
        assert_eq!(back.bytes_used, 256);
        assert_eq!(back.crc32, 0xdead_beef);
        assert_eq!(back.flag_bloom, 0b111);
        assert_eq!(back.first_measurement, first);
        assert!(back.is_full);
        assert!(back.is_closed);
    }
}
