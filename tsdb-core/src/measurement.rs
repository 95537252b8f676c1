//! The one unit of data the whole engine moves: `{id, time, value, flag}`.

use serde::{Deserialize, Serialize};

/// Bit 0 of `flag` is reserved: a measurement carrying it has no real value, only a time marker
/// (returned by `read_time_point` / `current_value` when nothing preceded the query point).
pub const NO_DATA: u32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub id: u64,
    pub time: u64,
    pub value: f64,
    pub flag: u32,
}

impl Measurement {
    pub const SERIALIZED_SIZE: usize = 32;

    pub fn new(id: u64, time: u64, value: f64, flag: u32) -> Self {
        Self { id, time, value, flag }
    }

    pub fn empty(id: u64, time: u64) -> Self {
        Self { id, time, value: 0.0, flag: NO_DATA }
    }

    pub fn is_no_data(&self) -> bool {
        self.flag & NO_DATA != 0
    }

    /// `true` when the measurement matches a flag filter: `flag == 0` means "any flag",
    /// otherwise every bit set in the filter must also be set on the measurement.
    pub fn matches_flag(&self, filter: u32) -> bool {
        filter == 0 || (self.flag & filter) == filter
    }

    /// 32-byte little-endian WAL record layout: `{id, time, value, flag, pad}`.
    pub fn to_le_bytes(&self) -> [u8; Self::SERIALIZED_SIZE] {
        let mut buf = [0u8; Self::SERIALIZED_SIZE];
        buf[0..8].copy_from_slice(&self.id.to_le_bytes());
        buf[8..16].copy_from_slice(&self.time.to_le_bytes());
        buf[16..24].copy_from_slice(&self.value.to_le_bytes());
        buf[24..28].copy_from_slice(&self.flag.to_le_bytes());
        // buf[28..32] is the reserved pad field, left zeroed.
        buf
    }

    pub fn from_le_bytes(buf: &[u8; Self::SERIALIZED_SIZE]) -> Self {
        let id = u64::from_le_bytes(buf[0..8].try_into().unwrap());
        let time = u64::from_le_bytes(buf[8..16].try_into().unwrap());
        let value = f64::from_le_bytes(buf[16..24].try_into().unwrap());
        let flag = u32::from_le_bytes(buf[24..28].try_into().unwrap());
        Self { id, time, value, flag }
    }
}

/// Result of a single `append` call at any tier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Written {
    Written,
    Full,
}

/// Result of an `Engine::append`, the only thing most callers look at.
#[derive(Clone, Debug, Default)]
pub struct Status {
    pub writed: u32,
    pub ignored: u32,
    pub error: Option<String>,
}

impl Status {
    pub fn ok(n: u32) -> Self {
        Self { writed: n, ignored: 0, error: None }
    }

    pub fn ignored_with(msg: impl Into<String>) -> Self {
        Self { writed: 0, ignored: 1, error: Some(msg.into()) }
    }

    pub fn failed(msg: impl Into<String>) -> Self {
        Self { writed: 0, ignored: 0, error: Some(msg.into()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wal_record_round_trips() {
        let m = Measurement::new(7, 123_456, 3.5, 0b101);
        let bytes = m.to_le_bytes();
        assert_eq!(bytes.len(), 32);
        let back = Measurement::from_le_bytes(&bytes);
        assert_eq!(m, back);
    }

    #[test]
    fn flag_filter_semantics() {
        let m = Measurement::new(1, 0, 1.0, 0b0110);
        assert!(m.matches_flag(0));
        assert!(m.matches_flag(0b0010));
        assert!(!m.matches_flag(0b1000));
    }
}
