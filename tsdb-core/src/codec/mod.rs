//! Per-series compression: delta-of-delta time, XOR value, RLE flag, each over a shared
//! bit cursor. A chunk's first measurement is stored raw by the caller; everything from
//! the second measurement on runs through [`writer::CompressedWriter`] / [`reader::CompressedReader`].

mod bitbuf;
mod delta;
mod flag;
mod xor;

pub mod reader;
pub mod writer;

pub use bitbuf::{BitReader, BitWriter};
pub use reader::CompressedReader;
pub use writer::CompressedWriter;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::Measurement;
    use proptest::prelude::*;

    #[test]
    fn writer_reader_round_trip_a_series() {
        let points: Vec<Measurement> = (0..200)
            .map(|i| Measurement::new(1, 1_000 + i * 100, (i as f64).sin(), if i % 50 == 0 { 1 } else { 0 }))
            .collect();

        let mut buf = [0u8; 4096];
        let mut w = BitWriter::new(&mut buf);
        let mut writer = CompressedWriter::seeded(&points[0]);
        for m in &points[1..] {
            assert!(writer.append(&mut w, m));
        }
        let bit_len = w.bit_len();

        let mut r = BitReader::new(&buf, bit_len);
        let mut reader = CompressedReader::seeded(1, &points[0]);
        let mut decoded = vec![points[0]];
        for _ in &points[1..] {
            decoded.push(reader.read(&mut r).unwrap());
        }
        assert_eq!(decoded, points);
    }

    proptest! {
        #[test]
        fn round_trips_arbitrary_monotonic_series(
            deltas in proptest::collection::vec(0u64..(1 << 20), 1..200),
            values in proptest::collection::vec(any::<f64>().prop_filter("finite", |v| v.is_finite()), 1..200),
            flags in proptest::collection::vec(any::<u32>(), 1..200),
        ) {
            let len = deltas.len().min(values.len()).min(flags.len());
            let mut time = 0u64;
            let mut points = Vec::with_capacity(len);
            for i in 0..len {
                time += deltas[i];
                points.push(Measurement::new(1, time, values[i], flags[i]));
            }

            let mut buf = vec![0u8; 64 * 1024];
            let mut w = BitWriter::new(&mut buf);
            let mut writer = CompressedWriter::seeded(&points[0]);
            let mut accepted = 1;
            for m in &points[1..] {
                if writer.append(&mut w, m) {
                    accepted += 1;
                } else {
                    break;
                }
            }
            let bit_len = w.bit_len();

            let mut r = BitReader::new(&buf, bit_len);
            let mut reader = CompressedReader::seeded(1, &points[0]);
            let mut decoded = vec![points[0]];
            for _ in 1..accepted {
                decoded.push(reader.read(&mut r).unwrap());
            }
            prop_assert_eq!(&decoded[..], &points[..accepted]);
        }
    }

    #[test]
    fn append_past_capacity_leaves_stream_decodable_up_to_the_cutoff() {
        let points: Vec<Measurement> = (0..5).map(|i| Measurement::new(9, i as u64, i as f64, 0)).collect();
        let mut buf = [0u8; 2];
        let mut w = BitWriter::new(&mut buf);
        let mut writer = CompressedWriter::seeded(&points[0]);
        let mut accepted = 0;
        for m in &points[1..] {
            if writer.append(&mut w, m) {
                accepted += 1;
            } else {
                break;
            }
        }
        let bit_len = w.bit_len();
        let mut r = BitReader::new(&buf, bit_len);
        let mut reader = CompressedReader::seeded(9, &points[0]);
        for _ in 0..accepted {
            assert!(reader.read(&mut r).is_some());
        }
    }
}
