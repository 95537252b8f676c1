#![forbid(unsafe_code)]

//! Embedded time-series storage: append-only ingestion behind a pluggable strategy
//! (`WAL`, `COMPRESSED`, `MEMORY`, `CACHE`), each assembling the same small set of
//! tiers — a write-ahead log, an in-memory chunk store, and immutable compressed
//! pages — in a different shape.

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod chunk;
pub mod codec;
pub mod dropper;
pub mod engine;
pub mod error;
pub mod lock;
pub mod manifest;
pub mod measurement;
pub mod memstorage;
pub mod page;
pub mod pool;
pub mod settings;
pub mod stats;
pub mod strategy;
pub mod track;
pub mod wal;

pub use engine::{Engine, open_storage};
pub use error::{Error, Result};
pub use measurement::{Measurement, Status, Written, NO_DATA};
pub use settings::Settings;
pub use stats::{Description, FsckReport, QueryInterval};
pub use strategy::Strategy;

pub mod prelude {
    pub use crate::engine::{Engine, open_storage};
    pub use crate::error::{Error, Result};
    pub use crate::measurement::{Measurement, Status, Written, NO_DATA};
    pub use crate::settings::Settings;
    pub use crate::stats::{Description, FsckReport, QueryInterval};
    pub use crate::strategy::Strategy;
}
