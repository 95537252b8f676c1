use thiserror::Error;

/// Every fatal or recoverable condition the engine surfaces to a caller.
///
/// Recoverable conditions (`NoSpace`, `OutOfOrderWrite`, `CorruptChunk`, `QueryCanceled`) are
/// normally absorbed inside the component that hit them and reported through `Status` or a
/// callback instead of unwinding here; they exist on this enum so the few call sites that *do*
/// propagate them (the append retry loop, fsck) have one vocabulary to use.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage at {0:?} is locked by another process")]
    StorageLocked(std::path::PathBuf),

    #[error("storage format version mismatch: found {found}, expected {expected}")]
    VersionMismatch { found: u32, expected: u32 },

    #[error("chunk allocator has no free space")]
    NoSpace,

    #[error("writing to past: {0}")]
    OutOfOrderWrite(String),

    #[error("chunk failed crc check: {0}")]
    CorruptChunk(String),

    #[error("query canceled")]
    QueryCanceled,

    #[error("format error: {0}")]
    Format(String),

    #[error("background task panicked: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
