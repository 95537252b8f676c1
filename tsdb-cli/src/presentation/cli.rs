use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about = "tsdb administrative CLI", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a store at `path` with a chosen strategy
    Init {
        path: PathBuf,
        /// WAL, COMPRESSED, MEMORY or CACHE
        #[arg(long, default_value = "CACHE")]
        strategy: String,
        #[arg(long)]
        wal_file_size: Option<u32>,
        #[arg(long)]
        chunk_size: Option<u32>,
        #[arg(long)]
        memory_limit: Option<u64>,
    },

    /// Append one measurement
    Put {
        path: PathBuf,
        id: u64,
        time: u64,
        value: f64,
        #[arg(long, default_value_t = 0)]
        flag: u32,
    },

    /// Range query over one id
    Query {
        path: PathBuf,
        id: u64,
        from: u64,
        to: u64,
        #[arg(long, default_value_t = 0)]
        flag: u32,
    },

    /// Latest measurement at or before a time point
    Point {
        path: PathBuf,
        id: u64,
        time: u64,
        #[arg(long, default_value_t = 0)]
        flag: u32,
    },

    /// The last successfully written measurement per id
    Current {
        path: PathBuf,
        ids: Vec<u64>,
        #[arg(long, default_value_t = 0)]
        flag: u32,
    },

    /// Print counts: ids, wal segments, pages, memstorage chunk usage
    Describe { path: PathBuf },

    /// Verify every page's chunk CRCs, dropping any that fail
    Fsck { path: PathBuf },

    /// Drop every measurement older than `time` from every tier
    EraseOld { path: PathBuf, time: u64 },

    #[command(subcommand)]
    /// Merge pages, by output count or by time range
    Compact(CompactCommands),
}

#[derive(Subcommand)]
pub enum CompactCommands {
    /// Merge all pages down to `n` output pages
    To { path: PathBuf, n: u32 },
    /// Merge every page overlapping `[from, to]` into one
    ByTime { path: PathBuf, from: u64, to: u64 },
}
