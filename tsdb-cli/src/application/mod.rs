pub mod handlers;

use crate::presentation::cli::{Cli, Commands, CompactCommands};
use clap::Parser;
use tsdb_core::error::Result;

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Init { path, strategy, wal_file_size, chunk_size, memory_limit } => {
            handlers::handle_init(path, strategy, wal_file_size, chunk_size, memory_limit)
        }
        Commands::Put { path, id, time, value, flag } => handlers::handle_put(path, id, time, value, flag),
        Commands::Query { path, id, from, to, flag } => handlers::handle_query(path, id, from, to, flag),
        Commands::Point { path, id, time, flag } => handlers::handle_point(path, id, time, flag),
        Commands::Current { path, ids, flag } => handlers::handle_current(path, ids, flag),
        Commands::Describe { path } => handlers::handle_describe(path),
        Commands::Fsck { path } => handlers::handle_fsck(path),
        Commands::EraseOld { path, time } => handlers::handle_erase_old(path, time),
        Commands::Compact(cmd) => match cmd {
            CompactCommands::To { path, n } => handlers::handle_compact_to(path, n),
            CompactCommands::ByTime { path, from, to } => handlers::handle_compact_by_time(path, from, to),
        },
    }
}
