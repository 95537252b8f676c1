use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::strategy::Strategy;

pub const SETTINGS_FILE_NAME: &str = "Settings";

/// Every knob in the engine's configuration, serialized as TOML at `<path>/Settings`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Settings {
    pub storage_path: PathBuf,
    pub raw_path: PathBuf,
    pub wal_file_size: u32,
    pub wal_cache_size: u32,
    pub chunk_size: u32,
    pub memory_limit: u64,
    pub percent_when_start_droping: f32,
    pub percent_to_drop: f32,
    pub strategy: Strategy,
    pub max_store_period: u64,
    pub max_chunks_per_page: u32,
    pub load_min_max: bool,
}

impl Settings {
    pub fn default_for(storage_path: impl Into<PathBuf>) -> Self {
        let storage_path = storage_path.into();
        let raw_path = storage_path.join("raw");
        Self {
            storage_path,
            raw_path,
            wal_file_size: 100_000,
            wal_cache_size: 1_000,
            chunk_size: 4096,
            memory_limit: 1 << 30,
            percent_when_start_droping: 0.75,
            percent_to_drop: 0.25,
            strategy: Strategy::Cache,
            max_store_period: 0,
            max_chunks_per_page: 1024,
            load_min_max: true,
        }
    }

    fn file_path(path: &Path) -> PathBuf {
        path.join(SETTINGS_FILE_NAME)
    }

    pub fn exists(path: &Path) -> bool {
        Self::file_path(path).exists()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(Self::file_path(path))?;
        toml::from_str(&text).map_err(|e| crate::error::Error::Format(e.to_string()))
    }

    /// Write-then-rename so a crash mid-save never leaves a half-written Settings file.
    pub fn save(&self) -> Result<()> {
        let text = toml::to_string_pretty(self).map_err(|e| crate::error::Error::Format(e.to_string()))?;
        let dest = Self::file_path(&self.storage_path);
        let tmp = dest.with_extension("tmp");
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, &dest)?;
        Ok(())
    }

    pub fn chunks_capacity(&self) -> u64 {
        (self.memory_limit / self.chunk_size as u64).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::default_for(dir.path());
        settings.save().unwrap();
        assert!(Settings::exists(dir.path()));
        let loaded = Settings::load(dir.path()).unwrap();
        assert_eq!(loaded.chunk_size, settings.chunk_size);
        assert_eq!(loaded.strategy, settings.strategy);
    }

    #[test]
    fn chunks_capacity_divides_memory_limit_by_chunk_size() {
        let mut settings = Settings::default_for("/tmp/whatever");
        settings.memory_limit = 50 * 1024;
        settings.chunk_size = 128;
        assert_eq!(settings.chunks_capacity(), (50 * 1024) / 128);
    }
}
