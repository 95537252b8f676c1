//! On-disk manifest: the list of live WAL and page files plus the storage-format version.
//! Rewritten atomically (write-then-rename) on every mutation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const MANIFEST_FILE_NAME: &str = "Manifest";
pub const STORAGE_VERSION: u32 = 1;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Manifest {
    pub storage_version: u32,
    pub wal_files: Vec<String>,
    pub page_files: Vec<String>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self::new()
    }
}

impl Manifest {
    pub fn new() -> Self {
        Self { storage_version: STORAGE_VERSION, wal_files: Vec::new(), page_files: Vec::new() }
    }

    fn file_path(path: &Path) -> PathBuf {
        path.join(MANIFEST_FILE_NAME)
    }

    pub fn exists(path: &Path) -> bool {
        Self::file_path(path).exists()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(Self::file_path(path))?;
        toml::from_str(&text).map_err(|e| Error::Format(e.to_string()))
    }

    /// Loads the manifest if one exists, otherwise hands back a fresh one at the
    /// current storage version (a brand-new storage directory has no manifest yet).
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if Self::exists(path) { Self::load(path) } else { Ok(Self::new()) }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self).map_err(|e| Error::Format(e.to_string()))?;
        let dest = Self::file_path(path);
        let tmp = dest.with_extension("tmp");
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, &dest)?;
        Ok(())
    }

    /// The original treats a version mismatch in either direction (older or newer than
    /// what this binary knows) as fatal; see the engine's construction notes for why a
    /// silent downgrade path is not offered.
    pub fn check_version(&self) -> Result<()> {
        if self.storage_version != STORAGE_VERSION {
            return Err(Error::VersionMismatch { found: self.storage_version, expected: STORAGE_VERSION });
        }
        Ok(())
    }

    pub fn set_wal_files(&mut self, names: Vec<String>) {
        self.wal_files = names;
    }

    pub fn set_page_files(&mut self, names: Vec<String>) {
        self.page_files = names;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = Manifest::new();
        m.set_wal_files(vec!["1_0.wal".to_string()]);
        m.set_page_files(vec!["0_0.page".to_string()]);
        m.save(dir.path()).unwrap();
        assert!(Manifest::exists(dir.path()));

        let loaded = Manifest::load(dir.path()).unwrap();
        assert_eq!(loaded.wal_files, vec!["1_0.wal".to_string()]);
        assert_eq!(loaded.page_files, vec!["0_0.page".to_string()]);
        loaded.check_version().unwrap();
    }

    #[test]
    fn version_mismatch_is_rejected_in_either_direction() {
        let mut older = Manifest::new();
        older.storage_version = STORAGE_VERSION - 1;
        assert!(older.check_version().is_err());

        let mut newer = Manifest::new();
        newer.storage_version = STORAGE_VERSION + 1;
        assert!(newer.check_version().is_err());
    }

    #[test]
    fn missing_manifest_loads_as_default() {
        let dir = tempfile::tempdir().unwrap();
        let m = Manifest::load_or_default(dir.path()).unwrap();
        assert_eq!(m.storage_version, STORAGE_VERSION);
        assert!(m.wal_files.is_empty());
    }
}
