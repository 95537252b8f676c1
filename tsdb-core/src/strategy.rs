use serde::{Deserialize, Serialize};

/// Selects which tiers sit on the write path and which one feeds the background dropper.
/// See the table in the engine orchestrator design.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Strategy {
    Wal,
    Compressed,
    Memory,
    Cache,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Wal => "WAL",
            Strategy::Compressed => "COMPRESSED",
            Strategy::Memory => "MEMORY",
            Strategy::Cache => "CACHE",
        }
    }

    pub fn has_wal(&self) -> bool {
        matches!(self, Strategy::Wal | Strategy::Compressed | Strategy::Cache)
    }

    pub fn has_memstorage(&self) -> bool {
        matches!(self, Strategy::Memory | Strategy::Cache)
    }

    pub fn has_background_conversion(&self) -> bool {
        matches!(self, Strategy::Compressed | Strategy::Memory | Strategy::Cache)
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Strategy {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "WAL" => Ok(Strategy::Wal),
            "COMPRESSED" => Ok(Strategy::Compressed),
            "MEMORY" => Ok(Strategy::Memory),
            "CACHE" => Ok(Strategy::Cache),
            other => Err(crate::error::Error::Format(format!("unknown strategy: {other}"))),
        }
    }
}
