// src/history/mod.rs

pub mod checked;
pub mod materialized;
pub mod table_history;

use anyhow::Result;
use std::path::PathBuf;

pub use checked::CheckRow;
pub use materialized::MaterializationRow;
pub use table_history::{HistoryRow, TableHistory};

/// Both history tables of a storage directory.
pub struct RunHistory {
    pub materializations: TableHistory<MaterializationRow>,
    pub checks: TableHistory<CheckRow>,
}

impl RunHistory {
    pub fn open(history_dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = history_dir.into();
        Ok(Self {
            materializations: TableHistory::new_materializations(&dir)?,
            checks: TableHistory::new_checks(&dir)?,
        })
    }

    /// Consolidate every partition of both tables.
    pub fn vacuum(&self) -> Result<()> {
        self.materializations.vacuum()?;
        self.checks.vacuum()
    }
}
