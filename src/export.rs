//! Autosave export sink
//!
//! Every Nth mutating event the classification layer hands a snapshot of
//! every session to an [`ExportSink`]. This runs independently of `save`
//! and never touches the persisted records or their backups.

use crate::error::Result;
use crate::storage::SessionSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Whole-dataset export payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetExport {
    pub exported_at: DateTime<Utc>,
    /// Mutating events seen since the state was loaded
    pub event_count: usize,
    pub sessions: Vec<SessionSnapshot>,
}

/// External destination for autosave exports
#[cfg_attr(test, mockall::automock)]
pub trait ExportSink {
    fn export(&mut self, export: &DatasetExport) -> Result<()>;
}

/// Writes the latest export to `<dir>/autosave.json`
#[derive(Debug, Clone)]
pub struct JsonExportSink {
    dir: PathBuf,
}

impl JsonExportSink {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        fs::create_dir_all(dir.as_ref())?;
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
        })
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join("autosave.json")
    }
}

impl ExportSink for JsonExportSink {
    fn export(&mut self, export: &DatasetExport) -> Result<()> {
        let path = self.path();
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(export)?)?;
        fs::rename(&tmp, &path)?;
        debug!(
            "Autosave exported {} sessions to {}",
            export.sessions.len(),
            path.display()
        );
        Ok(())
    }
}
