//! JSON file gateway
//!
//! Layout under the data directory:
//!
//! ```text
//! <data_dir>/<session>.classification.json
//! <data_dir>/<backup_dir>/<session>/<backup-id>.json
//! ```
//!
//! Records are written to a temporary file and renamed into place so a
//! failed write never leaves a truncated record behind.

use super::{BackupId, PersistenceGateway, SessionSnapshot};
use crate::error::{CellCurateError, Result};
use crate::types::SessionRef;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const RECORD_SUFFIX: &str = ".classification.json";

/// Session records stored as pretty-printed JSON files
#[derive(Debug, Clone)]
pub struct JsonFileGateway {
    root: PathBuf,
    backup_dir_name: String,
    max_backups: Option<usize>,
}

impl JsonFileGateway {
    /// Create a gateway rooted at `root`, creating the directory if needed
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            backup_dir_name: "revisions".to_string(),
            max_backups: None,
        })
    }

    pub fn with_backup_dir_name(mut self, name: impl Into<String>) -> Self {
        self.backup_dir_name = name.into();
        self
    }

    /// Keep at most `max` revisions per session
    pub fn with_max_backups(mut self, max: Option<usize>) -> Self {
        self.max_backups = max;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, session: &SessionRef) -> PathBuf {
        self.root.join(format!("{}{}", file_stem(session), RECORD_SUFFIX))
    }

    fn backup_dir(&self, session: &SessionRef) -> PathBuf {
        self.root.join(&self.backup_dir_name).join(file_stem(session))
    }

    fn read(path: &Path) -> Result<SessionSnapshot> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    fn write_atomic(path: &Path, snapshot: &SessionSnapshot) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            let json = serde_json::to_string_pretty(snapshot)?;
            file.write_all(json.as_bytes())?;
            file.write_all(b"\n")?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn prune(&self, session: &SessionRef) -> Result<()> {
        let Some(max) = self.max_backups else {
            return Ok(());
        };
        let backups = self.list_backups(session)?;
        if backups.len() <= max {
            return Ok(());
        }
        let dir = self.backup_dir(session);
        for old in &backups[..backups.len() - max] {
            let path = dir.join(format!("{}.json", old));
            if let Err(e) = fs::remove_file(&path) {
                warn!("Failed to prune backup {}: {}", path.display(), e);
            } else {
                debug!("Pruned backup {}", path.display());
            }
        }
        Ok(())
    }
}

/// Session names may carry path separators or dots; keep them inside the root
fn file_stem(session: &SessionRef) -> String {
    let stem: String = session
        .as_str()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            c => c,
        })
        .collect();
    if stem.is_empty() || stem.starts_with('.') {
        format!("_{}", stem)
    } else {
        stem
    }
}

impl PersistenceGateway for JsonFileGateway {
    fn load(&self, session: &SessionRef) -> Result<Option<SessionSnapshot>> {
        let path = self.record_path(session);
        if !path.exists() {
            debug!("No persisted record for {} at {}", session, path.display());
            return Ok(None);
        }
        Self::read(&path)
            .map(Some)
            .map_err(|e| CellCurateError::persistence(session.as_str(), e))
    }

    fn save(&self, session: &SessionRef, snapshot: &SessionSnapshot) -> Result<()> {
        let path = self.record_path(session);
        Self::write_atomic(&path, snapshot)
            .map_err(|e| CellCurateError::persistence(session.as_str(), e))?;
        info!("Saved {} ({} cells) to {}", session, snapshot.cells.len(), path.display());
        Ok(())
    }

    fn backup(
        &self,
        session: &SessionRef,
        snapshot: &SessionSnapshot,
    ) -> Result<Option<BackupId>> {
        let current = self.record_path(session);
        let id = BackupId::generate();
        let target = self.backup_dir(session).join(format!("{}.json", id));

        // The first save of a session has nothing on disk yet; the outgoing
        // snapshot becomes the initial revision.
        let outcome = if current.exists() {
            fs::create_dir_all(self.backup_dir(session))
                .and_then(|_| fs::copy(&current, &target))
                .map(|_| ())
                .map_err(CellCurateError::from)
        } else {
            Self::write_atomic(&target, snapshot)
        };
        outcome.map_err(|e| CellCurateError::persistence(session.as_str(), e))?;

        debug!("Backed up {} as {}", session, id);
        self.prune(session)?;
        Ok(Some(id))
    }

    fn list_backups(&self, session: &SessionRef) -> Result<Vec<BackupId>> {
        let dir = self.backup_dir(session);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut backups: Vec<BackupId> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                name.strip_suffix(".json").map(|s| BackupId(s.to_string()))
            })
            .collect();
        backups.sort();
        Ok(backups)
    }

    fn restore(&self, session: &SessionRef, backup: &BackupId) -> Result<SessionSnapshot> {
        let path = self.backup_dir(session).join(format!("{}.json", backup));
        if !path.exists() {
            return Err(CellCurateError::BackupNotFound {
                session: session.to_string(),
                backup: backup.to_string(),
            });
        }
        info!("Restoring {} from backup {}", session, backup);
        Self::read(&path)
    }
}
