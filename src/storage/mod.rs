//! Persistence layer for classification state
//!
//! Defines the per-session record layout (current mutable fields plus an
//! append-only provenance log) and the [`PersistenceGateway`] the
//! classification layer saves through. Two gateways ship with the crate:
//! a JSON file tree and a SQLite database.

pub mod json;
pub mod sqlite;

use crate::error::Result;
use crate::types::{FieldName, FieldValue, SessionRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Per-process counter ordering backups created within one clock tick
static BACKUP_SEQUENCE: AtomicU64 = AtomicU64::new(0);

pub use json::JsonFileGateway;
pub use sqlite::SqliteGateway;

/// Mutable classification fields of one cell, keyed by session-local UID
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellRecord {
    pub uid: u32,
    pub cell_type: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub brain_region: String,
    #[serde(default)]
    pub label: String,
    pub deep_superficial: String,
    #[serde(default)]
    pub ground_truth: BTreeSet<String>,
}

/// What produced a provenance entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvenanceAction {
    Assign,
    Undo,
    Restore,
}

/// One changed cell inside a provenance entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceChange {
    pub uid: u32,
    pub old: FieldValue,
    pub new: FieldValue,
}

/// Persisted trace of a classification event, scoped to one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub action: ProvenanceAction,
    pub field: FieldName,
    pub changes: Vec<ProvenanceChange>,
}

/// Persisted record of one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session: SessionRef,
    pub saved_at: DateTime<Utc>,
    pub cells: Vec<CellRecord>,
    #[serde(default)]
    pub provenance: Vec<ProvenanceEntry>,
}

impl SessionSnapshot {
    pub fn new(session: SessionRef, cells: Vec<CellRecord>) -> Self {
        Self {
            session,
            saved_at: Utc::now(),
            cells,
            provenance: Vec::new(),
        }
    }

    pub fn with_provenance(mut self, provenance: Vec<ProvenanceEntry>) -> Self {
        self.provenance = provenance;
        self
    }
}

/// Identifier of a stored backup revision
///
/// Identifiers sort chronologically: a nanosecond timestamp, then a
/// zero-padded per-process sequence, then a random suffix.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackupId(pub String);

impl BackupId {
    /// Fresh identifier stamped with the current time
    pub fn generate() -> Self {
        let sequence = BACKUP_SEQUENCE.fetch_add(1, Ordering::SeqCst);
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!(
            "{}-{:012}-{}",
            Utc::now().format("%Y%m%dT%H%M%S%9f"),
            sequence,
            &suffix[..8]
        ))
    }
}

impl fmt::Display for BackupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Storage collaborator for session records
///
/// The classification layer calls `backup` before every `save` so the
/// record about to be overwritten survives as a revision.
#[cfg_attr(test, mockall::automock)]
pub trait PersistenceGateway {
    /// Load the persisted record of a session, if one exists
    fn load(&self, session: &SessionRef) -> Result<Option<SessionSnapshot>>;

    /// Overwrite the persisted record of a session
    fn save(&self, session: &SessionRef, snapshot: &SessionSnapshot) -> Result<()>;

    /// Store a revision of the record `snapshot` is about to replace
    ///
    /// Returns `None` when nothing needed preserving.
    fn backup(&self, session: &SessionRef, snapshot: &SessionSnapshot)
        -> Result<Option<BackupId>>;

    /// Stored revisions of a session, oldest first
    fn list_backups(&self, session: &SessionRef) -> Result<Vec<BackupId>>;

    /// Read back one stored revision
    fn restore(&self, session: &SessionRef, backup: &BackupId) -> Result<SessionSnapshot>;
}

/// Storage backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Json,
    Sqlite,
}
