//! SQLite gateway
//!
//! Keeps one row per session holding the JSON-encoded record, plus a
//! `backups` table of prior revisions. A single database file can hold
//! every session of a batch.

use super::{BackupId, PersistenceGateway, SessionSnapshot};
use crate::error::{CellCurateError, Result};
use crate::types::SessionRef;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tracing::{debug, info};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    session   TEXT PRIMARY KEY,
    saved_at  TEXT NOT NULL,
    record    TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS backups (
    session    TEXT NOT NULL,
    backup_id  TEXT NOT NULL,
    created_at TEXT NOT NULL,
    record     TEXT NOT NULL,
    PRIMARY KEY (session, backup_id)
);
"#;

/// Session records stored in a SQLite database
pub struct SqliteGateway {
    conn: Connection,
    max_backups: Option<usize>,
}

impl SqliteGateway {
    /// Open (or create) a database file and apply the schema
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        info!("Opening SQLite gateway at {}", path.as_ref().display());
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// In-memory database, used by tests
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn,
            max_backups: None,
        })
    }

    /// Keep at most `max` revisions per session
    pub fn with_max_backups(mut self, max: Option<usize>) -> Self {
        self.max_backups = max;
        self
    }

    fn current_record(&self, session: &SessionRef) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT record FROM sessions WHERE session = ?1",
                params![session.as_str()],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn prune(&self, session: &SessionRef) -> Result<()> {
        let Some(max) = self.max_backups else {
            return Ok(());
        };
        let removed = self.conn.execute(
            "DELETE FROM backups WHERE session = ?1 AND backup_id NOT IN (
                SELECT backup_id FROM backups WHERE session = ?1
                ORDER BY backup_id DESC LIMIT ?2
            )",
            params![session.as_str(), max as i64],
        )?;
        if removed > 0 {
            debug!("Pruned {} backups of {}", removed, session);
        }
        Ok(())
    }
}

impl PersistenceGateway for SqliteGateway {
    fn load(&self, session: &SessionRef) -> Result<Option<SessionSnapshot>> {
        match self.current_record(session)? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn save(&self, session: &SessionRef, snapshot: &SessionSnapshot) -> Result<()> {
        let json = serde_json::to_string(snapshot)?;
        self.conn
            .execute(
                "INSERT INTO sessions (session, saved_at, record) VALUES (?1, ?2, ?3)
                 ON CONFLICT(session) DO UPDATE SET saved_at = excluded.saved_at, record = excluded.record",
                params![session.as_str(), snapshot.saved_at.to_rfc3339(), json],
            )
            .map_err(|e| CellCurateError::persistence(session.as_str(), e))?;
        info!("Saved {} ({} cells) to sqlite", session, snapshot.cells.len());
        Ok(())
    }

    fn backup(
        &self,
        session: &SessionRef,
        snapshot: &SessionSnapshot,
    ) -> Result<Option<BackupId>> {
        let record = match self.current_record(session)? {
            Some(json) => json,
            None => serde_json::to_string(snapshot)?,
        };
        let id = BackupId::generate();
        self.conn
            .execute(
                "INSERT INTO backups (session, backup_id, created_at, record) VALUES (?1, ?2, ?3, ?4)",
                params![session.as_str(), id.0, Utc::now().to_rfc3339(), record],
            )
            .map_err(|e| CellCurateError::persistence(session.as_str(), e))?;
        debug!("Backed up {} as {}", session, id);
        self.prune(session)?;
        Ok(Some(id))
    }

    fn list_backups(&self, session: &SessionRef) -> Result<Vec<BackupId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT backup_id FROM backups WHERE session = ?1 ORDER BY backup_id ASC")?;
        let rows = stmt.query_map(params![session.as_str()], |row| row.get::<_, String>(0))?;
        let mut backups = Vec::new();
        for row in rows {
            backups.push(BackupId(row?));
        }
        Ok(backups)
    }

    fn restore(&self, session: &SessionRef, backup: &BackupId) -> Result<SessionSnapshot> {
        let record: Option<String> = self
            .conn
            .query_row(
                "SELECT record FROM backups WHERE session = ?1 AND backup_id = ?2",
                params![session.as_str(), backup.0],
                |row| row.get(0),
            )
            .optional()?;
        match record {
            Some(json) => {
                info!("Restoring {} from backup {}", session, backup);
                Ok(serde_json::from_str(&json)?)
            }
            None => Err(CellCurateError::BackupNotFound {
                session: session.to_string(),
                backup: backup.to_string(),
            }),
        }
    }
}
