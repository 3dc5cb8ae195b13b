//! Persisting classification edits per session
//!
//! Sessions are processed one after another. Each session is backed up
//! before its record is overwritten; a failure in one session is logged
//! and recorded in the report while the remaining sessions proceed. Only
//! sessions that save successfully leave the touched set.

use super::ClassificationState;
use crate::storage::{BackupId, PersistenceGateway};
use crate::types::{BatchId, SessionRef};
use serde::Serialize;
use tracing::{error, info, warn};

/// Which sessions a save covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SaveMode {
    /// Sessions with edits since their last successful save
    #[default]
    TouchedOnly,
    /// Every loaded session
    All,
}

/// Result of saving one session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSaveOutcome {
    pub batch_id: BatchId,
    pub session: SessionRef,
    /// Revision created before the overwrite, or the failure message
    pub result: Result<Option<BackupId>, String>,
}

impl SessionSaveOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Per-session outcomes of one save
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SaveReport {
    pub outcomes: Vec<SessionSaveOutcome>,
}

impl SaveReport {
    pub fn saved(&self) -> impl Iterator<Item = &SessionSaveOutcome> {
        self.outcomes.iter().filter(|o| o.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &SessionSaveOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    /// True when every session in scope was saved (vacuously true if none were)
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(SessionSaveOutcome::is_success)
    }
}

impl ClassificationState {
    /// Persist the current mutable fields of the sessions in scope
    pub fn save<G>(&mut self, mode: SaveMode, gateway: &G) -> SaveReport
    where
        G: PersistenceGateway + ?Sized,
    {
        let scope: Vec<BatchId> = match mode {
            SaveMode::TouchedOnly => self.touched.iter().copied().collect(),
            SaveMode::All => self.store.batch_ids(),
        };
        if scope.is_empty() {
            info!("Nothing to save");
            return SaveReport::default();
        }

        let mut report = SaveReport::default();
        for batch_id in scope {
            let outcome = self.save_session(batch_id, gateway);
            match &outcome.result {
                Ok(_) => {
                    self.touched.remove(&batch_id);
                }
                Err(message) => {
                    error!("Failed to save session {}: {}", outcome.session, message);
                }
            }
            report.outcomes.push(outcome);
        }

        let failed = report.failed().count();
        if failed > 0 {
            warn!(
                "Saved {} of {} sessions; {} remain touched",
                report.outcomes.len() - failed,
                report.outcomes.len(),
                self.touched.len()
            );
        } else {
            info!("Saved {} sessions", report.outcomes.len());
        }
        report
    }

    fn save_session<G>(&self, batch_id: BatchId, gateway: &G) -> SessionSaveOutcome
    where
        G: PersistenceGateway + ?Sized,
    {
        let session = match self.store.session(batch_id) {
            Ok(session) => session.session_ref().clone(),
            Err(err) => {
                return SessionSaveOutcome {
                    batch_id,
                    session: SessionRef::new(batch_id.to_string()),
                    result: Err(err.to_string()),
                }
            }
        };

        let result = self.session_snapshot(batch_id).and_then(|snapshot| {
            let backup = gateway.backup(&session, &snapshot)?;
            gateway.save(&session, &snapshot)?;
            Ok(backup)
        });

        SessionSaveOutcome {
            batch_id,
            session,
            result: result.map_err(|e| e.to_string()),
        }
    }
}
