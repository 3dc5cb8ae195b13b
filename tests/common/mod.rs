//! Common test utilities and helpers

#![allow(dead_code)]

use cellcurate_core::dataset::{CellInput, ConnectionsInput, SessionInput};
use cellcurate_core::storage::BackupId;
use cellcurate_core::{
    CellCurateError, CellIndex, Dataset, Explorer, LoadedDataset, PersistenceGateway, Result,
    SessionRef, SessionSnapshot,
};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

/// One session whose units (uid 1..) carry the given cell types
pub fn session(name: &str, types: &[&str]) -> SessionInput {
    SessionInput {
        name: name.to_string(),
        metadata: serde_json::json!({ "sr": 30000 }),
        cells: types
            .iter()
            .enumerate()
            .map(|(i, t)| CellInput {
                uid: i as u32 + 1,
                cell_type: t.to_string(),
                tags: BTreeSet::new(),
                brain_region: "Unknown".to_string(),
                label: String::new(),
                deep_superficial: "Unknown".to_string(),
                ground_truth: BTreeSet::new(),
                metrics: BTreeMap::new(),
            })
            .collect(),
        connections: ConnectionsInput::default(),
    }
}

/// Attach session-local excitatory and inhibitory unit pairs
pub fn with_edges(
    mut session: SessionInput,
    excitatory: &[(u32, u32)],
    inhibitory: &[(u32, u32)],
) -> SessionInput {
    session.connections = ConnectionsInput {
        excitatory: excitatory.to_vec(),
        inhibitory: inhibitory.to_vec(),
    };
    session
}

/// Set the free-text label of unit `uid`
pub fn with_label(mut session: SessionInput, uid: u32, label: &str) -> SessionInput {
    if let Some(cell) = session.cells.iter_mut().find(|c| c.uid == uid) {
        cell.label = label.to_string();
    }
    session
}

pub fn load(sessions: Vec<SessionInput>) -> LoadedDataset {
    Dataset { sessions }
        .load()
        .expect("Failed to load test dataset")
}

pub fn explorer(sessions: Vec<SessionInput>) -> Explorer {
    Explorer::new(load(sessions))
}

pub fn cells(ids: &[usize]) -> BTreeSet<CellIndex> {
    ids.iter().map(|&i| CellIndex(i)).collect()
}

/// In-memory gateway that records every call and can fail chosen sessions
#[derive(Default)]
pub struct RecordingGateway {
    pub calls: RefCell<Vec<(&'static str, String)>>,
    pub records: RefCell<BTreeMap<String, SessionSnapshot>>,
    pub failing: BTreeSet<String>,
}

impl RecordingGateway {
    pub fn failing(sessions: &[&str]) -> Self {
        Self {
            failing: sessions.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    /// Sessions passed to `save`, in call order
    pub fn saved(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter(|(op, _)| *op == "save")
            .map(|(_, s)| s.clone())
            .collect()
    }

    fn record(&self, op: &'static str, session: &SessionRef) {
        self.calls.borrow_mut().push((op, session.to_string()));
    }
}

impl PersistenceGateway for RecordingGateway {
    fn load(&self, session: &SessionRef) -> Result<Option<SessionSnapshot>> {
        self.record("load", session);
        Ok(self.records.borrow().get(session.as_str()).cloned())
    }

    fn save(&self, session: &SessionRef, snapshot: &SessionSnapshot) -> Result<()> {
        self.record("save", session);
        if self.failing.contains(session.as_str()) {
            return Err(CellCurateError::persistence(session.as_str(), "simulated failure"));
        }
        self.records
            .borrow_mut()
            .insert(session.to_string(), snapshot.clone());
        Ok(())
    }

    fn backup(&self, session: &SessionRef, _snapshot: &SessionSnapshot) -> Result<Option<BackupId>> {
        self.record("backup", session);
        Ok(None)
    }

    fn list_backups(&self, _session: &SessionRef) -> Result<Vec<BackupId>> {
        Ok(Vec::new())
    }

    fn restore(&self, session: &SessionRef, backup: &BackupId) -> Result<SessionSnapshot> {
        Err(CellCurateError::BackupNotFound {
            session: session.to_string(),
            backup: backup.to_string(),
        })
    }
}
