//! Canonical per-cell attribute storage spanning one or more sessions
//!
//! The store is read-only for everyone except the classification layer:
//! its mutators are crate-private and only [`crate::classification`] calls
//! them. Reads go through [`CellStore::get`], which hands out shared
//! references.

use crate::error::{CellCurateError, Result, ValidationError};
use crate::storage::{CellRecord, SessionSnapshot};
use crate::types::{BatchId, CellIndex, FieldName, FieldValue, Metric, SessionRef};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, warn};

/// One spike-sorted unit
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub(crate) index: CellIndex,
    pub(crate) batch_id: BatchId,
    pub(crate) uid: u32,
    pub(crate) cell_type: String,
    pub(crate) tags: BTreeSet<String>,
    pub(crate) brain_region: String,
    pub(crate) label: String,
    pub(crate) deep_superficial: String,
    pub(crate) ground_truth: BTreeSet<String>,
    pub(crate) metrics: BTreeMap<String, Metric>,
}

impl Cell {
    pub fn index(&self) -> CellIndex {
        self.index
    }

    pub fn batch_id(&self) -> BatchId {
        self.batch_id
    }

    /// Session-local unit identifier
    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn cell_type(&self) -> &str {
        &self.cell_type
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn brain_region(&self) -> &str {
        &self.brain_region
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn deep_superficial(&self) -> &str {
        &self.deep_superficial
    }

    pub fn ground_truth(&self) -> &BTreeSet<String> {
        &self.ground_truth
    }

    pub fn metrics(&self) -> &BTreeMap<String, Metric> {
        &self.metrics
    }

    pub fn metric(&self, name: &str) -> Option<&Metric> {
        self.metrics.get(name)
    }

    /// Current value of a mutable field
    pub fn field(&self, field: FieldName) -> FieldValue {
        match field {
            FieldName::CellType => FieldValue::Text(self.cell_type.clone()),
            FieldName::Tags => FieldValue::Set(self.tags.clone()),
            FieldName::BrainRegion => FieldValue::Text(self.brain_region.clone()),
            FieldName::Label => FieldValue::Text(self.label.clone()),
            FieldName::DeepSuperficial => FieldValue::Text(self.deep_superficial.clone()),
            FieldName::GroundTruth => FieldValue::Set(self.ground_truth.clone()),
        }
    }

    fn write(&mut self, field: FieldName, value: &FieldValue) -> Result<()> {
        match (field, value) {
            (FieldName::CellType, FieldValue::Text(v)) => self.cell_type = v.clone(),
            (FieldName::BrainRegion, FieldValue::Text(v)) => self.brain_region = v.clone(),
            (FieldName::Label, FieldValue::Text(v)) => self.label = v.clone(),
            (FieldName::DeepSuperficial, FieldValue::Text(v)) => {
                self.deep_superficial = v.clone()
            }
            (FieldName::Tags, FieldValue::Set(v)) => self.tags = v.clone(),
            (FieldName::GroundTruth, FieldValue::Set(v)) => self.ground_truth = v.clone(),
            (field, _) => return Err(kind_mismatch(field).into()),
        }
        Ok(())
    }

    fn record(&self) -> CellRecord {
        CellRecord {
            uid: self.uid,
            cell_type: self.cell_type.clone(),
            tags: self.tags.clone(),
            brain_region: self.brain_region.clone(),
            label: self.label.clone(),
            deep_superficial: self.deep_superficial.clone(),
            ground_truth: self.ground_truth.clone(),
        }
    }
}

/// Expected value kind for a field, as a validation error
pub(crate) fn kind_mismatch(field: FieldName) -> ValidationError {
    ValidationError::ValueKindMismatch {
        field: field.as_str(),
        expected: if field.is_set_valued() {
            "a set of strings"
        } else {
            "a single string"
        },
    }
}

/// One recording session (batch) of the loaded dataset
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub(crate) batch_id: BatchId,
    pub(crate) session_ref: SessionRef,
    pub(crate) metadata: serde_json::Value,
    pub(crate) cells: Vec<CellIndex>,
}

impl Session {
    pub fn batch_id(&self) -> BatchId {
        self.batch_id
    }

    pub fn session_ref(&self) -> &SessionRef {
        &self.session_ref
    }

    /// Session-scoped metadata (channel layout, binning), passed through untouched
    pub fn metadata(&self) -> &serde_json::Value {
        &self.metadata
    }

    pub fn cells(&self) -> &[CellIndex] {
        &self.cells
    }
}

/// Canonical cell attributes for every loaded session
#[derive(Debug, Clone, Default)]
pub struct CellStore {
    cells: Vec<Cell>,
    sessions: Vec<Session>,
}

impl CellStore {
    /// Assemble a store from loaded parts
    ///
    /// Cells must be ordered so that `cells[i].index == i + 1`; the dataset
    /// loader guarantees this.
    pub(crate) fn from_parts(cells: Vec<Cell>, sessions: Vec<Session>) -> Self {
        debug_assert!(cells
            .iter()
            .enumerate()
            .all(|(i, c)| c.index == CellIndex(i + 1)));
        debug!(
            "Cell store assembled: {} cells across {} sessions",
            cells.len(),
            sessions.len()
        );
        Self { cells, sessions }
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn batch_ids(&self) -> Vec<BatchId> {
        self.sessions.iter().map(|s| s.batch_id).collect()
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn session(&self, batch_id: BatchId) -> Result<&Session> {
        self.sessions
            .iter()
            .find(|s| s.batch_id == batch_id)
            .ok_or_else(|| CellCurateError::UnknownSession(batch_id.to_string()))
    }

    pub fn session_by_ref(&self, session_ref: &SessionRef) -> Result<&Session> {
        self.sessions
            .iter()
            .find(|s| &s.session_ref == session_ref)
            .ok_or_else(|| CellCurateError::UnknownSession(session_ref.to_string()))
    }

    /// Pass-through accessor for session-scoped metadata
    pub fn session_metadata(&self, batch_id: BatchId) -> Result<&serde_json::Value> {
        Ok(&self.session(batch_id)?.metadata)
    }

    /// Immutable view of one cell
    pub fn get(&self, index: CellIndex) -> Result<&Cell> {
        index
            .0
            .checked_sub(1)
            .and_then(|i| self.cells.get(i))
            .ok_or(CellCurateError::CellOutOfRange {
                index: index.0,
                count: self.cells.len(),
            })
    }

    pub fn contains(&self, index: CellIndex) -> bool {
        index.0 >= 1 && index.0 <= self.cells.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cell> {
        self.cells.iter()
    }

    pub fn indices(&self) -> impl Iterator<Item = CellIndex> + '_ {
        self.cells.iter().map(|c| c.index)
    }

    /// Bounds-check every index, failing on the first one out of range
    pub fn check_indices<'a, I>(&self, indices: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a CellIndex>,
    {
        for index in indices {
            self.get(*index)?;
        }
        Ok(())
    }

    /// Write one value into a field for every listed cell
    ///
    /// All indices are checked before the first write, so a failure leaves
    /// the store untouched.
    pub(crate) fn set_field(
        &mut self,
        indices: &[CellIndex],
        field: FieldName,
        value: &FieldValue,
    ) -> Result<()> {
        self.check_indices(indices)?;
        if field.is_set_valued() != value.as_set().is_some() {
            return Err(kind_mismatch(field).into());
        }
        for index in indices {
            self.cells[index.0 - 1].write(field, value)?;
        }
        Ok(())
    }

    /// Write a distinct value per cell (used to restore captured values)
    pub(crate) fn set_values(
        &mut self,
        field: FieldName,
        values: &[(CellIndex, FieldValue)],
    ) -> Result<()> {
        self.check_indices(values.iter().map(|(i, _)| i))?;
        if values
            .iter()
            .any(|(_, v)| field.is_set_valued() != v.as_set().is_some())
        {
            return Err(kind_mismatch(field).into());
        }
        for (index, value) in values {
            self.cells[index.0 - 1].write(field, value)?;
        }
        Ok(())
    }

    /// Serialize the current mutable fields of one session
    pub fn snapshot(&self, batch_id: BatchId) -> Result<SessionSnapshot> {
        let session = self.session(batch_id)?;
        let cells = session
            .cells
            .iter()
            .map(|idx| self.cells[idx.0 - 1].record())
            .collect();
        Ok(SessionSnapshot::new(session.session_ref.clone(), cells))
    }

    /// Global index of a session-local unit
    pub fn index_of_uid(&self, batch_id: BatchId, uid: u32) -> Option<CellIndex> {
        let session = self.session(batch_id).ok()?;
        session
            .cells
            .iter()
            .copied()
            .find(|idx| self.cells[idx.0 - 1].uid == uid)
    }

    /// Overlay persisted classification fields at load time
    ///
    /// Records whose UID is not part of the session are skipped. Returns the
    /// number of cells updated.
    pub(crate) fn overlay(&mut self, batch_id: BatchId, records: &[CellRecord]) -> Result<usize> {
        let session = self.session(batch_id)?;
        let by_uid: HashMap<u32, CellIndex> = session
            .cells
            .iter()
            .map(|idx| (self.cells[idx.0 - 1].uid, *idx))
            .collect();

        let mut applied = 0;
        for record in records {
            let Some(index) = by_uid.get(&record.uid) else {
                warn!(
                    "Persisted record for uid {} not present in batch {}",
                    record.uid, batch_id
                );
                continue;
            };
            let cell = &mut self.cells[index.0 - 1];
            cell.cell_type = record.cell_type.clone();
            cell.tags = record.tags.clone();
            cell.brain_region = record.brain_region.clone();
            cell.label = record.label.clone();
            cell.deep_superficial = record.deep_superficial.clone();
            cell.ground_truth = record.ground_truth.clone();
            applied += 1;
        }
        Ok(applied)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Build a cell with default classification fields
    pub fn cell(index: usize, batch: u32, uid: u32, cell_type: &str) -> Cell {
        Cell {
            index: CellIndex(index),
            batch_id: BatchId(batch),
            uid,
            cell_type: cell_type.to_string(),
            tags: BTreeSet::new(),
            brain_region: "Unknown".to_string(),
            label: String::new(),
            deep_superficial: "Unknown".to_string(),
            ground_truth: BTreeSet::new(),
            metrics: BTreeMap::new(),
        }
    }

    /// Single-session store with the given cell types
    pub fn store_with_types(types: &[&str]) -> CellStore {
        let cells: Vec<Cell> = types
            .iter()
            .enumerate()
            .map(|(i, t)| cell(i + 1, 1, i as u32 + 1, t))
            .collect();
        let session = Session {
            batch_id: BatchId(1),
            session_ref: SessionRef::new("session_1"),
            metadata: serde_json::json!({ "sr": 20000 }),
            cells: cells.iter().map(|c| c.index).collect(),
        };
        CellStore::from_parts(cells, vec![session])
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_get_bounds() {
        let store = store_with_types(&["A", "B"]);
        assert_eq!(store.get(CellIndex(1)).unwrap().cell_type(), "A");
        assert!(matches!(
            store.get(CellIndex(0)),
            Err(CellCurateError::CellOutOfRange { index: 0, count: 2 })
        ));
        assert!(store.get(CellIndex(3)).is_err());
    }

    #[test]
    fn test_set_field_is_all_or_nothing() {
        let mut store = store_with_types(&["A", "A", "A"]);
        let result = store.set_field(
            &[CellIndex(1), CellIndex(9)],
            FieldName::CellType,
            &FieldValue::text("B"),
        );
        assert!(result.is_err());
        assert_eq!(store.get(CellIndex(1)).unwrap().cell_type(), "A");

        store
            .set_field(&[CellIndex(1), CellIndex(3)], FieldName::CellType, &FieldValue::text("B"))
            .unwrap();
        let types: Vec<&str> = store.iter().map(|c| c.cell_type()).collect();
        assert_eq!(types, vec!["B", "A", "B"]);
    }

    #[test]
    fn test_set_field_rejects_kind_mismatch() {
        let mut store = store_with_types(&["A"]);
        let err = store
            .set_field(&[CellIndex(1)], FieldName::Tags, &FieldValue::text("Good"))
            .unwrap_err();
        assert!(matches!(err, CellCurateError::Validation(_)));
    }

    #[test]
    fn test_snapshot_and_overlay() {
        let mut store = store_with_types(&["A", "B"]);
        store
            .set_field(&[CellIndex(2)], FieldName::Label, &FieldValue::text("check"))
            .unwrap();
        let snapshot = store.snapshot(BatchId(1)).unwrap();
        assert_eq!(snapshot.cells.len(), 2);
        assert_eq!(snapshot.cells[1].label, "check");

        let mut fresh = store_with_types(&["A", "A"]);
        let applied = fresh.overlay(BatchId(1), &snapshot.cells).unwrap();
        assert_eq!(applied, 2);
        assert_eq!(fresh.get(CellIndex(2)).unwrap().cell_type(), "B");
        assert_eq!(fresh.get(CellIndex(2)).unwrap().label(), "check");
    }

    #[test]
    fn test_session_metadata_pass_through() {
        let store = store_with_types(&["A"]);
        assert_eq!(store.session_metadata(BatchId(1)).unwrap()["sr"], 20000);
        assert!(store.session_metadata(BatchId(2)).is_err());
        assert_eq!(store.index_of_uid(BatchId(1), 1), Some(CellIndex(1)));
    }
}
