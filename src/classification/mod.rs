//! Classification state: the only writer of the cell store
//!
//! Every edit goes through [`ClassificationState`], which validates it,
//! captures the values it is about to overwrite, pushes that capture onto
//! the undo history and only then writes to the store. Either the whole
//! capture-then-apply sequence happens or nothing does.
//!
//! The state also tracks which sessions carry unsaved edits, keeps a
//! per-session provenance log for persistence, and drives the periodic
//! autosave export.

pub mod history;
pub mod save;

use crate::config::AutosaveConfig;
use crate::error::{Result, ValidationError};
use crate::export::{DatasetExport, ExportSink};
use crate::storage::{ProvenanceAction, ProvenanceChange, ProvenanceEntry, SessionSnapshot};
use crate::store::{kind_mismatch, CellStore};
use crate::types::{BatchId, CellIndex, FieldName, FieldValue, SetOp};
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use history::{ClassificationEvent, History};
pub use save::{SaveMode, SaveReport, SessionSaveOutcome};

/// Outcome of [`ClassificationState::undo`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndoResult {
    /// The newest event was reverted
    Restored {
        restored_indices: Vec<CellIndex>,
        field: FieldName,
    },
    /// Only the baseline remains
    NoOp,
}

/// Outcome of one autosave tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutosaveOutcome {
    Disabled,
    /// Events still to go before the next export
    Pending { remaining: usize },
    /// Export written; `compacted` history events were dropped afterwards
    Exported { compacted: usize },
    Failed(String),
}

/// Mutation gateway over the cell store
pub struct ClassificationState {
    store: CellStore,
    history: History,
    touched: BTreeSet<BatchId>,
    provenance: BTreeMap<BatchId, Vec<ProvenanceEntry>>,
    autosave: AutosaveConfig,
    sink: Option<Box<dyn ExportSink>>,
    events_since_export: usize,
    event_count: usize,
}

impl std::fmt::Debug for ClassificationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassificationState")
            .field("cells", &self.store.cell_count())
            .field("history", &self.history.len())
            .field("touched", &self.touched)
            .field("event_count", &self.event_count)
            .finish()
    }
}

impl ClassificationState {
    /// Take ownership of a freshly loaded store; history starts at the baseline
    pub fn new(store: CellStore) -> Self {
        Self {
            store,
            history: History::new(),
            touched: BTreeSet::new(),
            provenance: BTreeMap::new(),
            autosave: AutosaveConfig {
                enabled: false,
                ..AutosaveConfig::default()
            },
            sink: None,
            events_since_export: 0,
            event_count: 0,
        }
    }

    /// Enable periodic export to `sink`
    pub fn with_autosave(mut self, config: AutosaveConfig, sink: Box<dyn ExportSink>) -> Self {
        self.set_autosave(config, sink);
        self
    }

    pub fn set_autosave(&mut self, config: AutosaveConfig, sink: Box<dyn ExportSink>) {
        self.autosave = config;
        self.sink = Some(sink);
        self.events_since_export = 0;
    }

    pub fn store(&self) -> &CellStore {
        &self.store
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// History entries including the baseline
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn event_count(&self) -> usize {
        self.event_count
    }

    /// Provenance log of one session, oldest first
    pub fn provenance(&self, batch_id: BatchId) -> &[ProvenanceEntry] {
        self.provenance
            .get(&batch_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Seed a session's provenance log from its persisted record
    pub(crate) fn load_provenance(&mut self, batch_id: BatchId, entries: Vec<ProvenanceEntry>) {
        self.provenance.insert(batch_id, entries);
    }

    /// Set `field` to `value` on every cell in `indices`
    pub fn assign(
        &mut self,
        indices: &BTreeSet<CellIndex>,
        field: FieldName,
        value: FieldValue,
    ) -> Result<()> {
        validate_value(field, &value)?;
        self.store.check_indices(indices)?;
        let value = normalize(value);

        let changed: Vec<CellIndex> = indices
            .iter()
            .copied()
            .filter(|i| self.store.get(*i).is_ok_and(|c| c.field(field) != value))
            .collect();
        let changes: Vec<(CellIndex, FieldValue)> =
            changed.iter().map(|i| (*i, value.clone())).collect();

        self.commit(
            field,
            indices.iter().copied().collect(),
            changes,
            Apply::Uniform(&value),
            ProvenanceAction::Assign,
        )
    }

    /// Add or remove one member of a set-valued field on every cell in `indices`
    pub fn update_set(
        &mut self,
        indices: &BTreeSet<CellIndex>,
        field: FieldName,
        op: SetOp,
        member: &str,
    ) -> Result<()> {
        if !field.is_set_valued() {
            return Err(kind_mismatch(field).into());
        }
        self.store.check_indices(indices)?;
        let member = member.trim();

        let mut changes = Vec::new();
        for &index in indices {
            let current = self.store.get(index)?.field(field);
            let Some(set) = current.as_set() else {
                continue;
            };
            let mut next = set.clone();
            let changed = match op {
                SetOp::Add => next.insert(member.to_string()),
                SetOp::Remove => next.remove(member),
            };
            if changed {
                changes.push((index, FieldValue::Set(next)));
            }
        }

        self.commit(
            field,
            indices.iter().copied().collect(),
            changes,
            Apply::PerCell,
            ProvenanceAction::Assign,
        )
    }

    /// Revert the newest event
    pub fn undo(&mut self) -> Result<UndoResult> {
        let Some(event) = self.history.pop() else {
            debug!("Undo requested with only the baseline in history");
            return Ok(UndoResult::NoOp);
        };

        let mut current = Vec::with_capacity(event.previous.len());
        for (index, _) in &event.previous {
            match self.store.get(*index) {
                Ok(cell) => current.push(cell.field(event.field)),
                Err(err) => {
                    self.history.push(event);
                    return Err(err);
                }
            }
        }
        if let Err(err) = self.store.set_values(event.field, &event.previous) {
            self.history.push(event);
            return Err(err);
        }

        let changes = event
            .previous
            .iter()
            .zip(current)
            .map(|((index, old), cur)| (*index, cur, old.clone()))
            .collect();
        self.record_provenance(event.field, ProvenanceAction::Undo, changes);
        self.mark_touched(&event.targets);
        self.event_count += 1;

        info!(
            "Undid {} edit on {} cells ({} changed)",
            event.field,
            event.targets.len(),
            event.previous.len()
        );
        self.autosave_tick();
        Ok(UndoResult::Restored {
            restored_indices: event.targets,
            field: event.field,
        })
    }

    /// Apply a persisted snapshot to one session, one event per changed field
    ///
    /// Returns the fields that changed. Records for UIDs outside the
    /// session are skipped.
    pub fn apply_snapshot(
        &mut self,
        batch_id: BatchId,
        snapshot: &SessionSnapshot,
    ) -> Result<Vec<FieldName>> {
        let mut per_field: BTreeMap<FieldName, Vec<(CellIndex, FieldValue)>> = BTreeMap::new();
        for record in &snapshot.cells {
            let Some(index) = self.store.index_of_uid(batch_id, record.uid) else {
                warn!("Snapshot uid {} not in batch {}", record.uid, batch_id);
                continue;
            };
            let cell = self.store.get(index)?;
            let incoming = [
                (FieldName::CellType, FieldValue::Text(record.cell_type.clone())),
                (FieldName::Tags, FieldValue::Set(record.tags.clone())),
                (FieldName::BrainRegion, FieldValue::Text(record.brain_region.clone())),
                (FieldName::Label, FieldValue::Text(record.label.clone())),
                (
                    FieldName::DeepSuperficial,
                    FieldValue::Text(record.deep_superficial.clone()),
                ),
                (FieldName::GroundTruth, FieldValue::Set(record.ground_truth.clone())),
            ];
            for (field, value) in incoming {
                validate_value(field, &value)?;
                if cell.field(field) != value {
                    per_field.entry(field).or_default().push((index, value));
                }
            }
        }

        let mut changed = Vec::new();
        for (field, changes) in per_field {
            let targets = changes.iter().map(|(i, _)| *i).collect();
            self.commit(field, targets, changes, Apply::PerCell, ProvenanceAction::Restore)?;
            changed.push(field);
        }
        Ok(changed)
    }

    /// Record the sessions owning `indices` as having unsaved edits
    pub fn mark_touched(&mut self, indices: &[CellIndex]) {
        for index in indices {
            if let Ok(cell) = self.store.get(*index) {
                self.touched.insert(cell.batch_id());
            }
        }
    }

    /// Sessions with at least one event since their last successful save
    pub fn touched_batch_ids(&self) -> &BTreeSet<BatchId> {
        &self.touched
    }

    /// Count one mutating event and export every Nth
    ///
    /// `assign`, `update_set`, `undo` and `apply_snapshot` call this
    /// themselves after each event.
    pub fn autosave_tick(&mut self) -> AutosaveOutcome {
        if !self.autosave.enabled || self.sink.is_none() {
            return AutosaveOutcome::Disabled;
        }
        let every = self.autosave.every_n_events.max(1);
        self.events_since_export += 1;
        if self.events_since_export < every {
            return AutosaveOutcome::Pending {
                remaining: every - self.events_since_export,
            };
        }
        self.events_since_export = 0;

        let export = match self.dataset_export() {
            Ok(export) => export,
            Err(err) => {
                warn!("Autosave snapshot failed: {}", err);
                return AutosaveOutcome::Failed(err.to_string());
            }
        };
        let result = match self.sink.as_mut() {
            Some(sink) => sink.export(&export),
            None => return AutosaveOutcome::Disabled,
        };
        match result {
            Ok(()) => {
                let compacted = self
                    .autosave
                    .compact_history_to
                    .map(|keep| self.history.compact(keep))
                    .unwrap_or(0);
                debug!(
                    "Autosave exported after {} events (compacted {})",
                    self.event_count, compacted
                );
                AutosaveOutcome::Exported { compacted }
            }
            Err(err) => {
                warn!("Autosave export failed: {}", err);
                AutosaveOutcome::Failed(err.to_string())
            }
        }
    }

    /// Current state of every session, with provenance
    pub fn dataset_export(&self) -> Result<DatasetExport> {
        let sessions = self
            .store
            .batch_ids()
            .into_iter()
            .map(|b| self.session_snapshot(b))
            .collect::<Result<_>>()?;
        Ok(DatasetExport {
            exported_at: Utc::now(),
            event_count: self.event_count,
            sessions,
        })
    }

    /// Persistable record of one session
    pub fn session_snapshot(&self, batch_id: BatchId) -> Result<SessionSnapshot> {
        Ok(self
            .store
            .snapshot(batch_id)?
            .with_provenance(self.provenance(batch_id).to_vec()))
    }

    /// Capture, push, apply; roll the push back if the write is rejected
    fn commit(
        &mut self,
        field: FieldName,
        targets: Vec<CellIndex>,
        changes: Vec<(CellIndex, FieldValue)>,
        apply: Apply<'_>,
        action: ProvenanceAction,
    ) -> Result<()> {
        if targets.is_empty() {
            return Ok(());
        }

        let previous: Vec<(CellIndex, FieldValue)> = changes
            .iter()
            .map(|(i, _)| self.store.get(*i).map(|c| (*i, c.field(field))))
            .collect::<Result<_>>()?;
        self.history
            .push(ClassificationEvent::new(field, targets.clone(), previous.clone()));

        let written = match apply {
            Apply::Uniform(value) => {
                let indices: Vec<CellIndex> = changes.iter().map(|(i, _)| *i).collect();
                self.store.set_field(&indices, field, value)
            }
            Apply::PerCell => self.store.set_values(field, &changes),
        };
        if let Err(err) = written {
            self.history.pop();
            return Err(err);
        }

        let diff = previous
            .into_iter()
            .zip(changes)
            .map(|((index, old), (_, new))| (index, old, new))
            .collect();
        self.record_provenance(field, action, diff);
        self.mark_touched(&targets);
        self.event_count += 1;

        debug!(
            "{:?} {} on {} cells (history depth {})",
            action,
            field,
            targets.len(),
            self.history.depth()
        );
        self.autosave_tick();
        Ok(())
    }

    /// Append one provenance entry per affected session, sharing one id
    fn record_provenance(
        &mut self,
        field: FieldName,
        action: ProvenanceAction,
        changes: Vec<(CellIndex, FieldValue, FieldValue)>,
    ) {
        let mut per_batch: BTreeMap<BatchId, Vec<ProvenanceChange>> = BTreeMap::new();
        for (index, old, new) in changes {
            let Ok(cell) = self.store.get(index) else {
                continue;
            };
            per_batch
                .entry(cell.batch_id())
                .or_default()
                .push(ProvenanceChange {
                    uid: cell.uid(),
                    old,
                    new,
                });
        }

        let id = Uuid::new_v4();
        let timestamp = Utc::now();
        for (batch, changes) in per_batch {
            self.provenance.entry(batch).or_default().push(ProvenanceEntry {
                id,
                timestamp,
                action,
                field,
                changes,
            });
        }
    }
}

/// How a commit writes its changes
enum Apply<'a> {
    /// Same value for every changed cell (`CellStore::set_field`)
    Uniform(&'a FieldValue),
    /// Distinct value per cell (`CellStore::set_values`)
    PerCell,
}

fn validate_value(field: FieldName, value: &FieldValue) -> std::result::Result<(), ValidationError> {
    if field.is_set_valued() != value.as_set().is_some() {
        return Err(kind_mismatch(field));
    }
    if field == FieldName::CellType && value.as_text().is_some_and(|t| t.trim().is_empty()) {
        return Err(ValidationError::EmptyCellType);
    }
    Ok(())
}

fn normalize(value: FieldValue) -> FieldValue {
    match value {
        FieldValue::Text(t) => FieldValue::Text(t.trim().to_string()),
        FieldValue::Set(s) => FieldValue::Set(
            s.into_iter()
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CellCurateError;
    use crate::export::MockExportSink;
    use crate::store::test_support::store_with_types;

    fn cells(ids: &[usize]) -> BTreeSet<CellIndex> {
        ids.iter().map(|&i| CellIndex(i)).collect()
    }

    fn ten_cells() -> ClassificationState {
        ClassificationState::new(store_with_types(&[
            "A", "A", "B", "B", "A", "A", "A", "A", "A", "A",
        ]))
    }

    fn type_of(state: &ClassificationState, i: usize) -> String {
        state.store().get(CellIndex(i)).unwrap().cell_type().to_string()
    }

    #[test]
    fn test_assign_then_undo_restores_type_and_depth() {
        let mut state = ten_cells();
        assert_eq!(state.history_len(), 1);

        state
            .assign(&cells(&[1]), FieldName::CellType, FieldValue::text("B"))
            .unwrap();
        assert_eq!(type_of(&state, 1), "B");
        assert_eq!(state.history_len(), 2);

        let result = state.undo().unwrap();
        assert_eq!(
            result,
            UndoResult::Restored {
                restored_indices: vec![CellIndex(1)],
                field: FieldName::CellType
            }
        );
        assert_eq!(type_of(&state, 1), "A");
        assert_eq!(state.history_len(), 1);
    }

    #[test]
    fn test_undo_underflow_is_noop() {
        let mut state = ten_cells();
        assert_eq!(state.undo().unwrap(), UndoResult::NoOp);
        assert_eq!(state.history_len(), 1);
    }

    #[test]
    fn test_event_captures_only_changed_cells() {
        let mut state = ten_cells();
        state
            .assign(&cells(&[1, 3, 4]), FieldName::CellType, FieldValue::text("B"))
            .unwrap();
        let event = state.history().last().unwrap();
        assert_eq!(event.targets, vec![CellIndex(1), CellIndex(3), CellIndex(4)]);
        assert_eq!(event.previous, vec![(CellIndex(1), FieldValue::text("A"))]);
    }

    #[test]
    fn test_failed_validation_leaves_store_untouched() {
        let mut state = ten_cells();
        let err = state
            .assign(&cells(&[1, 11]), FieldName::CellType, FieldValue::text("B"))
            .unwrap_err();
        assert!(matches!(err, CellCurateError::CellOutOfRange { index: 11, .. }));
        assert_eq!(type_of(&state, 1), "A");
        assert_eq!(state.history_len(), 1);
        assert!(state.touched_batch_ids().is_empty());

        let err = state
            .assign(&cells(&[1]), FieldName::CellType, FieldValue::text("  "))
            .unwrap_err();
        assert!(matches!(
            err,
            CellCurateError::Validation(ValidationError::EmptyCellType)
        ));

        let err = state
            .assign(&cells(&[1]), FieldName::Label, FieldValue::set(["x"]))
            .unwrap_err();
        assert!(matches!(
            err,
            CellCurateError::Validation(ValidationError::ValueKindMismatch { .. })
        ));
        assert_eq!(state.history_len(), 1);
    }

    #[test]
    fn test_tag_add_remove_and_undo() {
        let mut state = ten_cells();
        state
            .update_set(&cells(&[1, 2]), FieldName::Tags, SetOp::Add, "Good")
            .unwrap();
        state
            .update_set(&cells(&[2]), FieldName::Tags, SetOp::Add, "Bursty")
            .unwrap();
        state
            .update_set(&cells(&[1]), FieldName::Tags, SetOp::Remove, "Good")
            .unwrap();

        let tags = |s: &ClassificationState, i| s.store().get(CellIndex(i)).unwrap().tags().clone();
        assert!(tags(&state, 1).is_empty());
        assert_eq!(tags(&state, 2).len(), 2);

        state.undo().unwrap();
        assert!(tags(&state, 1).contains("Good"));
        state.undo().unwrap();
        assert_eq!(tags(&state, 2).len(), 1);

        let err = state
            .update_set(&cells(&[1]), FieldName::Label, SetOp::Add, "x")
            .unwrap_err();
        assert!(matches!(err, CellCurateError::Validation(_)));
    }

    #[test]
    fn test_history_reconstructs_past_values() {
        let mut state = ten_cells();
        for t in ["B", "C", "D"] {
            state
                .assign(&cells(&[5]), FieldName::CellType, FieldValue::text(t))
                .unwrap();
        }
        let past: Vec<String> = state
            .history()
            .past_values(CellIndex(5), FieldName::CellType)
            .into_iter()
            .map(|v| v.to_string())
            .collect();
        assert_eq!(past, vec!["C", "B", "A"]);
    }

    #[test]
    fn test_touched_and_provenance() {
        let mut state = ten_cells();
        state
            .assign(&cells(&[2]), FieldName::BrainRegion, FieldValue::text("CA1"))
            .unwrap();
        state.undo().unwrap();

        assert_eq!(state.touched_batch_ids(), &BTreeSet::from([BatchId(1)]));
        let log = state.provenance(BatchId(1));
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].action, ProvenanceAction::Assign);
        assert_eq!(log[0].changes[0].new, FieldValue::text("CA1"));
        assert_eq!(log[1].action, ProvenanceAction::Undo);
        assert_eq!(log[1].changes[0].new, FieldValue::text("Unknown"));
        assert!(!log[0].id.is_nil());
        assert_ne!(log[0].id, log[1].id);
    }

    #[test]
    fn test_autosave_every_n_events() {
        let mut sink = MockExportSink::new();
        sink.expect_export()
            .times(2)
            .returning(|export| {
                assert_eq!(export.sessions.len(), 1);
                Ok(())
            });
        let config = AutosaveConfig {
            enabled: true,
            every_n_events: 3,
            export_dir: None,
            compact_history_to: Some(1),
        };
        let mut state = ten_cells().with_autosave(config, Box::new(sink));

        for i in 1..=6 {
            state
                .assign(&cells(&[i]), FieldName::Label, FieldValue::text("seen"))
                .unwrap();
        }
        // compaction after each export keeps one event above the baseline
        assert_eq!(state.history_len(), 2);
        assert_eq!(state.event_count(), 6);
    }

    #[test]
    fn test_autosave_failure_does_not_fail_assign() {
        let mut sink = MockExportSink::new();
        sink.expect_export()
            .times(1)
            .returning(|_| Err(CellCurateError::Other("disk full".into())));
        let config = AutosaveConfig {
            enabled: true,
            every_n_events: 1,
            ..AutosaveConfig::default()
        };
        let mut state = ten_cells().with_autosave(config, Box::new(sink));
        state
            .assign(&cells(&[1]), FieldName::Label, FieldValue::text("x"))
            .unwrap();
        assert_eq!(state.history_len(), 2);
    }

    #[test]
    fn test_apply_snapshot_creates_event_per_field() {
        let mut state = ten_cells();
        let mut snapshot = state.session_snapshot(BatchId(1)).unwrap();
        snapshot.cells[0].cell_type = "Z".into();
        snapshot.cells[1].label = "restored".into();
        snapshot.cells[2].label = "restored".into();

        let changed = state.apply_snapshot(BatchId(1), &snapshot).unwrap();
        assert_eq!(changed, vec![FieldName::CellType, FieldName::Label]);
        assert_eq!(type_of(&state, 1), "Z");
        assert_eq!(state.history_len(), 3);
        assert_eq!(
            state.provenance(BatchId(1)).last().unwrap().action,
            ProvenanceAction::Restore
        );

        state.undo().unwrap();
        state.undo().unwrap();
        assert_eq!(type_of(&state, 1), "A");
    }
}
