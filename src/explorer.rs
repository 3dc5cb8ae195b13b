//! Explicit context object for one interactive curation session
//!
//! [`Explorer`] owns the classification state (and through it the cell
//! store), the connectivity graph and the subset resolver, plus the
//! interaction state a shell tracks between calls: the focused cell, the
//! connectivity display mode, the followed polarities and the last
//! resolution. Every filter setter re-resolves the active subset; every
//! focus or mode change recomputes the connectivity outputs against it.

use crate::attributes::AttributeRegistry;
use crate::classification::{AutosaveOutcome, ClassificationState, SaveMode, SaveReport, UndoResult};
use crate::config::CurateConfig;
use crate::connectivity::{ConnectivityGraph, ConnectivityView, Edge, ReplaceReport};
use crate::dataset::LoadedDataset;
use crate::error::{CellCurateError, Result, ValidationError};
use crate::export::JsonExportSink;
use crate::filter::{Resolution, SubsetResolver};
use crate::storage::{BackupId, PersistenceGateway};
use crate::store::CellStore;
use crate::types::{
    BatchId, CellIndex, DisplayMode, FieldName, FieldValue, Polarities, SessionRef, SetOp,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

pub struct Explorer {
    state: ClassificationState,
    graph: ConnectivityGraph,
    resolver: SubsetResolver,
    resolution: Resolution,
    view: ConnectivityView,
    focus: Option<CellIndex>,
    mode: DisplayMode,
    polarities: Polarities,
    max_hops: usize,
}

impl Explorer {
    /// Wrap a loaded dataset with default connectivity settings and no autosave
    pub fn new(loaded: LoadedDataset) -> Self {
        let registry = AttributeRegistry::build(&loaded.store);
        let mut state = ClassificationState::new(loaded.store);
        for (batch_id, entries) in loaded.provenance {
            state.load_provenance(batch_id, entries);
        }

        let mut explorer = Self {
            state,
            graph: loaded.graph,
            resolver: SubsetResolver::new(registry),
            resolution: Resolution::default(),
            view: ConnectivityView::default(),
            focus: None,
            mode: DisplayMode::default(),
            polarities: Polarities::BOTH,
            max_hops: crate::connectivity::DEFAULT_MAX_HOPS,
        };
        explorer.refresh();
        explorer
    }

    /// Wrap a loaded dataset using the connectivity and autosave sections of `config`
    pub fn configured(loaded: LoadedDataset, config: &CurateConfig) -> Result<Self> {
        let mut explorer = Self::new(loaded);
        explorer.mode = config.connectivity.default_mode;
        explorer.polarities = config.connectivity.polarity.into();
        explorer.max_hops = config.connectivity.max_hops;

        if config.autosave.enabled {
            if let Some(dir) = &config.autosave.export_dir {
                let sink = JsonExportSink::new(dir)?;
                explorer
                    .state
                    .set_autosave(config.autosave.clone(), Box::new(sink));
                debug!("Autosave export enabled in {}", dir.display());
            }
        }
        explorer.refresh();
        Ok(explorer)
    }

    pub fn store(&self) -> &CellStore {
        self.state.store()
    }

    pub fn classification(&self) -> &ClassificationState {
        &self.state
    }

    pub fn graph(&self) -> &ConnectivityGraph {
        &self.graph
    }

    pub fn resolver(&self) -> &SubsetResolver {
        &self.resolver
    }

    /// Result of the most recent resolution
    pub fn resolution(&self) -> &Resolution {
        &self.resolution
    }

    /// Connectivity outputs for the current focus and mode
    pub fn view(&self) -> &ConnectivityView {
        &self.view
    }

    pub fn focus(&self) -> Option<CellIndex> {
        self.focus
    }

    pub fn mode(&self) -> DisplayMode {
        self.mode
    }

    // Filters

    pub fn set_class_filter(&mut self, classes: Option<BTreeSet<String>>) -> &Resolution {
        self.resolver.set_class_filter(classes);
        self.refresh()
    }

    pub fn set_tag_filter(
        &mut self,
        include: BTreeSet<String>,
        exclude: BTreeSet<String>,
    ) -> &Resolution {
        self.resolver.set_tag_filter(include, exclude);
        self.refresh()
    }

    /// Rejected clauses are reported in the resolution's diagnostics
    pub fn set_text_filter(&mut self, text: &str) -> &Resolution {
        self.resolver.set_text_filter(text);
        self.refresh()
    }

    pub fn set_group_filter(
        &mut self,
        attribute: &str,
        values: BTreeSet<String>,
    ) -> std::result::Result<&Resolution, ValidationError> {
        self.resolver.set_group_filter(attribute, values)?;
        Ok(self.refresh())
    }

    pub fn clear_group_filter(&mut self) -> &Resolution {
        self.resolver.clear_group_filter();
        self.refresh()
    }

    pub fn set_compare_mode(&mut self, enabled: bool) -> &Resolution {
        self.resolver.set_compare_mode(enabled);
        self.refresh()
    }

    /// Recompute the active subset without changing any predicate
    pub fn resolve_subset(&mut self) -> &Resolution {
        self.refresh()
    }

    /// Cell count per displayed class over the active subset
    pub fn class_counts(&self) -> BTreeMap<String, usize> {
        self.resolution.class_counts(self.state.store())
    }

    // Connectivity

    pub fn set_focus(&mut self, cell: CellIndex) -> Result<&ConnectivityView> {
        self.state.store().get(cell)?;
        self.focus = Some(cell);
        Ok(self.recompute_view())
    }

    pub fn set_connectivity_mode(&mut self, mode: DisplayMode) -> &ConnectivityView {
        self.mode = mode;
        self.recompute_view()
    }

    pub fn set_polarities(&mut self, polarities: Polarities) -> &ConnectivityView {
        self.polarities = polarities;
        self.recompute_view()
    }

    pub fn set_max_hops(&mut self, max_hops: usize) -> &ConnectivityView {
        self.max_hops = max_hops.max(1);
        self.recompute_view()
    }

    /// Move the focus to the next active cell, wrapping at the end
    pub fn next_cell(&mut self) -> Option<CellIndex> {
        self.step_focus(true)
    }

    /// Move the focus to the previous active cell, wrapping at the start
    pub fn previous_cell(&mut self) -> Option<CellIndex> {
        self.step_focus(false)
    }

    /// Swap one session's connections and re-resolve
    pub fn replace_connections(
        &mut self,
        excitatory: Vec<Edge>,
        inhibitory: Vec<Edge>,
        scope: BatchId,
    ) -> Result<ReplaceReport> {
        let report =
            self.graph
                .replace_connections(excitatory, inhibitory, scope, self.state.store())?;
        self.refresh();
        Ok(report)
    }

    // Classification

    pub fn assign_cell_type(&mut self, cells: &BTreeSet<CellIndex>, cell_type: &str) -> Result<()> {
        self.assign(cells, FieldName::CellType, FieldValue::text(cell_type))
    }

    pub fn assign_tag(&mut self, cells: &BTreeSet<CellIndex>, op: SetOp, tag: &str) -> Result<()> {
        self.state.update_set(cells, FieldName::Tags, op, tag)?;
        self.refresh();
        Ok(())
    }

    pub fn assign_label(&mut self, cells: &BTreeSet<CellIndex>, label: &str) -> Result<()> {
        self.assign(cells, FieldName::Label, FieldValue::text(label))
    }

    pub fn assign_brain_region(&mut self, cells: &BTreeSet<CellIndex>, region: &str) -> Result<()> {
        self.assign(cells, FieldName::BrainRegion, FieldValue::text(region))
    }

    pub fn assign_deep_superficial(
        &mut self,
        cells: &BTreeSet<CellIndex>,
        layer: &str,
    ) -> Result<()> {
        self.assign(cells, FieldName::DeepSuperficial, FieldValue::text(layer))
    }

    pub fn assign_ground_truth(
        &mut self,
        cells: &BTreeSet<CellIndex>,
        op: SetOp,
        class: &str,
    ) -> Result<()> {
        self.state.update_set(cells, FieldName::GroundTruth, op, class)?;
        self.refresh();
        Ok(())
    }

    /// Generic assignment by field
    pub fn assign(
        &mut self,
        cells: &BTreeSet<CellIndex>,
        field: FieldName,
        value: FieldValue,
    ) -> Result<()> {
        self.state.assign(cells, field, value)?;
        self.refresh();
        Ok(())
    }

    /// Revert the newest edit and focus the first restored cell
    pub fn undo(&mut self) -> Result<UndoResult> {
        let result = self.state.undo()?;
        if let UndoResult::Restored {
            restored_indices, ..
        } = &result
        {
            if let Some(first) = restored_indices.first() {
                self.focus = Some(*first);
            }
            self.refresh();
        }
        Ok(result)
    }

    pub fn save<G>(&mut self, mode: SaveMode, gateway: &G) -> SaveReport
    where
        G: PersistenceGateway + ?Sized,
    {
        self.state.save(mode, gateway)
    }

    /// Apply a stored revision of a session through the undo history
    ///
    /// Every field that differs becomes one undoable event. Returns the
    /// changed fields.
    pub fn restore_from_backup<G>(
        &mut self,
        session: &SessionRef,
        backup: &BackupId,
        gateway: &G,
    ) -> Result<Vec<FieldName>>
    where
        G: PersistenceGateway + ?Sized,
    {
        let batch_id = self.state.store().session_by_ref(session)?.batch_id();
        let snapshot = gateway.restore(session, backup)?;
        if snapshot.session != *session {
            return Err(CellCurateError::Other(format!(
                "Backup {} belongs to session {}, not {}",
                backup, snapshot.session, session
            )));
        }
        let changed = self.state.apply_snapshot(batch_id, &snapshot)?;
        info!(
            "Restored {} fields of session {} from backup {}",
            changed.len(),
            session,
            backup
        );
        self.refresh();
        Ok(changed)
    }

    /// Count one externally driven event towards autosave
    pub fn autosave_tick(&mut self) -> AutosaveOutcome {
        self.state.autosave_tick()
    }

    fn refresh(&mut self) -> &Resolution {
        self.resolution = self.resolver.resolve(self.state.store(), &self.graph);
        debug!("Active subset: {} cells", self.resolution.len());
        self.recompute_view();
        &self.resolution
    }

    fn recompute_view(&mut self) -> &ConnectivityView {
        self.view = self.graph.view(
            self.focus,
            self.mode,
            self.polarities,
            self.max_hops,
            &self.resolution.cells,
        );
        &self.view
    }

    fn step_focus(&mut self, forward: bool) -> Option<CellIndex> {
        let next = self.resolution.step(self.focus, forward)?;
        self.focus = Some(next);
        self.recompute_view();
        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Dataset;
    use crate::storage::{JsonFileGateway, MockPersistenceGateway};
    use crate::types::SynapticEffect;
    use tempfile::TempDir;

    const DATASET: &str = r#"{
        "sessions": [
            {
                "name": "s1",
                "cells": [
                    { "uid": 1, "cell_type": "Pyramidal Cell", "tags": ["Good"], "metrics": { "firingRate": 2.0 } },
                    { "uid": 2, "cell_type": "Pyramidal Cell", "metrics": { "firingRate": 8.0 } },
                    { "uid": 3, "cell_type": "Narrow Interneuron", "tags": ["Bad"], "metrics": { "firingRate": 30.0 } },
                    { "uid": 4, "cell_type": "Wide Interneuron", "metrics": { "firingRate": 12.0 } }
                ],
                "connections": { "excitatory": [[1, 2], [2, 3], [3, 4]], "inhibitory": [] }
            },
            {
                "name": "s2",
                "cells": [
                    { "uid": 1, "cell_type": "Pyramidal Cell", "metrics": { "firingRate": 4.0 } }
                ]
            }
        ]
    }"#;

    fn explorer() -> Explorer {
        Explorer::new(Dataset::from_json(DATASET).unwrap().load().unwrap())
    }

    fn cells(ids: &[usize]) -> BTreeSet<CellIndex> {
        ids.iter().map(|&i| CellIndex(i)).collect()
    }

    #[test]
    fn test_filters_resolve_in_order() {
        let mut explorer = explorer();
        assert_eq!(explorer.resolution().len(), 5);

        let classes = BTreeSet::from(["Pyramidal Cell".to_string()]);
        assert_eq!(explorer.set_class_filter(Some(classes)).cells, cells(&[1, 2, 5]));

        let resolution = explorer.set_text_filter(".firingRate > 3");
        assert_eq!(resolution.cells, cells(&[2, 5]));

        let resolution = explorer.set_text_filter(".noSuchMetric > 3");
        assert_eq!(resolution.cells, cells(&[1, 2, 5]));
        assert_eq!(resolution.diagnostics.len(), 1);

        explorer.set_class_filter(None);
        explorer.set_text_filter("");
        let exclude = BTreeSet::from(["Bad".to_string()]);
        let resolution = explorer.set_tag_filter(BTreeSet::new(), exclude);
        assert!(!resolution.contains(CellIndex(3)));
    }

    #[test]
    fn test_compare_mode_is_transient() {
        let mut explorer = explorer();
        explorer.set_class_filter(Some(BTreeSet::from(["Wide Interneuron".to_string()])));
        let counts = {
            explorer.set_compare_mode(true);
            explorer.class_counts()
        };
        assert_eq!(counts.get("group 2"), Some(&1));
        assert_eq!(counts.get("group 1"), Some(&4));

        explorer.set_compare_mode(false);
        let counts = explorer.class_counts();
        assert_eq!(counts.get("Wide Interneuron"), Some(&1));
        assert_eq!(
            explorer.store().get(CellIndex(4)).unwrap().cell_type(),
            "Wide Interneuron"
        );
    }

    #[test]
    fn test_group_filter_on_derived_attribute() {
        let mut explorer = explorer();
        let values = BTreeSet::from([SynapticEffect::Excitatory.as_str().to_string()]);
        let resolution = explorer.set_group_filter("synapticEffect", values).unwrap();
        assert_eq!(resolution.cells, cells(&[1, 2, 3]));

        assert!(matches!(
            explorer.set_group_filter("noSuchField", BTreeSet::new()),
            Err(ValidationError::UnknownAttribute(_))
        ));
    }

    #[test]
    fn test_focus_and_modes_follow_active_subset() {
        let mut explorer = explorer();
        explorer.set_connectivity_mode(DisplayMode::Downstream);
        let view = explorer.set_focus(CellIndex(1)).unwrap();
        assert_eq!(view.cells, cells(&[2, 3, 4]));

        // dropping cell 3 cuts the chain
        explorer.set_tag_filter(BTreeSet::new(), BTreeSet::from(["Bad".to_string()]));
        assert_eq!(explorer.view().cells, cells(&[2]));

        assert!(explorer.set_focus(CellIndex(9)).is_err());
        assert!(explorer.set_connectivity_mode(DisplayMode::None).is_empty());
    }

    #[test]
    fn test_next_previous_wrap() {
        let mut explorer = explorer();
        explorer.set_class_filter(Some(BTreeSet::from(["Pyramidal Cell".to_string()])));
        assert_eq!(explorer.next_cell(), Some(CellIndex(1)));
        assert_eq!(explorer.next_cell(), Some(CellIndex(2)));
        assert_eq!(explorer.next_cell(), Some(CellIndex(5)));
        assert_eq!(explorer.next_cell(), Some(CellIndex(1)));
        assert_eq!(explorer.previous_cell(), Some(CellIndex(5)));
    }

    #[test]
    fn test_assign_resolves_and_undo_refocuses() {
        let mut explorer = explorer();
        explorer.set_class_filter(Some(BTreeSet::from(["Pyramidal Cell".to_string()])));
        explorer
            .assign_cell_type(&cells(&[2]), "Wide Interneuron")
            .unwrap();
        assert_eq!(explorer.resolution().cells, cells(&[1, 5]));

        let result = explorer.undo().unwrap();
        assert!(matches!(result, UndoResult::Restored { .. }));
        assert_eq!(explorer.focus(), Some(CellIndex(2)));
        assert_eq!(explorer.resolution().cells, cells(&[1, 2, 5]));
        assert_eq!(explorer.undo().unwrap(), UndoResult::NoOp);
    }

    #[test]
    fn test_tag_and_ground_truth_assignment() {
        let mut explorer = explorer();
        explorer
            .assign_tag(&cells(&[2, 4]), SetOp::Add, "Bursty")
            .unwrap();
        explorer
            .assign_ground_truth(&cells(&[4]), SetOp::Add, "PV+")
            .unwrap();
        explorer.assign_label(&cells(&[4]), "checked").unwrap();
        explorer.assign_brain_region(&cells(&[4]), "CA1").unwrap();
        explorer.assign_deep_superficial(&cells(&[4]), "Deep").unwrap();

        let resolution = explorer.set_tag_filter(BTreeSet::from(["Bursty".to_string()]), BTreeSet::new());
        assert_eq!(resolution.cells, cells(&[2, 4]));
        let cell = explorer.store().get(CellIndex(4)).unwrap();
        assert!(cell.ground_truth().contains("PV+"));
        assert_eq!(cell.label(), "checked");
        assert_eq!(explorer.classification().history_len(), 6);
        assert_eq!(
            explorer.classification().touched_batch_ids(),
            &BTreeSet::from([BatchId(1)])
        );
    }

    #[test]
    fn test_replace_connections_reresolves_derived_attributes() {
        let mut explorer = explorer();
        explorer.set_text_filter(".synapticConnectionsOut > 0");
        assert_eq!(explorer.resolution().cells, cells(&[1, 2, 3]));

        let report = explorer
            .replace_connections(vec![(CellIndex(4), CellIndex(1))], vec![], BatchId(1))
            .unwrap();
        assert_eq!(report.removed, 3);
        assert_eq!(explorer.resolution().cells, cells(&[4]));
    }

    #[test]
    fn test_save_and_restore_from_backup() {
        let dir = TempDir::new().unwrap();
        let gateway = JsonFileGateway::new(dir.path()).unwrap();
        let mut explorer = explorer();
        let session = SessionRef::new("s1");

        explorer.assign_cell_type(&cells(&[1]), "Unknown").unwrap();
        assert!(explorer.save(SaveMode::TouchedOnly, &gateway).is_success());

        explorer.assign_cell_type(&cells(&[1]), "Wide Interneuron").unwrap();
        let report = explorer.save(SaveMode::TouchedOnly, &gateway);
        let backup = report.outcomes[0].result.clone().unwrap().unwrap();

        let changed = explorer
            .restore_from_backup(&session, &backup, &gateway)
            .unwrap();
        assert_eq!(changed, vec![FieldName::CellType]);
        assert_eq!(
            explorer.store().get(CellIndex(1)).unwrap().cell_type(),
            "Unknown"
        );
        assert!(explorer
            .classification()
            .touched_batch_ids()
            .contains(&BatchId(1)));

        // the restore itself is undoable
        explorer.undo().unwrap();
        assert_eq!(
            explorer.store().get(CellIndex(1)).unwrap().cell_type(),
            "Wide Interneuron"
        );
    }

    #[test]
    fn test_restore_rejects_unknown_session() {
        let mut explorer = explorer();
        let gateway = MockPersistenceGateway::new();
        let err = explorer
            .restore_from_backup(&SessionRef::new("nope"), &BackupId("x".into()), &gateway)
            .unwrap_err();
        assert!(matches!(err, CellCurateError::UnknownSession(_)));
    }

    #[test]
    fn test_configured_with_autosave_dir() {
        let dir = TempDir::new().unwrap();
        let mut config = CurateConfig::default();
        config.autosave.every_n_events = 1;
        config.autosave.export_dir = Some(dir.path().join("autosave"));
        config.connectivity.default_mode = DisplayMode::All;

        let mut explorer =
            Explorer::configured(Dataset::from_json(DATASET).unwrap().load().unwrap(), &config)
                .unwrap();
        assert_eq!(explorer.view().edges.len(), 3);

        explorer.assign_label(&cells(&[1]), "x").unwrap();
        assert!(dir.path().join("autosave").join("autosave.json").exists());
    }
}
