//! Active-subset resolution
//!
//! The resolver keeps the current value of every filter predicate and
//! recomputes the active subset on demand. Resolution is a pure function of
//! the predicate state, the store and the graph-derived attributes, applied
//! in a fixed order:
//!
//! 1. class inclusion
//! 2. tag exclusion
//! 3. tag inclusion (any listed tag)
//! 4. group inclusion (skipped in compare mode)
//! 5. free text
//! 6. compare mode: every cell becomes active and is projected into one of
//!    two synthetic classes
//!
//! Compare mode never relabels the store; the projection lives only in the
//! returned [`Resolution`], so switching it off restores the original labels.

pub mod text;

use crate::attributes::{Attribute, AttributeRegistry};
use crate::connectivity::ConnectivityGraph;
use crate::error::ValidationError;
use crate::store::{Cell, CellStore};
use crate::types::CellIndex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::debug;

pub use text::{Clause, CompareOp, TextQuery};

/// Synthetic class assigned in compare mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum CompareGroup {
    /// Filtered out by the class/tag/text predicates
    Rest = 1,
    /// Passes the class/tag/text predicates
    Selected = 2,
}

/// Class a cell is displayed under for one resolution cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ClassLabel<'a> {
    CellType(&'a str),
    Compare(CompareGroup),
}

impl fmt::Display for ClassLabel<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassLabel::CellType(t) => f.write_str(t),
            ClassLabel::Compare(g) => write!(f, "group {}", *g as u8),
        }
    }
}

/// Group predicate: keep cells whose attribute takes one of `values`
#[derive(Debug, Clone, PartialEq)]
pub struct GroupFilter {
    pub name: String,
    pub attribute: Attribute,
    pub values: BTreeSet<String>,
}

/// Current value of every predicate
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterState {
    /// `None` includes every class
    pub class_inclusion: Option<BTreeSet<String>>,
    pub tag_include: BTreeSet<String>,
    pub tag_exclude: BTreeSet<String>,
    pub text: Option<String>,
    pub group: Option<GroupFilter>,
    pub compare_mode: bool,
}

/// Output of one resolution cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Resolution {
    /// Active subset
    pub cells: BTreeSet<CellIndex>,
    /// Compare-mode projection, present only while compare mode is on
    pub compare: Option<BTreeMap<CellIndex, CompareGroup>>,
    /// Clauses that were rejected and treated as unconstrained
    #[serde(skip)]
    pub diagnostics: Vec<ValidationError>,
}

impl Resolution {
    pub fn contains(&self, index: CellIndex) -> bool {
        self.cells.contains(&index)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Class the cell is shown under in this cycle
    pub fn class_label<'a>(&self, cell: &'a Cell) -> ClassLabel<'a> {
        match self.compare.as_ref().and_then(|m| m.get(&cell.index())) {
            Some(group) => ClassLabel::Compare(*group),
            None => ClassLabel::CellType(cell.cell_type()),
        }
    }

    /// Cell count per displayed class over the active subset
    pub fn class_counts(&self, store: &CellStore) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for cell in self.cells.iter().filter_map(|i| store.get(*i).ok()) {
            *counts.entry(self.class_label(cell).to_string()).or_insert(0) += 1;
        }
        counts
    }

    /// Neighbour of `from` within the subset, wrapping at either end
    pub fn step(&self, from: Option<CellIndex>, forward: bool) -> Option<CellIndex> {
        let first = || {
            if forward {
                self.cells.iter().next().copied()
            } else {
                self.cells.iter().next_back().copied()
            }
        };
        let Some(from) = from else {
            return first();
        };
        let next = if forward {
            self.cells.range((std::ops::Bound::Excluded(from), std::ops::Bound::Unbounded)).next()
        } else {
            self.cells.range(..from).next_back()
        };
        next.copied().or_else(first)
    }
}

/// Predicate state plus the attribute registry used to evaluate it
#[derive(Debug, Clone)]
pub struct SubsetResolver {
    state: FilterState,
    registry: AttributeRegistry,
}

impl SubsetResolver {
    pub fn new(registry: AttributeRegistry) -> Self {
        Self {
            state: FilterState::default(),
            registry,
        }
    }

    pub fn state(&self) -> &FilterState {
        &self.state
    }

    pub fn registry(&self) -> &AttributeRegistry {
        &self.registry
    }

    /// Restrict to the listed classes; `None` includes every class
    pub fn set_class_filter(&mut self, classes: Option<BTreeSet<String>>) {
        self.state.class_inclusion = classes;
    }

    pub fn set_tag_filter(&mut self, include: BTreeSet<String>, exclude: BTreeSet<String>) {
        self.state.tag_include = include;
        self.state.tag_exclude = exclude;
    }

    /// Set the free-text query; blank text clears it
    pub fn set_text_filter(&mut self, text: &str) {
        let trimmed = text.trim();
        self.state.text = (!trimmed.is_empty()).then(|| trimmed.to_string());
    }

    /// Set the group predicate, validating the attribute name up front
    pub fn set_group_filter(
        &mut self,
        attribute: &str,
        values: BTreeSet<String>,
    ) -> Result<(), ValidationError> {
        let (resolved, _) = self.registry.lookup(attribute)?;
        self.state.group = Some(GroupFilter {
            name: attribute.to_string(),
            attribute: resolved,
            values,
        });
        Ok(())
    }

    pub fn clear_group_filter(&mut self) {
        self.state.group = None;
    }

    pub fn set_compare_mode(&mut self, enabled: bool) {
        self.state.compare_mode = enabled;
    }

    /// Compute the active subset for the current predicate state
    pub fn resolve(&self, store: &CellStore, graph: &ConnectivityGraph) -> Resolution {
        let state = &self.state;
        let mut diagnostics = Vec::new();

        let mut cells: BTreeSet<CellIndex> = store
            .iter()
            .filter(|c| {
                state
                    .class_inclusion
                    .as_ref()
                    .map_or(true, |classes| classes.contains(c.cell_type()))
            })
            .filter(|c| c.tags().is_disjoint(&state.tag_exclude))
            .filter(|c| state.tag_include.is_empty() || !c.tags().is_disjoint(&state.tag_include))
            .map(|c| c.index())
            .collect();

        if let (Some(group), false) = (&state.group, state.compare_mode) {
            cells.retain(|idx| {
                store.get(*idx).is_ok_and(|c| {
                    self.registry
                        .value(&group.attribute, c, graph)
                        .matches_any(&group.values)
                })
            });
        }

        if let Some(text) = &state.text {
            let (query, rejected) = TextQuery::parse(text, &self.registry);
            diagnostics.extend(rejected);
            let matching = query.evaluate(store, graph, &self.registry);
            cells.retain(|idx| matching.contains(idx));
        }

        let resolution = if state.compare_mode {
            let projection = store
                .indices()
                .map(|idx| {
                    let group = if cells.contains(&idx) {
                        CompareGroup::Selected
                    } else {
                        CompareGroup::Rest
                    };
                    (idx, group)
                })
                .collect();
            Resolution {
                cells: store.indices().collect(),
                compare: Some(projection),
                diagnostics,
            }
        } else {
            Resolution {
                cells,
                compare: None,
                diagnostics,
            }
        };

        debug!(
            "Resolved active subset: {} of {} cells (compare mode: {})",
            resolution.cells.len(),
            store.cell_count(),
            state.compare_mode
        );
        resolution
    }
}
