//! Monosynaptic connectivity graph
//!
//! Holds the dataset-wide excitatory and inhibitory edge lists, adjacency
//! indices for traversal, and per-cell synaptic statistics derived from the
//! edges. The graph never reads or writes classification fields; traversal
//! operations live in [`traverse`].

pub mod traverse;

use crate::error::{CellCurateError, Result, ValidationError};
use crate::store::CellStore;
use crate::types::{BatchId, CellIndex, Direction, EdgeId, Polarity, SynapticEffect};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};

pub use traverse::{Closure, ConnectivityView, Neighbors};

/// Default hop limit for closure traversals
pub const DEFAULT_MAX_HOPS: usize = 10;

/// Ordered (presynaptic, postsynaptic) pair
pub type Edge = (CellIndex, CellIndex);

/// Connection counts and net effect of one cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SynapticStats {
    /// Edges ending at the cell, either polarity
    pub connections_in: usize,
    /// Edges starting at the cell, either polarity
    pub connections_out: usize,
    pub excitatory_out: usize,
    pub inhibitory_out: usize,
    pub effect: SynapticEffect,
}

/// Summary returned by [`ConnectivityGraph::replace_connections`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplaceReport {
    pub batch_id: BatchId,
    pub removed: usize,
    pub added: usize,
    pub recomputed_cells: usize,
}

/// Directed excitatory/inhibitory edges over the loaded cells
#[derive(Debug, Clone, Default)]
pub struct ConnectivityGraph {
    excitatory: Vec<Edge>,
    inhibitory: Vec<Edge>,
    outgoing: HashMap<CellIndex, Vec<EdgeId>>,
    incoming: HashMap<CellIndex, Vec<EdgeId>>,
    stats: Vec<SynapticStats>,
}

impl ConnectivityGraph {
    /// Build the graph, rejecting edges that reference unknown cells
    pub fn new(excitatory: Vec<Edge>, inhibitory: Vec<Edge>, cell_count: usize) -> Result<Self> {
        for &(pre, post) in excitatory.iter().chain(inhibitory.iter()) {
            for idx in [pre, post] {
                if idx.0 == 0 || idx.0 > cell_count {
                    return Err(CellCurateError::CellOutOfRange {
                        index: idx.0,
                        count: cell_count,
                    });
                }
            }
        }

        let mut graph = Self {
            excitatory,
            inhibitory,
            outgoing: HashMap::new(),
            incoming: HashMap::new(),
            stats: vec![SynapticStats::default(); cell_count],
        };
        graph.reindex();
        let all: Vec<CellIndex> = (1..=cell_count).map(CellIndex).collect();
        graph.recompute_stats(&all);

        debug!(
            "Connectivity graph built: {} excitatory, {} inhibitory edges over {} cells",
            graph.excitatory.len(),
            graph.inhibitory.len(),
            cell_count
        );
        Ok(graph)
    }

    /// Graph with no edges
    pub fn empty(cell_count: usize) -> Self {
        Self {
            stats: vec![SynapticStats::default(); cell_count],
            ..Self::default()
        }
    }

    pub fn excitatory(&self) -> &[Edge] {
        &self.excitatory
    }

    pub fn inhibitory(&self) -> &[Edge] {
        &self.inhibitory
    }

    pub fn edge_count(&self) -> usize {
        self.excitatory.len() + self.inhibitory.len()
    }

    /// Endpoints of an edge, if the identifier is current
    pub fn edge(&self, id: EdgeId) -> Option<Edge> {
        self.list(id.polarity).get(id.row).copied()
    }

    /// Derived statistics of a cell
    pub fn stats(&self, index: CellIndex) -> Option<&SynapticStats> {
        index.0.checked_sub(1).and_then(|i| self.stats.get(i))
    }

    fn list(&self, polarity: Polarity) -> &Vec<Edge> {
        match polarity {
            Polarity::Excitatory => &self.excitatory,
            Polarity::Inhibitory => &self.inhibitory,
        }
    }

    /// Edge identifiers touching `cell` in the given direction, all polarities
    pub(crate) fn adjacent(&self, cell: CellIndex, direction: Direction) -> &[EdgeId] {
        let index = match direction {
            Direction::Outgoing => &self.outgoing,
            Direction::Incoming => &self.incoming,
        };
        index.get(&cell).map(Vec::as_slice).unwrap_or(&[])
    }

    fn reindex(&mut self) {
        self.outgoing.clear();
        self.incoming.clear();
        for polarity in [Polarity::Excitatory, Polarity::Inhibitory] {
            let edges = match polarity {
                Polarity::Excitatory => &self.excitatory,
                Polarity::Inhibitory => &self.inhibitory,
            };
            for (row, &(pre, post)) in edges.iter().enumerate() {
                let id = EdgeId { polarity, row };
                self.outgoing.entry(pre).or_default().push(id);
                self.incoming.entry(post).or_default().push(id);
            }
        }
    }

    fn recompute_stats(&mut self, cells: &[CellIndex]) {
        for &cell in cells {
            let mut stats = SynapticStats {
                connections_in: self.adjacent(cell, Direction::Incoming).len(),
                connections_out: self.adjacent(cell, Direction::Outgoing).len(),
                ..SynapticStats::default()
            };
            for id in self.adjacent(cell, Direction::Outgoing) {
                match id.polarity {
                    Polarity::Excitatory => stats.excitatory_out += 1,
                    Polarity::Inhibitory => stats.inhibitory_out += 1,
                }
            }
            stats.effect = match stats.excitatory_out.cmp(&stats.inhibitory_out) {
                std::cmp::Ordering::Greater => SynapticEffect::Excitatory,
                std::cmp::Ordering::Less => SynapticEffect::Inhibitory,
                std::cmp::Ordering::Equal => SynapticEffect::Unknown,
            };
            if let Some(slot) = cell.0.checked_sub(1).and_then(|i| self.stats.get_mut(i)) {
                *slot = stats;
            }
        }
    }

    /// Swap the edges of one session for a freshly curated set
    ///
    /// Rows with an endpoint in `scope` are dropped and replaced by the new
    /// rows; every other session's edges are untouched. New rows must lie
    /// entirely within the scoped session. Stats are recomputed for the
    /// scoped cells and for any outside cell that lost a row. Validation
    /// completes before the edge lists change, so a rejected call leaves
    /// the graph as it was.
    pub fn replace_connections(
        &mut self,
        new_excitatory: Vec<Edge>,
        new_inhibitory: Vec<Edge>,
        scope: BatchId,
        store: &CellStore,
    ) -> Result<ReplaceReport> {
        let session = store.session(scope)?;
        let in_scope: BTreeSet<CellIndex> = session.cells().iter().copied().collect();

        for &(pre, post) in new_excitatory.iter().chain(new_inhibitory.iter()) {
            if !in_scope.contains(&pre) || !in_scope.contains(&post) {
                return Err(ValidationError::EdgeOutsideScope {
                    pre: pre.0,
                    post: post.0,
                    batch: scope.0,
                }
                .into());
            }
        }

        let before = self.edge_count();
        let touches = |&(pre, post): &Edge| in_scope.contains(&pre) || in_scope.contains(&post);

        // Cross-session rows also feed the stats of their far endpoint
        let mut affected = in_scope.clone();
        for &(pre, post) in self.excitatory.iter().chain(self.inhibitory.iter()) {
            if touches(&(pre, post)) {
                affected.insert(pre);
                affected.insert(post);
            }
        }

        self.excitatory.retain(|e| !touches(e));
        self.inhibitory.retain(|e| !touches(e));
        let removed = before - self.edge_count();

        let added = new_excitatory.len() + new_inhibitory.len();
        self.excitatory.extend(new_excitatory);
        self.inhibitory.extend(new_inhibitory);
        self.reindex();

        let scoped: Vec<CellIndex> = affected.into_iter().collect();
        self.recompute_stats(&scoped);

        info!(
            "Replaced connections of batch {}: removed {}, added {}",
            scope, removed, added
        );
        Ok(ReplaceReport {
            batch_id: scope,
            removed,
            added,
            recomputed_cells: scoped.len(),
        })
    }
}
