//! Bounded traversals over the connectivity graph
//!
//! Every traversal runs on the subgraph induced by the active subset: an
//! edge is visible only when both of its endpoints are active. Closures are
//! breadth-first with a visited set and an explicit hop limit, so they
//! terminate on cyclic graphs.

use super::ConnectivityGraph;
use crate::types::{CellIndex, Direction, DisplayMode, EdgeId, Polarities};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::debug;

/// Direct partners of a cell
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Neighbors {
    pub cells: BTreeSet<CellIndex>,
    pub edges: BTreeSet<EdgeId>,
}

/// Result of a bounded breadth-first expansion
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Closure {
    /// Cells reached, excluding the start cell
    pub reached: BTreeSet<CellIndex>,
    /// Every visible edge followed during the expansion
    pub edges: BTreeSet<EdgeId>,
    /// Edges that discovered new cells in the final productive hop
    pub last_hop_edges: BTreeSet<EdgeId>,
    /// Number of hops that discovered at least one new cell
    pub hops: usize,
}

/// Connectivity outputs for the focused cell under a display mode
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectivityView {
    pub cells: BTreeSet<CellIndex>,
    pub edges: BTreeSet<EdgeId>,
    pub last_hop_edges: BTreeSet<EdgeId>,
}

impl ConnectivityView {
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty() && self.edges.is_empty()
    }

    fn absorb_neighbors(&mut self, neighbors: Neighbors) {
        self.cells.extend(neighbors.cells);
        self.edges.extend(neighbors.edges);
    }

    fn absorb_closure(&mut self, closure: Closure) {
        self.cells.extend(closure.reached);
        self.edges.extend(closure.edges);
        self.last_hop_edges.extend(closure.last_hop_edges);
    }
}

impl ConnectivityGraph {
    /// Visible edges leaving `cell` along `direction`, with the cell at the far end
    fn visible_steps<'a>(
        &'a self,
        cell: CellIndex,
        direction: Direction,
        polarities: Polarities,
        active: &'a BTreeSet<CellIndex>,
    ) -> impl Iterator<Item = (EdgeId, CellIndex)> + 'a {
        let from_active = active.contains(&cell);
        self.adjacent(cell, direction)
            .iter()
            .filter(move |id| from_active && polarities.contains(id.polarity))
            .filter_map(move |id| {
                let (pre, post) = self.edge(*id)?;
                let other = match direction {
                    Direction::Outgoing => post,
                    Direction::Incoming => pre,
                };
                active.contains(&other).then_some((*id, other))
            })
    }

    /// Cells one edge away from `cell`
    pub fn direct_neighbors(
        &self,
        cell: CellIndex,
        direction: Direction,
        polarities: Polarities,
        active: &BTreeSet<CellIndex>,
    ) -> Neighbors {
        let mut neighbors = Neighbors::default();
        for (edge, other) in self.visible_steps(cell, direction, polarities, active) {
            neighbors.cells.insert(other);
            neighbors.edges.insert(edge);
        }
        neighbors
    }

    /// Breadth-first expansion from `cell`, at most `max_hops` deep
    ///
    /// Stops early when an iteration discovers no new cell. The start cell is
    /// seeded into the visited set and never reported as reached, even when a
    /// cycle leads back to it.
    pub fn closure(
        &self,
        cell: CellIndex,
        direction: Direction,
        polarities: Polarities,
        max_hops: usize,
        active: &BTreeSet<CellIndex>,
    ) -> Closure {
        let mut result = Closure::default();
        let mut visited = BTreeSet::from([cell]);
        let mut frontier = vec![cell];

        for _ in 0..max_hops {
            let mut discovered = Vec::new();
            let mut hop_edges = BTreeSet::new();

            for &node in &frontier {
                for (edge, other) in self.visible_steps(node, direction, polarities, active) {
                    result.edges.insert(edge);
                    if visited.insert(other) {
                        discovered.push(other);
                        hop_edges.insert(edge);
                    }
                }
            }

            if discovered.is_empty() {
                break;
            }
            result.hops += 1;
            result.reached.extend(discovered.iter().copied());
            result.last_hop_edges = hop_edges;
            frontier = discovered;
        }

        debug!(
            "Closure from {} ({:?}): {} cells in {} hops",
            cell,
            direction,
            result.reached.len(),
            result.hops
        );
        result
    }

    /// Every visible edge of the active subgraph, irrespective of focus
    pub fn all_edges(&self, polarities: Polarities, active: &BTreeSet<CellIndex>) -> Neighbors {
        let mut all = Neighbors::default();
        for &cell in active {
            for (edge, other) in self.visible_steps(cell, Direction::Outgoing, polarities, active) {
                all.edges.insert(edge);
                all.cells.insert(cell);
                all.cells.insert(other);
            }
        }
        all
    }

    /// Run the traversals a display mode asks for
    pub fn view(
        &self,
        focus: Option<CellIndex>,
        mode: DisplayMode,
        polarities: Polarities,
        max_hops: usize,
        active: &BTreeSet<CellIndex>,
    ) -> ConnectivityView {
        let mut view = ConnectivityView::default();
        if mode == DisplayMode::All {
            view.absorb_neighbors(self.all_edges(polarities, active));
            return view;
        }
        let Some(focus) = focus else {
            return view;
        };

        match mode {
            DisplayMode::None | DisplayMode::All => {}
            DisplayMode::Selected => {
                for direction in [Direction::Incoming, Direction::Outgoing] {
                    view.absorb_neighbors(self.direct_neighbors(focus, direction, polarities, active));
                }
            }
            DisplayMode::Upstream => {
                view.absorb_closure(self.closure(focus, Direction::Incoming, polarities, max_hops, active));
            }
            DisplayMode::Downstream => {
                view.absorb_closure(self.closure(focus, Direction::Outgoing, polarities, max_hops, active));
            }
            DisplayMode::UpAndDownstream => {
                for direction in [Direction::Incoming, Direction::Outgoing] {
                    view.absorb_closure(self.closure(focus, direction, polarities, max_hops, active));
                }
            }
        }
        view
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::{Edge, DEFAULT_MAX_HOPS};
    use crate::types::Polarity;

    fn e(pre: usize, post: usize) -> Edge {
        (CellIndex(pre), CellIndex(post))
    }

    fn cells(ids: &[usize]) -> BTreeSet<CellIndex> {
        ids.iter().map(|&i| CellIndex(i)).collect()
    }

    fn exc(row: usize) -> EdgeId {
        EdgeId {
            polarity: Polarity::Excitatory,
            row,
        }
    }

    #[test]
    fn test_chain_closure_downstream() {
        let graph = ConnectivityGraph::new(vec![e(1, 2), e(2, 3), e(3, 4)], vec![], 4).unwrap();
        let closure = graph.closure(
            CellIndex(1),
            Direction::Outgoing,
            Polarities::EXCITATORY,
            DEFAULT_MAX_HOPS,
            &cells(&[1, 2, 3, 4]),
        );
        assert_eq!(closure.reached, cells(&[2, 3, 4]));
        assert_eq!(closure.hops, 3);
        assert_eq!(closure.last_hop_edges, BTreeSet::from([exc(2)]));
    }

    #[test]
    fn test_three_cycle_terminates_without_start() {
        // A=1 -> B=2 -> C=3 -> A
        let graph = ConnectivityGraph::new(vec![e(1, 2), e(2, 3), e(3, 1)], vec![], 3).unwrap();
        let closure = graph.closure(
            CellIndex(1),
            Direction::Outgoing,
            Polarities::EXCITATORY,
            10,
            &cells(&[1, 2, 3]),
        );
        assert_eq!(closure.reached, cells(&[2, 3]));
        assert_eq!(closure.hops, 2);
        assert_eq!(closure.edges, BTreeSet::from([exc(0), exc(1), exc(2)]));
        assert_eq!(closure.last_hop_edges, BTreeSet::from([exc(1)]));
    }

    #[test]
    fn test_hop_limit() {
        let graph = ConnectivityGraph::new(vec![e(1, 2), e(2, 3), e(3, 4)], vec![], 4).unwrap();
        let closure = graph.closure(
            CellIndex(1),
            Direction::Outgoing,
            Polarities::BOTH,
            2,
            &cells(&[1, 2, 3, 4]),
        );
        assert_eq!(closure.reached, cells(&[2, 3]));
        assert!(graph
            .closure(CellIndex(1), Direction::Outgoing, Polarities::BOTH, 0, &cells(&[1, 2]))
            .reached
            .is_empty());
    }

    #[test]
    fn test_upstream_follows_incoming() {
        let graph = ConnectivityGraph::new(vec![e(1, 2), e(2, 3), e(3, 4)], vec![], 4).unwrap();
        let closure = graph.closure(
            CellIndex(4),
            Direction::Incoming,
            Polarities::EXCITATORY,
            10,
            &cells(&[1, 2, 3, 4]),
        );
        assert_eq!(closure.reached, cells(&[1, 2, 3]));
    }

    #[test]
    fn test_edges_outside_subset_are_invisible() {
        let graph = ConnectivityGraph::new(vec![e(1, 2), e(2, 3), e(3, 4)], vec![], 4).unwrap();
        let active = cells(&[1, 2, 4]);
        let neighbors =
            graph.direct_neighbors(CellIndex(2), Direction::Outgoing, Polarities::EXCITATORY, &active);
        assert!(neighbors.cells.is_empty());
        assert!(neighbors.edges.is_empty());

        let closure = graph.closure(CellIndex(1), Direction::Outgoing, Polarities::BOTH, 10, &active);
        assert_eq!(closure.reached, cells(&[2]));
    }

    #[test]
    fn test_polarity_filter() {
        let graph = ConnectivityGraph::new(vec![e(1, 2)], vec![e(1, 3)], 3).unwrap();
        let active = cells(&[1, 2, 3]);
        let inh =
            graph.direct_neighbors(CellIndex(1), Direction::Outgoing, Polarities::INHIBITORY, &active);
        assert_eq!(inh.cells, cells(&[3]));
        let both = graph.direct_neighbors(CellIndex(1), Direction::Outgoing, Polarities::BOTH, &active);
        assert_eq!(both.cells, cells(&[2, 3]));
    }

    #[test]
    fn test_view_modes() {
        let graph =
            ConnectivityGraph::new(vec![e(1, 2), e(2, 3), e(5, 6)], vec![e(4, 2)], 6).unwrap();
        let active = cells(&[1, 2, 3, 4, 5, 6]);
        let focus = Some(CellIndex(2));

        let none = graph.view(focus, DisplayMode::None, Polarities::BOTH, 10, &active);
        assert!(none.is_empty());

        let selected = graph.view(focus, DisplayMode::Selected, Polarities::BOTH, 10, &active);
        assert_eq!(selected.cells, cells(&[1, 3, 4]));

        let up = graph.view(focus, DisplayMode::Upstream, Polarities::BOTH, 10, &active);
        assert_eq!(up.cells, cells(&[1, 4]));

        let down = graph.view(focus, DisplayMode::Downstream, Polarities::BOTH, 10, &active);
        assert_eq!(down.cells, cells(&[3]));

        let both = graph.view(focus, DisplayMode::UpAndDownstream, Polarities::BOTH, 10, &active);
        assert_eq!(both.cells, cells(&[1, 3, 4]));

        let all = graph.view(None, DisplayMode::All, Polarities::BOTH, 10, &cells(&[1, 2, 3, 5]));
        assert_eq!(all.edges.len(), 2);
        assert_eq!(all.cells, cells(&[1, 2, 3]));

        let unfocused = graph.view(None, DisplayMode::Downstream, Polarities::BOTH, 10, &active);
        assert!(unfocused.is_empty());
    }
}
