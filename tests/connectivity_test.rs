//! Traversal scenarios over loaded datasets

mod common;

use cellcurate_core::{
    BatchId, CellCurateError, CellIndex, Direction, DisplayMode, Polarities, ValidationError,
};
use common::{cells, explorer, load, session, with_edges};
use std::collections::BTreeSet;

const TYPES: [&str; 4] = ["Pyramidal Cell", "Pyramidal Cell", "Pyramidal Cell", "Pyramidal Cell"];

fn all(n: usize) -> BTreeSet<CellIndex> {
    (1..=n).map(CellIndex).collect()
}

#[test]
fn test_chain_closure_reaches_every_downstream_cell() {
    let loaded = load(vec![with_edges(session("s", &TYPES), &[(1, 2), (2, 3), (3, 4)], &[])]);
    let closure = loaded.graph.closure(
        CellIndex(1),
        Direction::Outgoing,
        Polarities::EXCITATORY,
        10,
        &all(4),
    );
    assert_eq!(closure.reached, cells(&[2, 3, 4]));
    assert_eq!(closure.last_hop_edges.len(), 1);
}

#[test]
fn test_three_cycle_terminates_without_self_reachability() {
    let loaded = load(vec![with_edges(
        session("s", &TYPES[..3]),
        &[(1, 2), (2, 3), (3, 1)],
        &[],
    )]);
    let closure = loaded.graph.closure(
        CellIndex(1),
        Direction::Outgoing,
        Polarities::EXCITATORY,
        10,
        &all(3),
    );
    assert_eq!(closure.reached, cells(&[2, 3]));
    assert_eq!(closure.hops, 2);
}

#[test]
fn test_hop_limit_bounds_closure() {
    let loaded = load(vec![with_edges(session("s", &TYPES), &[(1, 2), (2, 3), (3, 4)], &[])]);
    let closure = loaded.graph.closure(
        CellIndex(4),
        Direction::Incoming,
        Polarities::BOTH,
        2,
        &all(4),
    );
    assert_eq!(closure.reached, cells(&[2, 3]));
}

#[test]
fn test_edges_leaving_the_active_subset_are_invisible() {
    let loaded = load(vec![with_edges(session("s", &TYPES), &[(1, 2), (2, 3), (3, 4)], &[])]);
    let neighbors = loaded.graph.direct_neighbors(
        CellIndex(2),
        Direction::Outgoing,
        Polarities::EXCITATORY,
        &cells(&[1, 2, 4]),
    );
    assert!(neighbors.cells.is_empty());
    assert!(neighbors.edges.is_empty());
}

#[test]
fn test_polarity_selection() {
    let loaded = load(vec![with_edges(session("s", &TYPES), &[(1, 2)], &[(1, 3)])]);
    let inhibitory = loaded.graph.direct_neighbors(
        CellIndex(1),
        Direction::Outgoing,
        Polarities::INHIBITORY,
        &all(4),
    );
    assert_eq!(inhibitory.cells, cells(&[3]));

    let both = loaded.graph.direct_neighbors(
        CellIndex(1),
        Direction::Outgoing,
        Polarities::BOTH,
        &all(4),
    );
    assert_eq!(both.cells, cells(&[2, 3]));
}

#[test]
fn test_display_modes_through_explorer() {
    let mut explorer = explorer(vec![with_edges(
        session("s", &TYPES),
        &[(1, 2), (2, 3), (3, 4)],
        &[],
    )]);
    explorer.set_focus(CellIndex(2)).unwrap();

    assert_eq!(explorer.view().cells, cells(&[1, 3]));
    assert_eq!(
        explorer.set_connectivity_mode(DisplayMode::Upstream).cells,
        cells(&[1])
    );
    assert_eq!(
        explorer.set_connectivity_mode(DisplayMode::UpAndDownstream).cells,
        cells(&[1, 3, 4])
    );
    assert_eq!(
        explorer.set_connectivity_mode(DisplayMode::All).edges.len(),
        3
    );
    assert!(explorer.set_connectivity_mode(DisplayMode::None).is_empty());
}

#[test]
fn test_replace_connections_is_scoped_to_one_session() {
    let mut explorer = explorer(vec![
        with_edges(session("a", &TYPES[..2]), &[(1, 2)], &[]),
        with_edges(session("b", &TYPES[..2]), &[(1, 2)], &[(2, 1)]),
    ]);
    assert_eq!(explorer.graph().edge_count(), 3);

    let report = explorer
        .replace_connections(vec![], vec![(CellIndex(2), CellIndex(1))], BatchId(1))
        .unwrap();
    assert_eq!(report.removed, 1);
    assert_eq!(report.added, 1);
    assert_eq!(explorer.graph().edge_count(), 3);
    assert_eq!(
        explorer.graph().excitatory(),
        &[(CellIndex(3), CellIndex(4))]
    );

    let err = explorer
        .replace_connections(vec![(CellIndex(1), CellIndex(3))], vec![], BatchId(1))
        .unwrap_err();
    assert!(matches!(
        err,
        CellCurateError::Validation(ValidationError::EdgeOutsideScope { .. })
    ));
    assert_eq!(explorer.graph().edge_count(), 3);
}
