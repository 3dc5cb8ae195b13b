//! Dataset input format and loader
//!
//! A dataset is one JSON document holding every session loaded together:
//!
//! ```json
//! {
//!   "sessions": [
//!     {
//!       "name": "mouse1_day3",
//!       "metadata": { "sr": 20000, "channels": 64 },
//!       "cells": [
//!         { "uid": 1, "cell_type": "Pyramidal Cell", "tags": ["Good"],
//!           "metrics": { "firingRate": 4.2, "burstIndex": 0.31 } }
//!       ],
//!       "connections": { "excitatory": [[1, 2]], "inhibitory": [] }
//!     }
//!   ]
//! }
//! ```
//!
//! Loading assigns global cell indices 1..N in session order and batch IDs
//! 1..S, translates session-local unit pairs into global edges, and builds
//! the [`CellStore`] and [`ConnectivityGraph`]. Persisted classifications
//! can then be overlaid from a [`PersistenceGateway`].

use crate::connectivity::{ConnectivityGraph, Edge};
use crate::error::{CellCurateError, Result};
use crate::storage::{PersistenceGateway, ProvenanceEntry};
use crate::store::{Cell, CellStore, Session};
use crate::types::{BatchId, CellIndex, Metric, SessionRef};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use tracing::{debug, info, warn};

/// Placeholder for classification fields the source leaves unset
pub const UNKNOWN: &str = "Unknown";

fn unknown() -> String {
    UNKNOWN.to_string()
}

/// Whole dataset as read from disk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub sessions: Vec<SessionInput>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInput {
    pub name: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub cells: Vec<CellInput>,
    #[serde(default)]
    pub connections: ConnectionsInput,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellInput {
    pub uid: u32,
    #[serde(default = "unknown")]
    pub cell_type: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default = "unknown")]
    pub brain_region: String,
    #[serde(default)]
    pub label: String,
    #[serde(default = "unknown")]
    pub deep_superficial: String,
    #[serde(default)]
    pub ground_truth: BTreeSet<String>,
    #[serde(default)]
    pub metrics: BTreeMap<String, Metric>,
}

/// Session-local `(pre, post)` unit pairs per polarity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionsInput {
    #[serde(default)]
    pub excitatory: Vec<(u32, u32)>,
    #[serde(default)]
    pub inhibitory: Vec<(u32, u32)>,
}

impl ConnectionsInput {
    /// Translate unit pairs of one loaded session into global edges
    pub fn to_edges(&self, store: &CellStore, batch_id: BatchId) -> Result<(Vec<Edge>, Vec<Edge>)> {
        let session = store.session(batch_id)?;
        let resolve = |pairs: &[(u32, u32)]| -> Result<Vec<Edge>> {
            pairs
                .iter()
                .map(|&(pre, post)| -> Result<Edge> {
                    let lookup = |uid| {
                        store.index_of_uid(batch_id, uid).ok_or_else(|| {
                            CellCurateError::UnknownUnit {
                                session: session.session_ref().to_string(),
                                uid,
                            }
                        })
                    };
                    Ok((lookup(pre)?, lookup(post)?))
                })
                .collect()
        };
        Ok((resolve(&self.excitatory)?, resolve(&self.inhibitory)?))
    }
}

impl Dataset {
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Assign global indices and build the store and the graph
    pub fn load(self) -> Result<LoadedDataset> {
        let mut cells = Vec::new();
        let mut sessions = Vec::with_capacity(self.sessions.len());
        let mut excitatory = Vec::new();
        let mut inhibitory = Vec::new();

        for (position, input) in self.sessions.into_iter().enumerate() {
            let batch_id = BatchId(position as u32 + 1);
            let mut by_uid: HashMap<u32, CellIndex> = HashMap::with_capacity(input.cells.len());
            let mut members = Vec::with_capacity(input.cells.len());

            for cell in input.cells {
                let index = CellIndex(cells.len() + 1);
                if by_uid.insert(cell.uid, index).is_some() {
                    return Err(CellCurateError::DuplicateUnit {
                        session: input.name,
                        uid: cell.uid,
                    });
                }
                members.push(index);
                cells.push(Cell {
                    index,
                    batch_id,
                    uid: cell.uid,
                    cell_type: non_empty(cell.cell_type),
                    tags: cell.tags,
                    brain_region: non_empty(cell.brain_region),
                    label: cell.label,
                    deep_superficial: non_empty(cell.deep_superficial),
                    ground_truth: cell.ground_truth,
                    metrics: cell.metrics,
                });
            }

            let translate = |pairs: Vec<(u32, u32)>, out: &mut Vec<Edge>| -> Result<()> {
                for (pre, post) in pairs {
                    let lookup = |uid: u32| {
                        by_uid.get(&uid).copied().ok_or_else(|| CellCurateError::UnknownUnit {
                            session: input.name.clone(),
                            uid,
                        })
                    };
                    out.push((lookup(pre)?, lookup(post)?));
                }
                Ok(())
            };
            translate(input.connections.excitatory, &mut excitatory)?;
            translate(input.connections.inhibitory, &mut inhibitory)?;

            debug!(
                "Session {} loaded as batch {} with {} cells",
                input.name,
                batch_id,
                members.len()
            );
            sessions.push(Session {
                batch_id,
                session_ref: SessionRef::new(input.name),
                metadata: input.metadata,
                cells: members,
            });
        }

        let cell_count = cells.len();
        let graph = ConnectivityGraph::new(excitatory, inhibitory, cell_count)?;
        let store = CellStore::from_parts(cells, sessions);
        info!(
            "Loaded {} cells across {} sessions ({} connections)",
            cell_count,
            store.sessions().len(),
            graph.edge_count()
        );
        Ok(LoadedDataset {
            store,
            graph,
            provenance: BTreeMap::new(),
        })
    }
}

fn non_empty(value: String) -> String {
    if value.trim().is_empty() {
        unknown()
    } else {
        value
    }
}

/// Store and graph built from a dataset, before any edits
#[derive(Debug)]
pub struct LoadedDataset {
    pub store: CellStore,
    pub graph: ConnectivityGraph,
    /// Provenance logs recovered by [`LoadedDataset::overlay_persisted`]
    pub provenance: BTreeMap<BatchId, Vec<ProvenanceEntry>>,
}

impl LoadedDataset {
    /// Replace classification fields with each session's persisted record
    ///
    /// Sessions without a record keep their source values. Returns the
    /// number of sessions overlaid.
    pub fn overlay_persisted<G>(&mut self, gateway: &G) -> Result<usize>
    where
        G: PersistenceGateway + ?Sized,
    {
        let mut overlaid = 0;
        for batch_id in self.store.batch_ids() {
            let session = self.store.session(batch_id)?.session_ref().clone();
            let Some(snapshot) = gateway.load(&session)? else {
                continue;
            };
            if snapshot.session != session {
                warn!(
                    "Persisted record names session {} but was loaded for {}",
                    snapshot.session, session
                );
            }
            let applied = self.store.overlay(batch_id, &snapshot.cells)?;
            debug!("Overlaid {} cells of session {}", applied, session);
            self.provenance.insert(batch_id, snapshot.provenance);
            overlaid += 1;
        }
        if overlaid > 0 {
            info!("Restored persisted classifications for {} sessions", overlaid);
        }
        Ok(overlaid)
    }
}
