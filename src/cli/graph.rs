//! Connectivity command: neighbours or closures of a focused cell

use super::helpers::{load_explorer, open_gateway, FilterArgs};
use anyhow::{bail, Context, Result};
use cellcurate_core::types::EdgeId;
use cellcurate_core::{
    CellIndex, ConnectivityGraph, CurateConfig, DisplayMode, Explorer, Polarities, Polarity,
};
use serde_json::json;
use std::collections::BTreeSet;
use std::path::Path;

/// Traversal flags for the graph command
#[derive(Debug, Clone)]
pub struct GraphArgs {
    pub focus: Option<usize>,
    pub mode: Option<String>,
    pub polarity: Option<String>,
    pub max_hops: Option<usize>,
    pub format: String,
}

/// Handle the graph command
pub fn handle(
    dataset: &Path,
    filters: &FilterArgs,
    args: &GraphArgs,
    config: &CurateConfig,
) -> Result<()> {
    let gateway = open_gateway(config)?;
    let mut explorer = load_explorer(dataset, config, gateway.as_ref())?;
    filters.apply(&mut explorer)?;

    if let Some(mode) = &args.mode {
        let mode: DisplayMode = mode.parse().map_err(anyhow::Error::msg)?;
        explorer.set_connectivity_mode(mode);
    }
    if let Some(polarity) = &args.polarity {
        let polarities: Polarities = polarity.parse().map_err(anyhow::Error::msg)?;
        explorer.set_polarities(polarities);
    }
    if let Some(max_hops) = args.max_hops {
        explorer.set_max_hops(max_hops);
    }
    if let Some(focus) = args.focus {
        explorer
            .set_focus(CellIndex(focus))
            .with_context(|| format!("Cannot focus cell {}", focus))?;
    } else if explorer.mode() != DisplayMode::All && explorer.mode() != DisplayMode::None {
        bail!("--focus is required for mode {:?}", explorer.mode());
    }

    let output = match args.format.as_str() {
        "dot" => generate_dot(&explorer),
        "json" => {
            let view = explorer.view();
            let edges = |ids: &BTreeSet<EdgeId>| edge_rows(explorer.graph(), ids);
            serde_json::to_string_pretty(&json!({
                "focus": explorer.focus(),
                "mode": explorer.mode(),
                "cells": view.cells,
                "edges": edges(&view.edges),
                "last_hop_edges": edges(&view.last_hop_edges),
            }))?
        }
        "text" => generate_text(&explorer),
        other => bail!(
            "Unknown format: {}. Supported formats: text, json, dot",
            other
        ),
    };
    println!("{}", output);
    Ok(())
}

fn edge_rows(graph: &ConnectivityGraph, ids: &BTreeSet<EdgeId>) -> Vec<serde_json::Value> {
    ids.iter()
        .filter_map(|id| {
            let (pre, post) = graph.edge(*id)?;
            Some(json!({ "pre": pre, "post": post, "polarity": id.polarity }))
        })
        .collect()
}

fn generate_text(explorer: &Explorer) -> String {
    let view = explorer.view();
    let mut out = match explorer.focus() {
        Some(focus) => format!("Focus {} ({:?})\n", focus, explorer.mode()),
        None => format!("Mode {:?}\n", explorer.mode()),
    };
    out.push_str(&format!(
        "{} cells, {} edges ({} in last hop)\n",
        view.cells.len(),
        view.edges.len(),
        view.last_hop_edges.len()
    ));
    for id in &view.edges {
        if let Some((pre, post)) = explorer.graph().edge(*id) {
            let marker = if view.last_hop_edges.contains(id) { "*" } else { " " };
            out.push_str(&format!(
                " {} {:>5} -> {:<5} {}\n",
                marker,
                pre.0,
                post.0,
                polarity_name(id.polarity)
            ));
        }
    }
    out
}

fn generate_dot(explorer: &Explorer) -> String {
    let view = explorer.view();
    let mut dot = String::from(
        "digraph G {\n  rankdir=LR;\n  node [shape=circle style=filled fillcolor=\"#f0f0f0\"];\n",
    );

    for index in view.cells.iter().chain(explorer.focus().iter()) {
        let label = explorer
            .store()
            .get(*index)
            .map(|c| format!("{}\\n{}", index, escape_dot_string(c.cell_type())))
            .unwrap_or_else(|_| index.to_string());
        let fill = if Some(*index) == explorer.focus() {
            " fillcolor=\"#ffd27f\""
        } else {
            ""
        };
        dot.push_str(&format!("  \"{}\" [label=\"{}\"{}];\n", index, label, fill));
    }

    for id in &view.edges {
        if let Some((pre, post)) = explorer.graph().edge(*id) {
            let color = match id.polarity {
                Polarity::Excitatory => "#c0392b",
                Polarity::Inhibitory => "#2471a3",
            };
            let width = if view.last_hop_edges.contains(id) { 2.5 } else { 1.0 };
            dot.push_str(&format!(
                "  \"{}\" -> \"{}\" [color=\"{}\" penwidth={}];\n",
                pre, post, color, width
            ));
        }
    }
    dot.push_str("}\n");
    dot
}

fn polarity_name(polarity: Polarity) -> &'static str {
    match polarity {
        Polarity::Excitatory => "excitatory",
        Polarity::Inhibitory => "inhibitory",
    }
}

fn escape_dot_string(s: &str) -> String {
    s.replace('"', "\\\"").replace('\n', " ")
}
