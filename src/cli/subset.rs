//! Active-subset command

use super::helpers::{load_explorer, open_gateway, FilterArgs};
use anyhow::{bail, Result};
use cellcurate_core::CurateConfig;
use serde_json::json;
use std::path::Path;
use tracing::warn;

/// Handle the subset command
pub fn handle(
    dataset: &Path,
    filters: &FilterArgs,
    format: &str,
    config: &CurateConfig,
) -> Result<()> {
    let gateway = open_gateway(config)?;
    let mut explorer = load_explorer(dataset, config, gateway.as_ref())?;
    let resolution = filters.apply(&mut explorer)?.clone();

    for rejected in &resolution.diagnostics {
        warn!("Clause ignored: {}", rejected);
    }
    let counts = explorer.class_counts();

    match format {
        "json" => {
            let out = json!({
                "cells": resolution.cells,
                "class_counts": counts,
                "compare": resolution.compare,
                "diagnostics": resolution
                    .diagnostics
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>(),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        "text" => {
            println!(
                "{} of {} cells active",
                resolution.len(),
                explorer.store().cell_count()
            );
            for (class, count) in &counts {
                println!("  {:<28} {}", class, count);
            }
            println!();
            for index in &resolution.cells {
                let cell = explorer.store().get(*index)?;
                let session = explorer.store().session(cell.batch_id())?;
                println!(
                    "  {:>5}  {:<16} uid {:<5} {}",
                    index.0,
                    session.session_ref().as_str(),
                    cell.uid(),
                    resolution.class_label(cell)
                );
            }
        }
        other => bail!("Unknown format: {}. Supported formats: text, json", other),
    }
    Ok(())
}
