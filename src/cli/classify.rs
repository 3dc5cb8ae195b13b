//! Classification command: assign a field on cells and save

use super::helpers::{load_explorer, open_gateway, parse_cells};
use anyhow::{bail, Context, Result};
use cellcurate_core::{CurateConfig, FieldName, FieldValue, SaveMode, SetOp};
use std::path::Path;
use tracing::info;

/// Arguments of the classify command
#[derive(Debug, Clone)]
pub struct ClassifyArgs {
    pub cells: String,
    pub field: String,
    pub value: String,
    /// `add` or `remove` for set-valued fields
    pub op: Option<String>,
    pub dry_run: bool,
}

/// Handle the classify command
pub fn handle(dataset: &Path, args: &ClassifyArgs, config: &CurateConfig) -> Result<()> {
    let gateway = open_gateway(config)?;
    let mut explorer = load_explorer(dataset, config, gateway.as_ref())?;
    let cells = parse_cells(&args.cells)?;
    let field: FieldName = args.field.parse().map_err(anyhow::Error::msg)?;

    let assigned = if field.is_set_valued() {
        let op = match args.op.as_deref().unwrap_or("add") {
            "add" => SetOp::Add,
            "remove" => SetOp::Remove,
            other => bail!("Unknown set operation '{}': expected add or remove", other),
        };
        match field {
            FieldName::Tags => explorer.assign_tag(&cells, op, &args.value),
            _ => explorer.assign_ground_truth(&cells, op, &args.value),
        }
    } else {
        if args.op.is_some() {
            bail!("--op only applies to tags and groundTruthClassification");
        }
        explorer.assign(&cells, field, FieldValue::text(&args.value))
    };
    assigned.with_context(|| format!("Failed to assign {} on {} cells", field, cells.len()))?;

    println!("Assigned {} = {} on {} cells", field, args.value, cells.len());
    if args.dry_run {
        info!("Dry run: nothing saved");
        return Ok(());
    }

    let report = explorer.save(SaveMode::TouchedOnly, gateway.as_ref());
    for outcome in &report.outcomes {
        match &outcome.result {
            Ok(Some(backup)) => println!("  saved {} (backup {})", outcome.session, backup),
            Ok(None) => println!("  saved {}", outcome.session),
            Err(message) => println!("  FAILED {}: {}", outcome.session, message),
        }
    }
    if !report.is_success() {
        bail!("{} sessions failed to save", report.failed().count());
    }
    Ok(())
}
