//! Restore command: apply a stored revision and save it back

use super::helpers::{load_explorer, open_gateway};
use anyhow::{bail, Context, Result};
use cellcurate_core::{BackupId, CurateConfig, SaveMode, SessionRef};
use std::path::Path;

/// Handle the restore command
pub fn handle(dataset: &Path, session: &str, backup: &str, config: &CurateConfig) -> Result<()> {
    let gateway = open_gateway(config)?;
    let mut explorer = load_explorer(dataset, config, gateway.as_ref())?;
    let session = SessionRef::new(session);
    let backup = BackupId(backup.to_string());

    let changed = explorer
        .restore_from_backup(&session, &backup, gateway.as_ref())
        .with_context(|| format!("Failed to restore {} from {}", session, backup))?;
    if changed.is_empty() {
        println!("Session {} already matches backup {}", session, backup);
        return Ok(());
    }
    let fields: Vec<&str> = changed.iter().map(|f| f.as_str()).collect();
    println!("Restored {} from {}: {}", session, backup, fields.join(", "));

    let report = explorer.save(SaveMode::TouchedOnly, gateway.as_ref());
    if let Some(failed) = report.failed().next() {
        bail!(
            "Restored in memory but failed to save {}: {}",
            failed.session,
            failed
                .result
                .as_ref()
                .err()
                .map(String::as_str)
                .unwrap_or("unknown error")
        );
    }
    Ok(())
}
