//! Backup listing command

use super::helpers::open_gateway;
use anyhow::{Context, Result};
use cellcurate_core::{CurateConfig, SessionRef};

/// Handle the backups command
pub fn handle(session: &str, config: &CurateConfig) -> Result<()> {
    let gateway = open_gateway(config)?;
    let session = SessionRef::new(session);
    let backups = gateway
        .list_backups(&session)
        .with_context(|| format!("Failed to list backups of {}", session))?;

    if backups.is_empty() {
        eprintln!("No backups found for session {}", session);
        return Ok(());
    }
    println!("{} backups for {}:", backups.len(), session);
    for backup in backups.iter().rev() {
        println!("  {}", backup);
    }
    Ok(())
}
