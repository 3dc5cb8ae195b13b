//! Shared helper functions for CLI commands
//!
//! Config loading, dataset loading with persisted overlays, filter flags
//! and cell-list parsing used across subcommands.

use anyhow::{bail, Context, Result};
use cellcurate_core::{CellIndex, CurateConfig, Dataset, Explorer, PersistenceGateway, Resolution};
use clap::Args;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default config location: `<config_dir>/cellcurate/config.toml`
pub fn get_default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("cellcurate").join("config.toml"))
}

/// Load configuration from the CLI path, the default location, or defaults
pub fn load_config(cli_path: Option<&Path>) -> Result<CurateConfig> {
    let path = cli_path
        .map(Path::to_path_buf)
        .or_else(|| get_default_config_path().filter(|p| p.exists()));
    debug!("Loading configuration from {:?}", path);
    CurateConfig::load(path.as_deref()).context("Failed to load configuration")
}

/// Open the configured gateway
pub fn open_gateway(config: &CurateConfig) -> Result<Box<dyn PersistenceGateway>> {
    config
        .storage
        .open_gateway()
        .context("Failed to open persistence gateway")
}

/// Load a dataset, overlay persisted classifications and wrap it in an explorer
pub fn load_explorer(
    dataset: &Path,
    config: &CurateConfig,
    gateway: &dyn PersistenceGateway,
) -> Result<Explorer> {
    let mut loaded = Dataset::from_file(dataset)
        .with_context(|| format!("Failed to read dataset {}", dataset.display()))?
        .load()
        .with_context(|| format!("Invalid dataset {}", dataset.display()))?;
    loaded
        .overlay_persisted(gateway)
        .context("Failed to load persisted classifications")?;
    Ok(Explorer::configured(loaded, config)?)
}

/// Filter flags shared by `subset` and `graph`
#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    /// Include only these cell types (repeatable)
    #[arg(long = "class")]
    pub classes: Vec<String>,

    /// Keep cells carrying any of these tags (repeatable)
    #[arg(long = "include-tag")]
    pub include_tags: Vec<String>,

    /// Drop cells carrying any of these tags (repeatable)
    #[arg(long = "exclude-tag")]
    pub exclude_tags: Vec<String>,

    /// Free-text query, e.g. ".firingRate > 10 & pyramidal | CA1"
    #[arg(short, long)]
    pub text: Option<String>,

    /// Group filter as ATTRIBUTE=VALUE[,VALUE...]
    #[arg(short, long)]
    pub group: Option<String>,

    /// Project cells into two comparison groups
    #[arg(long)]
    pub compare: bool,
}

impl FilterArgs {
    /// Push every flag into the explorer and return the final resolution
    pub fn apply<'a>(&self, explorer: &'a mut Explorer) -> Result<&'a Resolution> {
        if !self.classes.is_empty() {
            explorer.set_class_filter(Some(self.classes.iter().cloned().collect()));
        }
        explorer.set_tag_filter(
            self.include_tags.iter().cloned().collect(),
            self.exclude_tags.iter().cloned().collect(),
        );
        if let Some(text) = &self.text {
            explorer.set_text_filter(text);
        }
        if let Some(group) = &self.group {
            let (attribute, values) = parse_group(group)?;
            explorer
                .set_group_filter(&attribute, values)
                .with_context(|| format!("Invalid group filter '{}'", group))?;
        }
        Ok(explorer.set_compare_mode(self.compare))
    }
}

/// Parse `ATTRIBUTE=VALUE[,VALUE...]`
pub fn parse_group(raw: &str) -> Result<(String, BTreeSet<String>)> {
    let Some((attribute, values)) = raw.split_once('=') else {
        bail!("Group filter must look like ATTRIBUTE=VALUE[,VALUE...], got '{}'", raw);
    };
    let values = values
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect();
    Ok((attribute.trim().to_string(), values))
}

/// Parse a cell list such as `1,4,7-9`
pub fn parse_cells(list: &str) -> Result<BTreeSet<CellIndex>> {
    let mut cells = BTreeSet::new();
    for part in list.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((start, end)) => {
                let bounds = |s: &str| -> Result<usize> {
                    s.trim()
                        .parse()
                        .with_context(|| format!("Bad range '{}'", part))
                };
                let (start, end) = (bounds(start)?, bounds(end)?);
                if start > end {
                    bail!("Empty range '{}'", part);
                }
                cells.extend((start..=end).map(CellIndex));
            }
            None => {
                let index: usize = part
                    .parse()
                    .with_context(|| format!("Bad cell index '{}'", part))?;
                cells.insert(CellIndex(index));
            }
        }
    }
    if cells.is_empty() {
        bail!("No cells given");
    }
    Ok(cells)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cells() {
        let cells = parse_cells("1, 4,7-9").unwrap();
        let expected: BTreeSet<_> = [1, 4, 7, 8, 9].into_iter().map(CellIndex).collect();
        assert_eq!(cells, expected);
        assert!(parse_cells("3-1").is_err());
        assert!(parse_cells("x").is_err());
        assert!(parse_cells("").is_err());
    }

    #[test]
    fn test_parse_group() {
        let (attribute, values) = parse_group("synapticEffect=Excitatory, Inhibitory").unwrap();
        assert_eq!(attribute, "synapticEffect");
        assert_eq!(values.len(), 2);
        assert!(parse_group("brainRegion").is_err());
    }
}
