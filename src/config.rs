//! Configuration for cellcurate
//!
//! TOML format, conventionally at `~/.config/cellcurate/config.toml` or
//! passed with `--config`:
//!
//! ```toml
//! [autosave]
//! enabled = true
//! every_n_events = 6
//! export_dir = "/data/curation/autosave"
//! compact_history_to = 200
//!
//! [connectivity]
//! max_hops = 10
//! default_mode = "selected"
//! polarity = "both"
//!
//! [storage]
//! backend = "json"
//! data_dir = "/data/curation"
//! backup_dir_name = "revisions"
//! max_backups = 20
//! ```
//!
//! Every key can be overridden from the environment, e.g.
//! `CELLCURATE__AUTOSAVE__EVERY_N_EVENTS=10`.

use crate::connectivity::DEFAULT_MAX_HOPS;
use crate::error::{CellCurateError, Result};
use crate::storage::{BackendKind, JsonFileGateway, PersistenceGateway, SqliteGateway};
use crate::types::{DisplayMode, Polarities};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment prefix for overrides
const ENV_PREFIX: &str = "CELLCURATE";

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CurateConfig {
    pub autosave: AutosaveConfig,
    pub connectivity: ConnectivityConfig,
    pub storage: StorageConfig,
}

/// Periodic side-effect export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutosaveConfig {
    pub enabled: bool,

    /// Export after this many mutating events
    pub every_n_events: usize,

    /// Directory for exported snapshots (no export when unset)
    pub export_dir: Option<PathBuf>,

    /// Undo depth kept after an autosave; unbounded when unset
    pub compact_history_to: Option<usize>,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            every_n_events: 6,
            export_dir: None,
            compact_history_to: None,
        }
    }
}

/// Polarity selection as written in config files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolarityChoice {
    Excitatory,
    Inhibitory,
    #[default]
    Both,
}

impl From<PolarityChoice> for Polarities {
    fn from(choice: PolarityChoice) -> Self {
        match choice {
            PolarityChoice::Excitatory => Polarities::EXCITATORY,
            PolarityChoice::Inhibitory => Polarities::INHIBITORY,
            PolarityChoice::Both => Polarities::BOTH,
        }
    }
}

/// Traversal defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    pub max_hops: usize,
    pub default_mode: DisplayMode,
    pub polarity: PolarityChoice,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            max_hops: DEFAULT_MAX_HOPS,
            default_mode: DisplayMode::Selected,
            polarity: PolarityChoice::Both,
        }
    }
}

/// Where classification records are persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: BackendKind,

    /// Defaults to the platform data directory
    pub data_dir: Option<PathBuf>,

    pub backup_dir_name: String,

    /// Revisions kept per session; unbounded when unset
    pub max_backups: Option<usize>,

    /// Database file name inside `data_dir` (sqlite backend)
    pub sqlite_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Json,
            data_dir: None,
            backup_dir_name: "revisions".to_string(),
            max_backups: None,
            sqlite_file: "cellcurate.db".to_string(),
        }
    }
}

impl StorageConfig {
    /// Configured data directory, or `<data_local_dir>/cellcurate`
    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("cellcurate")
        })
    }

    /// Open the configured persistence gateway
    pub fn open_gateway(&self) -> Result<Box<dyn PersistenceGateway>> {
        let dir = self.resolved_data_dir();
        debug!("Opening {:?} gateway in {}", self.backend, dir.display());
        match self.backend {
            BackendKind::Json => Ok(Box::new(
                JsonFileGateway::new(&dir)?
                    .with_backup_dir_name(&self.backup_dir_name)
                    .with_max_backups(self.max_backups),
            )),
            BackendKind::Sqlite => {
                std::fs::create_dir_all(&dir)?;
                Ok(Box::new(
                    SqliteGateway::open(dir.join(&self.sqlite_file))?
                        .with_max_backups(self.max_backups),
                ))
            }
        }
    }
}

impl CurateConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Load configuration from a TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: CurateConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Layer an optional TOML file and `CELLCURATE__*` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path.to_path_buf())
                    .format(config::FileFormat::Toml)
                    .required(false),
            );
        }
        let layered = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let config: CurateConfig = layered.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.autosave.every_n_events == 0 {
            return Err(invalid("autosave.every_n_events must be at least 1"));
        }
        if self.connectivity.max_hops == 0 {
            return Err(invalid("connectivity.max_hops must be at least 1"));
        }
        if self.storage.max_backups == Some(0) {
            return Err(invalid("storage.max_backups must be at least 1 when set"));
        }
        if self.storage.backup_dir_name.trim().is_empty() {
            return Err(invalid("storage.backup_dir_name cannot be empty"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> CellCurateError {
    CellCurateError::Config(config::ConfigError::Message(message.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = CurateConfig::default();
        assert_eq!(config.autosave.every_n_events, 6);
        assert_eq!(config.connectivity.max_hops, 10);
        assert_eq!(config.connectivity.default_mode, DisplayMode::Selected);
        assert_eq!(config.storage.backend, BackendKind::Json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config = CurateConfig::from_toml(
            r#"
            [autosave]
            every_n_events = 3

            [connectivity]
            default_mode = "up_and_downstream"
            polarity = "inhibitory"
            "#,
        )
        .unwrap();
        assert_eq!(config.autosave.every_n_events, 3);
        assert!(config.autosave.enabled);
        assert_eq!(config.connectivity.default_mode, DisplayMode::UpAndDownstream);
        assert_eq!(Polarities::from(config.connectivity.polarity), Polarities::INHIBITORY);
        assert_eq!(config.storage.backup_dir_name, "revisions");
    }

    #[test]
    fn test_validation_rejects_zero() {
        let err = CurateConfig::from_toml("[connectivity]\nmax_hops = 0\n").unwrap_err();
        assert!(err.to_string().contains("max_hops"));
        assert!(CurateConfig::from_toml("[autosave]\nevery_n_events = 0\n").is_err());
    }

    #[test]
    #[serial]
    fn test_load_layers_file_and_env() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[autosave]\nevery_n_events = 4\n[storage]\nbackend = \"sqlite\"\n")
            .unwrap();

        std::env::set_var("CELLCURATE__CONNECTIVITY__MAX_HOPS", "3");
        let config = CurateConfig::load(Some(&path));
        std::env::remove_var("CELLCURATE__CONNECTIVITY__MAX_HOPS");

        let config = config.unwrap();
        assert_eq!(config.autosave.every_n_events, 4);
        assert_eq!(config.storage.backend, BackendKind::Sqlite);
        assert_eq!(config.connectivity.max_hops, 3);
    }

    #[test]
    #[serial]
    fn test_load_without_file_uses_defaults() {
        let config = CurateConfig::load(None).unwrap();
        assert_eq!(config, CurateConfig::default());
    }

    #[test]
    fn test_open_gateway_in_data_dir() {
        let dir = TempDir::new().unwrap();
        let storage = StorageConfig {
            backend: BackendKind::Sqlite,
            data_dir: Some(dir.path().to_path_buf()),
            ..StorageConfig::default()
        };
        let gateway = storage.open_gateway().unwrap();
        assert!(gateway
            .list_backups(&crate::types::SessionRef::new("s"))
            .unwrap()
            .is_empty());
        assert!(dir.path().join("cellcurate.db").exists());
    }
}
