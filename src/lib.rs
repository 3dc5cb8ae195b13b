//! Cellcurate - Classification Engine for Spike-Sorted Neural Units
//!
//! The engine behind an interactive cell-curation shell:
//! - Active-subset resolution from independent filter predicates
//! - Reversible, diff-based history of classification edits across sessions
//! - Bounded traversals over inferred excitatory/inhibitory connections
//! - Per-session persistence with backups and a provenance log
//!
//! # Architecture
//!
//! The system is organized into several layers:
//! - **Store**: Cells and sessions as loaded ([`CellStore`])
//! - **Classification**: The only writer of the store, with undo and save ([`ClassificationState`])
//! - **Filter**: Predicate state and subset resolution ([`SubsetResolver`])
//! - **Connectivity**: Edge lists, derived synaptic statistics, traversals ([`ConnectivityGraph`])
//! - **Storage**: Persistence gateways (JSON files, SQLite)
//! - **Explorer**: The context object tying the layers together ([`Explorer`])
//!
//! # Example
//!
//! ```ignore
//! use cellcurate_core::{Dataset, Explorer, JsonFileGateway, SaveMode};
//! use std::collections::BTreeSet;
//!
//! fn main() -> cellcurate_core::Result<()> {
//!     let loaded = Dataset::from_file("recordings.json".as_ref())?.load()?;
//!     let mut explorer = Explorer::new(loaded);
//!
//!     // Fast-spiking units only
//!     let subset = explorer.set_text_filter(".firingRate > 10").cells.clone();
//!     explorer.assign_cell_type(&subset, "Narrow Interneuron")?;
//!
//!     let gateway = JsonFileGateway::new("curation")?;
//!     let report = explorer.save(SaveMode::TouchedOnly, &gateway);
//!     assert!(report.is_success());
//!     Ok(())
//! }
//! ```

pub mod attributes;
pub mod classification;
pub mod config;
pub mod connectivity;
pub mod dataset;
pub mod error;
pub mod explorer;
pub mod export;
pub mod filter;
pub mod storage;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use attributes::{AttrKind, Attribute, AttributeRegistry};
pub use classification::{
    AutosaveOutcome, ClassificationState, SaveMode, SaveReport, SessionSaveOutcome, UndoResult,
};
pub use config::CurateConfig;
pub use connectivity::{Closure, ConnectivityGraph, ConnectivityView, Neighbors, SynapticStats};
pub use dataset::{Dataset, LoadedDataset};
pub use error::{CellCurateError, Result, ValidationError};
pub use explorer::Explorer;
pub use export::{DatasetExport, ExportSink, JsonExportSink};
pub use filter::{Resolution, SubsetResolver};
pub use storage::{
    BackupId, JsonFileGateway, PersistenceGateway, SessionSnapshot, SqliteGateway,
};
pub use store::{Cell, CellStore};
pub use types::{
    BatchId, CellIndex, Direction, DisplayMode, FieldName, FieldValue, Polarities, Polarity,
    SessionRef, SetOp,
};
