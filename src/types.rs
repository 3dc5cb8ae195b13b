//! Core data types for the cellcurate engine
//!
//! This module defines the identifiers and value types shared by the store,
//! the classification history, the subset resolver and the connectivity
//! graph. Identifiers are newtypes so global cell indices, session batch IDs
//! and session names cannot be mixed up.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Global cell index, 1-based and stable for the loaded dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellIndex(pub usize);

impl fmt::Display for CellIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session (batch) identifier, 1-based in load order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub u32);

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name under which a session is persisted
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionRef(pub String);

impl SessionRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Mutable classification fields of a cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldName {
    /// Putative cell type (exactly one per cell)
    CellType,
    /// Free-form tag set
    Tags,
    /// Anatomical region
    BrainRegion,
    /// Free-text label
    Label,
    /// Laminar position
    DeepSuperficial,
    /// Externally validated classification labels
    GroundTruth,
}

impl FieldName {
    /// All mutable fields, in persistence order
    pub const ALL: [FieldName; 6] = [
        FieldName::CellType,
        FieldName::Tags,
        FieldName::BrainRegion,
        FieldName::Label,
        FieldName::DeepSuperficial,
        FieldName::GroundTruth,
    ];

    /// Attribute name as exposed to filters and persisted records
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldName::CellType => "cellType",
            FieldName::Tags => "tags",
            FieldName::BrainRegion => "brainRegion",
            FieldName::Label => "label",
            FieldName::DeepSuperficial => "deepSuperficial",
            FieldName::GroundTruth => "groundTruthClassification",
        }
    }

    /// Whether the field holds a set of strings rather than a single string
    pub fn is_set_valued(&self) -> bool {
        matches!(self, FieldName::Tags | FieldName::GroundTruth)
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FieldName::ALL
            .iter()
            .copied()
            .find(|f| f.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown field: {}", s))
    }
}

/// Value held by a mutable field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Set(BTreeSet<String>),
}

impl FieldValue {
    pub fn text(value: impl Into<String>) -> Self {
        FieldValue::Text(value.into())
    }

    pub fn set<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FieldValue::Set(values.into_iter().map(Into::into).collect())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            FieldValue::Set(_) => None,
        }
    }

    pub fn as_set(&self) -> Option<&BTreeSet<String>> {
        match self {
            FieldValue::Set(s) => Some(s),
            FieldValue::Text(_) => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Set(set) => {
                let joined: Vec<&str> = set.iter().map(String::as_str).collect();
                write!(f, "{{{}}}", joined.join(", "))
            }
        }
    }
}

/// Add or remove a member of a set-valued field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetOp {
    Add,
    Remove,
}

/// Read-only metric value supplied by the external data source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Metric {
    Number(f64),
    Text(String),
}

/// Connection polarity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    Excitatory,
    Inhibitory,
}

/// Subset of polarities a traversal follows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Polarities {
    pub excitatory: bool,
    pub inhibitory: bool,
}

impl Polarities {
    pub const EXCITATORY: Polarities = Polarities {
        excitatory: true,
        inhibitory: false,
    };
    pub const INHIBITORY: Polarities = Polarities {
        excitatory: false,
        inhibitory: true,
    };
    pub const BOTH: Polarities = Polarities {
        excitatory: true,
        inhibitory: true,
    };

    pub fn contains(&self, polarity: Polarity) -> bool {
        match polarity {
            Polarity::Excitatory => self.excitatory,
            Polarity::Inhibitory => self.inhibitory,
        }
    }
}

impl Default for Polarities {
    fn default() -> Self {
        Polarities::BOTH
    }
}

impl FromStr for Polarities {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "excitatory" => Ok(Polarities::EXCITATORY),
            "inhibitory" => Ok(Polarities::INHIBITORY),
            "both" | "all" => Ok(Polarities::BOTH),
            other => Err(format!("unknown polarity: {}", other)),
        }
    }
}

/// Traversal direction relative to the focused cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Follow edges backwards (presynaptic partners, upstream)
    Incoming,
    /// Follow edges forwards (postsynaptic partners, downstream)
    Outgoing,
}

/// Position of an edge inside one of the two edge lists
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeId {
    pub polarity: Polarity,
    pub row: usize,
}

/// Which connectivity outputs are computed for the focused cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayMode {
    None,
    #[default]
    Selected,
    Upstream,
    Downstream,
    UpAndDownstream,
    All,
}

impl FromStr for DisplayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "none" => Ok(DisplayMode::None),
            "selected" => Ok(DisplayMode::Selected),
            "upstream" => Ok(DisplayMode::Upstream),
            "downstream" => Ok(DisplayMode::Downstream),
            "upanddownstream" => Ok(DisplayMode::UpAndDownstream),
            "all" => Ok(DisplayMode::All),
            other => Err(format!("unknown display mode: {}", other)),
        }
    }
}

/// Net synaptic effect of a cell's outgoing connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SynapticEffect {
    Excitatory,
    Inhibitory,
    #[default]
    Unknown,
}

impl SynapticEffect {
    pub fn as_str(&self) -> &'static str {
        match self {
            SynapticEffect::Excitatory => "Excitatory",
            SynapticEffect::Inhibitory => "Inhibitory",
            SynapticEffect::Unknown => "Unknown",
        }
    }
}
