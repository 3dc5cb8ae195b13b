//! Typed attribute registry
//!
//! Maps attribute names used by filters (`cellType`, `firingRate`,
//! `synapticEffect`, ...) to typed accessors. The registry is built once per
//! dataset from the mutable fields, the identifiers, the graph-derived
//! statistics and every metric present in the store. Lookups of unknown
//! names fail deterministically with [`ValidationError::UnknownAttribute`].

use crate::connectivity::ConnectivityGraph;
use crate::error::ValidationError;
use crate::store::{Cell, CellStore};
use crate::types::{FieldName, Metric};
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};

/// Source of an attribute value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attribute {
    /// Mutable classification field
    Field(FieldName),
    BatchId,
    Uid,
    Index,
    SynapticConnectionsIn,
    SynapticConnectionsOut,
    SynapticEffect,
    /// Read-only metric supplied with the dataset
    Metric(String),
}

impl Attribute {
    /// Field written through the classification layer, if the attribute is mutable
    pub fn mutable_field(&self) -> Option<FieldName> {
        match self {
            Attribute::Field(f) => Some(*f),
            _ => None,
        }
    }
}

/// Value shape of an attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrKind {
    Numeric,
    Text,
    TextSet,
}

/// Attribute value read from one cell
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue<'a> {
    Number(f64),
    Text(Cow<'a, str>),
    Set(&'a BTreeSet<String>),
    Missing,
}

impl AttrValue<'_> {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            AttrValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Whether the value equals (or, for sets, contains) one of `values`
    pub fn matches_any(&self, values: &BTreeSet<String>) -> bool {
        match self {
            AttrValue::Text(s) => values.contains(s.as_ref()),
            AttrValue::Set(set) => set.iter().any(|s| values.contains(s)),
            AttrValue::Number(n) => values.contains(&format_number(*n)),
            AttrValue::Missing => false,
        }
    }
}

/// Render whole numbers without a trailing `.0` so `"3"` matches `3.0`
fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

#[derive(Debug, Clone)]
struct Entry {
    attribute: Attribute,
    kind: AttrKind,
}

/// Name → accessor table for one dataset
#[derive(Debug, Clone)]
pub struct AttributeRegistry {
    entries: BTreeMap<String, Entry>,
}

impl AttributeRegistry {
    /// Register the fixed attributes plus every metric found in `store`
    ///
    /// A metric is numeric when every cell that carries it holds a number.
    pub fn build(store: &CellStore) -> Self {
        let mut entries = BTreeMap::new();
        let mut add = |name: &str, attribute: Attribute, kind: AttrKind| {
            entries.insert(name.to_string(), Entry { attribute, kind });
        };

        for field in FieldName::ALL {
            let kind = if field.is_set_valued() {
                AttrKind::TextSet
            } else {
                AttrKind::Text
            };
            add(field.as_str(), Attribute::Field(field), kind);
        }
        add("batchID", Attribute::BatchId, AttrKind::Numeric);
        add("UID", Attribute::Uid, AttrKind::Numeric);
        add("cellID", Attribute::Index, AttrKind::Numeric);
        add(
            "synapticConnectionsIn",
            Attribute::SynapticConnectionsIn,
            AttrKind::Numeric,
        );
        add(
            "synapticConnectionsOut",
            Attribute::SynapticConnectionsOut,
            AttrKind::Numeric,
        );
        add("synapticEffect", Attribute::SynapticEffect, AttrKind::Text);

        let mut metric_kinds: BTreeMap<&str, AttrKind> = BTreeMap::new();
        for cell in store.iter() {
            for (name, metric) in cell.metrics() {
                let kind = match metric {
                    Metric::Number(_) => AttrKind::Numeric,
                    Metric::Text(_) => AttrKind::Text,
                };
                metric_kinds
                    .entry(name.as_str())
                    .and_modify(|k| {
                        if *k != kind {
                            *k = AttrKind::Text;
                        }
                    })
                    .or_insert(kind);
            }
        }
        for (name, kind) in metric_kinds {
            // Fixed attributes win over metrics of the same name
            if !entries.contains_key(name) {
                entries.insert(
                    name.to_string(),
                    Entry {
                        attribute: Attribute::Metric(name.to_string()),
                        kind,
                    },
                );
            }
        }

        Self { entries }
    }

    fn entry(&self, name: &str) -> Result<&Entry, ValidationError> {
        self.entries
            .get(name)
            .or_else(|| {
                self.entries
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(name))
                    .map(|(_, e)| e)
            })
            .ok_or_else(|| ValidationError::UnknownAttribute(name.to_string()))
    }

    /// Resolve a name to its attribute (exact match first, then case-insensitive)
    pub fn lookup(&self, name: &str) -> Result<(Attribute, AttrKind), ValidationError> {
        self.entry(name).map(|e| (e.attribute.clone(), e.kind))
    }

    /// Resolve a name that must carry numeric values
    pub fn numeric(&self, name: &str) -> Result<Attribute, ValidationError> {
        let entry = self.entry(name)?;
        if entry.kind != AttrKind::Numeric {
            return Err(ValidationError::NotNumeric(name.to_string()));
        }
        Ok(entry.attribute.clone())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Read an attribute from a cell
    pub fn value<'a>(
        &self,
        attribute: &Attribute,
        cell: &'a Cell,
        graph: &ConnectivityGraph,
    ) -> AttrValue<'a> {
        let stats = graph.stats(cell.index());
        match attribute {
            Attribute::Field(FieldName::CellType) => AttrValue::Text(Cow::Borrowed(cell.cell_type())),
            Attribute::Field(FieldName::BrainRegion) => {
                AttrValue::Text(Cow::Borrowed(cell.brain_region()))
            }
            Attribute::Field(FieldName::Label) => AttrValue::Text(Cow::Borrowed(cell.label())),
            Attribute::Field(FieldName::DeepSuperficial) => {
                AttrValue::Text(Cow::Borrowed(cell.deep_superficial()))
            }
            Attribute::Field(FieldName::Tags) => AttrValue::Set(cell.tags()),
            Attribute::Field(FieldName::GroundTruth) => AttrValue::Set(cell.ground_truth()),
            Attribute::BatchId => AttrValue::Number(cell.batch_id().0 as f64),
            Attribute::Uid => AttrValue::Number(cell.uid() as f64),
            Attribute::Index => AttrValue::Number(cell.index().0 as f64),
            Attribute::SynapticConnectionsIn => stats
                .map(|s| AttrValue::Number(s.connections_in as f64))
                .unwrap_or(AttrValue::Missing),
            Attribute::SynapticConnectionsOut => stats
                .map(|s| AttrValue::Number(s.connections_out as f64))
                .unwrap_or(AttrValue::Missing),
            Attribute::SynapticEffect => stats
                .map(|s| AttrValue::Text(Cow::Borrowed(s.effect.as_str())))
                .unwrap_or(AttrValue::Missing),
            Attribute::Metric(name) => match cell.metric(name) {
                Some(Metric::Number(n)) => AttrValue::Number(*n),
                Some(Metric::Text(s)) => AttrValue::Text(Cow::Borrowed(s)),
                None => AttrValue::Missing,
            },
        }
    }

    /// Lowercased concatenation of every string-valued attribute of a cell
    ///
    /// Tag and ground-truth sets are left out; free-text search matches
    /// substrings of this haystack.
    pub fn haystack(&self, cell: &Cell, graph: &ConnectivityGraph) -> String {
        let mut parts: Vec<Cow<'_, str>> = Vec::new();
        for entry in self.entries.values() {
            if entry.kind != AttrKind::Text {
                continue;
            }
            if let AttrValue::Text(s) = self.value(&entry.attribute, cell, graph) {
                parts.push(s);
            }
        }
        parts.join(" ").to_lowercase()
    }
}
