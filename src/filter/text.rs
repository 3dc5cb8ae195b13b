//! Free-text filter grammar
//!
//! ```text
//! query   := group (" | " group)*
//! group   := clause (" & " clause)*
//! clause  := "." attribute op number     (op: >  <  ==  ~=)
//!          | substring                   (case-insensitive)
//! ```
//!
//! Clauses inside a group intersect left to right; groups are unioned, so
//! `A & B | C` means `(A ∩ B) ∪ C`. A clause that fails validation is
//! reported and evaluates to every cell.

use crate::attributes::{Attribute, AttributeRegistry};
use crate::connectivity::ConnectivityGraph;
use crate::error::ValidationError;
use crate::store::CellStore;
use crate::types::CellIndex;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use tracing::warn;

const AND: &str = " & ";
const OR: &str = " | ";

static COMPARISON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\.([A-Za-z_][A-Za-z0-9_]*)\s*(==|~=|>|<)\s*(\S+)$").expect("valid regex")
});

/// Numeric comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Greater,
    Less,
    Equal,
    NotEqual,
}

impl CompareOp {
    fn parse(op: &str) -> Option<Self> {
        match op {
            ">" => Some(CompareOp::Greater),
            "<" => Some(CompareOp::Less),
            "==" => Some(CompareOp::Equal),
            "~=" => Some(CompareOp::NotEqual),
            _ => None,
        }
    }

    fn apply(self, lhs: f64, rhs: f64) -> bool {
        match self {
            CompareOp::Greater => lhs > rhs,
            CompareOp::Less => lhs < rhs,
            CompareOp::Equal => lhs == rhs,
            CompareOp::NotEqual => lhs != rhs,
        }
    }
}

/// One atomic clause
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    Compare {
        attribute: Attribute,
        op: CompareOp,
        value: f64,
    },
    Substring(String),
    /// Invalid or empty clause; matches every cell
    Unconstrained,
}

/// Parsed free-text query: a union of intersections
#[derive(Debug, Clone, PartialEq)]
pub struct TextQuery {
    pub groups: Vec<Vec<Clause>>,
}

impl TextQuery {
    /// Parse `text`, collecting a diagnostic for every rejected clause
    pub fn parse(text: &str, registry: &AttributeRegistry) -> (Self, Vec<ValidationError>) {
        let mut diagnostics = Vec::new();
        let groups = text
            .split(OR)
            .map(|group| {
                group
                    .split(AND)
                    .map(|raw| match parse_clause(raw.trim(), registry) {
                        Ok(clause) => clause,
                        Err(err) => {
                            warn!("Free-text clause {:?} ignored: {}", raw.trim(), err);
                            diagnostics.push(err);
                            Clause::Unconstrained
                        }
                    })
                    .collect()
            })
            .collect();
        (Self { groups }, diagnostics)
    }

    /// Cells matching the query, drawn from every cell in the store
    pub fn evaluate(
        &self,
        store: &CellStore,
        graph: &ConnectivityGraph,
        registry: &AttributeRegistry,
    ) -> BTreeSet<CellIndex> {
        let needs_haystack = self
            .groups
            .iter()
            .flatten()
            .any(|c| matches!(c, Clause::Substring(_)));
        let haystacks: Vec<String> = if needs_haystack {
            store.iter().map(|c| registry.haystack(c, graph)).collect()
        } else {
            Vec::new()
        };

        let clause_cells = |clause: &Clause| -> BTreeSet<CellIndex> {
            match clause {
                Clause::Unconstrained => store.indices().collect(),
                Clause::Substring(needle) => store
                    .iter()
                    .zip(haystacks.iter())
                    .filter(|(_, hay)| hay.contains(needle.as_str()))
                    .map(|(c, _)| c.index())
                    .collect(),
                Clause::Compare {
                    attribute,
                    op,
                    value,
                } => store
                    .iter()
                    .filter(|c| {
                        registry
                            .value(attribute, c, graph)
                            .as_number()
                            .is_some_and(|n| op.apply(n, *value))
                    })
                    .map(|c| c.index())
                    .collect(),
            }
        };

        let mut result = BTreeSet::new();
        for group in &self.groups {
            let mut clauses = group.iter();
            let Some(first) = clauses.next() else {
                continue;
            };
            let mut acc = clause_cells(first);
            for clause in clauses {
                if acc.is_empty() {
                    break;
                }
                let next = clause_cells(clause);
                acc.retain(|idx| next.contains(idx));
            }
            result.extend(acc);
        }
        result
    }
}

fn parse_clause(raw: &str, registry: &AttributeRegistry) -> Result<Clause, ValidationError> {
    if raw.is_empty() {
        return Ok(Clause::Unconstrained);
    }
    if !raw.starts_with('.') {
        return Ok(Clause::Substring(raw.to_lowercase()));
    }

    let caps = COMPARISON
        .captures(raw)
        .ok_or_else(|| ValidationError::MalformedClause(raw.to_string()))?;
    let attribute = registry.numeric(&caps[1])?;
    let op = CompareOp::parse(&caps[2])
        .ok_or_else(|| ValidationError::MalformedClause(raw.to_string()))?;
    let value: f64 = caps[3]
        .parse()
        .map_err(|_| ValidationError::MalformedClause(raw.to_string()))?;
    Ok(Clause::Compare {
        attribute,
        op,
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::cell;
    use crate::store::Session;
    use crate::types::{BatchId, Metric, SessionRef};

    /// Five cells with firing rates 1..=5; odd cells labelled "burst"
    fn fixture() -> (CellStore, ConnectivityGraph, AttributeRegistry) {
        let cells: Vec<_> = (1..=5)
            .map(|i| {
                let mut c = cell(i, 1, i as u32, if i <= 2 { "Pyramidal Cell" } else { "Narrow Interneuron" });
                c.metrics.insert("firingRate".into(), Metric::Number(i as f64));
                if i % 2 == 1 {
                    c.label = "burst".into();
                }
                c
            })
            .collect();
        let session = Session {
            batch_id: BatchId(1),
            session_ref: SessionRef::new("s"),
            metadata: serde_json::Value::Null,
            cells: (1..=5).map(CellIndex).collect(),
        };
        let store = CellStore::from_parts(cells, vec![session]);
        let graph = ConnectivityGraph::empty(5);
        let registry = AttributeRegistry::build(&store);
        (store, graph, registry)
    }

    fn run(text: &str) -> (Vec<usize>, Vec<ValidationError>) {
        let (store, graph, registry) = fixture();
        let (query, diagnostics) = TextQuery::parse(text, &registry);
        let cells = query
            .evaluate(&store, &graph, &registry)
            .into_iter()
            .map(|c| c.0)
            .collect();
        (cells, diagnostics)
    }

    #[test]
    fn test_numeric_comparisons() {
        assert_eq!(run(".firingRate > 3").0, vec![4, 5]);
        assert_eq!(run(".firingRate < 2").0, vec![1]);
        assert_eq!(run(".firingRate == 2").0, vec![2]);
        assert_eq!(run(".firingRate ~= 2").0, vec![1, 3, 4, 5]);
        assert_eq!(run(".cellID>4").0, vec![5]);
    }

    #[test]
    fn test_substring_is_case_insensitive() {
        assert_eq!(run("PYRAMIDAL").0, vec![1, 2]);
        assert_eq!(run("Burst").0, vec![1, 3, 5]);
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        // A = interneuron {3,4,5}, B = burst {1,3,5}, C = rate < 2 {1}
        assert_eq!(
            run("interneuron & burst | .firingRate < 2").0,
            vec![1, 3, 5]
        );
        // A ∩ (B ∪ C) would have been {3,5}
        assert_eq!(run("interneuron & burst").0, vec![3, 5]);
        assert_eq!(
            run(".firingRate > 4 | .firingRate < 2 | pyramidal & burst").0,
            vec![1, 5]
        );
    }

    #[test]
    fn test_invalid_clauses_fail_open() {
        let (cells, diagnostics) = run(".noSuchField > 3 & burst");
        assert_eq!(cells, vec![1, 3, 5]);
        assert_eq!(
            diagnostics,
            vec![ValidationError::UnknownAttribute("noSuchField".into())]
        );

        let (cells, diagnostics) = run(".firingRate >> 3");
        assert_eq!(cells, vec![1, 2, 3, 4, 5]);
        assert!(matches!(diagnostics[0], ValidationError::MalformedClause(_)));

        let (_, diagnostics) = run(".cellType > 2");
        assert_eq!(diagnostics, vec![ValidationError::NotNumeric("cellType".into())]);

        let (_, diagnostics) = run(".firingRate > fast");
        assert!(matches!(diagnostics[0], ValidationError::MalformedClause(_)));
    }

    #[test]
    fn test_no_match_is_empty_not_error() {
        let (cells, diagnostics) = run("thalamus");
        assert!(cells.is_empty());
        assert!(diagnostics.is_empty());
    }
}
