//! Undo history of classification edits
//!
//! The stack starts with a baseline entry that is never popped. Each event
//! is a diff record: it keeps the cells an edit targeted plus the old values
//! of only those cells whose value actually changed.

use crate::types::{CellIndex, FieldName, FieldValue};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Snapshot of the values an edit is about to overwrite
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub field: FieldName,
    /// Cells the edit was requested for
    pub targets: Vec<CellIndex>,
    /// Pre-edit value of every cell the edit changed
    pub previous: Vec<(CellIndex, FieldValue)>,
}

impl ClassificationEvent {
    pub fn new(
        field: FieldName,
        targets: Vec<CellIndex>,
        previous: Vec<(CellIndex, FieldValue)>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            field,
            targets,
            previous,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Entry {
    Baseline { loaded_at: DateTime<Utc> },
    Event(ClassificationEvent),
}

/// Append-only stack of classification events over a baseline
#[derive(Debug, Clone, PartialEq)]
pub struct History {
    entries: Vec<Entry>,
}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}

impl History {
    pub fn new() -> Self {
        Self {
            entries: vec![Entry::Baseline {
                loaded_at: Utc::now(),
            }],
        }
    }

    /// Entries including the baseline
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always false: the baseline is permanent
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Events above the baseline
    pub fn depth(&self) -> usize {
        self.entries.len() - 1
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        match self.entries.first() {
            Some(Entry::Baseline { loaded_at }) => *loaded_at,
            _ => Utc::now(),
        }
    }

    pub fn push(&mut self, event: ClassificationEvent) {
        self.entries.push(Entry::Event(event));
    }

    /// Pop the newest event; the baseline stays
    pub fn pop(&mut self) -> Option<ClassificationEvent> {
        if self.entries.len() <= 1 {
            return None;
        }
        match self.entries.pop() {
            Some(Entry::Event(event)) => Some(event),
            Some(baseline) => {
                self.entries.push(baseline);
                None
            }
            None => None,
        }
    }

    pub fn last(&self) -> Option<&ClassificationEvent> {
        match self.entries.last() {
            Some(Entry::Event(event)) => Some(event),
            _ => None,
        }
    }

    /// Events from newest to oldest
    pub fn events(&self) -> impl Iterator<Item = &ClassificationEvent> {
        self.entries.iter().rev().filter_map(|e| match e {
            Entry::Event(event) => Some(event),
            Entry::Baseline { .. } => None,
        })
    }

    /// Values `field` of `cell` held before each edit that changed it, newest first
    pub fn past_values(&self, cell: CellIndex, field: FieldName) -> Vec<&FieldValue> {
        self.events()
            .filter(|e| e.field == field)
            .filter_map(|e| e.previous.iter().find(|(i, _)| *i == cell).map(|(_, v)| v))
            .collect()
    }

    /// Drop the oldest events so at most `keep` remain; returns how many went
    pub fn compact(&mut self, keep: usize) -> usize {
        let depth = self.depth();
        if depth <= keep {
            return 0;
        }
        let drop = depth - keep;
        self.entries.drain(1..=drop);
        drop
    }
}
