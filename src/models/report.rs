//! Change report structures produced by the snapshot differ.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::SubItem;

/// Caller-assigned importance of a scalar change.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

/// Whether the previous newest history item was found again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Anchor {
    /// Previous newest item located in the new list
    Matched,
    /// Old list was empty; everything is new
    NoPrevious,
    /// Previous newest item vanished; the whole new list is reported
    Lost,
}

/// One change detected for a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Change {
    /// Id not present (or only failed) in the previous snapshot
    NewRecord,

    /// A tracked scalar differs
    Field {
        field: String,
        old: Value,
        new: Value,
        severity: Severity,
    },

    /// Events prepended to an append-style list
    History {
        list: String,
        new_events: Vec<SubItem>,
        #[serde(skip_serializing_if = "Option::is_none")]
        previous_latest: Option<SubItem>,
        anchor: Anchor,
    },

    /// Items added to a list that grows by category
    Staged {
        list: String,
        added: Vec<SubItem>,
        #[serde(skip_serializing_if = "Option::is_none")]
        previous_last: Option<SubItem>,
        category_changed: bool,
    },

    /// Items added to an unordered keyed collection
    Keyed { list: String, added: Vec<SubItem> },

    /// Id disappeared upstream
    Removed,
}

/// Aggregate counters for a report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub records_scanned: usize,
    pub new_records: usize,
    pub field_changes: usize,
    pub new_history_events: usize,
    pub lost_anchors: usize,
    pub staged_additions: usize,
    pub keyed_additions: usize,
    pub removed_records: usize,
}

/// Per-id changes between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeReport {
    pub generated_at: DateTime<Utc>,
    pub new_date: NaiveDate,
    pub old_date: NaiveDate,
    pub summary: ReportSummary,
    pub changes: BTreeMap<String, Vec<Change>>,
}

impl ChangeReport {
    pub fn new(new_date: NaiveDate, old_date: NaiveDate) -> Self {
        Self {
            generated_at: Utc::now(),
            new_date,
            old_date,
            summary: ReportSummary::default(),
            changes: BTreeMap::new(),
        }
    }

    /// Record the changes for one id; an empty list leaves the id out.
    pub fn insert(&mut self, id: impl Into<String>, changes: Vec<Change>) {
        if changes.is_empty() {
            return;
        }
        for change in &changes {
            self.tally(change);
        }
        self.changes.insert(id.into(), changes);
    }

    fn tally(&mut self, change: &Change) {
        let summary = &mut self.summary;
        match change {
            Change::NewRecord => summary.new_records += 1,
            Change::Field { .. } => summary.field_changes += 1,
            Change::History {
                new_events, anchor, ..
            } => {
                summary.new_history_events += new_events.len();
                if *anchor == Anchor::Lost {
                    summary.lost_anchors += 1;
                }
            }
            Change::Staged { added, .. } => summary.staged_additions += added.len(),
            Change::Keyed { added, .. } => summary.keyed_additions += added.len(),
            Change::Removed => summary.removed_records += 1,
        }
    }

    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Number of ids with at least one change.
    pub fn change_count(&self) -> usize {
        self.changes.len()
    }

    pub fn get(&self, id: &str) -> Option<&[Change]> {
        self.changes.get(id).map(Vec::as_slice)
    }
}
