//! Dated, deduplicated collections of records.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{FetchOutcome, Record};

/// One entry per id: either a fetched record or a failure placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "SnapshotFile", into = "SnapshotFile")]
pub struct Snapshot {
    pub date: NaiveDate,
    pub generated_at: DateTime<Utc>,
    entries: BTreeMap<String, FetchOutcome>,
}

/// How an outcome changed a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Absorbed {
    /// First outcome seen for the id
    Inserted,
    /// Replaced an earlier entry
    Replaced,
    /// A failure arrived for an id that already has a record
    Ignored,
}

impl Snapshot {
    /// Create an empty snapshot for the given date.
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            generated_at: Utc::now(),
            entries: BTreeMap::new(),
        }
    }

    /// Apply one outcome as a cumulative update.
    ///
    /// A record always replaces the current entry. A failure only lands
    /// when the id has no record yet, so success overrides failure
    /// regardless of arrival order.
    pub fn absorb(&mut self, outcome: FetchOutcome) -> Absorbed {
        let id = outcome.id().to_string();
        match self.entries.get(&id) {
            None => {
                self.entries.insert(id, outcome);
                Absorbed::Inserted
            }
            Some(FetchOutcome::Ok(_)) if !outcome.is_ok() => Absorbed::Ignored,
            Some(_) => {
                self.entries.insert(id, outcome);
                Absorbed::Replaced
            }
        }
    }

    /// Merge new outcomes on top of an older snapshot.
    ///
    /// Ids absent from `outcomes` are carried over unchanged.
    pub fn merge(
        old: &Snapshot,
        outcomes: impl IntoIterator<Item = FetchOutcome>,
        date: NaiveDate,
    ) -> Snapshot {
        let mut merged = Snapshot {
            date,
            generated_at: Utc::now(),
            entries: old.entries.clone(),
        };
        for outcome in outcomes {
            merged.absorb(outcome);
        }
        merged
    }

    pub fn get(&self, id: &str) -> Option<&FetchOutcome> {
        self.entries.get(id)
    }

    /// The record for `id`, if it was fetched successfully.
    pub fn record(&self, id: &str) -> Option<&Record> {
        self.entries.get(id).and_then(FetchOutcome::record)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries in id order.
    pub fn entries(&self) -> impl Iterator<Item = &FetchOutcome> {
        self.entries.values()
    }

    /// Successfully fetched records in id order.
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.entries.values().filter_map(FetchOutcome::record)
    }

    pub fn record_count(&self) -> usize {
        self.records().count()
    }

    /// Ids whose entry is a failure placeholder.
    pub fn failed_ids(&self) -> Vec<String> {
        self.entries
            .values()
            .filter(|e| !e.is_ok())
            .map(|e| e.id().to_string())
            .collect()
    }

    /// Consume the snapshot into outcomes, e.g. to replay it as a log.
    pub fn into_outcomes(self) -> impl Iterator<Item = FetchOutcome> {
        self.entries.into_values()
    }
}

/// On-disk layout of a snapshot file.
#[derive(Serialize, Deserialize)]
struct SnapshotFile {
    date: NaiveDate,
    generated_at: DateTime<Utc>,
    count: usize,
    records: BTreeMap<String, FetchOutcome>,
}

impl From<SnapshotFile> for Snapshot {
    fn from(file: SnapshotFile) -> Self {
        Self {
            date: file.date,
            generated_at: file.generated_at,
            entries: file.records,
        }
    }
}

impl From<Snapshot> for SnapshotFile {
    fn from(snapshot: Snapshot) -> Self {
        Self {
            date: snapshot.date,
            generated_at: snapshot.generated_at,
            count: snapshot.entries.len(),
            records: snapshot.entries,
        }
    }
}
