//! Diff calculation between two dated snapshots.
//!
//! Only successfully fetched records are compared, and only the fields and
//! sub-lists declared in [`DiffConfig`]. Everything else in a record is
//! opaque payload.

use std::collections::HashSet;

use serde_json::Value;

use crate::models::{
    Anchor, Change, ChangeReport, DiffConfig, ItemKey, ListKind, ListSpec, Record, Snapshot,
    SubItem,
};

/// Calculator for computing change reports between snapshots.
#[derive(Debug, Clone)]
pub struct DiffCalculator {
    config: DiffConfig,
}

impl DiffCalculator {
    pub fn new(config: DiffConfig) -> Self {
        Self { config }
    }

    /// Calculate the changes from `old` to `new`.
    ///
    /// Ids whose new entry is a failure placeholder are skipped; ids
    /// without a previous successful record are reported as new.
    pub fn calculate(&self, old: &Snapshot, new: &Snapshot) -> ChangeReport {
        let mut report = ChangeReport::new(new.date, old.date);

        for entry in new.entries() {
            report.summary.records_scanned += 1;
            let Some(record) = entry.record() else {
                continue;
            };
            let changes = match old.record(record.id()) {
                None => vec![Change::NewRecord],
                Some(previous) => self.diff_record(previous, record),
            };
            report.insert(record.id(), changes);
        }

        if self.config.report_removed {
            for previous in old.records() {
                if !new.contains(previous.id()) {
                    report.insert(previous.id(), vec![Change::Removed]);
                }
            }
        }

        report
    }

    /// Changes between two versions of the same record.
    pub fn diff_record(&self, old: &Record, new: &Record) -> Vec<Change> {
        let mut changes = Vec::new();

        for tracked in &self.config.tracked_fields {
            let before = old.field(&tracked.path).cloned().unwrap_or(Value::Null);
            let after = new.field(&tracked.path).cloned().unwrap_or(Value::Null);
            if before != after {
                changes.push(Change::Field {
                    field: tracked.name.clone(),
                    old: before,
                    new: after,
                    severity: tracked.severity,
                });
            }
        }

        for spec in &self.config.lists {
            let before = old.list(&spec.name);
            let after = new.list(&spec.name);
            let change = match spec.kind {
                ListKind::History => diff_history(spec, before, after),
                ListKind::Staged => diff_staged(spec, before, after),
                ListKind::Keyed => diff_keyed(spec, before, after),
            };
            changes.extend(change);
        }

        changes
    }
}

/// Newest-first history: locate the old head in the new list.
pub fn diff_history(spec: &ListSpec, old: &[SubItem], new: &[SubItem]) -> Option<Change> {
    if old == new {
        return None;
    }

    let (new_events, previous_latest, anchor) = match old.first() {
        None => (new.to_vec(), None, Anchor::NoPrevious),
        Some(head) => match new.iter().position(|item| item.same_entry(head, &spec.key)) {
            Some(k) => (new[..k].to_vec(), Some(new[k].clone()), Anchor::Matched),
            None => (new.to_vec(), Some(head.clone()), Anchor::Lost),
        },
    };

    if anchor == Anchor::Lost {
        log::warn!(
            "'{}': previous latest item not found in new list; reporting all {} items as new",
            spec.name,
            new.len()
        );
    }

    Some(Change::History {
        list: spec.name.clone(),
        new_events,
        previous_latest,
        anchor,
    })
}

/// Category-accumulating list: added items plus a category-change flag.
pub fn diff_staged(spec: &ListSpec, old: &[SubItem], new: &[SubItem]) -> Option<Change> {
    let added = added_items(&spec.key, old, new);
    if added.is_empty() {
        return None;
    }

    let category_changed = match &spec.category {
        Some(field) => {
            let known: HashSet<String> =
                old.iter().filter_map(|item| category_of(item, field)).collect();
            added
                .iter()
                .filter_map(|item| category_of(item, field))
                .any(|category| !known.contains(&category))
        }
        None => false,
    };

    Some(Change::Staged {
        list: spec.name.clone(),
        added,
        previous_last: old.last().cloned(),
        category_changed,
    })
}

/// Unordered keyed set: additions only.
pub fn diff_keyed(spec: &ListSpec, old: &[SubItem], new: &[SubItem]) -> Option<Change> {
    let added = added_items(&spec.key, old, new);
    if added.is_empty() {
        return None;
    }
    Some(Change::Keyed {
        list: spec.name.clone(),
        added,
    })
}

/// Items of `new` whose identity is absent from `old`, in `new` order.
fn added_items(key: &[String], old: &[SubItem], new: &[SubItem]) -> Vec<SubItem> {
    let known: HashSet<ItemKey> = old.iter().map(|item| item.identity(key)).collect();
    let mut emitted = HashSet::new();
    new.iter()
        .filter(|item| {
            let identity = item.identity(key);
            !known.contains(&identity) && emitted.insert(identity)
        })
        .cloned()
        .collect()
}

/// Category of an item; blank values carry no category.
fn category_of(item: &SubItem, field: &str) -> Option<String> {
    match item.get(field)? {
        Value::Null | Value::Bool(false) => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.trim().to_string()),
        Value::Array(a) if a.is_empty() => None,
        Value::Object(o) if o.is_empty() => None,
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FetchOutcome, Severity, TrackedField};
    use chrono::NaiveDate;
    use serde_json::json;

    fn event(desc: &str, date: &str, status: &str) -> SubItem {
        [
            ("event_description", desc),
            ("event_date", date),
            ("status", status),
        ]
        .into_iter()
        .collect()
    }

    fn stage(phase: &str, requirement: &str) -> SubItem {
        [("Phaze", phase), ("Requirement", requirement), ("Date", "")]
            .into_iter()
            .collect()
    }

    fn meeting(id: &str) -> SubItem {
        [("meeting_id", id), ("meeting_date", "01/01/2026")]
            .into_iter()
            .collect()
    }

    fn spec(kind: ListKind) -> ListSpec {
        DiffConfig::default()
            .lists
            .into_iter()
            .find(|l| l.kind == kind)
            .unwrap()
    }

    fn calculator() -> DiffCalculator {
        DiffCalculator::new(DiffConfig::default())
    }

    fn snapshot(day: u32, records: Vec<FetchOutcome>) -> Snapshot {
        let mut snapshot = Snapshot::new(NaiveDate::from_ymd_opt(2026, 4, day).unwrap());
        for outcome in records {
            snapshot.absorb(outcome);
        }
        snapshot
    }

    fn permit(id: &str, status: &str) -> Record {
        Record::new(id).unwrap().with_field("status", status)
    }

    #[test]
    fn test_history_prepended_events() {
        let a = event("Opened", "01/01", "done");
        let a_updated = event("Opened", "01/01", "approved");
        let b = event("Hearing", "02/01", "pending");

        let change = diff_history(&spec(ListKind::History), &[a], &[b.clone(), a_updated.clone()]);
        assert_eq!(
            change,
            Some(Change::History {
                list: "history".into(),
                new_events: vec![b],
                previous_latest: Some(a_updated),
                anchor: Anchor::Matched,
            })
        );
    }

    #[test]
    fn test_history_lost_anchor_reports_everything() {
        let old = vec![event("Opened", "01/01", "done")];
        let new = vec![event("Re-filed", "03/01", "x"), event("Scan", "02/01", "y")];

        match diff_history(&spec(ListKind::History), &old, &new) {
            Some(Change::History {
                new_events,
                previous_latest,
                anchor,
                ..
            }) => {
                assert_eq!(new_events, new);
                assert_eq!(previous_latest, Some(old[0].clone()));
                assert_eq!(anchor, Anchor::Lost);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_history_empty_old_and_unchanged() {
        let new = vec![event("Opened", "01/01", "done")];
        assert!(matches!(
            diff_history(&spec(ListKind::History), &[], &new),
            Some(Change::History {
                anchor: Anchor::NoPrevious,
                ..
            })
        ));
        assert_eq!(diff_history(&spec(ListKind::History), &new, &new), None);
    }

    #[test]
    fn test_history_in_place_update_has_no_new_events() {
        let old = vec![event("Opened", "01/01", "pending")];
        let new = vec![event("Opened", "01/01", "complete")];
        match diff_history(&spec(ListKind::History), &old, &new) {
            Some(Change::History {
                new_events,
                previous_latest,
                anchor,
                ..
            }) => {
                assert!(new_events.is_empty());
                assert_eq!(previous_latest, Some(new[0].clone()));
                assert_eq!(anchor, Anchor::Matched);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_staged_category_change() {
        let old = vec![stage("1", "survey"), stage("1", "fees")];
        let same_phase = vec![stage("1", "survey"), stage("1", "fees"), stage("1", "plans")];
        let next_phase = vec![stage("1", "survey"), stage("1", "fees"), stage("2", "permit")];

        match diff_staged(&spec(ListKind::Staged), &old, &same_phase) {
            Some(Change::Staged {
                added,
                previous_last,
                category_changed,
                ..
            }) => {
                assert_eq!(added, vec![stage("1", "plans")]);
                assert_eq!(previous_last, Some(stage("1", "fees")));
                assert!(!category_changed);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            diff_staged(&spec(ListKind::Staged), &old, &next_phase),
            Some(Change::Staged {
                category_changed: true,
                ..
            })
        ));
        assert_eq!(diff_staged(&spec(ListKind::Staged), &old, &old), None);
    }

    #[test]
    fn test_staged_blank_category_is_not_a_change() {
        let old = vec![stage("1", "survey"), stage("", "intake")];
        let unphased: SubItem = [("Requirement", "fees")].into_iter().collect();
        let blank = stage("  ", "plans");

        let new = vec![old[0].clone(), unphased.clone(), blank.clone()];
        match diff_staged(&spec(ListKind::Staged), &old, &new) {
            Some(Change::Staged {
                added,
                category_changed,
                ..
            }) => {
                assert_eq!(added, vec![unphased, blank]);
                assert!(!category_changed);
            }
            other => panic!("unexpected {other:?}"),
        }

        // A blank phase among old items is not a known category
        let only_blank = vec![stage("", "intake")];
        assert!(matches!(
            diff_staged(&spec(ListKind::Staged), &only_blank, &[stage("1", "survey")]),
            Some(Change::Staged {
                category_changed: true,
                ..
            })
        ));
    }

    #[test]
    fn test_keyed_set_difference() {
        let change = diff_keyed(
            &spec(ListKind::Keyed),
            &[meeting("m1")],
            &[meeting("m2"), meeting("m1")],
        );
        assert_eq!(
            change,
            Some(Change::Keyed {
                list: "meeting_history".into(),
                added: vec![meeting("m2")],
            })
        );
    }

    #[test]
    fn test_keyed_ignores_modified_items() {
        let moved: SubItem = [("meeting_id", "m1"), ("meeting_date", "09/09/2026")]
            .into_iter()
            .collect();
        assert_eq!(
            diff_keyed(&spec(ListKind::Keyed), &[meeting("m1")], &[moved]),
            None
        );
    }

    #[test]
    fn test_new_record_skips_field_diff() {
        let old = snapshot(1, vec![]);
        let new = snapshot(2, vec![FetchOutcome::Ok(permit("9", "open"))]);
        let report = calculator().calculate(&old, &new);
        assert_eq!(report.get("9"), Some(&[Change::NewRecord][..]));
    }

    #[test]
    fn test_tracked_field_change_with_severity() {
        let config = DiffConfig {
            tracked_fields: vec![TrackedField {
                name: "status".into(),
                path: "general_info.status".into(),
                severity: Severity::Critical,
            }],
            ..DiffConfig::default()
        };
        let old = Record::new("p").unwrap().with_field("general_info", json!({"status": "filed"}));
        let new = Record::new("p").unwrap().with_field("general_info", json!({"status": "approved"}));

        let changes = DiffCalculator::new(config).diff_record(&old, &new);
        assert_eq!(
            changes,
            vec![Change::Field {
                field: "status".into(),
                old: json!("filed"),
                new: json!("approved"),
                severity: Severity::Critical,
            }]
        );
    }

    #[test]
    fn test_failures_are_not_diffed() {
        let old = snapshot(
            1,
            vec![
                FetchOutcome::Ok(permit("1", "open")),
                FetchOutcome::failed("2", "blocked", 3),
            ],
        );
        let new = snapshot(
            2,
            vec![
                FetchOutcome::failed("1", "blocked", 3),
                FetchOutcome::Ok(permit("2", "open")),
                FetchOutcome::Ok(permit("3", "open")),
            ],
        );
        // Merged snapshots never hold a failure over a record, but raw
        // compactions can
        let report = calculator().calculate(&old, &new);
        assert!(report.get("1").is_none());
        assert_eq!(report.get("2"), Some(&[Change::NewRecord][..]));
        assert_eq!(report.summary.records_scanned, 3);
        assert_eq!(report.summary.new_records, 2);
    }

    #[test]
    fn test_unchanged_record_omitted_and_removed_opt_in() {
        let old = snapshot(
            1,
            vec![
                FetchOutcome::Ok(permit("1", "open")),
                FetchOutcome::Ok(permit("2", "open")),
            ],
        );
        let new = snapshot(2, vec![FetchOutcome::Ok(permit("1", "open"))]);

        let report = calculator().calculate(&old, &new);
        assert!(!report.has_changes());

        let config = DiffConfig {
            report_removed: true,
            ..DiffConfig::default()
        };
        let report = DiffCalculator::new(config).calculate(&old, &new);
        assert_eq!(report.get("2"), Some(&[Change::Removed][..]));
        assert_eq!(report.summary.removed_records, 1);
    }
}
