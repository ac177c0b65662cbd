use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::store::{SnapshotRef, SnapshotStore};

/// Date-indexed references to one level's retained daily snapshots.
///
/// Self-trimming: `update_retention` keeps at most the `bound` most recent
/// dates, where the caller supplies `bound` as the larger of the two streak
/// thresholds currently configured for the level. The index is the sole source
/// of truth for what the analyzer reads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RetentionIndex {
    entries: BTreeMap<NaiveDate, SnapshotRef>,
}

impl RetentionIndex {
    pub fn insert(&mut self, date: NaiveDate, reference: SnapshotRef) -> Option<SnapshotRef> {
        self.entries.insert(date, reference)
    }

    pub fn get(&self, date: NaiveDate) -> Option<&SnapshotRef> {
        self.entries.get(&date)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries newest-first.
    pub fn iter_desc(&self) -> impl Iterator<Item = (NaiveDate, &SnapshotRef)> {
        self.entries.iter().rev().map(|(date, r)| (*date, r))
    }
}

/// One retained snapshot the analyzer may fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailableSnapshot {
    pub date: NaiveDate,
    pub reference: SnapshotRef,
}

/// What the retention window can currently support, newest-first.
#[derive(Debug, Clone)]
pub struct Availability {
    pub snapshots: Vec<AvailableSnapshot>,
    pub enough_for_absences: bool,
    pub enough_for_tardies: bool,
}

/// Insert today's snapshot reference and trim the index to the `bound` most
/// recent dates. Evicted entries have their backing snapshots deleted
/// best-effort: a failed delete is logged and skipped, the index entry is
/// removed either way (a stale file outliving its index entry is a harmless
/// leak). Returns the updated index and every evicted reference for
/// caller-side audit logging.
pub fn update_retention(
    mut index: RetentionIndex,
    today: NaiveDate,
    today_ref: SnapshotRef,
    bound: usize,
    store: &dyn SnapshotStore,
) -> (RetentionIndex, Vec<SnapshotRef>) {
    if let Some(previous) = index.insert(today, today_ref) {
        warn!(%today, %previous, "replacing an existing snapshot reference for today");
    }

    let stale_dates: Vec<NaiveDate> = index
        .entries
        .keys()
        .rev()
        .skip(bound)
        .copied()
        .collect();

    let mut evicted = Vec::with_capacity(stale_dates.len());
    for date in stale_dates {
        let reference = match index.entries.remove(&date) {
            Some(reference) => reference,
            None => continue,
        };
        if let Err(err) = store.delete(&reference) {
            warn!(%date, %reference, error = %err, "could not delete evicted snapshot");
        }
        evicted.push(reference);
    }

    info!(
        retained = index.len(),
        evicted = evicted.len(),
        bound,
        "retention index updated"
    );
    (index, evicted)
}

/// Read-only companion to `update_retention`: how many dated snapshots exist
/// for the level and whether that history is deep enough for each streak
/// check. Gates whether analysis runs for absences, tardies, both or neither.
pub fn check_availability(
    index: &RetentionIndex,
    absence_threshold: usize,
    tardiness_threshold: usize,
) -> Availability {
    let snapshots: Vec<AvailableSnapshot> = index
        .iter_desc()
        .map(|(date, reference)| AvailableSnapshot {
            date,
            reference: reference.clone(),
        })
        .collect();

    let count = snapshots.len();
    Availability {
        enough_for_absences: count >= absence_threshold,
        enough_for_tardies: count >= tardiness_threshold,
        snapshots,
    }
}
