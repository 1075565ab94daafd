// ⚖️ Reconciliation Engine - Upsert processed lessons against the store
//
// Identity is the natural key (name, date, title):
//   key not stored → insert
//   key stored     → update mutable fields in place (created_at untouched)
//
// Work is split into batches so the IN-filters stay under the store's parameter
// limits. Batches commit independently: a failure aborts the remaining ones and
// leaves earlier batches in place. Re-running is safe because the same input
// resolves to the same keys.

use crate::db::CourseRecord;
use crate::error::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// Default batch size for find/insert/update rounds
pub const DEFAULT_BATCH_SIZE: usize = 50;

// ============================================================================
// NATURAL KEY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NaturalKey {
    pub name: String,
    pub date: NaiveDate,
    pub title: String,
}

impl NaturalKey {
    pub fn new(name: &str, date: NaiveDate, title: &str) -> Self {
        NaturalKey {
            name: name.to_string(),
            date,
            title: title.to_string(),
        }
    }
}

// ============================================================================
// STORE BOUNDARY
// ============================================================================

/// What reconciliation needs from the persistence layer
pub trait RecordStore {
    /// Which of `keys` are already stored (exact match on all three columns)
    fn find_existing(&self, keys: &[NaturalKey]) -> Result<Vec<NaturalKey>>;

    /// Insert all of `records`; returns how many were written
    fn insert_many(&self, records: &[CourseRecord]) -> Result<usize>;

    /// Overwrite the mutable fields of the stored row sharing `record`'s key
    fn update_by_key(&self, record: &CourseRecord) -> Result<usize>;
}

// ============================================================================
// UPSERT REPORT
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertReport {
    /// Records handed in
    pub total: usize,

    /// After collapsing in-run duplicates
    pub unique: usize,

    pub inserted: usize,

    pub updated: usize,

    pub batches: usize,
}

impl UpsertReport {
    pub fn summary(&self) -> String {
        format!(
            "{} records ({} unique): {} inserted, {} updated in {} batch(es)",
            self.total, self.unique, self.inserted, self.updated, self.batches
        )
    }
}

// ============================================================================
// RECONCILIATION ENGINE
// ============================================================================

pub struct ReconciliationEngine {
    pub batch_size: usize,
}

impl ReconciliationEngine {
    pub fn new() -> Self {
        ReconciliationEngine {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(batch_size: usize) -> Self {
        ReconciliationEngine {
            batch_size: batch_size.max(1),
        }
    }

    /// Insert-or-update every record, batch by batch
    pub fn reconcile<S: RecordStore + ?Sized>(
        &self,
        store: &S,
        records: &[CourseRecord],
    ) -> Result<UpsertReport> {
        let unique = collapse_duplicates(records);

        let mut report = UpsertReport {
            total: records.len(),
            unique: unique.len(),
            ..Default::default()
        };

        for (index, batch) in unique.chunks(self.batch_size.max(1)).enumerate() {
            if let Err(e) = self.reconcile_batch(store, batch, &mut report) {
                warn!(
                    batch = index,
                    committed_batches = report.batches,
                    error = %e,
                    "reconciliation aborted"
                );
                return Err(e);
            }
            report.batches += 1;
        }

        info!("{}", report.summary());
        Ok(report)
    }

    fn reconcile_batch<S: RecordStore + ?Sized>(
        &self,
        store: &S,
        batch: &[CourseRecord],
        report: &mut UpsertReport,
    ) -> Result<()> {
        let keys: Vec<NaturalKey> = batch.iter().map(CourseRecord::natural_key).collect();
        let existing: HashSet<NaturalKey> = store.find_existing(&keys)?.into_iter().collect();

        let (updates, inserts): (Vec<&CourseRecord>, Vec<&CourseRecord>) = batch
            .iter()
            .partition(|r| existing.contains(&r.natural_key()));

        if !inserts.is_empty() {
            let owned: Vec<CourseRecord> = inserts.into_iter().cloned().collect();
            report.inserted += store.insert_many(&owned)?;
        }

        for record in updates {
            store.update_by_key(record)?;
            report.updated += 1;
        }

        debug!(size = batch.len(), existing = existing.len(), "reconciled batch");
        Ok(())
    }
}

impl Default for ReconciliationEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Same key twice in one run: keep the first position, take the last values
fn collapse_duplicates(records: &[CourseRecord]) -> Vec<CourseRecord> {
    let mut positions: HashMap<NaturalKey, usize> = HashMap::new();
    let mut unique: Vec<CourseRecord> = Vec::with_capacity(records.len());

    for record in records {
        match positions.get(&record.natural_key()) {
            Some(&pos) => {
                let id = unique[pos].id.clone();
                unique[pos] = record.clone();
                unique[pos].id = id;
            }
            None => {
                positions.insert(record.natural_key(), unique.len());
                unique.push(record.clone());
            }
        }
    }

    unique
}

// ============================================================================
// TESTS
// ============================================================================
