// 📊 Guardian summaries - who owes what, per guardian
//
// Groups course records by guardian and totals hours and fees over an optional
// name / group / date window.

use crate::db::{CourseRecord, RecordFilter};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardianSummary {
    pub guardian: String,

    /// Unique student names, first-seen order (shared sessions split on ", ")
    pub students: Vec<String>,

    pub total_hours: f64,

    /// Σ hours × fee_per_hour
    pub total_fee: f64,

    /// Mean of the per-record rates (not weighted by hours)
    pub average_fee: f64,

    pub first_date: NaiveDate,

    pub last_date: NaiveDate,

    pub records: Vec<CourseRecord>,
}

impl GuardianSummary {
    /// Hours billed to one student within this summary
    pub fn hours_for(&self, student: &str) -> f64 {
        self.records
            .iter()
            .filter(|r| r.name.split(", ").any(|n| n == student))
            .map(|r| r.hours)
            .sum()
    }

    fn from_records(guardian: String, mut records: Vec<CourseRecord>) -> Option<Self> {
        if records.is_empty() {
            return None;
        }
        records.sort_by(|a, b| a.date.cmp(&b.date).then(a.start.cmp(&b.start)));

        let total_hours = records.iter().map(|r| r.hours).sum();
        let total_fee = records.iter().map(CourseRecord::total_fee).sum();
        let average_fee =
            records.iter().map(|r| r.fee_per_hour).sum::<f64>() / records.len() as f64;

        let mut students: Vec<String> = Vec::new();
        for name in records.iter().flat_map(|r| r.name.split(", ")) {
            if !students.iter().any(|s| s == name) {
                students.push(name.to_string());
            }
        }

        Some(GuardianSummary {
            guardian,
            students,
            total_hours,
            total_fee,
            average_fee,
            first_date: records.first()?.date,
            last_date: records.last()?.date,
            records,
        })
    }
}

/// One summary per guardian, sorted by guardian name
///
/// Records outside `filter` are left out; guardians left with nothing are dropped.
pub fn guardian_summaries(records: &[CourseRecord], filter: &RecordFilter) -> Vec<GuardianSummary> {
    let mut groups: BTreeMap<String, Vec<CourseRecord>> = BTreeMap::new();

    for record in records.iter().filter(|r| filter.matches(r)) {
        groups
            .entry(record.guardian.clone())
            .or_default()
            .push(record.clone());
    }

    groups
        .into_iter()
        .filter_map(|(guardian, records)| GuardianSummary::from_records(guardian, records))
        .collect()
}

/// Summary for a single guardian (exact name)
pub fn summary_for_guardian(
    records: &[CourseRecord],
    guardian: &str,
    filter: &RecordFilter,
) -> Option<GuardianSummary> {
    guardian_summaries(records, filter)
        .into_iter()
        .find(|s| s.guardian == guardian)
}
