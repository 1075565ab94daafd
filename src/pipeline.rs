// 🔄 Processing pipeline
// extract → normalise dates → hours → match name → aggregate roster → CourseRecord
//
// Records that fail a step are dropped and counted; only the aggregate
// "processed N of M" reaches the caller.

use crate::db::CourseRecord;
use crate::error::{LedgerError, Result};
use crate::matcher::NameMatcher;
use crate::parser::{extract_records, RawScheduleRecord};
use crate::reconciliation::{ReconciliationEngine, RecordStore, UpsertReport};
use crate::roster::Roster;
use crate::temporal::{is_sentinel_hours, parse_duration_hours, parse_schedule_datetime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::mpsc;
use std::time::Duration;
use tracing::{debug, info};

// ============================================================================
// SKIP REASONS / REPORT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SkipReason {
    UnparseableDate,
    UnparseableDuration,
    SentinelDuration,
    ZeroHours,
    NoRosterMatch,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::UnparseableDate => "unparseable date",
            SkipReason::UnparseableDuration => "unparseable duration",
            SkipReason::SentinelDuration => "24-hour placeholder duration",
            SkipReason::ZeroHours => "zero hours",
            SkipReason::NoRosterMatch => "no roster match",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessReport {
    /// Raw records seen
    pub total: usize,

    /// Records turned into CourseRecords
    pub accepted: usize,

    pub skipped: BTreeMap<SkipReason, usize>,
}

impl ProcessReport {
    pub fn skipped_count(&self) -> usize {
        self.skipped.values().sum()
    }

    pub fn summary(&self) -> String {
        let mut text = format!("processed {} of {} records", self.accepted, self.total);
        if !self.skipped.is_empty() {
            let parts: Vec<String> = self
                .skipped
                .iter()
                .map(|(reason, n)| format!("{} {}", n, reason.as_str()))
                .collect();
            text.push_str(&format!(" (skipped: {})", parts.join(", ")));
        }
        text
    }
}

/// Output of a processing run
#[derive(Debug, Clone)]
pub struct Processed {
    pub records: Vec<CourseRecord>,
    pub report: ProcessReport,
}

// ============================================================================
// PROCESSOR
// ============================================================================

pub struct Processor<'r> {
    roster: &'r Roster,
    matcher: NameMatcher,
}

impl<'r> Processor<'r> {
    pub fn new(roster: &'r Roster) -> Self {
        Processor {
            roster,
            matcher: NameMatcher::new(roster),
        }
    }

    /// Turn one raw block into a billable record, or say why not
    pub fn process_one(&self, raw: &RawScheduleRecord) -> std::result::Result<CourseRecord, SkipReason> {
        let (_, start) = parse_schedule_datetime(&raw.start_text).ok_or(SkipReason::UnparseableDate)?;
        let (_, end) = parse_schedule_datetime(&raw.end_text).ok_or(SkipReason::UnparseableDate)?;

        let hours = parse_duration_hours(&raw.duration_text).ok_or(SkipReason::UnparseableDuration)?;
        if is_sentinel_hours(hours) {
            return Err(SkipReason::SentinelDuration);
        }
        if hours <= 0.0 {
            return Err(SkipReason::ZeroHours);
        }

        let name = self
            .matcher
            .match_name(&raw.title)
            .ok_or(SkipReason::NoRosterMatch)?;
        let billing = self.roster.aggregate(name).ok_or(SkipReason::NoRosterMatch)?;

        Ok(CourseRecord::new(name, &billing, hours, raw.title.as_str(), start, end))
    }

    pub fn process_raw(&self, raws: &[RawScheduleRecord]) -> Processed {
        let mut records = Vec::with_capacity(raws.len());
        let mut report = ProcessReport {
            total: raws.len(),
            ..Default::default()
        };

        for raw in raws {
            match self.process_one(raw) {
                Ok(record) => records.push(record),
                Err(reason) => {
                    debug!(title = %raw.title, reason = reason.as_str(), "skipped schedule record");
                    *report.skipped.entry(reason).or_insert(0) += 1;
                }
            }
        }

        report.accepted = records.len();
        info!("{}", report.summary());

        Processed { records, report }
    }

    pub fn process_text(&self, text: &str) -> Processed {
        self.process_raw(&extract_records(text))
    }
}

/// Convenience: process pasted text against a roster
pub fn process_text(text: &str, roster: &Roster) -> Processed {
    Processor::new(roster).process_text(text)
}

/// Convenience: process already-extracted raw records against a roster
pub fn process_raw(raws: &[RawScheduleRecord], roster: &Roster) -> Processed {
    Processor::new(roster).process_raw(raws)
}

/// Result of a full extract → upsert run
#[derive(Debug, Clone, Serialize)]
pub struct ImportOutcome {
    pub process: ProcessReport,
    pub upsert: UpsertReport,
}

/// Full run: process `text` and reconcile the result into `store`
pub fn import_text<S: RecordStore + ?Sized>(
    text: &str,
    roster: &Roster,
    store: &S,
    engine: &ReconciliationEngine,
) -> Result<ImportOutcome> {
    let processed = process_text(text, roster);
    let upsert = engine.reconcile(store, &processed.records)?;
    Ok(ImportOutcome {
        process: processed.report,
        upsert,
    })
}

// ============================================================================
// DEADLINE GUARD
// ============================================================================

/// Run `work` on a worker thread and wait at most `timeout` for it
///
/// Advisory only: on timeout the worker keeps running to completion in the
/// background; the caller just stops waiting and gets LedgerError::Timeout.
pub fn run_with_deadline<T, F>(timeout: Duration, work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();

    std::thread::Builder::new()
        .name("ledger-worker".to_string())
        .spawn(move || {
            // Receiver may be gone after a timeout; nothing left to report to
            let _ = tx.send(work());
        })?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => Err(LedgerError::Timeout(timeout)),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(LedgerError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "worker thread exited without a result",
        ))),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{get_all_records, setup_database, SqliteStore};
    use crate::roster::{RosterEntry, StudentStatus};
    use chrono::NaiveDate;
    use rusqlite::Connection;

    fn roster() -> Roster {
        Roster::new(vec![
            RosterEntry::new("Aaron", 80.0, StudentStatus::Ongoing, "Hui Mien", 2),
            RosterEntry::new("sheera", 60.0, StudentStatus::Ongoing, "Hui Mien", 2),
            RosterEntry::new("Lauren", 80.0, StudentStatus::Graduated, "Noelle", 0),
        ])
        .unwrap()
    }

    #[test]
    fn test_end_to_end_single_lesson() {
        let text = "Title:Aaron Lesson Startdate:2025年9月1日 10:00 Enddate:01/09/25 11:00 Duration:1:00:00";
        let processed = process_text(text, &roster());

        assert_eq!(processed.records.len(), 1);
        let record = &processed.records[0];
        assert_eq!(record.name, "Aaron");
        assert_eq!(record.hours, 1.0);
        assert_eq!(record.date, NaiveDate::from_ymd_opt(2025, 9, 1).unwrap());
        assert_eq!(record.fee_per_hour, 80.0);
        assert_eq!(record.guardian, "Hui Mien");
        assert_eq!(record.group_id, 2);
        assert_eq!(record.status, "Ongoing");
        assert_eq!(record.title, "Aaron Lesson");
        assert_eq!(record.duration, "1:00:00");
    }

    #[test]
    fn test_sentinel_duration_excluded() {
        let text = "Title:Aaron Lesson Startdate:2025年9月1日 10:00 Enddate:01/09/25 10:00 Duration:24:00:00";
        let processed = process_text(text, &roster());

        assert!(processed.records.is_empty());
        assert_eq!(processed.report.skipped.get(&SkipReason::SentinelDuration), Some(&1));
    }

    #[test]
    fn test_almost_full_day_is_kept() {
        let text = "Title:Aaron Camp Startdate:2025年9月1日 0:00 Enddate:01/09/25 23:59 Duration:23:59:59";
        let processed = process_text(text, &roster());

        assert_eq!(processed.records.len(), 1);
        assert!(processed.records[0].hours > 23.99);
    }

    #[test]
    fn test_skip_reasons_counted() {
        let text = "\
Title:Aaron A Startdate:someday Enddate:01/09/25 11:00 Duration:1:00:00
Title:Aaron B Startdate:2025年9月1日 10:00 Enddate:01/09/25 11:00 Duration:an hour
Title:Aaron C Startdate:2025年9月1日 10:00 Enddate:01/09/25 10:00 Duration:0:00:00
Title:Staff meeting Startdate:2025年9月1日 10:00 Enddate:01/09/25 11:00 Duration:1:00:00
Title:sheera D Startdate:31/08/25 9:00 Enddate:31/08/25 10:30 Duration:1:30:00";
        let processed = process_text(text, &roster());
        let report = &processed.report;

        assert_eq!(report.total, 5);
        assert_eq!(report.accepted, 1);
        assert_eq!(report.skipped_count(), 4);
        assert_eq!(report.skipped[&SkipReason::UnparseableDate], 1);
        assert_eq!(report.skipped[&SkipReason::UnparseableDuration], 1);
        assert_eq!(report.skipped[&SkipReason::ZeroHours], 1);
        assert_eq!(report.skipped[&SkipReason::NoRosterMatch], 1);
        assert!(report.summary().starts_with("processed 1 of 5 records"));

        assert_eq!(processed.records[0].name, "sheera");
        assert_eq!(processed.records[0].fee_per_hour, 60.0);
    }

    #[test]
    fn test_fee_copied_at_processing_time() {
        let processed = process_text(
            "Title:Aaron Lesson Startdate:2025年9月1日 10:00 Enddate:01/09/25 11:00 Duration:1:00:00",
            &roster(),
        );

        // Later roster change does not touch the already-built record
        let raised = Roster::new(vec![RosterEntry::new(
            "Aaron",
            120.0,
            StudentStatus::Ongoing,
            "Hui Mien",
            2,
        )])
        .unwrap();
        assert_eq!(raised.get("Aaron").unwrap().fee_per_hour, 120.0);
        assert_eq!(processed.records[0].fee_per_hour, 80.0);
    }

    #[test]
    fn test_import_text_twice_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let store = SqliteStore::new(&conn);
        let engine = ReconciliationEngine::new();
        let text = "\
Title:Aaron Lesson Startdate:2025年9月1日 10:00 Enddate:01/09/25 11:00 Duration:1:00:00
Title:sheera Lesson Startdate:2025年9月2日 10:00 Enddate:02/09/25 11:30 Duration:1:30:00";

        let first = import_text(text, &roster(), &store, &engine).unwrap();
        let second = import_text(text, &roster(), &store, &engine).unwrap();

        assert_eq!(first.upsert.inserted, 2);
        assert_eq!(second.upsert.inserted, 0);
        assert_eq!(second.upsert.updated, 2);
        assert_eq!(get_all_records(&conn).unwrap().len(), 2);
    }

    #[test]
    fn test_run_with_deadline_returns_result() {
        let value = run_with_deadline(Duration::from_secs(5), || Ok(42)).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_run_with_deadline_times_out() {
        let err = run_with_deadline(Duration::from_millis(20), || {
            std::thread::sleep(Duration::from_millis(500));
            Ok(())
        })
        .unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn test_run_with_deadline_propagates_store_error() {
        let err = run_with_deadline(Duration::from_secs(5), || -> Result<()> {
            Err(LedgerError::Store(rusqlite::Error::InvalidQuery))
        })
        .unwrap_err();
        assert!(matches!(err, LedgerError::Store(_)));
    }
}
