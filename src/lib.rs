// Course Ledger - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod config;
pub mod db;
pub mod error;
pub mod matcher;
pub mod notice;
pub mod parser;
pub mod pipeline;
pub mod reconciliation;
pub mod roster;
pub mod summary;
pub mod temporal;

// Re-export commonly used types
pub use config::LedgerConfig;
pub use db::{
    CourseRecord, Event, NewRecord, RecordFilter, RecordUpdate, SqliteStore, StageReport,
    setup_database, get_all_records, query_records, get_record, verify_count, write_csv,
    insert_record, update_record, delete_record, insert_event, get_events_for_entity,
    stage_raw_records, get_staged_records, hours_between, ENTITY_COURSE_RECORD,
};
pub use error::{LedgerError, Result};
pub use matcher::NameMatcher;
pub use notice::{render_notice, NoticeLanguage, PaymentDetails};
pub use parser::{extract_from_file, extract_records, RawScheduleRecord};
pub use pipeline::{
    import_text, process_raw, process_text, run_with_deadline,
    ImportOutcome, ProcessReport, Processed, Processor, SkipReason,
};
pub use reconciliation::{
    NaturalKey, ReconciliationEngine, RecordStore, UpsertReport, DEFAULT_BATCH_SIZE,
};
pub use roster::{AggregatedStudent, Language, Roster, RosterEntry, StudentStatus};
pub use summary::{guardian_summaries, summary_for_guardian, GuardianSummary};
pub use temporal::{
    duration_to_hours, format_display_date, hours_to_duration, is_sentinel_hours,
    parse_duration_hours, parse_schedule_datetime, DateFormat,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
