use crate::error::{LedgerError, Result};
use crate::parser::RawScheduleRecord;
use crate::reconciliation::{NaturalKey, RecordStore};
use crate::roster::{AggregatedStudent, Roster};
use crate::temporal::hours_to_duration;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Write;
use tracing::{debug, info};

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Billable lesson, one row of `course_records`
///
/// Natural key = (name, date, title). Fee/status/guardian/group are copied from the
/// roster when the record is processed, never joined live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseRecord {
    /// Stable identity (UUID); survives re-imports of the same lesson
    pub id: String,

    pub name: String,

    pub fee_per_hour: f64,

    /// Joined status values ("Ongoing", "Graduated", or both for shared sessions)
    #[serde(rename = "graduated")]
    pub status: String,

    #[serde(rename = "parent")]
    pub guardian: String,

    #[serde(rename = "accompany_number")]
    pub group_id: i64,

    pub hours: f64,

    pub date: NaiveDate,

    pub title: String,

    #[serde(rename = "startdate")]
    pub start: NaiveDateTime,

    #[serde(rename = "enddate")]
    pub end: NaiveDateTime,

    /// "H:MM:SS", derived from hours
    pub duration: String,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl CourseRecord {
    /// New record for `name`, billed with the aggregated roster attributes
    pub fn new(
        name: impl Into<String>,
        billing: &AggregatedStudent,
        hours: f64,
        title: impl Into<String>,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Self {
        let now = Utc::now();
        CourseRecord {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            fee_per_hour: billing.fee_per_hour,
            status: billing.status.clone(),
            guardian: billing.guardian.clone(),
            group_id: billing.group_id,
            hours,
            date: start.date(),
            title: title.into(),
            start,
            end,
            duration: hours_to_duration(hours),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey::new(&self.name, self.date, &self.title)
    }

    /// SHA-256 of the natural key; backs the uniqueness constraint
    pub fn record_key(&self) -> String {
        self.natural_key().hash()
    }

    pub fn total_fee(&self) -> f64 {
        self.hours * self.fee_per_hour
    }
}

impl NaturalKey {
    pub fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!(
            "{}\u{1f}{}\u{1f}{}",
            self.name,
            self.date.format(DATE_FORMAT),
            self.title
        ));
        format!("{:x}", hasher.finalize())
    }
}

/// Event for the audit trail (every manual change and every imported row)
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

pub const ENTITY_COURSE_RECORD: &str = "course_record";

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Course records (natural key = name, date, title)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS course_records (
            id TEXT PRIMARY KEY,
            record_key TEXT UNIQUE NOT NULL,
            name TEXT NOT NULL,
            fee_per_hour REAL NOT NULL,
            graduated TEXT NOT NULL,
            parent TEXT NOT NULL,
            accompany_number INTEGER NOT NULL,
            hours REAL NOT NULL CHECK (hours > 0),
            date TEXT NOT NULL,
            title TEXT NOT NULL,
            startdate TEXT NOT NULL,
            enddate TEXT NOT NULL,
            duration TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Raw staging (what was pasted, before matching)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schedule_data (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            startdate TEXT NOT NULL,
            enddate TEXT NOT NULL,
            duration TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (title, startdate)
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_course_natural_key ON course_records(name, date, title)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_course_date ON course_records(date)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_course_parent ON course_records(parent)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// ROW MAPPING
// ============================================================================

const RECORD_COLUMNS: &str = "id, name, fee_per_hour, graduated, parent, accompany_number,
    hours, date, title, startdate, enddate, duration, created_at, updated_at";

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
}

fn get_date(row: &Row, idx: usize) -> rusqlite::Result<NaiveDate> {
    let s: String = row.get(idx)?;
    NaiveDate::parse_from_str(&s, DATE_FORMAT).map_err(|e| conversion_error(idx, e))
}

fn get_timestamp(row: &Row, idx: usize) -> rusqlite::Result<NaiveDateTime> {
    let s: String = row.get(idx)?;
    NaiveDateTime::parse_from_str(&s, TIMESTAMP_FORMAT).map_err(|e| conversion_error(idx, e))
}

fn get_utc(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn row_to_record(row: &Row) -> rusqlite::Result<CourseRecord> {
    Ok(CourseRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        fee_per_hour: row.get(2)?,
        status: row.get(3)?,
        guardian: row.get(4)?,
        group_id: row.get(5)?,
        hours: row.get(6)?,
        date: get_date(row, 7)?,
        title: row.get(8)?,
        start: get_timestamp(row, 9)?,
        end: get_timestamp(row, 10)?,
        duration: row.get(11)?,
        created_at: get_utc(row, 12)?,
        updated_at: get_utc(row, 13)?,
    })
}

fn insert_row(conn: &Connection, record: &CourseRecord) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO course_records (
            id, record_key, name, fee_per_hour, graduated, parent, accompany_number,
            hours, date, title, startdate, enddate, duration, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            record.id,
            record.record_key(),
            record.name,
            record.fee_per_hour,
            record.status,
            record.guardian,
            record.group_id,
            record.hours,
            record.date.format(DATE_FORMAT).to_string(),
            record.title,
            record.start.format(TIMESTAMP_FORMAT).to_string(),
            record.end.format(TIMESTAMP_FORMAT).to_string(),
            record.duration,
            record.created_at.to_rfc3339(),
            record.updated_at.to_rfc3339(),
        ],
    )
}

// ============================================================================
// SQLITE STORE (RecordStore implementation used by reconciliation)
// ============================================================================

pub struct SqliteStore<'a> {
    conn: &'a Connection,
    actor: String,
}

impl<'a> SqliteStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        SqliteStore {
            conn,
            actor: "importer".to_string(),
        }
    }

    pub fn with_actor(mut self, actor: &str) -> Self {
        self.actor = actor.to_string();
        self
    }
}

impl RecordStore for SqliteStore<'_> {
    fn find_existing(&self, keys: &[NaturalKey]) -> Result<Vec<NaturalKey>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        // IN-filter each column, then keep exact tuple matches
        let placeholders = vec!["?"; keys.len()].join(", ");
        let sql = format!(
            "SELECT name, date, title FROM course_records
             WHERE name IN ({p}) AND date IN ({p}) AND title IN ({p})",
            p = placeholders
        );

        let mut values: Vec<String> = Vec::with_capacity(keys.len() * 3);
        values.extend(keys.iter().map(|k| k.name.clone()));
        values.extend(keys.iter().map(|k| k.date.format(DATE_FORMAT).to_string()));
        values.extend(keys.iter().map(|k| k.title.clone()));

        let mut stmt = self.conn.prepare(&sql)?;
        let candidates = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                Ok(NaturalKey {
                    name: row.get(0)?,
                    date: get_date(row, 1)?,
                    title: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(candidates.into_iter().filter(|c| keys.contains(c)).collect())
    }

    fn insert_many(&self, records: &[CourseRecord]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        for record in records {
            insert_row(&tx, record)?;
            let event = Event::new(
                "record_imported",
                ENTITY_COURSE_RECORD,
                &record.id,
                serde_json::json!({
                    "name": record.name,
                    "date": record.date,
                    "title": record.title,
                    "hours": record.hours,
                }),
                &self.actor,
            );
            insert_event(&tx, &event)?;
        }
        tx.commit()?;
        Ok(records.len())
    }

    fn update_by_key(&self, record: &CourseRecord) -> Result<usize> {
        let updated = self.conn.execute(
            "UPDATE course_records
             SET fee_per_hour = ?1, graduated = ?2, parent = ?3, accompany_number = ?4,
                 hours = ?5, startdate = ?6, enddate = ?7, duration = ?8, updated_at = ?9
             WHERE record_key = ?10",
            params![
                record.fee_per_hour,
                record.status,
                record.guardian,
                record.group_id,
                record.hours,
                record.start.format(TIMESTAMP_FORMAT).to_string(),
                record.end.format(TIMESTAMP_FORMAT).to_string(),
                record.duration,
                Utc::now().to_rfc3339(),
                record.record_key(),
            ],
        )?;
        Ok(updated)
    }
}

// ============================================================================
// QUERIES
// ============================================================================

/// Filter shared by record listings and guardian summaries
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordFilter {
    /// Case-insensitive substring of the student name
    pub name: Option<String>,
    pub group_id: Option<i64>,
    /// Inclusive
    pub from: Option<NaiveDate>,
    /// Inclusive
    pub to: Option<NaiveDate>,
}

impl RecordFilter {
    pub fn matches(&self, record: &CourseRecord) -> bool {
        if let Some(name) = &self.name {
            if !record.name.to_lowercase().contains(&name.to_lowercase()) {
                return false;
            }
        }
        if let Some(group_id) = self.group_id {
            if record.group_id != group_id {
                return false;
            }
        }
        if let Some(from) = self.from {
            if record.date < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if record.date > to {
                return false;
            }
        }
        true
    }
}

pub fn get_all_records(conn: &Connection) -> Result<Vec<CourseRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM course_records ORDER BY date ASC, startdate ASC, name ASC",
        RECORD_COLUMNS
    ))?;

    let records = stmt
        .query_map([], row_to_record)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(records)
}

pub fn query_records(conn: &Connection, filter: &RecordFilter) -> Result<Vec<CourseRecord>> {
    Ok(get_all_records(conn)?
        .into_iter()
        .filter(|r| filter.matches(r))
        .collect())
}

pub fn get_record(conn: &Connection, id: &str) -> Result<Option<CourseRecord>> {
    let record = conn
        .query_row(
            &format!("SELECT {} FROM course_records WHERE id = ?1", RECORD_COLUMNS),
            [id],
            row_to_record,
        )
        .optional()?;
    Ok(record)
}

pub fn verify_count(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM course_records", [], |row| row.get(0))?;

    Ok(count)
}

/// Write records as CSV using the persisted column names
pub fn write_csv<W: Write>(records: &[CourseRecord], writer: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for record in records {
        wtr.serialize(record)?;
    }
    wtr.flush()?;
    Ok(())
}

// ============================================================================
// MANUAL EDITS (audited)
// ============================================================================

/// Hours between two wall-clock times; an end before the start runs past midnight
pub fn hours_between(start: NaiveTime, end: NaiveTime) -> f64 {
    let mut minutes = (end - start).num_minutes();
    if minutes < 0 {
        minutes += 24 * 60;
    }
    minutes as f64 / 60.0
}

// End on the start's day, or the next one when the lesson crosses midnight
fn lesson_span(date: NaiveDate, start: NaiveTime, end: NaiveTime) -> (NaiveDateTime, NaiveDateTime) {
    let end_date = if end < start { date + Duration::days(1) } else { date };
    (date.and_time(start), end_date.and_time(end))
}

/// Billing attributes for `name` from the roster, or InvalidInput
fn resolve_billing(roster: &Roster, name: &str) -> Result<AggregatedStudent> {
    roster
        .aggregate(name)
        .ok_or_else(|| LedgerError::InvalidInput(format!("{} is not in the roster", name)))
}

/// A lesson entered by hand for a roster student
///
/// Fee, status, guardian and group always come from the roster. Hours default to
/// the span between the two times.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRecord {
    pub name: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    #[serde(default)]
    pub hours: Option<f64>,
    pub title: String,
}

impl NewRecord {
    pub fn build(&self, roster: &Roster) -> Result<CourseRecord> {
        let billing = resolve_billing(roster, &self.name)?;
        let (start, end) = lesson_span(self.date, self.start_time, self.end_time);
        let hours = self
            .hours
            .unwrap_or_else(|| hours_between(self.start_time, self.end_time));

        let record = CourseRecord::new(self.name.trim(), &billing, hours, self.title.trim(), start, end);
        validate(&record)?;
        Ok(record)
    }
}

/// Partial update for a manual edit; None leaves the field alone
///
/// A new name is looked up in the roster and brings its billing attributes along.
/// Date and times move `start`/`end` together; hours follow the times unless given.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordUpdate {
    pub name: Option<String>,
    pub title: Option<String>,
    pub date: Option<NaiveDate>,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub hours: Option<f64>,
}

impl RecordUpdate {
    fn apply(&self, record: &mut CourseRecord, roster: &Roster) -> Result<()> {
        if let Some(name) = &self.name {
            let name = name.trim();
            let billing = resolve_billing(roster, name)?;
            record.name = name.to_string();
            record.fee_per_hour = billing.fee_per_hour;
            record.status = billing.status;
            record.guardian = billing.guardian;
            record.group_id = billing.group_id;
        }
        if let Some(title) = &self.title {
            record.title = title.trim().to_string();
        }

        let times_changed = self.start_time.is_some() || self.end_time.is_some();
        if self.date.is_some() || times_changed {
            let date = self.date.unwrap_or(record.date);
            let start_time = self.start_time.unwrap_or(record.start.time());
            let end_time = self.end_time.unwrap_or(record.end.time());
            let (start, end) = lesson_span(date, start_time, end_time);
            record.start = start;
            record.end = end;
            record.date = start.date();
            if times_changed && self.hours.is_none() {
                record.hours = hours_between(start_time, end_time);
            }
        }
        if let Some(hours) = self.hours {
            record.hours = hours;
        }
        record.duration = hours_to_duration(record.hours);
        Ok(())
    }
}

fn validate(record: &CourseRecord) -> Result<()> {
    if !(record.hours > 0.0) {
        return Err(LedgerError::InvalidInput(format!(
            "hours must be positive, got {}",
            record.hours
        )));
    }
    if record.name.trim().is_empty() {
        return Err(LedgerError::InvalidInput("name must not be empty".to_string()));
    }
    if record.date != record.start.date() {
        return Err(LedgerError::InvalidInput(format!(
            "date {} does not match start {}",
            record.date, record.start
        )));
    }
    Ok(())
}

/// Insert one record by hand and log it
pub fn insert_record(conn: &Connection, record: &CourseRecord, actor: &str) -> Result<()> {
    validate(record)?;

    insert_row(conn, record)?;
    insert_event(
        conn,
        &Event::new(
            "record_inserted",
            ENTITY_COURSE_RECORD,
            &record.id,
            serde_json::json!({ "old": null, "new": record }),
            actor,
        ),
    )?;

    info!(id = %record.id, name = %record.name, "inserted course record");
    Ok(())
}

/// Apply a manual edit, keeping created_at, and log old/new values
pub fn update_record(
    conn: &Connection,
    id: &str,
    update: &RecordUpdate,
    roster: &Roster,
    actor: &str,
) -> Result<CourseRecord> {
    let old = get_record(conn, id)?
        .ok_or_else(|| LedgerError::NotFound(format!("course record {}", id)))?;

    let mut new = old.clone();
    update.apply(&mut new, roster)?;
    new.updated_at = Utc::now();
    validate(&new)?;

    conn.execute(
        "UPDATE course_records
         SET record_key = ?1, name = ?2, fee_per_hour = ?3, graduated = ?4, parent = ?5,
             accompany_number = ?6, hours = ?7, date = ?8, title = ?9, startdate = ?10,
             enddate = ?11, duration = ?12, updated_at = ?13
         WHERE id = ?14",
        params![
            new.record_key(),
            new.name,
            new.fee_per_hour,
            new.status,
            new.guardian,
            new.group_id,
            new.hours,
            new.date.format(DATE_FORMAT).to_string(),
            new.title,
            new.start.format(TIMESTAMP_FORMAT).to_string(),
            new.end.format(TIMESTAMP_FORMAT).to_string(),
            new.duration,
            new.updated_at.to_rfc3339(),
            id,
        ],
    )?;

    insert_event(
        conn,
        &Event::new(
            "record_updated",
            ENTITY_COURSE_RECORD,
            id,
            serde_json::json!({ "old": old, "new": new }),
            actor,
        ),
    )?;

    info!(id, "updated course record");
    Ok(new)
}

/// Delete one record by id and log what was removed
pub fn delete_record(conn: &Connection, id: &str, actor: &str) -> Result<CourseRecord> {
    let old = get_record(conn, id)?
        .ok_or_else(|| LedgerError::NotFound(format!("course record {}", id)))?;

    conn.execute("DELETE FROM course_records WHERE id = ?1", [id])?;

    insert_event(
        conn,
        &Event::new(
            "record_deleted",
            ENTITY_COURSE_RECORD,
            id,
            serde_json::json!({ "old": old, "new": null }),
            actor,
        ),
    )?;

    info!(id, "deleted course record");
    Ok(old)
}

// ============================================================================
// AUDIT TRAIL
// ============================================================================

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Get events for a specific entity, newest first (insertion order)
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY id DESC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: get_utc(row, 1)?,
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json).map_err(|e| conversion_error(5, e))?,
                actor: row.get(6)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(events)
}

// ============================================================================
// RAW STAGING
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub total: usize,
    pub inserted: usize,
    pub updated: usize,
}

/// Upsert raw blocks into `schedule_data`, keyed on (title, startdate)
///
/// Existing rows get their end/duration refreshed. Each batch commits on its own.
pub fn stage_raw_records(
    conn: &Connection,
    records: &[RawScheduleRecord],
    batch_size: usize,
) -> Result<StageReport> {
    let mut report = StageReport {
        total: records.len(),
        ..Default::default()
    };

    for batch in records.chunks(batch_size.max(1)) {
        let tx = conn.unchecked_transaction()?;
        let now = Utc::now().to_rfc3339();

        for raw in batch {
            let exists: Option<i64> = tx
                .query_row(
                    "SELECT id FROM schedule_data WHERE title = ?1 AND startdate = ?2",
                    params![raw.title, raw.start_text],
                    |row| row.get(0),
                )
                .optional()?;

            if exists.is_some() {
                tx.execute(
                    "UPDATE schedule_data SET enddate = ?1, duration = ?2, updated_at = ?3
                     WHERE title = ?4 AND startdate = ?5",
                    params![raw.end_text, raw.duration_text, now, raw.title, raw.start_text],
                )?;
                report.updated += 1;
            } else {
                tx.execute(
                    "INSERT INTO schedule_data (title, startdate, enddate, duration, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                    params![raw.title, raw.start_text, raw.end_text, raw.duration_text, now],
                )?;
                report.inserted += 1;
            }
        }

        tx.commit()?;
        debug!(size = batch.len(), "staged raw batch");
    }

    info!(
        total = report.total,
        inserted = report.inserted,
        updated = report.updated,
        "staged raw schedule data"
    );
    Ok(report)
}

/// Staged raw blocks in the order they were first seen
pub fn get_staged_records(conn: &Connection) -> Result<Vec<RawScheduleRecord>> {
    let mut stmt = conn.prepare(
        "SELECT title, startdate, enddate, duration FROM schedule_data ORDER BY id ASC",
    )?;

    let records = stmt
        .query_map([], |row| {
            Ok(RawScheduleRecord::new(
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster::{RosterEntry, StudentStatus};

    fn billing() -> AggregatedStudent {
        AggregatedStudent {
            fee_per_hour: 80.0,
            status: "Ongoing".to_string(),
            guardian: "Hui Mien".to_string(),
            group_id: 2,
        }
    }

    fn ts(d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 9, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn create_test_record(name: &str, day: u32, title: &str, hours: f64) -> CourseRecord {
        CourseRecord::new(name, &billing(), hours, title, ts(day, 10), ts(day, 11))
    }

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_record_new_derives_date_and_duration() {
        let record = create_test_record("Aaron", 1, "Aaron Lesson", 1.5);
        assert_eq!(record.date, NaiveDate::from_ymd_opt(2025, 9, 1).unwrap());
        assert_eq!(record.duration, "1:30:00");
        assert_eq!(record.total_fee(), 120.0);
        assert_eq!(record.record_key().len(), 64);
    }

    #[test]
    fn test_store_insert_and_read_back() {
        let conn = test_conn();
        let store = SqliteStore::new(&conn);
        let record = create_test_record("Aaron", 1, "Aaron Lesson", 1.0);

        assert_eq!(store.insert_many(&[record.clone()]).unwrap(), 1);

        let all = get_all_records(&conn).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, record.id);
        assert_eq!(all[0].start, record.start);
        assert_eq!(all[0].guardian, "Hui Mien");

        let events = get_events_for_entity(&conn, ENTITY_COURSE_RECORD, &record.id).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "record_imported");
    }

    #[test]
    fn test_natural_key_is_unique() {
        let conn = test_conn();
        let store = SqliteStore::new(&conn);
        let a = create_test_record("Aaron", 1, "Aaron Lesson", 1.0);
        let b = create_test_record("Aaron", 1, "Aaron Lesson", 2.0);

        store.insert_many(&[a]).unwrap();
        let err = store.insert_many(&[b]).unwrap_err();
        assert!(matches!(err, LedgerError::Store(_)));
        assert_eq!(verify_count(&conn).unwrap(), 1);
    }

    #[test]
    fn test_find_existing_is_exact_on_all_columns() {
        let conn = test_conn();
        let store = SqliteStore::new(&conn);
        store
            .insert_many(&[
                create_test_record("Aaron", 1, "Lesson A", 1.0),
                create_test_record("Bono", 2, "Lesson B", 1.0),
            ])
            .unwrap();

        let d2 = NaiveDate::from_ymd_opt(2025, 9, 2).unwrap();

        // Crossed columns: each value exists somewhere, the tuples don't
        let keys = vec![
            NaturalKey::new("Aaron", d2, "Lesson B"),
            NaturalKey::new("Bono", d2, "Lesson B"),
        ];
        let found = store.find_existing(&keys).unwrap();
        assert_eq!(found, vec![NaturalKey::new("Bono", d2, "Lesson B")]);

        assert!(store.find_existing(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_update_by_key_keeps_created_at() {
        let conn = test_conn();
        let store = SqliteStore::new(&conn);
        let original = create_test_record("Aaron", 1, "Aaron Lesson", 1.0);
        store.insert_many(&[original.clone()]).unwrap();

        let mut changed = create_test_record("Aaron", 1, "Aaron Lesson", 2.0);
        changed.fee_per_hour = 90.0;
        assert_eq!(store.update_by_key(&changed).unwrap(), 1);

        let stored = get_record(&conn, &original.id).unwrap().unwrap();
        assert_eq!(stored.hours, 2.0);
        assert_eq!(stored.fee_per_hour, 90.0);
        assert_eq!(stored.duration, "2:00:00");
        assert_eq!(stored.created_at, original.created_at);
        assert!(stored.updated_at >= original.updated_at);
    }

    fn test_roster() -> Roster {
        Roster::new(vec![
            RosterEntry::new("Aaron", 80.0, StudentStatus::Ongoing, "Hui Mien", 2),
            RosterEntry::new("sheera", 60.0, StudentStatus::Ongoing, "Hui Mien", 2),
            RosterEntry::new("Lauren", 80.0, StudentStatus::Graduated, "Noelle", 0),
        ])
        .unwrap()
    }

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_manual_update_and_delete_are_audited() {
        let conn = test_conn();
        let record = create_test_record("Aaron", 1, "Aaron Lesson", 1.0);
        insert_record(&conn, &record, "tester").unwrap();

        let update = RecordUpdate {
            hours: Some(1.5),
            title: Some("Aaron Lesson (makeup)".to_string()),
            ..Default::default()
        };
        let updated = update_record(&conn, &record.id, &update, &test_roster(), "tester").unwrap();
        assert_eq!(updated.hours, 1.5);
        assert_eq!(updated.duration, "1:30:00");
        assert_eq!(updated.record_key(), get_record(&conn, &record.id).unwrap().unwrap().record_key());

        let deleted = delete_record(&conn, &record.id, "tester").unwrap();
        assert_eq!(deleted.title, "Aaron Lesson (makeup)");
        assert_eq!(verify_count(&conn).unwrap(), 0);

        let events = get_events_for_entity(&conn, ENTITY_COURSE_RECORD, &record.id).unwrap();
        let kinds: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(kinds, vec!["record_deleted", "record_updated", "record_inserted"]);
        assert_eq!(events[1].data["old"]["hours"], serde_json::json!(1.0));
        assert_eq!(events[1].data["new"]["hours"], serde_json::json!(1.5));
    }

    #[test]
    fn test_manual_edit_rejects_non_positive_hours() {
        let conn = test_conn();
        let record = create_test_record("Aaron", 1, "Aaron Lesson", 1.0);
        insert_record(&conn, &record, "tester").unwrap();

        let update = RecordUpdate {
            hours: Some(0.0),
            ..Default::default()
        };
        let err = update_record(&conn, &record.id, &update, &test_roster(), "tester").unwrap_err();
        assert!(matches!(err, LedgerError::InvalidInput(_)));

        let err = delete_record(&conn, "missing", "tester").unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
    }

    #[test]
    fn test_moving_date_moves_start_and_end() {
        let conn = test_conn();
        let record = create_test_record("Aaron", 1, "Aaron Lesson", 1.0);
        insert_record(&conn, &record, "tester").unwrap();

        let update = RecordUpdate {
            date: NaiveDate::from_ymd_opt(2025, 9, 8),
            ..Default::default()
        };
        update_record(&conn, &record.id, &update, &test_roster(), "tester").unwrap();

        let stored = get_record(&conn, &record.id).unwrap().unwrap();
        assert_eq!(stored.date, NaiveDate::from_ymd_opt(2025, 9, 8).unwrap());
        assert_eq!(stored.start, ts(8, 10));
        assert_eq!(stored.end, ts(8, 11));
        assert_eq!(stored.date, stored.start.date());
        assert_eq!(stored.hours, 1.0);
    }

    #[test]
    fn test_new_times_recompute_hours() {
        let conn = test_conn();
        let record = create_test_record("Aaron", 1, "Aaron Lesson", 1.0);
        insert_record(&conn, &record, "tester").unwrap();

        let update = RecordUpdate {
            start_time: Some(hm(9, 30)),
            end_time: Some(hm(11, 0)),
            ..Default::default()
        };
        let updated = update_record(&conn, &record.id, &update, &test_roster(), "tester").unwrap();

        assert_eq!(updated.start.time(), hm(9, 30));
        assert_eq!(updated.end.time(), hm(11, 0));
        assert_eq!(updated.hours, 1.5);
        assert_eq!(updated.duration, "1:30:00");
    }

    #[test]
    fn test_rename_requires_roster_student_and_recopies_billing() {
        let conn = test_conn();
        let record = create_test_record("Aaron", 1, "Aaron Lesson", 1.0);
        insert_record(&conn, &record, "tester").unwrap();

        let unknown = RecordUpdate {
            name: Some("Nobody".to_string()),
            ..Default::default()
        };
        let err = update_record(&conn, &record.id, &unknown, &test_roster(), "tester").unwrap_err();
        assert!(matches!(err, LedgerError::InvalidInput(_)));
        assert_eq!(get_record(&conn, &record.id).unwrap().unwrap().name, "Aaron");

        let rename = RecordUpdate {
            name: Some("Lauren".to_string()),
            ..Default::default()
        };
        let renamed = update_record(&conn, &record.id, &rename, &test_roster(), "tester").unwrap();
        assert_eq!(renamed.guardian, "Noelle");
        assert_eq!(renamed.status, "Graduated");
        assert_eq!(renamed.group_id, 0);
    }

    #[test]
    fn test_new_record_built_from_roster() {
        let conn = test_conn();
        let new = NewRecord {
            name: "sheera".to_string(),
            date: NaiveDate::from_ymd_opt(2025, 9, 3).unwrap(),
            start_time: hm(16, 0),
            end_time: hm(17, 30),
            hours: None,
            title: "sheera makeup".to_string(),
        };
        let record = new.build(&test_roster()).unwrap();
        assert_eq!(record.fee_per_hour, 60.0);
        assert_eq!(record.guardian, "Hui Mien");
        assert_eq!(record.hours, 1.5);
        assert_eq!(record.date, record.start.date());

        insert_record(&conn, &record, "tester").unwrap();
        let events = get_events_for_entity(&conn, ENTITY_COURSE_RECORD, &record.id).unwrap();
        assert_eq!(events[0].event_type, "record_inserted");
        assert_eq!(events[0].actor, "tester");

        let unknown = NewRecord {
            name: "Nobody".to_string(),
            ..new
        };
        assert!(matches!(unknown.build(&test_roster()), Err(LedgerError::InvalidInput(_))));
    }

    #[test]
    fn test_hours_between_wraps_midnight() {
        assert_eq!(hours_between(hm(23, 0), hm(1, 0)), 2.0);
        let (start, end) = lesson_span(NaiveDate::from_ymd_opt(2025, 9, 1).unwrap(), hm(23, 0), hm(1, 0));
        assert_eq!(end - start, Duration::hours(2));
    }

    #[test]
    fn test_record_filter() {
        let record = create_test_record("Aaron", 5, "Aaron Lesson", 1.0);

        assert!(RecordFilter::default().matches(&record));
        assert!(RecordFilter { name: Some("aar".into()), ..Default::default() }.matches(&record));
        assert!(!RecordFilter { group_id: Some(3), ..Default::default() }.matches(&record));

        let from = NaiveDate::from_ymd_opt(2025, 9, 5);
        let to = NaiveDate::from_ymd_opt(2025, 9, 4);
        assert!(RecordFilter { from, ..Default::default() }.matches(&record));
        assert!(!RecordFilter { to, ..Default::default() }.matches(&record));
    }

    #[test]
    fn test_stage_raw_records_upserts_on_title_and_start() {
        let conn = test_conn();
        let first = vec![
            RawScheduleRecord::new("A", "2025年9月1日 10:00", "01/09/25 11:00", "1:00:00"),
            RawScheduleRecord::new("B", "2025年9月2日 10:00", "02/09/25 11:00", "1:00:00"),
        ];
        let report = stage_raw_records(&conn, &first, 1).unwrap();
        assert_eq!(report.inserted, 2);
        assert_eq!(report.updated, 0);

        let second = vec![RawScheduleRecord::new("A", "2025年9月1日 10:00", "01/09/25 11:30", "1:30:00")];
        let report = stage_raw_records(&conn, &second, 50).unwrap();
        assert_eq!(report.inserted, 0);
        assert_eq!(report.updated, 1);

        let staged = get_staged_records(&conn).unwrap();
        assert_eq!(staged.len(), 2);
        assert_eq!(staged[0].title, "A");
        assert_eq!(staged[0].duration_text, "1:30:00");
    }

    #[test]
    fn test_write_csv_uses_persisted_column_names() {
        let record = create_test_record("Aaron", 1, "Aaron Lesson", 1.0);
        let mut out = Vec::new();
        write_csv(&[record], &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        let header = text.lines().next().unwrap();
        assert!(header.contains("graduated"));
        assert!(header.contains("parent"));
        assert!(header.contains("accompany_number"));
        assert!(text.contains("Hui Mien"));
    }
}
