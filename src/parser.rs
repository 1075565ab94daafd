// 🏗️ Record Extractor
// Turns pasted calendar-export text into raw (title, start, end, duration) tuples
//
// Input is a run of four-field blocks with no separators beyond the field tokens:
//   Title:<text>Startdate:<text>Enddate:<text>Duration:<H:MM:SS>
// A block ends at the next "Title:" or at end of input.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

const TITLE_TOKEN: &str = "Title:";

// Applied to the text between one "Title:" and the next; lazy quantifiers keep the
// first occurrence of each field token as the boundary.
static BLOCK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^(.*?)Startdate:(.*?)Enddate:(.*?)Duration:(.*)$").expect("block regex")
});

// ============================================================================
// CORE TYPES
// ============================================================================

/// RawScheduleRecord - Output of the extractor, before any normalisation
///
/// Lives only until the pipeline turns it into a CourseRecord (or drops it).
/// The staging table keeps a copy keyed on (title, start_text).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawScheduleRecord {
    pub title: String,
    pub start_text: String,
    pub end_text: String,
    pub duration_text: String,
}

impl RawScheduleRecord {
    pub fn new(
        title: impl Into<String>,
        start_text: impl Into<String>,
        end_text: impl Into<String>,
        duration_text: impl Into<String>,
    ) -> Self {
        RawScheduleRecord {
            title: title.into(),
            start_text: start_text.into(),
            end_text: end_text.into(),
            duration_text: duration_text.into(),
        }
    }
}

// ============================================================================
// EXTRACTION
// ============================================================================

/// Extract every well-formed block from `text`, in input order
///
/// Partial blocks (missing Startdate/Enddate/Duration) are skipped silently,
/// and text before the first "Title:" is ignored. Never fails.
pub fn extract_records(text: &str) -> Vec<RawScheduleRecord> {
    let starts: Vec<usize> = text.match_indices(TITLE_TOKEN).map(|(i, _)| i).collect();

    let mut records = Vec::with_capacity(starts.len());

    for (n, &start) in starts.iter().enumerate() {
        let body_start = start + TITLE_TOKEN.len();
        let body_end = starts.get(n + 1).copied().unwrap_or(text.len());
        let body = &text[body_start..body_end];

        if let Some(caps) = BLOCK_RE.captures(body) {
            let field = |i: usize| caps.get(i).map(|m| m.as_str().trim()).unwrap_or("");
            records.push(RawScheduleRecord::new(field(1), field(2), field(3), field(4)));
        }
    }

    records
}

/// Read a UTF-8 export file and extract its blocks
pub fn extract_from_file(path: &Path) -> Result<Vec<RawScheduleRecord>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read schedule export: {}", path.display()))?;
    Ok(extract_records(&text))
}

// ============================================================================
// TESTS
// ============================================================================
