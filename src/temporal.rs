// ⏰ Temporal parsing - Date Normalizer + Duration Calculator
//
// Calendar exports give us two date shapes and one duration shape:
// 1. Chinese calendar phrase: "2025年8月31日 11:00"
// 2. Slash date:              "31/08/25 12:30"  (two-digit year → 20YY)
// 3. Duration:                "1:30:00"         (H unbounded, MM/SS < 60)
//
// Nothing here returns an error. A string that doesn't fit a known shape is None,
// and the pipeline counts the record as skipped.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

static CHINESE_DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{4})\s*年\s*(\d{1,2})\s*月\s*(\d{1,2})\s*日(?:\s*(\d{1,2}):(\d{2}))?$")
        .expect("chinese date regex")
});

// Same positions, any run of placeholder characters where the CJK delimiters were
static CORRUPTED_CHINESE_DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{4})[^\d\s:/]+(\d{1,2})[^\d\s:/]+(\d{1,2})[^\d\s:/]*(?:\s+(\d{1,2}):(\d{2}))?$")
        .expect("corrupted chinese date regex")
});

static SLASH_DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{1,2})/(\d{1,2})/(\d{2})(?:\s+(\d{1,2}):(\d{2}))?$").expect("slash date regex")
});

static DURATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+):(\d{1,2}):(\d{1,2})$").expect("duration regex"));

/// Hours value the upstream exporter emits as a full-day placeholder
pub const SENTINEL_HOURS: f64 = 24.0;

/// Width of the sentinel band above SENTINEL_HOURS
pub const SENTINEL_TOLERANCE: f64 = 0.01;

// ============================================================================
// DATE FORMATS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DateFormat {
    /// "2025年8月31日 11:00"
    ChinesePhrase,

    /// "31/08/25 12:30"
    SlashDate,
}

impl DateFormat {
    pub fn name(&self) -> &'static str {
        match self {
            DateFormat::ChinesePhrase => "chinese-phrase",
            DateFormat::SlashDate => "slash-date",
        }
    }
}

/// Parse "YYYY年M月D日 H:MM"
///
/// Falls back to a positional parse when the 年/月/日 delimiters arrive mangled
/// by an encoding bug (e.g. "2025?8?31? 11:00") but the integer groups are intact.
pub fn parse_chinese_date(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();

    let caps = match CHINESE_DATE_RE.captures(text) {
        Some(caps) => caps,
        None => {
            let caps = CORRUPTED_CHINESE_DATE_RE.captures(text)?;
            debug!(input = text, "parsed date with corrupted delimiters");
            caps
        }
    };

    let year: i32 = caps.get(1)?.as_str().parse().ok()?;
    let month: u32 = caps.get(2)?.as_str().parse().ok()?;
    let day: u32 = caps.get(3)?.as_str().parse().ok()?;
    let time = parse_time(caps.get(4).map(|m| m.as_str()), caps.get(5).map(|m| m.as_str()))?;

    Some(NaiveDate::from_ymd_opt(year, month, day)?.and_time(time))
}

/// Parse "DD/MM/YY H:MM" with the year read as 2000 + YY
pub fn parse_slash_date(text: &str) -> Option<NaiveDateTime> {
    let caps = SLASH_DATE_RE.captures(text.trim())?;

    let day: u32 = caps.get(1)?.as_str().parse().ok()?;
    let month: u32 = caps.get(2)?.as_str().parse().ok()?;
    let year: i32 = 2000 + caps.get(3)?.as_str().parse::<i32>().ok()?;
    let time = parse_time(caps.get(4).map(|m| m.as_str()), caps.get(5).map(|m| m.as_str()))?;

    Some(NaiveDate::from_ymd_opt(year, month, day)?.and_time(time))
}

/// Try every known date shape; the first one that parses wins
pub fn parse_schedule_datetime(text: &str) -> Option<(DateFormat, NaiveDateTime)> {
    if let Some(dt) = parse_chinese_date(text) {
        return Some((DateFormat::ChinesePhrase, dt));
    }
    parse_slash_date(text).map(|dt| (DateFormat::SlashDate, dt))
}

// Missing time means midnight; a present but invalid time fails the whole date
fn parse_time(hour: Option<&str>, minute: Option<&str>) -> Option<NaiveTime> {
    match (hour, minute) {
        (Some(h), Some(m)) => NaiveTime::from_hms_opt(h.parse().ok()?, m.parse().ok()?, 0),
        _ => NaiveTime::from_hms_opt(0, 0, 0),
    }
}

/// Display form used in fee notices: DD/MM/YYYY
pub fn format_display_date(date: NaiveDate) -> String {
    date.format("%d/%m/%Y").to_string()
}

// ============================================================================
// DURATIONS
// ============================================================================

/// Raw "H:MM:SS" → fractional hours, no sentinel handling
pub fn parse_duration_hours(text: &str) -> Option<f64> {
    let caps = DURATION_RE.captures(text.trim())?;

    let hours: u64 = caps.get(1)?.as_str().parse().ok()?;
    let minutes: u64 = caps.get(2)?.as_str().parse().ok()?;
    let seconds: u64 = caps.get(3)?.as_str().parse().ok()?;

    if minutes > 59 || seconds > 59 {
        return None;
    }

    Some(hours as f64 + minutes as f64 / 60.0 + seconds as f64 / 3600.0)
}

/// True for the exporter's full-day placeholder: [24, 24.01)
///
/// 23:59:59 sits just below 24 and is a real (if odd) duration, so the band only
/// extends upwards.
pub fn is_sentinel_hours(hours: f64) -> bool {
    hours >= SENTINEL_HOURS && hours - SENTINEL_HOURS < SENTINEL_TOLERANCE
}

/// "H:MM:SS" → billable hours, with the 24-hour placeholder coerced to 0
pub fn duration_to_hours(text: &str) -> Option<f64> {
    let hours = parse_duration_hours(text)?;
    if is_sentinel_hours(hours) {
        return Some(0.0);
    }
    Some(hours)
}

/// Fractional hours → "H:MM:SS" (rounded to the second)
pub fn hours_to_duration(hours: f64) -> String {
    let total_seconds = (hours.max(0.0) * 3600.0).round() as u64;
    format!(
        "{}:{:02}:{:02}",
        total_seconds / 3600,
        (total_seconds % 3600) / 60,
        total_seconds % 60
    )
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    #[test]
    fn test_chinese_date() {
        assert_eq!(parse_chinese_date("2025年8月31日 11:00"), Some(dt(2025, 8, 31, 11, 0)));
        assert_eq!(parse_chinese_date("  2025年9月1日 9:05 "), Some(dt(2025, 9, 1, 9, 5)));
    }

    #[test]
    fn test_chinese_date_without_time_is_midnight() {
        assert_eq!(parse_chinese_date("2025年8月31日"), Some(dt(2025, 8, 31, 0, 0)));
    }

    #[test]
    fn test_chinese_date_corrupted_delimiters() {
        assert_eq!(parse_chinese_date("2025?8?31? 11:00"), Some(dt(2025, 8, 31, 11, 0)));
        assert_eq!(
            parse_chinese_date("2025\u{FFFD}8\u{FFFD}31\u{FFFD} 11:00"),
            Some(dt(2025, 8, 31, 11, 0))
        );
        // Multi-byte mojibake of 年/月/日
        assert_eq!(parse_chinese_date("2025å¹´8æœˆ31æ—¥ 11:00"), Some(dt(2025, 8, 31, 11, 0)));
    }

    #[test]
    fn test_chinese_date_rejects_garbage() {
        assert_eq!(parse_chinese_date("next tuesday"), None);
        assert_eq!(parse_chinese_date("2025年13月1日 10:00"), None);
        assert_eq!(parse_chinese_date("2025年2月30日 10:00"), None);
        assert_eq!(parse_chinese_date("2025年8月31日 25:00"), None);
        assert_eq!(parse_chinese_date(""), None);
    }

    #[test]
    fn test_slash_date() {
        assert_eq!(parse_slash_date("31/08/25 12:30"), Some(dt(2025, 8, 31, 12, 30)));
        assert_eq!(parse_slash_date("1/9/25 9:00"), Some(dt(2025, 9, 1, 9, 0)));
        assert_eq!(parse_slash_date("01/09/25"), Some(dt(2025, 9, 1, 0, 0)));
    }

    #[test]
    fn test_slash_date_rejects_bad_shapes() {
        assert_eq!(parse_slash_date("31/08/2025 12:30"), None);
        assert_eq!(parse_slash_date("32/08/25 12:30"), None);
        assert_eq!(parse_slash_date("2025年8月31日 11:00"), None);
    }

    #[test]
    fn test_slash_date_not_mistaken_for_corrupted_chinese() {
        assert_eq!(parse_chinese_date("31/08/25 12:30"), None);
    }

    #[test]
    fn test_parse_schedule_datetime_detects_format() {
        let (fmt, value) = parse_schedule_datetime("2025年9月1日 10:00").unwrap();
        assert_eq!(fmt, DateFormat::ChinesePhrase);
        assert_eq!(value, dt(2025, 9, 1, 10, 0));

        let (fmt, value) = parse_schedule_datetime("01/09/25 11:00").unwrap();
        assert_eq!(fmt, DateFormat::SlashDate);
        assert_eq!(value, dt(2025, 9, 1, 11, 0));

        assert!(parse_schedule_datetime("tomorrow").is_none());
    }

    #[test]
    fn test_duration_to_hours() {
        assert_eq!(duration_to_hours("1:30:00"), Some(1.5));
        assert_eq!(duration_to_hours("0:45:00"), Some(0.75));
        assert_eq!(duration_to_hours("100:00:00"), Some(100.0));
    }

    #[test]
    fn test_duration_sentinel() {
        assert_eq!(duration_to_hours("24:00:00"), Some(0.0));
        assert_eq!(duration_to_hours("24:00:30"), Some(0.0));

        let almost = duration_to_hours("23:59:59").unwrap();
        assert!((almost - 23.9997).abs() < 0.0001);

        assert!(!is_sentinel_hours(23.999));
        assert!(is_sentinel_hours(24.0));
        assert!(!is_sentinel_hours(24.5));
    }

    #[test]
    fn test_duration_rejects_bad_shapes() {
        assert_eq!(duration_to_hours("1:30"), None);
        assert_eq!(duration_to_hours("1:60:00"), None);
        assert_eq!(duration_to_hours("abc"), None);
        assert_eq!(duration_to_hours(""), None);
    }

    #[test]
    fn test_hours_to_duration() {
        assert_eq!(hours_to_duration(1.5), "1:30:00");
        assert_eq!(hours_to_duration(0.75), "0:45:00");
        assert_eq!(hours_to_duration(2.0), "2:00:00");
    }

    #[test]
    fn test_format_display_date() {
        let date = NaiveDate::from_ymd_opt(2025, 9, 1).unwrap();
        assert_eq!(format_display_date(date), "01/09/2025");
    }
}
