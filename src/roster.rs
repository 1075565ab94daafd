// 👥 Roster - Reference list of students and their billing attributes
//
// Loaded explicitly (CSV file or in-memory entries) and passed into the pipeline.
// Immutable for the duration of a processing run: fee rates are copied onto each
// CourseRecord at processing time, so later roster edits never rewrite history.

use crate::error::{LedgerError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::Read;
use std::path::Path;

// ============================================================================
// STUDENT STATUS / LANGUAGE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StudentStatus {
    Ongoing,
    Graduated,
}

impl StudentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StudentStatus::Ongoing => "Ongoing",
            StudentStatus::Graduated => "Graduated",
        }
    }
}

/// Preferred language for guardian correspondence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Language {
    #[default]
    English,
    Chinese,
}

// ============================================================================
// ROSTER ENTRY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterEntry {
    /// Canonical name; also what CourseRecord.name stores
    pub name: String,

    pub fee_per_hour: f64,

    pub status: StudentStatus,

    pub guardian: String,

    /// Groups siblings billed to the same guardian (0 = no group)
    pub group_id: i64,

    #[serde(default)]
    pub language: Language,

    /// Other spellings that appear in calendar titles
    /// Example: "凯文" with alias "Kevan"
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl RosterEntry {
    pub fn new(
        name: impl Into<String>,
        fee_per_hour: f64,
        status: StudentStatus,
        guardian: impl Into<String>,
        group_id: i64,
    ) -> Self {
        RosterEntry {
            name: name.into(),
            fee_per_hour,
            status,
            guardian: guardian.into(),
            group_id,
            language: Language::English,
            aliases: Vec::new(),
        }
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.language = language;
        self
    }

    /// Add an alias (ignores blanks and repeats of the canonical name)
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        let alias = alias.into();
        let alias = alias.trim();
        if !alias.is_empty() && alias != self.name && !self.aliases.iter().any(|a| a == alias) {
            self.aliases.push(alias.to_string());
        }
        self
    }

    /// Canonical name followed by aliases
    pub fn all_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}

// CSV row shape: aliases are ';'-separated in one column
#[derive(Debug, Deserialize)]
struct RosterRow {
    name: String,
    fee_per_hour: f64,
    status: StudentStatus,
    guardian: String,
    group_id: i64,
    #[serde(default)]
    language: Option<Language>,
    #[serde(default)]
    aliases: Option<String>,
}

impl From<RosterRow> for RosterEntry {
    fn from(row: RosterRow) -> Self {
        let mut entry = RosterEntry::new(
            row.name.trim(),
            row.fee_per_hour,
            row.status,
            row.guardian.trim(),
            row.group_id,
        )
        .with_language(row.language.unwrap_or_default());

        for alias in row.aliases.as_deref().unwrap_or("").split(';') {
            entry = entry.with_alias(alias);
        }
        entry
    }
}

// ============================================================================
// AGGREGATE
// ============================================================================

/// Billing attributes for one matched name (or a ", "-joined shared session)
///
/// First resolved student supplies fee and group; the rest only contribute to the
/// joined status/guardian display strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedStudent {
    pub fee_per_hour: f64,
    pub status: String,
    pub guardian: String,
    pub group_id: i64,
}

// ============================================================================
// ROSTER
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct Roster {
    entries: Vec<RosterEntry>,
}

impl Roster {
    /// Build from entries; order is significant (first-match-wins in the matcher)
    pub fn new(entries: Vec<RosterEntry>) -> Result<Self> {
        let mut seen = HashSet::new();
        for entry in &entries {
            if entry.name.trim().is_empty() {
                return Err(LedgerError::Roster("roster entry with empty name".to_string()));
            }
            if !seen.insert(entry.name.as_str()) {
                return Err(LedgerError::Roster(format!("duplicate roster name: {}", entry.name)));
            }
        }
        Ok(Roster { entries })
    }

    /// Load from CSV with header
    /// `name,fee_per_hour,status,guardian,group_id,language,aliases`
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut entries = Vec::new();
        for row in rdr.deserialize::<RosterRow>() {
            entries.push(RosterEntry::from(row?));
        }
        Self::new(entries)
    }

    pub fn from_csv_path(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| {
            LedgerError::Roster(format!("cannot open roster {}: {}", path.display(), e))
        })?;
        Self::from_reader(file)
    }

    pub fn entries(&self) -> &[RosterEntry] {
        &self.entries
    }

    pub fn get(&self, name: &str) -> Option<&RosterEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Correspondence language of the first student billed to `guardian`
    pub fn guardian_language(&self, guardian: &str) -> Language {
        self.entries
            .iter()
            .find(|e| e.guardian == guardian)
            .map(|e| e.language)
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Combine billing attributes for `names` (comma-separated)
    pub fn aggregate(&self, names: &str) -> Option<AggregatedStudent> {
        let found: Vec<&RosterEntry> = names
            .split(',')
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .filter_map(|n| self.get(n))
            .collect();

        let first = found.first()?;

        Some(AggregatedStudent {
            fee_per_hour: first.fee_per_hour,
            status: join_unique(found.iter().map(|e| e.status.as_str())),
            guardian: join_unique(found.iter().map(|e| e.guardian.as_str())),
            group_id: first.group_id,
        })
    }
}

/// Deduplicate preserving first-seen order, then join with ", "
pub(crate) fn join_unique<'a>(values: impl Iterator<Item = &'a str>) -> String {
    let mut seen: Vec<&str> = Vec::new();
    for v in values {
        if !seen.contains(&v) {
            seen.push(v);
        }
    }
    seen.join(", ")
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_roster() -> Roster {
        Roster::new(vec![
            RosterEntry::new("Aaron", 80.0, StudentStatus::Ongoing, "Hui Mien", 2),
            RosterEntry::new("sheera", 60.0, StudentStatus::Ongoing, "Hui Mien", 2),
            RosterEntry::new("Lauren", 90.0, StudentStatus::Graduated, "Noelle", 0),
        ])
        .unwrap()
    }

    #[test]
    fn test_aggregate_single() {
        let agg = sample_roster().aggregate("Aaron").unwrap();
        assert_eq!(agg.fee_per_hour, 80.0);
        assert_eq!(agg.status, "Ongoing");
        assert_eq!(agg.guardian, "Hui Mien");
        assert_eq!(agg.group_id, 2);
    }

    #[test]
    fn test_aggregate_shared_session_first_wins() {
        let agg = sample_roster().aggregate("sheera, Aaron, Lauren").unwrap();

        // Rate and group from the first student, not averaged
        assert_eq!(agg.fee_per_hour, 60.0);
        assert_eq!(agg.group_id, 2);
        assert_eq!(agg.status, "Ongoing, Graduated");
        assert_eq!(agg.guardian, "Hui Mien, Noelle");
    }

    #[test]
    fn test_aggregate_skips_unknown_names() {
        let roster = sample_roster();
        let agg = roster.aggregate("Nobody, Lauren").unwrap();
        assert_eq!(agg.fee_per_hour, 90.0);

        assert!(roster.aggregate("Nobody").is_none());
        assert!(roster.aggregate("").is_none());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let result = Roster::new(vec![
            RosterEntry::new("Aaron", 80.0, StudentStatus::Ongoing, "Hui Mien", 2),
            RosterEntry::new("Aaron", 70.0, StudentStatus::Ongoing, "Other", 3),
        ]);
        assert!(matches!(result, Err(LedgerError::Roster(_))));
    }

    #[test]
    fn test_from_reader_parses_aliases_and_language() {
        let csv = "\
name,fee_per_hour,status,guardian,group_id,language,aliases
Aaron,80,Ongoing,Hui Mien,2,English,
凯文,80,Ongoing,Inoshi,3,English,Kevan; Kevin
惠宁,80,Graduated,惠宁妈妈,7,Chinese,Leanne
";
        let roster = Roster::from_reader(csv.as_bytes()).unwrap();

        assert_eq!(roster.len(), 3);
        let kevan = roster.get("凯文").unwrap();
        assert_eq!(kevan.aliases, vec!["Kevan".to_string(), "Kevin".to_string()]);
        assert!(roster.get("Aaron").unwrap().aliases.is_empty());

        let huining = roster.get("惠宁").unwrap();
        assert_eq!(huining.status, StudentStatus::Graduated);
        assert_eq!(huining.language, Language::Chinese);
    }

    #[test]
    fn test_from_reader_rejects_bad_fee() {
        let csv = "name,fee_per_hour,status,guardian,group_id\nAaron,lots,Ongoing,Hui Mien,2\n";
        assert!(Roster::from_reader(csv.as_bytes()).is_err());
    }

    #[test]
    fn test_join_unique_keeps_order() {
        let joined = join_unique(["b", "a", "b", "c"].into_iter());
        assert_eq!(joined, "b, a, c");
    }

    #[test]
    fn test_guardian_language() {
        let roster = Roster::new(vec![
            RosterEntry::new("惠宁", 80.0, StudentStatus::Ongoing, "惠宁妈妈", 7)
                .with_language(Language::Chinese),
            RosterEntry::new("Aaron", 80.0, StudentStatus::Ongoing, "Hui Mien", 2),
        ])
        .unwrap();

        assert_eq!(roster.guardian_language("惠宁妈妈"), Language::Chinese);
        assert_eq!(roster.guardian_language("Hui Mien"), Language::English);
        assert_eq!(roster.guardian_language("Nobody"), Language::English);
    }

    #[test]
    fn test_sample_roster_file() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("data/roster.sample.csv");
        let roster = Roster::from_csv_path(&path).unwrap();

        assert_eq!(roster.len(), 32);
        assert_eq!(roster.get("sheera").unwrap().fee_per_hour, 60.0);
        assert_eq!(roster.get("Lauren").unwrap().status, StudentStatus::Graduated);
        assert_eq!(roster.guardian_language("惠宁妈妈"), Language::Chinese);

        let shared = roster.aggregate("Aaron, sheera").unwrap();
        assert_eq!(shared.fee_per_hour, 80.0);
        assert_eq!(shared.guardian, "Hui Mien");
    }
}
