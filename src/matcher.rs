// 🏷️ Name Matcher - which roster student does a calendar title refer to?
//
// Policy: case-insensitive substring containment of the canonical name or any alias.
// When several students match, the FIRST in roster order wins. This can
// misattribute a lesson (a name hidden inside unrelated text, or a combined
// sibling session logged under one title); it is kept as-is on purpose.

use crate::roster::Roster;

/// One lowercase pattern pointing at a roster name
#[derive(Debug, Clone)]
struct NamePattern {
    pattern: String,
    name: String,
}

// ============================================================================
// NAME MATCHER
// ============================================================================

#[derive(Debug, Clone)]
pub struct NameMatcher {
    /// Patterns grouped per roster entry, in roster order
    entries: Vec<Vec<NamePattern>>,
}

impl NameMatcher {
    pub fn new(roster: &Roster) -> Self {
        let entries = roster
            .entries()
            .iter()
            .map(|entry| {
                entry
                    .all_names()
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .map(|n| NamePattern {
                        pattern: n.to_lowercase(),
                        name: entry.name.clone(),
                    })
                    .collect()
            })
            .collect();

        NameMatcher { entries }
    }

    /// Canonical roster name mentioned in `title`, or None
    pub fn match_name(&self, title: &str) -> Option<&str> {
        let title_lower = title.to_lowercase();

        self.entries
            .iter()
            .flatten()
            .find(|p| title_lower.contains(&p.pattern))
            .map(|p| p.name.as_str())
    }

    /// Every roster name mentioned in `title`, in roster order
    ///
    /// Diagnostic only: the pipeline bills the first match.
    pub fn all_matches(&self, title: &str) -> Vec<&str> {
        let title_lower = title.to_lowercase();

        self.entries
            .iter()
            .filter_map(|patterns| {
                patterns
                    .iter()
                    .find(|p| title_lower.contains(&p.pattern))
                    .map(|p| p.name.as_str())
            })
            .collect()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster::{RosterEntry, StudentStatus};

    fn matcher() -> NameMatcher {
        let roster = Roster::new(vec![
            RosterEntry::new("Aaron", 80.0, StudentStatus::Ongoing, "Hui Mien", 2),
            RosterEntry::new("sheera", 60.0, StudentStatus::Ongoing, "Hui Mien", 2),
            RosterEntry::new("凯文", 80.0, StudentStatus::Ongoing, "Inoshi", 3).with_alias("Kevan"),
            RosterEntry::new("Ian", 80.0, StudentStatus::Ongoing, "Someone", 0),
        ])
        .unwrap();
        NameMatcher::new(&roster)
    }

    #[test]
    fn test_case_insensitive() {
        let m = matcher();
        assert_eq!(m.match_name("AARON piano lesson"), Some("Aaron"));
        assert_eq!(m.match_name("lesson with Sheera"), Some("sheera"));
    }

    #[test]
    fn test_alias_resolves_to_canonical_name() {
        let m = matcher();
        assert_eq!(m.match_name("Kevan maths"), Some("凯文"));
        assert_eq!(m.match_name("凯文 maths"), Some("凯文"));
    }

    #[test]
    fn test_first_in_roster_order_wins() {
        let m = matcher();
        // Both siblings named; Aaron comes first in the roster
        assert_eq!(m.match_name("sheera & aaron"), Some("Aaron"));
        assert_eq!(m.all_matches("sheera & aaron"), vec!["Aaron", "sheera"]);
    }

    #[test]
    fn test_substring_false_positive_is_kept() {
        // "Ian" hides inside "Christian": documented limitation
        assert_eq!(matcher().match_name("Christian choir"), Some("Ian"));
    }

    #[test]
    fn test_no_match() {
        assert_eq!(matcher().match_name("Staff meeting"), None);
        assert_eq!(matcher().match_name(""), None);
    }
}
