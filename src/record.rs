// 📄 Event Records - one vendor's metadata for one corporate event
// Raw fields come from the extraction side; normalized keys are filled by the Normalizer.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

// ============================================================================
// LEDGER KEY
// ============================================================================

/// Globally unique identity of a record: vendor tag + vendor file/report id.
///
/// Ordering is lexicographic on (source, external_id) and is what every
/// tie-break in the matcher relies on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LedgerKey {
    pub source: String,
    pub external_id: String,
}

impl LedgerKey {
    pub fn new(source: impl Into<String>, external_id: impl Into<String>) -> Self {
        LedgerKey {
            source: source.into(),
            external_id: external_id.into(),
        }
    }
}

impl fmt::Display for LedgerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.source, self.external_id)
    }
}

// ============================================================================
// EVENT RECORD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Vendor tag (e.g. "factset", "refinitiv", "ciq")
    pub source: String,

    /// Vendor-unique file or report identifier
    pub external_id: String,

    /// Alternate firm identifiers (CUSIP, ISIN, ...); empty when the vendor gave none
    #[serde(default)]
    pub identifiers: BTreeSet<String>,

    pub raw_firm_name: String,
    pub raw_title: String,

    /// None when the vendor date was missing or unparseable
    pub event_date: Option<NaiveDate>,

    // ========================================================================
    // DERIVED (filled by Normalizer::annotate)
    // ========================================================================
    #[serde(default)]
    pub normalized_firm_key: String,

    #[serde(default)]
    pub normalized_title_key: String,
}

impl EventRecord {
    pub fn new(
        source: impl Into<String>,
        external_id: impl Into<String>,
        raw_firm_name: impl Into<String>,
        raw_title: impl Into<String>,
        event_date: Option<NaiveDate>,
    ) -> Self {
        EventRecord {
            source: source.into(),
            external_id: external_id.into(),
            identifiers: BTreeSet::new(),
            raw_firm_name: raw_firm_name.into(),
            raw_title: raw_title.into(),
            event_date,
            normalized_firm_key: String::new(),
            normalized_title_key: String::new(),
        }
    }

    /// Attach alternate identifiers, dropping blanks and placeholder values
    pub fn with_identifiers<I, S>(mut self, identifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.identifiers = identifiers
            .into_iter()
            .filter_map(|id| clean_identifier(id.as_ref()))
            .collect();
        self
    }

    pub fn key(&self) -> LedgerKey {
        LedgerKey::new(self.source.clone(), self.external_id.clone())
    }

    pub fn has_identifiers(&self) -> bool {
        !self.identifiers.is_empty()
    }

    /// True if the two records share at least one alternate identifier
    pub fn shares_identifier(&self, other: &EventRecord) -> bool {
        self.identifiers
            .intersection(&other.identifiers)
            .next()
            .is_some()
    }

    pub fn year(&self) -> Option<i32> {
        self.event_date.map(|d| d.year())
    }

    pub fn month(&self) -> Option<u32> {
        self.event_date.map(|d| d.month())
    }

    pub fn day(&self) -> Option<u32> {
        self.event_date.map(|d| d.day())
    }
}

/// Trim and upper-case an identifier; None for blanks and null placeholders
pub fn clean_identifier(raw: &str) -> Option<String> {
    let id = raw
        .trim()
        .trim_matches(|c| c == '\'' || c == '"')
        .trim()
        .to_uppercase();
    match id.as_str() {
        "" | "NAN" | "NONE" | "NULL" => None,
        _ => Some(id),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_key_ordering_is_lexicographic() {
        let a = LedgerKey::new("ciq", "200");
        let b = LedgerKey::new("ciq", "30");
        let c = LedgerKey::new("factset", "1");

        assert!(a < b);
        assert!(b < c);
        assert_eq!(a.to_string(), "ciq/200");
    }

    #[test]
    fn test_with_identifiers_cleans_values() {
        let record = EventRecord::new("factset", "1", "Apple Inc", "Q1 Call", None)
            .with_identifiers(vec![" 037833100 ", "nan", "", "'us0378331005'"]);

        assert_eq!(record.identifiers.len(), 2);
        assert!(record.identifiers.contains("037833100"));
        assert!(record.identifiers.contains("US0378331005"));
    }

    #[test]
    fn test_shares_identifier() {
        let a = EventRecord::new("factset", "1", "A", "A", None)
            .with_identifiers(vec!["037833100"]);
        let b = EventRecord::new("ciq", "2", "B", "B", None)
            .with_identifiers(vec!["037833100", "000000000"]);
        let c = EventRecord::new("ciq", "3", "C", "C", None);

        assert!(a.shares_identifier(&b));
        assert!(!a.shares_identifier(&c));
        assert!(!c.has_identifiers());
    }

    #[test]
    fn test_date_parts() {
        let record = EventRecord::new(
            "ciq",
            "1",
            "Acme",
            "Acme Q1",
            NaiveDate::from_ymd_opt(2024, 4, 15),
        );
        assert_eq!(record.year(), Some(2024));
        assert_eq!(record.month(), Some(4));
        assert_eq!(record.day(), Some(15));
    }
}
