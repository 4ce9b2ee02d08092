// 📚 Ledger - append-mostly registry of every record seen, from any vendor
//
// Records are only appended. Status fields change through match verdicts, and
// an unresolved record may have its fields refreshed by a later copy of itself
// (e.g. once the vendor fixes a missing date). Matching borrows the ledger
// immutably, so a batch can never mutate what it is scanning.

use crate::blocking::{narrow, BlockingKeys};
use crate::config::MatchConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::matcher::{MatchTier, MatchVerdict};
use crate::record::{EventRecord, LedgerKey};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

// ============================================================================
// STATUS
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerStatus {
    /// None until a verdict has been applied
    pub is_duplicate: Option<bool>,

    /// Date the record was marked for processing (new records only)
    pub date_processed: Option<NaiveDate>,

    /// Audit: which ledger record this one duplicated, and how
    pub matched_ref: Option<LedgerKey>,
    pub match_tier: Option<MatchTier>,
}

impl LedgerStatus {
    pub fn from_verdict(verdict: &MatchVerdict, processed_on: NaiveDate) -> Self {
        LedgerStatus {
            is_duplicate: Some(verdict.matched),
            date_processed: if verdict.matched {
                None
            } else {
                Some(processed_on)
            },
            matched_ref: verdict.matched_ref.clone(),
            match_tier: Some(verdict.tier),
        }
    }

    /// Status for records reconciled without matching (excluded issuers)
    pub fn not_duplicate() -> Self {
        LedgerStatus {
            is_duplicate: Some(false),
            ..LedgerStatus::default()
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.is_duplicate.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub record: EventRecord,
    pub status: LedgerStatus,
}

impl LedgerEntry {
    pub fn new(record: EventRecord) -> Self {
        LedgerEntry {
            record,
            status: LedgerStatus::default(),
        }
    }

    pub fn key(&self) -> LedgerKey {
        self.record.key()
    }

    fn has_key(&self, key: &LedgerKey) -> bool {
        self.record.source == key.source && self.record.external_id == key.external_id
    }
}

// ============================================================================
// DIFF
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub key: LedgerKey,
    pub status: LedgerStatus,
}

/// Everything one batch changes: new rows, refreshed unresolved rows, then status updates
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerDiff {
    pub appended: Vec<EventRecord>,
    pub refreshed: Vec<EventRecord>,
    pub status_updates: Vec<StatusUpdate>,
}

impl LedgerDiff {
    pub fn is_empty(&self) -> bool {
        self.appended.is_empty() && self.refreshed.is_empty() && self.status_updates.is_empty()
    }
}

// ============================================================================
// LEDGER
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct Ledger {
    entries: Vec<LedgerEntry>,
    index: HashMap<LedgerKey, usize>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<LedgerEntry>) -> LedgerResult<Self> {
        let mut ledger = Ledger::new();
        for entry in entries {
            ledger.push_entry(entry)?;
        }
        Ok(ledger)
    }

    pub fn from_records(records: Vec<EventRecord>) -> LedgerResult<Self> {
        Self::from_entries(records.into_iter().map(LedgerEntry::new).collect())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn get(&self, key: &LedgerKey) -> Option<&LedgerEntry> {
        self.index.get(key).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, key: &LedgerKey) -> bool {
        self.index.contains_key(key)
    }

    /// Append a new record with an unresolved status
    pub fn append(&mut self, record: EventRecord) -> LedgerResult<()> {
        self.push_entry(LedgerEntry::new(record))
    }

    fn push_entry(&mut self, entry: LedgerEntry) -> LedgerResult<()> {
        let key = entry.key();
        if self.index.contains_key(&key) {
            return Err(LedgerError::DuplicateKey(key));
        }
        self.index.insert(key, self.entries.len());
        self.entries.push(entry);
        Ok(())
    }

    /// Record the verdict on the record that produced it
    pub fn apply_verdict(
        &mut self,
        key: &LedgerKey,
        verdict: &MatchVerdict,
        processed_on: NaiveDate,
    ) -> LedgerResult<()> {
        self.set_status(key, LedgerStatus::from_verdict(verdict, processed_on))
    }

    pub fn set_status(&mut self, key: &LedgerKey, status: LedgerStatus) -> LedgerResult<()> {
        let idx = self.position(key)?;
        self.entries[idx].status = status;
        Ok(())
    }

    /// Swap in a newer copy of an existing record, keeping its status
    pub fn replace_record(&mut self, record: EventRecord) -> LedgerResult<()> {
        let idx = self.position(&record.key())?;
        self.entries[idx].record = record;
        Ok(())
    }

    fn position(&self, key: &LedgerKey) -> LedgerResult<usize> {
        self.index
            .get(key)
            .copied()
            .ok_or_else(|| LedgerError::UnknownKey(key.clone()))
    }

    /// Merge a batch diff. Validated up front: either all of it lands or none.
    pub fn apply_diff(&mut self, diff: &LedgerDiff) -> LedgerResult<()> {
        let mut incoming: HashSet<LedgerKey> = HashSet::new();
        for record in &diff.appended {
            let key = record.key();
            if self.contains(&key) || !incoming.insert(key.clone()) {
                return Err(LedgerError::DuplicateKey(key));
            }
        }
        for record in &diff.refreshed {
            let key = record.key();
            if !self.contains(&key) {
                return Err(LedgerError::UnknownKey(key));
            }
        }
        for update in &diff.status_updates {
            if !self.contains(&update.key) && !incoming.contains(&update.key) {
                return Err(LedgerError::UnknownKey(update.key.clone()));
            }
        }

        for record in &diff.appended {
            self.append(record.clone())?;
        }
        for record in &diff.refreshed {
            self.replace_record(record.clone())?;
        }
        for update in &diff.status_updates {
            self.set_status(&update.key, update.status.clone())?;
        }
        Ok(())
    }

    /// Read-only view of the records whose event date is near the blocking keys.
    ///
    /// `exclude` keeps a record from being offered as its own candidate.
    pub fn candidates_for<'a>(
        &'a self,
        keys: &BlockingKeys,
        config: &MatchConfig,
        exclude: Option<&LedgerKey>,
    ) -> CandidateSet<'a> {
        let pool: Vec<&LedgerEntry> = self
            .entries
            .iter()
            .filter(|e| exclude.map_or(true, |key| !e.has_key(key)))
            .collect();

        let narrowed = narrow(
            pool,
            &keys.steps(),
            config.max_blocking_steps,
            config.min_candidates,
            |e: &LedgerEntry| e.record.event_date,
        );

        CandidateSet::new(narrowed.items, narrowed.steps_applied)
    }

    pub fn unresolved_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| !e.status.is_resolved())
            .count()
    }
}

// ============================================================================
// CANDIDATE SET
// ============================================================================

/// Blocked subset of the ledger, ordered by ledger key; never persisted
#[derive(Debug, Clone)]
pub struct CandidateSet<'a> {
    entries: Vec<&'a LedgerEntry>,
    steps_applied: usize,
}

impl<'a> CandidateSet<'a> {
    pub fn new(mut entries: Vec<&'a LedgerEntry>, steps_applied: usize) -> Self {
        entries.sort_by(|a, b| {
            (&a.record.source, &a.record.external_id).cmp(&(&b.record.source, &b.record.external_id))
        });
        CandidateSet {
            entries,
            steps_applied,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn steps_applied(&self) -> usize {
        self.steps_applied
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a LedgerEntry> + '_ {
        self.entries.iter().copied()
    }

    /// Distinct non-empty normalized firm keys, sorted
    pub fn firm_keys(&self) -> BTreeSet<&'a str> {
        self.entries
            .iter()
            .copied()
            .map(|e: &'a LedgerEntry| e.record.normalized_firm_key.as_str())
            .filter(|k| !k.is_empty())
            .collect()
    }

    /// Smallest-keyed candidate carrying this normalized firm key
    pub fn first_with_firm_key(&self, firm_key: &str) -> Option<&'a LedgerEntry> {
        self.iter()
            .find(|e| e.record.normalized_firm_key == firm_key)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn create_test_record(source: &str, id: &str, firm_key: &str, event_date: Option<NaiveDate>) -> EventRecord {
        let mut record = EventRecord::new(source, id, firm_key, firm_key, event_date);
        record.normalized_firm_key = firm_key.to_string();
        record.normalized_title_key = firm_key.to_string();
        record
    }

    fn verdict(matched: bool) -> MatchVerdict {
        if matched {
            MatchVerdict::matched(MatchTier::ExactFirm, LedgerKey::new("ciq", "1"), None, 1, "test")
        } else {
            MatchVerdict::unmatched(1, "test")
        }
    }

    #[test]
    fn test_append_rejects_duplicate_key() {
        let mut ledger = Ledger::new();
        ledger.append(create_test_record("ciq", "1", "ACME", None)).unwrap();

        let err = ledger
            .append(create_test_record("ciq", "1", "OTHER", None))
            .unwrap_err();
        assert_eq!(err, LedgerError::DuplicateKey(LedgerKey::new("ciq", "1")));

        // Same external id from another vendor is a different record
        ledger.append(create_test_record("factset", "1", "ACME", None)).unwrap();
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn test_apply_verdict_targets_the_given_record() {
        let mut ledger = Ledger::from_records(vec![
            create_test_record("ciq", "1", "ACME", None),
            create_test_record("factset", "2", "GLOBEX", None),
        ])
        .unwrap();

        let key = LedgerKey::new("factset", "2");
        ledger.apply_verdict(&key, &verdict(false), date(2024, 5, 1)).unwrap();

        let updated = ledger.get(&key).unwrap();
        assert_eq!(updated.status.is_duplicate, Some(false));
        assert_eq!(updated.status.date_processed, Some(date(2024, 5, 1)));
        assert_eq!(updated.status.match_tier, Some(MatchTier::None));

        let untouched = ledger.get(&LedgerKey::new("ciq", "1")).unwrap();
        assert_eq!(untouched.status, LedgerStatus::default());
    }

    #[test]
    fn test_duplicate_verdict_has_no_processing_date() {
        let status = LedgerStatus::from_verdict(&verdict(true), date(2024, 5, 1));
        assert_eq!(status.is_duplicate, Some(true));
        assert_eq!(status.date_processed, None);
        assert_eq!(status.matched_ref, Some(LedgerKey::new("ciq", "1")));
        assert!(status.is_resolved());
    }

    #[test]
    fn test_apply_verdict_unknown_key() {
        let mut ledger = Ledger::new();
        let err = ledger
            .apply_verdict(&LedgerKey::new("ciq", "404"), &verdict(true), date(2024, 5, 1))
            .unwrap_err();
        assert!(matches!(err, LedgerError::UnknownKey(_)));
    }

    #[test]
    fn test_apply_diff_is_all_or_nothing() {
        let mut ledger = Ledger::from_records(vec![create_test_record("ciq", "1", "ACME", None)]).unwrap();

        let bad = LedgerDiff {
            appended: vec![create_test_record("factset", "9", "NEW", None)],
            refreshed: vec![],
            status_updates: vec![StatusUpdate {
                key: LedgerKey::new("factset", "missing"),
                status: LedgerStatus::not_duplicate(),
            }],
        };
        assert!(ledger.apply_diff(&bad).is_err());
        assert_eq!(ledger.len(), 1);

        let good = LedgerDiff {
            appended: vec![create_test_record("factset", "9", "NEW", None)],
            refreshed: vec![],
            status_updates: vec![StatusUpdate {
                key: LedgerKey::new("factset", "9"),
                status: LedgerStatus::not_duplicate(),
            }],
        };
        ledger.apply_diff(&good).unwrap();
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.unresolved_count(), 1);
    }

    #[test]
    fn test_refreshed_record_becomes_a_candidate() {
        let mut ledger = Ledger::from_records(vec![create_test_record("factset", "5", "ACME", None)]).unwrap();
        let keys = BlockingKeys::from_date(date(2024, 10, 15), 3);
        assert!(ledger.candidates_for(&keys, &MatchConfig::default(), None).is_empty());

        let diff = LedgerDiff {
            refreshed: vec![create_test_record("factset", "5", "ACME", Some(date(2024, 10, 15)))],
            status_updates: vec![StatusUpdate {
                key: LedgerKey::new("factset", "5"),
                status: LedgerStatus::not_duplicate(),
            }],
            ..LedgerDiff::default()
        };
        ledger.apply_diff(&diff).unwrap();

        assert_eq!(ledger.len(), 1);
        let entry = ledger.get(&LedgerKey::new("factset", "5")).unwrap();
        assert_eq!(entry.record.event_date, Some(date(2024, 10, 15)));
        assert_eq!(entry.status.is_duplicate, Some(false));
        assert_eq!(ledger.candidates_for(&keys, &MatchConfig::default(), None).len(), 1);
    }

    #[test]
    fn test_refresh_of_unknown_record_rejected() {
        let mut ledger = Ledger::new();
        let diff = LedgerDiff {
            refreshed: vec![create_test_record("ciq", "404", "ACME", None)],
            ..LedgerDiff::default()
        };

        assert_eq!(
            ledger.apply_diff(&diff).unwrap_err(),
            LedgerError::UnknownKey(LedgerKey::new("ciq", "404"))
        );
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_candidates_sorted_and_self_excluded() {
        let ledger = Ledger::from_records(vec![
            create_test_record("factset", "7", "ACME", Some(date(2024, 4, 14))),
            create_test_record("ciq", "3", "ACME", Some(date(2024, 4, 16))),
            create_test_record("ciq", "2", "GLOBEX", Some(date(2024, 4, 15))),
            create_test_record("ciq", "9", "FAR", Some(date(2024, 9, 15))),
        ])
        .unwrap();

        let keys = BlockingKeys::from_date(date(2024, 4, 15), 3);
        let own = LedgerKey::new("ciq", "2");
        let candidates = ledger.candidates_for(&keys, &MatchConfig::default(), Some(&own));

        let ids: Vec<String> = candidates.iter().map(|e| e.key().to_string()).collect();
        assert_eq!(ids, vec!["ciq/3", "factset/7"]);
        assert_eq!(candidates.steps_applied(), 3);
        assert_eq!(candidates.firm_keys().into_iter().collect::<Vec<_>>(), vec!["ACME"]);
        assert_eq!(
            candidates.first_with_firm_key("ACME").unwrap().key(),
            LedgerKey::new("ciq", "3")
        );
    }

    #[test]
    fn test_candidates_empty_outside_window() {
        let ledger = Ledger::from_records(vec![create_test_record(
            "ciq",
            "1",
            "ACME",
            Some(date(2022, 4, 15)),
        )])
        .unwrap();

        let keys = BlockingKeys::from_date(date(2024, 4, 15), 3);
        let candidates = ledger.candidates_for(&keys, &MatchConfig::default(), None);
        assert!(candidates.is_empty());
    }
}
