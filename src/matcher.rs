// 🔍 Matcher - decide whether an incoming record is already in the ledger
// Cascade: Identifier → Exact Firm → Exact Title → Fuzzy, first hit wins

use crate::blocking::BlockingKeys;
use crate::config::MatchConfig;
use crate::error::RecordError;
use crate::ledger::{CandidateSet, Ledger, LedgerEntry};
use crate::record::{EventRecord, LedgerKey};
use crate::similarity::{best_match, SimilarityScorer, WeightedRatio};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

// ============================================================================
// MATCH TIER
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    /// Shared alternate identifier (CUSIP, ISIN, ...)
    Identifier,

    /// Incoming normalized title found word-bounded in a candidate
    ExactTitle,

    /// Incoming normalized firm key found word-bounded in a candidate
    ExactFirm,

    /// Best similarity score at or above the threshold
    Fuzzy,

    /// Nothing fired
    None,
}

impl MatchTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchTier::Identifier => "identifier",
            MatchTier::ExactTitle => "exact_title",
            MatchTier::ExactFirm => "exact_firm",
            MatchTier::Fuzzy => "fuzzy",
            MatchTier::None => "none",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "identifier" => Some(MatchTier::Identifier),
            "exact_title" => Some(MatchTier::ExactTitle),
            "exact_firm" => Some(MatchTier::ExactFirm),
            "fuzzy" => Some(MatchTier::Fuzzy),
            "none" => Some(MatchTier::None),
            _ => None,
        }
    }
}

impl fmt::Display for MatchTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// MATCH VERDICT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchVerdict {
    pub matched: bool,

    pub tier: MatchTier,

    /// Only set for the fuzzy tier
    pub similarity_score: Option<u8>,

    /// Ledger record this one duplicates
    pub matched_ref: Option<LedgerKey>,

    /// Size of the blocked candidate set
    pub candidate_count: usize,

    /// Fuzzy tier ran with no candidate names left after the length prefilter
    pub degraded: bool,

    /// Human-readable reason
    pub reason: String,
}

impl MatchVerdict {
    pub fn matched(
        tier: MatchTier,
        matched_ref: LedgerKey,
        similarity_score: Option<u8>,
        candidate_count: usize,
        reason: impl Into<String>,
    ) -> Self {
        MatchVerdict {
            matched: true,
            tier,
            similarity_score,
            matched_ref: Some(matched_ref),
            candidate_count,
            degraded: false,
            reason: reason.into(),
        }
    }

    pub fn unmatched(candidate_count: usize, reason: impl Into<String>) -> Self {
        MatchVerdict {
            matched: false,
            tier: MatchTier::None,
            similarity_score: None,
            matched_ref: None,
            candidate_count,
            degraded: false,
            reason: reason.into(),
        }
    }

    fn degraded(mut self, degraded: bool) -> Self {
        self.degraded = degraded;
        self
    }
}

// ============================================================================
// MATCHER
// ============================================================================

pub struct Matcher {
    config: MatchConfig,
    scorer: Arc<dyn SimilarityScorer>,
}

impl Matcher {
    /// Matcher with the default WeightedRatio scorer
    pub fn new(config: MatchConfig) -> Self {
        Self::with_scorer(config, Arc::new(WeightedRatio))
    }

    pub fn with_scorer(config: MatchConfig, scorer: Arc<dyn SimilarityScorer>) -> Self {
        Matcher { config, scorer }
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// Block the ledger around the record's date and run the cascade.
    ///
    /// The record's own ledger row (if any) is never a candidate.
    pub fn match_record(&self, record: &EventRecord, ledger: &Ledger) -> Result<MatchVerdict, RecordError> {
        let key = record.key();
        let date = record
            .event_date
            .ok_or_else(|| RecordError::UnmatchableDate { key: key.clone() })?;

        let keys = BlockingKeys::from_date(date, self.config.day_buffer_half_width);
        let candidates = ledger.candidates_for(&keys, &self.config, Some(&key));

        Ok(self.cascade(record, &candidates))
    }

    pub fn cascade(&self, record: &EventRecord, candidates: &CandidateSet<'_>) -> MatchVerdict {
        let count = candidates.len();
        if candidates.is_empty() {
            return MatchVerdict::unmatched(0, "no ledger records in the blocking window");
        }

        if let Some(hit) = self.check_identifier(record, candidates) {
            return MatchVerdict::matched(
                MatchTier::Identifier,
                hit.key(),
                None,
                count,
                format!("shares identifier with {}", hit.key()),
            );
        }

        if let Some(hit) = self.check_exact(&record.normalized_firm_key, candidates) {
            return MatchVerdict::matched(
                MatchTier::ExactFirm,
                hit.key(),
                None,
                count,
                format!("firm key '{}' found in {}", record.normalized_firm_key, hit.key()),
            );
        }

        if let Some(hit) = self.check_exact(&record.normalized_title_key, candidates) {
            return MatchVerdict::matched(
                MatchTier::ExactTitle,
                hit.key(),
                None,
                count,
                format!("title key '{}' found in {}", record.normalized_title_key, hit.key()),
            );
        }

        self.check_fuzzy(record, candidates)
    }

    /// Tier 1: any intersection of identifier sets
    fn check_identifier<'a>(&self, record: &EventRecord, candidates: &CandidateSet<'a>) -> Option<&'a LedgerEntry> {
        if !record.has_identifiers() {
            return None;
        }
        candidates.iter().find(|c| record.shares_identifier(&c.record))
    }

    /// Tiers 2 and 3: word-bounded containment in candidate title, then firm key
    fn check_exact<'a>(&self, needle: &str, candidates: &CandidateSet<'a>) -> Option<&'a LedgerEntry> {
        if needle.is_empty() {
            return None;
        }
        candidates.iter().find(|c| {
            contains_word(&c.record.normalized_title_key, needle)
                || contains_word(&c.record.normalized_firm_key, needle)
        })
    }

    /// Tier 4: best similarity among distinct candidate firm names, firm key first
    fn check_fuzzy(&self, record: &EventRecord, candidates: &CandidateSet<'_>) -> MatchVerdict {
        let count = candidates.len();
        let names = candidates.firm_keys();
        let mut degraded = false;
        let mut best_seen: Option<u8> = None;

        for query in [&record.normalized_firm_key, &record.normalized_title_key] {
            if query.is_empty() {
                continue;
            }

            let eligible = self.length_prefilter(query, &names);
            if eligible.is_empty() {
                degraded = true;
                debug!(record = %record.key(), query = %query, "fuzzy tier has no candidate names");
                continue;
            }

            let Some(best) = best_match(self.scorer.as_ref(), query, eligible) else {
                continue;
            };
            best_seen = best_seen.max(Some(best.score));

            if best.score >= self.config.fuzzy_threshold {
                if let Some(hit) = candidates.first_with_firm_key(best.choice) {
                    return MatchVerdict::matched(
                        MatchTier::Fuzzy,
                        hit.key(),
                        Some(best.score),
                        count,
                        format!(
                            "'{}' ~ '{}' scored {} by {} (threshold {})",
                            query,
                            best.choice,
                            best.score,
                            self.scorer.name(),
                            self.config.fuzzy_threshold
                        ),
                    )
                    .degraded(degraded);
                }
            }
        }

        let reason = match best_seen {
            Some(score) => format!(
                "best similarity {} below threshold {}",
                score, self.config.fuzzy_threshold
            ),
            None => "no candidate names to score".to_string(),
        };
        MatchVerdict::unmatched(count, reason).degraded(degraded)
    }

    /// Names whose space-stripped length is within the tolerance of the query's
    fn length_prefilter<'a>(&self, query: &str, names: &BTreeSet<&'a str>) -> Vec<&'a str> {
        let Some(tolerance) = self.config.length_tolerance else {
            return names.iter().copied().collect();
        };
        let query_len = compact_len(query);
        names
            .iter()
            .copied()
            .filter(|name| compact_len(name).abs_diff(query_len) <= tolerance)
            .collect()
    }
}

fn compact_len(s: &str) -> usize {
    s.chars().filter(|c| !c.is_whitespace()).count()
}

/// True if `needle` occurs in `haystack` bounded by spaces or the string ends
fn contains_word(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() || haystack.len() < needle.len() {
        return false;
    }
    haystack.match_indices(needle).any(|(start, _)| {
        let end = start + needle.len();
        let before_ok = haystack[..start].chars().next_back().map_or(true, |c| c == ' ');
        let after_ok = haystack[end..].chars().next().map_or(true, |c| c == ' ');
        before_ok && after_ok
    })
}

// ============================================================================
// TESTS
// ============================================================================
