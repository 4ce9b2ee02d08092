// 🔄 Batch Reconciler - two-phase matching of incoming records against the ledger
//
// Phase 1 (plan): normalize and match every record in parallel against a frozen
//   &Ledger, producing one outcome per record and a LedgerDiff.
// Phase 2 (commit): the caller's &mut Ledger takes the diff in one step.
//
// Records in the same batch never see each other: they are all matched against
// the snapshot taken before the batch started.

use crate::error::RecordError;
use crate::ledger::{Ledger, LedgerDiff, LedgerStatus, StatusUpdate};
use crate::matcher::{MatchTier, MatchVerdict, Matcher};
use crate::normalizer::Normalizer;
use crate::record::{EventRecord, LedgerKey};
use anyhow::Result;
use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

// ============================================================================
// OUTCOMES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Firm name carries an excluded term (e.g. government issuers)
    Excluded,

    /// Already in the ledger with a resolved status
    AlreadyReconciled,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Excluded => "excluded",
            SkipReason::AlreadyReconciled => "already_reconciled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RecordResult {
    Verdict(MatchVerdict),
    Skipped { reason: SkipReason },
    Failed { error: RecordError },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordOutcome {
    pub key: LedgerKey,
    pub result: RecordResult,
}

impl RecordOutcome {
    pub fn verdict(&self) -> Option<&MatchVerdict> {
        match &self.result {
            RecordResult::Verdict(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        self.verdict().map_or(false, |v| v.matched)
    }
}

// ============================================================================
// BATCH SUMMARY
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub matched_identifier: usize,
    pub matched_exact_firm: usize,
    pub matched_exact_title: usize,
    pub matched_fuzzy: usize,
    pub new_records: usize,
    pub skipped: usize,
    pub failed: usize,
    pub degraded: usize,
    pub elapsed_ms: u128,
}

impl BatchSummary {
    pub fn from_outcomes(outcomes: &[RecordOutcome], elapsed_ms: u128) -> Self {
        let mut summary = BatchSummary {
            total: outcomes.len(),
            elapsed_ms,
            ..BatchSummary::default()
        };

        for outcome in outcomes {
            match &outcome.result {
                RecordResult::Verdict(v) => {
                    if v.degraded {
                        summary.degraded += 1;
                    }
                    match v.tier {
                        MatchTier::Identifier => summary.matched_identifier += 1,
                        MatchTier::ExactFirm => summary.matched_exact_firm += 1,
                        MatchTier::ExactTitle => summary.matched_exact_title += 1,
                        MatchTier::Fuzzy => summary.matched_fuzzy += 1,
                        MatchTier::None => summary.new_records += 1,
                    }
                }
                RecordResult::Skipped { .. } => summary.skipped += 1,
                RecordResult::Failed { .. } => summary.failed += 1,
            }
        }

        summary
    }

    pub fn matched(&self) -> usize {
        self.matched_identifier + self.matched_exact_firm + self.matched_exact_title + self.matched_fuzzy
    }

    /// Records that went through matching or failed trying
    fn considered(&self) -> usize {
        self.total - self.skipped
    }

    pub fn new_rate(&self) -> f64 {
        rate(self.new_records, self.considered())
    }

    pub fn match_rate(&self) -> f64 {
        rate(self.matched(), self.considered())
    }

    pub fn summary(&self) -> String {
        format!(
            "{} records: {} duplicates ({:.1}%), {} new ({:.1}%), {} skipped, {} failed | tiers id={} firm={} title={} fuzzy={} | {}ms",
            self.total,
            self.matched(),
            self.match_rate() * 100.0,
            self.new_records,
            self.new_rate() * 100.0,
            self.skipped,
            self.failed,
            self.matched_identifier,
            self.matched_exact_firm,
            self.matched_exact_title,
            self.matched_fuzzy,
            self.elapsed_ms
        )
    }
}

fn rate(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub batch_id: Uuid,
    pub processed_on: NaiveDate,
    pub outcomes: Vec<RecordOutcome>,
    pub diff: LedgerDiff,
    pub summary: BatchSummary,
}

// ============================================================================
// BATCH RECONCILER
// ============================================================================

pub struct BatchReconciler {
    normalizer: Normalizer,
    matcher: Matcher,
}

impl BatchReconciler {
    pub fn new(normalizer: Normalizer, matcher: Matcher) -> Self {
        BatchReconciler { normalizer, matcher }
    }

    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    /// Phase 1: compute every outcome and the diff. The ledger is only read.
    pub fn plan(&self, ledger: &Ledger, mut records: Vec<EventRecord>, processed_on: NaiveDate) -> BatchOutcome {
        let started = Instant::now();
        let batch_id = Uuid::new_v4();

        records
            .par_iter_mut()
            .for_each(|record| self.normalizer.annotate(record));

        // First occurrence of a key wins; repeats are reported
        let mut seen: HashSet<LedgerKey> = HashSet::with_capacity(records.len());
        let first_seen: Vec<bool> = records.iter().map(|r| seen.insert(r.key())).collect();

        let outcomes: Vec<RecordOutcome> = records
            .par_iter()
            .zip(first_seen.par_iter())
            .map(|(record, &first)| RecordOutcome {
                key: record.key(),
                result: self.classify(record, first, ledger),
            })
            .collect();

        let diff = build_diff(ledger, &records, &first_seen, &outcomes, processed_on);
        let summary = BatchSummary::from_outcomes(&outcomes, started.elapsed().as_millis());

        debug!(
            batch = %batch_id,
            appended = diff.appended.len(),
            refreshed = diff.refreshed.len(),
            updates = diff.status_updates.len(),
            "batch planned"
        );

        BatchOutcome {
            batch_id,
            processed_on,
            outcomes,
            diff,
            summary,
        }
    }

    fn classify(&self, record: &EventRecord, first: bool, ledger: &Ledger) -> RecordResult {
        let key = record.key();

        if !first {
            return RecordResult::Failed {
                error: RecordError::DuplicateInBatch { key },
            };
        }
        if ledger.get(&key).map_or(false, |e| e.status.is_resolved()) {
            return RecordResult::Skipped {
                reason: SkipReason::AlreadyReconciled,
            };
        }
        if self.matcher.config().is_excluded(&record.raw_firm_name) {
            return RecordResult::Skipped {
                reason: SkipReason::Excluded,
            };
        }

        match self.matcher.match_record(record, ledger) {
            Ok(verdict) => RecordResult::Verdict(verdict),
            Err(error) => {
                warn!(record = %key, error = %error, "record needs manual review");
                RecordResult::Failed { error }
            }
        }
    }

    /// Plan then merge into the ledger
    pub fn reconcile(
        &self,
        ledger: &mut Ledger,
        records: Vec<EventRecord>,
        processed_on: NaiveDate,
    ) -> Result<BatchOutcome> {
        let outcome = self.plan(ledger, records, processed_on);
        ledger.apply_diff(&outcome.diff)?;
        info!(batch = %outcome.batch_id, "{}", outcome.summary.summary());
        Ok(outcome)
    }

    /// Reconcile in chunks, handing each planned chunk to `on_commit` (usually a
    /// persistence step) before it is merged. Later chunks see earlier ones.
    ///
    /// If `on_commit` fails, that chunk is not merged and the run stops; every
    /// chunk before it stays committed.
    pub fn run_chunked<F>(
        &self,
        ledger: &mut Ledger,
        records: Vec<EventRecord>,
        chunk_size: usize,
        processed_on: NaiveDate,
        mut on_commit: F,
    ) -> Result<Vec<BatchOutcome>>
    where
        F: FnMut(&BatchOutcome) -> Result<()>,
    {
        let chunk_size = if chunk_size == 0 {
            records.len().max(1)
        } else {
            chunk_size
        };

        let mut outcomes = Vec::new();
        let mut pending = records.into_iter().peekable();

        while pending.peek().is_some() {
            let chunk: Vec<EventRecord> = pending.by_ref().take(chunk_size).collect();
            let outcome = self.plan(ledger, chunk, processed_on);

            on_commit(&outcome)?;
            ledger.apply_diff(&outcome.diff)?;

            info!(batch = %outcome.batch_id, chunk = outcomes.len() + 1, "{}", outcome.summary.summary());
            outcomes.push(outcome);
        }

        Ok(outcomes)
    }
}

/// New rows for unseen keys, newer copies of unresolved rows, then one status
/// update per resolved record
fn build_diff(
    ledger: &Ledger,
    records: &[EventRecord],
    first_seen: &[bool],
    outcomes: &[RecordOutcome],
    processed_on: NaiveDate,
) -> LedgerDiff {
    let mut diff = LedgerDiff::default();

    for ((record, &first), outcome) in records.iter().zip(first_seen).zip(outcomes) {
        if !first {
            continue;
        }
        match ledger.get(&outcome.key) {
            None => diff.appended.push(record.clone()),
            Some(existing) if !existing.status.is_resolved() && existing.record != *record => {
                diff.refreshed.push(record.clone())
            }
            Some(_) => {}
        }

        let status = match &outcome.result {
            RecordResult::Verdict(verdict) => Some(LedgerStatus::from_verdict(verdict, processed_on)),
            RecordResult::Skipped {
                reason: SkipReason::Excluded,
            } => Some(LedgerStatus::not_duplicate()),
            RecordResult::Skipped {
                reason: SkipReason::AlreadyReconciled,
            }
            | RecordResult::Failed { .. } => None,
        };

        if let Some(status) = status {
            diff.status_updates.push(StatusUpdate {
                key: outcome.key.clone(),
                status,
            });
        }
    }

    diff
}

// ============================================================================
// TESTS
// ============================================================================
