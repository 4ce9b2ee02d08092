// ⚠️ Error kinds - per-record failures and ledger violations
// Nothing in here is fatal to a batch: record errors travel inside outcomes.

use crate::record::LedgerKey;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a single incoming record could not be given a verdict.
///
/// These are reported to the caller for manual review; the batch continues.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordError {
    /// Event date missing or unparseable, so the record cannot be blocked
    #[error("unmatchable-date: {key} has no usable event date")]
    UnmatchableDate { key: LedgerKey },

    /// Same (source, external_id) appears more than once in one batch
    #[error("duplicate key {key} within the same batch")]
    DuplicateInBatch { key: LedgerKey },
}

impl RecordError {
    pub fn code(&self) -> &'static str {
        match self {
            RecordError::UnmatchableDate { .. } => "unmatchable-date",
            RecordError::DuplicateInBatch { .. } => "duplicate-in-batch",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("ledger already contains {0}")]
    DuplicateKey(LedgerKey),

    #[error("ledger has no record {0}")]
    UnknownKey(LedgerKey),
}

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_error_codes() {
        let key = LedgerKey::new("factset", "123-E");
        let err = RecordError::UnmatchableDate { key: key.clone() };
        assert_eq!(err.code(), "unmatchable-date");
        assert!(err.to_string().contains("factset/123-E"));

        let dup = RecordError::DuplicateInBatch { key };
        assert_eq!(dup.code(), "duplicate-in-batch");
    }

    #[test]
    fn test_record_error_serializes_with_kind_tag() {
        let err = RecordError::UnmatchableDate {
            key: LedgerKey::new("ciq", "9"),
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "unmatchable_date");
        assert_eq!(json["key"]["external_id"], "9");
    }
}
