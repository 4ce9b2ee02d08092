// Transcript Reconcile - Core Library
// Normalization, temporal blocking and tiered matching of vendor transcript records

pub mod record;      // EventRecord + LedgerKey
pub mod error;       // Per-record and ledger errors
pub mod rules;       // Declarative rewrite rules (suffixes, title noise)
pub mod overrides;   // Known name-cleaning failures
pub mod normalizer;  // Raw name/title → comparison key
pub mod blocking;    // Year / month / day-buffer keys
pub mod similarity;  // 0-100 fuzzy scoring
pub mod config;      // MatchConfig + fingerprint
pub mod ledger;      // Append-mostly registry + candidate view
pub mod matcher;     // Identifier → exact → fuzzy cascade
pub mod batch;       // Two-phase plan/commit
pub mod db;          // SQLite store
pub mod ingest;      // CSV in, report out

// Re-export commonly used types
pub use record::{clean_identifier, EventRecord, LedgerKey};
pub use error::{LedgerError, LedgerResult, RecordError};
pub use rules::{CompiledRules, RewriteRule, RuleSet};
pub use overrides::NameOverrides;
pub use normalizer::{NormalizeMode, Normalizer};
pub use blocking::{day_buffer, month_key, narrow, year_key, BlockingKeys, BlockingStep, TemporalKey};
pub use similarity::{best_match, BestMatch, SimilarityScorer, WeightedRatio};
pub use config::{config_fingerprint, MatchConfig};
pub use ledger::{CandidateSet, Ledger, LedgerDiff, LedgerEntry, LedgerStatus, StatusUpdate};
pub use matcher::{MatchTier, MatchVerdict, Matcher};
pub use batch::{BatchOutcome, BatchReconciler, BatchSummary, RecordOutcome, RecordResult, SkipReason};
pub use db::{
    batch_count, get_events_for_entity, insert_event, last_fingerprint, ledger_stats, load_ledger,
    persist_batch, setup_database, Event, SourceStat,
};
pub use ingest::{load_records, parse_event_date, parse_identifiers, write_report};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
