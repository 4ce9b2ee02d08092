// 🗄️ Ledger Store - SQLite persistence for the ledger, batch checkpoints and audit events
//
// Each committed batch is written in one SQLite transaction: appended rows,
// status updates, audit events and the checkpoint row land together or not at all.

use crate::batch::{BatchOutcome, RecordResult};
use crate::ledger::{Ledger, LedgerEntry, LedgerStatus};
use crate::matcher::MatchTier;
use crate::record::{EventRecord, LedgerKey};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Event for the audit trail: every status change is recorded
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(event_type: &str, entity_type: &str, entity_id: &str, data: serde_json::Value, actor: &str) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Ledger Table (one row per vendor record)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS ledger (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source TEXT NOT NULL,
            external_id TEXT NOT NULL,
            identifiers TEXT NOT NULL,
            raw_firm_name TEXT NOT NULL,
            raw_title TEXT NOT NULL,
            event_date TEXT,
            normalized_firm_key TEXT NOT NULL,
            normalized_title_key TEXT NOT NULL,
            is_duplicate INTEGER,
            date_processed TEXT,
            matched_source TEXT,
            matched_external_id TEXT,
            match_tier TEXT,
            batch_id TEXT,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(source, external_id)
        )",
        [],
    )?;

    // ==========================================================================
    // Batches Table (checkpoints for resumable runs)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS batches (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            batch_id TEXT UNIQUE NOT NULL,
            committed_at TEXT NOT NULL,
            processed_on TEXT NOT NULL,
            record_count INTEGER NOT NULL,
            appended INTEGER NOT NULL,
            matched INTEGER NOT NULL,
            new_records INTEGER NOT NULL,
            skipped INTEGER NOT NULL,
            failed INTEGER NOT NULL,
            config_fingerprint TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_ledger_event_date ON ledger(event_date)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    Ok(())
}

fn format_date(date: Option<NaiveDate>) -> Option<String> {
    date.map(|d| d.format(DATE_FORMAT).to_string())
}

fn parse_date_column(idx: usize, value: Option<String>) -> rusqlite::Result<Option<NaiveDate>> {
    value
        .map(|s| {
            NaiveDate::parse_from_str(&s, DATE_FORMAT)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
        })
        .transpose()
}

/// Load the whole ledger in insertion order
pub fn load_ledger(conn: &Connection) -> Result<Ledger> {
    let mut stmt = conn.prepare(
        "SELECT source, external_id, identifiers, raw_firm_name, raw_title, event_date,
                normalized_firm_key, normalized_title_key,
                is_duplicate, date_processed, matched_source, matched_external_id, match_tier
         FROM ledger
         ORDER BY id",
    )?;

    let entries = stmt
        .query_map([], |row| {
            let identifiers_json: String = row.get(2)?;
            let identifiers: BTreeSet<String> = serde_json::from_str(&identifiers_json)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;

            let matched_source: Option<String> = row.get(10)?;
            let matched_external_id: Option<String> = row.get(11)?;
            let match_tier: Option<String> = row.get(12)?;

            Ok(LedgerEntry {
                record: EventRecord {
                    source: row.get(0)?,
                    external_id: row.get(1)?,
                    identifiers,
                    raw_firm_name: row.get(3)?,
                    raw_title: row.get(4)?,
                    event_date: parse_date_column(5, row.get(5)?)?,
                    normalized_firm_key: row.get(6)?,
                    normalized_title_key: row.get(7)?,
                },
                status: LedgerStatus {
                    is_duplicate: row.get(8)?,
                    date_processed: parse_date_column(9, row.get(9)?)?,
                    matched_ref: matched_source
                        .zip(matched_external_id)
                        .map(|(source, id)| LedgerKey::new(source, id)),
                    match_tier: match_tier.as_deref().and_then(MatchTier::from_name),
                },
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let ledger = Ledger::from_entries(entries).context("Ledger table holds conflicting keys")?;
    debug!(records = ledger.len(), "ledger loaded");
    Ok(ledger)
}

/// Write one batch (diff, audit events, checkpoint) in a single transaction
pub fn persist_batch(conn: &mut Connection, outcome: &BatchOutcome, config_fingerprint: &str) -> Result<()> {
    let tx = conn.transaction().context("Failed to open SQLite transaction")?;
    let batch_id = outcome.batch_id.to_string();

    for record in &outcome.diff.appended {
        let identifiers_json = serde_json::to_string(&record.identifiers)?;
        tx.execute(
            "INSERT INTO ledger (
                source, external_id, identifiers, raw_firm_name, raw_title, event_date,
                normalized_firm_key, normalized_title_key, batch_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.source,
                record.external_id,
                identifiers_json,
                record.raw_firm_name,
                record.raw_title,
                format_date(record.event_date),
                record.normalized_firm_key,
                record.normalized_title_key,
                batch_id,
            ],
        )
        .with_context(|| format!("Failed to append {}", record.key()))?;
    }

    for record in &outcome.diff.refreshed {
        let identifiers_json = serde_json::to_string(&record.identifiers)?;
        let changed = tx.execute(
            "UPDATE ledger
             SET identifiers = ?1, raw_firm_name = ?2, raw_title = ?3, event_date = ?4,
                 normalized_firm_key = ?5, normalized_title_key = ?6, batch_id = ?7
             WHERE source = ?8 AND external_id = ?9",
            params![
                identifiers_json,
                record.raw_firm_name,
                record.raw_title,
                format_date(record.event_date),
                record.normalized_firm_key,
                record.normalized_title_key,
                batch_id,
                record.source,
                record.external_id,
            ],
        )?;
        if changed == 0 {
            anyhow::bail!("Refresh of unknown ledger record {}", record.key());
        }
    }

    for update in &outcome.diff.status_updates {
        let status = &update.status;
        let changed = tx.execute(
            "UPDATE ledger
             SET is_duplicate = ?1, date_processed = ?2,
                 matched_source = ?3, matched_external_id = ?4, match_tier = ?5
             WHERE source = ?6 AND external_id = ?7",
            params![
                status.is_duplicate,
                format_date(status.date_processed),
                status.matched_ref.as_ref().map(|k| k.source.as_str()),
                status.matched_ref.as_ref().map(|k| k.external_id.as_str()),
                status.match_tier.map(|t| t.as_str()),
                update.key.source,
                update.key.external_id,
            ],
        )?;
        if changed == 0 {
            anyhow::bail!("Status update for unknown ledger record {}", update.key);
        }

        let event = Event::new(
            "status_resolved",
            "ledger_record",
            &update.key.to_string(),
            serde_json::json!({
                "batch_id": batch_id,
                "is_duplicate": status.is_duplicate,
                "match_tier": status.match_tier,
                "matched_ref": status.matched_ref.as_ref().map(|k| k.to_string()),
            }),
            "batch_reconciler",
        );
        insert_event(&tx, &event)?;
    }

    for record_outcome in &outcome.outcomes {
        if let RecordResult::Failed { error } = &record_outcome.result {
            let event = Event::new(
                "needs_review",
                "ledger_record",
                &record_outcome.key.to_string(),
                serde_json::json!({ "batch_id": batch_id, "error": error, "code": error.code() }),
                "batch_reconciler",
            );
            insert_event(&tx, &event)?;
        }
    }

    let summary = &outcome.summary;
    tx.execute(
        "INSERT INTO batches (
            batch_id, committed_at, processed_on, record_count, appended,
            matched, new_records, skipped, failed, config_fingerprint
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            batch_id,
            Utc::now().to_rfc3339(),
            outcome.processed_on.format(DATE_FORMAT).to_string(),
            summary.total as i64,
            outcome.diff.appended.len() as i64,
            summary.matched() as i64,
            summary.new_records as i64,
            summary.skipped as i64,
            summary.failed as i64,
            config_fingerprint,
        ],
    )?;

    tx.commit().context("Failed to commit batch")?;
    debug!(batch = %batch_id, "batch checkpoint written");
    Ok(())
}

/// Fingerprint of the configuration the most recent batch ran under
pub fn last_fingerprint(conn: &Connection) -> Result<Option<String>> {
    let fingerprint = conn
        .query_row(
            "SELECT config_fingerprint FROM batches ORDER BY id DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(fingerprint)
}

pub fn batch_count(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM batches", [], |row| row.get(0))?;
    Ok(count)
}

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Get events for a specific entity, newest first
pub fn get_events_for_entity(conn: &Connection, entity_type: &str, entity_id: &str) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY id DESC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
                    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?
                    .with_timezone(&Utc),
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json)
                    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?,
                actor: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

// ============================================================================
// STATS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceStat {
    pub source: String,
    pub total: i64,
    pub duplicates: i64,
    pub new_records: i64,
    pub unresolved: i64,
    pub date_range: String,
}

/// Ledger totals grouped by vendor
pub fn ledger_stats(conn: &Connection) -> Result<Vec<SourceStat>> {
    let mut stmt = conn.prepare(
        "SELECT
            source,
            COUNT(*) as total,
            SUM(CASE WHEN is_duplicate = 1 THEN 1 ELSE 0 END) as duplicates,
            SUM(CASE WHEN is_duplicate = 0 THEN 1 ELSE 0 END) as new_records,
            SUM(CASE WHEN is_duplicate IS NULL THEN 1 ELSE 0 END) as unresolved,
            COALESCE(MIN(event_date), '?') || ' - ' || COALESCE(MAX(event_date), '?') as date_range
         FROM ledger
         GROUP BY source
         ORDER BY source",
    )?;

    let stats = stmt
        .query_map([], |row| {
            Ok(SourceStat {
                source: row.get(0)?,
                total: row.get(1)?,
                duplicates: row.get(2)?,
                new_records: row.get(3)?,
                unresolved: row.get(4)?,
                date_range: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(stats)
}
