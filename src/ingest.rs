// 📥 Ingest - incoming records from CSV, verdict report back to CSV
//
// Expected columns: source, external_id, identifiers, firm_name, event_title, event_date
// (identifiers and event_date may be blank or absent).

use crate::batch::{RecordOutcome, RecordResult};
use crate::record::EventRecord;
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d", "%d-%b-%Y", "%b %d, %Y", "%Y%m%d"];
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%m/%d/%Y %H:%M"];

#[derive(Debug, Deserialize)]
struct InputRow {
    source: String,
    external_id: String,
    #[serde(default)]
    identifiers: String,
    firm_name: String,
    event_title: String,
    #[serde(default)]
    event_date: String,
}

/// Lenient event-date parsing; None when nothing recognizable is there
pub fn parse_event_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Some(date) = DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
    {
        return Some(date);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive());
    }

    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|dt| dt.date())
}

/// Split an identifier list: "A;B", "A|B" or a bracketed list "['A', 'B']"
pub fn parse_identifiers(raw: &str) -> Vec<String> {
    raw.trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(|c| c == ';' || c == '|' || c == ',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

pub fn load_records<P: AsRef<Path>>(path: P) -> Result<Vec<EventRecord>> {
    let path = path.as_ref();
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open input CSV: {:?}", path))?;

    let mut records = Vec::new();
    let mut undated = 0;

    for (line, result) in rdr.deserialize().enumerate() {
        let row: InputRow = result.with_context(|| format!("Failed to parse input row {}", line + 2))?;

        let event_date = parse_event_date(&row.event_date);
        if event_date.is_none() {
            undated += 1;
            debug!(source = %row.source, id = %row.external_id, raw = %row.event_date, "no usable event date");
        }

        let record = EventRecord::new(row.source, row.external_id, row.firm_name, row.event_title, event_date)
            .with_identifiers(parse_identifiers(&row.identifiers));
        records.push(record);
    }

    if undated > 0 {
        warn!(undated, path = ?path, "records without a usable event date");
    }

    Ok(records)
}

// ============================================================================
// REPORT
// ============================================================================

#[derive(Debug, Serialize)]
struct ReportRow<'a> {
    source: &'a str,
    external_id: &'a str,
    outcome: &'static str,
    tier: &'static str,
    similarity_score: Option<u8>,
    matched_ref: String,
    candidate_count: Option<usize>,
    degraded: bool,
    detail: String,
}

impl<'a> ReportRow<'a> {
    fn from_outcome(outcome: &'a RecordOutcome) -> Self {
        let mut row = ReportRow {
            source: &outcome.key.source,
            external_id: &outcome.key.external_id,
            outcome: "",
            tier: "",
            similarity_score: None,
            matched_ref: String::new(),
            candidate_count: None,
            degraded: false,
            detail: String::new(),
        };

        match &outcome.result {
            RecordResult::Verdict(v) => {
                row.outcome = if v.matched { "duplicate" } else { "new" };
                row.tier = v.tier.as_str();
                row.similarity_score = v.similarity_score;
                row.matched_ref = v.matched_ref.as_ref().map(|k| k.to_string()).unwrap_or_default();
                row.candidate_count = Some(v.candidate_count);
                row.degraded = v.degraded;
                row.detail = v.reason.clone();
            }
            RecordResult::Skipped { reason } => {
                row.outcome = "skipped";
                row.detail = reason.as_str().to_string();
            }
            RecordResult::Failed { error } => {
                row.outcome = "failed";
                row.detail = error.to_string();
            }
        }

        row
    }
}

/// One CSV row per record outcome
pub fn write_report<'a, P, I>(path: P, outcomes: I) -> Result<usize>
where
    P: AsRef<Path>,
    I: IntoIterator<Item = &'a RecordOutcome>,
{
    let path = path.as_ref();
    let mut wtr = csv::Writer::from_path(path).with_context(|| format!("Failed to create report: {:?}", path))?;

    let mut written = 0;
    for outcome in outcomes {
        wtr.serialize(ReportRow::from_outcome(outcome))
            .context("Failed to write report row")?;
        written += 1;
    }
    wtr.flush().context("Failed to flush report")?;

    Ok(written)
}
