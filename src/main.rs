// Transcript Reconcile CLI - reconcile harvested transcript records into a SQLite ledger

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use transcript_reconcile::{
    config_fingerprint, last_fingerprint, ledger_stats, load_ledger, load_records, persist_batch,
    setup_database, write_report, BatchReconciler, MatchConfig, Matcher, NameOverrides, Normalizer,
    RuleSet, VERSION,
};

#[derive(Parser)]
#[command(name = "transcript-reconcile")]
#[command(about = "Deduplicate vendor transcript records against an accumulated ledger")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Match incoming records against the ledger and commit the verdicts
    Reconcile {
        /// SQLite ledger database (created if missing)
        #[arg(long)]
        db: PathBuf,

        /// Incoming records CSV
        #[arg(long)]
        input: PathBuf,

        /// MatchConfig JSON (defaults when omitted)
        #[arg(long)]
        config: Option<PathBuf>,

        /// RuleSet JSON (built-in tables when omitted)
        #[arg(long)]
        rules: Option<PathBuf>,

        /// Name overrides CSV (name, corrected)
        #[arg(long)]
        overrides: Option<PathBuf>,

        /// Write one verdict row per record to this CSV
        #[arg(long)]
        report: Option<PathBuf>,

        /// Records per committed batch (0 = everything in one batch)
        #[arg(long, default_value_t = 500)]
        chunk_size: usize,

        /// Processing date stamped on new records (defaults to today)
        #[arg(long)]
        processed_on: Option<NaiveDate>,
    },

    /// Per-vendor ledger totals
    Stats {
        /// SQLite ledger database
        #[arg(long)]
        db: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Reconcile {
            db,
            input,
            config,
            rules,
            overrides,
            report,
            chunk_size,
            processed_on,
        } => run_reconcile(ReconcileArgs {
            db,
            input,
            config,
            rules,
            overrides,
            report,
            chunk_size,
            processed_on: processed_on.unwrap_or_else(|| Local::now().date_naive()),
        }),
        Commands::Stats { db } => run_stats(&db),
    }
}

struct ReconcileArgs {
    db: PathBuf,
    input: PathBuf,
    config: Option<PathBuf>,
    rules: Option<PathBuf>,
    overrides: Option<PathBuf>,
    report: Option<PathBuf>,
    chunk_size: usize,
    processed_on: NaiveDate,
}

fn run_reconcile(args: ReconcileArgs) -> Result<()> {
    println!("🔄 Transcript Reconcile v{}", VERSION);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // 1. Configuration
    let config = match &args.config {
        Some(path) => MatchConfig::from_file(path)?,
        None => MatchConfig::default(),
    };
    let rules = match &args.rules {
        Some(path) => RuleSet::from_file(path)?,
        None => RuleSet::default(),
    };
    let overrides = match &args.overrides {
        Some(path) => NameOverrides::from_csv(path)?,
        None => NameOverrides::default(),
    };
    let fingerprint = config_fingerprint(&config, &rules, &overrides)?;
    println!(
        "✓ Config: threshold {}, {} rules, {} overrides",
        config.fuzzy_threshold,
        rules.rule_count(),
        overrides.len()
    );

    // 2. Ledger
    let mut conn = Connection::open(&args.db)
        .with_context(|| format!("Failed to open ledger database: {:?}", args.db))?;
    setup_database(&conn)?;

    if let Some(previous) = last_fingerprint(&conn)? {
        if previous != fingerprint {
            warn!(previous = %previous, current = %fingerprint, "matching configuration changed since the last batch");
        }
    }

    let mut ledger = load_ledger(&conn)?;
    println!("✓ Ledger: {} records", ledger.len());

    // 3. Incoming records
    let records = load_records(&args.input)?;
    println!("✓ Loaded {} incoming records", records.len());

    // 4. Reconcile, committing each chunk before the next is matched
    let normalizer = Normalizer::new(&rules, overrides)?;
    let reconciler = BatchReconciler::new(normalizer, Matcher::new(config));

    let batches = reconciler.run_chunked(
        &mut ledger,
        records,
        args.chunk_size,
        args.processed_on,
        |outcome| persist_batch(&mut conn, outcome, &fingerprint),
    )?;
    info!(batches = batches.len(), ledger = ledger.len(), "run complete");

    // 5. Report
    if let Some(path) = &args.report {
        let rows = write_report(path, batches.iter().flat_map(|b| b.outcomes.iter()))?;
        println!("✓ Report: {} rows → {:?}", rows, path);
    }

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for batch in &batches {
        println!("  {} {}", batch.batch_id, batch.summary.summary());
    }
    println!("✅ Ledger now holds {} records", ledger.len());

    Ok(())
}

fn run_stats(db: &Path) -> Result<()> {
    if !db.exists() {
        anyhow::bail!("Ledger database not found: {:?}", db);
    }

    let conn = Connection::open(db).with_context(|| format!("Failed to open ledger database: {:?}", db))?;
    let stats = ledger_stats(&conn)?;

    println!("📊 Ledger by source");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for stat in &stats {
        println!(
            "{:<12} total {:>7} | duplicates {:>7} | new {:>7} | unresolved {:>5} | {}",
            stat.source, stat.total, stat.duplicates, stat.new_records, stat.unresolved, stat.date_range
        );
    }
    if stats.is_empty() {
        println!("(empty)");
    }

    Ok(())
}
