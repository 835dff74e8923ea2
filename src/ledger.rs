use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::model::{RunOutcome, RunRecord};
use crate::util::{ensure_directory, now_utc_string};

pub const LEDGER_SCHEMA_VERSION: &str = "0.1.0";
pub const LEDGER_FILE_NAME: &str = "fornax_bench.sqlite";

pub fn resolve_ledger_path(output_root: &Path, db_path: Option<&Path>) -> PathBuf {
    db_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| output_root.join(LEDGER_FILE_NAME))
}

pub fn open_ledger(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        ensure_directory(parent)?;
    }

    let connection =
        Connection::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    configure_connection(&connection)?;
    ensure_schema(&connection)?;
    Ok(connection)
}

fn configure_connection(connection: &Connection) -> Result<()> {
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to set journal_mode=WAL")?;
    connection
        .pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous=NORMAL")?;
    Ok(())
}

fn ensure_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(
            "
        CREATE TABLE IF NOT EXISTS metadata (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS run_records (
          run_id TEXT PRIMARY KEY,
          benchmark TEXT NOT NULL,
          process_count INTEGER NOT NULL,
          live_points INTEGER NOT NULL,
          duration_secs REAL NOT NULL,
          likelihood_evaluations INTEGER,
          log_evidence REAL,
          log_evidence_error REAL,
          outcome TEXT NOT NULL,
          output_dir TEXT NOT NULL,
          started_at TEXT NOT NULL,
          finished_at TEXT NOT NULL,
          failure_reason TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_run_records_benchmark
          ON run_records(benchmark, live_points, process_count);
        ",
        )
        .context("failed to create ledger schema")?;

    let existing: Option<String> = connection
        .query_row(
            "SELECT value FROM metadata WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()
        .context("failed to read ledger schema version")?;

    match existing {
        Some(version) if version != LEDGER_SCHEMA_VERSION => {
            bail!(
                "ledger schema version {version} is not supported (expected {LEDGER_SCHEMA_VERSION})"
            );
        }
        Some(_) => {}
        None => {
            connection
                .execute(
                    "INSERT INTO metadata(key, value) VALUES('schema_version', ?1), ('created_at', ?2)",
                    params![LEDGER_SCHEMA_VERSION, now_utc_string()],
                )
                .context("failed to write ledger metadata")?;
        }
    }

    Ok(())
}

pub fn insert_run_record(connection: &Connection, record: &RunRecord) -> Result<()> {
    connection
        .execute(
            "
            INSERT INTO run_records(
              run_id, benchmark, process_count, live_points, duration_secs,
              likelihood_evaluations, log_evidence, log_evidence_error, outcome,
              output_dir, started_at, finished_at, failure_reason
            )
            VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            ",
            params![
                record.run_id,
                record.benchmark,
                record.process_count,
                record.live_points,
                record.duration_secs,
                record.likelihood_evaluations.map(|count| count as i64),
                record.log_evidence,
                record.log_evidence_error,
                record.outcome.as_str(),
                record.output_dir,
                record.started_at,
                record.finished_at,
                record.failure_reason,
            ],
        )
        .with_context(|| format!("failed to record run {}", record.run_id))?;
    Ok(())
}

pub fn load_run_records(connection: &Connection, benchmark: &str) -> Result<Vec<RunRecord>> {
    let mut statement = connection.prepare(
        "
        SELECT run_id, benchmark, process_count, live_points, duration_secs,
               likelihood_evaluations, log_evidence, log_evidence_error, outcome,
               output_dir, started_at, finished_at, failure_reason
        FROM run_records
        WHERE benchmark = ?1
        ORDER BY live_points, process_count, run_id
        ",
    )?;

    let rows = statement.query_map(params![benchmark], row_to_record)?;
    let mut records = Vec::new();
    for row in rows {
        records.push(row.context("failed to decode run record")?);
    }
    Ok(records)
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    let outcome_raw: String = row.get(8)?;
    let outcome = RunOutcome::parse(&outcome_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            8,
            rusqlite::types::Type::Text,
            format!("unknown run outcome '{outcome_raw}'").into(),
        )
    })?;
    let evaluations: Option<i64> = row.get(5)?;

    Ok(RunRecord {
        run_id: row.get(0)?,
        benchmark: row.get(1)?,
        process_count: row.get(2)?,
        live_points: row.get(3)?,
        duration_secs: row.get(4)?,
        likelihood_evaluations: evaluations.map(|count| count.max(0) as u64),
        log_evidence: row.get(6)?,
        log_evidence_error: row.get(7)?,
        outcome,
        output_dir: row.get(9)?,
        started_at: row.get(10)?,
        finished_at: row.get(11)?,
        failure_reason: row.get(12)?,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchmarkSummary {
    pub benchmark: String,
    pub runs: i64,
    pub completed: i64,
    pub ipc_failures: i64,
}

pub fn summarize_benchmarks(connection: &Connection) -> Result<Vec<BenchmarkSummary>> {
    let mut statement = connection.prepare(
        "
        SELECT benchmark,
               COUNT(*),
               SUM(CASE WHEN outcome = 'completed' THEN 1 ELSE 0 END),
               SUM(CASE WHEN outcome = 'ipc_exhausted' THEN 1 ELSE 0 END)
        FROM run_records
        GROUP BY benchmark
        ORDER BY benchmark
        ",
    )?;

    let rows = statement.query_map([], |row| {
        Ok(BenchmarkSummary {
            benchmark: row.get(0)?,
            runs: row.get(1)?,
            completed: row.get(2)?,
            ipc_failures: row.get(3)?,
        })
    })?;

    let mut summaries = Vec::new();
    for row in rows {
        summaries.push(row.context("failed to decode benchmark summary")?);
    }
    Ok(summaries)
}
