//! SQLite-backed store.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::audit::{AuditEntry, AuditKind, AuditSink};
use crate::dedup::DedupStore;
use crate::domain::DedupRecord;
use crate::error::{DuckyError, Result};
use crate::ratelimit::{WindowSnapshot, WindowStore};

/// How long a writer waits on a lock held by another connection.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SqliteStore {
    path: Option<PathBuf>,
    db: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").field("path", &self.path).finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open or create the database at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let db = Connection::open(path)?;
        db.busy_timeout(BUSY_TIMEOUT)?;
        Self::init_schema(&db)?;

        log::debug!("Opened store at {}", path.display());
        Ok(Self {
            path: Some(path.to_path_buf()),
            db: Mutex::new(db),
        })
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let db = Connection::open_in_memory()?;
        Self::init_schema(&db)?;
        Ok(Self {
            path: None,
            db: Mutex::new(db),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn init_schema(db: &Connection) -> Result<()> {
        db.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS dedup_records (
                external_id TEXT PRIMARY KEY,
                processed INTEGER NOT NULL DEFAULT 0,
                outcome_ref TEXT,
                processed_at INTEGER,
                retry_count INTEGER NOT NULL DEFAULT 0,
                last_retry_at INTEGER,
                claimed_at INTEGER NOT NULL,
                metadata TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_dedup_processed ON dedup_records(processed);

            CREATE TABLE IF NOT EXISTS rate_windows (
                resource_class TEXT PRIMARY KEY,
                json_data TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS audit_log (
                id TEXT PRIMARY KEY,
                at INTEGER NOT NULL,
                job TEXT NOT NULL,
                kind TEXT NOT NULL,
                message TEXT NOT NULL,
                data TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_audit_job ON audit_log(job, at);
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|e| DuckyError::Storage(format!("connection lock poisoned: {}", e)))
    }

    /// Recent audit entries, newest first, optionally for one job.
    pub fn recent_audit(&self, job: Option<&str>, limit: usize) -> Result<Vec<AuditEntry>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            "SELECT id, at, job, kind, message, data FROM audit_log
             WHERE (?1 IS NULL OR job = ?1)
             ORDER BY at DESC, rowid DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![job, limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, at, job, kind, message, data) = row?;
            entries.push(AuditEntry {
                id,
                at: from_ms(at).unwrap_or_default(),
                job,
                kind: parse_audit_kind(&kind)?,
                message,
                data: serde_json::from_str(&data)?,
            });
        }
        Ok(entries)
    }

    /// Number of processed records.
    pub fn count_processed(&self) -> Result<usize> {
        let db = self.conn()?;
        let count: i64 = db.query_row("SELECT COUNT(*) FROM dedup_records WHERE processed = 1", [], |row| {
            row.get(0)
        })?;
        Ok(count as usize)
    }
}

fn to_ms(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_ms(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}

fn parse_audit_kind(s: &str) -> Result<AuditKind> {
    match s {
        "run_summary" => Ok(AuditKind::RunSummary),
        "job_completed" => Ok(AuditKind::JobCompleted),
        "job_failed" => Ok(AuditKind::JobFailed),
        "job_skipped" => Ok(AuditKind::JobSkipped),
        other => Err(DuckyError::Storage(format!("unknown audit kind: {}", other))),
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<(DedupRecord, String)> {
    let claimed_at: i64 = row.get(6)?;
    let record = DedupRecord {
        external_id: row.get(0)?,
        processed: row.get(1)?,
        outcome_ref: row.get(2)?,
        processed_at: row.get::<_, Option<i64>>(3)?.and_then(from_ms),
        retry_count: row.get(4)?,
        last_retry_at: row.get::<_, Option<i64>>(5)?.and_then(from_ms),
        claimed_at: from_ms(claimed_at).unwrap_or_default(),
        metadata: Value::Null,
    };
    Ok((record, row.get(7)?))
}

impl DedupStore for SqliteStore {
    fn is_processed(&self, external_id: &str) -> Result<bool> {
        let db = self.conn()?;
        let processed: Option<bool> = db
            .query_row(
                "SELECT processed FROM dedup_records WHERE external_id = ?1",
                [external_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(processed.unwrap_or(false))
    }

    fn claim(&self, external_id: &str, metadata: &Value) -> Result<()> {
        let metadata = serde_json::to_string(metadata)?;
        let db = self.conn()?;
        let inserted = db.execute(
            "INSERT INTO dedup_records (external_id, processed, retry_count, claimed_at, metadata)
             VALUES (?1, 0, 0, ?2, ?3)
             ON CONFLICT(external_id) DO NOTHING",
            params![external_id, to_ms(Utc::now()), metadata],
        )?;
        if inserted == 0 {
            log::debug!("Claim for {} already present", external_id);
        }
        Ok(())
    }

    fn mark_processed(&self, external_id: &str, outcome_ref: &str) -> Result<()> {
        let now = to_ms(Utc::now());
        let db = self.conn()?;
        db.execute(
            "INSERT INTO dedup_records
             (external_id, processed, outcome_ref, processed_at, retry_count, claimed_at, metadata)
             VALUES (?1, 1, ?2, ?3, 0, ?3, 'null')
             ON CONFLICT(external_id) DO UPDATE SET
                processed = 1,
                outcome_ref = excluded.outcome_ref,
                processed_at = excluded.processed_at",
            params![external_id, outcome_ref, now],
        )?;
        Ok(())
    }

    fn increment_retry(&self, external_id: &str) -> Result<()> {
        let now = to_ms(Utc::now());
        let db = self.conn()?;
        db.execute(
            "INSERT INTO dedup_records
             (external_id, processed, retry_count, last_retry_at, claimed_at, metadata)
             VALUES (?1, 0, 1, ?2, ?2, 'null')
             ON CONFLICT(external_id) DO UPDATE SET
                retry_count = retry_count + 1,
                last_retry_at = excluded.last_retry_at",
            params![external_id, now],
        )?;
        Ok(())
    }

    fn get(&self, external_id: &str) -> Result<Option<DedupRecord>> {
        let db = self.conn()?;
        let row = db
            .query_row(
                "SELECT external_id, processed, outcome_ref, processed_at, retry_count,
                        last_retry_at, claimed_at, metadata
                 FROM dedup_records WHERE external_id = ?1",
                [external_id],
                record_from_row,
            )
            .optional()?;

        match row {
            Some((mut record, metadata)) => {
                record.metadata = serde_json::from_str(&metadata)?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }
}

impl WindowStore for SqliteStore {
    fn load_window(&self, resource_class: &str) -> Result<Option<WindowSnapshot>> {
        let db = self.conn()?;
        let json: Option<String> = db
            .query_row(
                "SELECT json_data FROM rate_windows WHERE resource_class = ?1",
                [resource_class],
                |row| row.get(0),
            )
            .optional()?;

        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn save_window(&self, snapshot: &WindowSnapshot) -> Result<()> {
        let json = serde_json::to_string(snapshot)?;
        let db = self.conn()?;
        db.execute(
            "INSERT OR REPLACE INTO rate_windows (resource_class, json_data, updated_at)
             VALUES (?1, ?2, ?3)",
            params![snapshot.resource_class, json, to_ms(Utc::now())],
        )?;
        Ok(())
    }
}

impl AuditSink for SqliteStore {
    fn record(&self, entry: &AuditEntry) -> Result<()> {
        let data = serde_json::to_string(&entry.data)?;
        let db = self.conn()?;
        db.execute(
            "INSERT OR REPLACE INTO audit_log (id, at, job, kind, message, data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.id,
                to_ms(entry.at),
                entry.job,
                entry.kind.as_str(),
                entry.message,
                data
            ],
        )?;
        Ok(())
    }
}
