//! SQLite-backed scan history in WAL mode.
//!
//! One table keyed by path. Timestamps are stored as RFC 3339 text with
//! millisecond precision so they sort lexically; file mtimes as integer
//! nanoseconds since the epoch.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OpenFlags, OptionalExtension, Row, params};

use crate::core::errors::{Result, VicError};
use crate::core::paths::ensure_parent_dir;
use crate::history::{
    HistoryStats, HistoryStore, ScanHistoryRecord, nanos_to_system_time, system_time_to_nanos,
};
use crate::scanner::model::OutcomeKind;

/// Durable history store.
pub struct SqliteHistoryStore {
    conn: Connection,
    path: PathBuf,
}

impl SqliteHistoryStore {
    /// Open (or create) the database at `path`, apply PRAGMAs and schema, and
    /// run a quick integrity check.
    pub fn open(path: &Path) -> Result<Self> {
        ensure_parent_dir(path)?;

        let unusable = |error: rusqlite::Error| VicError::HistoryCorrupt {
            path: path.to_path_buf(),
            details: error.to_string(),
        };

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(unusable)?;

        apply_pragmas(&conn).map_err(unusable)?;
        apply_schema(&conn).map_err(unusable)?;

        let check: String = conn
            .query_row("PRAGMA quick_check", [], |row| row.get(0))
            .map_err(unusable)?;
        if !check.eq_ignore_ascii_case("ok") {
            return Err(VicError::HistoryCorrupt {
                path: path.to_path_buf(),
                details: format!("quick_check: {check}"),
            });
        }

        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// In-memory database with the same schema, for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self {
            conn,
            path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_wal_mode(&self) -> bool {
        self.conn
            .query_row("PRAGMA journal_mode", [], |row| row.get::<_, String>(0))
            .map(|mode| mode.eq_ignore_ascii_case("wal"))
            .unwrap_or(false)
    }

    /// Most recently scanned records first.
    pub fn recent(&self, limit: u32) -> Result<Vec<ScanHistoryRecord>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT path, last_scan_time, last_outcome, file_mtime_ns
             FROM scan_history ORDER BY last_scan_time DESC, path LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], raw_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(RawRow::into_record).collect()
    }
}

impl HistoryStore for SqliteHistoryStore {
    fn get(&self, path: &Path) -> Result<Option<ScanHistoryRecord>> {
        let raw = self
            .conn
            .prepare_cached(
                "SELECT path, last_scan_time, last_outcome, file_mtime_ns
                 FROM scan_history WHERE path = ?1",
            )?
            .query_row(params![path_key(path)], raw_row)
            .optional()?;
        raw.map(RawRow::into_record).transpose()
    }

    fn upsert_batch(&mut self, records: &[ScanHistoryRecord]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO scan_history (path, last_scan_time, last_outcome, file_mtime_ns)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(path) DO UPDATE SET
                    last_scan_time = excluded.last_scan_time,
                    last_outcome = excluded.last_outcome,
                    file_mtime_ns = excluded.file_mtime_ns",
            )?;
            for record in records {
                stmt.execute(params![
                    path_key(&record.path),
                    format_time(record.last_scan_time),
                    record.last_outcome.as_str(),
                    system_time_to_nanos(record.file_modified_at_scan),
                ])?;
            }
        }
        tx.commit()?;
        Ok(records.len())
    }

    fn stats(&self) -> Result<HistoryStats> {
        let mut stats = HistoryStats::default();

        let mut stmt = self
            .conn
            .prepare_cached("SELECT last_outcome, COUNT(*) FROM scan_history GROUP BY last_outcome")?;
        let groups = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for (outcome, count) in groups {
            let count = usize::try_from(count).unwrap_or(0);
            stats.total_records += count;
            stats.by_outcome.add(parse_outcome(&self.path, &outcome)?, count);
        }

        let (oldest, newest): (Option<String>, Option<String>) = self.conn.query_row(
            "SELECT MIN(last_scan_time), MAX(last_scan_time) FROM scan_history",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        stats.oldest_scan = oldest.map(|raw| parse_time(&self.path, &raw)).transpose()?;
        stats.newest_scan = newest.map(|raw| parse_time(&self.path, &raw)).transpose()?;
        Ok(stats)
    }
}

/// Row as stored, before domain validation.
struct RawRow {
    path: String,
    last_scan_time: String,
    last_outcome: String,
    file_mtime_ns: i64,
}

fn raw_row(row: &Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        path: row.get(0)?,
        last_scan_time: row.get(1)?,
        last_outcome: row.get(2)?,
        file_mtime_ns: row.get(3)?,
    })
}

impl RawRow {
    fn into_record(self) -> Result<ScanHistoryRecord> {
        let path = PathBuf::from(self.path);
        Ok(ScanHistoryRecord {
            last_scan_time: parse_time(&path, &self.last_scan_time)?,
            last_outcome: parse_outcome(&path, &self.last_outcome)?,
            file_modified_at_scan: nanos_to_system_time(self.file_mtime_ns),
            path,
        })
    }
}

/// Paths are keyed by their UTF-8 rendering; non-UTF-8 bytes are replaced.
fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_time(path: &Path, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|error| VicError::HistoryCorrupt {
            path: path.to_path_buf(),
            details: format!("bad last_scan_time {raw:?}: {error}"),
        })
}

fn parse_outcome(path: &Path, raw: &str) -> Result<OutcomeKind> {
    OutcomeKind::parse(raw).ok_or_else(|| VicError::HistoryCorrupt {
        path: path.to_path_buf(),
        details: format!("unknown last_outcome {raw:?}"),
    })
}

fn apply_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA temp_store = MEMORY;
         PRAGMA busy_timeout = 5000;",
    )?;
    let mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        tracing::warn!(%mode, "requested WAL journal mode for scan history");
    }
    Ok(())
}

fn apply_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS scan_history (
            path TEXT PRIMARY KEY NOT NULL,
            last_scan_time TEXT NOT NULL,
            last_outcome TEXT NOT NULL,
            file_mtime_ns INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_scan_history_time ON scan_history(last_scan_time);",
    )
}
