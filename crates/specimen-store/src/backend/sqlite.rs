use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use specimen_types::{SnapshotId, TraceId};

use super::{Backend, EntryMeta, PutOutcome};
use crate::{StoreError, SweepReport};

const BUSY_TIMEOUT: Duration = Duration::from_millis(250);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS snapshots (
    trace_id TEXT NOT NULL,
    snapshot_id TEXT NOT NULL,
    written_at_ms INTEGER NOT NULL,
    bytes BLOB NOT NULL,
    PRIMARY KEY (trace_id, snapshot_id)
);
CREATE INDEX IF NOT EXISTS snapshots_written_at ON snapshots (written_at_ms);
";

/// Snapshots in a single SQLite table. Quota check and insert share one
/// `IMMEDIATE` transaction, which makes the cap hold across processes too.
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    path: PathBuf,
}

impl SqliteBackend {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let backend = Self { path: path.into() };
        let conn = backend.connect()?;
        conn.execute_batch(SCHEMA)
            .map_err(StoreError::sqlite("init snapshot schema"))?;
        Ok(backend)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open(&self.path).map_err(StoreError::sqlite("open sqlite"))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(StoreError::sqlite("set busy timeout"))?;
        Ok(conn)
    }
}

impl Backend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn insert_capped(
        &self,
        trace: &TraceId,
        snapshot: &SnapshotId,
        bytes: &[u8],
        written_at_ms: i64,
        cap: u64,
    ) -> Result<PutOutcome, StoreError> {
        let mut conn = self.connect()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StoreError::sqlite("start transaction"))?;
        let used: i64 = tx
            .query_row(
                "SELECT COALESCE(SUM(length(bytes)), 0) FROM snapshots WHERE trace_id = ?1",
                params![trace.as_str()],
                |row| row.get(0),
            )
            .map_err(StoreError::sqlite("sum trace usage"))?;
        let used = used.max(0) as u64;
        if used.saturating_add(bytes.len() as u64) > cap {
            return Ok(PutOutcome::OverCap { used });
        }
        tx.execute(
            "INSERT OR REPLACE INTO snapshots (trace_id, snapshot_id, written_at_ms, bytes)
             VALUES (?1, ?2, ?3, ?4)",
            params![trace.as_str(), snapshot.as_str(), written_at_ms, bytes],
        )
        .map_err(StoreError::sqlite("insert snapshot"))?;
        tx.commit().map_err(StoreError::sqlite("commit snapshot"))?;
        Ok(PutOutcome::Stored)
    }

    fn read(&self, trace: &TraceId, snapshot: &SnapshotId) -> Result<Option<Vec<u8>>, StoreError> {
        let conn = self.connect()?;
        conn.query_row(
            "SELECT bytes FROM snapshots WHERE trace_id = ?1 AND snapshot_id = ?2",
            params![trace.as_str(), snapshot.as_str()],
            |row| row.get::<_, Vec<u8>>(0),
        )
        .optional()
        .map_err(StoreError::sqlite("read snapshot"))
    }

    fn entries(&self, trace: &TraceId) -> Result<Vec<EntryMeta>, StoreError> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare(
                "SELECT snapshot_id, length(bytes), written_at_ms FROM snapshots
                 WHERE trace_id = ?1 ORDER BY snapshot_id",
            )
            .map_err(StoreError::sqlite("prepare entry listing"))?;
        let rows = stmt
            .query_map(params![trace.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })
            .map_err(StoreError::sqlite("list entries"))?;

        let mut entries = Vec::new();
        for row in rows {
            let (snapshot_id, len, written_at_ms) = row.map_err(StoreError::sqlite("list entries"))?;
            entries.push(EntryMeta {
                snapshot_id: SnapshotId::parse(snapshot_id)?,
                len: len.max(0) as u64,
                written_at_ms,
            });
        }
        Ok(entries)
    }

    fn traces(&self) -> Result<Vec<TraceId>, StoreError> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare("SELECT DISTINCT trace_id FROM snapshots ORDER BY trace_id")
            .map_err(StoreError::sqlite("prepare trace listing"))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(StoreError::sqlite("list traces"))?;
        let mut traces = Vec::new();
        for row in rows {
            traces.push(TraceId::parse(row.map_err(StoreError::sqlite("list traces"))?)?);
        }
        Ok(traces)
    }

    fn remove(&self, trace: &TraceId, snapshots: &[SnapshotId]) -> Result<(), StoreError> {
        let mut conn = self.connect()?;
        let tx = conn
            .transaction()
            .map_err(StoreError::sqlite("start transaction"))?;
        {
            let mut stmt = tx
                .prepare("DELETE FROM snapshots WHERE trace_id = ?1 AND snapshot_id = ?2")
                .map_err(StoreError::sqlite("prepare delete snapshot"))?;
            for snapshot in snapshots {
                stmt.execute(params![trace.as_str(), snapshot.as_str()])
                    .map_err(StoreError::sqlite("delete snapshot"))?;
            }
        }
        tx.commit().map_err(StoreError::sqlite("commit delete"))?;
        Ok(())
    }

    fn remove_trace(&self, trace: &TraceId) -> Result<(), StoreError> {
        let conn = self.connect()?;
        conn.execute(
            "DELETE FROM snapshots WHERE trace_id = ?1",
            params![trace.as_str()],
        )
        .map_err(StoreError::sqlite("delete trace"))?;
        Ok(())
    }

    fn remove_expired(&self, trace: &TraceId, cutoff_ms: i64) -> Result<SweepReport, StoreError> {
        let mut conn = self.connect()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StoreError::sqlite("start transaction"))?;
        let (entries_removed, bytes_freed): (i64, i64) = tx
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(length(bytes)), 0) FROM snapshots
                 WHERE trace_id = ?1 AND written_at_ms <= ?2",
                params![trace.as_str(), cutoff_ms],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(StoreError::sqlite("measure expired snapshots"))?;
        tx.execute(
            "DELETE FROM snapshots WHERE trace_id = ?1 AND written_at_ms <= ?2",
            params![trace.as_str(), cutoff_ms],
        )
        .map_err(StoreError::sqlite("delete expired snapshots"))?;
        tx.commit().map_err(StoreError::sqlite("commit sweep"))?;
        Ok(SweepReport {
            traces_scanned: 1,
            entries_removed: entries_removed.max(0) as u64,
            bytes_freed: bytes_freed.max(0) as u64,
        })
    }

    fn remove_written_before(&self, cutoff_ms: i64) -> Result<SweepReport, StoreError> {
        let mut conn = self.connect()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StoreError::sqlite("start transaction"))?;
        let traces_scanned: i64 = tx
            .query_row("SELECT COUNT(DISTINCT trace_id) FROM snapshots", [], |row| {
                row.get(0)
            })
            .map_err(StoreError::sqlite("count traces"))?;
        let (entries_removed, bytes_freed): (i64, i64) = tx
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(length(bytes)), 0) FROM snapshots
                 WHERE written_at_ms <= ?1",
                params![cutoff_ms],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(StoreError::sqlite("measure expired snapshots"))?;
        tx.execute(
            "DELETE FROM snapshots WHERE written_at_ms <= ?1",
            params![cutoff_ms],
        )
        .map_err(StoreError::sqlite("delete expired snapshots"))?;
        tx.commit().map_err(StoreError::sqlite("commit sweep"))?;
        Ok(SweepReport {
            traces_scanned: traces_scanned.max(0) as u64,
            entries_removed: entries_removed.max(0) as u64,
            bytes_freed: bytes_freed.max(0) as u64,
        })
    }
}
