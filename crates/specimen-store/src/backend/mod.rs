//! Storage substrates behind [`crate::SnapshotStore`].

use specimen_types::{SnapshotId, TraceId};
use tracing::warn;

use crate::{StoreError, SweepReport};

mod fs;
mod memory;
mod sqlite;

pub use fs::FsBackend;
pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Stored,
    /// The write would push the trace past its cap. `used` is what the
    /// trace already holds.
    OverCap { used: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMeta {
    pub snapshot_id: SnapshotId,
    pub len: u64,
    pub written_at_ms: i64,
}

/// A trace-scoped key/value substrate.
///
/// `insert_capped` must check the quota and write the entry as one step with
/// respect to other writers on the same trace, and a reader must only ever
/// see a missing entry or a complete one.
pub trait Backend: Send + Sync {
    fn name(&self) -> &'static str;

    fn insert_capped(
        &self,
        trace: &TraceId,
        snapshot: &SnapshotId,
        bytes: &[u8],
        written_at_ms: i64,
        cap: u64,
    ) -> Result<PutOutcome, StoreError>;

    fn read(&self, trace: &TraceId, snapshot: &SnapshotId) -> Result<Option<Vec<u8>>, StoreError>;

    fn entries(&self, trace: &TraceId) -> Result<Vec<EntryMeta>, StoreError>;

    fn traces(&self) -> Result<Vec<TraceId>, StoreError>;

    fn remove(&self, trace: &TraceId, snapshots: &[SnapshotId]) -> Result<(), StoreError>;

    fn remove_trace(&self, trace: &TraceId) -> Result<(), StoreError>;

    /// Drops every entry of `trace` written at or before `cutoff_ms` and
    /// removes the trace once it holds nothing. Deciding what is expired and
    /// removing it must happen under the same lock that `insert_capped` takes
    /// for this trace, so an entry written concurrently is never lost.
    fn remove_expired(&self, trace: &TraceId, cutoff_ms: i64) -> Result<SweepReport, StoreError>;

    /// Sweeps every trace with [`Backend::remove_expired`]. Failures on one
    /// trace are logged and the sweep moves on to the next.
    fn remove_written_before(&self, cutoff_ms: i64) -> Result<SweepReport, StoreError> {
        let mut report = SweepReport::default();
        for trace in self.traces()? {
            report.traces_scanned += 1;
            match self.remove_expired(&trace, cutoff_ms) {
                Ok(swept) => {
                    report.entries_removed += swept.entries_removed;
                    report.bytes_freed += swept.bytes_freed;
                }
                Err(error) => {
                    warn!(%error, trace_id = %trace, backend = self.name(), "sweeping trace failed");
                }
            }
        }
        Ok(report)
    }
}
