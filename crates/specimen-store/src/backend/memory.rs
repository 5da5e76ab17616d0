use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use specimen_types::{SnapshotId, TraceId};

use super::{Backend, EntryMeta, PutOutcome};
use crate::{StoreError, SweepReport};

/// Process-local substrate. Every trace has its own bucket lock, so writers
/// on different traces never contend.
#[derive(Default)]
pub struct MemoryBackend {
    traces: RwLock<HashMap<TraceId, Arc<Mutex<Bucket>>>>,
}

#[derive(Default)]
struct Bucket {
    entries: HashMap<SnapshotId, Stored>,
    used: u64,
    /// Set once the bucket has been unlinked from the trace map. A writer
    /// that still holds it must look the trace up again.
    dead: bool,
}

struct Stored {
    bytes: Arc<[u8]>,
    written_at_ms: i64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn bucket(&self, trace: &TraceId) -> Option<Arc<Mutex<Bucket>>> {
        self.traces.read().get(trace).cloned()
    }

    fn bucket_or_create(&self, trace: &TraceId) -> Arc<Mutex<Bucket>> {
        if let Some(bucket) = self.bucket(trace) {
            return bucket;
        }
        Arc::clone(self.traces.write().entry(trace.clone()).or_default())
    }

    /// Unlinks the trace's bucket and marks it dead. With `only_if_empty`,
    /// a bucket that gained entries in the meantime is left alone.
    ///
    /// Lock order is always trace map, then bucket.
    fn unlink(&self, trace: &TraceId, only_if_empty: bool) {
        let mut traces = self.traces.write();
        let Some(bucket) = traces.get(trace) else {
            return;
        };
        let mut guard = bucket.lock();
        if only_if_empty && !guard.entries.is_empty() {
            return;
        }
        guard.entries.clear();
        guard.used = 0;
        guard.dead = true;
        drop(guard);
        traces.remove(trace);
    }

    /// Writes into one bucket, or returns `None` when that bucket was
    /// unlinked after the caller looked it up.
    fn insert_into(
        shared: &Mutex<Bucket>,
        snapshot: &SnapshotId,
        bytes: &[u8],
        written_at_ms: i64,
        cap: u64,
    ) -> Option<PutOutcome> {
        let mut bucket = shared.lock();
        if bucket.dead {
            return None;
        }
        let len = bytes.len() as u64;
        if bucket.used.saturating_add(len) > cap {
            return Some(PutOutcome::OverCap { used: bucket.used });
        }
        let stored = Stored {
            bytes: Arc::from(bytes),
            written_at_ms,
        };
        if let Some(previous) = bucket.entries.insert(snapshot.clone(), stored) {
            bucket.used -= previous.bytes.len() as u64;
        }
        bucket.used += len;
        Some(PutOutcome::Stored)
    }
}

impl Backend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn insert_capped(
        &self,
        trace: &TraceId,
        snapshot: &SnapshotId,
        bytes: &[u8],
        written_at_ms: i64,
        cap: u64,
    ) -> Result<PutOutcome, StoreError> {
        loop {
            let shared = self.bucket_or_create(trace);
            if let Some(outcome) = Self::insert_into(&shared, snapshot, bytes, written_at_ms, cap) {
                return Ok(outcome);
            }
        }
    }

    fn read(&self, trace: &TraceId, snapshot: &SnapshotId) -> Result<Option<Vec<u8>>, StoreError> {
        let Some(bucket) = self.bucket(trace) else {
            return Ok(None);
        };
        let bucket = bucket.lock();
        Ok(bucket.entries.get(snapshot).map(|stored| stored.bytes.to_vec()))
    }

    fn entries(&self, trace: &TraceId) -> Result<Vec<EntryMeta>, StoreError> {
        let Some(bucket) = self.bucket(trace) else {
            return Ok(Vec::new());
        };
        let bucket = bucket.lock();
        let mut entries: Vec<EntryMeta> = bucket
            .entries
            .iter()
            .map(|(snapshot_id, stored)| EntryMeta {
                snapshot_id: snapshot_id.clone(),
                len: stored.bytes.len() as u64,
                written_at_ms: stored.written_at_ms,
            })
            .collect();
        entries.sort_by(|a, b| a.snapshot_id.cmp(&b.snapshot_id));
        Ok(entries)
    }

    fn traces(&self) -> Result<Vec<TraceId>, StoreError> {
        let mut traces: Vec<TraceId> = self.traces.read().keys().cloned().collect();
        traces.sort();
        Ok(traces)
    }

    fn remove(&self, trace: &TraceId, snapshots: &[SnapshotId]) -> Result<(), StoreError> {
        let Some(bucket) = self.bucket(trace) else {
            return Ok(());
        };
        let mut bucket = bucket.lock();
        for snapshot in snapshots {
            if let Some(previous) = bucket.entries.remove(snapshot) {
                bucket.used -= previous.bytes.len() as u64;
            }
        }
        Ok(())
    }

    fn remove_trace(&self, trace: &TraceId) -> Result<(), StoreError> {
        self.unlink(trace, false);
        Ok(())
    }

    fn remove_expired(&self, trace: &TraceId, cutoff_ms: i64) -> Result<SweepReport, StoreError> {
        let mut report = SweepReport {
            traces_scanned: 1,
            ..SweepReport::default()
        };
        let Some(shared) = self.bucket(trace) else {
            return Ok(report);
        };
        let emptied = {
            let mut bucket = shared.lock();
            let mut freed = 0u64;
            let mut removed = 0u64;
            bucket.entries.retain(|_, stored| {
                let expired = stored.written_at_ms <= cutoff_ms;
                if expired {
                    freed += stored.bytes.len() as u64;
                    removed += 1;
                }
                !expired
            });
            bucket.used -= freed;
            report.entries_removed = removed;
            report.bytes_freed = freed;
            bucket.entries.is_empty()
        };
        if emptied {
            // Re-checked under the locks: a put may have landed since.
            self.unlink(trace, true);
        }
        Ok(report)
    }
}
