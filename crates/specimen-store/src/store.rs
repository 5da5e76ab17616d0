use std::sync::Arc;
use std::time::Duration;

use specimen_types::{EngineConfig, SnapshotId, TraceId};
use tracing::{debug, info, warn};

use crate::backend::{Backend, MemoryBackend, PutOutcome};
use crate::clock::{Clock, SystemClock};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub traces_scanned: u64,
    pub entries_removed: u64,
    pub bytes_freed: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceUsage {
    pub trace_id: TraceId,
    pub entries: usize,
    pub bytes_used: u64,
    pub bytes_remaining: u64,
    pub oldest_written_at_ms: Option<i64>,
}

/// Trace-scoped snapshot storage with a per-trace byte cap and TTL.
///
/// Nothing here returns an error to the caller: a failed write is "not
/// stored", a failed read is "not found", and the cause goes to the log.
pub struct SnapshotStore {
    backend: Box<dyn Backend>,
    clock: Arc<dyn Clock>,
    per_trace_byte_cap: u64,
    ttl: Duration,
}

impl SnapshotStore {
    pub fn new(backend: impl Backend + 'static, per_trace_byte_cap: u64, ttl: Duration) -> Self {
        Self {
            backend: Box::new(backend),
            clock: Arc::new(SystemClock),
            per_trace_byte_cap,
            ttl,
        }
    }

    pub fn from_config(backend: impl Backend + 'static, config: &EngineConfig) -> Self {
        Self::new(
            backend,
            config.per_trace_byte_cap,
            Duration::from_secs(config.ttl_seconds),
        )
    }

    pub fn in_memory(config: &EngineConfig) -> Self {
        Self::from_config(MemoryBackend::new(), config)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn per_trace_byte_cap(&self) -> u64 {
        self.per_trace_byte_cap
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn generate_trace_id() -> TraceId {
        TraceId::generate()
    }

    pub fn generate_snapshot_id() -> SnapshotId {
        SnapshotId::generate()
    }

    /// Stores `bytes` under (`trace`, `snapshot`) unless the trace would go
    /// past its byte cap. An existing entry under the same key is replaced.
    pub fn put(&self, trace: &TraceId, snapshot: &SnapshotId, bytes: &[u8]) -> bool {
        let cap = self.per_trace_byte_cap;
        let written_at_ms = self.clock.now_ms();
        match self
            .backend
            .insert_capped(trace, snapshot, bytes, written_at_ms, cap)
        {
            Ok(PutOutcome::Stored) => {
                debug!(trace_id = %trace, snapshot_id = %snapshot, bytes = bytes.len(), "snapshot stored");
                true
            }
            Ok(PutOutcome::OverCap { used }) => {
                debug!(
                    trace_id = %trace,
                    snapshot_id = %snapshot,
                    bytes = bytes.len(),
                    used,
                    cap,
                    "snapshot dropped: trace byte cap reached"
                );
                false
            }
            Err(error) => {
                warn!(%error, trace_id = %trace, snapshot_id = %snapshot, backend = self.backend.name(), "snapshot write failed");
                false
            }
        }
    }

    pub fn get(&self, trace: &TraceId, snapshot: &SnapshotId) -> Option<Vec<u8>> {
        match self.backend.read(trace, snapshot) {
            Ok(bytes) => bytes,
            Err(error) => {
                warn!(%error, trace_id = %trace, snapshot_id = %snapshot, backend = self.backend.name(), "snapshot read failed");
                None
            }
        }
    }

    /// Removes every entry whose age has reached the TTL.
    pub fn sweep_expired(&self) -> SweepReport {
        let ttl_ms = self.ttl.as_millis().min(i64::MAX as u128) as i64;
        let cutoff_ms = self.clock.now_ms().saturating_sub(ttl_ms);
        match self.backend.remove_written_before(cutoff_ms) {
            Ok(report) => {
                if report.entries_removed > 0 {
                    info!(
                        entries = report.entries_removed,
                        bytes = report.bytes_freed,
                        traces = report.traces_scanned,
                        "swept expired snapshots"
                    );
                }
                report
            }
            Err(error) => {
                warn!(%error, backend = self.backend.name(), "snapshot sweep failed");
                SweepReport::default()
            }
        }
    }

    pub fn delete_trace(&self, trace: &TraceId) -> bool {
        match self.backend.remove_trace(trace) {
            Ok(()) => true,
            Err(error) => {
                warn!(%error, trace_id = %trace, backend = self.backend.name(), "trace delete failed");
                false
            }
        }
    }

    pub fn usage(&self, trace: &TraceId) -> Option<TraceUsage> {
        let entries = match self.backend.entries(trace) {
            Ok(entries) => entries,
            Err(error) => {
                warn!(%error, trace_id = %trace, backend = self.backend.name(), "trace listing failed");
                return None;
            }
        };
        let bytes_used: u64 = entries.iter().map(|entry| entry.len).sum();
        Some(TraceUsage {
            trace_id: trace.clone(),
            entries: entries.len(),
            bytes_used,
            bytes_remaining: self.per_trace_byte_cap.saturating_sub(bytes_used),
            oldest_written_at_ms: entries.iter().map(|entry| entry.written_at_ms).min(),
        })
    }

    pub fn traces(&self) -> Vec<TraceId> {
        self.backend.traces().unwrap_or_else(|error| {
            warn!(%error, backend = self.backend.name(), "trace listing failed");
            Vec::new()
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    use parking_lot::Mutex;

    use super::*;
    use crate::backend::{EntryMeta, FsBackend, SqliteBackend};
    use crate::{ManualClock, StoreError};

    fn store(cap: u64, ttl_secs: u64) -> (SnapshotStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let store = SnapshotStore::new(MemoryBackend::new(), cap, Duration::from_secs(ttl_secs))
            .with_clock(clock.clone());
        (store, clock)
    }

    fn trace(name: &str) -> TraceId {
        TraceId::parse(name).unwrap()
    }

    #[test]
    fn put_then_get_returns_the_same_bytes() {
        let (store, _clock) = store(1024, 60);
        let t = trace("t");
        let id = SnapshotStore::generate_snapshot_id();
        assert!(store.put(&t, &id, b"hello"));
        assert_eq!(store.get(&t, &id).as_deref(), Some(&b"hello"[..]));
        assert_eq!(store.get(&t, &SnapshotStore::generate_snapshot_id()), None);
        assert_eq!(store.get(&trace("other"), &id), None);
    }

    #[test]
    fn cap_rejects_whole_writes_and_keeps_existing_entries() {
        let (store, _clock) = store(10, 60);
        let t = trace("t");
        let first = SnapshotId::generate();
        assert!(store.put(&t, &first, &[1; 6]));
        assert!(!store.put(&t, &SnapshotId::generate(), &[2; 5]));
        assert!(store.put(&t, &SnapshotId::generate(), &[3; 4]));
        assert!(!store.put(&t, &SnapshotId::generate(), &[4; 1]));
        assert_eq!(store.get(&t, &first), Some(vec![1; 6]));

        let usage = store.usage(&t).unwrap();
        assert_eq!(usage.entries, 2);
        assert_eq!(usage.bytes_used, 10);
        assert_eq!(usage.bytes_remaining, 0);
    }

    #[test]
    fn payload_larger_than_cap_is_refused_on_an_empty_trace() {
        let (store, _clock) = store(4, 60);
        assert!(!store.put(&trace("t"), &SnapshotId::generate(), b"12345"));
        assert!(store.traces().iter().all(|t| store.usage(t).unwrap().entries == 0));
    }

    #[test]
    fn traces_do_not_share_quota() {
        let (store, _clock) = store(8, 60);
        assert!(store.put(&trace("a"), &SnapshotId::generate(), &[0; 8]));
        assert!(store.put(&trace("b"), &SnapshotId::generate(), &[0; 8]));
        assert!(!store.put(&trace("a"), &SnapshotId::generate(), &[0; 1]));
    }

    #[test]
    fn entries_expire_once_their_age_reaches_the_ttl() {
        let (store, clock) = store(1024, 60);
        let t = trace("t");
        let id = SnapshotId::generate();
        assert!(store.put(&t, &id, b"x"));

        clock.advance(Duration::from_millis(59_999));
        assert_eq!(store.sweep_expired().entries_removed, 0);
        assert!(store.get(&t, &id).is_some());

        clock.advance(Duration::from_millis(1));
        let report = store.sweep_expired();
        assert_eq!(report.entries_removed, 1);
        assert_eq!(report.bytes_freed, 1);
        assert_eq!(store.get(&t, &id), None);
        assert!(store.traces().is_empty());
    }

    #[test]
    fn sweep_frees_quota_and_keeps_fresh_entries() {
        let (store, clock) = store(10, 60);
        let t = trace("t");
        let old = SnapshotId::generate();
        assert!(store.put(&t, &old, &[0; 8]));
        clock.advance(Duration::from_secs(30));
        let fresh = SnapshotId::generate();
        assert!(store.put(&t, &fresh, &[0; 2]));
        assert!(!store.put(&t, &SnapshotId::generate(), &[0; 5]));

        clock.advance(Duration::from_secs(30));
        store.sweep_expired();
        assert_eq!(store.get(&t, &old), None);
        assert!(store.get(&t, &fresh).is_some());
        assert!(store.put(&t, &SnapshotId::generate(), &[0; 5]));
    }

    #[test]
    fn concurrent_writers_never_exceed_the_cap() {
        let (store, _clock) = store(100, 60);
        let store = Arc::new(store);
        let t = trace("shared");
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let t = t.clone();
                thread::spawn(move || {
                    (0..10)
                        .filter(|_| store.put(&t, &SnapshotId::generate(), &[0; 7]))
                        .count()
                })
            })
            .collect();
        let stored: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(stored, 14);
        assert_eq!(store.usage(&t).unwrap().bytes_used, 98);
    }

    struct BrokenBackend;

    impl Backend for BrokenBackend {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn insert_capped(
            &self,
            _: &TraceId,
            _: &SnapshotId,
            _: &[u8],
            _: i64,
            _: u64,
        ) -> Result<PutOutcome, StoreError> {
            Err(StoreError::Corrupt("disk on fire".to_owned()))
        }

        fn read(&self, _: &TraceId, _: &SnapshotId) -> Result<Option<Vec<u8>>, StoreError> {
            Err(StoreError::Corrupt("disk on fire".to_owned()))
        }

        fn entries(&self, _: &TraceId) -> Result<Vec<EntryMeta>, StoreError> {
            Err(StoreError::Corrupt("disk on fire".to_owned()))
        }

        fn traces(&self) -> Result<Vec<TraceId>, StoreError> {
            Err(StoreError::Corrupt("disk on fire".to_owned()))
        }

        fn remove(&self, _: &TraceId, _: &[SnapshotId]) -> Result<(), StoreError> {
            Err(StoreError::Corrupt("disk on fire".to_owned()))
        }

        fn remove_trace(&self, _: &TraceId) -> Result<(), StoreError> {
            Err(StoreError::Corrupt("disk on fire".to_owned()))
        }

        fn remove_expired(&self, _: &TraceId, _: i64) -> Result<SweepReport, StoreError> {
            Err(StoreError::Corrupt("disk on fire".to_owned()))
        }
    }

    #[test]
    fn substrate_failures_become_not_stored_and_not_found() {
        let store = SnapshotStore::new(BrokenBackend, 1024, Duration::from_secs(60));
        let t = trace("t");
        let id = SnapshotId::generate();
        assert!(!store.put(&t, &id, b"x"));
        assert_eq!(store.get(&t, &id), None);
        assert_eq!(store.sweep_expired(), SweepReport::default());
        assert!(!store.delete_trace(&t));
        assert_eq!(store.usage(&t), None);
        assert!(store.traces().is_empty());
    }

    #[test]
    fn every_backend_honours_cap_and_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let fs_root = dir.path().join("fs");
        let db_path = dir.path().join("db.sqlite");
        let backends: Vec<Box<dyn Fn() -> SnapshotStore>> = vec![
            Box::new(|| SnapshotStore::new(MemoryBackend::new(), 10, Duration::from_secs(60)))
                as Box<dyn Fn() -> SnapshotStore>,
            Box::new(move || {
                let backend = FsBackend::open(fs_root.clone()).unwrap();
                SnapshotStore::new(backend, 10, Duration::from_secs(60))
            }),
            Box::new(move || {
                let backend = SqliteBackend::open(db_path.clone()).unwrap();
                SnapshotStore::new(backend, 10, Duration::from_secs(60))
            }),
        ];

        for make in &backends {
            let clock = Arc::new(ManualClock::new(5_000));
            let store = make().with_clock(clock.clone());
            let t = trace("t");
            let id = SnapshotId::generate();
            assert!(store.put(&t, &id, &[9; 10]), "{}", store.backend_name());
            assert!(!store.put(&t, &SnapshotId::generate(), &[9; 1]), "{}", store.backend_name());
            assert_eq!(store.get(&t, &id), Some(vec![9; 10]));
            assert_eq!(store.traces(), vec![t.clone()]);

            clock.advance(Duration::from_secs(60));
            let report = store.sweep_expired();
            assert_eq!(report.entries_removed, 1, "{}", store.backend_name());
            assert_eq!(report.bytes_freed, 10);
            assert_eq!(store.get(&t, &id), None);
            assert!(store.put(&t, &SnapshotId::generate(), &[9; 10]));
            assert!(store.delete_trace(&t));
            assert_eq!(store.usage(&t).unwrap().entries, 0);
        }
    }

    /// Lets a writer land a fresh entry right after the sweep has looked at a
    /// trace and before anything is removed from it.
    struct WriteDuringSweep {
        inner: Box<dyn Backend>,
        clock: Arc<ManualClock>,
        written: Arc<Mutex<Vec<(TraceId, SnapshotId)>>>,
        armed: Arc<AtomicBool>,
    }

    impl WriteDuringSweep {
        fn write_fresh(&self, trace: &TraceId) {
            if !self.armed.load(Ordering::SeqCst) {
                return;
            }
            let id = SnapshotId::generate();
            let outcome = self
                .inner
                .insert_capped(trace, &id, b"fresh", self.clock.now_ms(), 1024)
                .unwrap();
            assert_eq!(outcome, PutOutcome::Stored);
            self.written.lock().push((trace.clone(), id));
        }
    }

    impl Backend for WriteDuringSweep {
        fn name(&self) -> &'static str {
            self.inner.name()
        }

        fn insert_capped(
            &self,
            trace: &TraceId,
            snapshot: &SnapshotId,
            bytes: &[u8],
            written_at_ms: i64,
            cap: u64,
        ) -> Result<PutOutcome, StoreError> {
            self.inner
                .insert_capped(trace, snapshot, bytes, written_at_ms, cap)
        }

        fn read(&self, trace: &TraceId, snapshot: &SnapshotId) -> Result<Option<Vec<u8>>, StoreError> {
            self.inner.read(trace, snapshot)
        }

        fn entries(&self, trace: &TraceId) -> Result<Vec<EntryMeta>, StoreError> {
            let listed = self.inner.entries(trace)?;
            self.write_fresh(trace);
            Ok(listed)
        }

        fn traces(&self) -> Result<Vec<TraceId>, StoreError> {
            self.inner.traces()
        }

        fn remove(&self, trace: &TraceId, snapshots: &[SnapshotId]) -> Result<(), StoreError> {
            self.inner.remove(trace, snapshots)
        }

        fn remove_trace(&self, trace: &TraceId) -> Result<(), StoreError> {
            self.inner.remove_trace(trace)
        }

        fn remove_expired(&self, trace: &TraceId, cutoff_ms: i64) -> Result<SweepReport, StoreError> {
            self.write_fresh(trace);
            self.inner.remove_expired(trace, cutoff_ms)
        }
    }

    #[test]
    fn sweep_never_drops_an_entry_written_while_it_runs() {
        let dir = tempfile::tempdir().unwrap();
        let inners: Vec<Box<dyn Backend>> = vec![
            Box::new(MemoryBackend::new()),
            Box::new(FsBackend::open(dir.path().join("fs")).unwrap()),
            Box::new(SqliteBackend::open(dir.path().join("db.sqlite")).unwrap()),
        ];

        for inner in inners {
            let clock = Arc::new(ManualClock::new(1_000_000));
            let written = Arc::new(Mutex::new(Vec::new()));
            let armed = Arc::new(AtomicBool::new(false));
            let backend = WriteDuringSweep {
                inner,
                clock: clock.clone(),
                written: Arc::clone(&written),
                armed: Arc::clone(&armed),
            };
            let store = SnapshotStore::new(backend, 1024, Duration::from_secs(60))
                .with_clock(clock.clone());
            let name = store.backend_name();
            let t = trace("t");
            let old = SnapshotId::generate();
            assert!(store.put(&t, &old, b"old"));

            clock.advance(Duration::from_secs(61));
            armed.store(true, Ordering::SeqCst);
            let report = store.sweep_expired();
            armed.store(false, Ordering::SeqCst);

            assert_eq!(report.entries_removed, 1, "{name}");
            assert_eq!(store.get(&t, &old), None, "{name}");
            let written = written.lock().clone();
            assert!(!written.is_empty(), "{name}");
            for (trace, id) in &written {
                assert_eq!(store.get(trace, id).as_deref(), Some(&b"fresh"[..]), "{name}");
            }
            assert_eq!(store.traces(), vec![t.clone()], "{name}");
        }
    }
}
