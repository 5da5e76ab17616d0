use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng;
use rand::distributions::Alphanumeric;
use specimen_types::{SnapshotId, TraceId};

use super::{Backend, EntryMeta, PutOutcome};
use crate::{StoreError, SweepReport};

const ENTRY_EXTENSION: &str = "snap";
const HEADER_LEN: u64 = 8;

/// One directory per trace, one file per snapshot.
///
/// Each file is an 8-byte little-endian write time (ms since epoch) followed
/// by the payload. Writes go to a temp file in the trace directory and are
/// renamed into place, so readers never observe a half-written entry. Quota
/// checks are serialized per trace within this process only.
pub struct FsBackend {
    root: PathBuf,
    locks: Mutex<HashMap<TraceId, Arc<Mutex<()>>>>,
}

impl FsBackend {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|error| StoreError::io(format!("create {}", root.display()), error))?;
        Ok(Self {
            root,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn trace_lock(&self, trace: &TraceId) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.lock().entry(trace.clone()).or_default())
    }

    fn trace_dir(&self, trace: &TraceId) -> PathBuf {
        self.root.join(trace.as_str())
    }

    fn entry_path(&self, trace: &TraceId, snapshot: &SnapshotId) -> PathBuf {
        self.trace_dir(trace)
            .join(format!("{}.{ENTRY_EXTENSION}", snapshot.as_str()))
    }

    fn used_bytes(&self, trace: &TraceId) -> Result<u64, StoreError> {
        Ok(self.entries(trace)?.iter().map(|entry| entry.len).sum())
    }

    fn remove_dir(&self, trace: &TraceId) -> Result<(), StoreError> {
        let dir = self.trace_dir(trace);
        ignore_not_found(fs::remove_dir_all(&dir))
            .map_err(|error| StoreError::io(format!("remove {}", dir.display()), error))
    }

    /// Forgets the lock of a trace whose directory is gone. `lock` must be the
    /// caller's clone, already unlocked.
    fn release_lock(&self, trace: &TraceId, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock();
        // Clones are only taken under `locks`, so nobody else can be waiting.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(trace);
        }
    }
}

fn read_header(path: &Path) -> Result<(i64, u64), StoreError> {
    let mut file =
        File::open(path).map_err(|error| StoreError::io(format!("open {}", path.display()), error))?;
    let file_len = file
        .metadata()
        .map_err(|error| StoreError::io(format!("stat {}", path.display()), error))?
        .len();
    if file_len < HEADER_LEN {
        return Err(StoreError::Corrupt(format!(
            "{} is shorter than its header",
            path.display()
        )));
    }
    let mut header = [0u8; HEADER_LEN as usize];
    file.read_exact(&mut header)
        .map_err(|error| StoreError::io(format!("read {}", path.display()), error))?;
    Ok((i64::from_le_bytes(header), file_len - HEADER_LEN))
}

fn temp_name(snapshot: &SnapshotId) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    format!(".{}.{suffix}.tmp", snapshot.as_str())
}

fn ignore_not_found(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

impl Backend for FsBackend {
    fn name(&self) -> &'static str {
        "fs"
    }

    fn insert_capped(
        &self,
        trace: &TraceId,
        snapshot: &SnapshotId,
        bytes: &[u8],
        written_at_ms: i64,
        cap: u64,
    ) -> Result<PutOutcome, StoreError> {
        let lock = self.trace_lock(trace);
        let _guard = lock.lock();

        let used = self.used_bytes(trace)?;
        if used.saturating_add(bytes.len() as u64) > cap {
            return Ok(PutOutcome::OverCap { used });
        }

        let dir = self.trace_dir(trace);
        fs::create_dir_all(&dir)
            .map_err(|error| StoreError::io(format!("create {}", dir.display()), error))?;
        let temp = dir.join(temp_name(snapshot));
        let written = File::create(&temp).and_then(|mut file| {
            file.write_all(&written_at_ms.to_le_bytes())?;
            file.write_all(bytes)?;
            file.sync_all()
        });
        if let Err(error) = written {
            let _ = fs::remove_file(&temp);
            return Err(StoreError::io(format!("write {}", temp.display()), error));
        }

        let path = self.entry_path(trace, snapshot);
        if let Err(error) = fs::rename(&temp, &path) {
            let _ = fs::remove_file(&temp);
            return Err(StoreError::io(format!("rename into {}", path.display()), error));
        }
        Ok(PutOutcome::Stored)
    }

    fn read(&self, trace: &TraceId, snapshot: &SnapshotId) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.entry_path(trace, snapshot);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(StoreError::io(format!("read {}", path.display()), error)),
        };
        if raw.len() < HEADER_LEN as usize {
            return Err(StoreError::Corrupt(format!(
                "{} is shorter than its header",
                path.display()
            )));
        }
        Ok(Some(raw[HEADER_LEN as usize..].to_vec()))
    }

    fn entries(&self, trace: &TraceId) -> Result<Vec<EntryMeta>, StoreError> {
        let dir = self.trace_dir(trace);
        let listing = match fs::read_dir(&dir) {
            Ok(listing) => listing,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(StoreError::io(format!("list {}", dir.display()), error)),
        };

        let mut entries = Vec::new();
        for item in listing {
            let item = item.map_err(|error| StoreError::io(format!("list {}", dir.display()), error))?;
            let path = item.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(ENTRY_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            let Ok(snapshot_id) = SnapshotId::parse(stem) else {
                continue;
            };
            let (written_at_ms, len) = match read_header(&path) {
                Ok(header) => header,
                // Removed by a concurrent sweep between listing and opening.
                Err(StoreError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                    continue;
                }
                Err(error) => return Err(error),
            };
            entries.push(EntryMeta {
                snapshot_id,
                len,
                written_at_ms,
            });
        }
        entries.sort_by(|a, b| a.snapshot_id.cmp(&b.snapshot_id));
        Ok(entries)
    }

    fn traces(&self) -> Result<Vec<TraceId>, StoreError> {
        let listing = fs::read_dir(&self.root)
            .map_err(|error| StoreError::io(format!("list {}", self.root.display()), error))?;
        let mut traces = Vec::new();
        for item in listing {
            let item = item
                .map_err(|error| StoreError::io(format!("list {}", self.root.display()), error))?;
            let is_dir = item.file_type().map(|kind| kind.is_dir()).unwrap_or(false);
            if !is_dir {
                continue;
            }
            if let Some(name) = item.file_name().to_str()
                && let Ok(trace) = TraceId::parse(name)
            {
                traces.push(trace);
            }
        }
        traces.sort();
        Ok(traces)
    }

    fn remove(&self, trace: &TraceId, snapshots: &[SnapshotId]) -> Result<(), StoreError> {
        let lock = self.trace_lock(trace);
        let _guard = lock.lock();
        for snapshot in snapshots {
            let path = self.entry_path(trace, snapshot);
            ignore_not_found(fs::remove_file(&path))
                .map_err(|error| StoreError::io(format!("remove {}", path.display()), error))?;
        }
        Ok(())
    }

    fn remove_trace(&self, trace: &TraceId) -> Result<(), StoreError> {
        let lock = self.trace_lock(trace);
        {
            let _guard = lock.lock();
            self.remove_dir(trace)?;
        }
        self.release_lock(trace, lock);
        Ok(())
    }

    fn remove_expired(&self, trace: &TraceId, cutoff_ms: i64) -> Result<SweepReport, StoreError> {
        let mut report = SweepReport {
            traces_scanned: 1,
            ..SweepReport::default()
        };
        let lock = self.trace_lock(trace);
        let emptied = {
            let _guard = lock.lock();
            let entries = self.entries(trace)?;
            let mut kept = 0usize;
            for entry in entries {
                if entry.written_at_ms > cutoff_ms {
                    kept += 1;
                    continue;
                }
                let path = self.entry_path(trace, &entry.snapshot_id);
                ignore_not_found(fs::remove_file(&path))
                    .map_err(|error| StoreError::io(format!("remove {}", path.display()), error))?;
                report.entries_removed += 1;
                report.bytes_freed += entry.len;
            }
            if kept == 0 {
                self.remove_dir(trace)?;
            }
            kept == 0
        };
        if emptied {
            self.release_lock(trace, lock);
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_survive_reopening() {
        let dir = tempfile::tempdir().unwrap();
        let trace = TraceId::generate();
        let id = SnapshotId::generate();
        {
            let backend = FsBackend::open(dir.path()).unwrap();
            backend
                .insert_capped(&trace, &id, b"<div>x</div>", 42, 1024)
                .unwrap();
        }
        let backend = FsBackend::open(dir.path()).unwrap();
        assert_eq!(backend.traces().unwrap(), vec![trace.clone()]);
        assert_eq!(
            backend.read(&trace, &id).unwrap().as_deref(),
            Some(&b"<div>x</div>"[..])
        );
        let entries = backend.entries(&trace).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].written_at_ms, 42);
        assert_eq!(entries[0].len, 12);
    }

    #[test]
    fn no_temp_files_are_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FsBackend::open(dir.path()).unwrap();
        let trace = TraceId::generate();
        for _ in 0..3 {
            backend
                .insert_capped(&trace, &SnapshotId::generate(), b"abc", 1, 1024)
                .unwrap();
        }
        let names: Vec<String> = fs::read_dir(backend.root().join(trace.as_str()))
            .unwrap()
            .map(|item| item.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 3);
        assert!(names.iter().all(|name| name.ends_with(".snap")));
    }

    #[test]
    fn truncated_entry_is_reported_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FsBackend::open(dir.path()).unwrap();
        let trace = TraceId::generate();
        let id = SnapshotId::generate();
        fs::create_dir_all(backend.trace_dir(&trace)).unwrap();
        fs::write(backend.entry_path(&trace, &id), b"abc").unwrap();
        assert!(matches!(
            backend.read(&trace, &id),
            Err(StoreError::Corrupt(_))
        ));
    }

    #[test]
    fn stray_directories_are_not_traces() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FsBackend::open(dir.path()).unwrap();
        fs::create_dir_all(dir.path().join("not a trace")).unwrap();
        fs::write(dir.path().join("README"), b"hi").unwrap();
        assert!(backend.traces().unwrap().is_empty());
    }

    #[test]
    fn expiring_keeps_entries_written_after_the_cutoff() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FsBackend::open(dir.path()).unwrap();
        let trace = TraceId::generate();
        let old = SnapshotId::generate();
        let fresh = SnapshotId::generate();
        backend.insert_capped(&trace, &old, b"abcd", 10, 1024).unwrap();
        backend.insert_capped(&trace, &fresh, b"xy", 20, 1024).unwrap();

        let report = backend.remove_expired(&trace, 10).unwrap();
        assert_eq!(report.entries_removed, 1);
        assert_eq!(report.bytes_freed, 4);
        assert_eq!(backend.read(&trace, &old).unwrap(), None);
        assert!(backend.read(&trace, &fresh).unwrap().is_some());
        assert_eq!(backend.traces().unwrap(), vec![trace.clone()]);

        backend.remove_expired(&trace, 20).unwrap();
        assert!(backend.traces().unwrap().is_empty());
        assert!(backend.locks.lock().is_empty());
    }
}
