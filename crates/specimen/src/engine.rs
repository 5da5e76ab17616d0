use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use specimen_capture::{Inspect, capture};
use specimen_render::{UNAVAILABLE_HTML, preview_text, render_expanded};
use specimen_store::{SnapshotStore, SweepReport};
use specimen_types::{EngineConfig, Snapshot, SnapshotId, TraceId};
use tracing::{debug, warn};

/// Capture engine owned by the host and shared with every unit of work.
///
/// Cloning an `Engine` is cheap and shares the underlying store.
#[derive(Clone)]
pub struct Engine {
    pub(crate) config: Arc<EngineConfig>,
    pub(crate) store: Arc<SnapshotStore>,
}

impl Engine {
    pub fn new(config: EngineConfig, store: SnapshotStore) -> Self {
        Self {
            config: Arc::new(config),
            store: Arc::new(store),
        }
    }

    pub fn in_memory(config: EngineConfig) -> Self {
        let store = SnapshotStore::in_memory(&config);
        Self::new(config, store)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn new_trace_id(&self) -> TraceId {
        TraceId::generate()
    }

    /// Single-line summary of `value` under the preview profile.
    pub fn build_preview<T: Inspect + ?Sized>(&self, value: &T) -> String {
        let snapshot = capture(value, self.config.preview_limits());
        preview_text(&snapshot, self.config.preview_max_chars)
    }

    /// Full-profile snapshot of `value`.
    pub fn capture<T: Inspect + ?Sized>(&self, value: &T) -> Snapshot {
        capture(value, self.config.full_limits())
    }

    /// Clones, renders and stores `value` under `trace`. `None` means no
    /// detail was kept, most often because the trace is out of quota.
    pub fn store_snapshot<T: Inspect + ?Sized>(
        &self,
        trace: &TraceId,
        value: &T,
    ) -> Option<SnapshotId> {
        let html = self.render_value(value);
        let snapshot_id = SnapshotId::generate();
        self.store
            .put(trace, &snapshot_id, html.as_bytes())
            .then_some(snapshot_id)
    }

    /// The stored HTML for (`trace_id`, `snapshot_id`). Malformed ids are
    /// simply not found.
    pub fn fetch_rendering(&self, trace_id: &str, snapshot_id: &str) -> Option<String> {
        let (Ok(trace), Ok(snapshot)) = (TraceId::parse(trace_id), SnapshotId::parse(snapshot_id))
        else {
            debug!(trace_id, snapshot_id, "rendering requested with malformed ids");
            return None;
        };
        self.fetch(&trace, &snapshot)
    }

    /// Stores `records` under the trace's reserved late-records id,
    /// replacing any earlier late records of the same trace.
    pub fn store_late_records<T: Inspect + ?Sized>(&self, trace: &TraceId, records: &T) -> bool {
        let html = self.render_value(records);
        self.store
            .put(trace, &SnapshotId::late_records(), html.as_bytes())
    }

    pub fn fetch_late_records(&self, trace: &TraceId) -> Option<String> {
        self.fetch(trace, &SnapshotId::late_records())
    }

    pub fn sweep_expired(&self) -> SweepReport {
        self.store.sweep_expired()
    }

    pub(crate) fn render_value<T: Inspect + ?Sized>(&self, value: &T) -> String {
        render_guarded(&self.capture(value))
    }

    fn fetch(&self, trace: &TraceId, snapshot: &SnapshotId) -> Option<String> {
        let bytes = self.store.get(trace, snapshot)?;
        Some(String::from_utf8_lossy(&bytes).into_owned())
    }
}

pub(crate) fn render_guarded(snapshot: &Snapshot) -> String {
    match panic::catch_unwind(AssertUnwindSafe(|| render_expanded(snapshot))) {
        Ok(html) => html,
        Err(_) => {
            warn!("rendering snapshot panicked; storing placeholder");
            UNAVAILABLE_HTML.to_owned()
        }
    }
}
