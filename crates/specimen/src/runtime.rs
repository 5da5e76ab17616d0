//! tokio helpers for hosts that run on an async runtime. Cloning and
//! rendering still happen on the calling task; only substrate I/O moves to
//! the blocking pool.

use std::sync::Arc;
use std::time::Duration;

use specimen_capture::Inspect;
use specimen_types::{SnapshotId, TraceId};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::warn;

use crate::Engine;

impl Engine {
    pub async fn store_snapshot_async<T: Inspect + ?Sized>(
        &self,
        trace: TraceId,
        value: &T,
    ) -> Option<SnapshotId> {
        let html = self.render_value(value);
        let store = Arc::clone(&self.store);
        let snapshot_id = SnapshotId::generate();
        match tokio::task::spawn_blocking(move || {
            store
                .put(&trace, &snapshot_id, html.as_bytes())
                .then_some(snapshot_id)
        })
        .await
        {
            Ok(stored) => stored,
            Err(error) => {
                warn!(%error, "join snapshot write");
                None
            }
        }
    }

    pub async fn fetch_rendering_async(
        &self,
        trace_id: String,
        snapshot_id: String,
    ) -> Option<String> {
        let engine = self.clone();
        match tokio::task::spawn_blocking(move || engine.fetch_rendering(&trace_id, &snapshot_id))
            .await
        {
            Ok(html) => html,
            Err(error) => {
                warn!(%error, "join snapshot read");
                None
            }
        }
    }

    /// Sweeps expired snapshots every `period` until the returned task is
    /// aborted. The first sweep runs one `period` after spawning.
    pub fn spawn_sweeper(&self, period: Duration) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let store = Arc::clone(&store);
                if let Err(error) = tokio::task::spawn_blocking(move || store.sweep_expired()).await
                {
                    warn!(%error, "join snapshot sweep");
                }
            }
        })
    }
}
