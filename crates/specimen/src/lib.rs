//! Value capture and snapshot storage for request tracing.
//!
//! An [`Engine`] is built once by the host and shared by reference. For each
//! captured value the host calls [`Engine::build_preview`] for the inline
//! one-liner and, when detail is wanted, [`Engine::store_snapshot`], which
//! clones the value under the full profile, renders it to HTML and stores it
//! under the caller's trace id. A viewer reads it back with
//! [`Engine::fetch_rendering`]. None of these ever fail the caller: the worst
//! outcome is "no detail stored".
//!
//! ```
//! use specimen::{Engine, EngineConfig, TraceId};
//!
//! let engine = Engine::in_memory(EngineConfig::default());
//! let trace = TraceId::parse("trace-1").unwrap();
//! let id = engine.store_snapshot(&trace, &vec![1, 2, 3]).unwrap();
//! assert!(engine.fetch_rendering("trace-1", id.as_str()).is_some());
//! ```

mod engine;
mod runtime;

pub use engine::Engine;

pub use specimen_capture::{
    Debugged, Inspect, Inspector, OpaqueValue, Record, Serialized, capture, short_type_name,
};
pub use specimen_render::{
    RenderMode, TRUNCATION_GLYPH, UNAVAILABLE_HTML, preview_text, render, render_expanded,
    render_full, strip_active_content,
};
pub use specimen_store::{
    Backend, Clock, FsBackend, ManualClock, MemoryBackend, SnapshotStore, SqliteBackend,
    StoreError, SweepReport, SystemClock, TraceUsage,
};
pub use specimen_types::{
    ConfigError, EngineConfig, InvariantError, Limits, Node, Opaque, OpaqueKind, Scalar,
    SnapshotId, Snapshot, TraceId,
};
