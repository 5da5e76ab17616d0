//! Trace-scoped byte store for rendered snapshots.
//!
//! [`SnapshotStore`] enforces the per-trace byte cap at write time, sweeps
//! entries older than the TTL on request, and turns every substrate failure
//! into "not stored" / "not found" so that diagnostics never fail the traced
//! program. The substrate itself is a [`Backend`]: in memory, a directory
//! tree, or a SQLite database.

use std::error::Error;
use std::fmt;
use std::io;

use specimen_types::InvariantError;

pub mod backend;
mod clock;
mod store;

pub use backend::{Backend, EntryMeta, FsBackend, MemoryBackend, PutOutcome, SqliteBackend};
pub use clock::{Clock, ManualClock, SystemClock};
pub use store::{SnapshotStore, SweepReport, TraceUsage};

#[derive(Debug)]
pub enum StoreError {
    Io {
        context: String,
        source: io::Error,
    },
    Sqlite {
        context: &'static str,
        source: rusqlite::Error,
    },
    Corrupt(String),
    Invariant(InvariantError),
}

impl StoreError {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn sqlite(context: &'static str) -> impl FnOnce(rusqlite::Error) -> Self {
        move |source| Self::Sqlite { context, source }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { context, source } => write!(f, "{context}: {source}"),
            Self::Sqlite { context, source } => write!(f, "{context}: {source}"),
            Self::Corrupt(what) => write!(f, "corrupt snapshot entry: {what}"),
            Self::Invariant(source) => write!(f, "invariant violated: {source}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Sqlite { source, .. } => Some(source),
            Self::Corrupt(_) => None,
            Self::Invariant(source) => Some(source),
        }
    }
}

impl From<InvariantError> for StoreError {
    fn from(source: InvariantError) -> Self {
        Self::Invariant(source)
    }
}
