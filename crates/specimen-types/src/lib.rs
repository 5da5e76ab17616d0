//! Shared vocabulary for specimen: the immutable snapshot tree, trace and
//! snapshot identifiers, cloning limits, and the engine configuration.

use std::error::Error;
use std::fmt;

mod config;
mod ids;
mod limits;
mod node;

pub use config::{ConfigError, EngineConfig, ENV_PREFIX};
pub use ids::{SnapshotId, TraceId, MAX_ID_LEN, SNAPSHOT_ID_LEN};
pub use limits::Limits;
pub use node::{Entry, Mapping, Node, Opaque, OpaqueKind, Scalar, Sequence, Snapshot, Text};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantError {
    EmptyField(&'static str),
    TooLong {
        field: &'static str,
        max: usize,
        got: usize,
    },
    InvalidChar {
        field: &'static str,
        ch: char,
    },
}

impl fmt::Display for InvariantError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyField(field) => write!(f, "{field} must be non-empty"),
            Self::TooLong { field, max, got } => {
                write!(f, "{field} must be at most {max} chars, got {got}")
            }
            Self::InvalidChar { field, ch } => {
                write!(
                    f,
                    "{field} may only contain ASCII alphanumerics, '-' and '_', got {ch:?}"
                )
            }
        }
    }
}

impl Error for InvariantError {}
