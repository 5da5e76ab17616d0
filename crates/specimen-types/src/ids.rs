use std::fmt;

use facet::Facet;
use rand::Rng;
use rand::distributions::Alphanumeric;

use crate::InvariantError;

/// Longest id accepted by [`TraceId::parse`] and [`SnapshotId::parse`].
pub const MAX_ID_LEN: usize = 64;

/// Length of a generated [`SnapshotId`].
pub const SNAPSHOT_ID_LEN: usize = 12;

const LATE_RECORDS_ID: &str = "late-records";

fn validate(field: &'static str, value: &str) -> Result<(), InvariantError> {
    if value.is_empty() {
        return Err(InvariantError::EmptyField(field));
    }
    let len = value.chars().count();
    if len > MAX_ID_LEN {
        return Err(InvariantError::TooLong {
            field,
            max: MAX_ID_LEN,
            got: len,
        });
    }
    if let Some(ch) = value
        .chars()
        .find(|ch| !(ch.is_ascii_alphanumeric() || *ch == '-' || *ch == '_'))
    {
        return Err(InvariantError::InvalidChar { field, ch });
    }
    Ok(())
}

/// Groups every snapshot captured while handling one unit of work.
#[derive(Facet, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[facet(transparent)]
pub struct TraceId(String);

impl TraceId {
    /// A fresh UUID v4 in its hyphenated lowercase form.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn parse(value: impl Into<String>) -> Result<Self, InvariantError> {
        let value = value.into();
        validate("trace_id", &value)?;
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque key of one stored rendering, unique only within its trace.
///
/// Generated ids are 12 base62 chars with no uniqueness check; a collision
/// overwrites the earlier snapshot of the same trace.
#[derive(Facet, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[facet(transparent)]
pub struct SnapshotId(String);

impl SnapshotId {
    pub fn generate() -> Self {
        let id: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SNAPSHOT_ID_LEN)
            .map(char::from)
            .collect();
        Self(id)
    }

    /// Well-known id for records that arrive after a trace's capture window
    /// closed. Generated ids never contain `-`, so they cannot collide with it.
    pub fn late_records() -> Self {
        Self(LATE_RECORDS_ID.to_string())
    }

    pub fn is_late_records(&self) -> bool {
        self.0 == LATE_RECORDS_ID
    }

    pub fn parse(value: impl Into<String>) -> Result<Self, InvariantError> {
        let value = value.into();
        validate("snapshot_id", &value)?;
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
