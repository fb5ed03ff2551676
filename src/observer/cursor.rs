//! Cursor and checkpoint record types

use chrono::{DateTime, Utc};
use std::fmt;

/// Fixed key of the only checkpoint row.
pub const SINGLETON_ID: i16 = 1;

/// Opaque position in the ledger's event log.
///
/// The observer never interprets the token; only the ledger client knows
/// how to resume a stream from it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Cursor {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Cursor {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// The singleton checkpoint row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointRecord {
    pub id: i16,
    pub cursor: Cursor,
    /// Last write time, observability only
    pub updated_at: Option<DateTime<Utc>>,
}

impl CheckpointRecord {
    pub fn new(cursor: Cursor, updated_at: Option<DateTime<Utc>>) -> Self {
        Self {
            id: SINGLETON_ID,
            cursor,
            updated_at,
        }
    }
}
