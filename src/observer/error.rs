use std::time::Duration;
use thiserror::Error;

use super::cursor::Cursor;
use super::state::ObserverState;

/// Checkpoint storage failure. The store never retries; the caller decides.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt checkpoint row: {0}")]
    Corrupt(String),
}

/// Pipeline failure while handling one event
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Event rejected: {0}")]
    Rejected(String),

    #[error("Transient failure: {0}")]
    Transient(String),
}

/// Ledger connectivity or protocol failure
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Ledger connection failed: {0}")]
    Connection(String),

    #[error("Ledger returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode ledger record: {0}")]
    Decode(String),

    #[error("No ledger event within {0:?}")]
    Timeout(Duration),

    #[error("Ledger stream closed")]
    Closed,
}

impl From<reqwest::Error> for StreamError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            StreamError::Decode(e.to_string())
        } else {
            StreamError::Connection(e.to_string())
        }
    }
}

/// Errors that end an observer run
#[derive(Debug, Error)]
pub enum ObserverError {
    #[error("Retry budget exhausted after {attempts} consecutive failures: {last_error}")]
    RetryBudgetExhausted { attempts: u32, last_error: String },

    #[error("Checkpoint of cursor {cursor} failed after {attempts} attempts: {source}")]
    CheckpointFailed {
        cursor: Cursor,
        attempts: u32,
        #[source]
        source: StorageError,
    },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition {
        from: ObserverState,
        to: ObserverState,
    },
}

impl ObserverError {
    /// Errors after which the observer sits in the terminal ERROR state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ObserverError::RetryBudgetExhausted { .. } | ObserverError::CheckpointFailed { .. }
        )
    }
}
