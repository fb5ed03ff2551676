//! Payment Observer - resumable ledger payment stream
//!
//! Follows a ledger's payment stream, records incoming payments, and keeps
//! a durable singleton checkpoint so restarts neither lose nor skip events.
//!
//! # Modules
//!
//! - [`observer`] - Checkpoint store, stream observer FSM, ledger/pipeline seams
//! - [`config`] - YAML application configuration
//! - [`logging`] - tracing subscriber setup
//! - [`db`] - PostgreSQL connection pool

pub mod config;
pub mod db;
pub mod logging;
pub mod observer;

// Convenient re-exports at crate root
pub use config::{AppConfig, ConfigError};
pub use observer::{
    CheckpointStore, Cursor, LedgerClient, MemoryCheckpointStore, ObserverConfig, ObserverError,
    ObserverState, PaymentEvent, ProcessingPipeline, StreamObserver,
};
