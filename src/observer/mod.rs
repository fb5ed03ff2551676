//! Resumable Payment Stream Observer
//!
//! Follows an ordered stream of ledger payment events and survives restarts
//! without skipping any of them.
//!
//! # Architecture
//!
//! ```text
//! CheckpointStore.load() (or start cursor, or LedgerClient.head())
//!     → LedgerClient.open_stream(after) → for each event:
//!     ProcessingPipeline.handle(event) → CheckpointStore.save(event.cursor)
//! ```
//!
//! # Guarantees
//!
//! 1. **Checkpoint-After-Processing**: a cursor is saved only after its event
//!    was handled, so a crash in between redelivers it (at-least-once).
//! 2. **Strict Order**: one event at a time; a cursor at N implies every
//!    event up to N was processed.
//! 3. **Singleton Row**: the store holds one row keyed by [`SINGLETON_ID`],
//!    written with an atomic upsert.
//! 4. **Single Observer**: one active observer per row is an operational
//!    invariant and is not enforced here. Administrative resets must not run
//!    while an observer is active.

pub mod backoff;
pub mod cursor;
pub mod error;
pub mod horizon;
pub mod ledger;
pub mod pg_store;
pub mod pipeline;
pub mod state;
pub mod store;
pub mod worker;


// Re-exports for convenience
pub use backoff::Backoff;
pub use cursor::{CheckpointRecord, Cursor, SINGLETON_ID};
pub use error::{ObserverError, ProcessingError, StorageError, StreamError};
pub use horizon::{HorizonConfig, HorizonLedger};
pub use ledger::{Asset, EventStream, LedgerClient, PaymentEvent, PaymentKind};
pub use pg_store::PgCheckpointStore;
pub use pipeline::{PaymentRecorder, ProcessingPipeline};
pub use state::ObserverState;
pub use store::{CheckpointStore, MemoryCheckpointStore};
pub use worker::{ObserverConfig, SaveFailurePolicy, ShutdownSignal, StreamObserver};
