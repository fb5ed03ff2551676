//! Stream Observer - Main processing loop
//!
//! Loads the checkpoint, opens the ledger stream just after it, hands each
//! event to the pipeline and checkpoints its cursor only after the pipeline
//! succeeded. One event at a time, in ledger order.
//!
//! Exactly one observer may be active per checkpoint row. Nothing here
//! detects a second one.

use futures::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tracing::{debug, error, info, warn};

use super::backoff::Backoff;
use super::cursor::Cursor;
use super::error::{ObserverError, StreamError};
use super::ledger::{EventStream, LedgerClient, PaymentEvent};
use super::pipeline::ProcessingPipeline;
use super::state::ObserverState;
use super::store::CheckpointStore;

/// What to do when a checkpoint cannot be saved after the event was processed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveFailurePolicy {
    /// Retry with backoff, then enter ERROR
    #[default]
    Escalate,
    /// Retry with backoff, then keep streaming; the next checkpoint covers
    /// the gap, at the price of more redelivery after a crash
    BestEffort,
}

#[derive(Debug, Clone)]
pub struct ObserverConfig {
    /// Where to start when no checkpoint exists; `None` is the ledger head
    pub start_cursor: Option<Cursor>,
    /// Consecutive failures tolerated; reaching it enters ERROR
    pub max_retries: u32,
    pub backoff: Backoff,
    /// Longest wait for the next event before the stream is re-opened
    pub read_timeout: Option<Duration>,
    pub save_failure_policy: SaveFailurePolicy,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            start_cursor: None,
            max_retries: 10,
            backoff: Backoff::default(),
            read_timeout: Some(Duration::from_secs(300)),
            save_failure_policy: SaveFailurePolicy::Escalate,
        }
    }
}

/// Cooperative stop request, honored between events
pub struct ShutdownSignal {
    requested: AtomicBool,
    notify: Notify,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self {
            requested: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Request shutdown
    pub fn request_shutdown(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Check if shutdown was requested
    pub fn is_shutdown_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Clear a previous request so a stopped observer can run again
    pub fn reset(&self) {
        self.requested.store(false, Ordering::SeqCst);
    }

    /// Resolves once shutdown is requested
    pub async fn wait(&self) {
        loop {
            // Register before checking the flag so a concurrent request is not missed
            let notified = self.notify.notified();
            if self.is_shutdown_requested() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

enum Outcome {
    Checkpointed(Cursor),
    /// Processed, checkpoint given up under `BestEffort`
    Unsaved,
    /// Stop requested while backing off; event not processed
    Stopped,
}

pub struct StreamObserver {
    store: Arc<dyn CheckpointStore>,
    ledger: Arc<dyn LedgerClient>,
    pipeline: Arc<dyn ProcessingPipeline>,
    config: ObserverConfig,
    shutdown: Arc<ShutdownSignal>,
    state: watch::Sender<ObserverState>,
}

impl StreamObserver {
    pub fn new(
        store: Arc<dyn CheckpointStore>,
        ledger: Arc<dyn LedgerClient>,
        pipeline: Arc<dyn ProcessingPipeline>,
        config: ObserverConfig,
    ) -> Self {
        let (state, _) = watch::channel(ObserverState::Stopped);
        Self {
            store,
            ledger,
            pipeline,
            config,
            shutdown: Arc::new(ShutdownSignal::new()),
            state,
        }
    }

    pub fn state(&self) -> ObserverState {
        *self.state.borrow()
    }

    /// Watch state changes
    pub fn subscribe(&self) -> watch::Receiver<ObserverState> {
        self.state.subscribe()
    }

    pub fn shutdown_signal(&self) -> Arc<ShutdownSignal> {
        self.shutdown.clone()
    }

    /// Ask the loop to stop after the event in flight
    pub fn stop(&self) {
        self.shutdown.request_shutdown();
    }

    /// Run until stopped (`Ok`) or until the retry budget is spent (`Err`,
    /// state ERROR).
    ///
    /// A stopped observer may be run again; any stop request left over from
    /// the previous run is cleared once STARTING is entered.
    pub async fn run(&self) -> Result<(), ObserverError> {
        self.transition(ObserverState::Starting)?;
        self.shutdown.reset();
        info!(
            max_retries = self.config.max_retries,
            save_failure_policy = ?self.config.save_failure_policy,
            "Observer starting"
        );

        let mut failures = 0u32;

        let Some(mut resume) = self.resume_position(&mut failures).await? else {
            return self.halt();
        };

        'session: loop {
            let mut stream = match self.ledger.open_stream(&resume).await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(error = %e, "Failed to open ledger stream");
                    if !self.back_off(&mut failures, &e.to_string()).await? {
                        return self.halt();
                    }
                    self.transition(ObserverState::Starting)?;
                    continue 'session;
                }
            };
            self.transition(ObserverState::Streaming)?;
            debug!(after = %resume, "Ledger stream open");

            loop {
                let next = tokio::select! {
                    biased;
                    _ = self.shutdown.wait() => return self.halt(),
                    next = self.next_event(&mut stream) => next,
                };

                let event = match next {
                    Ok(event) => event,
                    Err(StreamError::Timeout(idle)) => {
                        // Idle ledger: reconnect without spending retry budget
                        debug!(idle_ms = idle.as_millis() as u64, "No ledger event, re-opening stream");
                        self.transition(ObserverState::Backoff)?;
                        if !self.sleep_unless_stopped(self.config.backoff.initial).await {
                            return self.halt();
                        }
                        self.transition(ObserverState::Starting)?;
                        continue 'session;
                    }
                    Err(e) => {
                        warn!(
                            error = %e,
                            resume = %resume,
                            "Ledger stream failed, re-opening after last checkpoint"
                        );
                        if !self.back_off(&mut failures, &e.to_string()).await? {
                            return self.halt();
                        }
                        self.transition(ObserverState::Starting)?;
                        continue 'session;
                    }
                };

                match self.process(event, &mut failures).await? {
                    Outcome::Checkpointed(cursor) => resume = cursor,
                    Outcome::Unsaved => {}
                    Outcome::Stopped => return self.halt(),
                }
            }
        }
    }

    /// Where the first stream opens: after the checkpoint, else after the
    /// configured start cursor, else after the ledger head resolved now.
    /// The head is pinned once so later re-opens cannot jump past events
    /// that arrive during an outage.
    ///
    /// `Ok(None)` when a stop was requested while backing off.
    async fn resume_position(&self, failures: &mut u32) -> Result<Option<Cursor>, ObserverError> {
        loop {
            let fault = match self.store.load().await {
                Ok(Some(cursor)) => {
                    info!(cursor = %cursor, "Resuming after checkpoint");
                    return Ok(Some(cursor));
                }
                Ok(None) => match &self.config.start_cursor {
                    Some(start) => {
                        info!(start = %start, "No checkpoint yet, using configured start position");
                        return Ok(Some(start.clone()));
                    }
                    None => match self.ledger.head().await {
                        Ok(head) => {
                            info!(head = %head, "No checkpoint yet, starting after the ledger head");
                            return Ok(Some(head));
                        }
                        Err(e) => {
                            warn!(error = %e, "Failed to resolve ledger head");
                            e.to_string()
                        }
                    },
                },
                Err(e) => {
                    warn!(error = %e, "Failed to load checkpoint");
                    e.to_string()
                }
            };

            if !self.back_off(failures, &fault).await? {
                return Ok(None);
            }
            self.transition(ObserverState::Starting)?;
        }
    }

    async fn next_event(&self, stream: &mut EventStream) -> Result<PaymentEvent, StreamError> {
        let next = match self.config.read_timeout {
            Some(limit) => tokio::time::timeout(limit, stream.next())
                .await
                .map_err(|_| StreamError::Timeout(limit))?,
            None => stream.next().await,
        };
        next.unwrap_or(Err(StreamError::Closed))
    }

    /// Handle one event until it succeeds, then checkpoint it
    async fn process(
        &self,
        event: PaymentEvent,
        failures: &mut u32,
    ) -> Result<Outcome, ObserverError> {
        loop {
            match self.pipeline.handle(&event).await {
                Ok(()) => break,
                Err(e) => {
                    warn!(
                        cursor = %event.cursor,
                        event_id = %event.id,
                        error = %e,
                        "Processing failed, cursor not advanced"
                    );
                    if !self.back_off(failures, &e.to_string()).await? {
                        return Ok(Outcome::Stopped);
                    }
                    self.transition(ObserverState::Streaming)?;
                }
            }
        }

        *failures = 0;
        self.checkpoint(&event.cursor).await
    }

    /// Save the cursor of a processed event. Not interruptible by a stop:
    /// the in-flight event is drained including its checkpoint.
    async fn checkpoint(&self, cursor: &Cursor) -> Result<Outcome, ObserverError> {
        let mut attempts = 0u32;
        loop {
            let err = match self.store.save(cursor).await {
                Ok(()) => {
                    debug!(cursor = %cursor, "Checkpoint saved");
                    return Ok(Outcome::Checkpointed(cursor.clone()));
                }
                Err(e) => e,
            };

            attempts += 1;
            self.transition(ObserverState::Backoff)?;

            if attempts >= self.config.max_retries {
                match self.config.save_failure_policy {
                    SaveFailurePolicy::Escalate => {
                        self.transition(ObserverState::Error)?;
                        error!(
                            cursor = %cursor,
                            attempts,
                            error = %err,
                            "Checkpoint failed after processing, observer halted"
                        );
                        return Err(ObserverError::CheckpointFailed {
                            cursor: cursor.clone(),
                            attempts,
                            source: err,
                        });
                    }
                    SaveFailurePolicy::BestEffort => {
                        error!(
                            cursor = %cursor,
                            attempts,
                            error = %err,
                            "Checkpoint failed after processing, continuing without it"
                        );
                        self.transition(ObserverState::Streaming)?;
                        return Ok(Outcome::Unsaved);
                    }
                }
            }

            let delay = self.config.backoff.delay(attempts);
            warn!(
                cursor = %cursor,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Checkpoint save failed, retrying"
            );
            tokio::time::sleep(delay).await;
            self.transition(ObserverState::Streaming)?;
        }
    }

    /// Count a fault and enter BACKOFF, or ERROR once the budget is spent.
    ///
    /// Returns `Ok(false)` when a stop was requested during the delay.
    async fn back_off(&self, failures: &mut u32, fault: &str) -> Result<bool, ObserverError> {
        *failures += 1;
        self.transition(ObserverState::Backoff)?;

        if *failures >= self.config.max_retries {
            self.transition(ObserverState::Error)?;
            error!(
                attempts = *failures,
                error = fault,
                "Retry budget exhausted, observer halted"
            );
            return Err(ObserverError::RetryBudgetExhausted {
                attempts: *failures,
                last_error: fault.to_string(),
            });
        }

        let delay = self.config.backoff.delay(*failures);
        debug!(
            attempt = *failures,
            max_retries = self.config.max_retries,
            delay_ms = delay.as_millis() as u64,
            "Backing off"
        );
        Ok(self.sleep_unless_stopped(delay).await)
    }

    async fn sleep_unless_stopped(&self, delay: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.shutdown.wait() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    fn halt(&self) -> Result<(), ObserverError> {
        self.transition(ObserverState::Stopped)?;
        info!("Observer stopped");
        Ok(())
    }

    fn transition(&self, next: ObserverState) -> Result<(), ObserverError> {
        let mut from = next;
        let changed = self.state.send_if_modified(|current| {
            from = *current;
            if current.can_transition_to(next) {
                *current = next;
                true
            } else {
                false
            }
        });

        if !changed {
            return Err(ObserverError::InvalidStateTransition { from, to: next });
        }
        debug!(from = %from, to = %next, "Observer state transition");
        Ok(())
    }
}
