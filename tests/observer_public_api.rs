use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use rust_decimal::Decimal;

use payment_observer::observer::{
    Backoff, CheckpointStore, Cursor, EventStream, LedgerClient, MemoryCheckpointStore,
    ObserverConfig, ObserverError, ObserverState, PaymentEvent, ProcessingError,
    ProcessingPipeline, SaveFailurePolicy, StreamError, StreamObserver,
};
use payment_observer::AppConfig;

/// Ledger over a fixed list; cursors are decimal integers
struct ListLedger {
    events: Vec<PaymentEvent>,
}

impl ListLedger {
    fn new(cursors: &[u64]) -> Self {
        let events = cursors
            .iter()
            .map(|n| {
                PaymentEvent::payment(
                    format!("op-{}", n),
                    Cursor::new(n.to_string()),
                    "GSENDER",
                    "GANCHOR",
                    Decimal::new(*n as i64, 0),
                )
            })
            .collect();
        Self { events }
    }
}

#[async_trait]
impl LedgerClient for ListLedger {
    async fn open_stream(&self, after: &Cursor) -> Result<EventStream, StreamError> {
        let start: u64 = after.as_str().parse().unwrap_or(0);
        let items: Vec<Result<PaymentEvent, StreamError>> = self
            .events
            .iter()
            .filter(|e| e.cursor.as_str().parse::<u64>().unwrap_or(0) > start)
            .cloned()
            .map(Ok)
            .collect();
        Ok(stream::iter(items).chain(stream::pending()).boxed())
    }

    async fn head(&self) -> Result<Cursor, StreamError> {
        Ok(self
            .events
            .last()
            .map(|e| e.cursor.clone())
            .unwrap_or_else(|| Cursor::new("0")))
    }
}

/// Fails every event at `poison`, records the rest
struct PoisonPipeline {
    poison: Option<String>,
    seen: Mutex<Vec<String>>,
}

#[async_trait]
impl ProcessingPipeline for PoisonPipeline {
    async fn handle(&self, event: &PaymentEvent) -> Result<(), ProcessingError> {
        self.seen
            .lock()
            .unwrap()
            .push(event.cursor.as_str().to_string());
        if self.poison.as_deref() == Some(event.cursor.as_str()) {
            return Err(ProcessingError::Rejected("poison".into()));
        }
        Ok(())
    }
}

fn config(start: &str, max_retries: u32) -> ObserverConfig {
    ObserverConfig {
        start_cursor: Some(Cursor::new(start)),
        max_retries,
        backoff: Backoff::new(Duration::from_millis(1), Duration::from_millis(4), 2),
        read_timeout: None,
        save_failure_policy: SaveFailurePolicy::Escalate,
    }
}

#[tokio::test]
async fn qa_memory_store_contract() {
    let store: Arc<dyn CheckpointStore> = Arc::new(MemoryCheckpointStore::new());
    assert_eq!(store.load().await.unwrap(), None);

    for c in ["a", "b", "c"] {
        store.save(&Cursor::new(c)).await.unwrap();
    }
    assert_eq!(store.load().await.unwrap(), Some(Cursor::new("c")));
}

#[tokio::test]
async fn qa_observer_checkpoints_through_public_api() {
    let store = Arc::new(MemoryCheckpointStore::new());
    let pipeline = Arc::new(PoisonPipeline {
        poison: None,
        seen: Mutex::new(Vec::new()),
    });
    let observer = Arc::new(StreamObserver::new(
        store.clone(),
        Arc::new(ListLedger::new(&[1, 2, 3])),
        pipeline.clone(),
        config("0", 3),
    ));

    let handle = tokio::spawn({
        let observer = observer.clone();
        async move { observer.run().await }
    });

    tokio::time::timeout(Duration::from_secs(5), async {
        while store.load().await.unwrap() != Some(Cursor::new("3")) {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("checkpoint never reached 3");

    observer.stop();
    handle.await.unwrap().unwrap();
    assert_eq!(observer.state(), ObserverState::Stopped);
    assert_eq!(*pipeline.seen.lock().unwrap(), vec!["1", "2", "3"]);
}

#[tokio::test]
async fn qa_poison_event_halts_without_checkpoint() {
    let store = Arc::new(MemoryCheckpointStore::with_cursor(Cursor::new("6")));
    let pipeline = Arc::new(PoisonPipeline {
        poison: Some("7".into()),
        seen: Mutex::new(Vec::new()),
    });
    let observer = StreamObserver::new(
        store.clone(),
        Arc::new(ListLedger::new(&[5, 6, 7, 8])),
        pipeline.clone(),
        config("0", 3),
    );

    let err = observer.run().await.unwrap_err();
    assert!(matches!(err, ObserverError::RetryBudgetExhausted { attempts: 3, .. }));
    assert!(err.is_terminal());
    assert_eq!(observer.state(), ObserverState::Error);
    assert_eq!(store.load().await.unwrap(), Some(Cursor::new("6")));
    assert_eq!(*pipeline.seen.lock().unwrap(), vec!["7", "7", "7"]);
}

#[test]
fn qa_shipped_dev_config_parses() {
    let config = AppConfig::from_file("config/dev.yaml").expect("config/dev.yaml should parse");
    let observer = config.observer.to_observer_config();
    assert!(observer.max_retries > 0);
    assert_eq!(observer.save_failure_policy, SaveFailurePolicy::Escalate);
}
