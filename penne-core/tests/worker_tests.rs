//! Integration tests for the change feed worker.
//!
//! A channel-backed connection lets each test script the records and faults the
//! worker pulls, and the listener reports every callback back to the test.

use async_trait::async_trait;
use bson::{doc, Document};
use penne_core::binding::{FieldBinding, Mappable};
use penne_core::listener::ChangeFeedListener;
use penne_core::mapper::MappingError;
use penne_core::source::{ChangeFeedOptions, Connection, FeedCursor, StreamFault, TableRef};
use penne_core::worker::{ChangeFeedWorker, WorkerConfig, WorkerError, WorkerState};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Default, PartialEq)]
struct Item {
    id: String,
    qty: i64,
}

impl Mappable for Item {
    const TABLE: Option<&'static str> = Some("items");

    fn bindings() -> &'static [FieldBinding<Self>] {
        static BINDINGS: OnceLock<Vec<FieldBinding<Item>>> = OnceLock::new();
        BINDINGS.get_or_init(|| {
            vec![
                FieldBinding::value("id", |i: &mut Item, id: String| i.id = id),
                FieldBinding::value("qty", |i: &mut Item, qty: i64| i.qty = qty),
            ]
        })
    }
}

#[derive(Debug, Default)]
struct Untabled;

impl Mappable for Untabled {
    fn bindings() -> &'static [FieldBinding<Self>] {
        &[]
    }
}

type Script = mpsc::UnboundedSender<Result<Document, StreamFault>>;

struct ScriptedCursor {
    records: mpsc::UnboundedReceiver<Result<Document, StreamFault>>,
    released: Arc<AtomicBool>,
}

#[async_trait]
impl FeedCursor for ScriptedCursor {
    async fn next(&mut self) -> Result<Option<Document>, StreamFault> {
        match self.records.recv().await {
            Some(Ok(record)) => Ok(Some(record)),
            Some(Err(fault)) => Err(fault),
            None => Err(StreamFault::Closed),
        }
    }

    async fn close(&mut self) -> Result<(), StreamFault> {
        self.released.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct ScriptedConnection {
    database: Option<String>,
    cursor: Mutex<Option<ScriptedCursor>>,
    opened: Mutex<Option<(TableRef, ChangeFeedOptions)>>,
    fail_open: bool,
}

#[async_trait]
impl Connection for ScriptedConnection {
    fn current_database(&self) -> Option<String> {
        self.database.clone()
    }

    async fn open_changes(
        &self,
        table: &TableRef,
        options: &ChangeFeedOptions,
    ) -> Result<Box<dyn FeedCursor>, StreamFault> {
        if self.fail_open {
            return Err(StreamFault::Connection {
                message: "refused".to_string(),
                source: None,
            });
        }
        *self.opened.lock().unwrap() = Some((table.clone(), *options));
        let cursor = self.cursor.lock().unwrap().take().expect("feed opened twice");
        Ok(Box::new(cursor))
    }
}

struct Harness {
    connection: ScriptedConnection,
    script: Script,
    released: Arc<AtomicBool>,
}

fn harness(database: Option<&str>) -> Harness {
    let (script, records) = mpsc::unbounded_channel();
    let released = Arc::new(AtomicBool::new(false));
    Harness {
        connection: ScriptedConnection {
            database: database.map(str::to_string),
            cursor: Mutex::new(Some(ScriptedCursor {
                records,
                released: Arc::clone(&released),
            })),
            opened: Mutex::new(None),
            fail_open: false,
        },
        script,
        released,
    }
}

struct RecordingListener {
    calls: mpsc::UnboundedSender<String>,
}

impl ChangeFeedListener<Item> for RecordingListener {
    fn on_initializing_state(&mut self) {
        let _ = self.calls.send("initializing".to_string());
    }

    fn on_ready_state(&mut self) {
        let _ = self.calls.send("ready".to_string());
    }

    fn on_initial(&mut self, value: Item) {
        let _ = self.calls.send(format!("initial:{}:{}", value.id, value.qty));
    }

    fn on_add(&mut self, value: Item) {
        let _ = self.calls.send(format!("add:{}:{}", value.id, value.qty));
    }

    fn on_change(&mut self, old_value: Item, new_value: Item) {
        let _ = self
            .calls
            .send(format!("change:{}:{}->{}", old_value.id, old_value.qty, new_value.qty));
    }

    fn on_remove(&mut self, value: Item) {
        let _ = self.calls.send(format!("remove:{}", value.id));
    }

    fn on_error(&mut self, error: &MappingError) {
        let _ = self.calls.send(format!("error:{}", error.category()));
    }
}

fn recording_listener() -> (RecordingListener, mpsc::UnboundedReceiver<String>) {
    let (calls, received) = mpsc::unbounded_channel();
    (RecordingListener { calls }, received)
}

fn fast_config() -> WorkerConfig {
    WorkerConfig::builder()
        .pull_timeout(Duration::from_millis(50))
        .initial_backoff(Duration::from_millis(10))
        .max_backoff(Duration::from_millis(50))
        .build()
        .unwrap()
}

async fn next_call(received: &mut mpsc::UnboundedReceiver<String>) -> String {
    tokio::time::timeout(Duration::from_secs(5), received.recv())
        .await
        .expect("listener was not called in time")
        .expect("listener dropped")
}

async fn wait_for_state<T>(worker: &ChangeFeedWorker<T>, state: WorkerState) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while worker.state() != state {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("worker did not reach the expected state");
}

fn item(id: &str, qty: i64) -> Document {
    doc! { "id": id, "qty": qty }
}

#[tokio::test]
async fn test_dispatches_events_in_feed_order() {
    let h = harness(Some("shop"));
    let (listener, mut received) = recording_listener();

    let mut worker = ChangeFeedWorker::<Item>::start(&h.connection, fast_config(), listener)
        .await
        .unwrap();

    let (table, options) = h.connection.opened.lock().unwrap().clone().unwrap();
    assert_eq!(table, TableRef::new("shop", "items"));
    assert_eq!(options, ChangeFeedOptions::all());
    assert_eq!(worker.table().full_name(), "shop.items");

    for record in [
        doc! { "type": "state", "state": "initializing" },
        doc! { "type": "initial", "new_val": item("a", 1) },
        doc! { "type": "state", "state": "ready" },
        doc! { "type": "add", "new_val": item("b", 2) },
        doc! { "type": "change", "old_val": item("b", 2), "new_val": item("b", 5) },
        doc! { "type": "remove", "old_val": item("a", 1) },
    ] {
        h.script.send(Ok(record)).unwrap();
    }

    let mut calls = Vec::new();
    for _ in 0..6 {
        calls.push(next_call(&mut received).await);
    }
    assert_eq!(
        calls,
        vec!["initializing", "initial:a:1", "ready", "add:b:2", "change:b:2->5", "remove:a"]
    );

    worker.close().await.unwrap();
    assert_eq!(worker.state(), WorkerState::Stopped);
    assert!(h.released.load(Ordering::SeqCst));

    let stats = worker.stats();
    assert_eq!(stats.records_pulled, 6);
    assert_eq!(stats.events_dispatched, 6);
    assert_eq!(stats.mapping_failures, 0);
}

#[tokio::test]
async fn test_ready_state_alone() {
    let h = harness(Some("shop"));
    let (listener, mut received) = recording_listener();
    let mut worker = ChangeFeedWorker::<Item>::start(&h.connection, fast_config(), listener)
        .await
        .unwrap();

    h.script.send(Ok(doc! { "type": "state", "state": "ready" })).unwrap();
    assert_eq!(next_call(&mut received).await, "ready");

    worker.close().await.unwrap();
    assert!(received.try_recv().is_err());
}

#[tokio::test]
async fn test_mapping_failure_does_not_stop_worker() {
    let h = harness(Some("shop"));
    let (listener, mut received) = recording_listener();
    let mut worker = ChangeFeedWorker::<Item>::start(&h.connection, fast_config(), listener)
        .await
        .unwrap();

    h.script
        .send(Ok(doc! { "type": "add", "new_val": { "id": "broken" } }))
        .unwrap();
    h.script
        .send(Ok(doc! { "type": "change", "old_val": item("c", 1), "new_val": { "qty": 2 } }))
        .unwrap();
    h.script.send(Ok(doc! { "type": "add", "new_val": item("d", 4) })).unwrap();

    assert_eq!(next_call(&mut received).await, "error:missing_key");
    assert_eq!(next_call(&mut received).await, "error:missing_key");
    assert_eq!(next_call(&mut received).await, "add:d:4");
    assert!(worker.is_running());

    worker.close().await.unwrap();
    let stats = worker.stats();
    assert_eq!(stats.mapping_failures, 2);
    assert_eq!(stats.events_dispatched, 1);
}

#[tokio::test]
async fn test_unrecognized_records_are_skipped() {
    let h = harness(Some("shop"));
    let (listener, mut received) = recording_listener();
    let mut worker = ChangeFeedWorker::<Item>::start(&h.connection, fast_config(), listener)
        .await
        .unwrap();

    h.script.send(Ok(doc! { "type": "uninitial" })).unwrap();
    h.script.send(Ok(doc! { "type": "state", "state": "paused" })).unwrap();
    h.script.send(Ok(doc! { "type": "add" })).unwrap();
    h.script.send(Ok(doc! { "type": "add", "new_val": item("e", 1) })).unwrap();

    assert_eq!(next_call(&mut received).await, "add:e:1");

    worker.close().await.unwrap();
    let stats = worker.stats();
    assert_eq!(stats.records_pulled, 4);
    assert_eq!(stats.records_skipped, 3);
    assert_eq!(stats.events_dispatched, 1);
}

#[tokio::test]
async fn test_stop_on_fault_stops_worker() {
    let h = harness(Some("shop"));
    let (listener, mut received) = recording_listener();
    let config = WorkerConfig::builder()
        .pull_timeout(Duration::from_millis(50))
        .stop_on_fault(true)
        .build()
        .unwrap();
    let mut worker = ChangeFeedWorker::<Item>::start(&h.connection, config, listener)
        .await
        .unwrap();

    h.script
        .send(Err(StreamFault::TableDropped {
            table: "shop.items".to_string(),
        }))
        .unwrap();
    // May land after the worker released the feed
    let _ = h.script.send(Ok(doc! { "type": "add", "new_val": item("f", 1) }));

    wait_for_state(&worker, WorkerState::Stopped).await;
    assert!(h.released.load(Ordering::SeqCst));
    assert_eq!(worker.stats().stream_faults, 1);

    worker.close().await.unwrap();
    assert!(received.try_recv().is_err());
}

#[tokio::test]
async fn test_faults_are_retried_by_default() {
    let h = harness(Some("shop"));
    let (listener, mut received) = recording_listener();
    let mut worker = ChangeFeedWorker::<Item>::start(&h.connection, fast_config(), listener)
        .await
        .unwrap();

    h.script.send(Err(StreamFault::Other("transient".to_string()))).unwrap();
    h.script.send(Err(StreamFault::Other("transient".to_string()))).unwrap();
    h.script.send(Ok(doc! { "type": "add", "new_val": item("g", 3) })).unwrap();

    assert_eq!(next_call(&mut received).await, "add:g:3");
    assert!(worker.is_running());
    assert_eq!(worker.stats().stream_faults, 2);

    worker.close().await.unwrap();
}

struct PanickingListener;

impl ChangeFeedListener<Item> for PanickingListener {
    fn on_initializing_state(&mut self) {}

    fn on_ready_state(&mut self) {}

    fn on_initial(&mut self, _value: Item) {}

    fn on_add(&mut self, value: Item) {
        panic!("listener rejected {}", value.id);
    }

    fn on_change(&mut self, _old_value: Item, _new_value: Item) {}

    fn on_remove(&mut self, _value: Item) {}
}

#[tokio::test]
async fn test_listener_panic_stops_worker() {
    let h = harness(Some("shop"));
    let mut worker =
        ChangeFeedWorker::<Item>::start(&h.connection, fast_config(), PanickingListener)
            .await
            .unwrap();

    h.script.send(Ok(doc! { "type": "add", "new_val": item("p", 1) })).unwrap();

    wait_for_state(&worker, WorkerState::Stopped).await;
    assert!(!worker.is_running());
    assert_eq!(worker.stats().records_pulled, 1);

    assert!(matches!(worker.close().await, Err(WorkerError::Task(_))));
    assert_eq!(worker.state(), WorkerState::Stopped);
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let h = harness(Some("shop"));
    let (listener, _received) = recording_listener();
    let mut worker = ChangeFeedWorker::<Item>::start(&h.connection, fast_config(), listener)
        .await
        .unwrap();

    assert_eq!(worker.state(), WorkerState::Running);
    worker.close().await.unwrap();
    worker.close().await.unwrap();
    assert_eq!(worker.state(), WorkerState::Stopped);
}

#[tokio::test]
async fn test_close_returns_while_feed_is_idle() {
    let h = harness(Some("shop"));
    let (listener, _received) = recording_listener();
    let mut worker = ChangeFeedWorker::<Item>::start(&h.connection, fast_config(), listener)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(worker.stats().pull_timeouts >= 1);

    tokio::time::timeout(Duration::from_secs(2), worker.close())
        .await
        .expect("close did not return within the pull timeout")
        .unwrap();
    assert!(h.released.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_close_interrupts_backoff() {
    let h = harness(Some("shop"));
    let (listener, _received) = recording_listener();
    let config = WorkerConfig::builder()
        .pull_timeout(Duration::from_millis(50))
        .initial_backoff(Duration::from_secs(60))
        .max_backoff(Duration::from_secs(60))
        .build()
        .unwrap();
    let mut worker = ChangeFeedWorker::<Item>::start(&h.connection, config, listener)
        .await
        .unwrap();

    h.script.send(Err(StreamFault::Other("transient".to_string()))).unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while worker.stats().stream_faults == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    tokio::time::timeout(Duration::from_secs(2), worker.close())
        .await
        .expect("close waited for the full backoff")
        .unwrap();
}

#[tokio::test]
async fn test_drop_requests_stop() {
    let h = harness(Some("shop"));
    let (listener, _received) = recording_listener();
    let worker = ChangeFeedWorker::<Item>::start(&h.connection, fast_config(), listener)
        .await
        .unwrap();

    drop(worker);

    tokio::time::timeout(Duration::from_secs(5), async {
        while !h.released.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("dropped worker did not release its feed");
}

#[tokio::test]
async fn test_explicit_table_and_database_override() {
    let h = harness(None);
    let (listener, _received) = recording_listener();
    let config = WorkerConfig::builder()
        .database("archive")
        .table("old_items")
        .pull_timeout(Duration::from_millis(50))
        .build()
        .unwrap();

    let mut worker = ChangeFeedWorker::<Item>::start(&h.connection, config, listener)
        .await
        .unwrap();
    assert_eq!(worker.table(), &TableRef::new("archive", "old_items"));
    worker.close().await.unwrap();
}

#[tokio::test]
async fn test_no_database_is_configuration_error() {
    let h = harness(None);
    let (listener, _received) = recording_listener();

    let result = ChangeFeedWorker::<Item>::start(&h.connection, fast_config(), listener).await;
    assert!(matches!(result, Err(WorkerError::Configuration(_))));
    assert!(h.connection.opened.lock().unwrap().is_none());
}

#[tokio::test]
async fn test_no_table_is_configuration_error() {
    struct Silent;

    impl ChangeFeedListener<Untabled> for Silent {
        fn on_initializing_state(&mut self) {}
        fn on_ready_state(&mut self) {}
        fn on_initial(&mut self, _value: Untabled) {}
        fn on_add(&mut self, _value: Untabled) {}
        fn on_change(&mut self, _old_value: Untabled, _new_value: Untabled) {}
        fn on_remove(&mut self, _value: Untabled) {}
    }

    let h = harness(Some("shop"));
    let result = ChangeFeedWorker::<Untabled>::start(&h.connection, fast_config(), Silent).await;
    assert!(matches!(result, Err(WorkerError::Configuration(_))));
}

#[tokio::test]
async fn test_open_failure_is_reported() {
    let mut h = harness(Some("shop"));
    h.connection.fail_open = true;
    let (listener, _received) = recording_listener();

    let result = ChangeFeedWorker::<Item>::start(&h.connection, fast_config(), listener).await;
    match result {
        Err(WorkerError::Open { table, source }) => {
            assert_eq!(table, "shop.items");
            assert_eq!(source.category(), "connection");
        }
        other => panic!("unexpected result: {:?}", other.map(|w| w.stats())),
    }
}
