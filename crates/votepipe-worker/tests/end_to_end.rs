use async_trait::async_trait;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use votepipe_core::{BackoffConfig, Choice, QueueConfig, StoreConfig, Tally, VoteSubmission, WorkerConfig};
use votepipe_db::{InMemoryConnector, StoreError, VoteStore};
use votepipe_queue::{
    InMemoryBackend, InMemoryBroker, Producer, QueueBackend, QueueConnector, QueueError, WorkQueue,
};
use votepipe_worker::{Shutdown, Worker, WorkerError, WorkerState, WorkerStats};

const TOPIC: &str = "queue";

fn worker_config() -> WorkerConfig {
    WorkerConfig {
        topic: TOPIC.to_string(),
        backoff: BackoffConfig::new(Duration::from_millis(1), 3),
        shutdown_grace: Duration::from_secs(1),
        ..WorkerConfig::default()
    }
}

fn build_worker(broker: &InMemoryBroker, connector: Arc<InMemoryConnector>) -> Arc<Worker> {
    let store = VoteStore::with_connector(StoreConfig::standard(), connector).unwrap();
    Arc::new(Worker::new(
        worker_config(),
        store,
        Arc::new(broker.clone()),
        Shutdown::new(),
    ))
}

fn spawn_run(worker: &Arc<Worker>) -> tokio::task::JoinHandle<Result<(), WorkerError>> {
    let worker = worker.clone();
    tokio::spawn(async move { worker.run().await })
}

/// Hands out in-memory connections and keeps the last one, so a test can drop it
/// from under the worker.
#[derive(Default)]
struct RecordingConnector {
    broker: InMemoryBroker,
    opened: Mutex<Option<Arc<InMemoryBackend>>>,
}

impl RecordingConnector {
    fn opened(&self) -> Arc<InMemoryBackend> {
        self.opened.lock().unwrap().clone().expect("no connection opened yet")
    }
}

#[async_trait]
impl QueueConnector for RecordingConnector {
    async fn open(&self, _config: &QueueConfig) -> Result<Arc<dyn QueueBackend>, QueueError> {
        let backend = self.broker.backend();
        *self.opened.lock().unwrap() = Some(backend.clone());
        Ok(backend)
    }
}

/// A connection whose server resets it on the first blocking pop.
struct ResettingBackend;

#[async_trait]
impl QueueBackend for ResettingBackend {
    async fn push(&self, _topic: &str, _payload: String) -> Result<(), QueueError> {
        Ok(())
    }

    async fn pop(&self, _topic: &str, _timeout: Duration) -> Result<Option<String>, QueueError> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        Err(QueueError::Connection("connection reset by peer".to_string()))
    }

    async fn ping(&self) -> Result<String, QueueError> {
        Ok("PONG".to_string())
    }

    async fn quit(&self) -> Result<(), QueueError> {
        Ok(())
    }

    async fn disconnect(&self) {}

    fn name(&self) -> &'static str {
        "resetting"
    }
}

struct ResettingConnector;

#[async_trait]
impl QueueConnector for ResettingConnector {
    async fn open(&self, _config: &QueueConfig) -> Result<Arc<dyn QueueBackend>, QueueError> {
        Ok(Arc::new(ResettingBackend))
    }
}

fn producer(broker: &InMemoryBroker) -> Producer {
    Producer::new(WorkQueue::with_backend(
        TOPIC,
        QueueConfig::default(),
        broker.backend(),
    ))
}

async fn wait_for_state(worker: &Worker, state: WorkerState) {
    let mut rx = worker.watch_state();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == state))
        .await
        .expect("worker did not reach the expected state")
        .unwrap();
}

async fn wait_for_stats(worker: &Worker, expected: WorkerStats) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while worker.stats() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("stats stuck at {:?}", worker.stats()));
}

#[tokio::test]
async fn votes_flow_from_queue_to_tally() {
    let broker = InMemoryBroker::new();
    let worker = build_worker(&broker, Arc::new(InMemoryConnector::new()));
    let running = {
        let worker = worker.clone();
        tokio::spawn(async move { worker.run().await })
    };
    wait_for_state(&worker, WorkerState::Running).await;

    let producer = producer(&broker);
    for (i, choice) in [Choice::A, Choice::A, Choice::A, Choice::B, Choice::B]
        .into_iter()
        .enumerate()
    {
        let vote = VoteSubmission::new(choice).with_voter_id(format!("voter-{i}"));
        producer.send_json(&vote).await.unwrap();
    }
    producer.send("definitely not json").await.unwrap();
    producer.send(json!({ "choice": "c" })).await.unwrap();

    wait_for_stats(&worker, WorkerStats { processed: 5, rejected: 2 }).await;
    assert_eq!(worker.store().tally_votes().await.unwrap(), Tally::new(3, 2));

    worker.shutdown_handle().request();
    running.await.unwrap().unwrap();

    assert_eq!(worker.state(), WorkerState::Stopped);
    assert!(!worker.store().is_connected());
    assert!(broker.is_empty(TOPIC));
}

#[tokio::test]
async fn backlog_is_processed_in_order() {
    let broker = InMemoryBroker::new();
    let connector = Arc::new(InMemoryConnector::new());
    let producer = producer(&broker);

    for choice in [Choice::A, Choice::B, Choice::A] {
        producer
            .send_json(&VoteSubmission::new(choice).with_voter_id("same-voter"))
            .await
            .unwrap();
    }

    let worker = build_worker(&broker, connector.clone());
    let running = {
        let worker = worker.clone();
        tokio::spawn(async move { worker.run().await })
    };
    wait_for_stats(&worker, WorkerStats { processed: 3, rejected: 0 }).await;

    let stored = connector.repository().get("same-voter").await.unwrap();
    assert_eq!(stored.choice, Choice::A);
    assert_eq!(worker.store().tally_votes().await.unwrap(), Tally::new(1, 0));

    worker.shutdown_handle().request();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn store_retries_transient_failures_before_running() {
    let broker = InMemoryBroker::new();
    let connector = Arc::new(InMemoryConnector::new().with_transient_failures(2));
    let worker = build_worker(&broker, connector.clone());
    let running = {
        let worker = worker.clone();
        tokio::spawn(async move { worker.run().await })
    };

    wait_for_state(&worker, WorkerState::Running).await;
    assert_eq!(connector.attempts(), 3);

    worker.shutdown_handle().request();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn unreachable_store_fails_initialization() {
    let broker = InMemoryBroker::new();
    let worker = build_worker(&broker, Arc::new(InMemoryConnector::new().with_permanent_failure()));

    let err = worker.run().await.unwrap_err();

    assert!(matches!(
        err,
        WorkerError::Store(StoreError::Connection { transient: false, .. })
    ));
    assert_eq!(err.exit_code(), 1);
    assert_eq!(worker.state(), WorkerState::Stopped);
}

#[tokio::test]
async fn shutdown_during_initialization_stops_cleanly() {
    let broker = InMemoryBroker::new();
    let connector = Arc::new(InMemoryConnector::new().with_transient_failures(100));
    let store = VoteStore::with_connector(StoreConfig::standard(), connector.clone()).unwrap();
    let config = WorkerConfig {
        backoff: BackoffConfig::new(Duration::from_millis(50), 10),
        ..worker_config()
    };
    let worker = Arc::new(Worker::new(config, store, Arc::new(broker.clone()), Shutdown::new()));
    let running = {
        let worker = worker.clone();
        tokio::spawn(async move { worker.run().await })
    };

    tokio::time::sleep(Duration::from_millis(30)).await;
    worker.shutdown_handle().request();

    tokio::time::timeout(Duration::from_secs(2), running)
        .await
        .expect("worker should stop promptly")
        .unwrap()
        .unwrap();
    assert_eq!(worker.state(), WorkerState::Stopped);
    assert!(!worker.store().is_connected());
}

#[tokio::test]
async fn messages_sent_after_shutdown_stay_queued() {
    let broker = InMemoryBroker::new();
    let worker = build_worker(&broker, Arc::new(InMemoryConnector::new()));
    let running = {
        let worker = worker.clone();
        tokio::spawn(async move { worker.run().await })
    };
    wait_for_state(&worker, WorkerState::Running).await;

    worker.shutdown_handle().request();
    running.await.unwrap().unwrap();

    producer(&broker)
        .send_json(&VoteSubmission::new(Choice::B))
        .await
        .unwrap();
    assert_eq!(broker.len(TOPIC), 1);
    assert_eq!(worker.stats(), WorkerStats::default());
}

#[tokio::test]
async fn drain_waits_for_the_write_in_progress() {
    let broker = InMemoryBroker::new();
    let connector =
        Arc::new(InMemoryConnector::new().with_write_latency(Duration::from_millis(300)));
    let worker = build_worker(&broker, connector.clone());
    let running = spawn_run(&worker);
    wait_for_state(&worker, WorkerState::Running).await;

    producer(&broker)
        .send_json(&VoteSubmission::new(Choice::B).with_voter_id("slow-voter"))
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(2), async {
        while connector.repository().writes_in_flight() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("write never started");

    worker.shutdown_handle().request();
    running.await.unwrap().unwrap();

    assert_eq!(worker.state(), WorkerState::Stopped);
    assert_eq!(worker.stats(), WorkerStats { processed: 1, rejected: 0 });
    let stored = connector.repository().get("slow-voter").await.unwrap();
    assert_eq!(stored.choice, Choice::B);
}

#[tokio::test]
async fn drain_gives_up_on_a_write_after_the_grace_period() {
    let broker = InMemoryBroker::new();
    let connector = Arc::new(InMemoryConnector::new().with_write_latency(Duration::from_secs(30)));
    let store = VoteStore::with_connector(StoreConfig::standard(), connector.clone()).unwrap();
    let config = WorkerConfig {
        shutdown_grace: Duration::from_millis(200),
        ..worker_config()
    };
    let worker = Arc::new(Worker::new(config, store, Arc::new(broker.clone()), Shutdown::new()));
    let running = spawn_run(&worker);
    wait_for_state(&worker, WorkerState::Running).await;

    producer(&broker)
        .send_json(&VoteSubmission::new(Choice::A).with_voter_id("stuck-voter"))
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(2), async {
        while connector.repository().writes_in_flight() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("write never started");

    worker.shutdown_handle().request();
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("worker should stop once the grace period runs out")
        .unwrap()
        .unwrap();

    assert_eq!(worker.state(), WorkerState::Stopped);
    assert!(!worker.store().is_connected());
    assert_eq!(connector.repository().writes_in_flight(), 0);
    assert!(connector.repository().get("stuck-voter").await.is_none());
    assert_eq!(worker.stats(), WorkerStats::default());
}

#[tokio::test]
async fn queue_closing_while_running_stops_with_an_error() {
    let queue = Arc::new(RecordingConnector::default());
    let store =
        VoteStore::with_connector(StoreConfig::standard(), Arc::new(InMemoryConnector::new()))
            .unwrap();
    let worker = Arc::new(Worker::new(worker_config(), store, queue.clone(), Shutdown::new()));
    let running = spawn_run(&worker);
    wait_for_state(&worker, WorkerState::Running).await;

    queue.opened().disconnect().await;

    let err = tokio::time::timeout(Duration::from_secs(2), running)
        .await
        .expect("worker should notice the closed queue")
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, WorkerError::QueueClosed));
    assert_eq!(err.exit_code(), 1);
    assert!(worker.shutdown_handle().is_quitting());
    assert_eq!(worker.state(), WorkerState::Stopped);
    assert!(!worker.store().is_connected());
}

#[tokio::test]
async fn queue_connection_error_stops_with_an_error() {
    let store =
        VoteStore::with_connector(StoreConfig::standard(), Arc::new(InMemoryConnector::new()))
            .unwrap();
    let worker = Arc::new(Worker::new(
        worker_config(),
        store,
        Arc::new(ResettingConnector),
        Shutdown::new(),
    ));

    let err = tokio::time::timeout(Duration::from_secs(2), worker.run())
        .await
        .expect("worker should stop on a connection error")
        .unwrap_err();

    assert!(matches!(err, WorkerError::Queue(QueueError::Connection(_))));
    assert_eq!(err.exit_code(), 1);
    assert_eq!(worker.state(), WorkerState::Stopped);
}
