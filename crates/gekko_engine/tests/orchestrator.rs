use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use gekko_engine::{
    BackendError, ChannelSink, EngineEvent, FailureKind, FetchError, Fetcher, Orchestrator,
    OrchestratorConfig, PageFetch, RetrieveError,
};
use pretty_assertions::assert_eq;

#[derive(Debug, Clone)]
enum Behaviour {
    Succeed,
    Delay(u64),
    Fail(FailureKind),
    Hang,
    Panic,
}

struct ActiveGuard {
    active: Arc<AtomicUsize>,
}

impl ActiveGuard {
    fn enter(active: &Arc<AtomicUsize>, max_active: &AtomicUsize) -> Self {
        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
        max_active.fetch_max(now, Ordering::SeqCst);
        Self {
            active: active.clone(),
        }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct StubFetcher {
    behaviours: HashMap<String, Behaviour>,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
    calls: Arc<AtomicUsize>,
    started: Option<Mutex<mpsc::Sender<String>>>,
}

impl StubFetcher {
    fn new() -> Self {
        Self::default()
    }

    fn with(mut self, url: &str, behaviour: Behaviour) -> Self {
        self.behaviours.insert(url.to_string(), behaviour);
        self
    }

    fn notify_start(mut self, tx: mpsc::Sender<String>) -> Self {
        self.started = Some(Mutex::new(tx));
        self
    }
}

#[async_trait::async_trait]
impl Fetcher for StubFetcher {
    async fn fetch(&self, url: &str) -> Result<PageFetch, FetchError> {
        let _guard = ActiveGuard::enter(&self.active, &self.max_active);
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(tx) = &self.started {
            let _ = tx.lock().unwrap().send(url.to_string());
        }

        let behaviour = self
            .behaviours
            .get(url)
            .cloned()
            .unwrap_or(Behaviour::Succeed);
        match behaviour {
            Behaviour::Succeed => {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(PageFetch::new(url, url.as_bytes().to_vec(), 1, 2))
            }
            Behaviour::Delay(ms) => {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(PageFetch::new(url, url.as_bytes().to_vec(), 1, 2))
            }
            Behaviour::Fail(kind) => Err(FetchError::new(kind, "stub failure")),
            Behaviour::Hang => std::future::pending().await,
            Behaviour::Panic => panic!("stub transport bug"),
        }
    }
}

fn config(concurrency: i64, deadline: Duration) -> OrchestratorConfig {
    OrchestratorConfig {
        concurrency: Some(concurrency),
        batch_deadline: deadline,
    }
}

fn start(stub: StubFetcher, concurrency: i64) -> Orchestrator {
    gekko_logging::initialize_for_tests();
    Orchestrator::new(config(concurrency, Duration::from_secs(10)), Arc::new(stub))
        .expect("orchestrator")
}

fn success_urls(batch: &gekko_engine::BatchResult) -> BTreeSet<String> {
    batch.successes.iter().map(|p| p.url.clone()).collect()
}

#[test]
fn recognized_failure_is_partitioned_from_successes() {
    let stub = StubFetcher::new().with(
        "https://b.test/",
        Behaviour::Fail(FailureKind::HttpStatus(404)),
    );
    let orchestrator = start(stub, 4);

    let batch = orchestrator
        .retrieve(["https://a.test/", "https://b.test/", "https://c.test/"])
        .expect("batch");

    assert_eq!(
        success_urls(&batch),
        BTreeSet::from(["https://a.test/".to_string(), "https://c.test/".to_string()])
    );
    assert_eq!(
        batch.failed_urls,
        BTreeSet::from(["https://b.test/".to_string()])
    );
    orchestrator.shutdown();
}

#[test]
fn every_url_lands_in_exactly_one_bucket() {
    let failures = [
        FailureKind::HttpStatus(500),
        FailureKind::Timeout,
        FailureKind::Network,
        FailureKind::InvalidUrl,
        FailureKind::Cancelled,
    ];
    for (round, concurrency) in [1, 3, 8].into_iter().enumerate() {
        let urls: Vec<String> = (0..24)
            .map(|i| format!("https://site{i}.test/r{round}"))
            .collect();
        let mut stub = StubFetcher::new();
        for (i, url) in urls.iter().enumerate() {
            if (i + round) % 3 == 0 {
                stub = stub.with(url, Behaviour::Fail(failures[i % failures.len()].clone()));
            } else if i % 4 == 0 {
                stub = stub.with(url, Behaviour::Delay(15));
            }
        }
        let orchestrator = start(stub, concurrency);

        let batch = orchestrator.retrieve(urls.clone()).expect("batch");

        let successes = success_urls(&batch);
        assert_eq!(successes.len(), batch.successes.len(), "duplicate success");
        assert!(successes.is_disjoint(&batch.failed_urls));
        let covered: BTreeSet<String> = successes.union(&batch.failed_urls).cloned().collect();
        assert_eq!(covered, urls.iter().cloned().collect::<BTreeSet<_>>());
        assert_eq!(batch.len(), urls.len());
        orchestrator.shutdown();
    }
}

#[test]
fn duplicate_urls_are_fetched_once() {
    let stub = StubFetcher::new();
    let calls = stub.calls.clone();
    let orchestrator = start(stub, 2);

    let batch = orchestrator
        .retrieve(["https://a.test/", "https://a.test/", "https://b.test/"])
        .expect("batch");

    assert_eq!(batch.successes.len(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    orchestrator.shutdown();
}

#[test]
fn successes_arrive_in_completion_order() {
    let stub = StubFetcher::new()
        .with("https://slow.test/", Behaviour::Delay(300))
        .with("https://fast.test/", Behaviour::Delay(5));
    let orchestrator = start(stub, 2);

    let batch = orchestrator
        .retrieve(["https://slow.test/", "https://fast.test/"])
        .expect("batch");

    let order: Vec<&str> = batch.successes.iter().map(|p| p.url.as_str()).collect();
    assert_eq!(order, vec!["https://fast.test/", "https://slow.test/"]);
    orchestrator.shutdown();
}

#[test]
fn hanging_fetch_exceeds_batch_deadline() {
    let stub = StubFetcher::new().with("https://hang.test/", Behaviour::Hang);
    let active = stub.active.clone();
    let orchestrator = Orchestrator::new(
        config(2, Duration::from_millis(200)),
        Arc::new(stub),
    )
    .expect("orchestrator");

    let err = orchestrator
        .retrieve(["https://ok.test/", "https://hang.test/"])
        .unwrap_err();

    match err {
        RetrieveError::Backend(BackendError::DeadlineExceeded {
            completed,
            outstanding,
            ..
        }) => {
            assert_eq!(completed, 1);
            assert_eq!(outstanding, 1);
        }
        other => panic!("expected deadline error, got {other:?}"),
    }
    // The hanging call was cancelled, not left running.
    assert_eq!(active.load(Ordering::SeqCst), 0);
    orchestrator.shutdown();
}

#[test]
fn concurrency_of_one_serializes_fetches() {
    let mut stub = StubFetcher::new();
    for i in 0..5 {
        stub = stub.with(&format!("https://s{i}.test/"), Behaviour::Delay(20));
    }
    let max_active = stub.max_active.clone();
    let orchestrator = start(stub, 1);

    let urls: Vec<String> = (0..5).map(|i| format!("https://s{i}.test/")).collect();
    let batch = orchestrator.retrieve(urls).expect("batch");

    assert_eq!(batch.successes.len(), 5);
    assert_eq!(max_active.load(Ordering::SeqCst), 1);
    orchestrator.shutdown();
}

#[test]
fn in_flight_fetches_never_exceed_limit() {
    let mut stub = StubFetcher::new();
    for i in 0..12 {
        stub = stub.with(&format!("https://p{i}.test/"), Behaviour::Delay(25));
    }
    let max_active = stub.max_active.clone();
    let orchestrator = start(stub, 3);

    let urls: Vec<String> = (0..12).map(|i| format!("https://p{i}.test/")).collect();
    orchestrator.retrieve(urls).expect("batch");

    let observed = max_active.load(Ordering::SeqCst);
    assert!(observed <= 3, "observed {observed} concurrent fetches");
    orchestrator.shutdown();
}

#[test]
fn non_positive_limit_becomes_one() {
    let orchestrator = start(StubFetcher::new(), 0);
    assert_eq!(orchestrator.concurrency(), 1);
    orchestrator.shutdown();

    let orchestrator = start(StubFetcher::new(), -3);
    assert_eq!(orchestrator.concurrency(), 1);
    orchestrator.shutdown();
}

#[test]
fn internal_transport_failure_is_remote_error() {
    let stub = StubFetcher::new().with("https://bug.test/", Behaviour::Fail(FailureKind::Internal));
    let orchestrator = start(stub, 2);

    let err = orchestrator
        .retrieve(["https://ok.test/", "https://bug.test/"])
        .unwrap_err();

    match err {
        RetrieveError::Remote(remote) => assert_eq!(remote.url, "https://bug.test/"),
        other => panic!("expected remote error, got {other:?}"),
    }
    orchestrator.shutdown();
}

#[test]
fn panicking_transport_is_remote_error() {
    let stub = StubFetcher::new().with("https://panic.test/", Behaviour::Panic);
    let orchestrator = start(stub, 2);

    let err = orchestrator.retrieve(["https://panic.test/"]).unwrap_err();

    match err {
        RetrieveError::Remote(remote) => {
            assert_eq!(remote.url, "https://panic.test/");
            assert!(remote.message.contains("stub transport bug"));
        }
        other => panic!("expected remote error, got {other:?}"),
    }
    orchestrator.shutdown();
}

#[test]
fn empty_batch_returns_empty_result() {
    let stub = StubFetcher::new();
    let calls = stub.calls.clone();
    let orchestrator = start(stub, 2);

    let batch = orchestrator.retrieve(Vec::<String>::new()).expect("batch");

    assert!(batch.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    orchestrator.shutdown();
}

#[test]
fn cancellation_from_another_thread_fails_in_flight_urls() {
    let (started_tx, started_rx) = mpsc::channel();
    let stub = StubFetcher::new()
        .with("https://hang.test/", Behaviour::Hang)
        .notify_start(started_tx);
    let active = stub.active.clone();
    let orchestrator = Orchestrator::new(
        config(2, Duration::from_secs(30)),
        Arc::new(stub),
    )
    .expect("orchestrator");
    let handle = orchestrator.shutdown_handle();

    let worker = thread::spawn(move || {
        let result = orchestrator.retrieve(["https://hang.test/"]);
        (orchestrator, result)
    });
    started_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("stub started");
    handle.cancel();

    let (orchestrator, result) = worker.join().expect("worker thread");
    let batch = result.expect("cancellation is a per-url failure");
    assert!(batch.successes.is_empty());
    assert_eq!(
        batch.failed_urls,
        BTreeSet::from(["https://hang.test/".to_string()])
    );

    let err = orchestrator.retrieve(["https://again.test/"]).unwrap_err();
    assert!(matches!(err, RetrieveError::Backend(BackendError::ShutDown)));

    orchestrator.shutdown();
    assert_eq!(active.load(Ordering::SeqCst), 0);
}

#[test]
fn shutdown_leaves_no_fetch_running() {
    let mut stub = StubFetcher::new();
    for i in 0..6 {
        stub = stub.with(&format!("https://d{i}.test/"), Behaviour::Delay(10));
    }
    let active = stub.active.clone();
    let calls = stub.calls.clone();
    let orchestrator = start(stub, 2);

    let urls: Vec<String> = (0..6).map(|i| format!("https://d{i}.test/")).collect();
    orchestrator.retrieve(urls).expect("batch");
    orchestrator.shutdown();

    assert_eq!(calls.load(Ordering::SeqCst), 6);
    assert_eq!(active.load(Ordering::SeqCst), 0);
}

#[test]
fn events_describe_the_batch() {
    let (tx, rx) = mpsc::channel();
    let stub = StubFetcher::new().with("https://b.test/", Behaviour::Fail(FailureKind::Timeout));
    let orchestrator = start(stub, 2).with_sink(Arc::new(ChannelSink::new(tx)));

    orchestrator
        .retrieve(["https://a.test/", "https://b.test/"])
        .expect("batch");
    orchestrator.shutdown();

    let events: Vec<EngineEvent> = rx.try_iter().collect();
    assert_eq!(
        events.first(),
        Some(&EngineEvent::BatchStarted {
            urls: 2,
            concurrency: 2
        })
    );
    assert_eq!(
        events.last(),
        Some(&EngineEvent::BatchFinished {
            succeeded: 1,
            failed: 1
        })
    );
    let dispatched = events
        .iter()
        .filter(|e| matches!(e, EngineEvent::Dispatched { .. }))
        .count();
    assert_eq!(dispatched, 2);
    assert!(events.iter().any(|e| matches!(
        e,
        EngineEvent::Failed {
            kind: FailureKind::Timeout,
            ..
        }
    )));
}
