use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::{Builder, Runtime};
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::fetch::Fetcher;
use crate::sink::{EventSink, NoopSink};
use crate::{
    BackendError, BatchResult, EngineEvent, FetchOutcome, FetchRequest, PageFetch, RemoteError,
    RetrieveError,
};

pub const DEFAULT_BATCH_DEADLINE: Duration = Duration::from_secs(10);
const MAX_DEFAULT_CONCURRENCY: usize = 32;
const MAX_WORKER_THREADS: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// `None` picks a default from the available parallelism; values below 1 become 1.
    pub concurrency: Option<i64>,
    /// Bounds the wait for a whole batch, not for a single URL.
    pub batch_deadline: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            concurrency: None,
            batch_deadline: DEFAULT_BATCH_DEADLINE,
        }
    }
}

/// Resolves a requested concurrency limit to the number of parallel fetches.
pub fn resolve_concurrency(requested: Option<i64>) -> usize {
    let limit = match requested {
        Some(n) if n >= 1 => usize::try_from(n).unwrap_or(usize::MAX),
        Some(_) => 1,
        None => {
            let cpus = std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1);
            (cpus + 4).min(MAX_DEFAULT_CONCURRENCY)
        }
    };
    limit.min(Semaphore::MAX_PERMITS)
}

/// Bounded-concurrency batch retrieval over a [`Fetcher`].
///
/// Each orchestrator owns a dedicated runtime. `retrieve` blocks the calling
/// thread and must not be called from within another tokio runtime.
pub struct Orchestrator {
    runtime: Runtime,
    fetcher: Arc<dyn Fetcher>,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    cancel: CancellationToken,
    concurrency: usize,
    batch_deadline: Duration,
    sink: Arc<dyn EventSink>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, fetcher: Arc<dyn Fetcher>) -> Result<Self, BackendError> {
        let concurrency = resolve_concurrency(config.concurrency);
        let runtime = Builder::new_multi_thread()
            .worker_threads(concurrency.min(MAX_WORKER_THREADS))
            .thread_name("gekko-fetch")
            .enable_all()
            .build()
            .map_err(BackendError::Pool)?;

        Ok(Self {
            runtime,
            fetcher,
            permits: Arc::new(Semaphore::new(concurrency)),
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
            concurrency,
            batch_deadline: config.batch_deadline,
            sink: Arc::new(NoopSink),
        })
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn batch_deadline(&self) -> Duration {
        self.batch_deadline
    }

    /// A handle that cancels in-flight work from another thread.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            cancel: self.cancel.clone(),
            tracker: self.tracker.clone(),
            permits: self.permits.clone(),
        }
    }

    /// Fetches every distinct URL once and partitions them into successes
    /// (in completion order) and failed URLs.
    pub fn retrieve<I, S>(&self, urls: I) -> Result<BatchResult, RetrieveError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if self.cancel.is_cancelled() || self.tracker.is_closed() {
            return Err(BackendError::ShutDown.into());
        }

        let requests = collect_requests(urls);
        if requests.is_empty() {
            return Ok(BatchResult::default());
        }

        self.sink.emit(EngineEvent::BatchStarted {
            urls: requests.len(),
            concurrency: self.concurrency,
        });

        let result = self.runtime.block_on(self.run_batch(requests));
        match &result {
            Ok(batch) => self.sink.emit(EngineEvent::BatchFinished {
                succeeded: batch.successes.len(),
                failed: batch.failed_urls.len(),
            }),
            Err(err) => self.sink.emit(EngineEvent::BatchAborted {
                reason: err.to_string(),
            }),
        }
        result
    }

    /// Cancels outstanding work and blocks until every dispatched task has ended.
    pub fn shutdown(self) {
        self.shutdown_handle().cancel();
        self.runtime.block_on(self.tracker.wait());
    }

    async fn run_batch(&self, requests: Vec<FetchRequest>) -> Result<BatchResult, RetrieveError> {
        let deadline = Instant::now() + self.batch_deadline;
        let mut in_flight = JoinSet::new();
        let mut pending: HashMap<Id, String> = HashMap::with_capacity(requests.len());

        for request in requests {
            let url = request.url().to_string();
            self.sink.emit(EngineEvent::Dispatched { url: url.clone() });
            let task = run_request(
                self.fetcher.clone(),
                self.permits.clone(),
                self.cancel.clone(),
                request,
            );
            let handle = in_flight.spawn(self.tracker.track_future(task));
            pending.insert(handle.id(), url);
        }

        let total = pending.len();
        let mut batch = BatchResult::default();
        loop {
            let joined = match timeout_at(deadline, in_flight.join_next_with_id()).await {
                Ok(Some(joined)) => joined,
                Ok(None) => break,
                Err(_elapsed) => {
                    let outstanding = in_flight.len();
                    in_flight.shutdown().await;
                    return Err(BackendError::DeadlineExceeded {
                        deadline: self.batch_deadline,
                        completed: total - outstanding,
                        outstanding,
                    }
                    .into());
                }
            };

            let classified = match joined {
                Ok((id, outcome)) => {
                    pending.remove(&id);
                    self.classify(outcome, &mut batch)
                }
                Err(err) => {
                    let url = pending.remove(&err.id()).unwrap_or_default();
                    self.classify_join_error(url, err, &mut batch)
                }
            };
            if let Err(err) = classified {
                in_flight.shutdown().await;
                return Err(err.into());
            }
        }

        Ok(batch)
    }

    fn classify(&self, outcome: FetchOutcome, batch: &mut BatchResult) -> Result<(), RemoteError> {
        match outcome {
            FetchOutcome::Success(page) => {
                self.sink.emit(EngineEvent::Fetched {
                    url: page.url.clone(),
                    bytes: page.bytes.len() as u64,
                    links: page.link_count,
                    images: page.image_count,
                });
                batch.successes.push(page);
                Ok(())
            }
            FetchOutcome::Failure { url, error } if error.kind.is_recognized() => {
                self.sink.emit(EngineEvent::Failed {
                    url: url.clone(),
                    kind: error.kind,
                    message: error.message,
                });
                batch.failed_urls.insert(url);
                Ok(())
            }
            FetchOutcome::Failure { url, error } => Err(RemoteError {
                url,
                message: error.to_string(),
            }),
        }
    }

    fn classify_join_error(
        &self,
        url: String,
        err: JoinError,
        batch: &mut BatchResult,
    ) -> Result<(), RemoteError> {
        if err.is_panic() {
            return Err(RemoteError {
                url,
                message: format!("fetch task panicked: {}", panic_message(err.into_panic())),
            });
        }
        self.classify(FetchOutcome::cancelled(url), batch)
    }
}

/// Cancels an orchestrator's work from any thread.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    cancel: CancellationToken,
    tracker: TaskTracker,
    permits: Arc<Semaphore>,
}

impl ShutdownHandle {
    /// Rejects new batches and cancels queued and in-flight fetches.
    pub fn cancel(&self) {
        self.tracker.close();
        self.permits.close();
        self.cancel.cancel();
    }
}

async fn run_request(
    fetcher: Arc<dyn Fetcher>,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
    request: FetchRequest,
) -> FetchOutcome {
    let _permit = tokio::select! {
        biased;
        _ = cancel.cancelled() => return FetchOutcome::cancelled(request.into_url()),
        permit = permits.acquire_owned() => match permit {
            Ok(permit) => permit,
            // Closed by shutdown.
            Err(_) => return FetchOutcome::cancelled(request.into_url()),
        },
    };

    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        result = fetcher.fetch(request.url()) => Some(result),
    };

    match result {
        None => FetchOutcome::cancelled(request.into_url()),
        Some(Ok(page)) => FetchOutcome::Success(PageFetch {
            url: request.into_url(),
            ..page
        }),
        Some(Err(error)) => FetchOutcome::Failure {
            url: request.into_url(),
            error,
        },
    }
}

fn collect_requests<I, S>(urls: I) -> Vec<FetchRequest>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut seen = HashSet::new();
    urls.into_iter()
        .map(Into::into)
        .filter(|url| seen.insert(url.clone()))
        .map(FetchRequest::new)
        .collect()
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
