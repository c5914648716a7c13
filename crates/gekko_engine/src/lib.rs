//! Gekko engine: concurrent page retrieval and the fetch-time ledger.
mod decode;
mod error;
mod fetch;
mod filename;
mod ledger;
mod orchestrator;
mod page;
mod persist;
mod sink;
mod types;

pub use decode::decode_html;
pub use error::{BackendError, RemoteError, RetrieveError};
pub use fetch::{FetchSettings, Fetcher, ReqwestFetcher};
pub use filename::{page_location, LocationError, PageLocation};
pub use ledger::{Clock, FetchLedger, LedgerError, LEDGER_FILENAME};
pub use orchestrator::{
    resolve_concurrency, Orchestrator, OrchestratorConfig, ShutdownHandle, DEFAULT_BATCH_DEADLINE,
};
pub use page::PageStats;
pub use persist::{ensure_output_dir, AtomicFileWriter, PersistError};
pub use sink::{ChannelSink, EventSink, LogSink, NoopSink};
pub use types::{
    BatchResult, EngineEvent, FailureKind, FetchError, FetchOutcome, FetchRequest, PageFetch,
};
