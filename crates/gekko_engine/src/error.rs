use std::io;
use std::time::Duration;

use thiserror::Error;

/// Infrastructure failure; the whole batch is indeterminate.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to allocate worker pool: {0}")]
    Pool(#[source] io::Error),
    #[error("orchestrator is shut down; batch rejected")]
    ShutDown,
    #[error("batch deadline of {deadline:?} exceeded ({completed} completed, {outstanding} outstanding)")]
    DeadlineExceeded {
        deadline: Duration,
        completed: usize,
        outstanding: usize,
    },
}

/// Unrecognized failure while classifying one completion.
#[derive(Debug, Error)]
#[error("unrecognized failure while fetching {url}: {message}")]
pub struct RemoteError {
    pub url: String,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum RetrieveError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
}
