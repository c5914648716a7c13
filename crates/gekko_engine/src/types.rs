use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};

/// One URL of a batch, consumed by exactly one dispatched task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    url: String,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn into_url(self) -> String {
        self.url
    }
}

/// A successfully retrieved page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageFetch {
    /// The URL as requested.
    pub url: String,
    /// The URL after redirects.
    pub final_url: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
    pub link_count: usize,
    pub image_count: usize,
}

impl PageFetch {
    pub fn new(url: impl Into<String>, bytes: Vec<u8>, link_count: usize, image_count: usize) -> Self {
        let url = url.into();
        Self {
            final_url: url.clone(),
            url,
            content_type: None,
            bytes,
            link_count,
            image_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Success(PageFetch),
    Failure { url: String, error: FetchError },
}

impl FetchOutcome {
    pub(crate) fn cancelled(url: String) -> Self {
        FetchOutcome::Failure {
            url,
            error: FetchError::new(FailureKind::Cancelled, "cancelled before completion"),
        }
    }
}

/// Partition of a batch: every input URL lands in exactly one of the two.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResult {
    /// In completion order.
    pub successes: Vec<PageFetch>,
    pub failed_urls: BTreeSet<String>,
}

impl BatchResult {
    pub fn len(&self) -> usize {
        self.successes.len() + self.failed_urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchError {
    pub kind: FailureKind,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for FetchError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    InvalidUrl,
    HttpStatus(u16),
    Timeout,
    RedirectLimitExceeded,
    TooLarge { max_bytes: u64, actual: Option<u64> },
    UnsupportedContentType { content_type: String },
    Network,
    Cancelled,
    /// The transport broke its own contract; never absorbed into a batch.
    Internal,
}

impl FailureKind {
    /// Recognized failures are recorded per URL instead of aborting the batch.
    pub fn is_recognized(&self) -> bool {
        !matches!(self, FailureKind::Internal)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::InvalidUrl => write!(f, "invalid url"),
            FailureKind::HttpStatus(code) => write!(f, "http status {code}"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::RedirectLimitExceeded => write!(f, "redirect limit exceeded"),
            FailureKind::TooLarge { max_bytes, actual } => {
                write!(f, "response too large (max {max_bytes}, actual {actual:?})")
            }
            FailureKind::UnsupportedContentType { content_type } => {
                write!(f, "unsupported content type {content_type}")
            }
            FailureKind::Network => write!(f, "network error"),
            FailureKind::Cancelled => write!(f, "cancelled"),
            FailureKind::Internal => write!(f, "internal transport error"),
        }
    }
}

/// Diagnostics emitted by the orchestrator and the ledger to an [`crate::EventSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    BatchStarted {
        urls: usize,
        concurrency: usize,
    },
    Dispatched {
        url: String,
    },
    Fetched {
        url: String,
        bytes: u64,
        links: usize,
        images: usize,
    },
    Failed {
        url: String,
        kind: FailureKind,
        message: String,
    },
    BatchFinished {
        succeeded: usize,
        failed: usize,
    },
    BatchAborted {
        reason: String,
    },
    LedgerOpened {
        path: PathBuf,
        strict_schema: bool,
    },
    LastFetchUpdated {
        url: String,
        previous: Option<DateTime<Utc>>,
        current: DateTime<Utc>,
    },
    LedgerClosed {
        path: PathBuf,
    },
}
