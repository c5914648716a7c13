use std::sync::mpsc;

use gekko_logging::{gekko_debug, gekko_error, gekko_info, gekko_warn};

use crate::EngineEvent;

/// Receives diagnostics from an orchestrator or ledger instance.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: EngineEvent);
}

/// Discards every event. Default for new instances.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: EngineEvent) {}
}

/// Forwards events to the global `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: EngineEvent) {
        match event {
            EngineEvent::BatchStarted { urls, concurrency } => {
                gekko_debug!("Retrieving {} urls with {} workers", urls, concurrency);
            }
            EngineEvent::Dispatched { url } => gekko_debug!("Dispatched {}", url),
            EngineEvent::Fetched {
                url,
                bytes,
                links,
                images,
            } => gekko_debug!(
                "Retrieved page {} bytes={} links={} images={}",
                url,
                bytes,
                links,
                images
            ),
            EngineEvent::Failed { url, kind, message } => {
                gekko_warn!("Fetching {} failed ({}): {}", url, kind, message);
            }
            EngineEvent::BatchFinished { succeeded, failed } => {
                gekko_info!("Batch finished: {} retrieved, {} failed", succeeded, failed);
            }
            EngineEvent::BatchAborted { reason } => gekko_error!("Batch aborted: {}", reason),
            EngineEvent::LedgerOpened {
                path,
                strict_schema,
            } => gekko_debug!(
                "Opened fetch ledger {:?} (strict schema: {})",
                path,
                strict_schema
            ),
            EngineEvent::LastFetchUpdated {
                url,
                previous,
                current,
            } => gekko_debug!(
                "Last fetch of {} moved from {:?} to {}",
                url,
                previous,
                current
            ),
            EngineEvent::LedgerClosed { path } => gekko_debug!("Closed fetch ledger {:?}", path),
        }
    }
}

pub struct ChannelSink {
    tx: mpsc::Sender<EngineEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<EngineEvent>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }
}
