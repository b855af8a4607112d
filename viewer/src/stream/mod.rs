//! Push event feed: transport seam, SSE subscription and reconnect supervision.

mod http;
mod sse;
mod supervisor;

pub use http::HttpEventTransport;
pub use sse::{SseCodec, SseMessage};
pub use supervisor::{EventSink, StreamSupervisor};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use livewatch_common::LiveEvent;
use serde::Serialize;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::Result;

pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Opens the long-lived byte stream carrying `text/event-stream` frames.
#[async_trait]
pub trait EventTransport: Send + Sync {
    async fn connect(&self) -> Result<ByteStream>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StreamStatus {
    Connecting,
    Open,
    Reconnecting { attempt: u32 },
    Closed,
    Failed { reason: String },
    GaveUp,
}

impl StreamStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamStatus::Closed | StreamStatus::Failed { .. } | StreamStatus::GaveUp
        )
    }
}

#[derive(Debug, Default)]
struct SubscriptionStats {
    opened: AtomicBool,
    delivered: AtomicU64,
    malformed: AtomicU64,
}

/// Live subscription. Dropping it cancels the feed; `close` also waits for it.
pub struct SubscriptionHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    status: watch::Receiver<StreamStatus>,
    stats: Arc<SubscriptionStats>,
}

impl SubscriptionHandle {
    pub fn status(&self) -> StreamStatus {
        self.status.borrow().clone()
    }

    pub fn status_watch(&self) -> watch::Receiver<StreamStatus> {
        self.status.clone()
    }

    /// True once the transport accepted the connection, even if it has since failed.
    pub fn reached_open(&self) -> bool {
        self.stats.opened.load(Ordering::Relaxed)
    }

    pub fn delivered(&self) -> u64 {
        self.stats.delivered.load(Ordering::Relaxed)
    }

    pub fn malformed(&self) -> u64 {
        self.stats.malformed.load(Ordering::Relaxed)
    }

    /// Resolves once the subscription reaches a terminal status.
    pub async fn finished(&self) -> StreamStatus {
        let mut status = self.status.clone();
        let terminal = match status.wait_for(StreamStatus::is_terminal).await {
            Ok(terminal) => terminal.clone(),
            Err(_) => StreamStatus::Closed,
        };
        terminal
    }

    /// Cancels the feed and waits for its task. No callback runs after this returns.
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Event subscription task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub struct EventStreamSubscriber {
    transport: Arc<dyn EventTransport>,
}

impl EventStreamSubscriber {
    pub fn new(transport: Arc<dyn EventTransport>) -> Self {
        Self { transport }
    }

    /// Opens the feed and invokes `on_event` once per decoded message, in
    /// arrival order. Malformed messages are counted and skipped.
    pub fn subscribe<F>(&self, on_event: F) -> SubscriptionHandle
    where
        F: FnMut(LiveEvent) + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let (status_tx, status_rx) = watch::channel(StreamStatus::Connecting);
        let stats = Arc::new(SubscriptionStats::default());

        let task = tokio::spawn(run_subscription(
            self.transport.clone(),
            on_event,
            cancel.clone(),
            status_tx,
            stats.clone(),
        ));

        SubscriptionHandle {
            cancel,
            task: Some(task),
            status: status_rx,
            stats,
        }
    }

    pub async fn close(&self, handle: SubscriptionHandle) {
        handle.close().await;
    }
}

async fn run_subscription<F>(
    transport: Arc<dyn EventTransport>,
    mut on_event: F,
    cancel: CancellationToken,
    status: watch::Sender<StreamStatus>,
    stats: Arc<SubscriptionStats>,
) where
    F: FnMut(LiveEvent) + Send,
{
    let connected = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            status.send_replace(StreamStatus::Closed);
            return;
        }
        result = transport.connect() => result,
    };

    let bytes = match connected {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("Failed to open event stream: {}", e);
            status.send_replace(StreamStatus::Failed {
                reason: e.to_string(),
            });
            return;
        }
    };

    info!("Event stream open");
    stats.opened.store(true, Ordering::Relaxed);
    status.send_replace(StreamStatus::Open);

    let reader = StreamReader::new(bytes.map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string())));
    let mut frames = FramedRead::new(reader, SseCodec::default());

    let outcome = loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break StreamStatus::Closed,
            next = frames.next() => next,
        };

        match next {
            Some(Ok(message)) => match LiveEvent::from_json(&message.data) {
                Ok(event) => {
                    if cancel.is_cancelled() {
                        break StreamStatus::Closed;
                    }
                    stats.delivered.fetch_add(1, Ordering::Relaxed);
                    debug!("Event for {}", event.camera_id());
                    on_event(event);
                }
                Err(e) => {
                    stats.malformed.fetch_add(1, Ordering::Relaxed);
                    warn!("Dropping malformed event: {}", e);
                }
            },
            Some(Err(e)) => {
                error!("Event stream transport error: {}", e);
                break StreamStatus::Failed {
                    reason: e.to_string(),
                };
            }
            None => {
                warn!("Event stream ended by server");
                break StreamStatus::Failed {
                    reason: "stream ended by server".to_string(),
                };
            }
        }
    };

    if outcome == StreamStatus::Closed {
        info!("Event stream closed");
    }
    status.send_replace(outcome);
}
