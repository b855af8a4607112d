use livewatch_common::utils::format_duration;
use livewatch_common::LiveEvent;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{EventStreamSubscriber, StreamStatus};
use crate::config::ReconnectConfig;

pub type EventSink = Arc<dyn Fn(LiveEvent) + Send + Sync>;

/// Keeps one subscription alive, reconnecting with capped exponential backoff.
/// Reaching `Open` resets the attempt counter.
pub struct StreamSupervisor {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    status: watch::Receiver<StreamStatus>,
}

impl StreamSupervisor {
    pub fn spawn(subscriber: EventStreamSubscriber, sink: EventSink, policy: ReconnectConfig) -> Self {
        let cancel = CancellationToken::new();
        let (status_tx, status_rx) = watch::channel(StreamStatus::Connecting);
        let task = tokio::spawn(supervise(subscriber, sink, policy, cancel.clone(), status_tx));

        Self {
            cancel,
            task: Some(task),
            status: status_rx,
        }
    }

    pub fn status(&self) -> StreamStatus {
        self.status.borrow().clone()
    }

    pub fn status_watch(&self) -> watch::Receiver<StreamStatus> {
        self.status.clone()
    }

    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Stream supervisor ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for StreamSupervisor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn supervise(
    subscriber: EventStreamSubscriber,
    sink: EventSink,
    policy: ReconnectConfig,
    cancel: CancellationToken,
    status: watch::Sender<StreamStatus>,
) {
    let mut attempt: u32 = 0;

    loop {
        let forward = sink.clone();
        let handle = subscriber.subscribe(move |event| forward(event));
        let mut current = handle.status_watch();

        let terminal = loop {
            let observed = current.borrow_and_update().clone();
            if observed == StreamStatus::Open && *status.borrow() != StreamStatus::Open {
                status.send_replace(StreamStatus::Open);
            }
            if observed.is_terminal() {
                break observed;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    handle.close().await;
                    status.send_replace(StreamStatus::Closed);
                    return;
                }
                changed = current.changed() => {
                    if changed.is_err() {
                        break StreamStatus::Closed;
                    }
                }
            }
        };
        // The watch may skip a short-lived Open, so ask the subscription itself.
        if handle.reached_open() {
            attempt = 0;
        }
        handle.close().await;

        if cancel.is_cancelled() {
            status.send_replace(StreamStatus::Closed);
            return;
        }

        attempt += 1;
        if attempt > policy.max_attempts {
            error!(
                "Event stream gave up after {} failed attempts (last: {:?})",
                policy.max_attempts, terminal
            );
            status.send_replace(StreamStatus::GaveUp);
            return;
        }

        let delay = policy.backoff(attempt);
        warn!(
            "Event stream {:?}; reconnecting in {} (attempt {}/{})",
            terminal,
            format_duration(delay),
            attempt,
            policy.max_attempts
        );
        status.send_replace(StreamStatus::Reconnecting { attempt });

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                status.send_replace(StreamStatus::Closed);
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }
        info!("Reconnecting event stream");
    }
}
