use dashmap::DashMap;
use livewatch_common::{CameraId, LiveEvent};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BufferStats {
    pub pushed: u64,
    pub evicted: u64,
}

/// Bounded per-camera history of live events. Once a camera holds
/// `capacity` events the oldest one is evicted on every push.
pub struct EventBuffer {
    capacity: usize,
    rings: DashMap<CameraId, VecDeque<LiveEvent>>,
    notify: Notify,
    pushed: AtomicU64,
    evicted: AtomicU64,
}

impl EventBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            rings: DashMap::new(),
            notify: Notify::new(),
            pushed: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn push(&self, camera_id: CameraId, event: LiveEvent) {
        {
            let mut ring = self
                .rings
                .entry(camera_id)
                .or_insert_with(|| VecDeque::with_capacity(self.capacity));
            while ring.len() >= self.capacity {
                ring.pop_front();
                self.evicted.fetch_add(1, Ordering::Relaxed);
            }
            ring.push_back(event);
        }
        self.pushed.fetch_add(1, Ordering::Relaxed);
        self.notify.notify_waiters();
    }

    /// Pushes under the camera the event itself names.
    pub fn record(&self, event: LiveEvent) {
        self.push(event.camera_id().clone(), event);
    }

    /// Up to `n` events, newest first.
    pub fn latest(&self, camera_id: &CameraId, n: usize) -> Vec<LiveEvent> {
        self.rings
            .get(camera_id)
            .map(|ring| ring.iter().rev().take(n).cloned().collect())
            .unwrap_or_default()
    }

    /// Every retained event, oldest first.
    pub fn in_receipt_order(&self, camera_id: &CameraId) -> Vec<LiveEvent> {
        self.rings
            .get(camera_id)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self, camera_id: &CameraId) -> usize {
        self.rings.get(camera_id).map(|ring| ring.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, camera_id: &CameraId) -> bool {
        self.len(camera_id) == 0
    }

    pub fn clear(&self, camera_id: &CameraId) {
        if let Some((_, ring)) = self.rings.remove(camera_id) {
            debug!("Cleared {} buffered event(s) for {}", ring.len(), camera_id);
        }
        self.notify.notify_waiters();
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            pushed: self.pushed.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
        }
    }

    /// Completes on the next push or clear after it is first polled.
    pub fn changed(&self) -> Notified<'_> {
        self.notify.notified()
    }
}
