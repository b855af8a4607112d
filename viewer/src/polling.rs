use chrono::{DateTime, Utc};
use dashmap::DashMap;
use livewatch_common::{AnomalyEvent, CameraId, FaceSnapshot};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::buffer::EventBuffer;
use crate::error::LiveViewError;
use crate::registry::MonitoringApi;

fn log_poll_failure(what: &str, camera_id: &CameraId, error: &LiveViewError) {
    if error.is_transient() {
        warn!("{} poll for {} failed: {}", what, camera_id, error);
    } else {
        error!("{} poll for {} failed: {}", what, camera_id, error);
    }
}

/// Latest polled state for one camera.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CameraSnapshot {
    pub face: Option<FaceSnapshot>,
    pub anomalies: Vec<AnomalyEvent>,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct SnapshotBoard {
    cameras: DashMap<CameraId, CameraSnapshot>,
}

impl SnapshotBoard {
    pub fn get(&self, camera_id: &CameraId) -> Option<CameraSnapshot> {
        self.cameras.get(camera_id).map(|entry| entry.clone())
    }

    pub fn remove(&self, camera_id: &CameraId) {
        self.cameras.remove(camera_id);
    }
}

/// Periodic face/anomaly fetches for the active camera.
pub struct SnapshotPoller {
    api: Arc<dyn MonitoringApi>,
    buffer: Arc<EventBuffer>,
    board: Arc<SnapshotBoard>,
}

pub struct PollerHandle {
    camera_id: CameraId,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    ticks: Arc<AtomicU64>,
}

impl PollerHandle {
    pub fn camera_id(&self) -> &CameraId {
        &self.camera_id
    }

    /// Ticks whose fetches have both settled.
    pub fn completed_ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    /// Cancels and waits; nothing is written for this camera after it returns.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Poller for {} ended abnormally: {}", self.camera_id, e);
            }
        }
        debug!("Poller for {} stopped", self.camera_id);
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl SnapshotPoller {
    pub fn new(api: Arc<dyn MonitoringApi>, buffer: Arc<EventBuffer>, board: Arc<SnapshotBoard>) -> Self {
        Self { api, buffer, board }
    }

    pub fn board(&self) -> Arc<SnapshotBoard> {
        self.board.clone()
    }

    /// Polls immediately, then every `interval`. A tick waits for the previous
    /// one, so fetches for one camera never overlap.
    pub fn start(&self, camera_id: CameraId, interval: Duration) -> PollerHandle {
        let cancel = CancellationToken::new();
        let ticks = Arc::new(AtomicU64::new(0));

        let worker = PollWorker {
            api: self.api.clone(),
            buffer: self.buffer.clone(),
            board: self.board.clone(),
            camera_id: camera_id.clone(),
            last_face: None,
            seen_anomalies: HashSet::new(),
        };
        let task = tokio::spawn(worker.run(interval, cancel.clone(), ticks.clone()));

        PollerHandle {
            camera_id,
            cancel,
            task: Some(task),
            ticks,
        }
    }

    pub async fn stop(&self, handle: PollerHandle) {
        handle.stop().await;
    }
}

struct PollWorker {
    api: Arc<dyn MonitoringApi>,
    buffer: Arc<EventBuffer>,
    board: Arc<SnapshotBoard>,
    camera_id: CameraId,
    last_face: Option<FaceSnapshot>,
    seen_anomalies: HashSet<String>,
}

impl PollWorker {
    async fn run(mut self, interval: Duration, cancel: CancellationToken, ticks: Arc<AtomicU64>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Polling {} every {:?}", self.camera_id, interval);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let api = self.api.clone();
            let camera_id = self.camera_id.clone();
            let fetches = async { tokio::join!(api.fetch_faces(&camera_id), api.fetch_anomalies(&camera_id)) };
            let (faces, anomalies) = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                results = fetches => results,
            };

            let faces = faces.map_err(|e| log_poll_failure("Face", &self.camera_id, &e)).ok();
            let anomalies = anomalies
                .map_err(|e| log_poll_failure("Anomaly", &self.camera_id, &e))
                .ok();
            self.apply(faces, anomalies);
            ticks.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// `None` means that fetch failed this tick and the previous state stands.
    fn apply(&mut self, faces: Option<Option<FaceSnapshot>>, anomalies: Option<Vec<AnomalyEvent>>) {
        if faces.is_none() && anomalies.is_none() {
            return;
        }

        let mut snapshot = self.board.cameras.entry(self.camera_id.clone()).or_default();

        if let Some(face) = faces {
            if face != self.last_face {
                if let Some(current) = face.clone() {
                    self.buffer
                        .push(self.camera_id.clone(), current.into_event(self.camera_id.clone()).into());
                }
                self.last_face = face.clone();
            }
            snapshot.face = face;
        }

        if let Some(anomalies) = anomalies {
            let mut keys = HashSet::with_capacity(anomalies.len());
            for anomaly in &anomalies {
                let key = anomaly_key(anomaly);
                if !self.seen_anomalies.contains(&key) {
                    self.buffer.push(self.camera_id.clone(), anomaly.clone().into());
                }
                keys.insert(key);
            }
            self.seen_anomalies = keys;
            snapshot.anomalies = anomalies;
        }

        snapshot.last_updated = Some(Utc::now());
    }
}

fn anomaly_key(anomaly: &AnomalyEvent) -> String {
    match anomaly.key() {
        Some(key) => key.to_string(),
        None => serde_json::to_string(anomaly).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeMonitoringApi;
    use livewatch_common::{BBox, LiveEvent};

    fn face(name: &str) -> FaceSnapshot {
        FaceSnapshot {
            name: Some(name.to_string()),
            auth: Some(true),
            similarity: Some(88.0),
            bbox: Some(BBox::new(10.0, 10.0, 40.0, 40.0)),
            frame_width: Some(320),
            frame_height: Some(240),
            timestamp: None,
        }
    }

    fn anomaly(id: &str) -> AnomalyEvent {
        AnomalyEvent {
            camera_id: CameraId::from("cam-01"),
            id: Some(id.to_string()),
            category: "loitering".to_string(),
            confidence: 55.0,
            bbox: None,
            frame_width: None,
            frame_height: None,
            timestamp: None,
            thumbnail_url: None,
            video_url: None,
        }
    }

    fn setup(api: &Arc<FakeMonitoringApi>) -> (SnapshotPoller, Arc<EventBuffer>) {
        let buffer = Arc::new(EventBuffer::new(20));
        let poller = SnapshotPoller::new(api.clone(), buffer.clone(), Arc::new(SnapshotBoard::default()));
        (poller, buffer)
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_immediately_then_on_interval() {
        let api = Arc::new(FakeMonitoringApi::with_cameras(&["cam-01"]));
        let (poller, _) = setup(&api);

        let handle = poller.start(CameraId::from("cam-01"), Duration::from_secs(3));
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(api.face_fetches("cam-01"), 1);
        assert_eq!(api.anomaly_fetches("cam-01"), 1);

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(api.face_fetches("cam-01"), 4);
        assert_eq!(handle.completed_ticks(), 4);

        poller.stop(handle).await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(api.face_fetches("cam-01"), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_changes_reach_the_buffer() {
        let api = Arc::new(FakeMonitoringApi::with_cameras(&["cam-01"]));
        api.set_face("cam-01", face("Alice"));
        api.set_anomalies("cam-01", vec![anomaly("a1")]);
        let (poller, buffer) = setup(&api);
        let cam = CameraId::from("cam-01");

        let handle = poller.start(cam.clone(), Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(buffer.len(&cam), 2);

        api.set_face("cam-01", face("Bob"));
        api.set_anomalies("cam-01", vec![anomaly("a1"), anomaly("a2")]);
        tokio::time::sleep(Duration::from_secs(2)).await;

        let latest = buffer.latest(&cam, 10);
        assert_eq!(latest.len(), 4);
        assert!(latest
            .iter()
            .any(|e| matches!(e, LiveEvent::Detection(d) if d.name == "Bob")));
        assert!(latest
            .iter()
            .any(|e| matches!(e, LiveEvent::Anomaly(a) if a.id.as_deref() == Some("a2"))));

        let snapshot = poller.board().get(&cam).unwrap();
        assert_eq!(snapshot.anomalies.len(), 2);
        assert!(snapshot.last_updated.is_some());
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_keep_polling() {
        let api = Arc::new(FakeMonitoringApi::with_cameras(&["cam-01"]));
        api.set_polls_failing(true);
        let (poller, buffer) = setup(&api);
        let cam = CameraId::from("cam-01");

        let handle = poller.start(cam.clone(), Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(api.face_fetches("cam-01"), 3);
        assert!(buffer.is_empty(&cam));
        assert!(poller.board().get(&cam).is_none());

        api.set_polls_failing(false);
        api.set_face("cam-01", face("Alice"));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(buffer.len(&cam), 1);
        assert!(handle.is_running());
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_stops_polling() {
        let api = Arc::new(FakeMonitoringApi::with_cameras(&["cam-01"]));
        let (poller, _) = setup(&api);

        let handle = poller.start(CameraId::from("cam-01"), Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(handle);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(api.face_fetches("cam-01"), 1);
    }
}
