use livewatch_common::{AnomalyEvent, CameraId, CameraSource, FaceSnapshot};
use std::collections::{HashMap, VecDeque};
use tokio::sync::{broadcast, RwLock};

const ANOMALY_HISTORY: usize = 20;
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct SimCamera {
    pub camera_id: CameraId,
    pub source: CameraSource,
    pub running: bool,
}

#[derive(Debug, Default)]
pub struct CameraFeed {
    pub face: Option<FaceSnapshot>,
    pub anomalies: VecDeque<AnomalyEvent>,
}

pub struct AppState {
    pub cameras: RwLock<Vec<SimCamera>>,
    pub feeds: RwLock<HashMap<CameraId, CameraFeed>>,
    pub events: broadcast::Sender<String>,
}

impl AppState {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            cameras: RwLock::new(Vec::new()),
            feeds: RwLock::new(HashMap::new()),
            events,
        }
    }

    pub async fn running_cameras(&self) -> Vec<CameraId> {
        self.cameras
            .read()
            .await
            .iter()
            .filter(|c| c.running)
            .map(|c| c.camera_id.clone())
            .collect()
    }

    pub async fn record_face(&self, camera_id: &CameraId, face: FaceSnapshot) {
        self.feeds.write().await.entry(camera_id.clone()).or_default().face = Some(face);
    }

    pub async fn record_anomaly(&self, anomaly: AnomalyEvent) {
        let mut feeds = self.feeds.write().await;
        let feed = feeds.entry(anomaly.camera_id.clone()).or_default();
        if feed.anomalies.len() >= ANOMALY_HISTORY {
            feed.anomalies.pop_back();
        }
        feed.anomalies.push_front(anomaly);
    }

    /// Broadcasts a raw SSE payload. No subscribers is not an error.
    pub fn publish(&self, payload: String) -> usize {
        self.events.send(payload).unwrap_or(0)
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
