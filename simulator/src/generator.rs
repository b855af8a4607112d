use chrono::Utc;
use livewatch_common::{AnomalyEvent, BBox, CameraId, DetectionEvent, FaceSnapshot};
use rand::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::state::AppState;

const FRAME_WIDTH: u32 = 640;
const FRAME_HEIGHT: u32 = 480;

const PEOPLE: [&str; 5] = ["Alice Chen", "Ravi Kumar", "Maria Lopez", "Tomasz Nowak", "Unknown"];
const CATEGORIES: [&str; 4] = ["loitering", "intrusion", "abandoned_object", "crowding"];

pub struct EventGenerator {
    rng: StdRng,
    anomaly_rate: f64,
    malformed_rate: f64,
}

impl EventGenerator {
    pub fn new(anomaly_rate: f64, malformed_rate: f64) -> Self {
        Self {
            rng: StdRng::from_entropy(),
            anomaly_rate: anomaly_rate.clamp(0.0, 1.0),
            malformed_rate: malformed_rate.clamp(0.0, 1.0),
        }
    }

    pub fn with_seed(seed: u64, anomaly_rate: f64, malformed_rate: f64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            ..Self::new(anomaly_rate, malformed_rate)
        }
    }

    fn random_bbox(&mut self) -> BBox {
        let width = self.rng.gen_range(40.0..160.0);
        let height = self.rng.gen_range(60.0..200.0);
        let x = self.rng.gen_range(0.0..(f64::from(FRAME_WIDTH) - width));
        let y = self.rng.gen_range(0.0..(f64::from(FRAME_HEIGHT) - height));
        BBox::new(x.round(), y.round(), width.round(), height.round())
    }

    pub fn detection(&mut self, camera_id: &CameraId) -> DetectionEvent {
        let name = PEOPLE.choose(&mut self.rng).copied().unwrap_or("Unknown");
        DetectionEvent {
            camera_id: camera_id.clone(),
            name: name.to_string(),
            similarity: (self.rng.gen_range(55.0..99.5_f64) * 10.0).round() / 10.0,
            auth: name != "Unknown",
            bbox: Some(self.random_bbox()),
            frame_width: Some(FRAME_WIDTH),
            frame_height: Some(FRAME_HEIGHT),
            timestamp: Some(Utc::now().to_rfc3339()),
        }
    }

    pub fn anomaly(&mut self, camera_id: &CameraId) -> AnomalyEvent {
        let category = CATEGORIES.choose(&mut self.rng).copied().unwrap_or("loitering");
        let id = Uuid::new_v4();
        AnomalyEvent {
            camera_id: camera_id.clone(),
            id: Some(id.to_string()),
            category: category.to_string(),
            confidence: (self.rng.gen_range(30.0..95.0_f64) * 10.0).round() / 10.0,
            bbox: Some(self.random_bbox()),
            frame_width: Some(FRAME_WIDTH),
            frame_height: Some(FRAME_HEIGHT),
            timestamp: Some(Utc::now().to_rfc3339()),
            thumbnail_url: Some(format!("/media/anomalies/{}.jpg", id)),
            video_url: Some(format!("/media/anomalies/{}.mp4", id)),
        }
    }

    /// Emits one message per running camera and updates the polled snapshots.
    pub async fn tick(&mut self, state: &AppState) {
        for camera_id in state.running_cameras().await {
            if self.rng.gen_bool(self.malformed_rate) {
                state.publish("{\"camera_id\": ".to_string());
                debug!("Injected malformed event for {}", camera_id);
                continue;
            }

            let payload = if self.rng.gen_bool(self.anomaly_rate) {
                let anomaly = self.anomaly(&camera_id);
                state.record_anomaly(anomaly.clone()).await;
                serde_json::to_string(&anomaly)
            } else {
                let detection = self.detection(&camera_id);
                state
                    .record_face(
                        &camera_id,
                        FaceSnapshot {
                            name: Some(detection.name.clone()),
                            auth: Some(detection.auth),
                            similarity: Some(detection.similarity),
                            bbox: detection.bbox,
                            frame_width: detection.frame_width,
                            frame_height: detection.frame_height,
                            timestamp: detection.timestamp.clone(),
                        },
                    )
                    .await;
                serde_json::to_string(&detection)
            };

            if let Ok(payload) = payload {
                state.publish(payload);
            }
        }
    }

    pub async fn run(mut self, state: Arc<AppState>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        info!("Generating events every {:?}", interval);
        loop {
            ticker.tick().await;
            self.tick(&state).await;
        }
    }
}
