//! In-memory doubles for the REST and push-feed seams.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use livewatch_common::{
    AddCameraRequest, AnomalyEvent, CameraDescriptor, CameraId, CameraSource, FaceSnapshot,
    HealthResponse,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::error::{LiveViewError, Result};
use crate::registry::MonitoringApi;
use crate::stream::{ByteStream, EventTransport};

#[derive(Default)]
struct FakeState {
    cameras: Vec<(CameraId, CameraSource)>,
    running: HashSet<CameraId>,
    unreachable: bool,
    offline: bool,
    failing_polls: bool,
    failing_starts: HashSet<CameraId>,
    faces: HashMap<CameraId, FaceSnapshot>,
    anomalies: HashMap<CameraId, Vec<AnomalyEvent>>,
    face_fetches: HashMap<CameraId, usize>,
    anomaly_fetches: HashMap<CameraId, usize>,
    add_calls: usize,
    connection_tests: usize,
}

#[derive(Default)]
pub(crate) struct FakeMonitoringApi {
    state: Mutex<FakeState>,
}

fn not_found() -> LiveViewError {
    LiveViewError::Backend {
        status: 404,
        detail: Some("Camera not found".to_string()),
    }
}

impl FakeMonitoringApi {
    pub(crate) fn with_cameras(ids: &[&str]) -> Self {
        let api = Self::default();
        api.state.lock().unwrap().cameras = ids
            .iter()
            .enumerate()
            .map(|(idx, id)| (CameraId::from(*id), CameraSource::DeviceIndex(idx as u32)))
            .collect();
        api
    }

    pub(crate) fn set_reachable(&self, reachable: bool) {
        self.state.lock().unwrap().unreachable = !reachable;
    }

    pub(crate) fn set_online(&self, online: bool) {
        self.state.lock().unwrap().offline = !online;
    }

    pub(crate) fn set_polls_failing(&self, failing: bool) {
        self.state.lock().unwrap().failing_polls = failing;
    }

    pub(crate) fn fail_start(&self, camera_id: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_starts
            .insert(CameraId::from(camera_id));
    }

    pub(crate) fn set_face(&self, camera_id: &str, face: FaceSnapshot) {
        self.state
            .lock()
            .unwrap()
            .faces
            .insert(CameraId::from(camera_id), face);
    }

    pub(crate) fn set_anomalies(&self, camera_id: &str, anomalies: Vec<AnomalyEvent>) {
        self.state
            .lock()
            .unwrap()
            .anomalies
            .insert(CameraId::from(camera_id), anomalies);
    }

    pub(crate) fn add_calls(&self) -> usize {
        self.state.lock().unwrap().add_calls
    }

    pub(crate) fn connection_tests(&self) -> usize {
        self.state.lock().unwrap().connection_tests
    }

    pub(crate) fn is_running(&self, camera_id: &CameraId) -> bool {
        self.state.lock().unwrap().running.contains(camera_id)
    }

    pub(crate) fn face_fetches(&self, camera_id: &str) -> usize {
        let state = self.state.lock().unwrap();
        state
            .face_fetches
            .get(&CameraId::from(camera_id))
            .copied()
            .unwrap_or(0)
    }

    pub(crate) fn anomaly_fetches(&self, camera_id: &str) -> usize {
        let state = self.state.lock().unwrap();
        state
            .anomaly_fetches
            .get(&CameraId::from(camera_id))
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl MonitoringApi for FakeMonitoringApi {
    async fn health(&self) -> Result<HealthResponse> {
        if self.state.lock().unwrap().offline {
            return Err(LiveViewError::Network("connection refused".to_string()));
        }
        Ok(HealthResponse {
            status: "ok".to_string(),
        })
    }

    async fn list_cameras(&self) -> Result<Vec<CameraId>> {
        let state = self.state.lock().unwrap();
        Ok(state.cameras.iter().map(|(id, _)| id.clone()).collect())
    }

    async fn add_camera(&self, request: &AddCameraRequest) -> Result<CameraDescriptor> {
        let mut state = self.state.lock().unwrap();
        state.add_calls += 1;
        let camera_id = CameraId::from(request.camera_id.as_str());
        if state.cameras.iter().any(|(id, _)| *id == camera_id) {
            return Err(LiveViewError::DuplicateCamera(camera_id));
        }
        state.cameras.push((camera_id.clone(), request.source.clone()));
        Ok(CameraDescriptor {
            camera_id: Some(camera_id),
            source: Some(request.source.clone()),
            status: Some("stopped".to_string()),
        })
    }

    async fn start_camera(&self, camera_id: &CameraId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.cameras.iter().any(|(id, _)| id == camera_id) {
            return Err(not_found());
        }
        if state.failing_starts.contains(camera_id) {
            return Err(LiveViewError::Backend {
                status: 500,
                detail: Some("Could not open source".to_string()),
            });
        }
        state.running.insert(camera_id.clone());
        Ok(())
    }

    async fn stop_camera(&self, camera_id: &CameraId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.cameras.iter().any(|(id, _)| id == camera_id) {
            return Err(not_found());
        }
        state.running.remove(camera_id);
        Ok(())
    }

    async fn delete_camera(&self, camera_id: &CameraId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let before = state.cameras.len();
        state.cameras.retain(|(id, _)| id != camera_id);
        if state.cameras.len() == before {
            return Err(not_found());
        }
        state.running.remove(camera_id);
        Ok(())
    }

    async fn test_connection(&self, _source: &CameraSource) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        state.connection_tests += 1;
        Ok(!state.unreachable)
    }

    async fn fetch_faces(&self, camera_id: &CameraId) -> Result<Option<FaceSnapshot>> {
        let mut state = self.state.lock().unwrap();
        *state.face_fetches.entry(camera_id.clone()).or_default() += 1;
        if state.failing_polls {
            return Err(LiveViewError::Network("poll timed out".to_string()));
        }
        Ok(state.faces.get(camera_id).cloned())
    }

    async fn fetch_anomalies(&self, camera_id: &CameraId) -> Result<Vec<AnomalyEvent>> {
        let mut state = self.state.lock().unwrap();
        *state.anomaly_fetches.entry(camera_id.clone()).or_default() += 1;
        if state.failing_polls {
            return Err(LiveViewError::Network("poll timed out".to_string()));
        }
        Ok(state.anomalies.get(camera_id).cloned().unwrap_or_default())
    }
}

pub(crate) type FeedSender = mpsc::UnboundedSender<Result<Bytes>>;

/// One scripted outcome of `EventTransport::connect`.
pub(crate) enum Connection {
    Refuse,
    Feed(mpsc::UnboundedReceiver<Result<Bytes>>),
    Pending,
}

impl Connection {
    pub(crate) fn channel() -> (FeedSender, Connection) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Connection::Feed(rx))
    }
}

/// Replays connection outcomes in order; once exhausted every connect hangs open.
pub(crate) struct ScriptedTransport {
    script: Mutex<VecDeque<Connection>>,
    connects: AtomicUsize,
}

impl ScriptedTransport {
    pub(crate) fn new(script: Vec<Connection>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            connects: AtomicUsize::new(0),
        }
    }

    pub(crate) fn pending() -> Self {
        Self::new(vec![Connection::Pending])
    }

    pub(crate) fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventTransport for ScriptedTransport {
    async fn connect(&self) -> Result<ByteStream> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next.unwrap_or(Connection::Pending) {
            Connection::Refuse => Err(LiveViewError::Network("connection refused".to_string())),
            Connection::Feed(rx) => Ok(UnboundedReceiverStream::new(rx).boxed()),
            Connection::Pending => Ok(futures::stream::pending().boxed()),
        }
    }
}

pub(crate) fn sse_frame(payload: &str) -> Result<Bytes> {
    Ok(Bytes::from(format!("data: {}\n\n", payload)))
}
