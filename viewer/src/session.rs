//! Owns the camera list, the active selection and the per-camera lifecycle,
//! and wires the registry, event stream, poller, buffer and overlay together.

use livewatch_common::utils::format_timestamp;
use livewatch_common::{ApiStatus, CameraId, CameraLifecycle, CameraSession, CameraSource, LiveEvent};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::buffer::EventBuffer;
use crate::config::LiveViewConfig;
use crate::error::{LiveViewError, Result};
use crate::health::{ConnectionHealth, HealthHandle, HealthMonitor};
use crate::overlay::{DrawList, OverlayRenderer, SurfaceSize};
use crate::polling::{CameraSnapshot, PollerHandle, SnapshotBoard, SnapshotPoller};
use crate::registry::{ApiEndpoints, CameraRegistryClient, HttpMonitoringApi, MonitoringApi};
use crate::stream::{EventSink, EventStreamSubscriber, EventTransport, HttpEventTransport, StreamStatus, StreamSupervisor};

/// Everything a mounted session needs from the outside world.
pub struct LiveContext {
    pub config: LiveViewConfig,
    pub endpoints: ApiEndpoints,
    pub api: Arc<dyn MonitoringApi>,
    pub transport: Arc<dyn EventTransport>,
}

impl LiveContext {
    pub fn from_config(config: LiveViewConfig) -> Result<Self> {
        let endpoints = ApiEndpoints::new(&config.api.base_url, &config.api.api_prefix)?;
        let api = Arc::new(HttpMonitoringApi::new(endpoints.clone(), config.api.request_timeout())?);
        let transport = Arc::new(HttpEventTransport::new(&endpoints, config.api.request_timeout())?);

        Ok(Self {
            config,
            endpoints,
            api,
            transport,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ViewModel {
    pub cameras: Vec<CameraSession>,
    pub active_camera: Option<CameraId>,
    pub stream_url: Option<String>,
    pub connection: ConnectionHealth,
    pub event_stream: StreamStatus,
    /// Newest first.
    pub latest_events: Vec<LiveEvent>,
    pub last_event_at: String,
    pub snapshot: Option<CameraSnapshot>,
}

pub struct SessionController {
    config: LiveViewConfig,
    endpoints: ApiEndpoints,
    registry: CameraRegistryClient,
    sessions: Vec<CameraSession>,
    active: Option<CameraId>,
    active_tx: watch::Sender<Option<CameraId>>,
    buffer: Arc<EventBuffer>,
    board: Arc<SnapshotBoard>,
    poller: SnapshotPoller,
    active_poller: Option<PollerHandle>,
    renderer: OverlayRenderer,
    stream: Option<StreamSupervisor>,
    health: Option<HealthHandle>,
}

impl SessionController {
    /// Opens the event stream, starts health checks, loads the camera list and
    /// selects the first camera. A failed initial listing leaves the list empty.
    pub async fn mount(context: LiveContext) -> Self {
        let LiveContext {
            config,
            endpoints,
            api,
            transport,
        } = context;

        let buffer = Arc::new(EventBuffer::new(config.buffer.capacity));
        let board = Arc::new(SnapshotBoard::default());
        let (active_tx, _) = watch::channel(None);

        let sink_buffer = buffer.clone();
        let sink: EventSink = Arc::new(move |event: LiveEvent| sink_buffer.record(event));
        let stream = StreamSupervisor::spawn(
            EventStreamSubscriber::new(transport),
            sink,
            config.stream.reconnect.clone(),
        );
        let health = HealthMonitor::new(api.clone(), config.monitoring.health_check_interval()).spawn();

        let mut controller = Self {
            renderer: OverlayRenderer::from_config(&config.overlay),
            poller: SnapshotPoller::new(api.clone(), buffer.clone(), board.clone()),
            registry: CameraRegistryClient::new(api),
            config,
            endpoints,
            sessions: Vec::new(),
            active: None,
            active_tx,
            buffer,
            board,
            active_poller: None,
            stream: Some(stream),
            health: Some(health),
        };

        if let Err(e) = controller.refresh_cameras().await {
            error!("Failed to load cameras: {}", e);
        }
        if let Some(first) = controller.sessions.first().map(|s| s.camera_id.clone()) {
            controller.set_active(Some(first)).await;
        }
        info!("Live view mounted with {} camera(s)", controller.sessions.len());
        controller
    }

    /// Stops polling, closes the event stream and health checks. No buffer or
    /// snapshot writes happen after this returns.
    pub async fn unmount(mut self) {
        if let Some(poller) = self.active_poller.take() {
            poller.stop().await;
        }
        if let Some(stream) = self.stream.take() {
            stream.shutdown().await;
        }
        if let Some(health) = self.health.take() {
            health.shutdown().await;
        }
        self.active_tx.send_replace(None);
        info!("Live view unmounted");
    }

    pub fn cameras(&self) -> &[CameraSession] {
        &self.sessions
    }

    pub fn session(&self, camera_id: &CameraId) -> Option<&CameraSession> {
        self.sessions.iter().find(|s| s.camera_id == *camera_id)
    }

    pub fn active_camera(&self) -> Option<&CameraId> {
        self.active.as_ref()
    }

    pub fn active_camera_watch(&self) -> watch::Receiver<Option<CameraId>> {
        self.active_tx.subscribe()
    }

    pub fn buffer(&self) -> Arc<EventBuffer> {
        self.buffer.clone()
    }

    pub fn health_watch(&self) -> Option<watch::Receiver<ConnectionHealth>> {
        self.health.as_ref().map(HealthHandle::watch)
    }

    pub fn stream_status(&self) -> StreamStatus {
        self.stream
            .as_ref()
            .map(StreamSupervisor::status)
            .unwrap_or(StreamStatus::Closed)
    }

    /// Camera whose snapshots are currently being polled.
    pub fn polled_camera(&self) -> Option<&CameraId> {
        self.active_poller.as_ref().map(PollerHandle::camera_id)
    }

    pub fn stream_url(&self) -> Option<String> {
        self.active
            .as_ref()
            .map(|id| self.endpoints.stream_url(id, self.config.stream.fps))
    }

    /// Re-fetches the list. Known cameras keep their lifecycle state; removed
    /// ones lose their buffered state. A removed active camera hands the
    /// selection to the first remaining one.
    pub async fn refresh_cameras(&mut self) -> Result<()> {
        let ids = self.registry.list().await?.to_vec();

        let previous = std::mem::take(&mut self.sessions);
        self.sessions = ids
            .iter()
            .map(|id| {
                previous
                    .iter()
                    .find(|s| s.camera_id == *id)
                    .cloned()
                    .unwrap_or_else(|| CameraSession::new(id.clone()))
            })
            .collect();

        let active_removed = self
            .active
            .as_ref()
            .map(|id| !ids.contains(id))
            .unwrap_or(false);
        if active_removed {
            let next = ids.first().cloned();
            self.set_active(next).await;
        }

        // Cleared after the poller moved on, so nothing refills it.
        for session in previous.iter().filter(|s| !ids.contains(&s.camera_id)) {
            self.buffer.clear(&session.camera_id);
            self.board.remove(&session.camera_id);
        }
        Ok(())
    }

    pub async fn select_camera(&mut self, camera_id: &CameraId) -> Result<()> {
        if self.session(camera_id).is_none() {
            return Err(LiveViewError::UnknownCamera(camera_id.clone()));
        }
        if self.active.as_ref() == Some(camera_id) {
            return Ok(());
        }
        self.set_active(Some(camera_id.clone())).await;
        Ok(())
    }

    async fn set_active(&mut self, next: Option<CameraId>) {
        if let Some(poller) = self.active_poller.take() {
            poller.stop().await;
        }

        match &next {
            Some(camera_id) => {
                info!("Active camera: {}", camera_id);
                self.active_poller = Some(self.poller.start(camera_id.clone(), self.config.polling.interval()));
            }
            None => info!("No active camera"),
        }
        self.active = next.clone();
        self.active_tx.send_replace(next);
    }

    /// Parses `raw_source`, registers the camera once its source tests
    /// reachable, starts it and makes it active. If registration fails the
    /// camera list and selection are left as they were; a failed start only
    /// marks the new camera as `Error`.
    pub async fn add_camera(&mut self, camera_id: CameraId, raw_source: &str) -> Result<()> {
        let source: CameraSource = raw_source
            .parse()
            .map_err(|e| LiveViewError::InvalidCamera(format!("{}: {}", raw_source, e)))?;

        self.registry.add(&camera_id, source).await?;
        self.refresh_cameras().await?;
        if let Err(e) = self.start_camera(&camera_id).await {
            warn!("Camera {} was added but failed to start: {}", camera_id, e);
        }
        self.select_camera(&camera_id).await
    }

    pub async fn start_camera(&mut self, camera_id: &CameraId) -> Result<()> {
        self.set_state(camera_id, CameraLifecycle::Starting)?;
        match self.registry.start(camera_id).await {
            Ok(()) => self.set_state(camera_id, CameraLifecycle::Running),
            Err(e) => {
                self.set_state(camera_id, CameraLifecycle::Error)?;
                Err(e)
            }
        }
    }

    pub async fn stop_camera(&mut self, camera_id: &CameraId) -> Result<()> {
        if self.session(camera_id).is_none() {
            return Err(LiveViewError::UnknownCamera(camera_id.clone()));
        }
        match self.registry.stop(camera_id).await {
            Ok(()) => self.set_state(camera_id, CameraLifecycle::Stopped),
            Err(e) => {
                self.set_state(camera_id, CameraLifecycle::Error)?;
                Err(e)
            }
        }
    }

    pub async fn delete_camera(&mut self, camera_id: &CameraId) -> Result<()> {
        self.registry.delete(camera_id).await?;
        self.refresh_cameras().await
    }

    fn set_state(&mut self, camera_id: &CameraId, state: CameraLifecycle) -> Result<()> {
        let session = self
            .sessions
            .iter_mut()
            .find(|s| s.camera_id == *camera_id)
            .ok_or_else(|| LiveViewError::UnknownCamera(camera_id.clone()))?;
        session.state = state;
        Ok(())
    }

    /// Folds the latest health report into every session. Losing the API
    /// moves running cameras to `Error`.
    pub fn sync_health(&mut self) -> ConnectionHealth {
        let report = self
            .health
            .as_ref()
            .map(HealthHandle::current)
            .unwrap_or_default();

        for session in &mut self.sessions {
            if report.last_checked.is_some() {
                session.last_health_check = report.last_checked;
            }
            if report.api == ApiStatus::Offline && session.state == CameraLifecycle::Running {
                warn!("Camera {} marked as error: monitoring API offline", session.camera_id);
                session.state = CameraLifecycle::Error;
            }
        }
        report
    }

    pub fn render_overlay(&self, surface: SurfaceSize) -> DrawList {
        let events = match &self.active {
            Some(camera_id) => self.buffer.in_receipt_order(camera_id),
            None => Vec::new(),
        };
        self.renderer.render(surface, &events)
    }

    pub fn view_model(&self) -> ViewModel {
        let (latest_events, snapshot) = match &self.active {
            Some(camera_id) => (
                self.buffer.latest(camera_id, self.buffer.capacity()),
                self.board.get(camera_id),
            ),
            None => (Vec::new(), None),
        };
        let last_event_at = format_timestamp(latest_events.first().and_then(LiveEvent::timestamp));

        ViewModel {
            cameras: self.sessions.clone(),
            active_camera: self.active.clone(),
            stream_url: self.stream_url(),
            connection: self
                .health
                .as_ref()
                .map(HealthHandle::current)
                .unwrap_or_default(),
            event_stream: self.stream_status(),
            latest_events,
            last_event_at,
            snapshot,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sse_frame, Connection, FakeMonitoringApi, ScriptedTransport};
    use std::time::Duration;

    fn ids(controller: &SessionController) -> Vec<&str> {
        controller.cameras().iter().map(|s| s.camera_id.as_str()).collect()
    }

    async fn mount_with(api: Arc<FakeMonitoringApi>, transport: ScriptedTransport) -> SessionController {
        let config = LiveViewConfig::default();
        let context = LiveContext {
            endpoints: ApiEndpoints::new(&config.api.base_url, &config.api.api_prefix).unwrap(),
            config,
            api,
            transport: Arc::new(transport),
        };
        SessionController::mount(context).await
    }

    async fn mount(api: Arc<FakeMonitoringApi>) -> SessionController {
        mount_with(api, ScriptedTransport::pending()).await
    }

    #[tokio::test(start_paused = true)]
    async fn test_mount_selects_first_camera() {
        let api = Arc::new(FakeMonitoringApi::with_cameras(&["cam-01", "cam-02"]));
        let controller = mount(api.clone()).await;

        assert_eq!(ids(&controller), vec!["cam-01", "cam-02"]);
        assert_eq!(controller.active_camera().map(CameraId::as_str), Some("cam-01"));
        assert_eq!(controller.polled_camera().map(CameraId::as_str), Some("cam-01"));
        assert_eq!(
            controller.stream_url().as_deref(),
            Some("http://localhost:8000/api/cameras/cam-01/stream?fps=6")
        );
        assert!(controller
            .cameras()
            .iter()
            .all(|s| s.state == CameraLifecycle::Stopped));
        controller.unmount().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_registry_has_no_selection() {
        let api = Arc::new(FakeMonitoringApi::with_cameras(&[]));
        let controller = mount(api).await;

        assert!(controller.active_camera().is_none());
        assert!(controller.polled_camera().is_none());
        assert!(controller.stream_url().is_none());
        assert!(controller.render_overlay(SurfaceSize::new(640.0, 480.0)).commands.len() == 1);
        controller.unmount().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_switching_camera_moves_polling() {
        let api = Arc::new(FakeMonitoringApi::with_cameras(&["a", "b", "c"]));
        let mut controller = mount(api.clone()).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        let polls_of_a = api.face_fetches("a");
        assert!(polls_of_a >= 1);

        controller.select_camera(&CameraId::from("b")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(api.face_fetches("a"), polls_of_a);
        assert!(api.face_fetches("b") >= 3);
        assert_eq!(api.face_fetches("c"), 0);
        assert_eq!(controller.polled_camera().map(CameraId::as_str), Some("b"));

        let unknown = controller.select_camera(&CameraId::from("z")).await;
        assert!(matches!(unknown, Err(LiveViewError::UnknownCamera(_))));
        assert_eq!(controller.active_camera().map(CameraId::as_str), Some("b"));
        controller.unmount().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_deleting_active_camera_selects_next() {
        let api = Arc::new(FakeMonitoringApi::with_cameras(&["a", "b", "c"]));
        let mut controller = mount(api.clone()).await;

        controller.select_camera(&CameraId::from("b")).await.unwrap();
        controller.delete_camera(&CameraId::from("b")).await.unwrap();
        assert_eq!(ids(&controller), vec!["a", "c"]);
        assert_eq!(controller.active_camera().map(CameraId::as_str), Some("a"));

        // Deleting a non-active camera keeps the selection.
        controller.delete_camera(&CameraId::from("c")).await.unwrap();
        assert_eq!(controller.active_camera().map(CameraId::as_str), Some("a"));

        controller.delete_camera(&CameraId::from("a")).await.unwrap();
        assert!(controller.cameras().is_empty());
        assert!(controller.active_camera().is_none());
        assert!(controller.polled_camera().is_none());

        let polls = api.face_fetches("a");
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(api.face_fetches("a"), polls);
        controller.unmount().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_starts_and_selects_camera() {
        let api = Arc::new(FakeMonitoringApi::with_cameras(&["cam-01"]));
        let mut controller = mount(api.clone()).await;

        controller
            .add_camera(CameraId::from("gate"), "rtsp://10.0.0.7/live")
            .await
            .unwrap();

        assert_eq!(ids(&controller), vec!["cam-01", "gate"]);
        assert_eq!(controller.active_camera().map(CameraId::as_str), Some("gate"));
        assert_eq!(
            controller.session(&CameraId::from("gate")).map(|s| s.state),
            Some(CameraLifecycle::Running)
        );
        assert!(api.is_running(&CameraId::from("gate")));
        controller.unmount().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_add_keeps_state() {
        let api = Arc::new(FakeMonitoringApi::with_cameras(&["cam-01", "cam-02"]));
        let mut controller = mount(api.clone()).await;

        let result = controller.add_camera(CameraId::from("cam-02"), "0").await;
        assert!(matches!(result, Err(LiveViewError::DuplicateCamera(_))));
        assert_eq!(ids(&controller), vec!["cam-01", "cam-02"]);
        assert_eq!(controller.active_camera().map(CameraId::as_str), Some("cam-01"));

        let invalid = controller.add_camera(CameraId::from("cam-03"), "   ").await;
        assert!(matches!(invalid, Err(LiveViewError::InvalidCamera(_))));
        assert_eq!(api.connection_tests(), 1);
        controller.unmount().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_failure_marks_error() {
        let api = Arc::new(FakeMonitoringApi::with_cameras(&["cam-01"]));
        api.fail_start("cam-01");
        let mut controller = mount(api.clone()).await;
        let id = CameraId::from("cam-01");

        assert!(controller.start_camera(&id).await.is_err());
        assert_eq!(controller.session(&id).map(|s| s.state), Some(CameraLifecycle::Error));

        controller.stop_camera(&id).await.unwrap();
        assert_eq!(controller.session(&id).map(|s| s.state), Some(CameraLifecycle::Stopped));
        controller.unmount().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_failure_marks_error() {
        let api = Arc::new(FakeMonitoringApi::with_cameras(&["cam-01"]));
        let mut controller = mount(api.clone()).await;
        let id = CameraId::from("cam-01");

        controller.start_camera(&id).await.unwrap();
        assert_eq!(controller.session(&id).map(|s| s.state), Some(CameraLifecycle::Running));

        // Removed behind the controller's back, so the backend answers 404.
        api.delete_camera(&id).await.unwrap();
        let result = controller.stop_camera(&id).await;
        assert!(matches!(result, Err(LiveViewError::Backend { status: 404, .. })));
        assert_eq!(controller.session(&id).map(|s| s.state), Some(CameraLifecycle::Error));
        controller.unmount().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_api_outage_moves_running_cameras_to_error() {
        let api = Arc::new(FakeMonitoringApi::with_cameras(&["cam-01", "cam-02"]));
        let mut controller = mount(api.clone()).await;
        controller.start_camera(&CameraId::from("cam-01")).await.unwrap();

        let mut health = controller.health_watch().unwrap();
        health.wait_for(|h| h.api == ApiStatus::Online).await.unwrap();
        controller.sync_health();
        assert!(controller.cameras().iter().all(|s| s.last_health_check.is_some()));

        api.set_online(false);
        health.wait_for(|h| h.api == ApiStatus::Offline).await.unwrap();
        let report = controller.sync_health();
        assert_eq!(report.api, ApiStatus::Offline);

        let states: Vec<_> = controller.cameras().iter().map(|s| s.state).collect();
        assert_eq!(states, vec![CameraLifecycle::Error, CameraLifecycle::Stopped]);
        controller.unmount().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_events_render_for_active_camera() {
        let api = Arc::new(FakeMonitoringApi::with_cameras(&["cam-01", "cam-02"]));
        let (feed, connection) = Connection::channel();
        let mut controller = mount_with(api, ScriptedTransport::new(vec![connection])).await;

        feed.send(sse_frame(
            r#"{"camera_id":"cam-02","name":"Bob","similarity":77,"auth":false,"bbox":[10,10,50,50],"frame_width":320,"frame_height":240}"#,
        ))
        .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let surface = SurfaceSize::new(640.0, 480.0);
        assert_eq!(controller.render_overlay(surface).box_count(), 0);

        controller.select_camera(&CameraId::from("cam-02")).await.unwrap();
        let list = controller.render_overlay(surface);
        assert_eq!(list.labels().collect::<Vec<_>>(), vec!["Bob (77%)"]);

        let view = controller.view_model();
        assert_eq!(view.latest_events.len(), 1);
        assert_eq!(view.event_stream, StreamStatus::Open);
        controller.unmount().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_writes_after_unmount() {
        let api = Arc::new(FakeMonitoringApi::with_cameras(&["cam-01"]));
        let (feed, connection) = Connection::channel();
        let controller = mount_with(api.clone(), ScriptedTransport::new(vec![connection])).await;
        let buffer = controller.buffer();
        tokio::time::sleep(Duration::from_millis(10)).await;

        controller.unmount().await;
        let polls = api.face_fetches("cam-01");
        let _ = feed.send(sse_frame(r#"{"camera_id":"cam-01","name":"Late","similarity":50}"#));
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(api.face_fetches("cam-01"), polls);
        assert!(buffer.is_empty(&CameraId::from("cam-01")));
    }
}
