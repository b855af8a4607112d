//! Camera registry: the REST seam to the monitoring backend and the
//! registry client that keeps the last fetched camera list.

mod endpoints;
mod http;

pub use endpoints::ApiEndpoints;
pub use http::HttpMonitoringApi;
pub(crate) use http::backend_error;

use async_trait::async_trait;
use livewatch_common::{
    AddCameraRequest, AnomalyEvent, CameraDescriptor, CameraId, CameraSource, FaceSnapshot,
    HealthResponse,
};
use std::sync::Arc;
use tracing::{info, warn};
use validator::Validate;

use crate::error::{LiveViewError, Result};

#[async_trait]
pub trait MonitoringApi: Send + Sync {
    async fn health(&self) -> Result<HealthResponse>;
    async fn list_cameras(&self) -> Result<Vec<CameraId>>;
    async fn add_camera(&self, request: &AddCameraRequest) -> Result<CameraDescriptor>;
    async fn start_camera(&self, camera_id: &CameraId) -> Result<()>;
    async fn stop_camera(&self, camera_id: &CameraId) -> Result<()>;
    async fn delete_camera(&self, camera_id: &CameraId) -> Result<()>;
    async fn test_connection(&self, source: &CameraSource) -> Result<bool>;
    async fn fetch_faces(&self, camera_id: &CameraId) -> Result<Option<FaceSnapshot>>;
    async fn fetch_anomalies(&self, camera_id: &CameraId) -> Result<Vec<AnomalyEvent>>;
}

pub struct CameraRegistryClient {
    api: Arc<dyn MonitoringApi>,
    cameras: Vec<CameraId>,
}

impl CameraRegistryClient {
    pub fn new(api: Arc<dyn MonitoringApi>) -> Self {
        Self {
            api,
            cameras: Vec::new(),
        }
    }

    pub fn api(&self) -> Arc<dyn MonitoringApi> {
        self.api.clone()
    }

    /// Camera ids from the most recent successful `list`.
    pub fn cameras(&self) -> &[CameraId] {
        &self.cameras
    }

    pub async fn list(&mut self) -> Result<&[CameraId]> {
        let cameras = self.api.list_cameras().await?;
        info!("Registry lists {} camera(s)", cameras.len());
        self.cameras = cameras;
        Ok(&self.cameras)
    }

    pub async fn test_connection(&self, source: &CameraSource) -> Result<bool> {
        self.api.test_connection(source).await
    }

    /// Registers a camera after confirming its source is reachable.
    pub async fn add(&self, camera_id: &CameraId, source: CameraSource) -> Result<CameraDescriptor> {
        let request = AddCameraRequest {
            camera_id: camera_id.to_string(),
            source,
        };
        request.validate()?;

        if !self.api.test_connection(&request.source).await? {
            warn!("Refusing to add {}: source {} is unreachable", camera_id, request.source);
            return Err(LiveViewError::Unreachable(request.source.to_string()));
        }

        match self.api.add_camera(&request).await {
            Ok(descriptor) => {
                info!("Added camera {} -> {}", camera_id, request.source);
                Ok(descriptor)
            }
            Err(e) => {
                warn!("Failed to add camera {}: {}", camera_id, e);
                Err(e)
            }
        }
    }

    pub async fn start(&self, camera_id: &CameraId) -> Result<()> {
        self.api.start_camera(camera_id).await?;
        info!("Started camera {}", camera_id);
        Ok(())
    }

    pub async fn stop(&self, camera_id: &CameraId) -> Result<()> {
        self.api.stop_camera(camera_id).await?;
        info!("Stopped camera {}", camera_id);
        Ok(())
    }

    pub async fn delete(&self, camera_id: &CameraId) -> Result<()> {
        self.api.delete_camera(camera_id).await?;
        info!("Deleted camera {}", camera_id);
        Ok(())
    }
}
