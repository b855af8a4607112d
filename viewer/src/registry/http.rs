use async_trait::async_trait;
use livewatch_common::{
    AddCameraRequest, AnomaliesResponse, AnomalyEvent, CameraDescriptor, CameraId, CameraSource,
    ErrorBody, FaceSnapshot, HealthResponse, ListCamerasResponse, TestConnectionRequest,
    TestConnectionResponse,
};
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::{ApiEndpoints, MonitoringApi};
use crate::error::{LiveViewError, Result};

pub struct HttpMonitoringApi {
    client: Client,
    endpoints: ApiEndpoints,
}

impl HttpMonitoringApi {
    pub fn new(endpoints: ApiEndpoints, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoints })
    }

    pub fn endpoints(&self) -> &ApiEndpoints {
        &self.endpoints
    }

    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(backend_error(status, &body))
    }
}

/// Maps a non-success response to `Backend`, reading `{detail}` when present.
pub(crate) fn backend_error(status: StatusCode, body: &str) -> LiveViewError {
    let detail = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.detail)
        .or_else(|| {
            let trimmed = body.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        });

    LiveViewError::Backend {
        status: status.as_u16(),
        detail,
    }
}

/// Only an explicit `{reachable: false}` means unreachable; a success without
/// the field counts as reachable and a failed request is a backend error.
fn reachability(source: &CameraSource, status: StatusCode, body: &str) -> Result<bool> {
    if !status.is_success() {
        return Err(backend_error(status, body));
    }
    if body.trim().is_empty() {
        return Ok(true);
    }
    match serde_json::from_str::<TestConnectionResponse>(body) {
        Ok(response) => Ok(response.reachable.unwrap_or(true)),
        Err(e) => {
            warn!("Unreadable connection test reply for {}: {}", source, e);
            Ok(true)
        }
    }
}

fn descriptor_from_body(camera_id: &str, body: &str) -> CameraDescriptor {
    if body.trim().is_empty() {
        return CameraDescriptor::default();
    }
    serde_json::from_str(body).unwrap_or_else(|e| {
        warn!("Unreadable descriptor for added camera {}: {}", camera_id, e);
        CameraDescriptor::default()
    })
}

fn is_duplicate(error: &LiveViewError) -> bool {
    match error {
        LiveViewError::Backend { status, detail } => {
            *status == StatusCode::CONFLICT.as_u16()
                || detail
                    .as_deref()
                    .map(|d| d.to_ascii_lowercase().contains("already exists"))
                    .unwrap_or(false)
        }
        _ => false,
    }
}

#[async_trait]
impl MonitoringApi for HttpMonitoringApi {
    async fn health(&self) -> Result<HealthResponse> {
        let response = self.client.get(self.endpoints.health()).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn list_cameras(&self) -> Result<Vec<CameraId>> {
        let response = self.client.get(self.endpoints.cameras()).send().await?;
        let body: ListCamerasResponse = Self::check(response).await?.json().await?;
        Ok(body.into_ids())
    }

    #[instrument(skip(self, request), fields(camera_id = %request.camera_id))]
    async fn add_camera(&self, request: &AddCameraRequest) -> Result<CameraDescriptor> {
        let response = self
            .client
            .post(self.endpoints.cameras())
            .json(request)
            .send()
            .await?;

        match Self::check(response).await {
            Ok(response) => {
                let text = response.text().await?;
                Ok(descriptor_from_body(&request.camera_id, &text))
            }
            Err(e) if is_duplicate(&e) => Err(LiveViewError::DuplicateCamera(CameraId::from(
                request.camera_id.as_str(),
            ))),
            Err(e) => Err(e),
        }
    }

    async fn start_camera(&self, camera_id: &CameraId) -> Result<()> {
        let response = self
            .client
            .post(self.endpoints.camera_action(camera_id, "start"))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn stop_camera(&self, camera_id: &CameraId) -> Result<()> {
        let response = self
            .client
            .post(self.endpoints.camera_action(camera_id, "stop"))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn delete_camera(&self, camera_id: &CameraId) -> Result<()> {
        let response = self.client.delete(self.endpoints.camera(camera_id)).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn test_connection(&self, source: &CameraSource) -> Result<bool> {
        let response = self
            .client
            .post(self.endpoints.test_connection())
            .json(&TestConnectionRequest { source: source.clone() })
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        reachability(source, status, &text)
    }

    async fn fetch_faces(&self, camera_id: &CameraId) -> Result<Option<FaceSnapshot>> {
        let response = self.client.get(self.endpoints.faces(camera_id)).send().await?;
        let snapshot: Option<FaceSnapshot> = Self::check(response).await?.json().await?;
        Ok(snapshot.filter(|s| !s.is_empty()))
    }

    async fn fetch_anomalies(&self, camera_id: &CameraId) -> Result<Vec<AnomalyEvent>> {
        let response = self.client.get(self.endpoints.anomalies(camera_id)).send().await?;
        let body: Option<AnomaliesResponse> = Self::check(response).await?.json().await?;
        let anomalies: Vec<AnomalyEvent> = body
            .map(AnomaliesResponse::into_vec)
            .unwrap_or_default()
            .into_iter()
            .map(|mut anomaly| {
                if anomaly.camera_id.is_empty() {
                    anomaly.camera_id = camera_id.clone();
                }
                anomaly.thumbnail_url = anomaly.thumbnail_url.map(|u| self.endpoints.resolve_asset(&u));
                anomaly.video_url = anomaly.video_url.map(|u| self.endpoints.resolve_asset(&u));
                anomaly
            })
            .collect();

        debug!("Fetched {} anomalies for {}", anomalies.len(), camera_id);
        Ok(anomalies)
    }
}
