use actix_web::web::Bytes;
use actix_web::{delete, get, http::header, post, web, HttpResponse};
use async_stream::stream;
use livewatch_common::utils::validate_url;
use livewatch_common::{
    AddCameraRequest, CameraDescriptor, CameraId, CameraSource, HealthResponse, TestConnectionRequest,
    TestConnectionResponse,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use validator::Validate;

use crate::state::{AppState, SimCamera};

const KEEP_ALIVE: Duration = Duration::from_secs(15);
const MAX_DEVICE_INDEX: u32 = 4;

pub type SharedState = web::Data<Arc<AppState>>;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .service(health)
            .service(list_cameras)
            .service(test_connection)
            .service(add_camera)
            .service(start_camera)
            .service(stop_camera)
            .service(delete_camera)
            .service(get_faces)
            .service(get_anomalies)
            .service(event_stream),
    );
}

fn detail(message: impl Into<String>) -> serde_json::Value {
    json!({ "detail": message.into() })
}

fn is_reachable(source: &CameraSource) -> bool {
    match source {
        CameraSource::DeviceIndex(index) => *index < MAX_DEVICE_INDEX,
        CameraSource::Url(url) => validate_url(url).is_ok(),
    }
}

async fn set_running(state: &AppState, camera_id: &CameraId, running: bool) -> Option<SimCamera> {
    let mut cameras = state.cameras.write().await;
    let camera = cameras.iter_mut().find(|c| c.camera_id == *camera_id)?;
    camera.running = running;
    Some(camera.clone())
}

#[get("/health")]
async fn health() -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok".to_string(),
    })
}

#[get("/cameras")]
async fn list_cameras(state: SharedState) -> HttpResponse {
    let cameras: Vec<CameraId> = state
        .cameras
        .read()
        .await
        .iter()
        .map(|c| c.camera_id.clone())
        .collect();
    HttpResponse::Ok().json(json!({ "cameras": cameras }))
}

#[post("/cameras/test-connection")]
async fn test_connection(request: web::Json<TestConnectionRequest>) -> HttpResponse {
    let reachable = is_reachable(&request.source);
    info!("Connection test for {}: {}", request.source, reachable);
    HttpResponse::Ok().json(TestConnectionResponse {
        reachable: Some(reachable),
        detail: (!reachable).then(|| format!("Could not open {}", request.source)),
    })
}

#[post("/cameras")]
async fn add_camera(state: SharedState, request: web::Json<AddCameraRequest>) -> HttpResponse {
    let request = request.into_inner();
    if let Err(e) = request.validate() {
        return HttpResponse::UnprocessableEntity().json(detail(e.to_string()));
    }

    let camera_id = CameraId::from(request.camera_id.as_str());
    let mut cameras = state.cameras.write().await;
    if cameras.iter().any(|c| c.camera_id == camera_id) {
        warn!("Rejected duplicate camera {}", camera_id);
        return HttpResponse::Conflict().json(detail(format!("Camera {} already exists", camera_id)));
    }

    cameras.push(SimCamera {
        camera_id: camera_id.clone(),
        source: request.source.clone(),
        running: false,
    });
    info!("Registered camera {} -> {}", camera_id, request.source);

    HttpResponse::Created().json(CameraDescriptor {
        camera_id: Some(camera_id),
        source: Some(request.source),
        status: Some("stopped".to_string()),
    })
}

#[post("/cameras/{id}/start")]
async fn start_camera(state: SharedState, path: web::Path<String>) -> HttpResponse {
    let camera_id = CameraId::from(path.into_inner());
    match set_running(&state, &camera_id, true).await {
        Some(_) => {
            info!("Camera {} started", camera_id);
            HttpResponse::Ok().json(json!({ "camera_id": camera_id, "status": "running" }))
        }
        None => HttpResponse::NotFound().json(detail("Camera not found")),
    }
}

#[post("/cameras/{id}/stop")]
async fn stop_camera(state: SharedState, path: web::Path<String>) -> HttpResponse {
    let camera_id = CameraId::from(path.into_inner());
    match set_running(&state, &camera_id, false).await {
        Some(_) => {
            info!("Camera {} stopped", camera_id);
            HttpResponse::Ok().json(json!({ "camera_id": camera_id, "status": "stopped" }))
        }
        None => HttpResponse::NotFound().json(detail("Camera not found")),
    }
}

#[delete("/cameras/{id}")]
async fn delete_camera(state: SharedState, path: web::Path<String>) -> HttpResponse {
    let camera_id = CameraId::from(path.into_inner());
    let removed = {
        let mut cameras = state.cameras.write().await;
        let before = cameras.len();
        cameras.retain(|c| c.camera_id != camera_id);
        cameras.len() != before
    };

    if !removed {
        return HttpResponse::NotFound().json(detail("Camera not found"));
    }
    state.feeds.write().await.remove(&camera_id);
    info!("Camera {} deleted", camera_id);
    HttpResponse::NoContent().finish()
}

#[get("/cameras/{id}/faces")]
async fn get_faces(state: SharedState, path: web::Path<String>) -> HttpResponse {
    let camera_id = CameraId::from(path.into_inner());
    let feeds = state.feeds.read().await;
    match feeds.get(&camera_id).and_then(|f| f.face.as_ref()) {
        Some(face) => HttpResponse::Ok().json(face),
        None => HttpResponse::Ok().json(json!({})),
    }
}

#[get("/cameras/{id}/anomalies")]
async fn get_anomalies(state: SharedState, path: web::Path<String>) -> HttpResponse {
    let camera_id = CameraId::from(path.into_inner());
    let feeds = state.feeds.read().await;
    let anomalies: Vec<_> = feeds
        .get(&camera_id)
        .map(|f| f.anomalies.iter().cloned().collect())
        .unwrap_or_default();
    HttpResponse::Ok().json(anomalies)
}

#[get("/events/stream")]
async fn event_stream(state: SharedState) -> HttpResponse {
    let mut rx = state.events.subscribe();
    info!("Event stream subscriber connected");

    let stream = stream! {
        let mut keep_alive = tokio::time::interval(KEEP_ALIVE);
        keep_alive.tick().await;
        loop {
            tokio::select! {
                message = rx.recv() => match message {
                    Ok(payload) => {
                        yield Ok::<Bytes, actix_web::Error>(Bytes::from(format!("data: {}\n\n", payload)));
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Event stream subscriber lagged, skipped {} events", skipped);
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = keep_alive.tick() => {
                    yield Ok::<Bytes, actix_web::Error>(Bytes::from_static(b": keep-alive\n\n"));
                }
            }
        }
    };

    HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, "text/event-stream"))
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .streaming(stream)
}
