use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use validator::{Validate, ValidationError};

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CameraId(String);

impl CameraId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CameraId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for CameraId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for CameraId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Where the backend reads frames from: a local capture device or a network stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CameraSource {
    DeviceIndex(u32),
    Url(String),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SourceParseError {
    #[error("camera source is empty")]
    Empty,

    #[error("device index {0} is out of range")]
    IndexOutOfRange(String),
}

impl FromStr for CameraSource {
    type Err = SourceParseError;

    /// Digits only means a device index, anything else is taken as a URL.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(SourceParseError::Empty);
        }

        if trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return trimmed
                .parse::<u32>()
                .map(CameraSource::DeviceIndex)
                .map_err(|_| SourceParseError::IndexOutOfRange(trimmed.to_string()));
        }

        Ok(CameraSource::Url(trimmed.to_string()))
    }
}

impl fmt::Display for CameraSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraSource::DeviceIndex(index) => write!(f, "device:{}", index),
            CameraSource::Url(url) => f.write_str(url),
        }
    }
}

/// Axis-aligned box in source-frame pixels, carried on the wire as `[x, y, w, h]`.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }
}

impl From<[f64; 4]> for BBox {
    fn from([x, y, width, height]: [f64; 4]) -> Self {
        Self { x, y, width, height }
    }
}

impl From<BBox> for [f64; 4] {
    fn from(bbox: BBox) -> Self {
        [bbox.x, bbox.y, bbox.width, bbox.height]
    }
}

/// Pixel dimensions of the frame a detector worked on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    /// Both dimensions present and non-zero, otherwise `None`.
    pub fn from_parts(width: Option<u32>, height: Option<u32>) -> Option<Self> {
        match (width, height) {
            (Some(width), Some(height)) if width > 0 && height > 0 => Some(Self { width, height }),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DetectionEvent {
    #[serde(alias = "camera")]
    pub camera_id: CameraId,
    #[serde(default = "unknown_name", deserialize_with = "name_or_unknown")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub similarity: f64,
    #[serde(default)]
    pub auth: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BBox>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_height: Option<u32>,
    #[serde(default, deserialize_with = "flexible_timestamp", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AnomalyEvent {
    #[serde(default, alias = "camera")]
    pub camera_id: CameraId,
    #[serde(default, alias = "incident_id", alias = "anomaly_id", deserialize_with = "string_or_number")]
    pub id: Option<String>,
    #[serde(default = "uncategorized", alias = "type")]
    pub category: String,
    #[serde(default, alias = "similarity", deserialize_with = "lenient_f64")]
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BBox>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_height: Option<u32>,
    #[serde(default, alias = "date", deserialize_with = "flexible_timestamp", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, alias = "image_url", skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
}

impl AnomalyEvent {
    /// Identity used to tell a repeated anomaly from a new one.
    pub fn key(&self) -> Option<&str> {
        self.id.as_deref().or(self.timestamp.as_deref())
    }
}

/// Latest face match reported by the per-camera snapshot endpoint.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct FaceSnapshot {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub auth: Option<bool>,
    #[serde(default)]
    pub similarity: Option<f64>,
    #[serde(default)]
    pub bbox: Option<BBox>,
    #[serde(default)]
    pub frame_width: Option<u32>,
    #[serde(default)]
    pub frame_height: Option<u32>,
    #[serde(default, deserialize_with = "flexible_timestamp")]
    pub timestamp: Option<String>,
}

impl FaceSnapshot {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.similarity.is_none() && self.bbox.is_none()
    }

    pub fn into_event(self, camera_id: CameraId) -> DetectionEvent {
        DetectionEvent {
            camera_id,
            name: self
                .name
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(unknown_name),
            similarity: self.similarity.unwrap_or(0.0),
            auth: self.auth.unwrap_or(false),
            bbox: self.bbox,
            frame_width: self.frame_width,
            frame_height: self.frame_height,
            timestamp: self.timestamp,
        }
    }
}

/// One message from the push feed or one polled result.
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum LiveEvent {
    Detection(DetectionEvent),
    Anomaly(AnomalyEvent),
}

#[derive(Error, Debug)]
pub enum EventDecodeError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("payload has no camera_id")]
    MissingCameraId,
}

impl LiveEvent {
    /// Decodes a single push message. Anomalies are recognised by a
    /// `category`/`type` field or `event_type == "anomaly"`.
    pub fn from_json(payload: &str) -> Result<Self, EventDecodeError> {
        let value: serde_json::Value = serde_json::from_str(payload)?;
        let object = value.as_object().ok_or(EventDecodeError::NotAnObject)?;

        let camera_id = object
            .get("camera_id")
            .or_else(|| object.get("camera"))
            .and_then(|v| v.as_str())
            .filter(|id| !id.trim().is_empty());
        if camera_id.is_none() {
            return Err(EventDecodeError::MissingCameraId);
        }

        let is_anomaly = object.contains_key("category")
            || object.contains_key("type")
            || object.get("event_type").and_then(|v| v.as_str()) == Some("anomaly");

        if is_anomaly {
            Ok(LiveEvent::Anomaly(serde_json::from_value(value)?))
        } else {
            Ok(LiveEvent::Detection(serde_json::from_value(value)?))
        }
    }

    pub fn camera_id(&self) -> &CameraId {
        match self {
            LiveEvent::Detection(event) => &event.camera_id,
            LiveEvent::Anomaly(event) => &event.camera_id,
        }
    }

    pub fn bbox(&self) -> Option<BBox> {
        match self {
            LiveEvent::Detection(event) => event.bbox,
            LiveEvent::Anomaly(event) => event.bbox,
        }
    }

    pub fn frame_size(&self) -> Option<FrameSize> {
        match self {
            LiveEvent::Detection(event) => FrameSize::from_parts(event.frame_width, event.frame_height),
            LiveEvent::Anomaly(event) => FrameSize::from_parts(event.frame_width, event.frame_height),
        }
    }

    pub fn timestamp(&self) -> Option<&str> {
        match self {
            LiveEvent::Detection(event) => event.timestamp.as_deref(),
            LiveEvent::Anomaly(event) => event.timestamp.as_deref(),
        }
    }

    /// Confidence on the 0-100 scale.
    pub fn confidence(&self) -> f64 {
        match self {
            LiveEvent::Detection(event) => event.similarity,
            LiveEvent::Anomaly(event) => event.confidence,
        }
    }
}

impl From<DetectionEvent> for LiveEvent {
    fn from(event: DetectionEvent) -> Self {
        LiveEvent::Detection(event)
    }
}

impl From<AnomalyEvent> for LiveEvent {
    fn from(event: AnomalyEvent) -> Self {
        LiveEvent::Anomaly(event)
    }
}

// Camera session state as seen by the client
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CameraLifecycle {
    Stopped,
    Starting,
    Running,
    Error,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CameraSession {
    pub camera_id: CameraId,
    pub state: CameraLifecycle,
    pub last_health_check: Option<DateTime<Utc>>,
}

impl CameraSession {
    pub fn new(camera_id: CameraId) -> Self {
        Self {
            camera_id,
            state: CameraLifecycle::Stopped,
            last_health_check: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ApiStatus {
    Online,
    Offline,
    Unknown,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct HealthResponse {
    #[serde(default)]
    pub status: String,
}

impl HealthResponse {
    pub fn api_status(&self) -> ApiStatus {
        if self.status.eq_ignore_ascii_case("ok") {
            ApiStatus::Online
        } else {
            ApiStatus::Offline
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Validate)]
pub struct AddCameraRequest {
    #[validate(length(min = 1, max = 64), custom = "validate_camera_id")]
    pub camera_id: String,
    pub source: CameraSource,
}

fn validate_camera_id(camera_id: &str) -> Result<(), ValidationError> {
    if camera_id.chars().any(|c| c.is_whitespace() || c == '/' || c == '?' || c == '#') {
        return Err(ValidationError::new("camera_id_path_segment"));
    }
    Ok(())
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct CameraDescriptor {
    #[serde(default)]
    pub camera_id: Option<CameraId>,
    #[serde(default)]
    pub source: Option<CameraSource>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Registry listings come back either as bare ids or as `{id}` objects.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum CameraEntry {
    Id(CameraId),
    Object {
        #[serde(alias = "camera_id")]
        id: CameraId,
    },
}

impl CameraEntry {
    pub fn into_id(self) -> CameraId {
        match self {
            CameraEntry::Id(id) | CameraEntry::Object { id } => id,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct ListCamerasResponse {
    #[serde(default)]
    pub cameras: Vec<CameraEntry>,
}

impl ListCamerasResponse {
    pub fn into_ids(self) -> Vec<CameraId> {
        self.cameras.into_iter().map(CameraEntry::into_id).collect()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TestConnectionRequest {
    pub source: CameraSource,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct TestConnectionResponse {
    #[serde(default)]
    pub reachable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct ErrorBody {
    #[serde(default)]
    pub detail: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum AnomaliesResponse {
    List(Vec<AnomalyEvent>),
    Wrapped {
        #[serde(default)]
        anomalies: Vec<AnomalyEvent>,
    },
}

impl AnomaliesResponse {
    pub fn into_vec(self) -> Vec<AnomalyEvent> {
        match self {
            AnomaliesResponse::List(anomalies) | AnomaliesResponse::Wrapped { anomalies } => anomalies,
        }
    }
}

fn unknown_name() -> String {
    "Unknown".to_string()
}

fn uncategorized() -> String {
    "Uncategorized".to_string()
}

fn name_or_unknown<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let name: Option<String> = Option::deserialize(deserializer)?;
    Ok(name.filter(|n| !n.trim().is_empty()).unwrap_or_else(unknown_name))
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<f64> = Option::deserialize(deserializer)?;
    Ok(value.unwrap_or(0.0))
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Accepts ISO-8601 strings as-is and converts epoch seconds to RFC 3339.
fn flexible_timestamp<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => n.as_f64().and_then(|secs| {
            let millis = (secs * 1000.0).round() as i64;
            Utc.timestamp_millis_opt(millis).single().map(|dt| dt.to_rfc3339())
        }),
        _ => None,
    })
}
