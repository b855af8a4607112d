use livewatch_common::{utils::resolve_asset_url, CameraId};
use reqwest::Url;

use crate::error::{LiveViewError, Result};

/// Builds every backend URL from the configured base and API prefix.
#[derive(Debug, Clone)]
pub struct ApiEndpoints {
    base: Url,
    prefix: Vec<String>,
}

impl ApiEndpoints {
    pub fn new(base_url: &str, api_prefix: &str) -> Result<Self> {
        let base = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|e| LiveViewError::Config(format!("invalid api.base_url {}: {}", base_url, e)))?;
        if base.cannot_be_a_base() {
            return Err(LiveViewError::Config(format!("api.base_url {} cannot carry a path", base_url)));
        }

        let prefix = api_prefix
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self { base, prefix })
    }

    pub fn base_url(&self) -> &str {
        self.base.as_str().trim_end_matches('/')
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty();
            path.extend(self.prefix.iter().map(String::as_str));
            path.extend(segments);
        }
        url
    }

    pub fn health(&self) -> Url {
        self.url(&["health"])
    }

    pub fn cameras(&self) -> Url {
        self.url(&["cameras"])
    }

    pub fn camera(&self, camera_id: &CameraId) -> Url {
        self.url(&["cameras", camera_id.as_str()])
    }

    pub fn camera_action(&self, camera_id: &CameraId, action: &str) -> Url {
        self.url(&["cameras", camera_id.as_str(), action])
    }

    pub fn test_connection(&self) -> Url {
        self.url(&["cameras", "test-connection"])
    }

    pub fn faces(&self, camera_id: &CameraId) -> Url {
        self.camera_action(camera_id, "faces")
    }

    pub fn anomalies(&self, camera_id: &CameraId) -> Url {
        self.camera_action(camera_id, "anomalies")
    }

    pub fn events(&self) -> Url {
        self.url(&["events", "stream"])
    }

    /// Image stream consumed by the display surface, never parsed by the client.
    pub fn stream_url(&self, camera_id: &CameraId, fps: u32) -> String {
        let mut url = self.camera_action(camera_id, "stream");
        url.query_pairs_mut().append_pair("fps", &fps.to_string());
        url.to_string()
    }

    pub fn resolve_asset(&self, url: &str) -> String {
        resolve_asset_url(self.base_url(), url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_follow_prefix() {
        let endpoints = ApiEndpoints::new("http://localhost:8000/", "/api").unwrap();
        assert_eq!(endpoints.cameras().as_str(), "http://localhost:8000/api/cameras");
        assert_eq!(
            endpoints.camera_action(&CameraId::from("cam-01"), "start").as_str(),
            "http://localhost:8000/api/cameras/cam-01/start"
        );
        assert_eq!(endpoints.events().as_str(), "http://localhost:8000/api/events/stream");
        assert_eq!(
            endpoints.test_connection().as_str(),
            "http://localhost:8000/api/cameras/test-connection"
        );
    }

    #[test]
    fn test_stream_url() {
        let endpoints = ApiEndpoints::new("http://10.0.0.4:8000", "api").unwrap();
        assert_eq!(
            endpoints.stream_url(&CameraId::from("gate"), 6),
            "http://10.0.0.4:8000/api/cameras/gate/stream?fps=6"
        );
    }

    #[test]
    fn test_camera_id_is_escaped() {
        let endpoints = ApiEndpoints::new("http://localhost:8000", "/api").unwrap();
        let url = endpoints.camera(&CameraId::from("dock 1/a"));
        assert_eq!(url.as_str(), "http://localhost:8000/api/cameras/dock%201%2Fa");
    }

    #[test]
    fn test_base_with_path() {
        let endpoints = ApiEndpoints::new("https://example.com/monitor/", "/api").unwrap();
        assert_eq!(endpoints.health().as_str(), "https://example.com/monitor/api/health");
        assert_eq!(endpoints.base_url(), "https://example.com/monitor");
        assert_eq!(
            endpoints.resolve_asset("/clips/1.mp4"),
            "https://example.com/monitor/clips/1.mp4"
        );
    }

    #[test]
    fn test_rejects_invalid_base() {
        assert!(ApiEndpoints::new("not a url", "/api").is_err());
        assert!(ApiEndpoints::new("mailto:ops@example.com", "/api").is_err());
    }
}
